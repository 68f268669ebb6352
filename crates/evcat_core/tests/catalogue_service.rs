use evcat_core::model::event::EventValidationError;
use evcat_core::model::predicate::MAX_PREDICATE_DEPTH;
use evcat_core::{
    Catalogue, CatalogueQuery, CatalogueService, CatalogueVariant, Event, EventId, Predicate,
    PredicateError, RepoError,
};
use std::collections::BTreeSet;
use uuid::Uuid;

const JAN_01: i64 = 1_672_531_200_000;
const JAN_02: i64 = 1_672_617_600_000;
const FEB_01: i64 = 1_675_209_600_000;
const FEB_02: i64 = 1_675_296_000_000;

fn ids(events: &[Event]) -> BTreeSet<EventId> {
    events.iter().map(|event| event.uuid).collect()
}

fn id_set<const N: usize>(values: [EventId; N]) -> BTreeSet<EventId> {
    values.into_iter().collect()
}

#[test]
fn dynamic_membership_follows_predicate_changes() {
    let mut service = CatalogueService::open_in_memory().unwrap();
    let a = Event::new(JAN_01, JAN_02, "alice").with_tags(["x"]);
    let b = Event::new(FEB_01, FEB_02, "alice").with_tags(["y"]);
    service.create_event(&a).unwrap();
    service.create_event(&b).unwrap();

    let catalogue = Catalogue::new_dynamic("tagged", "alice", Predicate::tag_in(["x"]));
    service.create_catalogue(&catalogue).unwrap();
    assert_eq!(ids(&service.events_of(catalogue.uuid).unwrap()), id_set([a.uuid]));

    let either = Predicate::any([Predicate::tag_in(["x"]), Predicate::tag_in(["y"])]);
    service.set_predicate(catalogue.uuid, &either).unwrap();
    assert_eq!(
        ids(&service.events_of(catalogue.uuid).unwrap()),
        id_set([a.uuid, b.uuid])
    );
    assert_eq!(
        service.get_catalogue(catalogue.uuid).unwrap().predicate(),
        Some(&either)
    );
}

#[test]
fn static_membership_edits_are_idempotent() {
    let mut service = CatalogueService::open_in_memory().unwrap();
    let event = Event::new(0, 10, "alice");
    service.create_event(&event).unwrap();
    let catalogue = Catalogue::new_static("picked", "alice");
    service.create_catalogue(&catalogue).unwrap();

    service.add_events(catalogue.uuid, &[event.uuid]).unwrap();
    let version = service.store_version().unwrap();
    assert_eq!(service.add_events(catalogue.uuid, &[event.uuid]).unwrap(), 0);
    assert_eq!(service.store_version().unwrap(), version);
    assert_eq!(ids(&service.events_of(catalogue.uuid).unwrap()), id_set([event.uuid]));

    service.remove_events(catalogue.uuid, &[event.uuid]).unwrap();
    assert_eq!(service.remove_events(catalogue.uuid, &[event.uuid]).unwrap(), 0);
    assert!(service.events_of(catalogue.uuid).unwrap().is_empty());
}

#[test]
fn wrong_variant_is_rejected_and_store_is_unchanged() {
    let mut service = CatalogueService::open_in_memory().unwrap();
    let event = Event::new(0, 10, "alice").with_tags(["x"]);
    service.create_event(&event).unwrap();
    let dynamic = Catalogue::new_dynamic("computed", "alice", Predicate::tag_in(["x"]));
    let fixed = Catalogue::new_static("fixed", "alice");
    service.create_catalogue(&dynamic).unwrap();
    service.create_catalogue(&fixed).unwrap();
    let version = service.store_version().unwrap();

    let err = service.add_events(dynamic.uuid, &[event.uuid]).unwrap_err();
    assert!(matches!(
        err,
        RepoError::WrongVariant {
            catalogue,
            expected: CatalogueVariant::Static,
        } if catalogue == dynamic.uuid
    ));
    let err = service
        .set_predicate(fixed.uuid, &Predicate::tag_in(["x"]))
        .unwrap_err();
    assert!(matches!(err, RepoError::WrongVariant { .. }));

    assert_eq!(service.store_version().unwrap(), version);
    assert_eq!(service.get_catalogue(dynamic.uuid).unwrap(), dynamic);
    assert!(service.events_of(fixed.uuid).unwrap().is_empty());
}

#[test]
fn static_and_dynamic_catalogues_are_independent() {
    let mut service = CatalogueService::open_in_memory().unwrap();
    let x = Event::new(0, 10, "alice").with_tags(["x"]);
    let y = Event::new(5, 15, "alice").with_tags(["y"]);
    service.create_event(&x).unwrap();
    service.create_event(&y).unwrap();

    let dynamic = Catalogue::new_dynamic("computed", "alice", Predicate::tag_in(["x"]));
    let fixed = Catalogue::new_static("fixed", "alice");
    service.create_catalogue(&dynamic).unwrap();
    service.create_catalogue(&fixed).unwrap();

    service.add_events(fixed.uuid, &[y.uuid]).unwrap();
    assert_eq!(ids(&service.events_of(dynamic.uuid).unwrap()), id_set([x.uuid]));
    assert_eq!(
        service.get_catalogue(dynamic.uuid).unwrap().predicate(),
        Some(&Predicate::tag_in(["x"]))
    );

    service
        .set_predicate(dynamic.uuid, &Predicate::tag_in(["y"]))
        .unwrap();
    assert_eq!(ids(&service.events_of(fixed.uuid).unwrap()), id_set([y.uuid]));
}

#[test]
fn new_matching_event_appears_after_cached_evaluation() {
    let mut service = CatalogueService::open_in_memory().unwrap();
    let first = Event::new(0, 10, "alice").with_tags(["x"]);
    service.create_event(&first).unwrap();
    let catalogue = Catalogue::new_dynamic("computed", "alice", Predicate::tag_in(["x"]));
    service.create_catalogue(&catalogue).unwrap();

    assert_eq!(service.events_of(catalogue.uuid).unwrap().len(), 1);
    assert_eq!(service.cache().len(), 1);

    let second = Event::new(20, 30, "bob").with_tags(["x"]);
    service.create_event(&second).unwrap();
    assert_eq!(
        ids(&service.events_of(catalogue.uuid).unwrap()),
        id_set([first.uuid, second.uuid])
    );
}

#[test]
fn edited_and_removed_events_leave_dynamic_membership() {
    let mut service = CatalogueService::open_in_memory().unwrap();
    let mut edited = Event::new(0, 10, "alice").with_tags(["x"]);
    let trashed = Event::new(5, 10, "alice").with_tags(["x"]);
    service.create_event(&edited).unwrap();
    service.create_event(&trashed).unwrap();
    let catalogue = Catalogue::new_dynamic("computed", "alice", Predicate::tag_in(["x"]));
    service.create_catalogue(&catalogue).unwrap();
    assert_eq!(service.events_of(catalogue.uuid).unwrap().len(), 2);

    edited.tags.clear();
    service.update_event(&edited).unwrap();
    service.remove_event(trashed.uuid).unwrap();
    assert!(service.events_of(catalogue.uuid).unwrap().is_empty());

    service.restore_event(trashed.uuid).unwrap();
    assert_eq!(
        ids(&service.events_of(catalogue.uuid).unwrap()),
        id_set([trashed.uuid])
    );
}

#[test]
fn repeated_evaluation_at_same_version_is_identical() {
    let mut service = CatalogueService::open_in_memory().unwrap();
    for start in [30, 10, 20] {
        service
            .create_event(&Event::new(start, start + 5, "alice").with_tags(["x"]))
            .unwrap();
    }
    let catalogue = Catalogue::new_dynamic("computed", "alice", Predicate::tag_in(["x"]));
    service.create_catalogue(&catalogue).unwrap();

    let first = service.events_of(catalogue.uuid).unwrap();
    let second = service.events_of(catalogue.uuid).unwrap();
    assert_eq!(first, second);
    let starts: Vec<i64> = first.iter().map(|event| event.start).collect();
    assert_eq!(starts, vec![10, 20, 30]);
}

#[test]
fn disabled_cache_gives_the_same_answers() {
    let config = evcat_core::StoreConfig::default().without_membership_cache();
    let conn = evcat_core::db::open_db_in_memory_with_config(&config).unwrap();
    let mut service = CatalogueService::new(conn, &config);

    let event = Event::new(0, 10, "alice").with_tags(["x"]);
    service.create_event(&event).unwrap();
    let catalogue = Catalogue::new_dynamic("computed", "alice", Predicate::tag_in(["x"]));
    service.create_catalogue(&catalogue).unwrap();

    assert_eq!(ids(&service.events_of(catalogue.uuid).unwrap()), id_set([event.uuid]));
    assert!(service.cache().is_empty());
}

#[test]
fn malformed_predicate_never_reaches_storage() {
    let mut service = CatalogueService::open_in_memory().unwrap();
    let catalogue = Catalogue::new_dynamic("computed", "alice", Predicate::tag_in(["x"]));
    service.create_catalogue(&catalogue).unwrap();
    let version = service.store_version().unwrap();

    let bad = Predicate::negate(Predicate::TimeOverlap { start: 5, stop: 1 });
    let err = service.set_predicate(catalogue.uuid, &bad).unwrap_err();
    assert!(matches!(
        err,
        RepoError::MalformedPredicate(PredicateError::InvalidInterval { start: 5, stop: 1 })
    ));
    assert_eq!(service.store_version().unwrap(), version);
    assert_eq!(
        service.get_catalogue(catalogue.uuid).unwrap().predicate(),
        Some(&Predicate::tag_in(["x"]))
    );
}

#[test]
fn each_committed_unit_of_work_bumps_version_once() {
    let mut service = CatalogueService::open_in_memory().unwrap();
    assert_eq!(service.store_version().unwrap(), 0);

    let version = service
        .transact(|session| {
            let event = Event::new(0, 1, "alice");
            session.create_event(&event)?;
            let catalogue = Catalogue::new_static("picked", "alice");
            session.create_catalogue(&catalogue)?;
            session.add_events(catalogue.uuid, &[event.uuid])?;
            Ok(session.base_version())
        })
        .unwrap();
    assert_eq!(version, 0);
    assert_eq!(service.store_version().unwrap(), 1);

    let session = service.begin().unwrap();
    assert!(!session.has_unsaved_changes());
    assert_eq!(session.save().unwrap(), 1);
    assert_eq!(service.store_version().unwrap(), 1);
}

#[test]
fn failed_unit_of_work_commits_nothing() {
    let mut service = CatalogueService::open_in_memory().unwrap();
    let dynamic = Catalogue::new_dynamic("computed", "alice", Predicate::tag_in(["x"]));
    service.create_catalogue(&dynamic).unwrap();
    let version = service.store_version().unwrap();

    let event = Event::new(0, 1, "alice");
    let err = service
        .transact(|session| {
            session.create_event(&event)?;
            session.add_events(dynamic.uuid, &[event.uuid])
        })
        .unwrap_err();
    assert!(matches!(err, RepoError::WrongVariant { .. }));

    assert!(matches!(
        service.get_event(event.uuid),
        Err(RepoError::NotFound(_))
    ));
    assert_eq!(service.store_version().unwrap(), version);
}

#[test]
fn session_reads_its_own_writes_and_discard_drops_them() {
    let mut service = CatalogueService::open_in_memory().unwrap();
    let catalogue = Catalogue::new_dynamic("computed", "alice", Predicate::tag_in(["x"]));
    service.create_catalogue(&catalogue).unwrap();

    let event = Event::new(0, 1, "alice").with_tags(["x"]);
    let mut session = service.begin().unwrap();
    session.create_event(&event).unwrap();
    assert!(session.has_unsaved_changes());
    assert_eq!(ids(&session.events_of(catalogue.uuid).unwrap()), id_set([event.uuid]));
    session.discard().unwrap();

    assert!(service.events_of(catalogue.uuid).unwrap().is_empty());
    assert!(matches!(
        service.get_event(event.uuid),
        Err(RepoError::NotFound(_))
    ));
}

#[test]
fn dropped_session_rolls_back() {
    let mut service = CatalogueService::open_in_memory().unwrap();
    let event = Event::new(0, 1, "alice");
    {
        let mut session = service.begin().unwrap();
        session.create_event(&event).unwrap();
    }
    assert!(service.get_event(event.uuid).is_err());
    assert_eq!(service.store_version().unwrap(), 0);
}

#[test]
fn failed_operation_keeps_earlier_pending_work() {
    let mut service = CatalogueService::open_in_memory().unwrap();
    let event = Event::new(0, 1, "alice");

    let mut session = service.begin().unwrap();
    session.create_event(&event).unwrap();
    let duplicate = session.create_event(&event);
    assert!(matches!(duplicate, Err(RepoError::AlreadyExists(_))));
    session.save().unwrap();

    assert_eq!(service.get_event(event.uuid).unwrap(), event);
}

#[test]
fn deleting_event_detaches_it_from_static_catalogues() {
    let mut service = CatalogueService::open_in_memory().unwrap();
    let event = Event::new(0, 1, "alice");
    service.create_event(&event).unwrap();
    let catalogue = Catalogue::new_static("picked", "alice");
    service.create_catalogue(&catalogue).unwrap();
    service.add_events(catalogue.uuid, &[event.uuid]).unwrap();

    assert_eq!(service.delete_event(event.uuid).unwrap(), 1);
    assert!(service.events_of(catalogue.uuid).unwrap().is_empty());
    assert!(matches!(
        service.delete_event(event.uuid),
        Err(RepoError::NotFound(_))
    ));
}

#[test]
fn catalogues_of_combines_static_and_dynamic_membership() {
    let mut service = CatalogueService::open_in_memory().unwrap();
    let event = Event::new(0, 1, "alice").with_tags(["x"]);
    service.create_event(&event).unwrap();

    let fixed = Catalogue::new_static("fixed", "alice");
    let matching = Catalogue::new_dynamic("matching", "alice", Predicate::tag_in(["x"]));
    let other = Catalogue::new_dynamic("other", "alice", Predicate::tag_in(["y"]));
    for catalogue in [&fixed, &matching, &other] {
        service.create_catalogue(catalogue).unwrap();
    }
    service.add_events(fixed.uuid, &[event.uuid]).unwrap();

    let names: Vec<String> = service
        .catalogues_of(event.uuid)
        .unwrap()
        .into_iter()
        .map(|catalogue| catalogue.name)
        .collect();
    assert_eq!(names, vec!["fixed", "matching"]);

    service.remove_event(event.uuid).unwrap();
    assert!(service.catalogues_of(event.uuid).unwrap().is_empty());
    assert!(matches!(
        service.catalogues_of(Uuid::new_v4()),
        Err(RepoError::NotFound(_))
    ));
}

#[test]
fn removed_catalogues_are_hidden_until_restored() {
    let mut service = CatalogueService::open_in_memory().unwrap();
    let catalogue = Catalogue::new_static("picked", "alice");
    service.create_catalogue(&catalogue).unwrap();

    service.remove_catalogue(catalogue.uuid).unwrap();
    assert!(service
        .list_catalogues(&CatalogueQuery::default())
        .unwrap()
        .is_empty());
    assert!(service.get_catalogue(catalogue.uuid).unwrap().is_removed);

    service.restore_catalogue(catalogue.uuid).unwrap();
    assert_eq!(
        service.list_catalogues(&CatalogueQuery::default()).unwrap(),
        vec![catalogue]
    );
}

#[test]
fn unknown_catalogue_is_not_found() {
    let service = CatalogueService::open_in_memory().unwrap();
    assert!(matches!(
        service.events_of(Uuid::new_v4()),
        Err(RepoError::NotFound(_))
    ));
}

#[test]
fn ad_hoc_predicate_queries_need_no_catalogue() {
    let mut service = CatalogueService::open_in_memory().unwrap();
    let a = Event::new(JAN_01, JAN_02, "alice").with_tags(["x"]);
    let b = Event::new(FEB_01, FEB_02, "alice").with_tags(["y"]);
    let trashed = Event::new(JAN_01, FEB_02, "bob").with_tags(["x"]);
    for event in [&a, &b, &trashed] {
        service.create_event(event).unwrap();
    }
    service.remove_event(trashed.uuid).unwrap();

    assert_eq!(
        service.events_matching(&Predicate::tag_in(["x"])).unwrap(),
        vec![a.clone()]
    );
    let either = Predicate::any([Predicate::tag_in(["x"]), Predicate::tag_in(["y"])]);
    assert_eq!(service.events_matching(&either).unwrap(), vec![a, b]);
    assert!(service.cache().is_empty());

    let bad = Predicate::TimeOverlap { start: 2, stop: 1 };
    assert!(matches!(
        service.events_matching(&bad),
        Err(RepoError::MalformedPredicate(PredicateError::InvalidInterval { .. }))
    ));
}

#[test]
fn session_predicate_queries_see_unsaved_events() {
    let mut service = CatalogueService::open_in_memory().unwrap();
    let event = Event::new(0, 1, "alice").with_tags(["x"]);

    let mut session = service.begin().unwrap();
    session.create_event(&event).unwrap();
    assert_eq!(
        session.events_matching(&Predicate::tag_in(["x"])).unwrap(),
        vec![event]
    );
    session.discard().unwrap();

    assert!(service
        .events_matching(&Predicate::tag_in(["x"]))
        .unwrap()
        .is_empty());
}

#[test]
fn rejected_float_attribute_leaves_evaluation_working() {
    let mut service = CatalogueService::open_in_memory().unwrap();
    let valid = Event::new(0, 10, "alice").with_tags(["x"]);
    service.create_event(&valid).unwrap();
    let catalogue = Catalogue::new_dynamic("computed", "alice", Predicate::tag_in(["x"]));
    service.create_catalogue(&catalogue).unwrap();

    let bad = Event::new(0, 10, "bob")
        .with_tags(["x"])
        .with_attribute("score", f64::NAN);
    assert!(matches!(
        service.create_event(&bad),
        Err(RepoError::InvalidEvent(EventValidationError::NonFiniteAttribute(_)))
    ));

    assert_eq!(service.events_of(catalogue.uuid).unwrap(), vec![valid]);
}

#[test]
fn over_deep_predicate_is_rejected() {
    let mut service = CatalogueService::open_in_memory().unwrap();
    let catalogue = Catalogue::new_dynamic("computed", "alice", Predicate::tag_in(["x"]));
    service.create_catalogue(&catalogue).unwrap();

    let mut deep = Predicate::tag_in(["x"]);
    for _ in 0..MAX_PREDICATE_DEPTH {
        deep = Predicate::negate(deep);
    }
    assert!(matches!(
        service.set_predicate(catalogue.uuid, &deep),
        Err(RepoError::MalformedPredicate(PredicateError::TooDeep { .. }))
    ));
    assert!(matches!(
        service.events_matching(&deep),
        Err(RepoError::MalformedPredicate(PredicateError::TooDeep { .. }))
    ));
}

#[test]
fn large_static_catalogue_is_readable_and_exportable() {
    const MEMBERS: i64 = 33_000;
    let mut service = CatalogueService::open_in_memory().unwrap();
    let catalogue = Catalogue::new_static("bulk", "alice");

    service
        .transact(|session| {
            session.create_catalogue(&catalogue)?;
            let mut ids = Vec::new();
            for start in (0..MEMBERS).rev() {
                ids.push(session.create_event(&Event::new(start, start + 1, "alice"))?);
            }
            session.add_events(catalogue.uuid, &ids)
        })
        .unwrap();

    let members = service.events_of(catalogue.uuid).unwrap();
    assert_eq!(members.len() as i64, MEMBERS);
    assert_eq!(members.first().map(|event| event.start), Some(0));
    assert_eq!(members.last().map(|event| event.start), Some(MEMBERS - 1));

    let document = service.export(&[catalogue.uuid]).unwrap();
    assert_eq!(document.catalogues[0].events.len() as i64, MEMBERS);
    assert_eq!(document.events.len() as i64, MEMBERS);
}

