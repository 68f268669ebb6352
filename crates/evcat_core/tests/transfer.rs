use evcat_core::{
    AttrValue, Catalogue, CatalogueService, Event, EventQuery, ImportSummary, Predicate,
    RepoError,
};

fn seeded() -> (CatalogueService, Catalogue, Catalogue, Vec<Event>) {
    let mut service = CatalogueService::open_in_memory().unwrap();
    let storm = Event::new(100, 200, "alice")
        .with_tags(["storm"])
        .with_products(["mag"])
        .with_rating(7)
        .with_attribute("peak", AttrValue::Float(12.5));
    let calm = Event::new(300, 400, "bob").with_tags(["calm"]);
    let trashed = Event::new(500, 600, "bob");
    for event in [&storm, &calm, &trashed] {
        service.create_event(event).unwrap();
    }
    service.remove_event(trashed.uuid).unwrap();

    let picked = Catalogue::new_static("picked", "alice").with_tags(["review"]);
    let storms = Catalogue::new_dynamic("storms", "alice", Predicate::tag_in(["storm"]))
        .with_attribute("owner", "alice");
    service.create_catalogue(&picked).unwrap();
    service.create_catalogue(&storms).unwrap();
    service
        .add_events(picked.uuid, &[calm.uuid, trashed.uuid])
        .unwrap();

    let trashed = service.get_event(trashed.uuid).unwrap();
    (service, picked, storms, vec![storm, calm, trashed])
}

#[test]
fn export_collects_catalogues_and_referenced_events() {
    let (service, picked, storms, events) = seeded();
    let document = service.export(&[picked.uuid, storms.uuid]).unwrap();

    assert_eq!(document.catalogues.len(), 2);
    assert_eq!(document.catalogues[0].events, vec![events[1].uuid, events[2].uuid]);
    assert!(document.catalogues[0].predicate.is_none());
    assert!(document.catalogues[1].predicate.is_some());
    assert!(document.catalogues[1].events.is_empty());
    assert_eq!(document.events, events);
}

#[test]
fn import_into_fresh_store_reproduces_membership() {
    let (source, picked, storms, events) = seeded();
    let json = source.export_json(&[picked.uuid, storms.uuid]).unwrap();

    let mut target = CatalogueService::open_in_memory().unwrap();
    let summary = target.import_json(&json).unwrap();
    assert_eq!(
        summary,
        ImportSummary {
            events_created: 3,
            events_skipped: 0,
            catalogues_created: 2,
            catalogues_skipped: 0,
        }
    );
    assert_eq!(target.store_version().unwrap(), 1);

    assert_eq!(target.get_catalogue(picked.uuid).unwrap(), picked);
    assert_eq!(target.get_catalogue(storms.uuid).unwrap(), storms);
    assert_eq!(target.events_of(picked.uuid).unwrap(), vec![events[1].clone()]);
    assert_eq!(target.events_of(storms.uuid).unwrap(), vec![events[0].clone()]);
    assert!(target.get_event(events[2].uuid).unwrap().is_removed);
}

#[test]
fn reimporting_same_document_skips_everything() {
    let (source, picked, storms, _) = seeded();
    let document = source.export(&[picked.uuid, storms.uuid]).unwrap();

    let mut target = CatalogueService::open_in_memory().unwrap();
    target.import(&document).unwrap();
    let version = target.store_version().unwrap();

    let summary = target.import(&document).unwrap();
    assert_eq!(summary.events_created, 0);
    assert_eq!(summary.events_skipped, 3);
    assert_eq!(summary.catalogues_skipped, 2);
    assert_eq!(target.store_version().unwrap(), version);
}

#[test]
fn conflicting_record_aborts_whole_import() {
    let (source, picked, storms, events) = seeded();
    let document = source.export(&[picked.uuid, storms.uuid]).unwrap();

    let mut target = CatalogueService::open_in_memory().unwrap();
    let mut clashing = events[1].clone();
    clashing.author = "mallory".to_string();
    target.create_event(&clashing).unwrap();
    let version = target.store_version().unwrap();

    let err = target.import(&document).unwrap_err();
    assert!(matches!(err, RepoError::Import(_)));
    assert_eq!(target.store_version().unwrap(), version);
    assert_eq!(
        target
            .query_events(&EventQuery::default().including_removed())
            .unwrap(),
        vec![clashing]
    );
    assert!(matches!(
        target.get_catalogue(picked.uuid),
        Err(RepoError::NotFound(_))
    ));
}

#[test]
fn unsupported_format_version_is_rejected() {
    let (source, picked, _, _) = seeded();
    let mut document = source.export(&[picked.uuid]).unwrap();
    document.format_version = 99;

    let mut target = CatalogueService::open_in_memory().unwrap();
    assert!(matches!(target.import(&document), Err(RepoError::Import(_))));
    assert!(matches!(
        target.import_json("{ not json"),
        Err(RepoError::Import(_))
    ));
}
