//! Inspection CLI for catalogue stores.
//!
//! # Responsibility
//! - Print catalogues of a store, or the events of one catalogue.
//! - Keep output deterministic for quick local sanity checks.
//!
//! Usage:
//! - `evcat_cli` prints the core version.
//! - `evcat_cli <db-path>` lists catalogues with kind and member count.
//! - `evcat_cli <db-path> <catalogue-uuid>` lists the catalogue's events.
//!
//! Set `EVCAT_LOG_DIR` to an absolute directory to enable file logging.

use evcat_core::{
    default_log_level, init_logging, CatalogueQuery, CatalogueService, RepoResult, StoreConfig,
};
use log::{error, info};
use std::process::ExitCode;
use uuid::Uuid;

fn main() -> ExitCode {
    if let Ok(log_dir) = std::env::var("EVCAT_LOG_DIR") {
        if let Err(err) = init_logging(default_log_level().as_str(), &log_dir) {
            eprintln!("logging disabled: {err}");
        }
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let outcome = match args.as_slice() {
        [] => {
            println!("evcat_core version={}", evcat_core::core_version());
            Ok(())
        }
        [db_path] => list_catalogues(db_path),
        [db_path, catalogue] => match Uuid::parse_str(catalogue) {
            Ok(id) => list_events(db_path, id),
            Err(_) => {
                eprintln!("`{catalogue}` is not a catalogue uuid");
                return ExitCode::from(2);
            }
        },
        _ => {
            eprintln!("usage: evcat_cli [<db-path> [<catalogue-uuid>]]");
            return ExitCode::from(2);
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=cli_run module=cli status=error error={err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn list_catalogues(db_path: &str) -> RepoResult<()> {
    info!("event=cli_run module=cli status=start command=list");
    let service = CatalogueService::open(db_path, &StoreConfig::default())?;
    for catalogue in service.list_catalogues(&CatalogueQuery::default())? {
        let members = service.events_of(catalogue.uuid)?.len();
        println!(
            "{}\t{}\t{}\t{}",
            catalogue.uuid,
            catalogue.variant(),
            members,
            catalogue.name
        );
    }
    Ok(())
}

fn list_events(db_path: &str, catalogue: Uuid) -> RepoResult<()> {
    info!("event=cli_run module=cli status=start command=events");
    let service = CatalogueService::open(db_path, &StoreConfig::default())?;
    for event in service.events_of(catalogue)? {
        let tags: Vec<&str> = event.tags.iter().map(String::as_str).collect();
        println!(
            "{}\t{}\t{}\t{}\t{}",
            event.uuid,
            event.start,
            event.stop,
            event.author,
            tags.join(",")
        );
    }
    Ok(())
}
