//! CLI smoke entry point.
//!
//! # Responsibility
//! - Seed a database with sample members and print the default listing page.
//! - Keep output deterministic for quick local sanity checks.
//!
//! Usage: `datajpa_cli [DB_PATH]`. Without a path an in-memory store is used.
//! Logging is enabled when `DATAJPA_LOG_DIR` is set.

use datajpa_core::{MemberService, RepoResult, Session, SessionConfig, SqliteMemberRepository};
use log::{error, info};
use std::process::ExitCode;

const SEED_COUNT: u32 = 100;

fn main() -> ExitCode {
    if let Err(err) = datajpa_core::init_logging_from_env() {
        eprintln!("logging disabled: {err}");
    }

    let db_path = std::env::args().nth(1);
    match run(db_path.as_deref()) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("event=cli_run module=cli status=error error={err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(db_path: Option<&str>) -> RepoResult<String> {
    let session = match db_path {
        Some(path) => Session::open_file(path, SessionConfig::default())?,
        None => Session::open_in_memory()?,
    };

    let json = {
        let service = MemberService::new(SqliteMemberRepository::try_new(&session)?);
        service.seed(SEED_COUNT)?;
        let page = service.list_dto(&MemberService::<SqliteMemberRepository<'_>>::default_page_request())?;
        info!(
            "event=cli_run module=cli status=ok total={} pages={}",
            page.total_elements(),
            page.total_pages()
        );
        serde_json::to_string_pretty(&page)
            .map_err(|err| datajpa_core::RepoError::InvalidData(err.to_string()))?
    };

    session.commit()?;
    Ok(json)
}
