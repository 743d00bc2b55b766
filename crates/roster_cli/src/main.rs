//! CLI smoke entry point.
//!
//! # Responsibility
//! - Run one register/login/subscribe/logout cycle against the local backends.
//! - Keep output deterministic enough for quick local sanity checks.

use roster_core::{
    init_logging_with, load_config, CollectionSnapshot, CoreConfig, LiveCollectionSync,
    LocalIdentityProvider, LogSettings, RecordInput, RecordService, RegistrationInput,
    SessionManager, SqliteDocumentStore, UserView,
};
use log::info;
use serde_json::json;
use std::error::Error;
use std::sync::Arc;

const DEFAULT_CONFIG_PATH: &str = "roster.toml";

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("roster_cli error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config(&config_path)?;
    init_cli_logging(&config)?;

    println!("roster_core version={}", roster_core::core_version());

    let identity = Arc::new(LocalIdentityProvider::new());
    let store = Arc::new(SqliteDocumentStore::open_in_memory()?);
    let session = SessionManager::new(identity.clone(), store.clone(), config.clone());
    let _observer = session.observe_session_changes(|view: Option<&UserView>| {
        println!(
            "{}",
            json!({ "event": "session", "user_id": view.map(|view| view.id.as_str()) })
        );
    });

    let registration =
        RegistrationInput::new("Demo User", "demo@example.com", "demo-pass", 30, "Software");
    let registered = session.register(&registration).await?;
    println!(
        "{}",
        json!({
            "event": "registered",
            "email": registered.email_address,
            "specialty": registered.specialty.as_ref().map(|s| s.label().to_string()),
        })
    );
    session.logout().await?;
    session.login("demo@example.com", "demo-pass").await?;

    let records = RecordService::new(store.clone(), &config);
    let sync = LiveCollectionSync::new(store.clone());
    let handle = sync.open(
        &records.roster_query(),
        |snapshot: &CollectionSnapshot| {
            let names: Vec<&str> = snapshot
                .records
                .iter()
                .map(|record| record.name().unwrap_or("-"))
                .collect();
            println!(
                "{}",
                json!({ "event": "snapshot", "sequence": snapshot.sequence, "names": names })
            );
        },
        |error| eprintln!("subscription error: {error}"),
    );

    records
        .add_record(&RecordInput::new("Ana", "ana@example.com", 25, "Diseño"))
        .await?;
    records
        .add_record(&RecordInput::new("Luis", "luis@example.com", 41, "Contaduría"))
        .await?;

    handle.close();
    session.logout().await?;
    info!("event=cli_smoke module=cli status=ok");
    Ok(())
}

fn init_cli_logging(config: &CoreConfig) -> Result<(), Box<dyn Error>> {
    if let Some(log_dir) = &config.log_dir {
        let settings =
            LogSettings::new(config.log_level.as_str(), log_dir.as_path()).with_stderr();
        init_logging_with(&settings)?;
    }
    Ok(())
}
