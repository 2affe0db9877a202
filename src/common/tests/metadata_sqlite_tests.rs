//! SQLite-backed metadata tests.
//!
//! Use a database file and a schema created with plain SQL, the way an
//! operator would point a local run at an exported files table.

use chrono::{DateTime, Duration, Utc};
use common::config::{Configuration, DatabaseConfig};
use common::metadata::{MetadataPool, MetadataStore, StaleModuleQuery, format_sqlite_timestamp};
use sqlx::query;

async fn file_store(dir: &tempfile::TempDir, excluded_filetype: i32) -> MetadataStore {
    let path = dir.path().join("metadata.db");
    let config = DatabaseConfig {
        dsn: format!("sqlite://{}?mode=rwc", path.display()),
        files_table: "module_files".to_string(),
        excluded_filetype,
        max_connections: 2,
    };
    let store = MetadataStore::connect(&config)
        .await
        .expect("Failed to open SQLite metadata database");

    let MetadataPool::Sqlite(pool) = store.pool() else {
        panic!("expected a SQLite pool");
    };
    query(
        "CREATE TABLE module_files (
            bucket TEXT NOT NULL,
            network TEXT NOT NULL,
            subfolder TEXT NOT NULL,
            filename TEXT NOT NULL,
            filetype INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            deleted_at TEXT
        )",
    )
    .execute(pool)
    .await
    .expect("Failed to create files table");
    store
}

async fn insert(
    store: &MetadataStore,
    network: &str,
    subfolder: &str,
    filetype: i32,
    created_at: DateTime<Utc>,
) {
    let MetadataPool::Sqlite(pool) = store.pool() else {
        panic!("expected a SQLite pool");
    };
    query(
        "INSERT INTO module_files (bucket, network, subfolder, filename, filetype, created_at)
         VALUES ('caches', $1, $2, '0000000000-0000001000.output.zst', $3, $4)",
    )
    .bind(network)
    .bind(subfolder)
    .bind(filetype)
    .bind(format_sqlite_timestamp(created_at))
    .execute(pool)
    .await
    .expect("Failed to insert file");
}

#[tokio::test]
async fn test_subfolder_query_with_oldest_only_limit() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir, 1).await;
    let now = Utc::now();

    insert(&store, "eth-mainnet", "states", 0, now - Duration::days(40)).await;
    insert(&store, "sol-mainnet", "states", 0, now - Duration::days(90)).await;
    insert(&store, "eth-mainnet", "outputs", 0, now - Duration::days(90)).await;

    let query = StaleModuleQuery {
        network: None,
        subfolder: Some("states"),
        cutoff: now - Duration::days(30),
        limit: Some(1),
    };
    let caches = store.stale_module_caches(&query).await.unwrap();

    assert_eq!(caches.len(), 1);
    assert_eq!(caches[0].network, "sol-mainnet");
    assert_eq!(caches[0].subfolder, "states");
}

#[tokio::test]
async fn test_configured_marker_filetype_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir, 9).await;
    let now = Utc::now();

    insert(&store, "eth-mainnet", "mod", 0, now - Duration::days(60)).await;
    // a recent marker does not keep the module alive
    insert(&store, "eth-mainnet", "mod", 9, now - Duration::hours(1)).await;
    // a recent regular file does
    insert(&store, "eth-mainnet", "busy", 0, now - Duration::days(60)).await;
    insert(&store, "eth-mainnet", "busy", 0, now - Duration::hours(1)).await;

    let query = StaleModuleQuery {
        network: Some("eth-mainnet"),
        subfolder: None,
        cutoff: now - Duration::days(30),
        limit: None,
    };
    let caches = store.stale_module_caches(&query).await.unwrap();

    assert_eq!(caches.len(), 1);
    assert_eq!(caches[0].subfolder, "mod");
    let age = now - caches[0].youngest_file_creation_date;
    assert!(age >= Duration::days(59));
}

#[tokio::test]
async fn test_invalid_table_identifier_is_rejected() {
    let config = DatabaseConfig {
        files_table: "files; DROP TABLE files".to_string(),
        ..DatabaseConfig::in_memory()
    };
    assert!(MetadataStore::connect(&config).await.is_err());
}

#[test]
fn test_database_settings_from_file_and_environment() {
    figment::Jail::expect_with(|jail| {
        jail.create_file(
            "purger.toml",
            r#"
            [database]
            dsn = "sqlite://exported.db"
            files_table = "exports.files"
            "#,
        )?;
        jail.set_env("PURGER__DATABASE__EXCLUDED_FILETYPE", "4");

        let config = Configuration::load().map_err(|e| *e)?;
        assert_eq!(config.database.dsn, "sqlite://exported.db");
        assert_eq!(config.database.files_table, "exports.files");
        assert_eq!(config.database.excluded_filetype, 4);
        assert_eq!(config.database.max_connections, 5);
        Ok(())
    });
}
