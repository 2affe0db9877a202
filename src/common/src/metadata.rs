use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{PgPool, Row, SqlitePool, query};
use std::fmt;

use crate::config::DatabaseConfig;

/// Connection pool of the metadata database (PostgreSQL or SQLite).
#[derive(Clone)]
pub enum MetadataPool {
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

/// Read access to the file index of module caches.
///
/// The index is owned by the pipeline producing the caches; the purger only
/// reads it. Each row describes one stored file with its `bucket`, `network`,
/// `subfolder`, `filetype`, `created_at` and a nullable `deleted_at`.
#[derive(Clone)]
pub struct MetadataStore {
    pool: MetadataPool,
    files_table: String,
    excluded_filetype: i32,
}

/// One module cache: every file stored under `network/subfolder` in `bucket`,
/// with the creation date of its youngest live file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleCache {
    pub bucket: String,
    pub network: String,
    pub subfolder: String,
    pub youngest_file_creation_date: DateTime<Utc>,
}

impl fmt::Display for ModuleCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) {}, {}",
            self.bucket, self.network, self.subfolder, self.youngest_file_creation_date
        )
    }
}

/// Filters for [`MetadataStore::stale_module_caches`]. Every value is sent as a
/// bound parameter.
#[derive(Clone, Debug)]
pub struct StaleModuleQuery<'a> {
    pub network: Option<&'a str>,
    pub subfolder: Option<&'a str>,
    /// Only module caches whose youngest file is strictly older than this
    pub cutoff: DateTime<Utc>,
    pub limit: Option<i64>,
}

/// `schema.table` style identifier made of ASCII letters, digits and `_`.
pub fn is_valid_table_identifier(identifier: &str) -> bool {
    !identifier.is_empty()
        && identifier.split('.').all(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) if first.is_ascii_alphabetic() || first == '_' => {
                    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
                }
                _ => false,
            }
        })
}

/// SQLite keeps timestamps as RFC 3339 text; one fixed format keeps them
/// comparable as strings.
pub fn format_sqlite_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl MetadataStore {
    /// Connect to the metadata database described by `config`.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        if !is_valid_table_identifier(&config.files_table) {
            return Err(sqlx::Error::Configuration(
                format!("invalid files table identifier: {:?}", config.files_table).into(),
            ));
        }

        let dsn = &config.dsn;
        let pool = if dsn.starts_with("sqlite:") {
            // every connection to an in-memory database sees its own database
            let max_connections = if dsn.contains(":memory:") {
                1
            } else {
                config.max_connections
            };
            let pool = SqlitePoolOptions::new()
                .max_connections(max_connections)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect(dsn)
                .await
                .map_err(|e| {
                    log::error!("Failed to connect to SQLite database: {e}");
                    e
                })?;
            MetadataPool::Sqlite(pool)
        } else {
            let pool = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .connect(dsn)
                .await
                .map_err(|e| {
                    log::error!("Failed to connect to PostgreSQL database: {e}");
                    e
                })?;
            MetadataPool::Postgres(pool)
        };

        log::info!("Metadata database connection established");
        Ok(Self {
            pool,
            files_table: config.files_table.clone(),
            excluded_filetype: config.excluded_filetype,
        })
    }

    pub fn pool(&self) -> &MetadataPool {
        &self.pool
    }

    pub fn files_table(&self) -> &str {
        &self.files_table
    }

    /// Module caches whose youngest live, non-marker file is older than the
    /// cutoff, oldest first.
    pub async fn stale_module_caches(
        &self,
        filter: &StaleModuleQuery<'_>,
    ) -> Result<Vec<ModuleCache>, sqlx::Error> {
        let sql = stale_module_sql(&self.files_table, filter);
        log::debug!("Querying stale module caches: {sql}");

        match &self.pool {
            MetadataPool::Postgres(pool) => {
                let mut stmt = query(&sql).bind(self.excluded_filetype);
                if let Some(network) = filter.network {
                    stmt = stmt.bind(network);
                }
                if let Some(subfolder) = filter.subfolder {
                    stmt = stmt.bind(subfolder);
                }
                stmt = stmt.bind(filter.cutoff);
                if let Some(limit) = filter.limit {
                    stmt = stmt.bind(limit);
                }

                let rows = stmt.fetch_all(pool).await?;
                let mut caches = Vec::with_capacity(rows.len());
                for row in rows {
                    caches.push(ModuleCache {
                        bucket: row.try_get("bucket")?,
                        network: row.try_get("network")?,
                        subfolder: row.try_get("subfolder")?,
                        youngest_file_creation_date: row.try_get("youngest_file_creation_date")?,
                    });
                }
                Ok(caches)
            }
            MetadataPool::Sqlite(pool) => {
                let mut stmt = query(&sql).bind(self.excluded_filetype);
                if let Some(network) = filter.network {
                    stmt = stmt.bind(network);
                }
                if let Some(subfolder) = filter.subfolder {
                    stmt = stmt.bind(subfolder);
                }
                stmt = stmt.bind(format_sqlite_timestamp(filter.cutoff));
                if let Some(limit) = filter.limit {
                    stmt = stmt.bind(limit);
                }

                let rows = stmt.fetch_all(pool).await?;
                let mut caches = Vec::with_capacity(rows.len());
                for row in rows {
                    let youngest: String = row.try_get("youngest_file_creation_date")?;
                    let youngest_file_creation_date = DateTime::parse_from_rfc3339(&youngest)
                        .map_err(|_| sqlx::Error::Decode("Invalid timestamp format".into()))?
                        .with_timezone(&Utc);

                    caches.push(ModuleCache {
                        bucket: row.try_get("bucket")?,
                        network: row.try_get("network")?,
                        subfolder: row.try_get("subfolder")?,
                        youngest_file_creation_date,
                    });
                }
                Ok(caches)
            }
        }
    }
}

/// Both backends accept `$N` placeholders, so one statement serves both.
fn stale_module_sql(files_table: &str, filter: &StaleModuleQuery<'_>) -> String {
    let mut param = 1;
    let mut next_param = || {
        param += 1;
        format!("${param}")
    };

    let mut predicates = String::new();
    if filter.network.is_some() {
        predicates.push_str(&format!("\n        AND network = {}", next_param()));
    }
    if filter.subfolder.is_some() {
        predicates.push_str(&format!("\n        AND subfolder = {}", next_param()));
    }
    let cutoff = next_param();
    let limit = match filter.limit {
        Some(_) => format!("\n    LIMIT {}", next_param()),
        None => String::new(),
    };

    format!(
        r#"
    WITH youngest_file AS (
        SELECT bucket, network, subfolder, MAX(created_at) AS youngest_file_creation_date
        FROM {files_table}
        WHERE deleted_at IS NULL
        AND filetype != $1{predicates}
        GROUP BY bucket, network, subfolder
    )
    SELECT bucket, network, subfolder, youngest_file_creation_date
    FROM youngest_file
    WHERE youngest_file_creation_date < {cutoff}
    ORDER BY youngest_file_creation_date ASC, bucket, network, subfolder{limit}"#
    )
}

#[cfg(any(test, feature = "testing"))]
impl MetadataStore {
    /// Create the files table. The real schema is owned by the pipeline, this
    /// is its SQLite shape for local runs and tests.
    pub async fn create_files_table(&self) -> Result<(), sqlx::Error> {
        let MetadataPool::Sqlite(pool) = &self.pool else {
            return Err(sqlx::Error::Configuration(
                "test schema is only available on SQLite".into(),
            ));
        };

        let create_files = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                bucket TEXT NOT NULL,
                network TEXT NOT NULL,
                subfolder TEXT NOT NULL,
                filename TEXT NOT NULL,
                filetype INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                deleted_at TEXT
            )"#,
            self.files_table
        );
        query(&create_files).execute(pool).await?;
        Ok(())
    }

    /// Insert one file row.
    pub async fn insert_file(&self, file: &crate::testing::FileRow) -> Result<(), sqlx::Error> {
        let MetadataPool::Sqlite(pool) = &self.pool else {
            return Err(sqlx::Error::Configuration(
                "test fixtures are only available on SQLite".into(),
            ));
        };

        let stmt = format!(
            "INSERT INTO {} (bucket, network, subfolder, filename, filetype, created_at, deleted_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
            self.files_table
        );
        query(&stmt)
            .bind(&file.bucket)
            .bind(&file.network)
            .bind(&file.subfolder)
            .bind(&file.filename)
            .bind(file.filetype)
            .bind(format_sqlite_timestamp(file.created_at))
            .bind(file.deleted_at.map(format_sqlite_timestamp))
            .execute(pool)
            .await?;
        Ok(())
    }
}
