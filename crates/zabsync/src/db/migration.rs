use rusqlite::{Connection, OptionalExtension, Transaction, params};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::ZabError;

/// One schema change, keyed by the release that introduced it.
pub struct Migration {
    pub version: &'static str,
    pub up: fn(&Transaction) -> rusqlite::Result<()>,
}

/// All known migrations, ordered by semantic version. Each runs at most
/// once per database; `schema_migrations` records what has been applied.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0.1.0",
        up: create_base_tables,
    },
    Migration {
        version: "0.2.0",
        up: add_hosts_source_timestamp,
    },
];

/// Parses `major.minor.patch` into a version triple. Pre-release suffixes
/// on the patch component are tolerated (`"1.2.3rc1"` parses as `(1, 2, 3)`);
/// missing or empty components are errors.
pub fn parse_version(version: &str) -> Result<(u64, u64, u64), ZabError> {
    let parts: Vec<&str> = version.split('.').collect();
    let [major, minor, patch] = parts.as_slice() else {
        return Err(ZabError::Config(format!(
            "'{}' is an invalid semantic version",
            version
        )));
    };
    let invalid =
        || ZabError::Config(format!("'{}' is an invalid semantic version", version));

    let major: u64 = major.parse().map_err(|_| invalid())?;
    let minor: u64 = minor.parse().map_err(|_| invalid())?;
    let digits: String = patch.chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err(invalid());
    }
    let patch: u64 = digits.parse().map_err(|_| invalid())?;
    Ok((major, minor, patch))
}

/// Applies every pending migration inside one transaction. On any failure
/// the whole run is rolled back and the error propagated, leaving the
/// schema as it was.
pub fn run_migrations(conn: &mut Connection) -> Result<(), ZabError> {
    let tx = conn.transaction()?;
    tx.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;

    let mut last = (0, 0, 0);
    for migration in MIGRATIONS {
        let version = parse_version(migration.version)?;
        if version <= last {
            return Err(ZabError::Config(format!(
                "migrations are not sorted: {} follows a newer version",
                migration.version
            )));
        }
        last = version;

        let applied: Option<String> = tx
            .query_row(
                "SELECT version FROM schema_migrations WHERE version = ?",
                params![migration.version],
                |row| row.get(0),
            )
            .optional()?;
        if applied.is_some() {
            continue;
        }

        log::debug!("Running migration: {}", migration.version);
        (migration.up)(&tx)?;
        let applied_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?, ?)",
            params![migration.version, applied_at],
        )?;
    }
    tx.commit()?;
    Ok(())
}

fn create_base_tables(tx: &Transaction) -> rusqlite::Result<()> {
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS hosts_source (
            source TEXT NOT NULL,
            hostname TEXT NOT NULL,
            data TEXT NOT NULL,
            PRIMARY KEY (source, hostname)
        );
        CREATE TABLE IF NOT EXISTS hosts (
            hostname TEXT PRIMARY KEY,
            data TEXT NOT NULL
        );",
    )
}

fn add_hosts_source_timestamp(tx: &Transaction) -> rusqlite::Result<()> {
    let mut stmt = tx.prepare("SELECT name FROM pragma_table_info('hosts_source')")?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    if !columns.iter().any(|c| c == "timestamp") {
        tx.execute(
            "ALTER TABLE hosts_source ADD COLUMN timestamp TEXT NOT NULL DEFAULT ''",
            [],
        )?;
        log::info!("Added 'timestamp' column to 'hosts_source' table.");
    }
    Ok(())
}
