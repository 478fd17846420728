use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, OptionalExtension, params};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::ZabError;
use crate::models::Host;

pub mod migration;

/// Write statistics for one batch or merge tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchCounters {
    pub equal: usize,
    pub replaced: usize,
    pub inserted: usize,
    pub removed: usize,
}

impl fmt::Display for BatchCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Equal hosts: {}, replaced hosts: {}, inserted hosts: {}, removed hosts: {}",
            self.equal, self.replaced, self.inserted, self.removed
        )
    }
}

/// The relational store shared by the handler, the merger, and the
/// reconcilers.
///
/// The connection is managed within an `Arc<Mutex<>>`; every operation runs
/// on a blocking thread so the async workers never stall the runtime, and
/// every multi-row mutation is one transaction.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens (or creates) the database at `db_uri` and applies pending
    /// migrations.
    pub async fn connect(db_uri: &str) -> Result<Self, ZabError> {
        let db_uri = db_uri.to_string();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, ZabError> {
            let mut conn = Connection::open(&db_uri)?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            migration::run_migrations(&mut conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| ZabError::Database(format!("failed to spawn blocking task: {}", e)))??;

        Ok(Store {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run_blocking<F, R>(&self, f: F) -> Result<R, ZabError>
    where
        F: FnOnce(&mut Connection) -> Result<R, rusqlite::Error> + Send + 'static,
        R: Send + 'static,
    {
        let conn_arc = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn_arc.lock().unwrap();
            f(&mut conn)
        })
        .await
        .map_err(|e| ZabError::Database(format!("task execution failed: {}", e)))?
        .map_err(ZabError::from)
    }

    /// Hostnames currently recorded for one source.
    pub async fn source_hostnames(&self, source: &str) -> Result<Vec<String>, ZabError> {
        let source = source.to_string();
        self.run_blocking(move |conn| {
            let mut stmt = conn
                .prepare("SELECT hostname FROM hosts_source WHERE source = ? ORDER BY hostname")?;
            let rows = stmt.query_map(params![source], |row| row.get(0))?;
            rows.collect()
        })
        .await
    }

    /// Every hostname present in `hosts_source`, across all sources.
    pub async fn all_source_hostnames(&self) -> Result<Vec<String>, ZabError> {
        self.run_blocking(|conn| {
            let mut stmt =
                conn.prepare("SELECT DISTINCT hostname FROM hosts_source ORDER BY hostname")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect()
        })
        .await
    }

    /// All per-source rows for one hostname, ordered by `(source, hostname)`
    /// so merge folds are reproducible.
    pub async fn source_rows_for_hostname(&self, hostname: &str) -> Result<Vec<Host>, ZabError> {
        let hostname = hostname.to_string();
        let rows: Vec<String> = self
            .run_blocking(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT data FROM hosts_source WHERE hostname = ? ORDER BY source, hostname",
                )?;
                let rows = stmt.query_map(params![hostname], |row| row.get(0))?;
                rows.collect()
            })
            .await?;
        rows.iter()
            .map(|data| serde_json::from_str(data).map_err(ZabError::from))
            .collect()
    }

    /// Applies one collector batch in a single transaction: rows missing
    /// from the batch are deleted, the rest upserted by `(source, hostname)`.
    pub async fn apply_source_batch(
        &self,
        source: &str,
        hosts: &[Host],
    ) -> Result<BatchCounters, ZabError> {
        let source = source.to_string();
        let mut rendered = Vec::with_capacity(hosts.len());
        for host in hosts {
            rendered.push((host.hostname.clone(), host.canonical_json()?));
        }

        self.run_blocking(move |conn| {
            let tx = conn.transaction()?;
            let mut counters = BatchCounters::default();
            let incoming: BTreeSet<&str> =
                rendered.iter().map(|(hostname, _)| hostname.as_str()).collect();

            let current: Vec<String> = {
                let mut stmt =
                    tx.prepare("SELECT hostname FROM hosts_source WHERE source = ?")?;
                let rows = stmt.query_map(params![source], |row| row.get(0))?;
                rows.collect::<Result<_, _>>()?
            };
            for hostname in &current {
                if !incoming.contains(hostname.as_str()) {
                    tx.execute(
                        "DELETE FROM hosts_source WHERE source = ? AND hostname = ?",
                        params![source, hostname],
                    )?;
                    counters.removed += 1;
                }
            }

            let timestamp = OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default();
            for (hostname, data) in &rendered {
                let existing: Option<String> = tx
                    .query_row(
                        "SELECT data FROM hosts_source WHERE source = ? AND hostname = ?",
                        params![source, hostname],
                        |row| row.get(0),
                    )
                    .optional()?;
                match existing {
                    Some(current) if current == *data => counters.equal += 1,
                    Some(_) => {
                        tx.execute(
                            "UPDATE hosts_source SET data = ?, timestamp = ?
                             WHERE source = ? AND hostname = ?",
                            params![data, timestamp, source, hostname],
                        )?;
                        counters.replaced += 1;
                    }
                    None => {
                        tx.execute(
                            "INSERT INTO hosts_source (source, hostname, data, timestamp)
                             VALUES (?, ?, ?, ?)",
                            params![source, hostname, data, timestamp],
                        )?;
                        counters.inserted += 1;
                    }
                }
            }

            tx.commit()?;
            Ok(counters)
        })
        .await
    }

    /// Hostnames currently present in the merged `hosts` table.
    pub async fn merged_hostnames(&self) -> Result<Vec<String>, ZabError> {
        self.run_blocking(|conn| {
            let mut stmt = conn.prepare("SELECT hostname FROM hosts ORDER BY hostname")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect()
        })
        .await
    }

    /// All merged hosts.
    pub async fn merged_hosts(&self) -> Result<Vec<Host>, ZabError> {
        let rows: Vec<String> = self
            .run_blocking(|conn| {
                let mut stmt = conn.prepare("SELECT data FROM hosts ORDER BY hostname")?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.collect()
            })
            .await?;
        rows.iter()
            .map(|data| serde_json::from_str(data).map_err(ZabError::from))
            .collect()
    }

    /// Merged hosts with `enabled = true`, the view the reconcilers work
    /// from.
    pub async fn enabled_hosts(&self) -> Result<Vec<Host>, ZabError> {
        let hosts = self.merged_hosts().await?;
        Ok(hosts.into_iter().filter(|host| host.enabled).collect())
    }

    /// Applies one merge tick in a single transaction: upserts the merged
    /// hosts and deletes every row whose hostname left the snapshot.
    pub async fn apply_merged(
        &self,
        hosts: &[Host],
        snapshot: &BTreeSet<String>,
    ) -> Result<BatchCounters, ZabError> {
        let mut rendered = Vec::with_capacity(hosts.len());
        for host in hosts {
            rendered.push((host.hostname.clone(), host.canonical_json()?));
        }
        let snapshot = snapshot.clone();

        self.run_blocking(move |conn| {
            let tx = conn.transaction()?;
            let mut counters = BatchCounters::default();

            let current: Vec<String> = {
                let mut stmt = tx.prepare("SELECT hostname FROM hosts")?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.collect::<Result<_, _>>()?
            };
            for hostname in &current {
                if !snapshot.contains(hostname) {
                    tx.execute("DELETE FROM hosts WHERE hostname = ?", params![hostname])?;
                    counters.removed += 1;
                }
            }

            for (hostname, data) in &rendered {
                let existing: Option<String> = tx
                    .query_row(
                        "SELECT data FROM hosts WHERE hostname = ?",
                        params![hostname],
                        |row| row.get(0),
                    )
                    .optional()?;
                match existing {
                    Some(current) if current == *data => counters.equal += 1,
                    Some(_) => {
                        tx.execute(
                            "UPDATE hosts SET data = ? WHERE hostname = ?",
                            params![data, hostname],
                        )?;
                        counters.replaced += 1;
                    }
                    None => {
                        tx.execute(
                            "INSERT INTO hosts (hostname, data) VALUES (?, ?)",
                            params![hostname, data],
                        )?;
                        counters.inserted += 1;
                    }
                }
            }

            tx.commit()?;
            Ok(counters)
        })
        .await
    }
}
