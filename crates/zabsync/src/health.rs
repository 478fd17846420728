use std::path::Path;

use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::ZabError;

/// Snapshot of daemon health, rewritten atomically on each status tick.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub date: String,
    pub date_unixtime: i64,
    pub pid: u32,
    pub cwd: String,
    pub all_ok: bool,
    pub processes: Vec<ProcessHealth>,
    pub queues: Vec<QueueHealth>,
    pub failsafe: usize,
}

#[derive(Debug, Serialize)]
pub struct ProcessHealth {
    pub name: String,
    pub alive: bool,
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct QueueHealth {
    pub size: usize,
}

impl HealthReport {
    pub fn new(
        all_ok: bool,
        processes: Vec<ProcessHealth>,
        queues: Vec<QueueHealth>,
        failsafe: usize,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        HealthReport {
            date: now.format(&Rfc3339).unwrap_or_default(),
            date_unixtime: now.unix_timestamp(),
            pid: std::process::id(),
            cwd: std::env::current_dir()
                .map(|cwd| cwd.display().to_string())
                .unwrap_or_default(),
            all_ok,
            processes,
            queues,
            failsafe,
        }
    }
}

/// Writes the report next to its destination and renames it into place so
/// readers never observe a partial document.
pub fn write_health(path: &Path, report: &HealthReport) -> Result<(), ZabError> {
    let content = serde_json::to_string(report)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content).map_err(|e| {
        ZabError::Config(format!("unable to write health file {}: {}", tmp.display(), e))
    })?;
    std::fs::rename(&tmp, path).map_err(|e| {
        ZabError::Config(format!("unable to write health file {}: {}", path.display(), e))
    })
}
