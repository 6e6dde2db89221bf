//! per-hop resolution trace, written as CSV
//!
//! The trace log is a data product with a fixed schema, distinct from the
//! operational log. Each row records one server interaction (or cache hit)
//! of one request, and rows from concurrent requests interleave freely;
//! the request id column is what ties a resolution path back together.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Local};
use derive_more::{Display, Error, From};
use uuid::Uuid;

#[derive(Debug, Display, From, Error)]
pub enum TraceError {
    Io(std::io::Error),
    PoisonedLock,
}

type Result<T> = std::result::Result<T, TraceError>;

pub const TRACE_HEADER: &str = "timestamp,domain,mode,server_contacted,step,\
                                response_or_referral,rtt_s,total_time_s,cache_status,request_id";

/// How a resolution was performed, as recorded in the `mode` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    Recursive,
    Iterative,
}

impl ResolveMode {
    pub fn as_str(&self) -> &'static str {
        match *self {
            ResolveMode::Recursive => "recursive",
            ResolveMode::Iterative => "iterative",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match *self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// One server interaction during a resolution. Immutable once created; the
/// engine accumulates these and the server hands them to the logger after
/// the response has been decided.
#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub server: String,
    pub step: &'static str,
    pub response: String,
    pub rtt: Duration,
    pub total: Duration,
    pub cache_status: CacheStatus,
    pub timestamp: DateTime<Local>,
}

impl TraceEvent {
    pub fn new(
        server: String,
        step: &'static str,
        response: String,
        rtt: Duration,
        total: Duration,
        cache_status: CacheStatus,
    ) -> TraceEvent {
        TraceEvent {
            server,
            step,
            response,
            rtt,
            total,
            cache_status,
            timestamp: Local::now(),
        }
    }
}

/// Quote a CSV field only when it needs it.
fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

struct DurationSecs(Duration);

impl fmt::Display for DurationSecs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}", self.0.as_secs_f64())
    }
}

/// Append-only CSV sink shared by all request workers. A single mutex
/// serializes rows and every row is flushed immediately, so a crash loses
/// at most the row being written.
pub struct TraceLogger {
    file: Mutex<File>,
}

impl TraceLogger {
    /// Open (or create) the trace log at `path`. The schema header is only
    /// written when the file is empty, so restarting the server extends an
    /// existing log.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<TraceLogger> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        if file.metadata()?.len() == 0 {
            writeln!(file, "{}", TRACE_HEADER)?;
            file.flush()?;
        }

        Ok(TraceLogger {
            file: Mutex::new(file),
        })
    }

    /// Write one trace row. The mode is a property of the request, not of
    /// the individual hop, so every row of a request carries the same value
    /// even when a recursive attempt fell back to the iterative walk. When
    /// `force_hit` is set the event's own cache status is overridden with
    /// HIT; a request ultimately served from cache reports every row as a
    /// hit.
    pub fn log_event(
        &self,
        domain: &str,
        mode: ResolveMode,
        event: &TraceEvent,
        request_id: &Uuid,
        force_hit: bool,
    ) -> Result<()> {
        let cache_status = if force_hit {
            CacheStatus::Hit
        } else {
            event.cache_status
        };

        let row = format!(
            "{},{},{},{},{},{},{},{},{},{}",
            csv_field(&event.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()),
            csv_field(domain),
            mode.as_str(),
            csv_field(&event.server),
            csv_field(event.step),
            csv_field(&event.response),
            DurationSecs(event.rtt),
            DurationSecs(event.total),
            cache_status.as_str(),
            request_id,
        );

        let mut file = self.file.lock().map_err(|_| TraceError::PoisonedLock)?;
        writeln!(file, "{}", row)?;
        file.flush()?;

        Ok(())
    }
}
