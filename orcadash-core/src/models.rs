use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::macros::format_description;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LogLevel {
    #[default]
    Info,
    Warning,
    Error,
    Debug,
}

impl LogLevel {
    /// Severity as written by the controller. Case-insensitive, anything
    /// unrecognized is `Info`.
    pub fn from_severity(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "WARN" | "WARNING" => Self::Warning,
            "ERROR" => Self::Error,
            "DEBUG" => Self::Debug,
            _ => Self::Info,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARN",
            Self::Error => "ERROR",
            Self::Debug => "DEBUG",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    pub id: String,
    pub schema: String, // owning schema name
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub probes: BTreeMap<String, Probe>,
    pub expanded: bool,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            probes: BTreeMap::new(),
            expanded: true,
        }
    }

    pub fn active_probes(&self) -> usize {
        self.probes.values().filter(|p| p.active).count()
    }
}

/// Half-open range of MPI ranks covered by an aggregator.
///
/// Starts out empty (`lo = +inf`, `hi = -inf`) and only ever widens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankRange {
    pub lo: i64,
    pub hi: i64,
}

impl RankRange {
    pub const EMPTY: RankRange = RankRange {
        lo: i64::MAX,
        hi: i64::MIN,
    };

    pub fn is_empty(&self) -> bool {
        self.lo > self.hi
    }

    pub fn widen(&mut self, rbeg: i64, rend: i64) {
        self.lo = self.lo.min(rbeg);
        self.hi = self.hi.max(rend);
    }
}

impl Default for RankRange {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl std::fmt::Display for RankRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            write!(f, "[-]")
        } else {
            write!(f, "[{}, {})", self.lo, self.hi)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepRange {
    pub rep_id: i64,
    pub rbeg: i64,
    pub rend: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregator {
    pub id: String,
    pub address: String,
    pub rank_range: RankRange,
    pub reps: Vec<RepRange>,
}

impl Aggregator {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: String::new(),
            rank_range: RankRange::EMPTY,
            reps: Vec::new(),
        }
    }

    pub fn add_rep(&mut self, rep: RepRange) {
        self.rank_range.widen(rep.rbeg, rep.rend);
        self.reps.push(rep);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: OffsetDateTime, // client receipt time, never the controller's
    pub message: String,
    pub level: LogLevel,
}

impl LogEntry {
    pub fn now(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc(),
            message: message.into(),
            level,
        }
    }

    pub fn formatted_time(&self) -> String {
        self.timestamp
            .format(format_description!("[hour]:[minute]:[second]"))
            .unwrap_or_else(|_| "--:--:--".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub id: u64,
    pub name: String,
    pub text: String,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestepMark {
    pub from_ts: i64,
    pub timestamp: i64, // wall clock reported by the controller
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestepInfo {
    pub current: i64,
    pub history: Vec<TimestepMark>,
}

impl TimestepInfo {
    pub fn advance(&mut self, timestamp: i64, from_ts: i64, to_ts: i64) {
        self.current = to_ts;
        self.history.push(TimestepMark { from_ts, timestamp });
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub status_text: String,
    pub aggregator_count: u32,
    pub rank_count: u32,
    pub timestep: i64,
    pub cpu_usage: f32,
    pub connection_status: String,
}

impl Default for SystemStatus {
    fn default() -> Self {
        Self {
            status_text: "Unclear".to_string(),
            aggregator_count: 0,
            rank_count: 0,
            timestep: 0,
            cpu_usage: 0.0,
            connection_status: "Disconnected".to_string(),
        }
    }
}

/// Partial status update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status_text: Option<String>,
    pub aggregator_count: Option<u32>,
    pub rank_count: Option<u32>,
    pub timestep: Option<i64>,
    pub cpu_usage: Option<f32>,
    pub connection_status: Option<String>,
}

impl StatusUpdate {
    pub fn connection(status: impl Into<String>) -> Self {
        Self {
            connection_status: Some(status.into()),
            ..Self::default()
        }
    }

    pub fn apply_to(&self, status: &mut SystemStatus) {
        if let Some(text) = &self.status_text {
            status.status_text = text.clone();
        }
        if let Some(count) = self.aggregator_count {
            status.aggregator_count = count;
        }
        if let Some(count) = self.rank_count {
            status.rank_count = count;
        }
        if let Some(ts) = self.timestep {
            status.timestep = ts;
        }
        if let Some(cpu) = self.cpu_usage {
            status.cpu_usage = cpu;
        }
        if let Some(conn) = &self.connection_status {
            status.connection_status = conn.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_range_is_order_independent() {
        let reps = [(4, 8), (0, 2), (10, 16), (3, 5)];

        let mut forward = Aggregator::new("0");
        for (i, (b, e)) in reps.iter().enumerate() {
            forward.add_rep(RepRange { rep_id: i as i64, rbeg: *b, rend: *e });
        }
        let mut backward = Aggregator::new("0");
        for (i, (b, e)) in reps.iter().enumerate().rev() {
            backward.add_rep(RepRange { rep_id: i as i64, rbeg: *b, rend: *e });
        }

        assert_eq!(forward.rank_range, RankRange { lo: 0, hi: 16 });
        assert_eq!(forward.rank_range, backward.rank_range);
        assert_eq!(forward.reps.len(), 4);
    }

    #[test]
    fn test_rank_range_starts_empty() {
        let agg = Aggregator::new("7");
        assert!(agg.rank_range.is_empty());
        assert_eq!(agg.rank_range.to_string(), "[-]");
    }

    #[test]
    fn test_severity_parsing() {
        assert_eq!(LogLevel::from_severity("warn"), LogLevel::Warning);
        assert_eq!(LogLevel::from_severity("Warning"), LogLevel::Warning);
        assert_eq!(LogLevel::from_severity("ERROR"), LogLevel::Error);
        assert_eq!(LogLevel::from_severity("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::from_severity("fatal"), LogLevel::Info);
        assert_eq!(LogLevel::from_severity(""), LogLevel::Info);
    }

    #[test]
    fn test_partial_status_update_keeps_other_fields() {
        let mut status = SystemStatus::default();
        StatusUpdate {
            aggregator_count: Some(2),
            rank_count: Some(128),
            ..StatusUpdate::default()
        }
        .apply_to(&mut status);
        StatusUpdate::connection("Connected").apply_to(&mut status);

        assert_eq!(status.aggregator_count, 2);
        assert_eq!(status.rank_count, 128);
        assert_eq!(status.status_text, "Unclear");
        assert_eq!(status.connection_status, "Connected");
    }
}
