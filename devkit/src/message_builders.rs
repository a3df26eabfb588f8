/*!
Builders for controller wire payloads and replay files
*/

use anyhow::Result;
use std::io::Write;
use tempfile::NamedTempFile;

/// One constructor per message tag understood by the console.
pub struct ProtocolMessageBuilder;

impl ProtocolMessageBuilder {
    pub fn clear() -> String {
        "CLEAR".to_string()
    }

    pub fn config(num_aggs: u32, num_ranks: u32) -> String {
        format!("CONFIG|{}|{}", num_aggs, num_ranks)
    }

    pub fn status(text: &str) -> String {
        format!("STATUS|{}", text)
    }

    pub fn reps_add(agg_id: i64, rep_id: i64, rank_begin: i64, rank_end: i64) -> String {
        format!("REPS_ADD|{}|{}|{}|{}", agg_id, rep_id, rank_begin, rank_end)
    }

    pub fn schema_add(name: &str) -> String {
        format!("SCHEMA_ADD|{}", name)
    }

    /// `active = None` leaves the flag off the wire (controller default).
    pub fn probe_add(schema: &str, probe_id: &str, probe_name: &str, active: Option<bool>) -> String {
        match active {
            Some(active) => format!("PROBE_ADD|{}|{}|{}|{}", schema, probe_id, probe_name, active),
            None => format!("PROBE_ADD|{}|{}|{}", schema, probe_id, probe_name),
        }
    }

    pub fn tsadv(timestamp: i64, from_ts: i64, to_ts: i64) -> String {
        format!("TSADV|{}|{}|{}", timestamp, from_ts, to_ts)
    }

    pub fn log(timestamp: i64, severity: &str, message: &str) -> String {
        format!("LOG|{}|{}|{}", timestamp, severity, message)
    }

    pub fn heartbeat() -> String {
        "HEARTBEAT".to_string()
    }
}

/// A recorded session, written out as a replay file.
#[derive(Debug, Clone, Default)]
pub struct ReplayScript {
    lines: Vec<String>,
}

impl ReplayScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(mut self, payload: impl Into<String>) -> Self {
        self.lines.push(payload.into());
        self
    }

    /// Blank separator, skipped by the replay loader.
    pub fn blank(mut self) -> Self {
        self.lines.push(String::new());
        self
    }

    /// The session from the manual-step walkthrough: config, one schema with
    /// an active probe, one timestep.
    pub fn walkthrough() -> Self {
        Self::new()
            .line(ProtocolMessageBuilder::config(2, 128))
            .line(ProtocolMessageBuilder::schema_add("flux"))
            .line(ProtocolMessageBuilder::probe_add("flux", "p1", "Flux Probe", Some(true)))
            .line(ProtocolMessageBuilder::tsadv(1000, 0, 1))
    }

    pub fn write(&self) -> Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("orcadash-replay-")
            .suffix(".log")
            .tempfile()?;
        for line in &self.lines {
            writeln!(file, "{}", line)?;
        }
        file.flush()?;
        log::debug!("📝 Replay script with {} lines at {}", self.lines.len(), file.path().display());
        Ok(file)
    }
}
