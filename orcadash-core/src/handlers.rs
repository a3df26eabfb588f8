//! Wire message handlers.
//!
//! Each handler receives the fields after the tag and returns the single
//! [`StoreUpdate`] describing that message's unit of work. Handlers are pure:
//! they never touch the store, so the coordinator can queue their output for
//! the UI thread.

use crate::models::{LogLevel, Probe, RepRange, StatusUpdate};
use crate::store::StoreUpdate;
use std::num::ParseIntError;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("missing field '{name}' at position {position}")]
    MissingField { name: &'static str, position: usize },

    #[error("field '{name}' is not an integer: {value:?}")]
    InvalidInteger {
        name: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
}

type HandlerResult = Result<StoreUpdate, HandlerError>;

fn field<'a>(fields: &[&'a str], position: usize, name: &'static str) -> Result<&'a str, HandlerError> {
    match fields.get(position) {
        Some(value) if !value.trim().is_empty() => Ok(*value),
        _ => Err(HandlerError::MissingField { name, position }),
    }
}

fn int_field<T>(fields: &[&str], position: usize, name: &'static str) -> Result<T, HandlerError>
where
    T: FromStr<Err = ParseIntError>,
{
    let raw = field(fields, position, name)?;
    raw.trim().parse().map_err(|source| HandlerError::InvalidInteger {
        name,
        value: raw.to_string(),
        source,
    })
}

/// Everything from `position` on, re-joined with the delimiter so free text
/// may itself contain `|`.
fn rest(fields: &[&str], position: usize, name: &'static str) -> Result<String, HandlerError> {
    field(fields, position, name)?;
    Ok(fields[position..].join("|"))
}

pub fn clear(_fields: &[&str]) -> HandlerResult {
    Ok(StoreUpdate::Clear)
}

/// `CONFIG|num_aggs|num_ranks`
pub fn config(fields: &[&str]) -> HandlerResult {
    let aggregator_count: u32 = int_field(fields, 0, "num_aggs")?;
    let rank_count: u32 = int_field(fields, 1, "num_ranks")?;
    Ok(StoreUpdate::Batch(vec![
        StoreUpdate::ClearLogs,
        StoreUpdate::UpdateStatus(StatusUpdate {
            aggregator_count: Some(aggregator_count),
            rank_count: Some(rank_count),
            ..StatusUpdate::default()
        }),
    ]))
}

/// `STATUS|text`
pub fn status(fields: &[&str]) -> HandlerResult {
    Ok(StoreUpdate::UpdateStatus(StatusUpdate {
        status_text: Some(rest(fields, 0, "status_text")?),
        ..StatusUpdate::default()
    }))
}

/// `REPS_ADD|agg_id|rep_id|rank_begin|rank_end`
pub fn reps_add(fields: &[&str]) -> HandlerResult {
    let agg_id: i64 = int_field(fields, 0, "agg_id")?;
    let rep_id: i64 = int_field(fields, 1, "rep_id")?;
    let rbeg: i64 = int_field(fields, 2, "rank_begin")?;
    let rend: i64 = int_field(fields, 3, "rank_end")?;

    Ok(StoreUpdate::Batch(vec![
        StoreUpdate::log(
            LogLevel::Info,
            format!("AGG{agg_id}: REP {rep_id} with range [{rbeg}, {rend})"),
        ),
        StoreUpdate::AddAggRep {
            agg_id: agg_id.to_string(),
            rep: RepRange { rep_id, rbeg, rend },
        },
    ]))
}

/// `SCHEMA_ADD|name`
pub fn schema_add(fields: &[&str]) -> HandlerResult {
    Ok(StoreUpdate::AddSchema {
        name: field(fields, 0, "schema_name")?.to_string(),
    })
}

/// `PROBE_ADD|schema|probe_id|probe_name[|active]`
pub fn probe_add(fields: &[&str]) -> HandlerResult {
    let schema = field(fields, 0, "schema_name")?;
    let id = field(fields, 1, "probe_id")?;
    let name = field(fields, 2, "probe_name")?;
    let active = fields
        .get(3)
        .map_or(true, |flag| flag.trim().eq_ignore_ascii_case("true"));

    Ok(StoreUpdate::AddProbe(Probe {
        id: id.to_string(),
        schema: schema.to_string(),
        name: name.to_string(),
        active,
    }))
}

/// `TSADV|timestamp|from_ts|to_ts`
pub fn tsadv(fields: &[&str]) -> HandlerResult {
    let timestamp: i64 = int_field(fields, 0, "timestamp")?;
    let from_ts: i64 = int_field(fields, 1, "from_ts")?;
    let to_ts: i64 = int_field(fields, 2, "to_ts")?;

    Ok(StoreUpdate::Batch(vec![
        StoreUpdate::AdvanceTimestep { timestamp, from_ts, to_ts },
        StoreUpdate::UpdateStatus(StatusUpdate {
            timestep: Some(to_ts),
            ..StatusUpdate::default()
        }),
        StoreUpdate::log(LogLevel::Info, format!("Timestep advanced: {from_ts}→{to_ts}")),
    ]))
}

/// `LOG|timestamp|severity|message`
///
/// The controller's timestamp must be present but the entry is stamped with
/// the local receipt time.
pub fn log(fields: &[&str]) -> HandlerResult {
    field(fields, 0, "timestamp")?;
    let level = LogLevel::from_severity(field(fields, 1, "severity")?);
    let message = rest(fields, 2, "message")?;
    Ok(StoreUpdate::AddLog { level, message })
}

pub fn heartbeat(_fields: &[&str]) -> HandlerResult {
    Ok(StoreUpdate::Batch(Vec::new()))
}
