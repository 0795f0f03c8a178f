//! Live-timing payload parser
//!
//! The upstream endpoint returns a loosely-typed table:
//! `{ headinfo: { number, len }, results: [[...], ...] }` where each result
//! row carries positional fields. All positional access is confined to
//! [`decode_row`]; everything downstream works with named fields.
//!
//! Parsing policy: a malformed header fails the whole tick; a malformed row
//! is dropped and its siblings are still processed.

use crate::models::LapEntry;
use chrono::{DateTime, Utc};
use kartwatch_common::{Error, Result};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct RawScreen {
    headinfo: RawHeadInfo,
    results: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct RawHeadInfo {
    number: String,
    len: String,
}

/// One result row with named fields, decoded from its positional form.
#[derive(Debug)]
struct RawRow {
    position: String,
    kart: String,
    lap: String,
    time: Option<String>,
    gap: Option<String>,
}

/// One parsed tick: header info plus the laps that survived row-level
/// validation.
#[derive(Debug)]
pub struct ParsedBatch {
    pub session: i32,
    pub total_length: String,
    pub entries: Vec<LapEntry>,
}

/// Parse a raw live-timing payload into lap entries.
///
/// `recorded_at` is the tick's wall-clock time; `max_lap_seconds` is the hard
/// plausibility bound above which a row is treated as sensor noise and
/// dropped.
pub fn parse_payload(
    raw: &[u8],
    recorded_at: DateTime<Utc>,
    max_lap_seconds: f64,
) -> Result<ParsedBatch> {
    let screen: RawScreen = serde_json::from_slice(raw)
        .map_err(|e| Error::Parse(format!("Malformed live-timing payload: {}", e)))?;

    let session: i32 = screen
        .headinfo
        .number
        .trim()
        .parse()
        .map_err(|_| Error::Parse(format!("Unparseable session number: {:?}", screen.headinfo.number)))?;

    let mut entries = Vec::with_capacity(screen.results.len());
    for (index, row) in screen.results.iter().enumerate() {
        let Some(row) = decode_row(row) else {
            tracing::warn!(row = index, "Dropping result row with too few fields");
            continue;
        };

        let Some(time) = row.time.as_deref().filter(|t| !t.is_empty()) else {
            tracing::debug!(row = index, "Dropping result row without a lap time");
            continue;
        };

        let time = match parse_time(time) {
            Some(t) => t,
            None => {
                tracing::warn!(row = index, time = %time, "Dropping result row with unparseable lap time");
                continue;
            }
        };

        if time < 0.0 || time >= max_lap_seconds {
            tracing::warn!(row = index, time, "Dropping result row with implausible lap time");
            continue;
        }

        let lap: i32 = match row.lap.trim().parse() {
            Ok(lap) => lap,
            Err(_) => {
                tracing::warn!(row = index, lap = %row.lap, "Dropping result row with unparseable lap number");
                continue;
            }
        };

        let position: i32 = match row.position.trim().parse() {
            Ok(position) => position,
            Err(_) => {
                tracing::warn!(row = index, position = %row.position, "Dropping result row with unparseable position");
                continue;
            }
        };

        entries.push(LapEntry {
            recorded_at,
            session,
            total_length: screen.headinfo.len.clone(),
            kart: row.kart,
            lap,
            time,
            position,
            gap: row.gap,
        });
    }

    Ok(ParsedBatch {
        session,
        total_length: screen.headinfo.len,
        entries,
    })
}

/// Decode one positional result row. Field positions are fixed by the
/// upstream screen layout: 0 = position, 2 = kart, 3 = lap, 6 = time,
/// 7 = gap.
fn decode_row(row: &[Value]) -> Option<RawRow> {
    if row.len() < 7 {
        return None;
    }

    Some(RawRow {
        position: value_as_string(row.first())?,
        kart: value_as_string(row.get(2))?,
        lap: value_as_string(row.get(3))?,
        time: value_as_optional_string(row.get(6)),
        gap: value_as_optional_string(row.get(7)),
    })
}

fn value_as_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_as_optional_string(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Normalize a lap time to decimal seconds. Accepts `m:ss.fff` or plain
/// seconds notation.
pub fn parse_time(time: &str) -> Option<f64> {
    match time.split_once(':') {
        Some((minutes, seconds)) => {
            let minutes: f64 = minutes.trim().parse().ok()?;
            let seconds: f64 = seconds.trim().parse().ok()?;
            Some(minutes * 60.0 + seconds)
        }
        None => time.trim().parse().ok(),
    }
}
