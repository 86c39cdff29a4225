//! Speaker/segment timelines: parsing, ordering and validation.
//!
//! Accepts the serialized annotation layout written by diarization tools
//! (`{"content": [{"segment": {"start", "end"}, "track", "label"}]}`) as
//! well as bare arrays of flat track objects (`{"start", "end", "label"}`).

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::{Map, Value, json};

use crate::model::Track;

const CONTENT_KEY: &str = "content";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackPolicy {
    pub allow_overlap: bool,
    pub timestamp_epsilon_sec: f64,
}

impl Default for TrackPolicy {
    fn default() -> Self {
        Self {
            allow_overlap: true,
            timestamp_epsilon_sec: 1e-6,
        }
    }
}

impl TrackPolicy {
    /// Segments of a single transcript must not overlap beyond epsilon.
    #[must_use]
    pub fn sequential() -> Self {
        Self {
            allow_overlap: false,
            ..Self::default()
        }
    }
}

#[must_use]
pub fn is_annotation(map: &Map<String, Value>) -> bool {
    map.get(CONTENT_KEY).is_some_and(Value::is_array)
}

/// Parse either layout into time-ordered tracks.
pub fn parse_tracks(value: &Value) -> Result<Vec<Track>, String> {
    let records = match value {
        Value::Object(map) if is_annotation(map) => match map.get(CONTENT_KEY) {
            Some(Value::Array(records)) => records.as_slice(),
            _ => &[],
        },
        Value::Array(records) => records.as_slice(),
        _ => return Err("expected an annotation object or an array of tracks".to_owned()),
    };
    tracks_from_records(records)
}

fn tracks_from_records(records: &[Value]) -> Result<Vec<Track>, String> {
    let mut parsed = Vec::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        let Value::Object(fields) = record else {
            return Err(format!("track #{index} is not an object"));
        };
        let start = boundary(fields, "start").ok_or_else(|| format!("track #{index} has no numeric start"))?;
        let end = boundary(fields, "end").ok_or_else(|| format!("track #{index} has no numeric end"))?;
        let label = fields
            .get("label")
            .and_then(identifier)
            .ok_or_else(|| format!("track #{index} has no label"))?;
        let track_id = fields.get("track").and_then(identifier);
        parsed.push((start, end, track_id, label));
    }

    parsed.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));

    let mut next_per_label: HashMap<String, usize> = HashMap::new();
    Ok(parsed
        .into_iter()
        .map(|(start, end, track_id, label)| {
            let track_id = track_id.unwrap_or_else(|| {
                let slot = next_per_label.entry(label.clone()).or_insert(0);
                let name = track_name(*slot);
                *slot += 1;
                name
            });
            Track {
                start,
                end,
                track_id,
                label,
            }
        })
        .collect())
}

/// `segment.start` in the annotation layout, plain `start` otherwise.
fn boundary(fields: &Map<String, Value>, key: &str) -> Option<f64> {
    fields
        .get("segment")
        .and_then(|segment| segment.get(key))
        .or_else(|| fields.get(key))
        .and_then(Value::as_f64)
}

fn identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Spreadsheet-style names: `A`..`Z`, `AA`, `AB`, ...
#[must_use]
pub fn track_name(index: usize) -> String {
    let mut remaining = index + 1;
    let mut letters = Vec::new();
    while remaining > 0 {
        let digit = (remaining - 1) % 26;
        letters.push(char::from(b'A' + digit as u8));
        remaining = (remaining - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Natural timeline order: start, then end.
#[must_use]
pub fn natural_order(a: &Track, b: &Track) -> Ordering {
    a.start.total_cmp(&b.start).then(a.end.total_cmp(&b.end))
}

/// Stable sort in natural order; ties keep insertion order.
pub fn sort_tracks(tracks: &mut [Track]) {
    tracks.sort_by(natural_order);
}

pub fn validate_tracks(tracks: &[Track], policy: TrackPolicy) -> Result<(), String> {
    let eps = policy.timestamp_epsilon_sec.max(0.0);
    let mut previous_end: Option<f64> = None;

    for (index, track) in tracks.iter().enumerate() {
        if !track.start.is_finite() || !track.end.is_finite() {
            return Err(format!("track #{index} has a non-finite boundary"));
        }
        if track.end + eps < track.start {
            return Err(format!(
                "track #{index} ends before it starts ({} < {})",
                track.end, track.start
            ));
        }
        if track.label.trim().is_empty() {
            return Err(format!("track #{index} has an empty label"));
        }
        if !policy.allow_overlap
            && let Some(prev_end) = previous_end
            && track.start + eps < prev_end
        {
            return Err(format!(
                "track #{index} overlaps its predecessor ({} < {prev_end})",
                track.start
            ));
        }
        previous_end = Some(track.end);
    }

    Ok(())
}

/// Serialize tracks back into the annotation layout.
#[must_use]
pub fn annotation_to_json(uri: &str, tracks: &[Track]) -> Value {
    let content: Vec<Value> = tracks
        .iter()
        .map(|track| {
            json!({
                "segment": {"start": track.start, "end": track.end},
                "track": track.track_id,
                "label": track.label,
            })
        })
        .collect();
    json!({
        "pyannote": "Annotation",
        "content": content,
        "uri": uri,
        "modality": "speaker",
    })
}
