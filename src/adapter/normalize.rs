//! Per-adapter output normalization.
//!
//! Each model tool prints its own JSON layout. The functions here accept
//! the raw `serde_json::Value` and produce a `LiveResult` whose fields line
//! up with the reference fixtures for that adapter kind.

use serde_json::{Map, Value, json};

use crate::annotation::{self, TrackPolicy};
use crate::model::{FieldValue, LiveResult, Scalar, StructuredResult};

/// Columns of the face feature table, after `frame` and `time`.
pub const FACE_FEATURES: [&str; 5] = ["box", "prob", "label", "landmarks", "aus"];

// ---------------------------------------------------------------------------
// Voice
// ---------------------------------------------------------------------------

/// Voice features: an object of per-frame columns keyed by `time`.
pub fn normalize_voice(raw: &Value) -> Result<LiveResult, String> {
    let map = validate_is_object(raw)?;
    let result = columns_from_map(map)?;
    let Some(time) = result.get("time") else {
        return Err("missing `time` column".to_owned());
    };
    if time.as_f64_vec().is_none() || time.leading_len().is_none() {
        return Err("`time` must be a numeric sequence".to_owned());
    }
    validate_columns(&result, "time")?;
    Ok(result)
}

// ---------------------------------------------------------------------------
// Speaker
// ---------------------------------------------------------------------------

/// Speaker turns: annotation JSON or a bare array of track objects.
pub fn normalize_speaker(raw: &Value) -> Result<LiveResult, String> {
    let mut tracks = annotation::parse_tracks(raw)?;
    annotation::sort_tracks(&mut tracks);
    annotation::validate_tracks(&tracks, TrackPolicy::default())?;
    Ok(StructuredResult::from_tracks(tracks))
}

// ---------------------------------------------------------------------------
// Transcription
// ---------------------------------------------------------------------------

/// Transcript text (`transcription`, or `text`), optional timed `segments`
/// and optional detected `language`.
///
/// Segments without text (silence, music) carry nothing to compare and are
/// dropped before the timeline is validated.
pub fn normalize_transcription(raw: &Value) -> Result<LiveResult, String> {
    let map = validate_is_object(raw)?;

    let text = map
        .get("transcription")
        .or_else(|| map.get("text"))
        .and_then(Value::as_str)
        .ok_or_else(|| "missing `transcription` text".to_owned())?;
    let mut result =
        StructuredResult::new().with("transcription", FieldValue::Scalar(Scalar::from(text.trim())));

    if let Some(segments) = map.get("segments") {
        let Value::Array(items) = segments else {
            return Err("`segments` must be an array".to_owned());
        };
        let records: Vec<Value> = items.iter().filter_map(segment_as_track_record).collect();
        if records.len() < items.len() {
            tracing::debug!(dropped = items.len() - records.len(), "dropped segments without text");
        }
        let tracks = annotation::parse_tracks(&Value::Array(records))
            .map_err(|reason| format!("segments: {reason}"))?;
        annotation::validate_tracks(&tracks, TrackPolicy::sequential())
            .map_err(|reason| format!("segments: {reason}"))?;
        result.insert("segments", FieldValue::Tracks(tracks));
    }

    if let Some(language) = map.get("language").and_then(Value::as_str) {
        result.insert("language", FieldValue::Scalar(Scalar::from(language)));
    }

    Ok(result)
}

/// `{"start", "end", "text", "speaker"?}` → track record labelled by text;
/// `None` when the text is missing or blank.
fn segment_as_track_record(segment: &Value) -> Option<Value> {
    let text = segment
        .get("text")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())?;
    let mut record = json!({
        "start": segment.get("start").cloned().unwrap_or(Value::Null),
        "end": segment.get("end").cloned().unwrap_or(Value::Null),
        "label": text,
    });
    if let Some(speaker) = segment.get("speaker").filter(|speaker| !speaker.is_null()) {
        record["track"] = speaker.clone();
    }
    Some(record)
}

// ---------------------------------------------------------------------------
// Face
// ---------------------------------------------------------------------------

/// Face features: either a column table or per-frame detection records
/// flattened into one row per detected face.
pub fn normalize_face(raw: &Value) -> Result<LiveResult, String> {
    let result = match raw {
        Value::Object(map) => columns_from_map(map)?,
        Value::Array(frames) => flatten_face_frames(frames)?,
        _ => return Err("expected a feature table or an array of frames".to_owned()),
    };
    for required in ["frame", "time"] {
        if !result.contains(required) {
            return Err(format!("missing `{required}` column"));
        }
    }
    validate_columns(&result, "frame")?;
    Ok(result)
}

fn flatten_face_frames(frames: &[Value]) -> Result<LiveResult, String> {
    let mut frame_column = Vec::new();
    let mut time_column = Vec::new();
    let mut feature_columns: Vec<Vec<Value>> = vec![Vec::new(); FACE_FEATURES.len()];

    for (index, record) in frames.iter().enumerate() {
        let frame = record
            .get("frame")
            .filter(|value| value.is_number())
            .ok_or_else(|| format!("frame record #{index} has no numeric `frame`"))?;
        let time = record
            .get("time")
            .filter(|value| value.is_number())
            .ok_or_else(|| format!("frame record #{index} has no numeric `time`"))?;
        let faces = match record.get("faces") {
            Some(Value::Array(faces)) => faces.as_slice(),
            None | Some(Value::Null) => &[],
            Some(_) => return Err(format!("frame record #{index}: `faces` must be an array")),
        };

        for face in faces {
            frame_column.push(frame.clone());
            time_column.push(time.clone());
            for (column, feature) in feature_columns.iter_mut().zip(FACE_FEATURES) {
                if let Some(value) = face.get(feature) {
                    column.push(value.clone());
                }
            }
        }
    }

    let rows = frame_column.len();
    let mut result = StructuredResult::new()
        .with("frame", column_value("frame", frame_column)?)
        .with("time", column_value("time", time_column)?);
    for (column, feature) in feature_columns.into_iter().zip(FACE_FEATURES) {
        if column.is_empty() && rows > 0 {
            continue;
        }
        if column.len() != rows {
            return Err(format!(
                "`{feature}` present on {} of {rows} detected face(s)",
                column.len()
            ));
        }
        result.insert(feature, column_value(feature, column)?);
    }
    Ok(result)
}

fn column_value(name: &str, column: Vec<Value>) -> Result<FieldValue, String> {
    FieldValue::from_json(&Value::Array(column)).map_err(|reason| format!("column `{name}`: {reason}"))
}

// ---------------------------------------------------------------------------
// Shared validation
// ---------------------------------------------------------------------------

fn validate_is_object(raw: &Value) -> Result<&Map<String, Value>, String> {
    raw.as_object()
        .ok_or_else(|| format!("expected a JSON object, got {}", json_type_name(raw)))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn columns_from_map(map: &Map<String, Value>) -> Result<LiveResult, String> {
    StructuredResult::from_json(&Value::Object(map.clone()))
}

/// Every column must have the key column's leading length.
fn validate_columns(result: &LiveResult, key: &str) -> Result<(), String> {
    let expected = result.get(key).and_then(FieldValue::leading_len);
    for (name, value) in result.iter() {
        let actual = value.leading_len();
        if actual.is_none() || actual != expected {
            return Err(format!(
                "column `{name}` has {} row(s) but `{key}` has {}",
                actual.map_or_else(|| "no".to_owned(), |rows| rows.to_string()),
                expected.map_or_else(|| "no".to_owned(), |rows| rows.to_string()),
            ));
        }
    }
    Ok(())
}
