use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::annotation;

// ---------------------------------------------------------------------------
// Media inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Audio,
    Video,
}

impl Modality {
    const AUDIO_EXTENSIONS: [&'static str; 6] = ["wav", "mp3", "flac", "ogg", "m4a", "aac"];
    const VIDEO_EXTENSIONS: [&'static str; 5] = ["mp4", "mov", "avi", "mkv", "webm"];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }

    /// Classify a media file by extension (case-insensitive).
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if Self::AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Audio)
        } else if Self::VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Video)
        } else {
            None
        }
    }
}

/// One sample input file. Immutable once resolved by the fixture store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFixture {
    pub name: String,
    pub path: PathBuf,
    pub modality: Modality,
}

// ---------------------------------------------------------------------------
// Scalar
// ---------------------------------------------------------------------------

/// Leaf value of a pipeline output. Integers and floats stay distinct so a
/// parsed fixture never loses its numeric representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    /// Returns `None` for arrays and objects.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Null),
            Value::Bool(flag) => Some(Self::Bool(*flag)),
            Value::Number(number) => Some(match number.as_i64() {
                Some(integer) => Self::Integer(integer),
                None => Self::Float(number.as_f64().unwrap_or(f64::NAN)),
            }),
            Value::String(text) => Some(Self::Text(text.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Non-finite floats have no JSON form and serialize as `null`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(flag) => Value::Bool(*flag),
            Self::Integer(integer) => Value::from(*integer),
            Self::Float(float) => serde_json::Number::from_f64(*float).map_or(Value::Null, Value::Number),
            Self::Text(text) => Value::String(text.clone()),
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(integer) => Some(*integer as f64),
            Self::Float(float) => Some(*float),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer(_) | Self::Float(_))
    }

    /// Categorical equality. Numbers compare by value regardless of
    /// representation (`1 == 1.0`), and NaN equals NaN so that missing
    /// measurements in a reference do not fail against themselves.
    #[must_use]
    pub fn exact_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => a == b,
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a == b || (a.is_nan() && b.is_nan()),
                _ => self == other,
            },
        }
    }

    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(flag) => write!(f, "{flag}"),
            Self::Integer(integer) => write!(f, "{integer}"),
            Self::Float(float) => write!(f, "{float:?}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

// ---------------------------------------------------------------------------
// NdArray
// ---------------------------------------------------------------------------

/// Rectangular array of rank >= 2, stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    shape: Vec<usize>,
    items: Vec<Scalar>,
}

impl NdArray {
    /// Rank 0 and 1 data is a `Scalar` or `Sequence`, never an `NdArray`.
    pub fn new(shape: Vec<usize>, items: Vec<Scalar>) -> Result<Self, String> {
        check_rank(&shape)?;
        let expected: usize = shape.iter().product();
        if expected != items.len() {
            return Err(format!(
                "shape {shape:?} needs {expected} item(s), got {}",
                items.len()
            ));
        }
        Ok(Self { shape, items })
    }

    /// Build from nested JSON arrays. Ragged nesting is rejected, the same
    /// way a numeric array library refuses to give it a shape.
    pub fn from_nested(value: &Value) -> Result<Self, String> {
        let shape = infer_shape(value);
        check_rank(&shape)?;
        let mut items = Vec::with_capacity(shape.iter().product());
        flatten_checked(value, &shape, &mut items)?;
        Ok(Self { shape, items })
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[must_use]
    pub fn items(&self) -> &[Scalar] {
        &self.items
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        nest(&self.shape, &self.items)
    }
}

fn check_rank(shape: &[usize]) -> Result<(), String> {
    if shape.len() < 2 {
        return Err(format!(
            "array of shape {shape:?} has rank {}; arrays need rank >= 2",
            shape.len()
        ));
    }
    Ok(())
}

fn infer_shape(value: &Value) -> Vec<usize> {
    let mut shape = Vec::new();
    let mut cursor = value;
    while let Value::Array(children) = cursor {
        shape.push(children.len());
        match children.first() {
            Some(first) => cursor = first,
            None => break,
        }
    }
    shape
}

fn flatten_checked(value: &Value, shape: &[usize], items: &mut Vec<Scalar>) -> Result<(), String> {
    match (shape.split_first(), value) {
        (None, Value::Array(_)) => {
            Err("ragged array: nesting depth differs between elements".to_owned())
        }
        (None, leaf) => {
            let scalar = Scalar::from_json(leaf)
                .ok_or_else(|| "objects are not supported inside arrays".to_owned())?;
            items.push(scalar);
            Ok(())
        }
        (Some((&len, rest)), Value::Array(children)) => {
            if children.len() != len {
                return Err(format!(
                    "ragged array: expected {len} element(s), found {}",
                    children.len()
                ));
            }
            children
                .iter()
                .try_for_each(|child| flatten_checked(child, rest, items))
        }
        (Some(_), _) => Err("ragged array: expected a nested array".to_owned()),
    }
}

fn nest(shape: &[usize], items: &[Scalar]) -> Value {
    match shape.split_first() {
        None => items.first().map_or(Value::Null, Scalar::to_json),
        Some((&len, rest)) => {
            let stride: usize = rest.iter().product();
            Value::Array(
                (0..len)
                    .map(|row| nest(rest, &items[row * stride..(row + 1) * stride]))
                    .collect(),
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Tracks
// ---------------------------------------------------------------------------

/// One timeline annotation: a labelled span on a named track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub start: f64,
    pub end: f64,
    #[serde(rename = "track")]
    pub track_id: String,
    pub label: String,
}

impl Track {
    #[must_use]
    pub fn new(start: f64, end: f64, track_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            start,
            end,
            track_id: track_id.into(),
            label: label.into(),
        }
    }

    #[must_use]
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    #[must_use]
    pub fn contains(&self, time_sec: f64) -> bool {
        self.start <= time_sec && time_sec <= self.end
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.3}s, {:.3}s] {} {}",
            self.start, self.end, self.track_id, self.label
        )
    }
}

// ---------------------------------------------------------------------------
// FieldValue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Scalar,
    Sequence,
    Array,
    Tracks,
}

impl FieldKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scalar => "scalar",
            Self::Sequence => "sequence",
            Self::Array => "array",
            Self::Tracks => "tracks",
        }
    }
}

/// The value of one named output field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Scalar(Scalar),
    Sequence(Vec<Scalar>),
    Array(NdArray),
    Tracks(Vec<Track>),
}

impl FieldValue {
    pub fn from_json(value: &Value) -> Result<Self, String> {
        match value {
            Value::Array(items) => Self::from_json_array(value, items),
            Value::Object(map) if annotation::is_annotation(map) => {
                annotation::parse_tracks(value).map(Self::Tracks)
            }
            Value::Object(_) => {
                Err("objects are only supported as serialized annotations".to_owned())
            }
            leaf => Scalar::from_json(leaf)
                .map(Self::Scalar)
                .ok_or_else(|| "unsupported JSON value".to_owned()),
        }
    }

    fn from_json_array(value: &Value, items: &[Value]) -> Result<Self, String> {
        if items.iter().all(|item| !item.is_array() && !item.is_object()) {
            return Ok(Self::Sequence(
                items.iter().filter_map(Scalar::from_json).collect(),
            ));
        }
        if items.iter().all(Value::is_array) {
            return NdArray::from_nested(value).map(Self::Array);
        }
        if items.iter().all(Value::is_object) {
            return annotation::parse_tracks(value).map(Self::Tracks);
        }
        Err("array mixes scalars, arrays and objects".to_owned())
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Scalar(scalar) => scalar.to_json(),
            Self::Sequence(items) => Value::Array(items.iter().map(Scalar::to_json).collect()),
            Self::Array(array) => array.to_json(),
            Self::Tracks(tracks) => Value::Array(
                tracks
                    .iter()
                    .map(|track| {
                        serde_json::json!({
                            "start": track.start,
                            "end": track.end,
                            "track": track.track_id,
                            "label": track.label,
                        })
                    })
                    .collect(),
            ),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> FieldKind {
        match self {
            Self::Scalar(_) => FieldKind::Scalar,
            Self::Sequence(_) => FieldKind::Sequence,
            Self::Array(_) => FieldKind::Array,
            Self::Tracks(_) => FieldKind::Tracks,
        }
    }

    /// Rank and per-axis size. Scalars are rank 0; sequences and timelines
    /// are rank 1.
    #[must_use]
    pub fn shape(&self) -> Vec<usize> {
        match self {
            Self::Scalar(_) => Vec::new(),
            Self::Sequence(items) => vec![items.len()],
            Self::Array(array) => array.shape().to_vec(),
            Self::Tracks(tracks) => vec![tracks.len()],
        }
    }

    /// Length along the first axis, `None` for scalars.
    #[must_use]
    pub fn leading_len(&self) -> Option<usize> {
        self.shape().first().copied()
    }

    /// Flat view of the scalar leaves; empty for timelines.
    #[must_use]
    pub fn scalars(&self) -> &[Scalar] {
        match self {
            Self::Scalar(scalar) => std::slice::from_ref(scalar),
            Self::Sequence(items) => items,
            Self::Array(array) => array.items(),
            Self::Tracks(_) => &[],
        }
    }

    #[must_use]
    pub fn as_tracks(&self) -> Option<&[Track]> {
        match self {
            Self::Tracks(tracks) => Some(tracks),
            _ => None,
        }
    }

    /// Numeric view of a rank-0 or rank-1 value; `None` if any element is
    /// not a number.
    #[must_use]
    pub fn as_f64_vec(&self) -> Option<Vec<f64>> {
        match self {
            Self::Scalar(_) | Self::Sequence(_) => {
                self.scalars().iter().map(Scalar::as_f64).collect()
            }
            Self::Array(_) | Self::Tracks(_) => None,
        }
    }

    /// Short rendering for diagnostics; long values are elided.
    #[must_use]
    pub fn summary(&self) -> String {
        const MAX_CHARS: usize = 120;
        let rendered = self.to_json().to_string();
        if rendered.chars().count() <= MAX_CHARS {
            rendered
        } else {
            let head: String = rendered.chars().take(MAX_CHARS).collect();
            format!("{head}... ({} {:?})", self.kind().as_str(), self.shape())
        }
    }
}

impl From<Scalar> for FieldValue {
    fn from(value: Scalar) -> Self {
        Self::Scalar(value)
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Self::from_json(&raw).map_err(D::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// StructuredResult
// ---------------------------------------------------------------------------

/// Field name → value mapping produced by an adapter or parsed from a
/// reference fixture. Iteration order is by field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredResult {
    fields: BTreeMap<String, FieldValue>,
}

/// A result freshly produced by a pipeline adapter.
pub type LiveResult = StructuredResult;

impl StructuredResult {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeline result with the `tracks` field plus the `labels` sequence
    /// in time order.
    #[must_use]
    pub fn from_tracks(tracks: Vec<Track>) -> Self {
        let labels = tracks
            .iter()
            .map(|track| Scalar::Text(track.label.clone()))
            .collect();
        Self::new()
            .with("labels", FieldValue::Sequence(labels))
            .with("tracks", FieldValue::Tracks(tracks))
    }

    pub fn from_json(value: &Value) -> Result<Self, String> {
        let Value::Object(map) = value else {
            return Err("result document must be a JSON object".to_owned());
        };
        if annotation::is_annotation(map) {
            return annotation::parse_tracks(value).map(Self::from_tracks);
        }
        Self::from_json_map(map)
    }

    fn from_json_map(map: &Map<String, Value>) -> Result<Self, String> {
        let mut result = Self::new();
        for (name, raw) in map {
            let value = FieldValue::from_json(raw).map_err(|reason| format!("field `{name}`: {reason}"))?;
            result.insert(name.clone(), value);
        }
        Ok(result)
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
        )
    }

    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) -> Option<FieldValue> {
        self.fields.insert(name.into(), value)
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.insert(name, value);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Move every field of `other` into `self`, overwriting on collision.
    pub fn extend(&mut self, other: Self) {
        self.fields.extend(other.fields);
    }
}

impl Serialize for StructuredResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StructuredResult {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Self::from_json(&raw).map_err(D::Error::custom)
    }
}

/// A parsed golden output, tied to the fixture file it came from.
#[derive(Debug, Clone)]
pub struct ReferenceResult {
    pub name: String,
    pub path: PathBuf,
    /// SHA-256 of the fixture bytes, recorded in reports.
    pub sha256: String,
    pub result: StructuredResult,
}
