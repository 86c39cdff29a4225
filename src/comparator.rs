use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::annotation;
use crate::error::{GoldenError, GoldenResult};
use crate::model::{FieldValue, Scalar, StructuredResult, Track};

/// Default relative tolerance for approximate numeric comparison.
pub const DEFAULT_RELATIVE_TOLERANCE: f64 = 1e-2;

/// Lower bound on the magnitude that scales relative tolerance.
pub const APPROX_EPSILON: f64 = 1e-12;

/// Canonical absolute drift allowed on track boundaries, in seconds (50ms).
/// A boundary matches within relative tolerance or within this floor.
pub const CANONICAL_BOUNDARY_FLOOR_SEC: f64 = 0.05;

const ABSENT: &str = "<absent>";

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthPolicy {
    /// Every unpaired track is a failing outcome.
    #[default]
    Strict,
    /// Compare the common prefix only; the dropped count is logged.
    Truncate,
}

/// How one field of a live result is judged against its reference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Strategy {
    Exact,
    Shape,
    Approx {
        #[serde(default = "default_relative_tolerance")]
        relative_tolerance: f64,
    },
    OrderedTracks {
        #[serde(default = "default_relative_tolerance")]
        relative_tolerance: f64,
        #[serde(default = "default_boundary_floor")]
        boundary_floor_sec: f64,
        #[serde(default)]
        length_policy: LengthPolicy,
        #[serde(default = "default_true")]
        match_track_id: bool,
    },
}

fn default_relative_tolerance() -> f64 {
    DEFAULT_RELATIVE_TOLERANCE
}

fn default_boundary_floor() -> f64 {
    CANONICAL_BOUNDARY_FLOOR_SEC
}

fn default_true() -> bool {
    true
}

impl Strategy {
    #[must_use]
    pub const fn approx() -> Self {
        Self::Approx {
            relative_tolerance: DEFAULT_RELATIVE_TOLERANCE,
        }
    }

    #[must_use]
    pub const fn ordered_tracks() -> Self {
        Self::OrderedTracks {
            relative_tolerance: DEFAULT_RELATIVE_TOLERANCE,
            boundary_floor_sec: CANONICAL_BOUNDARY_FLOOR_SEC,
            length_policy: LengthPolicy::Strict,
            match_track_id: true,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Shape => "shape",
            Self::Approx { .. } => "approx",
            Self::OrderedTracks { .. } => "ordered_tracks",
        }
    }

    /// Tolerances and floors must be finite and non-negative.
    pub fn validate(&self) -> Result<(), String> {
        let bounds = match *self {
            Self::Exact | Self::Shape => Vec::new(),
            Self::Approx { relative_tolerance } => vec![("relative_tolerance", relative_tolerance)],
            Self::OrderedTracks {
                relative_tolerance,
                boundary_floor_sec,
                ..
            } => vec![
                ("relative_tolerance", relative_tolerance),
                ("boundary_floor_sec", boundary_floor_sec),
            ],
        };
        for (name, value) in bounds {
            if !(value.is_finite() && value >= 0.0) {
                return Err(format!("{} {name} must be a finite number >= 0, got {value}", self.name()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRule {
    pub field: String,
    #[serde(flatten)]
    pub strategy: Strategy,
}

impl ComparisonRule {
    #[must_use]
    pub fn new(field: impl Into<String>, strategy: Strategy) -> Self {
        Self {
            field: field.into(),
            strategy,
        }
    }
}

/// Per-field comparison schema for one scenario.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    rules: BTreeMap<String, Strategy>,
}

impl RuleSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, field: impl Into<String>, strategy: Strategy) -> Self {
        self.insert(ComparisonRule::new(field, strategy));
        self
    }

    pub fn insert(&mut self, rule: ComparisonRule) -> Option<Strategy> {
        self.rules.insert(rule.field, rule.strategy)
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Strategy> {
        self.rules.get(field)
    }

    pub fn rules(&self) -> impl Iterator<Item = ComparisonRule> + '_ {
        self.rules
            .iter()
            .map(|(field, strategy)| ComparisonRule::new(field.clone(), *strategy))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Reference fields with no assigned rule, in field-name order.
    #[must_use]
    pub fn missing_for(&self, reference: &StructuredResult) -> Vec<String> {
        reference
            .field_names()
            .filter(|field| !self.rules.contains_key(*field))
            .map(str::to_owned)
            .collect()
    }

    /// `InvalidConfig` naming the first rule whose strategy parameters are out
    /// of range.
    pub fn validate(&self, scenario: &str) -> GoldenResult<()> {
        for (field, strategy) in &self.rules {
            strategy.validate().map_err(|reason| {
                GoldenError::InvalidConfig(format!("scenario `{scenario}`, field `{field}`: {reason}"))
            })?;
        }
        Ok(())
    }

    pub fn ensure_covers(&self, scenario: &str, reference: &StructuredResult) -> GoldenResult<()> {
        let fields = self.missing_for(reference);
        if fields.is_empty() {
            Ok(())
        } else {
            Err(GoldenError::ComparisonRuleMissing {
                scenario: scenario.to_owned(),
                fields,
            })
        }
    }
}

impl FromIterator<ComparisonRule> for RuleSet {
    fn from_iter<I: IntoIterator<Item = ComparisonRule>>(iter: I) -> Self {
        let mut set = Self::new();
        for rule in iter {
            set.insert(rule);
        }
        set
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    /// First differing element (flat index) or track pair, when one exists.
    pub index: Option<usize>,
    pub expected: String,
    pub actual: String,
    pub reason: String,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(index) = self.index {
            write!(f, "at index {index}: ")?;
        }
        write!(
            f,
            "expected {}, got {} ({})",
            self.expected, self.actual, self.reason
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonOutcome {
    pub field: String,
    /// Set for ordered-track comparisons, one outcome per pair.
    pub pair_index: Option<usize>,
    pub strategy: String,
    pub passed: bool,
    pub mismatch: Option<Mismatch>,
}

impl ComparisonOutcome {
    fn pass(field: &str, strategy: &Strategy, pair_index: Option<usize>) -> Self {
        Self {
            field: field.to_owned(),
            pair_index,
            strategy: strategy.name().to_owned(),
            passed: true,
            mismatch: None,
        }
    }

    fn fail(field: &str, strategy: &Strategy, pair_index: Option<usize>, mismatch: Mismatch) -> Self {
        Self {
            field: field.to_owned(),
            pair_index,
            strategy: strategy.name().to_owned(),
            passed: false,
            mismatch: Some(mismatch),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub outcomes: Vec<ComparisonOutcome>,
}

impl ComparisonReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    #[must_use]
    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.passed).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.total() - self.passed()
    }

    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ComparisonOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.passed)
    }

    #[must_use]
    pub fn first_failure(&self) -> Option<&ComparisonOutcome> {
        self.failures().next()
    }

    pub fn outcomes_for<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a ComparisonOutcome> {
        self.outcomes.iter().filter(move |outcome| outcome.field == field)
    }
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

/// Symmetric relative comparison: `|a-b| <= tol * max(|a|, |b|, 1e-12)`.
///
/// Identical values (including equal infinities) and two NaNs match.
#[must_use]
pub fn approx_equal(a: f64, b: f64, relative_tolerance: f64) -> bool {
    if a == b || (a.is_nan() && b.is_nan()) {
        return true;
    }
    if !a.is_finite() || !b.is_finite() {
        return false;
    }
    let scale = a.abs().max(b.abs()).max(APPROX_EPSILON);
    (a - b).abs() <= relative_tolerance.max(0.0) * scale
}

/// Judge every reference field with its rule.
///
/// Coverage is checked up front: a reference field without a rule raises
/// `ComparisonRuleMissing` before any value is compared. All mismatches
/// are collected; none short-circuit the report.
pub fn compare_results(
    scenario: &str,
    reference: &StructuredResult,
    live: &StructuredResult,
    rules: &RuleSet,
) -> GoldenResult<ComparisonReport> {
    rules.ensure_covers(scenario, reference)?;

    for rule in rules.rules().filter(|rule| !reference.contains(&rule.field)) {
        tracing::debug!(scenario, field = %rule.field, "rule has no reference field; ignored");
    }

    let mut outcomes = Vec::new();
    for (field, expected) in reference.iter() {
        let Some(strategy) = rules.get(field) else {
            continue;
        };
        match live.get(field) {
            Some(actual) => outcomes.extend(compare_field(field, expected, actual, strategy)),
            None => outcomes.push(ComparisonOutcome::fail(
                field,
                strategy,
                None,
                Mismatch {
                    index: None,
                    expected: expected.summary(),
                    actual: ABSENT.to_owned(),
                    reason: "field missing from live result".to_owned(),
                },
            )),
        }
    }

    let report = ComparisonReport { outcomes };
    if !report.all_passed() {
        tracing::warn!(
            scenario,
            failed = report.failed(),
            total = report.total(),
            "comparison found mismatches"
        );
    }
    Ok(report)
}

/// Compare one field. Track comparisons yield one outcome per pair; every
/// other strategy yields exactly one outcome.
#[must_use]
pub fn compare_field(
    field: &str,
    expected: &FieldValue,
    actual: &FieldValue,
    strategy: &Strategy,
) -> Vec<ComparisonOutcome> {
    match *strategy {
        Strategy::Exact => vec![compare_exact(field, expected, actual, strategy)],
        Strategy::Shape => vec![compare_shape(field, expected, actual, strategy)],
        Strategy::Approx { relative_tolerance } => {
            vec![compare_approx(field, expected, actual, strategy, relative_tolerance)]
        }
        Strategy::OrderedTracks {
            relative_tolerance,
            boundary_floor_sec,
            length_policy,
            match_track_id,
        } => {
            let (Some(expected_tracks), Some(actual_tracks)) = (expected.as_tracks(), actual.as_tracks())
            else {
                return vec![kind_mismatch(field, expected, actual, strategy)];
            };
            let tolerance = TrackTolerance {
                relative_tolerance,
                boundary_floor_sec,
                length_policy,
                match_track_id,
            };
            let (expected_tracks, actual_tracks) =
                (in_natural_order(expected_tracks), in_natural_order(actual_tracks));
            compare_tracks(field, &expected_tracks, &actual_tracks, strategy, tolerance)
        }
    }
}

fn kind_mismatch(
    field: &str,
    expected: &FieldValue,
    actual: &FieldValue,
    strategy: &Strategy,
) -> ComparisonOutcome {
    ComparisonOutcome::fail(
        field,
        strategy,
        None,
        Mismatch {
            index: None,
            expected: expected.kind().as_str().to_owned(),
            actual: actual.kind().as_str().to_owned(),
            reason: format!("value kinds differ under {} comparison", strategy.name()),
        },
    )
}

/// Index of the first element that differs, or the shorter length when one
/// side is a strict prefix of the other.
fn first_difference<T>(expected: &[T], actual: &[T], eq: impl Fn(&T, &T) -> bool) -> Option<usize> {
    expected
        .iter()
        .zip(actual)
        .position(|(left, right)| !eq(left, right))
        .or_else(|| (expected.len() != actual.len()).then(|| expected.len().min(actual.len())))
}

fn render_at<T: fmt::Display>(items: &[T], index: usize) -> String {
    items.get(index).map_or_else(|| ABSENT.to_owned(), ToString::to_string)
}

fn compare_exact(
    field: &str,
    expected: &FieldValue,
    actual: &FieldValue,
    strategy: &Strategy,
) -> ComparisonOutcome {
    if expected.kind() != actual.kind() {
        return kind_mismatch(field, expected, actual, strategy);
    }

    let difference = match (expected.as_tracks(), actual.as_tracks()) {
        (Some(left), Some(right)) => first_difference(left, right, |a, b| a == b).map(|index| {
            (index, render_at(left, index), render_at(right, index), left.len(), right.len())
        }),
        _ => {
            let (left, right) = (expected.scalars(), actual.scalars());
            first_difference(left, right, Scalar::exact_eq).map(|index| {
                (index, render_at(left, index), render_at(right, index), left.len(), right.len())
            })
        }
    };

    if let Some((index, expected_text, actual_text, expected_len, actual_len)) = difference {
        let reason = if index < expected_len.min(actual_len) {
            "values differ".to_owned()
        } else {
            format!("length differs (expected {expected_len}, got {actual_len})")
        };
        return ComparisonOutcome::fail(
            field,
            strategy,
            None,
            Mismatch {
                index: Some(index),
                expected: expected_text,
                actual: actual_text,
                reason,
            },
        );
    }

    let (expected_shape, actual_shape) = (expected.shape(), actual.shape());
    if expected_shape != actual_shape {
        return shape_mismatch(field, strategy, &expected_shape, &actual_shape);
    }
    ComparisonOutcome::pass(field, strategy, None)
}

fn shape_mismatch(
    field: &str,
    strategy: &Strategy,
    expected: &[usize],
    actual: &[usize],
) -> ComparisonOutcome {
    ComparisonOutcome::fail(
        field,
        strategy,
        None,
        Mismatch {
            index: None,
            expected: format!("{expected:?}"),
            actual: format!("{actual:?}"),
            reason: "shape differs".to_owned(),
        },
    )
}

fn compare_shape(
    field: &str,
    expected: &FieldValue,
    actual: &FieldValue,
    strategy: &Strategy,
) -> ComparisonOutcome {
    let (expected_shape, actual_shape) = (expected.shape(), actual.shape());
    if expected_shape == actual_shape {
        ComparisonOutcome::pass(field, strategy, None)
    } else {
        shape_mismatch(field, strategy, &expected_shape, &actual_shape)
    }
}

fn compare_approx(
    field: &str,
    expected: &FieldValue,
    actual: &FieldValue,
    strategy: &Strategy,
    relative_tolerance: f64,
) -> ComparisonOutcome {
    if expected.kind() != actual.kind() || expected.as_tracks().is_some() {
        return kind_mismatch(field, expected, actual, strategy);
    }

    let (expected_shape, actual_shape) = (expected.shape(), actual.shape());
    if expected_shape != actual_shape {
        return shape_mismatch(field, strategy, &expected_shape, &actual_shape);
    }

    let close = |left: &Scalar, right: &Scalar| match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => approx_equal(a, b, relative_tolerance),
        _ => left.exact_eq(right),
    };
    let (left, right) = (expected.scalars(), actual.scalars());
    let Some(index) = first_difference(left, right, close) else {
        return ComparisonOutcome::pass(field, strategy, None);
    };

    let reason = match (left[index].as_f64(), right[index].as_f64()) {
        (Some(a), Some(b)) => format!(
            "|{a} - {b}| exceeds relative tolerance {relative_tolerance}"
        ),
        _ => "non-numeric values differ".to_owned(),
    };
    ComparisonOutcome::fail(
        field,
        strategy,
        None,
        Mismatch {
            index: Some(index),
            expected: render_at(left, index),
            actual: render_at(right, index),
            reason,
        },
    )
}

#[derive(Debug, Clone, Copy)]
struct TrackTolerance {
    relative_tolerance: f64,
    boundary_floor_sec: f64,
    length_policy: LengthPolicy,
    match_track_id: bool,
}

impl TrackTolerance {
    fn boundary_matches(self, expected: f64, actual: f64) -> bool {
        approx_equal(expected, actual, self.relative_tolerance)
            || (expected - actual).abs() <= self.boundary_floor_sec.max(0.0)
    }

    /// Reasons the pair does not match; empty when it does.
    fn pair_violations(self, expected: &Track, actual: &Track) -> Vec<String> {
        let mut violations = Vec::new();
        if !self.boundary_matches(expected.start, actual.start) {
            violations.push(format!("start {} vs {}", expected.start, actual.start));
        }
        if !self.boundary_matches(expected.end, actual.end) {
            violations.push(format!("end {} vs {}", expected.end, actual.end));
        }
        if expected.label != actual.label {
            violations.push(format!("label `{}` vs `{}`", expected.label, actual.label));
        }
        if self.match_track_id && expected.track_id != actual.track_id {
            violations.push(format!(
                "track `{}` vs `{}`",
                expected.track_id, actual.track_id
            ));
        }
        violations
    }
}

/// Positional pairing needs both timelines in natural order; adapters that
/// bypass normalization may return them unsorted.
fn in_natural_order(tracks: &[Track]) -> Cow<'_, [Track]> {
    if tracks.is_sorted_by(|a, b| annotation::natural_order(a, b).is_le()) {
        Cow::Borrowed(tracks)
    } else {
        let mut owned = tracks.to_vec();
        annotation::sort_tracks(&mut owned);
        Cow::Owned(owned)
    }
}

fn compare_tracks(
    field: &str,
    expected: &[Track],
    actual: &[Track],
    strategy: &Strategy,
    tolerance: TrackTolerance,
) -> Vec<ComparisonOutcome> {
    if expected.is_empty() && actual.is_empty() {
        return vec![ComparisonOutcome::pass(field, strategy, None)];
    }

    let mut outcomes: Vec<ComparisonOutcome> = expected
        .iter()
        .zip(actual)
        .enumerate()
        .map(|(index, (left, right))| {
            let violations = tolerance.pair_violations(left, right);
            if violations.is_empty() {
                ComparisonOutcome::pass(field, strategy, Some(index))
            } else {
                ComparisonOutcome::fail(
                    field,
                    strategy,
                    Some(index),
                    Mismatch {
                        index: Some(index),
                        expected: left.to_string(),
                        actual: right.to_string(),
                        reason: violations.join("; "),
                    },
                )
            }
        })
        .collect();

    let common = expected.len().min(actual.len());
    let longest = expected.len().max(actual.len());
    if common == longest {
        return outcomes;
    }

    match tolerance.length_policy {
        LengthPolicy::Strict => {
            for index in common..longest {
                outcomes.push(ComparisonOutcome::fail(
                    field,
                    strategy,
                    Some(index),
                    Mismatch {
                        index: Some(index),
                        expected: render_at(expected, index),
                        actual: render_at(actual, index),
                        reason: format!(
                            "unpaired track (expected {} track(s), got {})",
                            expected.len(),
                            actual.len()
                        ),
                    },
                ));
            }
        }
        LengthPolicy::Truncate => {
            tracing::warn!(
                field,
                expected = expected.len(),
                actual = actual.len(),
                dropped = longest - common,
                "track lists differ in length; compared common prefix only"
            );
        }
    }
    outcomes
}
