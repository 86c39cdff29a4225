//! Behavioural properties of the per-field comparator.

mod helpers;

use std::sync::atomic::Ordering;

use franken_golden::adapter::{AdapterKind, AdapterRegistry};
use franken_golden::comparator::{
    LengthPolicy, RuleSet, Strategy, approx_equal, compare_field, compare_results,
};
use franken_golden::error::GoldenError;
use franken_golden::model::{FieldValue, NdArray, Scalar, StructuredResult, Track};
use franken_golden::orchestrator::{HarnessContext, Scenario, run_scenario};
use helpers::{FixtureTree, MockAdapter};
use serde_json::json;

fn floats(values: &[f64]) -> FieldValue {
    FieldValue::Sequence(values.iter().copied().map(Scalar::Float).collect())
}

fn labels(values: &[&str]) -> FieldValue {
    FieldValue::Sequence(values.iter().copied().map(Scalar::from).collect())
}

fn face_boxes(values: &[[f64; 4]]) -> FieldValue {
    let items = values.iter().flatten().copied().map(Scalar::Float).collect();
    FieldValue::Array(NdArray::new(vec![values.len(), 4], items).expect("n x 4"))
}

fn every_strategy() -> Vec<Strategy> {
    vec![
        Strategy::Exact,
        Strategy::Shape,
        Strategy::approx(),
        Strategy::ordered_tracks(),
    ]
}

// ---------------------------------------------------------------------------
// Approx symmetry
// ---------------------------------------------------------------------------

#[test]
fn approx_equal_is_symmetric() {
    let samples = [
        0.0,
        -0.0,
        1e-13,
        0.5,
        0.995,
        1.0,
        1.01,
        -3.2,
        120.9,
        122.1,
        1e9,
        f64::INFINITY,
        f64::NEG_INFINITY,
        f64::NAN,
    ];
    for tol in [0.0, 1e-3, 1e-2, 0.5] {
        for &a in &samples {
            for &b in &samples {
                assert_eq!(
                    approx_equal(a, b, tol),
                    approx_equal(b, a, tol),
                    "asymmetric for a={a}, b={b}, tol={tol}"
                );
            }
        }
    }
}

#[test]
fn approx_field_comparison_is_symmetric() {
    let reference = floats(&[110.0, 111.0, 112.0]);
    let drifted = floats(&[110.5, 112.5, 112.0]);
    let forward = compare_field("pitch", &reference, &drifted, &Strategy::approx());
    let backward = compare_field("pitch", &drifted, &reference, &Strategy::approx());
    assert_eq!(forward[0].passed, backward[0].passed);
    assert_eq!(
        forward[0].mismatch.as_ref().and_then(|m| m.index),
        backward[0].mismatch.as_ref().and_then(|m| m.index)
    );
}

// ---------------------------------------------------------------------------
// Shape ignores value drift
// ---------------------------------------------------------------------------

#[test]
fn shape_equality_ignores_value_drift() {
    let reference = face_boxes(&[[10.0, 20.0, 50.0, 80.0], [100.0, 22.0, 140.0, 85.0]]);
    let drifted = face_boxes(&[[11.7, 19.2, 52.0, 79.1], [98.3, 25.0, 139.0, 90.0]]);
    let outcomes = compare_field("box", &reference, &drifted, &Strategy::Shape);
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].passed);

    let extra_face = face_boxes(&[[10.0, 20.0, 50.0, 80.0], [100.0, 22.0, 140.0, 85.0], [1.0, 2.0, 3.0, 4.0]]);
    assert!(!compare_field("box", &reference, &extra_face, &Strategy::Shape)[0].passed);
}

#[test]
fn shape_distinguishes_rank() {
    let flat = floats(&[1.0, 2.0, 3.0, 4.0]);
    let boxed = face_boxes(&[[1.0, 2.0, 3.0, 4.0]]);
    assert!(!compare_field("box", &flat, &boxed, &Strategy::Shape)[0].passed);
}

// ---------------------------------------------------------------------------
// Exact reports the first differing index
// ---------------------------------------------------------------------------

#[test]
fn exact_speaker_labels_fail_at_index_one_with_both_values() {
    let outcomes = compare_field(
        "labels",
        &labels(&["SPEAKER_00", "SPEAKER_01"]),
        &labels(&["SPEAKER_00", "SPEAKER_02"]),
        &Strategy::Exact,
    );
    assert_eq!(outcomes.len(), 1);
    assert!(!outcomes[0].passed);
    let mismatch = outcomes[0].mismatch.as_ref().expect("mismatch diagnostic");
    assert_eq!(mismatch.index, Some(1));
    assert_eq!(mismatch.expected, "SPEAKER_01");
    assert_eq!(mismatch.actual, "SPEAKER_02");
}

#[test]
fn exact_reports_first_of_several_differences() {
    let outcomes = compare_field(
        "frame",
        &FieldValue::Sequence((0..6).map(Scalar::Integer).collect()),
        &FieldValue::Sequence([0, 1, 9, 3, 9, 5].into_iter().map(Scalar::Integer).collect()),
        &Strategy::Exact,
    );
    let mismatch = outcomes[0].mismatch.as_ref().expect("mismatch");
    assert_eq!(mismatch.index, Some(2));
    assert_eq!(mismatch.expected, "2");
    assert_eq!(mismatch.actual, "9");
}

#[test]
fn exact_uses_flat_index_for_arrays() {
    let reference = face_boxes(&[[1.0, 2.0, 3.0, 4.0], [5.0, 6.0, 7.0, 8.0]]);
    let live = face_boxes(&[[1.0, 2.0, 3.0, 4.0], [5.0, 6.5, 7.0, 8.0]]);
    let outcomes = compare_field("box", &reference, &live, &Strategy::Exact);
    assert_eq!(outcomes[0].mismatch.as_ref().and_then(|m| m.index), Some(5));
}

#[test]
fn exact_scalar_text_mismatch() {
    let outcomes = compare_field(
        "transcription",
        &FieldValue::Scalar(Scalar::from("dit is een test")),
        &FieldValue::Scalar(Scalar::from("dit is een tekst")),
        &Strategy::Exact,
    );
    let mismatch = outcomes[0].mismatch.as_ref().expect("mismatch");
    assert_eq!(mismatch.index, Some(0));
    assert_eq!(mismatch.expected, "dit is een test");
}

// ---------------------------------------------------------------------------
// Round trip: a reference compared to itself always passes
// ---------------------------------------------------------------------------

#[test]
fn reference_compared_to_itself_passes_for_every_strategy() {
    let tracks = FieldValue::Tracks(vec![
        Track::new(0.48, 2.11, "A", "SPEAKER_00"),
        Track::new(2.31, 3.92, "B", "SPEAKER_01"),
    ]);
    let values = [
        FieldValue::Scalar(Scalar::from("hallo")),
        FieldValue::Scalar(Scalar::Float(f64::NAN)),
        floats(&[0.0, 0.04, f64::NAN]),
        labels(&["SPEAKER_00"]),
        FieldValue::Sequence(vec![Scalar::Null, Scalar::Integer(3)]),
        face_boxes(&[[1.0, 2.0, 3.0, 4.0]]),
        FieldValue::Sequence(Vec::new()),
        tracks.clone(),
        FieldValue::Tracks(Vec::new()),
    ];
    for value in &values {
        for strategy in every_strategy() {
            if matches!(strategy, Strategy::OrderedTracks { .. }) && value.as_tracks().is_none() {
                continue;
            }
            if matches!(strategy, Strategy::Approx { .. }) && value.as_tracks().is_some() {
                continue;
            }
            let outcomes = compare_field("field", value, value, &strategy);
            assert!(
                outcomes.iter().all(|outcome| outcome.passed),
                "{strategy:?} failed on identical {value:?}: {outcomes:?}"
            );
        }
    }
}

#[test]
fn parsed_reference_document_round_trips_through_comparison() {
    let raw = json!({
        "frame": [0, 0, 1],
        "time": [0.0, 0.0, 0.04],
        "box": [[10.2, 20.1, 50.3, 80.4], [100.0, 22.5, 140.2, 85.0], [10.5, 20.0, 50.1, 80.9]],
        "prob": [0.9998, 0.9871, 0.9995],
        "label": [0, 1, 0],
    });
    let reference = StructuredResult::from_json(&raw).expect("feature table");
    let rules = RuleSet::new()
        .with("frame", Strategy::Exact)
        .with("time", Strategy::Exact)
        .with("box", Strategy::Shape)
        .with("prob", Strategy::approx())
        .with("label", Strategy::Exact);
    let report = compare_results("face_round_trip", &reference, &reference, &rules).expect("covered");
    assert_eq!(report.total(), 5);
    assert!(report.all_passed());
}

// ---------------------------------------------------------------------------
// Ordered tracks
// ---------------------------------------------------------------------------

#[test]
fn ordered_tracks_tolerate_small_boundary_drift() {
    let reference = FieldValue::Tracks(vec![
        Track::new(0.0, 1.0, "A", "A"),
        Track::new(1.0, 2.0, "B", "B"),
    ]);
    let live = FieldValue::Tracks(vec![
        Track::new(0.01, 0.99, "A", "A"),
        Track::new(1.02, 2.05, "B", "B"),
    ]);
    let strategy = Strategy::OrderedTracks {
        relative_tolerance: 1e-2,
        boundary_floor_sec: 0.05,
        length_policy: LengthPolicy::Strict,
        match_track_id: true,
    };
    let outcomes = compare_field("tracks", &reference, &live, &strategy);
    assert_eq!(outcomes.len(), 2, "one outcome per track pair");
    assert!(outcomes.iter().all(|outcome| outcome.passed), "{outcomes:?}");
    assert_eq!(outcomes[1].pair_index, Some(1));
}

#[test]
fn ordered_tracks_reject_drift_beyond_floor_and_tolerance() {
    let reference = FieldValue::Tracks(vec![Track::new(1.0, 2.0, "A", "SPEAKER_00")]);
    let live = FieldValue::Tracks(vec![Track::new(1.2, 2.0, "A", "SPEAKER_00")]);
    let outcomes = compare_field("tracks", &reference, &live, &Strategy::ordered_tracks());
    assert!(!outcomes[0].passed);
    let mismatch = outcomes[0].mismatch.as_ref().expect("mismatch");
    assert!(mismatch.reason.contains("start"), "{}", mismatch.reason);
}

#[test]
fn relative_tolerance_covers_late_boundaries() {
    let reference = FieldValue::Tracks(vec![Track::new(300.0, 400.0, "A", "SPEAKER_00")]);
    let live = FieldValue::Tracks(vec![Track::new(302.0, 403.0, "A", "SPEAKER_00")]);
    assert!(compare_field("tracks", &reference, &live, &Strategy::ordered_tracks())[0].passed);
}

// ---------------------------------------------------------------------------
// Missing rule
// ---------------------------------------------------------------------------

#[test]
fn missing_rule_raises_before_any_comparison() {
    let reference = StructuredResult::new()
        .with("tracks", FieldValue::Tracks(Vec::new()))
        .with("labels", labels(&[]));
    let rules = RuleSet::new().with("tracks", Strategy::ordered_tracks());
    let err = compare_results("speaker", &reference, &StructuredResult::new(), &rules)
        .expect_err("labels has no rule");
    match err {
        GoldenError::ComparisonRuleMissing { scenario, fields } => {
            assert_eq!(scenario, "speaker");
            assert_eq!(fields, vec!["labels".to_owned()]);
        }
        other => panic!("expected ComparisonRuleMissing, got {other:?}"),
    }
}

#[test]
fn missing_rule_raises_before_the_adapter_runs() {
    let tree = FixtureTree::new();
    tree.media("media/clip.wav");
    tree.annotation("reference_files/speakers.json", &[Track::new(0.0, 1.0, "A", "SPEAKER_00")]);

    let adapter = MockAdapter::returning("speaker", AdapterKind::Speaker, StructuredResult::new());
    let calls = adapter.calls();
    let ctx = HarnessContext::new(tree.store(), AdapterRegistry::new().with(adapter.shared()));

    let scenario = Scenario::new(
        "speaker_missing_rule",
        "media/clip.wav",
        "reference_files/speakers.json",
        "speaker",
        RuleSet::new().with("tracks", Strategy::ordered_tracks()),
    );
    let err = run_scenario(&ctx, &scenario).expect_err("labels has no rule");
    assert!(matches!(err.root(), GoldenError::ComparisonRuleMissing { .. }), "{err:?}");
    assert_eq!(err.scenario(), Some("speaker_missing_rule"));
    assert_eq!(calls.load(Ordering::SeqCst), 0, "adapter must not run");
}
