#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use franken_golden::adapter::{Adapter, AdapterContext, AdapterKind};
use franken_golden::annotation::annotation_to_json;
use franken_golden::error::{GoldenError, GoldenResult};
use franken_golden::fixture::FixtureStore;
use franken_golden::model::{LiveResult, MediaFixture, Track};
use serde_json::Value;

/// Return path to the tests/fixtures directory.
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

/// Return path to the tests/fixtures/reference_files directory.
pub fn reference_dir() -> PathBuf {
    fixtures_dir().join("reference_files")
}

/// A throwaway fixture tree. Drop it to clean up.
pub struct FixtureTree {
    dir: tempfile::TempDir,
}

impl FixtureTree {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create temp dir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    fn write(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create fixture dir");
        }
        std::fs::write(&path, contents).expect("failed to write fixture");
        path
    }

    /// Placeholder media; adapters under test never decode it.
    pub fn media(&self, name: &str) -> PathBuf {
        self.write(name, b"placeholder media")
    }

    pub fn json(&self, name: &str, value: &Value) -> PathBuf {
        let body = serde_json::to_vec_pretty(value).expect("fixture json");
        self.write(name, &body)
    }

    pub fn annotation(&self, name: &str, tracks: &[Track]) -> PathBuf {
        self.json(name, &annotation_to_json("fixture", tracks))
    }

    pub fn store(&self) -> FixtureStore {
        FixtureStore::open(self.dir.path()).expect("failed to open fixture store")
    }
}

/// What a [`MockAdapter`] does when applied.
#[derive(Clone)]
pub enum MockBehavior {
    Return(LiveResult),
    Fail(String),
    Sleep(Duration, LiveResult),
    Panic,
}

/// In-process adapter with a call counter.
pub struct MockAdapter {
    name: String,
    kind: AdapterKind,
    behavior: MockBehavior,
    calls: Arc<AtomicUsize>,
}

impl MockAdapter {
    pub fn new(name: &str, kind: AdapterKind, behavior: MockBehavior) -> Self {
        Self {
            name: name.to_owned(),
            kind,
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn returning(name: &str, kind: AdapterKind, result: LiveResult) -> Self {
        Self::new(name, kind, MockBehavior::Return(result))
    }

    /// Shared handle to the number of `apply` calls.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub fn shared(self) -> Arc<dyn Adapter> {
        Arc::new(self)
    }
}

impl Adapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AdapterKind {
        self.kind
    }

    fn apply(&self, _media: &MediaFixture, _context: Option<&AdapterContext>) -> GoldenResult<LiveResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            MockBehavior::Return(result) => Ok(result.clone()),
            MockBehavior::Fail(reason) => Err(GoldenError::PipelineExecution {
                adapter: self.name.clone(),
                reason: reason.clone(),
            }),
            MockBehavior::Sleep(duration, result) => {
                std::thread::sleep(*duration);
                Ok(result.clone())
            }
            MockBehavior::Panic => panic!("mock adapter `{}` panicked", self.name),
        }
    }
}

/// Assert that two timelines match within an absolute boundary tolerance.
pub fn assert_tracks_match(actual: &[Track], expected: &[Track], tolerance_sec: f64) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "track count mismatch: got {} expected {}",
        actual.len(),
        expected.len()
    );
    for (i, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
        assert!(
            (a.start - e.start).abs() <= tolerance_sec,
            "track {i} start: {} vs {} (tolerance {tolerance_sec})",
            a.start,
            e.start
        );
        assert!(
            (a.end - e.end).abs() <= tolerance_sec,
            "track {i} end: {} vs {} (tolerance {tolerance_sec})",
            a.end,
            e.end
        );
        assert_eq!(a.label, e.label, "track {i} label mismatch");
    }
}
