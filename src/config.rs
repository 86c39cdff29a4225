//! Harness configuration from the environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{GoldenError, GoldenResult};
use crate::fixture::FixtureStore;
use crate::manifest::ScenarioManifest;
use crate::orchestrator::{DEFAULT_SCENARIO_TIMEOUT_MS, HarnessContext};

pub const FIXTURE_ROOT_ENV: &str = "FRANKEN_GOLDEN_FIXTURE_ROOT";
pub const MANIFEST_ENV: &str = "FRANKEN_GOLDEN_MANIFEST";
pub const SCENARIO_TIMEOUT_ENV: &str = "FRANKEN_GOLDEN_SCENARIO_TIMEOUT_MS";

const DEFAULT_FIXTURE_ROOT: &str = "tests/fixtures";
const DEFAULT_MANIFEST_NAME: &str = "scenarios.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    pub fixture_root: PathBuf,
    pub manifest_path: PathBuf,
    pub scenario_timeout: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let fixture_root = PathBuf::from(DEFAULT_FIXTURE_ROOT);
        Self {
            manifest_path: fixture_root.join(DEFAULT_MANIFEST_NAME),
            fixture_root,
            scenario_timeout: Duration::from_millis(DEFAULT_SCENARIO_TIMEOUT_MS),
        }
    }
}

impl HarnessConfig {
    pub fn from_env() -> GoldenResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve settings through `lookup`; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> GoldenResult<Self> {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let fixture_root = read(FIXTURE_ROOT_ENV)
            .map_or_else(|| PathBuf::from(DEFAULT_FIXTURE_ROOT), PathBuf::from);
        let manifest_path = read(MANIFEST_ENV)
            .map_or_else(|| fixture_root.join(DEFAULT_MANIFEST_NAME), PathBuf::from);
        let scenario_timeout = match read(SCENARIO_TIMEOUT_ENV) {
            None => Duration::from_millis(DEFAULT_SCENARIO_TIMEOUT_MS),
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => Duration::from_millis(ms),
                _ => {
                    return Err(GoldenError::InvalidConfig(format!(
                        "{SCENARIO_TIMEOUT_ENV} must be a positive integer (milliseconds), got `{raw}`"
                    )));
                }
            },
        };

        Ok(Self {
            fixture_root,
            manifest_path,
            scenario_timeout,
        })
    }

    pub fn open_store(&self) -> GoldenResult<FixtureStore> {
        FixtureStore::open(&self.fixture_root)
    }

    pub fn load_manifest(&self) -> GoldenResult<ScenarioManifest> {
        ScenarioManifest::load(&self.manifest_path)
    }

    /// Store, manifest and adapters, ready for `run_all`.
    pub fn build(&self) -> GoldenResult<(HarnessContext, ScenarioManifest)> {
        let manifest = self.load_manifest()?;
        let context = manifest.build_context(self.open_store()?, self.scenario_timeout)?;
        Ok((context, manifest))
    }
}
