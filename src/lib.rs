#![forbid(unsafe_code)]
#![allow(clippy::needless_raw_string_hashes)]

pub mod adapter;
pub mod annotation;
pub mod comparator;
pub mod config;
pub mod error;
pub mod fixture;
pub mod logging;
pub mod manifest;
pub mod model;
pub mod orchestrator;
pub mod process;

pub use adapter::{Adapter, AdapterContext, AdapterKind, AdapterRegistry};
pub use comparator::{ComparisonReport, LengthPolicy, RuleSet, Strategy, approx_equal, compare_results};
pub use config::HarnessConfig;
pub use error::{GoldenError, GoldenResult};
pub use fixture::FixtureStore;
pub use manifest::ScenarioManifest;
pub use model::{FieldValue, LiveResult, MediaFixture, Modality, ReferenceResult, Scalar, StructuredResult, Track};
pub use orchestrator::{
    HarnessContext, HarnessSummary, Scenario, ScenarioReport, run_all, run_all_parallel, run_scenario,
};
