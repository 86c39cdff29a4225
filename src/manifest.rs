//! Scenario manifest: the JSON document declaring adapter bindings and the
//! fixture pairs to run through them.
//!
//! ```json
//! {
//!   "adapters": {
//!     "speaker": {"kind": "speaker", "program": "python3", "args": ["tools/speaker.py"]},
//!     "voice": {"kind": "voice", "program": "python3", "args": ["tools/voice.py"], "timeout_ms": 60000},
//!     "audio": {"kind": "audio_integration", "speaker": "speaker", "voice": "voice"}
//!   },
//!   "scenarios": [
//!     {"name": "speaker_5s", "media": "media/clip.wav", "reference": "reference_files/clip.json",
//!      "adapter": "speaker", "rules": {"tracks": {"strategy": "ordered_tracks"}}}
//!   ]
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapter::{self, AdapterKind, AdapterRegistry, AudioIntegrationAdapter, CommandBridge};
use crate::error::{GoldenError, GoldenResult};
use crate::fixture::FixtureStore;
use crate::orchestrator::{HarnessContext, Scenario};

/// An external model tool printing one JSON document on stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandBinding {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdapterBinding {
    Voice(CommandBinding),
    Speaker(CommandBinding),
    Transcription(CommandBinding),
    Face(CommandBinding),
    AudioIntegration { speaker: String, voice: String },
}

impl AdapterBinding {
    #[must_use]
    pub const fn kind(&self) -> AdapterKind {
        match self {
            Self::Voice(_) => AdapterKind::Voice,
            Self::Speaker(_) => AdapterKind::Speaker,
            Self::Transcription(_) => AdapterKind::Transcription,
            Self::Face(_) => AdapterKind::Face,
            Self::AudioIntegration { .. } => AdapterKind::AudioIntegration,
        }
    }

    fn command(&self) -> Option<&CommandBinding> {
        match self {
            Self::Voice(command)
            | Self::Speaker(command)
            | Self::Transcription(command)
            | Self::Face(command) => Some(command),
            Self::AudioIntegration { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioManifest {
    /// Directory command bindings run in; the manifest's own directory.
    #[serde(skip)]
    base_dir: PathBuf,
    #[serde(default)]
    pub adapters: BTreeMap<String, AdapterBinding>,
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
}

impl ScenarioManifest {
    pub fn load(path: &Path) -> GoldenResult<Self> {
        if !path.is_file() {
            return Err(GoldenError::FixtureNotFound {
                name: "<scenario manifest>".to_owned(),
                path: path.to_path_buf(),
            });
        }
        let text = std::fs::read_to_string(path)?;
        let base_dir = path.parent().map_or_else(PathBuf::new, Path::to_path_buf);
        Self::from_json_str(&text, base_dir).map_err(|err| match err {
            GoldenError::InvalidConfig(reason) => {
                GoldenError::InvalidConfig(format!("{}: {reason}", path.display()))
            }
            other => other,
        })
    }

    pub fn from_json_str(text: &str, base_dir: impl Into<PathBuf>) -> GoldenResult<Self> {
        let mut manifest: Self = serde_json::from_str(text)
            .map_err(|err| GoldenError::InvalidConfig(format!("malformed manifest: {err}")))?;
        manifest.base_dir = base_dir.into();
        manifest.validate()?;
        Ok(manifest)
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[must_use]
    pub fn scenarios(&self) -> &[Scenario] {
        &self.scenarios
    }

    /// Structural checks run at load time, before any tool is spawned.
    pub fn validate(&self) -> GoldenResult<()> {
        for (name, binding) in &self.adapters {
            if let Some(command) = binding.command()
                && command.timeout_ms == Some(0)
            {
                return Err(GoldenError::InvalidConfig(format!(
                    "adapter `{name}`: timeout_ms must be positive"
                )));
            }
            if let AdapterBinding::AudioIntegration { speaker, voice } = binding {
                self.expect_kind(name, "speaker", speaker, AdapterKind::Speaker)?;
                self.expect_kind(name, "voice", voice, AdapterKind::Voice)?;
            }
        }

        let mut seen = BTreeSet::new();
        for scenario in &self.scenarios {
            if !seen.insert(scenario.name.as_str()) {
                return Err(GoldenError::InvalidConfig(format!(
                    "duplicate scenario name `{}`",
                    scenario.name
                )));
            }
            if !self.adapters.contains_key(&scenario.adapter) {
                return Err(GoldenError::InvalidConfig(format!(
                    "scenario `{}` references unknown adapter `{}`",
                    scenario.name, scenario.adapter
                )));
            }
            if scenario.timeout_ms == Some(0) {
                return Err(GoldenError::InvalidConfig(format!(
                    "scenario `{}`: timeout_ms must be positive",
                    scenario.name
                )));
            }
            scenario.rules.validate(&scenario.name)?;
            if let Some(context) = &scenario.context {
                context.validate().map_err(|err| match err {
                    GoldenError::InvalidConfig(reason) => {
                        GoldenError::InvalidConfig(format!("scenario `{}`: {reason}", scenario.name))
                    }
                    other => other,
                })?;
            }
        }
        Ok(())
    }

    fn expect_kind(
        &self,
        owner: &str,
        role: &str,
        target: &str,
        expected: AdapterKind,
    ) -> GoldenResult<()> {
        match self.adapters.get(target) {
            Some(binding) if binding.kind() == expected => Ok(()),
            Some(binding) => Err(GoldenError::InvalidConfig(format!(
                "adapter `{owner}`: {role} stage `{target}` is a {} adapter, expected {}",
                binding.kind().as_str(),
                expected.as_str()
            ))),
            None => Err(GoldenError::InvalidConfig(format!(
                "adapter `{owner}`: {role} stage references unknown adapter `{target}`"
            ))),
        }
    }

    /// Instantiate every binding. Command tools must be on `PATH`.
    pub fn build_registry(&self) -> GoldenResult<AdapterRegistry> {
        let mut registry = AdapterRegistry::new();
        for (name, binding) in &self.adapters {
            let Some(command) = binding.command() else {
                continue;
            };
            let mut bridge = CommandBridge::new(command.program.as_str())?
                .with_args(command.args.iter().cloned())
                .with_working_dir(&self.base_dir);
            if let Some(timeout_ms) = command.timeout_ms {
                bridge = bridge.with_timeout(Duration::from_millis(timeout_ms));
            }
            registry.register(adapter::command_adapter(name.as_str(), binding.kind(), bridge)?);
        }

        for (name, binding) in &self.adapters {
            if let AdapterBinding::AudioIntegration { speaker, voice } = binding {
                let joined =
                    AudioIntegrationAdapter::new(name.as_str(), registry.get(speaker)?, registry.get(voice)?)?;
                registry.register(Arc::new(joined));
            }
        }

        tracing::debug!(adapters = registry.len(), "built adapter registry");
        Ok(registry)
    }

    pub fn build_context(&self, store: FixtureStore, default_timeout: Duration) -> GoldenResult<HarnessContext> {
        Ok(HarnessContext::new(store, self.build_registry()?).with_default_timeout(default_timeout))
    }
}
