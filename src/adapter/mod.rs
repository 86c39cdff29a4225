//! Pipeline adapters: one `apply(media, context)` contract over each opaque
//! model subsystem.

pub mod bridge;
mod integration;
pub mod normalize;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GoldenError, GoldenResult};
use crate::model::{LiveResult, MediaFixture, Modality};

pub use bridge::CommandBridge;
pub use integration::{AudioIntegrationAdapter, integrate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    Voice,
    Speaker,
    Transcription,
    Face,
    AudioIntegration,
}

impl AdapterKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Voice => "voice",
            Self::Speaker => "speaker",
            Self::Transcription => "transcription",
            Self::Face => "face",
            Self::AudioIntegration => "audio_integration",
        }
    }

    /// Face extraction needs frames; everything else reads the audio track.
    #[must_use]
    pub const fn accepts(self, modality: Modality) -> bool {
        match self {
            Self::Face => matches!(modality, Modality::Video),
            Self::Voice | Self::Speaker | Self::Transcription | Self::AudioIntegration => true,
        }
    }
}

/// Optional per-invocation parameters, forwarded to model tools as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdapterContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Frame step of the voice feature grid, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_step_sec: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_clusters: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_clusters: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl AdapterContext {
    pub fn validate(&self) -> GoldenResult<()> {
        if let Some(step) = self.time_step_sec
            && !(step.is_finite() && step > 0.0)
        {
            return Err(GoldenError::InvalidConfig(format!(
                "time_step_sec must be a positive number, got {step}"
            )));
        }
        if let (Some(min), Some(max)) = (self.min_clusters, self.max_clusters)
            && min > max
        {
            return Err(GoldenError::InvalidConfig(format!(
                "min_clusters ({min}) exceeds max_clusters ({max})"
            )));
        }
        Ok(())
    }
}

/// Formal adapter contract. Each call is a stateless request/response; any
/// model loading happens when the adapter is constructed.
pub trait Adapter: Send + Sync {
    /// Name the adapter is registered under.
    fn name(&self) -> &str;

    fn kind(&self) -> AdapterKind;

    /// Run the wrapped pipeline on one media file.
    fn apply(&self, media: &MediaFixture, context: Option<&AdapterContext>) -> GoldenResult<LiveResult>;

    /// [`Adapter::apply`] under a wall-clock `budget`. Adapters that spawn
    /// tool processes kill them once it is spent; in-process adapters may
    /// keep the default, which ignores it.
    fn apply_within(
        &self,
        media: &MediaFixture,
        context: Option<&AdapterContext>,
        budget: Duration,
    ) -> GoldenResult<LiveResult> {
        let _ = budget;
        self.apply(media, context)
    }
}

// ---------------------------------------------------------------------------
// Command-backed leaf adapters
// ---------------------------------------------------------------------------

type Normalizer = fn(&Value) -> Result<LiveResult, String>;

fn check_input(
    name: &str,
    kind: AdapterKind,
    media: &MediaFixture,
    context: Option<&AdapterContext>,
) -> GoldenResult<()> {
    if !kind.accepts(media.modality) {
        return Err(GoldenError::InvalidConfig(format!(
            "adapter `{name}` ({}) cannot process {} input `{}`",
            kind.as_str(),
            media.modality.as_str(),
            media.name
        )));
    }
    context.map_or(Ok(()), AdapterContext::validate)
}

fn run_bridge(
    name: &str,
    kind: AdapterKind,
    bridge: &CommandBridge,
    normalize: Normalizer,
    media: &MediaFixture,
    context: Option<&AdapterContext>,
    budget: Option<Duration>,
) -> GoldenResult<LiveResult> {
    check_input(name, kind, media, context)?;
    tracing::debug!(adapter = name, kind = kind.as_str(), media = %media.name, "invoking model tool");

    let raw = bridge
        .invoke_within(&media.path, context, budget)
        .map_err(|err| err.into_pipeline_error(name))?;
    let result = normalize(&raw).map_err(|reason| GoldenError::PipelineExecution {
        adapter: name.to_owned(),
        reason: format!("unusable {} output: {reason}", kind.as_str()),
    })?;

    tracing::debug!(adapter = name, fields = result.len(), "normalized model output");
    Ok(result)
}

/// Voice feature extraction: a table of per-frame feature columns keyed
/// by `time`.
#[derive(Debug, Clone)]
pub struct VoiceAdapter {
    name: String,
    bridge: CommandBridge,
}

impl VoiceAdapter {
    #[must_use]
    pub fn new(name: impl Into<String>, bridge: CommandBridge) -> Self {
        Self {
            name: name.into(),
            bridge,
        }
    }
    fn run(
        &self,
        media: &MediaFixture,
        context: Option<&AdapterContext>,
        budget: Option<Duration>,
    ) -> GoldenResult<LiveResult> {
        run_bridge(
            &self.name,
            AdapterKind::Voice,
            &self.bridge,
            normalize::normalize_voice,
            media,
            context,
            budget,
        )
    }
}

impl Adapter for VoiceAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Voice
    }

    fn apply(&self, media: &MediaFixture, context: Option<&AdapterContext>) -> GoldenResult<LiveResult> {
        self.run(media, context, None)
    }

    fn apply_within(
        &self,
        media: &MediaFixture,
        context: Option<&AdapterContext>,
        budget: Duration,
    ) -> GoldenResult<LiveResult> {
        self.run(media, context, Some(budget))
    }
}

/// Speaker identification: a time-ordered speaker timeline.
#[derive(Debug, Clone)]
pub struct SpeakerAdapter {
    name: String,
    bridge: CommandBridge,
}

impl SpeakerAdapter {
    #[must_use]
    pub fn new(name: impl Into<String>, bridge: CommandBridge) -> Self {
        Self {
            name: name.into(),
            bridge,
        }
    }
    fn run(
        &self,
        media: &MediaFixture,
        context: Option<&AdapterContext>,
        budget: Option<Duration>,
    ) -> GoldenResult<LiveResult> {
        run_bridge(
            &self.name,
            AdapterKind::Speaker,
            &self.bridge,
            normalize::normalize_speaker,
            media,
            context,
            budget,
        )
    }
}

impl Adapter for SpeakerAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Speaker
    }

    fn apply(&self, media: &MediaFixture, context: Option<&AdapterContext>) -> GoldenResult<LiveResult> {
        self.run(media, context, None)
    }

    fn apply_within(
        &self,
        media: &MediaFixture,
        context: Option<&AdapterContext>,
        budget: Duration,
    ) -> GoldenResult<LiveResult> {
        self.run(media, context, Some(budget))
    }
}

/// Speech-to-text: transcript text plus optional timed segments.
#[derive(Debug, Clone)]
pub struct TranscriptionAdapter {
    name: String,
    bridge: CommandBridge,
}

impl TranscriptionAdapter {
    #[must_use]
    pub fn new(name: impl Into<String>, bridge: CommandBridge) -> Self {
        Self {
            name: name.into(),
            bridge,
        }
    }
    fn run(
        &self,
        media: &MediaFixture,
        context: Option<&AdapterContext>,
        budget: Option<Duration>,
    ) -> GoldenResult<LiveResult> {
        run_bridge(
            &self.name,
            AdapterKind::Transcription,
            &self.bridge,
            normalize::normalize_transcription,
            media,
            context,
            budget,
        )
    }
}

impl Adapter for TranscriptionAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Transcription
    }

    fn apply(&self, media: &MediaFixture, context: Option<&AdapterContext>) -> GoldenResult<LiveResult> {
        self.run(media, context, None)
    }

    fn apply_within(
        &self,
        media: &MediaFixture,
        context: Option<&AdapterContext>,
        budget: Duration,
    ) -> GoldenResult<LiveResult> {
        self.run(media, context, Some(budget))
    }
}

/// Facial feature extraction from video: one row per detected face.
#[derive(Debug, Clone)]
pub struct FaceAdapter {
    name: String,
    bridge: CommandBridge,
}

impl FaceAdapter {
    #[must_use]
    pub fn new(name: impl Into<String>, bridge: CommandBridge) -> Self {
        Self {
            name: name.into(),
            bridge,
        }
    }
    fn run(
        &self,
        media: &MediaFixture,
        context: Option<&AdapterContext>,
        budget: Option<Duration>,
    ) -> GoldenResult<LiveResult> {
        run_bridge(
            &self.name,
            AdapterKind::Face,
            &self.bridge,
            normalize::normalize_face,
            media,
            context,
            budget,
        )
    }
}

impl Adapter for FaceAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Face
    }

    fn apply(&self, media: &MediaFixture, context: Option<&AdapterContext>) -> GoldenResult<LiveResult> {
        self.run(media, context, None)
    }

    fn apply_within(
        &self,
        media: &MediaFixture,
        context: Option<&AdapterContext>,
        budget: Duration,
    ) -> GoldenResult<LiveResult> {
        self.run(media, context, Some(budget))
    }
}

/// Build the leaf adapter matching `kind` around a command bridge.
pub fn command_adapter(
    name: impl Into<String>,
    kind: AdapterKind,
    bridge: CommandBridge,
) -> GoldenResult<Arc<dyn Adapter>> {
    let name = name.into();
    Ok(match kind {
        AdapterKind::Voice => Arc::new(VoiceAdapter::new(name, bridge)),
        AdapterKind::Speaker => Arc::new(SpeakerAdapter::new(name, bridge)),
        AdapterKind::Transcription => Arc::new(TranscriptionAdapter::new(name, bridge)),
        AdapterKind::Face => Arc::new(FaceAdapter::new(name, bridge)),
        AdapterKind::AudioIntegration => {
            return Err(GoldenError::InvalidConfig(format!(
                "adapter `{name}`: audio integration is composed from other adapters, not a command"
            )));
        }
    })
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Adapters available to a harness run, keyed by name.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the adapter previously registered under the same name.
    pub fn register(&mut self, adapter: Arc<dyn Adapter>) -> Option<Arc<dyn Adapter>> {
        self.adapters.insert(adapter.name().to_owned(), adapter)
    }

    #[must_use]
    pub fn with(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, name: &str) -> GoldenResult<Arc<dyn Adapter>> {
        self.adapters
            .get(name)
            .cloned()
            .ok_or_else(|| GoldenError::InvalidConfig(format!("no adapter registered as `{name}`")))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.adapters
                    .values()
                    .map(|adapter| format!("{} ({})", adapter.name(), adapter.kind().as_str())),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::{
        Adapter, AdapterContext, AdapterKind, AdapterRegistry, CommandBridge, FaceAdapter,
        command_adapter,
    };
    use crate::error::{GoldenError, GoldenResult};
    use crate::model::{LiveResult, MediaFixture, Modality};

    struct Fixed(&'static str);

    impl Adapter for Fixed {
        fn name(&self) -> &str {
            self.0
        }
        fn kind(&self) -> AdapterKind {
            AdapterKind::Voice
        }
        fn apply(&self, _: &MediaFixture, _: Option<&AdapterContext>) -> GoldenResult<LiveResult> {
            Ok(LiveResult::new())
        }
    }

    fn audio() -> MediaFixture {
        MediaFixture {
            name: "clip.wav".to_owned(),
            path: PathBuf::from("/nonexistent/clip.wav"),
            modality: Modality::Audio,
        }
    }

    #[test]
    fn only_face_requires_video() {
        assert!(!AdapterKind::Face.accepts(Modality::Audio));
        assert!(AdapterKind::Face.accepts(Modality::Video));
        assert!(AdapterKind::Speaker.accepts(Modality::Video));
        assert!(AdapterKind::Voice.accepts(Modality::Audio));
    }

    #[test]
    fn context_validation() {
        assert!(AdapterContext::default().validate().is_ok());
        let bad_step = AdapterContext {
            time_step_sec: Some(0.0),
            ..AdapterContext::default()
        };
        assert!(matches!(bad_step.validate(), Err(GoldenError::InvalidConfig(_))));
        let bad_clusters = AdapterContext {
            min_clusters: Some(3),
            max_clusters: Some(2),
            ..AdapterContext::default()
        };
        assert!(bad_clusters.validate().is_err());
    }

    #[test]
    fn context_serializes_only_set_fields() {
        let context = AdapterContext {
            language: Some("nl".to_owned()),
            ..AdapterContext::default()
        };
        assert_eq!(
            serde_json::to_value(&context).expect("serialize"),
            serde_json::json!({"language": "nl"})
        );
    }

    #[cfg(unix)]
    #[test]
    fn face_adapter_rejects_audio_before_running_tool() {
        let bridge = CommandBridge::new("sh").expect("sh on PATH").with_args(["-c", "exit 9"]);
        let face = FaceAdapter::new("face", bridge);
        let err = face.apply(&audio(), None).expect_err("audio input");
        assert!(matches!(err, GoldenError::InvalidConfig(_)), "{err:?}");
    }

    #[cfg(unix)]
    #[test]
    fn command_adapter_refuses_integration_kind() {
        let bridge = CommandBridge::new("sh").expect("sh on PATH");
        let result = command_adapter("joined", AdapterKind::AudioIntegration, bridge);
        assert!(matches!(result, Err(GoldenError::InvalidConfig(_))));
    }

    #[test]
    fn registry_lookup_and_replacement() {
        let mut registry = AdapterRegistry::new();
        assert!(registry.register(Arc::new(Fixed("voice"))).is_none());
        assert!(registry.register(Arc::new(Fixed("voice"))).is_some());
        registry.register(Arc::new(Fixed("speaker")));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["speaker", "voice"]);
        assert!(registry.get("voice").is_ok());
        let err = registry.get("face").err().expect("unknown adapter");
        assert!(err.to_string().contains("`face`"), "{err}");
        assert!(format!("{registry:?}").contains("voice (voice)"));
    }
}
