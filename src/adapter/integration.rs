//! Joins speaker turns onto the voice feature time grid.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{Adapter, AdapterContext, AdapterKind};
use crate::error::{GoldenError, GoldenResult};
use crate::model::{FieldValue, LiveResult, MediaFixture, Scalar, StructuredResult, Track};

pub struct AudioIntegrationAdapter {
    name: String,
    speaker: Arc<dyn Adapter>,
    voice: Arc<dyn Adapter>,
}

impl AudioIntegrationAdapter {
    pub fn new(
        name: impl Into<String>,
        speaker: Arc<dyn Adapter>,
        voice: Arc<dyn Adapter>,
    ) -> GoldenResult<Self> {
        let name = name.into();
        for (role, adapter, expected) in [
            ("speaker", &speaker, AdapterKind::Speaker),
            ("voice", &voice, AdapterKind::Voice),
        ] {
            if adapter.kind() != expected {
                return Err(GoldenError::InvalidConfig(format!(
                    "adapter `{name}`: {role} stage `{}` is a {} adapter",
                    adapter.name(),
                    adapter.kind().as_str()
                )));
            }
        }
        Ok(Self {
            name,
            speaker,
            voice,
        })
    }

    fn failure(&self, reason: String) -> GoldenError {
        GoldenError::PipelineExecution {
            adapter: self.name.clone(),
            reason,
        }
    }

    fn join(&self, speakers: &LiveResult, mut features: LiveResult) -> GoldenResult<LiveResult> {
        let tracks = speakers
            .get("tracks")
            .and_then(FieldValue::as_tracks)
            .ok_or_else(|| self.failure(format!("`{}` returned no speaker tracks", self.speaker.name())))?;
        let times = features
            .get("time")
            .and_then(FieldValue::as_f64_vec)
            .ok_or_else(|| self.failure(format!("`{}` returned no numeric `time` column", self.voice.name())))?;

        let joined = integrate(tracks, &times);
        tracing::debug!(
            adapter = %self.name,
            frames = times.len(),
            tracks = tracks.len(),
            "joined speaker turns onto voice frames"
        );
        features.extend(joined);
        Ok(features)
    }
}

impl Adapter for AudioIntegrationAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::AudioIntegration
    }

    fn apply(&self, media: &MediaFixture, context: Option<&AdapterContext>) -> GoldenResult<LiveResult> {
        let speakers = self.speaker.apply(media, context)?;
        let features = self.voice.apply(media, context)?;
        self.join(&speakers, features)
    }

    /// Both stages share `budget`; the voice stage gets what speaker left.
    fn apply_within(
        &self,
        media: &MediaFixture,
        context: Option<&AdapterContext>,
        budget: Duration,
    ) -> GoldenResult<LiveResult> {
        let clock = Instant::now();
        let speakers = self.speaker.apply_within(media, context, budget)?;
        let remaining = budget.saturating_sub(clock.elapsed());
        let features = self.voice.apply_within(media, context, remaining)?;
        self.join(&speakers, features)
    }
}

/// For every frame time, the first track (in time order) covering it.
///
/// Produces `segment_id`, `segment_start`, `segment_end` and
/// `speaker_label` columns; frames outside every track get `null`.
#[must_use]
pub fn integrate(tracks: &[Track], times: &[f64]) -> StructuredResult {
    let mut segment_id = Vec::with_capacity(times.len());
    let mut segment_start = Vec::with_capacity(times.len());
    let mut segment_end = Vec::with_capacity(times.len());
    let mut speaker_label = Vec::with_capacity(times.len());

    for &time in times {
        match tracks.iter().enumerate().find(|(_, track)| track.contains(time)) {
            Some((index, track)) => {
                segment_id.push(Scalar::Integer(i64::try_from(index).unwrap_or(i64::MAX)));
                segment_start.push(Scalar::Float(track.start));
                segment_end.push(Scalar::Float(track.end));
                speaker_label.push(Scalar::Text(track.label.clone()));
            }
            None => {
                segment_id.push(Scalar::Null);
                segment_start.push(Scalar::Null);
                segment_end.push(Scalar::Null);
                speaker_label.push(Scalar::Null);
            }
        }
    }

    StructuredResult::new()
        .with("segment_id", FieldValue::Sequence(segment_id))
        .with("segment_start", FieldValue::Sequence(segment_start))
        .with("segment_end", FieldValue::Sequence(segment_end))
        .with("speaker_label", FieldValue::Sequence(speaker_label))
}
