//! Read-only access to sample media and golden reference outputs.

use std::path::{Path, PathBuf};

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::annotation::{self, TrackPolicy};
use crate::error::{GoldenError, GoldenResult};
use crate::model::{MediaFixture, Modality, ReferenceResult, StructuredResult};

/// Root of an on-disk fixture tree. Holds only a path, so it is cheap to
/// clone and safe to share between concurrent readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureStore {
    root: PathBuf,
}

impl FixtureStore {
    pub fn open(root: impl Into<PathBuf>) -> GoldenResult<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(GoldenError::FixtureNotFound {
                name: "<fixture root>".to_owned(),
                path: root,
            });
        }
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Names are relative to the root; absolute names are used as given.
    #[must_use]
    pub fn path_for(&self, name: &str) -> PathBuf {
        let candidate = Path::new(name);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        }
    }

    pub fn resolve_media(&self, name: &str) -> GoldenResult<MediaFixture> {
        let path = self.path_for(name);
        if !path.is_file() {
            return Err(GoldenError::FixtureNotFound {
                name: name.to_owned(),
                path,
            });
        }
        let modality = Modality::from_path(&path).ok_or_else(|| {
            GoldenError::InvalidConfig(format!(
                "media fixture `{name}` has an unrecognized extension"
            ))
        })?;
        let path = std::fs::canonicalize(&path)?;
        tracing::debug!(fixture = name, modality = modality.as_str(), "resolved media");
        Ok(MediaFixture {
            name: name.to_owned(),
            path,
            modality,
        })
    }

    pub fn load_reference(&self, name: &str) -> GoldenResult<ReferenceResult> {
        let path = self.path_for(name);
        if !path.is_file() {
            return Err(GoldenError::FixtureNotFound {
                name: name.to_owned(),
                path,
            });
        }

        let bytes = std::fs::read(&path)?;
        let sha256 = sha256_bytes_hex(&bytes);
        let parse_error = |reason: String| GoldenError::FixtureParse {
            name: name.to_owned(),
            reason,
        };

        let raw: Value =
            serde_json::from_slice(&bytes).map_err(|err| parse_error(err.to_string()))?;
        let result = StructuredResult::from_json(&raw).map_err(parse_error)?;
        for (field, value) in result.iter() {
            if let Some(tracks) = value.as_tracks() {
                annotation::validate_tracks(tracks, TrackPolicy::default())
                    .map_err(|reason| parse_error(format!("field `{field}`: {reason}")))?;
            }
        }

        tracing::debug!(
            fixture = name,
            fields = result.len(),
            sha256 = %sha256,
            "loaded reference"
        );
        Ok(ReferenceResult {
            name: name.to_owned(),
            path,
            sha256,
            result,
        })
    }
}

#[must_use]
pub fn sha256_bytes_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::{FixtureStore, sha256_bytes_hex};
    use crate::error::GoldenError;
    use crate::model::{FieldValue, Modality};

    fn store_with(files: &[(&str, &str)]) -> (tempfile::TempDir, FixtureStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        for (name, contents) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).expect("mkdir");
            }
            std::fs::write(path, contents).expect("write fixture");
        }
        let store = FixtureStore::open(dir.path()).expect("open store");
        (dir, store)
    }

    #[test]
    fn open_requires_existing_directory() {
        let err = FixtureStore::open("/definitely/not/a/fixture/root").expect_err("missing");
        assert!(matches!(err, GoldenError::FixtureNotFound { .. }), "{err:?}");
    }

    #[test]
    fn resolves_media_with_modality() {
        let (_dir, store) = store_with(&[("media/clip.wav", ""), ("media/clip.mp4", "")]);
        let audio = store.resolve_media("media/clip.wav").expect("audio");
        assert_eq!(audio.modality, Modality::Audio);
        assert!(audio.path.is_absolute());
        let video = store.resolve_media("media/clip.mp4").expect("video");
        assert_eq!(video.modality, Modality::Video);
    }

    #[test]
    fn missing_media_is_fixture_not_found() {
        let (_dir, store) = store_with(&[]);
        let err = store.resolve_media("media/absent.wav").expect_err("missing");
        match err {
            GoldenError::FixtureNotFound { name, path } => {
                assert_eq!(name, "media/absent.wav");
                assert!(path.ends_with("media/absent.wav"));
            }
            other => panic!("expected FixtureNotFound, got {other:?}"),
        }
    }

    #[test]
    fn unknown_extension_is_invalid_config() {
        let (_dir, store) = store_with(&[("notes.txt", "")]);
        let err = store.resolve_media("notes.txt").expect_err("not media");
        assert!(matches!(err, GoldenError::InvalidConfig(_)), "{err:?}");
    }

    #[test]
    fn loads_feature_table_with_hash() {
        let body = r#"{"frame": [0, 1], "prob": [0.99, 0.98]}"#;
        let (_dir, store) = store_with(&[("ref.json", body)]);
        let reference = store.load_reference("ref.json").expect("reference");
        assert_eq!(reference.sha256, sha256_bytes_hex(body.as_bytes()));
        assert_eq!(reference.sha256.len(), 64);
        assert_eq!(reference.result.len(), 2);
    }

    #[test]
    fn loads_annotation_as_tracks_and_labels() {
        let body = r#"{"pyannote": "Annotation", "content": [
            {"segment": {"start": 0.0, "end": 1.0}, "track": "A", "label": "SPEAKER_00"}
        ], "uri": "clip", "modality": "speaker"}"#;
        let (_dir, store) = store_with(&[("speakers.json", body)]);
        let reference = store.load_reference("speakers.json").expect("annotation");
        assert!(matches!(
            reference.result.get("tracks"),
            Some(FieldValue::Tracks(tracks)) if tracks.len() == 1
        ));
        assert!(reference.result.contains("labels"));
    }

    #[test]
    fn malformed_reference_is_fixture_parse() {
        let (_dir, store) = store_with(&[("broken.json", "{not json"), ("ragged.json", r#"{"box": [[1], [1, 2]]}"#)]);
        for name in ["broken.json", "ragged.json"] {
            let err = store.load_reference(name).expect_err("unparseable");
            match err {
                GoldenError::FixtureParse { name: got, .. } => assert_eq!(got, name),
                other => panic!("expected FixtureParse, got {other:?}"),
            }
        }
    }

    #[test]
    fn corrupt_reference_timeline_is_fixture_parse() {
        let inverted = r#"{"content": [{"segment": {"start": 3.0, "end": 1.0}, "track": "A", "label": "SPEAKER_00"}]}"#;
        let unlabelled = r#"{"content": [{"segment": {"start": 0.0, "end": 1.0}, "track": "A", "label": ""}]}"#;
        let segments = r#"{"transcription": "hallo", "segments": [{"start": 2.0, "end": 0.5, "label": "hallo"}]}"#;
        let (_dir, store) = store_with(&[
            ("inverted.json", inverted),
            ("unlabelled.json", unlabelled),
            ("segments.json", segments),
        ]);
        for name in ["inverted.json", "unlabelled.json", "segments.json"] {
            match store.load_reference(name) {
                Err(GoldenError::FixtureParse { name: got, reason }) => {
                    assert_eq!(got, name);
                    assert!(reason.starts_with("field `"), "{reason}");
                }
                other => panic!("{name}: expected FixtureParse, got {other:?}"),
            }
        }
    }

    #[test]
    fn missing_reference_is_fixture_not_found() {
        let (_dir, store) = store_with(&[]);
        assert!(matches!(
            store.load_reference("nope.json"),
            Err(GoldenError::FixtureNotFound { .. })
        ));
    }
}
