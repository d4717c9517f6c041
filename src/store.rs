//! On-disk persistence for a fitted forest.
//!
//! The artifact is a JSON envelope carrying a format version, provenance and a
//! SHA-256 checksum of the serialized forest. Loading verifies all three
//! before handing the forest out.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{GradeError, Result};
use crate::forest::RandomForest;

pub const FORMAT_VERSION: u32 = 1;

/// Default artifact location used by the CLI.
pub const DEFAULT_MODEL_PATH: &str = "models/grade_predictor.json";

#[derive(Serialize, Deserialize)]
struct ModelArtifact {
    format_version: u32,
    model_id: Uuid,
    trained_at: DateTime<Utc>,
    checksum: String,
    model: RandomForest,
}

/// Provenance of a stored model.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactInfo {
    pub model_id: Uuid,
    pub trained_at: DateTime<Utc>,
    pub checksum: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ModelStore {
    path: PathBuf,
}

impl ModelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the model to a temporary sibling, then renames it into place.
    /// Refuses forests that would not load back, such as ones with NaN leaves.
    pub fn save(&self, model: &RandomForest) -> Result<ArtifactInfo> {
        model.check_structure().map_err(|reason| {
            GradeError::InvalidArgument(format!("refusing to save unloadable model: {reason}"))
        })?;
        let checksum = checksum(model).map_err(|err| self.corrupt(err.to_string()))?;
        let artifact = ModelArtifact {
            format_version: FORMAT_VERSION,
            model_id: Uuid::new_v4(),
            trained_at: Utc::now(),
            checksum,
            model: model.clone(),
        };
        let bytes = serde_json::to_vec(&artifact).map_err(|err| self.corrupt(err.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| GradeError::io(parent, err))?;
        }
        let staging = self.staging_path();
        fs::write(&staging, &bytes).map_err(|err| GradeError::io(&staging, err))?;
        fs::rename(&staging, &self.path).map_err(|err| GradeError::io(&self.path, err))?;

        info!(
            path = %self.path.display(),
            model_id = %artifact.model_id,
            checksum = %artifact.checksum,
            bytes = bytes.len(),
            "saved model"
        );

        Ok(ArtifactInfo {
            model_id: artifact.model_id,
            trained_at: artifact.trained_at,
            checksum: artifact.checksum,
            path: self.path.clone(),
        })
    }

    pub fn load(&self) -> Result<RandomForest> {
        self.load_with_info().map(|(model, _)| model)
    }

    pub fn load_with_info(&self) -> Result<(RandomForest, ArtifactInfo)> {
        let bytes = fs::read(&self.path).map_err(|err| GradeError::io(&self.path, err))?;
        let artifact: ModelArtifact = serde_json::from_slice(&bytes)
            .map_err(|err| self.corrupt(format!("undecodable artifact: {err}")))?;

        if artifact.format_version != FORMAT_VERSION {
            return Err(self.corrupt(format!(
                "unsupported format version {} (expected {FORMAT_VERSION})",
                artifact.format_version
            )));
        }

        let computed = checksum(&artifact.model).map_err(|err| self.corrupt(err.to_string()))?;
        if computed != artifact.checksum {
            warn!(
                path = %self.path.display(),
                expected = %artifact.checksum,
                computed = %computed,
                "model checksum mismatch"
            );
            return Err(self.corrupt(format!(
                "checksum mismatch: expected {}, computed {computed}",
                artifact.checksum
            )));
        }

        artifact
            .model
            .check_structure()
            .map_err(|reason| self.corrupt(reason))?;

        info!(
            path = %self.path.display(),
            model_id = %artifact.model_id,
            trees = artifact.model.trees().len(),
            "loaded model"
        );

        let info = ArtifactInfo {
            model_id: artifact.model_id,
            trained_at: artifact.trained_at,
            checksum: artifact.checksum,
            path: self.path.clone(),
        };
        Ok((artifact.model, info))
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn corrupt(&self, reason: impl Into<String>) -> GradeError {
        GradeError::Corrupt {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }
}

/// Hex SHA-256 of the forest's JSON encoding.
fn checksum(model: &RandomForest) -> serde_json::Result<String> {
    let encoded = serde_json::to_vec(model)?;
    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    Ok(hex::encode(hasher.finalize()))
}
