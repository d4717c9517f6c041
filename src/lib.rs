//! Student final-grade prediction.
//!
//! Offline: [`dataset::generate`] builds a seeded synthetic table,
//! [`trainer::train`] fits a bagged regression forest and reports held-out
//! metrics, and [`ModelStore`] persists the forest. Online: a
//! [`GradePredictor`] wraps the loaded forest and turns six feature values into
//! a clamped grade with its band, message and color.

pub mod dataset;
pub mod error;
pub mod forest;
pub mod models;
pub mod predictor;
pub mod report;
pub mod store;
pub mod trainer;

pub use error::{GradeError, Result};
pub use forest::{ForestConfig, MaxFeatures, RandomForest};
pub use models::{
    Band, EvaluationReport, FeatureImportance, FeatureRecord, LabeledRecord, PredictionResult,
    FEATURE_NAMES,
};
pub use predictor::{GradeModel, GradePredictor};
pub use store::{ArtifactInfo, ModelStore};
pub use trainer::TrainerConfig;
