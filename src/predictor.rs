//! Inference: evaluate the loaded model, clamp, band.

use std::sync::Arc;

use tracing::debug;

use crate::error::{GradeError, Result};
use crate::forest::RandomForest;
use crate::models::{FeatureRecord, PredictionResult, FEATURE_NAMES, N_FEATURES};
use crate::store::ModelStore;

/// Anything that maps a feature vector in `FEATURE_NAMES` order to a raw grade.
pub trait GradeModel: Send + Sync {
    fn estimate(&self, features: &[f64; N_FEATURES]) -> f64;
}

/// Read-only handle over a loaded model. Cloning shares the model.
#[derive(Debug)]
pub struct GradePredictor<M = RandomForest> {
    model: Arc<M>,
}

impl<M> Clone for GradePredictor<M> {
    fn clone(&self) -> Self {
        Self {
            model: Arc::clone(&self.model),
        }
    }
}

impl GradePredictor<RandomForest> {
    /// Loads the model once; the returned predictor never touches storage again.
    pub fn load(store: &ModelStore) -> Result<Self> {
        Ok(Self::new(store.load()?))
    }
}

impl<M: GradeModel> GradePredictor<M> {
    pub fn new(model: M) -> Self {
        Self {
            model: Arc::new(model),
        }
    }

    pub fn from_shared(model: Arc<M>) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn predict(&self, record: &FeatureRecord) -> Result<PredictionResult> {
        let features = record.to_array();
        if let Some(index) = features.iter().position(|value| !value.is_finite()) {
            return Err(GradeError::InvalidInput(format!(
                "{} must be a finite number, got {}",
                FEATURE_NAMES[index], features[index]
            )));
        }

        let raw = self.model.estimate(&features);
        if !raw.is_finite() {
            return Err(GradeError::InvalidInput(format!(
                "model produced a non-finite grade ({raw}) for this record"
            )));
        }

        let result = PredictionResult::from_grade(clamp_grade(raw));
        debug!(raw, grade = result.grade, band = result.band.label(), "predicted grade");
        Ok(result)
    }

    /// Positional entry point in the fixed column order.
    pub fn predict_values(
        &self,
        hours_studied: f64,
        attendance: f64,
        previous_score: f64,
        assignment_score: f64,
        sleep_hours: f64,
        participation: i32,
    ) -> Result<PredictionResult> {
        self.predict(&FeatureRecord::new(
            hours_studied,
            attendance,
            previous_score,
            assignment_score,
            sleep_hours,
            participation,
        ))
    }
}

pub fn clamp_grade(raw: f64) -> f64 {
    raw.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Band;

    /// Returns a fixed value regardless of input.
    struct Constant(f64);

    impl GradeModel for Constant {
        fn estimate(&self, _features: &[f64; N_FEATURES]) -> f64 {
            self.0
        }
    }

    /// Echoes hours studied so inputs map straight to grades.
    struct EchoHours;

    impl GradeModel for EchoHours {
        fn estimate(&self, features: &[f64; N_FEATURES]) -> f64 {
            features[0]
        }
    }

    fn record() -> FeatureRecord {
        FeatureRecord::new(15.0, 75.0, 70.0, 75.0, 7.0, 3)
    }

    #[test]
    fn clamps_out_of_range_estimates() {
        let high = GradePredictor::new(Constant(131.0)).predict(&record()).unwrap();
        assert_eq!(high.grade, 100.0);
        assert_eq!(high.band, Band::Outstanding);

        let low = GradePredictor::new(Constant(-12.0)).predict(&record()).unwrap();
        assert_eq!(low.grade, 0.0);
        assert_eq!(low.band, Band::Poor);
    }

    #[test]
    fn out_of_range_inputs_are_accepted_then_clamped() {
        let predictor = GradePredictor::new(EchoHours);
        let wild = FeatureRecord::new(400.0, -5.0, 1_000.0, 0.0, 30.0, 12);
        let result = predictor.predict(&wild).unwrap();
        assert_eq!(result.grade, 100.0);

        let negative = FeatureRecord::new(-40.0, 50.0, 40.0, 40.0, 4.0, 1);
        assert_eq!(predictor.predict(&negative).unwrap().grade, 0.0);
    }

    #[test]
    fn band_boundaries_follow_the_grade() {
        let predictor = GradePredictor::new(EchoHours);
        let cases = [
            (90.0, Band::Outstanding, "#22c55e"),
            (89.999, Band::Great, "#3b82f6"),
            (70.0, Band::Good, "#f59e0b"),
            (65.0, Band::Fair, "#ef4444"),
            (12.0, Band::Poor, "#991b1b"),
        ];
        for (grade, band, color) in cases {
            let result = predictor
                .predict_values(grade, 80.0, 70.0, 70.0, 7.0, 3)
                .unwrap();
            assert_eq!(result.grade, grade);
            assert_eq!(result.band, band);
            assert_eq!(result.color, color);
            assert_eq!(result.message, band.message());
        }
    }

    #[test]
    fn non_finite_input_is_rejected() {
        let predictor = GradePredictor::new(Constant(70.0));
        let bad = FeatureRecord::new(10.0, f64::NAN, 70.0, 70.0, 7.0, 3);
        match predictor.predict(&bad) {
            Err(GradeError::InvalidInput(message)) => assert!(message.contains("attendance")),
            other => panic!("expected InvalidInput, got {other:?}"),
        }

        let infinite = FeatureRecord::new(10.0, 80.0, 70.0, 70.0, f64::INFINITY, 3);
        assert!(matches!(
            predictor.predict(&infinite),
            Err(GradeError::InvalidInput(_))
        ));
    }

    #[test]
    fn non_finite_estimate_is_not_defaulted() {
        let predictor = GradePredictor::new(Constant(f64::NAN));
        assert!(matches!(
            predictor.predict(&record()),
            Err(GradeError::InvalidInput(_))
        ));
    }

    #[test]
    fn positional_entry_matches_record_entry() {
        let predictor = GradePredictor::new(EchoHours);
        let by_record = predictor.predict(&record()).unwrap();
        let by_values = predictor
            .predict_values(15.0, 75.0, 70.0, 75.0, 7.0, 3)
            .unwrap();
        assert_eq!(by_record, by_values);
    }

    #[test]
    fn shared_predictor_serves_concurrent_callers() {
        let predictor = GradePredictor::new(EchoHours);
        std::thread::scope(|scope| {
            for worker in 0..8 {
                let predictor = predictor.clone();
                scope.spawn(move || {
                    for step in 0..100 {
                        let hours = f64::from(worker * 10 + step % 10);
                        let result = predictor
                            .predict_values(hours, 80.0, 70.0, 70.0, 7.0, 3)
                            .unwrap();
                        assert_eq!(result.grade, hours);
                    }
                });
            }
        });
    }
}
