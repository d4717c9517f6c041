//! Train/test split, forest fitting and held-out evaluation.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

use crate::dataset::{self, LABEL_COLUMN};
use crate::error::{GradeError, Result};
use crate::forest::{ForestConfig, RandomForest};
use crate::models::{EvaluationReport, FeatureImportance, LabeledRecord, FEATURE_NAMES, N_FEATURES};
use crate::report;
use crate::store::{ArtifactInfo, ModelStore};

#[derive(Debug, Clone)]
pub struct TrainerConfig {
    /// Share of the table held out for evaluation, strictly between 0 and 1.
    pub test_fraction: f64,
    /// Drives both the split permutation and tree construction.
    pub seed: u64,
    pub forest: ForestConfig,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            seed: 42,
            forest: ForestConfig::default(),
        }
    }
}

/// Row indices of each partition, in permutation order.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Shuffles `0..n` with the seed; the first `ceil(n * test_fraction)` rows are
/// held out and the rest train.
///
/// The product is rounded up as computed in floating point, so a fraction
/// that is not exactly representable can hold out one extra row: 0.3 of 10
/// rows is `3.0000000000000004` and holds out 4.
pub fn split_indices(n: usize, test_fraction: f64, seed: u64) -> Result<Split> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(GradeError::InvalidArgument(format!(
            "test fraction must lie strictly between 0 and 1, got {test_fraction}"
        )));
    }
    if n == 0 {
        return Err(GradeError::InvalidArgument(
            "cannot split an empty table".to_string(),
        ));
    }

    let n_test = (test_fraction * n as f64).ceil() as usize;
    if n_test >= n {
        return Err(GradeError::InvalidArgument(format!(
            "test fraction {test_fraction} leaves no training rows out of {n}"
        )));
    }

    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    order.shuffle(&mut rng);
    let train = order.split_off(n_test);

    Ok(Split { train, test: order })
}

/// Fits a forest on the training partition and evaluates it on the held-out rows.
pub fn train(
    table: &[LabeledRecord],
    config: &TrainerConfig,
) -> Result<(RandomForest, EvaluationReport)> {
    if table.is_empty() {
        return Err(GradeError::InvalidArgument(
            "training table is empty".to_string(),
        ));
    }
    config.forest.validate()?;
    check_finite(table)?;

    let split = split_indices(table.len(), config.test_fraction, config.seed)?;
    let (train_x, train_y) = columns(table, &split.train);
    let (test_x, test_y) = columns(table, &split.test);

    info!(
        train = train_x.len(),
        test = test_x.len(),
        seed = config.seed,
        "split training table"
    );

    let model = RandomForest::fit(&train_x, &train_y, &config.forest, config.seed)?;
    let predicted: Vec<f64> = test_x.iter().map(|row| model.predict(row)).collect();

    let report = EvaluationReport {
        train_size: train_x.len(),
        test_size: test_x.len(),
        mean_absolute_error: mean_absolute_error(&test_y, &predicted),
        r2: r2_score(&test_y, &predicted),
        importances: rank_importances(model.feature_importances()),
    };

    info!(
        mae = report.mean_absolute_error,
        r2 = report.r2,
        "evaluated model on held-out rows"
    );

    Ok((model, report))
}

/// Rejects the first NaN or infinite cell, naming its row and column.
fn check_finite(table: &[LabeledRecord]) -> Result<()> {
    for (row, record) in table.iter().enumerate() {
        let features = record.features.to_array();
        let bad = features
            .iter()
            .position(|value| !value.is_finite())
            .map(|index| (FEATURE_NAMES[index], features[index]))
            .or_else(|| {
                (!record.final_grade.is_finite()).then_some((LABEL_COLUMN, record.final_grade))
            });
        if let Some((column, value)) = bad {
            return Err(GradeError::InvalidArgument(format!(
                "row {row} has non-finite {column} ({value})"
            )));
        }
    }
    Ok(())
}

/// Inputs of the offline training command.
#[derive(Debug, Clone)]
pub struct TrainingRun {
    pub samples: usize,
    pub data_path: PathBuf,
    pub model_path: PathBuf,
    /// Markdown report with the evaluation, written when set.
    pub report_path: Option<PathBuf>,
    pub config: TrainerConfig,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub evaluation: EvaluationReport,
    pub artifact: ArtifactInfo,
}

/// Generates and saves the table, trains, prints statistics and evaluation
/// to `out`, then saves the model.
pub fn run<W: Write>(job: &TrainingRun, mut out: W) -> Result<RunOutcome> {
    let records = dataset::generate(job.samples, job.config.seed)?;
    dataset::write_csv(&records, &job.data_path)?;
    let summaries = dataset::summarize(&records);

    writeln!(
        out,
        "Dataset saved to {}! Shape: ({}, 7)",
        job.data_path.display(),
        records.len()
    )?;
    writeln!(out)?;
    writeln!(out, "Dataset Statistics:")?;
    write!(out, "{}", report::render_summary_table(&summaries))?;
    writeln!(out)?;

    let (model, evaluation) = train(&records, &job.config)?;
    write!(out, "{}", report::render_evaluation(&evaluation))?;

    let artifact = ModelStore::new(&job.model_path).save(&model)?;

    if let Some(path) = &job.report_path {
        let markdown = report::build_report(
            &job.data_path.display().to_string(),
            &summaries,
            &report::summarize_by_band(&records),
            Some(&evaluation),
        );
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| GradeError::io(parent, err))?;
        }
        fs::write(path, markdown).map_err(|err| GradeError::io(path, err))?;
        writeln!(out)?;
        writeln!(out, "Report written to {}.", path.display())?;
    }

    writeln!(out)?;
    writeln!(
        out,
        "Model saved to {} (checksum {}).",
        artifact.path.display(),
        artifact.checksum
    )?;
    out.flush()?;

    Ok(RunOutcome {
        evaluation,
        artifact,
    })
}

fn columns(table: &[LabeledRecord], rows: &[usize]) -> (Vec<[f64; N_FEATURES]>, Vec<f64>) {
    rows.iter()
        .map(|&row| (table[row].features.to_array(), table[row].final_grade))
        .unzip()
}

pub fn mean_absolute_error(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let total: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).abs())
        .sum();
    total / actual.len() as f64
}

/// Coefficient of determination. With a constant target the score is 1.0 for a
/// perfect fit and 0.0 otherwise.
pub fn r2_score(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let mean = actual.iter().sum::<f64>() / actual.len() as f64;
    let ss_res: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();

    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

/// Pairs importances with column names, descending.
pub fn rank_importances(importances: &[f64]) -> Vec<FeatureImportance> {
    let mut ranked: Vec<FeatureImportance> = FEATURE_NAMES
        .iter()
        .zip(importances)
        .map(|(name, importance)| FeatureImportance {
            feature: name.to_string(),
            importance: *importance,
        })
        .collect();
    ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset;

    fn quick_config(seed: u64) -> TrainerConfig {
        TrainerConfig {
            test_fraction: 0.2,
            seed,
            forest: ForestConfig {
                n_trees: 20,
                ..ForestConfig::default()
            },
        }
    }

    #[test]
    fn five_records_split_four_to_one() {
        let table = dataset::generate(5, 0).unwrap();
        let (_, report) = train(&table, &quick_config(0)).unwrap();
        assert_eq!(report.train_size, 4);
        assert_eq!(report.test_size, 1);
    }

    #[test]
    fn split_is_reproducible_and_disjoint() {
        let first = split_indices(1_000, 0.2, 42).unwrap();
        let second = split_indices(1_000, 0.2, 42).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.test.len(), 200);
        assert_eq!(first.train.len(), 800);

        let mut all: Vec<usize> = first.train.iter().chain(&first.test).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..1_000).collect::<Vec<_>>());

        let other = split_indices(1_000, 0.2, 43).unwrap();
        assert_ne!(first.test, other.test);
    }

    #[test]
    fn rejects_bad_arguments() {
        let table = dataset::generate(10, 1).unwrap();
        for fraction in [0.0, 1.0, -0.1, 1.5, f64::NAN] {
            let config = TrainerConfig {
                test_fraction: fraction,
                ..quick_config(1)
            };
            assert!(
                matches!(train(&table, &config), Err(GradeError::InvalidArgument(_))),
                "fraction {fraction} should be rejected"
            );
        }
        assert!(matches!(
            train(&[], &quick_config(1)),
            Err(GradeError::InvalidArgument(_))
        ));
        assert!(matches!(
            split_indices(1, 0.5, 0),
            Err(GradeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn non_finite_cells_are_rejected_with_location() {
        let mut table = dataset::generate(20, 4).unwrap();
        table[3].final_grade = f64::NAN;
        match train(&table, &quick_config(4)) {
            Err(GradeError::InvalidArgument(message)) => {
                assert!(message.contains("row 3"), "{message}");
                assert!(message.contains("final_grade"), "{message}");
            }
            other => panic!("expected InvalidArgument, got {other:?}"),
        }

        let mut table = dataset::generate(20, 4).unwrap();
        table[7].features.attendance = f64::INFINITY;
        match train(&table, &quick_config(4)) {
            Err(GradeError::InvalidArgument(message)) => {
                assert!(message.contains("row 7"), "{message}");
                assert!(message.contains("attendance"), "{message}");
            }
            other => panic!("expected InvalidArgument, got {other:?}"),
        }
    }

    #[test]
    fn inexact_fraction_rounds_up() {
        let split = split_indices(10, 0.3, 0).unwrap();
        assert_eq!(split.test.len(), 4);
        assert_eq!(split.train.len(), 6);
    }

    #[test]
    fn metrics_match_hand_computed_values() {
        let actual = [3.0, -0.5, 2.0, 7.0];
        let predicted = [2.5, 0.0, 2.0, 8.0];
        assert!((mean_absolute_error(&actual, &predicted) - 0.5).abs() < 1e-12);
        assert!((r2_score(&actual, &predicted) - 0.948_608_137_044_967_9).abs() < 1e-12);

        assert_eq!(r2_score(&[4.0], &[4.0]), 1.0);
        assert_eq!(r2_score(&[4.0], &[5.0]), 0.0);
    }

    #[test]
    fn importances_are_ranked_descending() {
        let ranked = rank_importances(&[0.1, 0.05, 0.4, 0.2, 0.15, 0.1]);
        let names: Vec<&str> = ranked.iter().map(|f| f.feature.as_str()).collect();
        assert_eq!(names[0], "previous_score");
        assert_eq!(names[1], "assignment_score");
        assert!(ranked.windows(2).all(|w| w[0].importance >= w[1].importance));
    }

    #[test]
    fn fits_the_synthetic_formula() {
        let table = dataset::generate(1_000, 42).unwrap();
        let (_, report) = train(&table, &quick_config(42)).unwrap();

        assert_eq!(report.train_size, 800);
        assert_eq!(report.test_size, 200);
        assert!(report.r2 > 0.6, "r2 {}", report.r2);
        assert!(report.mean_absolute_error < 4.5, "mae {}", report.mean_absolute_error);

        let total: f64 = report.importances.iter().map(|f| f.importance).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert_eq!(report.importances[0].feature, "previous_score");
    }

    #[test]
    fn training_is_deterministic() {
        let table = dataset::generate(300, 8).unwrap();
        let (first_model, first_report) = train(&table, &quick_config(8)).unwrap();
        let (second_model, second_report) = train(&table, &quick_config(8)).unwrap();
        assert_eq!(first_model, second_model);
        assert_eq!(first_report.r2.to_bits(), second_report.r2.to_bits());
    }
}
