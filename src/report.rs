use std::fmt::Write;

use crate::models::{Band, BandSummary, ColumnSummary, EvaluationReport, LabeledRecord};

/// Label counts per band, best band first. Empty bands are kept.
pub fn summarize_by_band(records: &[LabeledRecord]) -> Vec<BandSummary> {
    Band::ALL
        .iter()
        .map(|&band| {
            let grades: Vec<f64> = records
                .iter()
                .map(|record| record.final_grade)
                .filter(|&grade| Band::from_grade(grade) == band)
                .collect();
            let count = grades.len();
            BandSummary {
                band,
                count,
                avg_grade: if count == 0 {
                    0.0
                } else {
                    grades.iter().sum::<f64>() / count as f64
                },
            }
        })
        .collect()
}

/// Fixed-width table of column statistics for terminal output.
pub fn render_summary_table(summaries: &[ColumnSummary]) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "{:<18} {:>6} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}",
        "column", "count", "mean", "std", "min", "25%", "50%", "75%", "max"
    );
    for s in summaries {
        let _ = writeln!(
            output,
            "{:<18} {:>6} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>8.2}",
            s.column, s.count, s.mean, s.std, s.min, s.p25, s.p50, s.p75, s.max
        );
    }
    output
}

pub fn render_evaluation(report: &EvaluationReport) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "Train size: {}, Test size: {}",
        report.train_size, report.test_size
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "Model Performance:");
    let _ = writeln!(
        output,
        "   Mean Absolute Error: {:.2}",
        report.mean_absolute_error
    );
    let _ = writeln!(output, "   R² Score: {:.4}", report.r2);
    let _ = writeln!(output);
    let _ = writeln!(output, "Feature Importance:");
    for (rank, entry) in report.importances.iter().enumerate() {
        let _ = writeln!(
            output,
            "{:>3}. {:<18} {:.4}",
            rank + 1,
            entry.feature,
            entry.importance
        );
    }
    output
}

pub fn build_report(
    data_label: &str,
    summaries: &[ColumnSummary],
    bands: &[BandSummary],
    evaluation: Option<&EvaluationReport>,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Student Grade Dataset Report");
    let rows = summaries.first().map(|s| s.count).unwrap_or(0);
    let _ = writeln!(output, "Generated for {} ({} records)", data_label, rows);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Column Statistics");

    if rows == 0 {
        let _ = writeln!(output, "No records in this dataset.");
    } else {
        let _ = writeln!(output, "| column | mean | std | min | median | max |");
        let _ = writeln!(output, "|---|---:|---:|---:|---:|---:|");
        for s in summaries {
            let _ = writeln!(
                output,
                "| {} | {:.2} | {:.2} | {:.2} | {:.2} | {:.2} |",
                s.column, s.mean, s.std, s.min, s.p50, s.max
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Grade Bands");

    if rows == 0 {
        let _ = writeln!(output, "No grades recorded.");
    } else {
        for summary in bands {
            let _ = writeln!(
                output,
                "- {}: {} students (avg grade {:.1})",
                summary.band.label(),
                summary.count,
                summary.avg_grade
            );
        }
    }

    if let Some(evaluation) = evaluation {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Model Evaluation");
        let _ = writeln!(
            output,
            "- Held-out rows: {} (trained on {})",
            evaluation.test_size, evaluation.train_size
        );
        let _ = writeln!(
            output,
            "- Mean absolute error: {:.2}",
            evaluation.mean_absolute_error
        );
        let _ = writeln!(output, "- R²: {:.4}", evaluation.r2);
        let _ = writeln!(output);
        let _ = writeln!(output, "### Feature Importance");
        for entry in &evaluation.importances {
            let _ = writeln!(output, "- {}: {:.4}", entry.feature, entry.importance);
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset;
    use crate::models::{FeatureImportance, FeatureRecord};

    fn record(grade: f64) -> LabeledRecord {
        LabeledRecord {
            features: FeatureRecord::new(20.0, 80.0, 70.0, 70.0, 7.0, 3),
            final_grade: grade,
        }
    }

    #[test]
    fn bands_are_counted_and_averaged() {
        let records = vec![record(95.0), record(91.0), record(62.0), record(10.0)];
        let bands = summarize_by_band(&records);

        assert_eq!(bands.len(), 5);
        assert_eq!(bands[0].band, Band::Outstanding);
        assert_eq!(bands[0].count, 2);
        assert!((bands[0].avg_grade - 93.0).abs() < 1e-9);
        assert_eq!(bands[1].count, 0);
        assert_eq!(bands[1].avg_grade, 0.0);
        assert_eq!(bands[3].count, 1);
        assert_eq!(bands[4].count, 1);
    }

    #[test]
    fn markdown_report_has_all_sections() {
        let records = dataset::generate(40, 9).unwrap();
        let evaluation = EvaluationReport {
            train_size: 32,
            test_size: 8,
            mean_absolute_error: 2.5,
            r2: 0.75,
            importances: vec![FeatureImportance {
                feature: "previous_score".to_string(),
                importance: 1.0,
            }],
        };
        let report = build_report(
            "data/student_data.csv",
            &dataset::summarize(&records),
            &summarize_by_band(&records),
            Some(&evaluation),
        );

        assert!(report.starts_with("# Student Grade Dataset Report"));
        assert!(report.contains("Generated for data/student_data.csv (40 records)"));
        assert!(report.contains("| final_grade |"));
        assert!(report.contains("## Grade Bands"));
        assert!(report.contains("- R²: 0.7500"));
        assert!(report.contains("- previous_score: 1.0000"));
    }

    #[test]
    fn empty_dataset_report_says_so() {
        let report = build_report("empty.csv", &dataset::summarize(&[]), &[], None);
        assert!(report.contains("No records in this dataset."));
        assert!(!report.contains("## Model Evaluation"));
    }

    #[test]
    fn evaluation_lists_features_in_rank_order() {
        let evaluation = EvaluationReport {
            train_size: 800,
            test_size: 200,
            mean_absolute_error: 2.687,
            r2: 0.78123,
            importances: vec![
                FeatureImportance {
                    feature: "previous_score".to_string(),
                    importance: 0.4,
                },
                FeatureImportance {
                    feature: "attendance".to_string(),
                    importance: 0.6,
                },
            ],
        };
        let text = render_evaluation(&evaluation);
        assert!(text.contains("Train size: 800, Test size: 200"));
        assert!(text.contains("Mean Absolute Error: 2.69"));
        assert!(text.contains("R² Score: 0.7812"));
        let first = text.find("previous_score").unwrap();
        let second = text.find("attendance").unwrap();
        assert!(first < second);
    }
}
