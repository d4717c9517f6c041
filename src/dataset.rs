//! Synthetic student table generation, CSV persistence and column statistics.
//!
//! Every random draw comes from one `ChaCha8Rng` seeded by the caller. Draw
//! order is fixed: the six features of each record in column order, record by
//! record, then one noise draw per record in the same record order.

use std::fs;
use std::io;
use std::path::Path;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{GradeError, Result};
use crate::models::{ColumnSummary, FeatureRecord, LabeledRecord, FEATURE_NAMES};

/// Standard deviation of the Gaussian label noise.
pub const NOISE_STD_DEV: f64 = 3.0;

/// Name of the label column in the persisted table.
pub const LABEL_COLUMN: &str = "final_grade";

/// Noise-free label for a record.
///
/// Sleep is rescaled by 5 and participation by 10 before weighting.
pub fn ground_truth(record: &FeatureRecord) -> f64 {
    0.25 * record.hours_studied
        + 0.20 * record.attendance
        + 0.25 * record.previous_score
        + 0.15 * record.assignment_score
        + 0.10 * (record.sleep_hours * 5.0)
        + 0.05 * (f64::from(record.participation) * 10.0)
}

/// Generates `n` labeled records. The same `(n, seed)` always yields the same table.
pub fn generate(n: usize, seed: u64) -> Result<Vec<LabeledRecord>> {
    if n == 0 {
        return Err(GradeError::InvalidArgument(
            "sample count must be positive".to_string(),
        ));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let noise = Normal::new(0.0, NOISE_STD_DEV)
        .map_err(|err| GradeError::InvalidArgument(format!("noise distribution: {err}")))?;

    let features: Vec<FeatureRecord> = (0..n).map(|_| draw_features(&mut rng)).collect();
    let records: Vec<LabeledRecord> = features
        .into_iter()
        .map(|features| {
            let label = ground_truth(&features) + noise.sample(&mut rng);
            LabeledRecord {
                features,
                final_grade: label.clamp(0.0, 100.0),
            }
        })
        .collect();

    info!(samples = n, seed, "generated synthetic dataset");
    Ok(records)
}

fn draw_features(rng: &mut ChaCha8Rng) -> FeatureRecord {
    FeatureRecord {
        hours_studied: rng.gen_range(0.0..40.0),
        attendance: rng.gen_range(50.0..100.0),
        previous_score: rng.gen_range(40.0..100.0),
        assignment_score: rng.gen_range(40.0..100.0),
        sleep_hours: rng.gen_range(4.0..10.0),
        participation: rng.gen_range(1..=5),
    }
}

#[derive(Serialize, Deserialize)]
struct CsvRow {
    hours_studied: f64,
    attendance: f64,
    previous_score: f64,
    assignment_score: f64,
    sleep_hours: f64,
    participation: i32,
    final_grade: f64,
}

impl From<&LabeledRecord> for CsvRow {
    fn from(record: &LabeledRecord) -> Self {
        let f = &record.features;
        CsvRow {
            hours_studied: f.hours_studied,
            attendance: f.attendance,
            previous_score: f.previous_score,
            assignment_score: f.assignment_score,
            sleep_hours: f.sleep_hours,
            participation: f.participation,
            final_grade: record.final_grade,
        }
    }
}

impl From<CsvRow> for LabeledRecord {
    fn from(row: CsvRow) -> Self {
        LabeledRecord {
            features: FeatureRecord::new(
                row.hours_studied,
                row.attendance,
                row.previous_score,
                row.assignment_score,
                row.sleep_hours,
                row.participation,
            ),
            final_grade: row.final_grade,
        }
    }
}

/// Writes the table as headered CSV in fixed column order.
pub fn write_csv_to<W: io::Write>(records: &[LabeledRecord], writer: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    for record in records {
        writer.serialize(CsvRow::from(record))?;
    }
    writer
        .flush()
        .map_err(|err| GradeError::Csv(csv::Error::from(err)))?;
    Ok(())
}

/// Writes the table to `path`, creating parent directories as needed.
pub fn write_csv(records: &[LabeledRecord], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| GradeError::io(parent, err))?;
    }
    let file = fs::File::create(path).map_err(|err| GradeError::io(path, err))?;
    write_csv_to(records, io::BufWriter::new(file))?;
    debug!(path = %path.display(), rows = records.len(), "wrote dataset");
    Ok(())
}

pub fn read_csv(path: &Path) -> Result<Vec<LabeledRecord>> {
    let file = fs::File::open(path).map_err(|err| GradeError::io(path, err))?;
    let mut reader = csv::Reader::from_reader(io::BufReader::new(file));
    let mut records = Vec::new();

    for result in reader.deserialize::<CsvRow>() {
        records.push(LabeledRecord::from(result?));
    }

    debug!(path = %path.display(), rows = records.len(), "read dataset");
    Ok(records)
}

/// Descriptive statistics for every column, features first then the label.
pub fn summarize(records: &[LabeledRecord]) -> Vec<ColumnSummary> {
    let mut columns: Vec<(&'static str, Vec<f64>)> = FEATURE_NAMES
        .iter()
        .enumerate()
        .map(|(index, name)| {
            let values = records
                .iter()
                .map(|record| record.features.to_array()[index])
                .collect();
            (*name, values)
        })
        .collect();
    columns.push((
        LABEL_COLUMN,
        records.iter().map(|record| record.final_grade).collect(),
    ));

    columns
        .into_iter()
        .map(|(column, values)| summarize_column(column, values))
        .collect()
}

fn summarize_column(column: &'static str, mut values: Vec<f64>) -> ColumnSummary {
    values.sort_by(f64::total_cmp);
    let count = values.len();
    let mean = if count == 0 {
        0.0
    } else {
        values.iter().sum::<f64>() / count as f64
    };
    let std = if count < 2 {
        0.0
    } else {
        let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
        (ss / (count - 1) as f64).sqrt()
    };

    ColumnSummary {
        column,
        count,
        mean,
        std,
        min: values.first().copied().unwrap_or(0.0),
        p25: quantile(&values, 0.25),
        p50: quantile(&values, 0.50),
        p75: quantile(&values, 0.75),
        max: values.last().copied().unwrap_or(0.0),
    }
}

/// Linear-interpolated quantile of already sorted values.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}
