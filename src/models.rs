use serde::{Deserialize, Serialize};

/// Number of input features the model is trained on.
pub const N_FEATURES: usize = 6;

/// Column names in the fixed order the model sees them.
pub const FEATURE_NAMES: [&str; N_FEATURES] = [
    "hours_studied",
    "attendance",
    "previous_score",
    "assignment_score",
    "sleep_hours",
    "participation",
];

/// One student's inputs. Ranges are advisory and not enforced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    /// Weekly study hours, 0-40.
    pub hours_studied: f64,
    /// Attendance percentage, 50-100.
    pub attendance: f64,
    /// Previous exam score, 40-100.
    pub previous_score: f64,
    /// Average assignment score, 40-100.
    pub assignment_score: f64,
    /// Average sleep per night, 4-10.
    pub sleep_hours: f64,
    /// Class participation level, 1-5.
    pub participation: i32,
}

impl FeatureRecord {
    pub fn new(
        hours_studied: f64,
        attendance: f64,
        previous_score: f64,
        assignment_score: f64,
        sleep_hours: f64,
        participation: i32,
    ) -> Self {
        Self {
            hours_studied,
            attendance,
            previous_score,
            assignment_score,
            sleep_hours,
            participation,
        }
    }

    /// Feature values in `FEATURE_NAMES` order.
    pub fn to_array(&self) -> [f64; N_FEATURES] {
        [
            self.hours_studied,
            self.attendance,
            self.previous_score,
            self.assignment_score,
            self.sleep_hours,
            f64::from(self.participation),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabeledRecord {
    pub features: FeatureRecord,
    pub final_grade: f64,
}

/// Qualitative grade category, ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Band {
    Poor,
    Fair,
    Good,
    Great,
    Outstanding,
}

impl Band {
    pub const ALL: [Band; 5] = [
        Band::Outstanding,
        Band::Great,
        Band::Good,
        Band::Fair,
        Band::Poor,
    ];

    /// Lower bounds are inclusive: 90 is Outstanding, 89.999 is Great.
    pub fn from_grade(grade: f64) -> Band {
        if grade >= 90.0 {
            Band::Outstanding
        } else if grade >= 80.0 {
            Band::Great
        } else if grade >= 70.0 {
            Band::Good
        } else if grade >= 60.0 {
            Band::Fair
        } else {
            Band::Poor
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Band::Outstanding => "Outstanding! Excellent performance!",
            Band::Great => "Great job! Very good work!",
            Band::Good => "Good effort! Keep it up!",
            Band::Fair => "Fair. More study needed.",
            Band::Poor => "Needs significant improvement.",
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            Band::Outstanding => "#22c55e",
            Band::Great => "#3b82f6",
            Band::Good => "#f59e0b",
            Band::Fair => "#ef4444",
            Band::Poor => "#991b1b",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Band::Outstanding => "outstanding",
            Band::Great => "great",
            Band::Good => "good",
            Band::Fair => "fair",
            Band::Poor => "poor",
        }
    }
}

/// Grade, band, message and color always travel together.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub grade: f64,
    pub band: Band,
    pub message: &'static str,
    pub color: &'static str,
}

impl PredictionResult {
    /// Builds the result from an already clamped grade.
    pub fn from_grade(grade: f64) -> Self {
        let band = Band::from_grade(grade);
        Self {
            grade,
            band,
            message: band.message(),
            color: band.color(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// Diagnostics from a training run, computed on the held-out partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub train_size: usize,
    pub test_size: usize,
    pub mean_absolute_error: f64,
    pub r2: f64,
    /// Descending by importance, sums to 1.0.
    pub importances: Vec<FeatureImportance>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSummary {
    pub column: &'static str,
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BandSummary {
    pub band: Band,
    pub count: usize,
    pub avg_grade: f64,
}
