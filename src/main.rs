use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use grade_predictor::forest::{ForestConfig, MaxFeatures};
use grade_predictor::store::DEFAULT_MODEL_PATH;
use grade_predictor::trainer::{self, TrainerConfig, TrainingRun};
use grade_predictor::{dataset, report, GradePredictor, ModelStore};
use tracing::info;

mod logging;

const DEFAULT_DATA_PATH: &str = "data/student_data.csv";

#[derive(Parser)]
#[command(name = "grade-predictor")]
#[command(about = "Predict student final grades from study and performance metrics", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DatasetArgs {
    #[arg(long, env = "GRADE_SAMPLES", default_value_t = 1000)]
    samples: usize,
    #[arg(long, env = "GRADE_SEED", default_value_t = 42)]
    seed: u64,
    #[arg(long, env = "GRADE_DATA", default_value = DEFAULT_DATA_PATH)]
    data: PathBuf,
}

#[derive(Args)]
struct ForestArgs {
    #[arg(long, env = "GRADE_TEST_FRACTION", default_value_t = 0.2)]
    test_fraction: f64,
    #[arg(long, env = "GRADE_TREES", default_value_t = 100)]
    trees: usize,
    #[arg(long, env = "GRADE_MAX_DEPTH", default_value_t = 10)]
    max_depth: usize,
    #[arg(long, default_value_t = 2)]
    min_samples_split: usize,
    #[arg(long, default_value_t = 1)]
    min_samples_leaf: usize,
    /// Features considered per split: `all`, `sqrt` or a count
    #[arg(long, default_value = "all")]
    max_features: MaxFeatures,
}

impl ForestArgs {
    fn trainer_config(&self, seed: u64) -> TrainerConfig {
        TrainerConfig {
            test_fraction: self.test_fraction,
            seed,
            forest: ForestConfig {
                n_trees: self.trees,
                max_depth: self.max_depth,
                min_samples_split: self.min_samples_split,
                min_samples_leaf: self.min_samples_leaf,
                max_features: self.max_features,
                bootstrap: true,
            },
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the synthetic student table
    Generate {
        #[command(flatten)]
        dataset: DatasetArgs,
    },
    /// Generate data, train the forest, print the evaluation and save the model
    Train {
        #[command(flatten)]
        dataset: DatasetArgs,
        #[command(flatten)]
        forest: ForestArgs,
        #[arg(long, env = "GRADE_MODEL", default_value = DEFAULT_MODEL_PATH)]
        model: PathBuf,
        /// Also write a markdown report with the evaluation
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Predict a final grade from six feature values
    Predict {
        #[arg(allow_negative_numbers = true)]
        hours_studied: f64,
        #[arg(allow_negative_numbers = true)]
        attendance: f64,
        #[arg(allow_negative_numbers = true)]
        previous_score: f64,
        #[arg(allow_negative_numbers = true)]
        assignment_score: f64,
        #[arg(allow_negative_numbers = true)]
        sleep_hours: f64,
        #[arg(allow_negative_numbers = true)]
        participation: i32,
        #[arg(long, env = "GRADE_MODEL", default_value = DEFAULT_MODEL_PATH)]
        model: PathBuf,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write a markdown report for a saved dataset
    Report {
        #[arg(long, env = "GRADE_DATA", default_value = DEFAULT_DATA_PATH)]
        data: PathBuf,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_json).context("failed to initialise logging")?;

    match cli.command {
        Commands::Generate { dataset: args } => {
            let records = dataset::generate(args.samples, args.seed)
                .context("failed to generate dataset")?;
            dataset::write_csv(&records, &args.data)
                .with_context(|| format!("failed to write {}", args.data.display()))?;
            println!(
                "Dataset saved to {}. Shape: ({}, 7)",
                args.data.display(),
                records.len()
            );
        }
        Commands::Train {
            dataset: args,
            forest: forest_args,
            model,
            report: report_path,
        } => {
            let job = TrainingRun {
                samples: args.samples,
                data_path: args.data,
                model_path: model,
                report_path,
                config: forest_args.trainer_config(args.seed),
            };
            trainer::run(&job, std::io::stdout().lock()).context("training run failed")?;
        }
        Commands::Predict {
            hours_studied,
            attendance,
            previous_score,
            assignment_score,
            sleep_hours,
            participation,
            model,
            json,
        } => {
            let predictor = GradePredictor::load(&ModelStore::new(&model))
                .with_context(|| format!("failed to load model from {}", model.display()))?;
            let result = predictor
                .predict_values(
                    hours_studied,
                    attendance,
                    previous_score,
                    assignment_score,
                    sleep_hours,
                    participation,
                )
                .context("prediction failed")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Predicted Final Grade: {:.1}%", result.grade);
                println!("{}", result.message);
                println!("Color: {}", result.color);
            }
        }
        Commands::Report { data, out } => {
            let records = dataset::read_csv(&data)
                .with_context(|| format!("failed to read {}", data.display()))?;
            info!(rows = records.len(), "building dataset report");
            let markdown = report::build_report(
                &data.display().to_string(),
                &dataset::summarize(&records),
                &report::summarize_by_band(&records),
                None,
            );
            std::fs::write(&out, markdown)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
