use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Football betting-line model: fit, predict, audit
#[derive(Parser, Debug, Clone)]
#[command(name = "spreadline", version, about)]
pub struct Config {
    /// What to run: fit models + calibrate policies, predict the upcoming
    /// slate, or audit historical line accuracy
    #[arg(value_enum)]
    pub mode: Mode,

    /// League to process ("nfl" or "college_football"); both when omitted
    #[arg(long, env = "LEAGUE")]
    pub league: Option<String>,

    /// Data directory (caches live under {data_dir}/cache/{league})
    #[arg(long, env = "DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Results directory (models, calibration, reports)
    #[arg(long, env = "RESULTS_DIR", default_value = "results")]
    pub results_dir: PathBuf,

    /// NFL games feed (nflverse CSV)
    #[arg(
        long,
        env = "NFL_FEED_URL",
        default_value = "https://raw.githubusercontent.com/nflverse/nfldata/master/data/games.csv"
    )]
    pub nfl_feed_url: String,

    /// College betting-lines API base URL
    #[arg(
        long,
        env = "COLLEGE_API_URL",
        default_value = "https://api.collegefootballdata.com"
    )]
    pub college_api_url: String,

    /// College betting-lines API key (required for college fetches)
    #[arg(long, env = "API_KEY_COLLEGE_API")]
    pub college_api_key: Option<String>,

    /// Prediction window in days from today
    #[arg(long, env = "WINDOW_DAYS", default_value = "10")]
    pub window_days: i64,

    /// Seasons of history to train on
    #[arg(long, env = "TRAINING_YEARS", default_value = "5")]
    pub training_years: i32,

    /// Earliest gameday admitted into the training table
    #[arg(long, env = "MIN_GAMEDAY", default_value = "2017-06-01")]
    pub min_gameday: String,

    /// Refetch feeds even when a cache is present
    #[arg(long, env = "OVERWRITE", default_value = "false")]
    pub overwrite: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Fit all (league, response) models and calibrate policy cutoffs
    Fit,
    /// Predict the upcoming slate and write the report
    Predict,
    /// Compute historical accuracy tables
    Audit,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(1..=30).contains(&self.window_days) {
            anyhow::bail!("window_days must be between 1 and 30");
        }
        if !(1..=15).contains(&self.training_years) {
            anyhow::bail!("training_years must be between 1 and 15");
        }
        if chrono::NaiveDate::parse_from_str(&self.min_gameday, "%Y-%m-%d").is_err() {
            anyhow::bail!("min_gameday must be a YYYY-MM-DD date");
        }
        Ok(())
    }

    pub fn min_gameday(&self) -> chrono::NaiveDate {
        chrono::NaiveDate::parse_from_str(&self.min_gameday, "%Y-%m-%d")
            .expect("validated in Config::validate")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    pub fn models_dir(&self) -> PathBuf {
        self.results_dir.join("models")
    }

    pub fn calibration_path(&self) -> PathBuf {
        self.results_dir.join("calibration.json")
    }
}
