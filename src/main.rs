use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::collections::HashMap;
use tracing::{error, info};

mod audit;
mod config;
mod data;
mod error;
mod features;
mod model;
mod pipeline;
mod policy;

use config::{Config, Mode};
use data::cache::{self, TrainingCache};
use data::feed::{CollegeLinesFeed, GameFeed, NflGithubFeed};
use data::models::{GameRecord, League, ModelKey, ResponseType};
use features::{FeatureBuilder, MoneylineImputation};
use model::fit::PooledRidgeBackend;
use model::registry::ModelRegistry;
use model::{default_feature_names, FittingBackend, TrainingRow, TrainingSet};
use pipeline::PredictionPipeline;
use policy::{calibrate_thresholds, CalibrationConfig, DeviationSample, PolicyEngine};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let leagues: Vec<League> = match &config.league {
        Some(raw) => vec![raw.parse::<League>()?],
        None => League::all().to_vec(),
    };
    let mut calibration = CalibrationConfig::load(&config.calibration_path())?;

    info!(
        "Running {:?} for {}",
        config.mode,
        leagues
            .iter()
            .map(League::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    );

    // One league runs to completion before the next; a failed league aborts
    // its own run only, and the process exits non-zero afterwards.
    let mut failed = 0usize;
    for league in leagues {
        let run = match config.mode {
            Mode::Fit => run_fit(league, &config, &mut calibration).await,
            Mode::Predict => run_predict(league, &config, &calibration).await,
            Mode::Audit => run_audit(league, &config).await,
        };
        if let Err(err) = run {
            error!("[{}] {:?} run failed: {:#}", league, config.mode, err);
            failed += 1;
        }
    }
    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn make_feed(
    league: League,
    config: &Config,
    imputation: MoneylineImputation,
) -> Result<Box<dyn GameFeed>> {
    match league {
        League::Nfl => Ok(Box::new(NflGithubFeed::new(&config.nfl_feed_url)?)),
        League::CollegeFootball => {
            let key = config
                .college_api_key
                .as_deref()
                .context("API_KEY_COLLEGE_API is required for college football fetches")?;
            Ok(Box::new(CollegeLinesFeed::new(
                &config.college_api_url,
                key,
                config.training_years,
                imputation,
            )?))
        }
    }
}

/// Fit both response models for a league, persist the artifacts, and
/// recalibrate every policy cutoff from the in-sample deviations.
async fn run_fit(
    league: League,
    config: &Config,
    calibration: &mut CalibrationConfig,
) -> Result<()> {
    let feed = make_feed(league, config, calibration.imputation)?;
    let cache_store = TrainingCache::new(config.cache_dir());
    let mut table = cache::training_table(feed.as_ref(), &cache_store, config.overwrite).await?;
    let min_day = config.min_gameday();
    table.retain(|g| g.gameday >= min_day);
    info!("[{}] {} training games since {}", league, table.len(), min_day);

    let builder = FeatureBuilder::new(league, calibration.imputation);
    let built = builder.build(&table, &table);
    let by_id: HashMap<&str, &GameRecord> =
        table.iter().map(|g| (g.game_id.as_str(), g)).collect();

    for response in ResponseType::all() {
        let key = ModelKey::new(league, response);

        let mut rows = Vec::new();
        let mut outcomes = Vec::new();
        for fv in &built.vectors {
            let Some(game) = by_id.get(fv.game_id.as_str()) else {
                continue;
            };
            let Some(metrics) = game.derived_metrics() else {
                continue;
            };
            let (y, excess) = match response {
                ResponseType::Spread => (metrics.spread_actual, metrics.off_spread),
                ResponseType::Over => (metrics.total_actual, metrics.off_total),
            };
            let Some(line) = response.market_line(game) else {
                continue;
            };
            rows.push(TrainingRow {
                features: fv.clone(),
                response: y,
            });
            outcomes.push((line, excess));
        }

        let training = TrainingSet {
            key,
            feature_names: default_feature_names(response),
            rows,
        };
        let model = PooledRidgeBackend.fit(&training)?;
        model.save(&config.models_dir())?;

        let mut samples = Vec::with_capacity(training.rows.len());
        let mut covered = 0usize;
        for (row, (line, excess)) in training.rows.iter().zip(&outcomes) {
            let deviation = model.predict(&row.features)? - line;
            let (lo, hi) = model.predictive_interval(&row.features)?;
            if (lo..=hi).contains(&row.response) {
                covered += 1;
            }
            samples.push(DeviationSample {
                deviation,
                excess: *excess,
            });
        }
        calibration.replace_thresholds(key, calibrate_thresholds(key, &samples));
        info!(
            "[{}] Calibrated policy cutoffs for {} from {} historical deviations; \
             90% interval covered {:.1}% of outcomes",
            league,
            key,
            samples.len(),
            100.0 * covered as f64 / samples.len().max(1) as f64
        );
    }

    calibration.save(&config.calibration_path())?;
    info!(
        "[{}] Fit complete; calibration written to {}",
        league,
        config.calibration_path().display()
    );
    Ok(())
}

/// Predict the league's upcoming slate and write the consumption report.
async fn run_predict(league: League, config: &Config, calibration: &CalibrationConfig) -> Result<()> {
    let feed = make_feed(league, config, calibration.imputation)?;
    let cache_store = TrainingCache::new(config.cache_dir());
    let registry = ModelRegistry::load(&config.models_dir())?;
    if registry.is_empty() {
        tracing::warn!(
            "No model artifacts under {}; run `spreadline fit` first",
            config.models_dir().display()
        );
    }
    let engine = PolicyEngine::new(calibration);
    let builder = FeatureBuilder::new(league, calibration.imputation);

    let pipeline = PredictionPipeline::new(
        league,
        feed,
        cache_store,
        registry,
        engine,
        builder,
        config.window_days,
        config.results_dir.clone(),
    );
    let rows = pipeline.predict_upcoming(Utc::now().date_naive()).await?;
    info!("[{}] Prediction report holds {} games", league, rows.len());
    Ok(())
}

/// Recompute the historical accuracy tables for a league.
async fn run_audit(league: League, config: &Config) -> Result<()> {
    let feed = make_feed(league, config, MoneylineImputation::default())?;
    let cache_store = TrainingCache::new(config.cache_dir());
    let table = cache::training_table(feed.as_ref(), &cache_store, config.overwrite).await?;
    audit::run(league, &table, &config.results_dir)
}
