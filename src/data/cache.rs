//! Per-league training-table cache.
//!
//! One denormalized CSV per league, read preferentially when present and
//! rewritten after every successful fetch. Writes are whole-file
//! replacements (write temp file, then rename), so a concurrent reader never
//! observes a partial table.

use std::fs;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use tracing::{error, info, warn};

use crate::data::feed::GameFeed;
use crate::data::models::{GameRecord, League};
use crate::error::PipelineError;

#[derive(Debug, Clone)]
pub struct TrainingCache {
    dir: PathBuf,
}

impl TrainingCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        TrainingCache { dir: dir.into() }
    }

    fn league_path(&self, league: League) -> PathBuf {
        self.dir.join(league.as_str()).join("training.csv")
    }

    pub fn exists(&self, league: League) -> bool {
        self.league_path(league).exists()
    }

    pub fn read(&self, league: League) -> Result<Vec<GameRecord>> {
        let path = self.league_path(league);
        let mut reader = csv::Reader::from_path(&path)
            .with_context(|| format!("Failed to open cache {}", path.display()))?;
        let mut records = Vec::new();
        for row in reader.deserialize::<GameRecord>() {
            records.push(row.with_context(|| format!("Malformed cache row in {}", path.display()))?);
        }
        Ok(records)
    }

    pub fn write(&self, league: League, records: &[GameRecord]) -> Result<()> {
        let path = self.league_path(league);
        let dir = path.parent().expect("cache path has a parent");
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create cache dir {}", dir.display()))?;
        let tmp = path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&tmp)
                .with_context(|| format!("Failed to create cache {}", tmp.display()))?;
            for record in records {
                writer.serialize(record)?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace cache {}", path.display()))?;
        info!("[{}] Cached {} rows to {}", league, records.len(), path.display());
        Ok(())
    }
}

/// Run `op`, retrying once after a jittered pause on failure.
async fn retry_once<T, F, Fut>(op: F, what: &str) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match op().await {
        Ok(v) => Ok(v),
        Err(first) => {
            let jitter_ms = rand::thread_rng().gen_range(250..750);
            warn!("{} failed ({:#}); retrying once in {}ms", what, first, jitter_ms);
            tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
            op().await
        }
    }
}

/// Training table for a league: cache when fresh, feed otherwise, stale
/// cache as the degraded fallback. `DataUnavailable` only when both fail.
pub async fn training_table(
    feed: &dyn GameFeed,
    cache: &TrainingCache,
    overwrite: bool,
) -> Result<Vec<GameRecord>> {
    let league = feed.league();
    if !overwrite && cache.exists(league) {
        info!("[{}] Using cached training table", league);
        return cache.read(league);
    }

    match retry_once(|| feed.fetch_training(), feed.name()).await {
        Ok(records) => {
            cache.write(league, &records)?;
            Ok(records)
        }
        Err(err) => {
            if cache.exists(league) {
                warn!(
                    "[{}] {} unavailable ({:#}); continuing on stale cache",
                    league,
                    feed.name(),
                    err
                );
                cache.read(league)
            } else {
                error!("[{}] {} unavailable and no cache: {:#}", league, feed.name(), err);
                Err(PipelineError::DataUnavailable { league }.into())
            }
        }
    }
}

/// Upcoming slate for a prediction pass, with the same stale-cache fallback.
pub async fn upcoming_table(feed: &dyn GameFeed, cache: &TrainingCache) -> Result<Vec<GameRecord>> {
    let league = feed.league();
    match retry_once(|| feed.fetch_upcoming(), feed.name()).await {
        Ok(records) => Ok(records),
        Err(err) => {
            if cache.exists(league) {
                warn!(
                    "[{}] {} unavailable ({:#}); predicting from stale cached table",
                    league,
                    feed.name(),
                    err
                );
                cache.read(league)
            } else {
                error!("[{}] {} unavailable and no cache: {:#}", league, feed.name(), err);
                Err(PipelineError::DataUnavailable { league }.into())
            }
        }
    }
}
