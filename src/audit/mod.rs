//! Historical accuracy audits over the training table.
//!
//! Two tables, recomputed on demand from completed games: moneyline
//! calibration (implied vs. actual win rate per probability bucket, with
//! net gain per bet) and line accuracy (how games resolve against the
//! spread and total).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::data::models::{GameRecord, League, SpreadResult, TotalResult};
use crate::features::moneyline_to_prob;

/// One implied-probability bucket of away-moneyline outcomes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoneylineBucket {
    pub win_prob_bucket: f64,
    pub win_prob_mean: f64,
    pub win_actual: f64,
    pub num_wins: u32,
    pub p_wins: f64,
    pub n: u32,
    pub freq: f64,
    pub gross_gain: f64,
    pub gross_loss: f64,
    pub net_gain: f64,
    pub net_gain_per_bet: f64,
}

/// Bucket completed games by implied away win probability (rounded to one
/// decimal) and compare against realized outcomes.
pub fn moneyline_accuracy(games: &[GameRecord]) -> Vec<MoneylineBucket> {
    struct Bucket {
        prob_sum: f64,
        wins: u32,
        n: u32,
    }

    let mut buckets: BTreeMap<i64, Bucket> = BTreeMap::new();
    for game in games {
        let (Some(home), Some(away), Some(away_ml)) =
            (game.home_score, game.away_score, game.away_moneyline)
        else {
            continue;
        };
        let prob = moneyline_to_prob(away_ml);
        let key = (prob * 10.0).round() as i64;
        let bucket = buckets.entry(key).or_insert(Bucket {
            prob_sum: 0.0,
            wins: 0,
            n: 0,
        });
        bucket.prob_sum += prob;
        bucket.n += 1;
        if away > home {
            bucket.wins += 1;
        }
    }

    let total: u32 = buckets.values().map(|b| b.n).sum();
    buckets
        .into_iter()
        .map(|(key, b)| {
            let n = b.n as f64;
            let win_prob_mean = b.prob_sum / n;
            let gross_gain = if win_prob_mean > 0.0 {
                b.wins as f64 * (1.0 - win_prob_mean) / win_prob_mean
            } else {
                0.0
            };
            let gross_loss = n - b.wins as f64;
            let net_gain = gross_gain - gross_loss;
            MoneylineBucket {
                win_prob_bucket: key as f64 / 10.0,
                win_prob_mean,
                win_actual: b.wins as f64 / n,
                num_wins: b.wins,
                p_wins: win_prob_mean * n,
                n: b.n,
                freq: n / total as f64,
                gross_gain,
                gross_loss,
                net_gain,
                net_gain_per_bet: net_gain / n,
            }
        })
        .collect()
}

/// How the completed slate resolved against the posted lines.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LineAccuracySummary {
    pub games: usize,
    pub favorite_covered: usize,
    pub spread_pushes: usize,
    pub underdog_covered: usize,
    pub overs: usize,
    pub total_pushes: usize,
    pub unders: usize,
    /// Fraction of games decided by <= 3 points against the spread.
    pub frac_within_3_ats: f64,
    /// Fraction of games decided by <= 7 points against the spread.
    pub frac_within_7_ats: f64,
    pub mean_spread_diff: f64,
    pub mean_off_total: f64,
}

pub fn line_accuracy(games: &[GameRecord]) -> LineAccuracySummary {
    let mut summary = LineAccuracySummary::default();
    let mut spread_diff_sum = 0.0;
    let mut off_total_sum = 0.0;
    let mut within_3 = 0usize;
    let mut within_7 = 0usize;

    for game in games {
        let (Some(metrics), Some(spread_line)) = (game.derived_metrics(), game.spread_line)
        else {
            continue;
        };
        summary.games += 1;
        match metrics.spread_result(spread_line) {
            SpreadResult::FavoriteCovered => summary.favorite_covered += 1,
            SpreadResult::Push => summary.spread_pushes += 1,
            SpreadResult::UnderdogCovered => summary.underdog_covered += 1,
        }
        match metrics.total_result() {
            TotalResult::Over => summary.overs += 1,
            TotalResult::Push => summary.total_pushes += 1,
            TotalResult::Under => summary.unders += 1,
        }
        spread_diff_sum += metrics.spread_diff;
        off_total_sum += metrics.off_total;
        if metrics.spread_diff.abs() <= 3.0 {
            within_3 += 1;
        }
        if metrics.spread_diff.abs() <= 7.0 {
            within_7 += 1;
        }
    }

    if summary.games > 0 {
        let n = summary.games as f64;
        summary.frac_within_3_ats = within_3 as f64 / n;
        summary.frac_within_7_ats = within_7 as f64 / n;
        summary.mean_spread_diff = spread_diff_sum / n;
        summary.mean_off_total = off_total_sum / n;
    }
    summary
}

/// Compute both audit tables, persist the moneyline table as CSV, and log
/// the line-accuracy summary.
pub fn run(league: League, games: &[GameRecord], results_dir: &Path) -> Result<()> {
    let buckets = moneyline_accuracy(games);
    let summary = line_accuracy(games);

    let dir = results_dir.join(league.as_str());
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create audit dir {}", dir.display()))?;
    let path = dir.join("audit_moneyline.csv");
    let tmp = path.with_extension("csv.tmp");
    {
        let mut writer = csv::Writer::from_path(&tmp)
            .with_context(|| format!("Failed to create audit table {}", tmp.display()))?;
        for bucket in &buckets {
            writer.serialize(bucket)?;
        }
        writer.flush()?;
    }
    fs::rename(&tmp, &path)
        .with_context(|| format!("Failed to replace audit table {}", path.display()))?;

    info!(
        "[{}] Moneyline audit: {} buckets over {} games -> {}",
        league,
        buckets.len(),
        summary.games,
        path.display()
    );
    info!(
        "[{}] ATS: {} {} / {} {} / {} {}; {:.1}% of games within 3, {:.1}% within 7",
        league,
        SpreadResult::FavoriteCovered.as_str(),
        summary.favorite_covered,
        SpreadResult::Push.as_str(),
        summary.spread_pushes,
        SpreadResult::UnderdogCovered.as_str(),
        summary.underdog_covered,
        summary.frac_within_3_ats * 100.0,
        summary.frac_within_7_ats * 100.0
    );
    info!(
        "[{}] Totals: {} {} / {} {} / {} {}; mean spread_diff {:.2}, mean off_total {:.2}",
        league,
        TotalResult::Over.as_str(),
        summary.overs,
        TotalResult::Push.as_str(),
        summary.total_pushes,
        TotalResult::Under.as_str(),
        summary.unders,
        summary.mean_spread_diff,
        summary.mean_off_total
    );
    Ok(())
}
