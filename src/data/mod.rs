pub mod cache;
pub mod feed;
pub mod models;

use std::collections::HashMap;

use tracing::debug;

use models::GameRecord;

/// Collapse duplicate line-provider snapshots into one record per game id.
///
/// The reduction is deterministic: minimum spread line, minimum total line,
/// mean of each moneyline over the snapshots that carry one. Scores and
/// conference fields take the first non-null value seen. Input order decides
/// output order (first occurrence of each game id).
pub fn dedupe_snapshots(records: Vec<GameRecord>) -> Vec<GameRecord> {
    let before = records.len();
    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, Vec<GameRecord>> = HashMap::new();
    for rec in records {
        if !grouped.contains_key(&rec.game_id) {
            order.push(rec.game_id.clone());
        }
        grouped.entry(rec.game_id.clone()).or_default().push(rec);
    }

    let deduped: Vec<GameRecord> = order
        .into_iter()
        .map(|game_id| {
            let snapshots = grouped.remove(&game_id).unwrap_or_default();
            reduce_snapshots(snapshots)
        })
        .collect();

    if deduped.len() < before {
        debug!(
            "De-duplicated {} line snapshots into {} games",
            before,
            deduped.len()
        );
    }
    deduped
}

fn reduce_snapshots(mut snapshots: Vec<GameRecord>) -> GameRecord {
    let mut out = snapshots.remove(0);
    let mut home_mls: Vec<f64> = out.home_moneyline.into_iter().collect();
    let mut away_mls: Vec<f64> = out.away_moneyline.into_iter().collect();

    for snap in snapshots {
        out.spread_line = min_opt(out.spread_line, snap.spread_line);
        out.total_line = min_opt(out.total_line, snap.total_line);
        if let Some(ml) = snap.home_moneyline {
            home_mls.push(ml);
        }
        if let Some(ml) = snap.away_moneyline {
            away_mls.push(ml);
        }
        if out.home_score.is_none() {
            out.home_score = snap.home_score;
        }
        if out.away_score.is_none() {
            out.away_score = snap.away_score;
        }
        if out.home_conference.is_none() {
            out.home_conference = snap.home_conference;
        }
        if out.away_conference.is_none() {
            out.away_conference = snap.away_conference;
        }
    }

    out.home_moneyline = mean(&home_mls);
    out.away_moneyline = mean(&away_mls);
    out
}

fn min_opt(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
