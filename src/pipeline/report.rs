//! The consumption report: one row per game with market context and every
//! (response, policy) bet decision side by side.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

/// Round to 2 decimals for presentation columns.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Fixed-column report row. Column names are part of the external contract;
/// downstream spreadsheets key on them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub game_id: String,
    pub gameday: String,
    pub home_team: String,
    pub away_team: String,
    pub away_is_favorite: String,
    pub payout_per_dollar_bet_on_away_team_moneyline: f64,
    #[serde(rename = "Spread_from_Vegas_for_Away_Team")]
    pub spread_from_vegas_for_away_team: f64,
    #[serde(rename = "Spread_from_Model_for_Away_Team")]
    pub spread_from_model_for_away_team: f64,
    #[serde(rename = "Spread_Bet_all_in")]
    pub spread_bet_all_in: String,
    #[serde(rename = "Spread_Bet_max_return")]
    pub spread_bet_max_return: String,
    #[serde(rename = "Spread_Bet_top_decile")]
    pub spread_bet_top_decile: String,
    #[serde(rename = "Spread_Bet_top_quartile")]
    pub spread_bet_top_quartile: String,
    #[serde(rename = "Spread_Bet_top_half")]
    pub spread_bet_top_half: String,
    #[serde(rename = "Spread_Bet_min_risk")]
    pub spread_bet_min_risk: String,
    #[serde(rename = "Over_Line_from_Vegas")]
    pub over_line_from_vegas: f64,
    #[serde(rename = "Over_Line_from_Model")]
    pub over_line_from_model: f64,
    #[serde(rename = "Over_Bet_all_in")]
    pub over_bet_all_in: String,
    #[serde(rename = "Over_Bet_max_return")]
    pub over_bet_max_return: String,
    #[serde(rename = "Over_Bet_top_decile")]
    pub over_bet_top_decile: String,
    #[serde(rename = "Over_Bet_top_quartile")]
    pub over_bet_top_quartile: String,
    #[serde(rename = "Over_Bet_top_half")]
    pub over_bet_top_half: String,
    #[serde(rename = "Over_Bet_min_risk")]
    pub over_bet_min_risk: String,
}

/// Render rows to CSV text. Pure; the idempotence contract for a prediction
/// run is byte-identical output from identical inputs.
pub fn render_csv(rows: &[ReportRow]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row).context("Failed to serialize report row")?;
    }
    let bytes = writer.into_inner().context("Failed to finish report CSV")?;
    String::from_utf8(bytes).context("Report CSV was not valid UTF-8")
}

/// Whole-file replacement write of the rendered report.
pub fn write_report(path: &Path, rows: &[ReportRow]) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create report dir {}", dir.display()))?;
    }
    let csv_text = render_csv(rows)?;
    let tmp = path.with_extension("csv.tmp");
    fs::write(&tmp, csv_text)
        .with_context(|| format!("Failed to write report {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace report {}", path.display()))?;
    Ok(())
}
