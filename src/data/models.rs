use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Leagues with fitted models. Parsed once at the CLI boundary; everything
/// downstream is keyed on the enum, never on strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum League {
    Nfl,
    CollegeFootball,
}

impl League {
    pub fn all() -> [League; 2] {
        [League::Nfl, League::CollegeFootball]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            League::Nfl => "nfl",
            League::CollegeFootball => "college_football",
        }
    }
}

impl fmt::Display for League {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for League {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "nfl" => Ok(League::Nfl),
            "college_football" | "college-football" | "cfb" => Ok(League::CollegeFootball),
            other => Err(PipelineError::UnknownLeague(other.to_string())),
        }
    }
}

/// Which market line a model predicts against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    /// Game margin (home − away) vs. the spread line.
    Spread,
    /// Combined points vs. the total (over/under) line.
    Over,
}

impl ResponseType {
    pub fn all() -> [ResponseType; 2] {
        [ResponseType::Spread, ResponseType::Over]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Spread => "spread",
            ResponseType::Over => "over",
        }
    }

    /// The market line this response is compared against.
    pub fn market_line(&self, game: &GameRecord) -> Option<f64> {
        match self {
            ResponseType::Spread => game.spread_line,
            ResponseType::Over => game.total_line,
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key into the model registry: the fixed (league × response) cross product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelKey {
    pub league: League,
    pub response: ResponseType,
}

impl ModelKey {
    pub fn new(league: League, response: ResponseType) -> Self {
        ModelKey { league, response }
    }

    /// All four fitted-model keys.
    pub fn all() -> [ModelKey; 4] {
        [
            ModelKey::new(League::Nfl, ResponseType::Spread),
            ModelKey::new(League::Nfl, ResponseType::Over),
            ModelKey::new(League::CollegeFootball, ResponseType::Spread),
            ModelKey::new(League::CollegeFootball, ResponseType::Over),
        ]
    }

    pub fn artifact_file_name(&self) -> String {
        format!("model_{}_{}.json", self.league, self.response)
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.league, self.response)
    }
}

/// One game per bookmaker-line snapshot, normalized to the same shape for
/// both leagues. Mutable pre-game while lines move; append-only once the
/// game completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    /// `{year}_{away}_{home}`, globally unique within a season.
    pub game_id: String,
    pub gameday: NaiveDate,
    pub home_team: String,
    pub away_team: String,
    /// Conference names (college only).
    #[serde(default)]
    pub home_conference: Option<String>,
    #[serde(default)]
    pub away_conference: Option<String>,
    /// Final scores; None until the game completes.
    #[serde(default)]
    pub home_score: Option<i32>,
    #[serde(default)]
    pub away_score: Option<i32>,
    /// Signed spread, relative to the away team (negative = away favored).
    #[serde(default)]
    pub spread_line: Option<f64>,
    /// Over/under line.
    #[serde(default)]
    pub total_line: Option<f64>,
    #[serde(default)]
    pub home_moneyline: Option<f64>,
    #[serde(default)]
    pub away_moneyline: Option<f64>,
}

impl GameRecord {
    /// Both final scores are known.
    pub fn is_complete(&self) -> bool {
        self.home_score.is_some() && self.away_score.is_some()
    }

    /// Derived accuracy metrics; None until scores and both lines are known.
    pub fn derived_metrics(&self) -> Option<DerivedMetrics> {
        let home = self.home_score? as f64;
        let away = self.away_score? as f64;
        let spread_line = self.spread_line?;
        let total_line = self.total_line?;

        let spread_actual = home - away;
        let spread_diff = away + spread_line - home;
        let total_actual = away + home;
        Some(DerivedMetrics {
            spread_actual,
            spread_diff,
            total_actual,
            off_spread: spread_actual - spread_line,
            off_total: total_actual - total_line,
        })
    }
}

/// Pure functions of a completed GameRecord; recomputed on demand, never
/// persisted as mutable state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedMetrics {
    /// Actual signed margin, home − away.
    pub spread_actual: f64,
    /// Spread deviation: away + spread_line − home. Zero is a push.
    pub spread_diff: f64,
    pub total_actual: f64,
    /// Actual margin minus the spread line.
    pub off_spread: f64,
    /// Actual total minus the total line.
    pub off_total: f64,
}

impl DerivedMetrics {
    pub fn spread_result(&self, spread_line: f64) -> SpreadResult {
        if (spread_line < 0.0 && self.spread_diff > 0.0)
            || (spread_line > 0.0 && self.spread_diff < 0.0)
        {
            SpreadResult::FavoriteCovered
        } else if self.spread_diff == 0.0 {
            SpreadResult::Push
        } else {
            SpreadResult::UnderdogCovered
        }
    }

    pub fn total_result(&self) -> TotalResult {
        if self.off_total < 0.0 {
            TotalResult::Under
        } else if self.off_total == 0.0 {
            TotalResult::Push
        } else {
            TotalResult::Over
        }
    }
}

/// How a completed game resolved against the spread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpreadResult {
    FavoriteCovered,
    Push,
    UnderdogCovered,
}

impl SpreadResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpreadResult::FavoriteCovered => "Favorite Covered",
            SpreadResult::Push => "Push",
            SpreadResult::UnderdogCovered => "Underdog Covered",
        }
    }
}

/// How a completed game resolved against the total line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalResult {
    Over,
    Push,
    Under,
}

impl TotalResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            TotalResult::Over => "Over",
            TotalResult::Push => "Push",
            TotalResult::Under => "Under",
        }
    }
}

/// Recover (away, home) team tokens from a `{year}_{away}_{home}` game id.
pub fn teams_from_game_id(game_id: &str) -> Option<(&str, &str)> {
    let mut parts = game_id.rsplitn(3, '_');
    let home = parts.next()?;
    let away = parts.next()?;
    parts.next()?; // year prefix must exist
    Some((away, home))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn record(home: i32, away: i32, spread: f64, total: f64) -> GameRecord {
        GameRecord {
            game_id: "2023_07_SF_MIN".into(),
            gameday: NaiveDate::from_ymd_opt(2023, 10, 23).unwrap(),
            home_team: "MIN".into(),
            away_team: "SF".into(),
            home_conference: None,
            away_conference: None,
            home_score: Some(home),
            away_score: Some(away),
            spread_line: Some(spread),
            total_line: Some(total),
            home_moneyline: None,
            away_moneyline: None,
        }
    }

    #[test]
    fn metrics_match_definitions() {
        // MIN 22, SF 17, line -3.5 (away/SF favored), total 44.0
        let m = record(22, 17, -3.5, 44.0).derived_metrics().unwrap();
        assert_relative_eq!(m.spread_actual, 5.0, epsilon = 1e-12);
        assert_relative_eq!(m.spread_diff, 17.0 - 3.5 - 22.0, epsilon = 1e-12);
        assert_relative_eq!(m.total_actual, 39.0, epsilon = 1e-12);
        assert_relative_eq!(m.off_spread, 5.0 - (-3.5), epsilon = 1e-12);
        assert_relative_eq!(m.off_total, -5.0, epsilon = 1e-12);
    }

    #[test]
    fn metrics_require_scores_and_lines() {
        let mut g = record(22, 17, -3.5, 44.0);
        g.home_score = None;
        assert!(g.derived_metrics().is_none());

        let mut g = record(22, 17, -3.5, 44.0);
        g.total_line = None;
        assert!(g.derived_metrics().is_none());
    }

    #[test]
    fn push_exactly_at_zero_spread_diff() {
        // away + line - home == 0: home wins by exactly the line.
        let m = record(20, 17, 3.0, 40.0).derived_metrics().unwrap();
        assert_relative_eq!(m.spread_diff, 0.0, epsilon = 1e-12);
        assert_eq!(m.spread_result(3.0), SpreadResult::Push);
    }

    #[test]
    fn away_favorite_covering() {
        // SF favored by 3 (line -3), wins by 7 -> favorite covered.
        let m = record(14, 21, -3.0, 40.0).derived_metrics().unwrap();
        assert!(m.spread_diff > 0.0);
        assert_eq!(m.spread_result(-3.0), SpreadResult::FavoriteCovered);
    }

    #[test]
    fn home_favorite_covering() {
        // Home favored by 3 (line +3), wins by 10 -> favorite covered.
        let m = record(27, 17, 3.0, 40.0).derived_metrics().unwrap();
        assert!(m.spread_diff < 0.0);
        assert_eq!(m.spread_result(3.0), SpreadResult::FavoriteCovered);
    }

    #[test]
    fn underdog_covering() {
        // Home favored by 7 but only wins by 3 -> underdog covered.
        let m = record(20, 17, 7.0, 40.0).derived_metrics().unwrap();
        assert_eq!(m.spread_result(7.0), SpreadResult::UnderdogCovered);
    }

    #[test]
    fn total_result_boundaries() {
        let m = record(20, 20, 0.0, 40.0).derived_metrics().unwrap();
        assert_eq!(m.total_result(), TotalResult::Push);
        let m = record(20, 21, 0.0, 40.0).derived_metrics().unwrap();
        assert_eq!(m.total_result(), TotalResult::Over);
        let m = record(20, 17, 0.0, 40.0).derived_metrics().unwrap();
        assert_eq!(m.total_result(), TotalResult::Under);
    }

    #[test]
    fn league_parsing() {
        assert_eq!("nfl".parse::<League>().unwrap(), League::Nfl);
        assert_eq!(
            "college_football".parse::<League>().unwrap(),
            League::CollegeFootball
        );
        assert!(matches!(
            "xfl".parse::<League>(),
            Err(PipelineError::UnknownLeague(_))
        ));
    }

    #[test]
    fn teams_recovered_from_game_id() {
        assert_eq!(teams_from_game_id("2023_07_SF_MIN"), Some(("SF", "MIN")));
        assert_eq!(
            teams_from_game_id("2023_OhioState_Michigan"),
            Some(("OhioState", "Michigan"))
        );
        assert_eq!(teams_from_game_id("garbage"), None);
    }

    #[test]
    fn model_key_cross_product() {
        let keys = ModelKey::all();
        assert_eq!(keys.len(), 4);
        assert_eq!(
            keys[0].artifact_file_name(),
            "model_nfl_spread.json".to_string()
        );
        assert_eq!(
            keys[3].artifact_file_name(),
            "model_college_football_over.json".to_string()
        );
    }
}
