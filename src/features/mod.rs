//! Feature engineering from raw game/line records.
//!
//! Pure transforms: raw odds are converted to payouts and implied
//! probabilities, missing moneylines are imputed from the spread via a fixed
//! empirical fit, and rolling team form is computed from completed history.
//! Rows missing a market line are dropped (and counted), never forwarded as
//! NaN into the model.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::data::models::{GameRecord, League};

/// Completed games per team that feed the rolling form features.
const FORM_WINDOW: usize = 5;

// Feature names shared between the builder and the fitted models.
pub const F_SPREAD_LINE: &str = "spread_line";
pub const F_TOTAL_LINE: &str = "total_line";
pub const F_AWAY_IS_FAVORITE: &str = "away_is_favorite";
pub const F_MONEY_LINE: &str = "money_line";
pub const F_AWAY_WIN_PROB: &str = "away_win_prob";
pub const F_HOME_POINTS_FOR_FORM: &str = "home_points_for_form";
pub const F_HOME_POINTS_AGAINST_FORM: &str = "home_points_against_form";
pub const F_AWAY_POINTS_FOR_FORM: &str = "away_points_for_form";
pub const F_AWAY_POINTS_AGAINST_FORM: &str = "away_points_against_form";

/// Payout per dollar staked for American moneyline odds.
pub fn calc_payout(odds: f64) -> f64 {
    if odds < 0.0 {
        100.0 / odds.abs()
    } else {
        odds.abs() / 100.0
    }
}

/// Implied win probability from American moneyline odds.
///
/// ml = ±100 maps to exactly 0.5.
pub fn moneyline_to_prob(ml: f64) -> f64 {
    let payout = calc_payout(ml);
    1.0 - payout / (1.0 + payout)
}

/// Empirical log-linear fit from spread to moneyline payout:
/// `payout = 10^(intercept + slope * spread)`.
///
/// Fitted offline from non-imputed historical lines; the coefficients are
/// calibration constants, never re-estimated at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoneylineImputation {
    pub slope: f64,
    pub intercept: f64,
}

impl Default for MoneylineImputation {
    fn default() -> Self {
        MoneylineImputation {
            slope: 0.0525602,
            intercept: -0.08536405,
        }
    }
}

impl MoneylineImputation {
    /// Impute a missing away moneyline from the (away-relative) spread line.
    pub fn moneyline_from_spread(&self, spread: f64) -> f64 {
        let payout = 10f64.powf(self.intercept + self.slope * spread);
        if payout > 1.0 {
            payout * 100.0
        } else {
            -100.0 / payout
        }
    }
}

/// Immutable per-game feature mapping consumed by the prediction models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub game_id: String,
    pub gameday: NaiveDate,
    pub home_team: String,
    pub away_team: String,
    /// Named numeric features; BTreeMap keeps iteration deterministic.
    pub values: BTreeMap<String, f64>,
}

impl FeatureVector {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

/// Output of one feature-building pass.
#[derive(Debug, Clone, Default)]
pub struct BuiltFeatures {
    pub vectors: Vec<FeatureVector>,
    /// Rows dropped for a missing spread or total line.
    pub dropped: usize,
    /// Rows whose away moneyline was imputed from the spread.
    pub imputed_moneylines: usize,
    /// Form lookups that fell back to the league average.
    pub form_fallbacks: usize,
}

/// Rolling points-for / points-against per team, built from completed games.
#[derive(Debug, Clone, Default)]
pub struct TeamFormIndex {
    by_team: HashMap<String, Vec<(NaiveDate, f64, f64)>>,
    league_points_mean: f64,
}

impl TeamFormIndex {
    pub fn from_history(history: &[GameRecord]) -> Self {
        let mut by_team: HashMap<String, Vec<(NaiveDate, f64, f64)>> = HashMap::new();
        let mut total_points = 0.0;
        let mut team_games = 0usize;
        for game in history {
            let (Some(home), Some(away)) = (game.home_score, game.away_score) else {
                continue;
            };
            let (home, away) = (home as f64, away as f64);
            by_team
                .entry(game.home_team.clone())
                .or_default()
                .push((game.gameday, home, away));
            by_team
                .entry(game.away_team.clone())
                .or_default()
                .push((game.gameday, away, home));
            total_points += home + away;
            team_games += 2;
        }
        for games in by_team.values_mut() {
            games.sort_by_key(|(day, _, _)| *day);
        }
        let league_points_mean = if team_games > 0 {
            total_points / team_games as f64
        } else {
            // Reasonable prior when no history exists at all.
            21.0
        };
        TeamFormIndex {
            by_team,
            league_points_mean,
        }
    }

    /// Mean (points for, points against) over the team's last completed games
    /// strictly before `day`. None when the team has no prior history.
    pub fn form(&self, team: &str, day: NaiveDate) -> Option<(f64, f64)> {
        let games = self.by_team.get(team)?;
        let prior: Vec<&(NaiveDate, f64, f64)> =
            games.iter().filter(|(d, _, _)| *d < day).collect();
        if prior.is_empty() {
            return None;
        }
        let window = &prior[prior.len().saturating_sub(FORM_WINDOW)..];
        let n = window.len() as f64;
        let pf = window.iter().map(|(_, pf, _)| pf).sum::<f64>() / n;
        let pa = window.iter().map(|(_, _, pa)| pa).sum::<f64>() / n;
        Some((pf, pa))
    }

    pub fn league_average(&self) -> f64 {
        self.league_points_mean
    }
}

/// Derives modeling features from raw records. Pure apart from logging the
/// dropped/imputed row counts.
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    league: League,
    imputation: MoneylineImputation,
}

impl FeatureBuilder {
    pub fn new(league: League, imputation: MoneylineImputation) -> Self {
        FeatureBuilder { league, imputation }
    }

    /// Build one FeatureVector per surviving record. `history` supplies the
    /// completed games behind the rolling form features; it may overlap
    /// `games` (form only looks strictly before each gameday).
    pub fn build(&self, games: &[GameRecord], history: &[GameRecord]) -> BuiltFeatures {
        let form_index = TeamFormIndex::from_history(history);
        let mut out = BuiltFeatures::default();

        for game in games {
            let (Some(spread_line), Some(total_line)) = (game.spread_line, game.total_line) else {
                out.dropped += 1;
                continue;
            };

            let away_ml = match game.away_moneyline {
                Some(ml) => ml,
                None => {
                    out.imputed_moneylines += 1;
                    self.imputation.moneyline_from_spread(spread_line)
                }
            };

            let league_avg = form_index.league_average();
            let mut fallback = |form: Option<(f64, f64)>| match form {
                Some(pair) => pair,
                None => {
                    out.form_fallbacks += 1;
                    (league_avg, league_avg)
                }
            };
            let (home_pf, home_pa) = fallback(form_index.form(&game.home_team, game.gameday));
            let (away_pf, away_pa) = fallback(form_index.form(&game.away_team, game.gameday));

            let mut values = BTreeMap::new();
            values.insert(F_SPREAD_LINE.to_string(), spread_line);
            values.insert(F_TOTAL_LINE.to_string(), total_line);
            values.insert(
                F_AWAY_IS_FAVORITE.to_string(),
                if spread_line < 0.0 { 1.0 } else { 0.0 },
            );
            values.insert(F_MONEY_LINE.to_string(), calc_payout(away_ml));
            values.insert(F_AWAY_WIN_PROB.to_string(), moneyline_to_prob(away_ml));
            values.insert(F_HOME_POINTS_FOR_FORM.to_string(), home_pf);
            values.insert(F_HOME_POINTS_AGAINST_FORM.to_string(), home_pa);
            values.insert(F_AWAY_POINTS_FOR_FORM.to_string(), away_pf);
            values.insert(F_AWAY_POINTS_AGAINST_FORM.to_string(), away_pa);

            out.vectors.push(FeatureVector {
                game_id: game.game_id.clone(),
                gameday: game.gameday,
                home_team: game.home_team.clone(),
                away_team: game.away_team.clone(),
                values,
            });
        }

        if out.dropped > 0 || out.imputed_moneylines > 0 || out.form_fallbacks > 0 {
            info!(
                "[{}] Feature build: {} rows kept, {} dropped (missing line), {} moneylines imputed, {} form fallbacks",
                self.league,
                out.vectors.len(),
                out.dropped,
                out.imputed_moneylines,
                out.form_fallbacks
            );
        }
        out
    }
}
