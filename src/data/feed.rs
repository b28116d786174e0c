//! League data feeds, normalized into the common GameRecord shape.
//!
//! Feed A: the nflverse games CSV hosted on GitHub. Feed B: the college
//! football betting-lines API, queried per (year, conference). Both are
//! external collaborators; everything downstream of the returned records is
//! pure.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use futures_util::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::data::models::{GameRecord, League};
use crate::data::dedupe_snapshots;
use crate::features::MoneylineImputation;

/// Conference codes accepted by the lines API query parameter.
const COLLEGE_QUERY_CONFERENCES: [&str; 6] = ["ACC", "B12", "B1G", "SEC", "Pac-10", "PAC"];
/// Conference names kept after normalization (both teams must match).
const COLLEGE_KEEP_CONFERENCES: [&str; 6] = ["Big Ten", "SEC", "Big 12", "ACC", "Pac-12", "PAC"];

/// Trait every league data feed implements.
#[async_trait]
pub trait GameFeed: Send + Sync {
    /// Full historical table for model fitting.
    async fn fetch_training(&self) -> Result<Vec<GameRecord>>;

    /// Recent and upcoming games for a prediction pass (scores may be null).
    async fn fetch_upcoming(&self) -> Result<Vec<GameRecord>>;

    fn league(&self) -> League;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}

// ── NFL (GitHub CSV) ─────────────────────────────────────────────────────────

/// The nflverse games table; regular-season completed rows train the models.
pub struct NflGithubFeed {
    http: Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct NflCsvRow {
    game_id: String,
    game_type: String,
    gameday: String,
    away_team: String,
    home_team: String,
    away_score: Option<f64>,
    home_score: Option<f64>,
    spread_line: Option<f64>,
    total_line: Option<f64>,
    away_moneyline: Option<f64>,
    home_moneyline: Option<f64>,
}

impl NflGithubFeed {
    pub fn new(url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(NflGithubFeed {
            http,
            url: url.to_string(),
        })
    }

    async fn download(&self) -> Result<String> {
        debug!("Downloading NFL games table: {}", self.url);
        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .context("NFL feed request failed")?;
        if !resp.status().is_success() {
            anyhow::bail!("NFL feed error: {}", resp.status());
        }
        resp.text().await.context("Failed to read NFL feed body")
    }
}

/// Parse the raw games CSV into GameRecords, keeping every row. Rows with an
/// unparseable gameday are skipped with a warning.
pub fn parse_nfl_csv(text: &str, regular_season_only: bool) -> Result<Vec<GameRecord>> {
    let mut reader = csv::Reader::from_reader(text.as_bytes());
    let mut records = Vec::new();
    let mut skipped = 0usize;
    for row in reader.deserialize::<NflCsvRow>() {
        let row = row.context("Malformed NFL feed row")?;
        if regular_season_only && row.game_type != "REG" {
            continue;
        }
        let Ok(gameday) = NaiveDate::parse_from_str(&row.gameday, "%Y-%m-%d") else {
            skipped += 1;
            continue;
        };
        records.push(GameRecord {
            game_id: row.game_id,
            gameday,
            home_team: row.home_team,
            away_team: row.away_team,
            home_conference: None,
            away_conference: None,
            home_score: row.home_score.map(|s| s.round() as i32),
            away_score: row.away_score.map(|s| s.round() as i32),
            spread_line: row.spread_line,
            total_line: row.total_line,
            home_moneyline: row.home_moneyline,
            away_moneyline: row.away_moneyline,
        });
    }
    if skipped > 0 {
        warn!("Skipped {} NFL rows with unparseable gameday", skipped);
    }
    Ok(records)
}

#[async_trait]
impl GameFeed for NflGithubFeed {
    async fn fetch_training(&self) -> Result<Vec<GameRecord>> {
        let text = self.download().await?;
        let records = parse_nfl_csv(&text, true)?;
        // Not planned: only completed games train the model.
        let completed: Vec<GameRecord> =
            records.into_iter().filter(|g| g.is_complete()).collect();
        info!("NFL training table: {} completed regular-season games", completed.len());
        Ok(completed)
    }

    async fn fetch_upcoming(&self) -> Result<Vec<GameRecord>> {
        let text = self.download().await?;
        parse_nfl_csv(&text, false)
    }

    fn league(&self) -> League {
        League::Nfl
    }

    fn name(&self) -> &str {
        "nflverse-github"
    }
}

// ── College football (betting-lines API) ─────────────────────────────────────

/// Paginated betting-lines API, queried per (year, conference) and
/// normalized to the away-relative spread convention.
pub struct CollegeLinesFeed {
    http: Client,
    base_url: String,
    api_key: String,
    training_years: i32,
    imputation: MoneylineImputation,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollegeGame {
    start_date: String,
    home_team: String,
    home_conference: Option<String>,
    home_score: Option<f64>,
    away_team: String,
    away_conference: Option<String>,
    away_score: Option<f64>,
    #[serde(default)]
    lines: Vec<CollegeLine>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollegeLine {
    formatted_spread: Option<String>,
    over_under: Option<f64>,
    home_moneyline: Option<f64>,
    away_moneyline: Option<f64>,
}

impl CollegeLinesFeed {
    pub fn new(
        base_url: &str,
        api_key: &str,
        training_years: i32,
        imputation: MoneylineImputation,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(CollegeLinesFeed {
            http,
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            training_years,
            imputation,
        })
    }

    async fn fetch_page(&self, year: i32, conference: &str) -> Result<Vec<CollegeGame>> {
        let url = format!(
            "{}/lines?year={}&seasonType=regular&conference={}",
            self.base_url, year, conference
        );
        debug!("Fetching college lines: {}", url);
        let resp = self
            .http
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .context("College lines API request failed")?;
        if !resp.status().is_success() {
            anyhow::bail!("College lines API error {}: year={}, conference={}", resp.status(), year, conference);
        }
        resp.json::<Vec<CollegeGame>>()
            .await
            .context("Failed to parse college lines response")
    }

    async fn fetch_years(&self, years: Vec<i32>) -> Result<Vec<GameRecord>> {
        let mut all_games: Vec<(i32, CollegeGame)> = Vec::new();
        for year in years {
            // Conferences within a year fetch concurrently; years pace
            // themselves to stay polite to the free API tier.
            let pages = join_all(
                COLLEGE_QUERY_CONFERENCES
                    .iter()
                    .map(|conference| self.fetch_page(year, conference)),
            )
            .await;
            for page in pages {
                let games = page?;
                all_games.extend(games.into_iter().map(|g| (year, g)));
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        Ok(normalize_college_games(all_games, self.imputation))
    }

    fn seasons(&self, training: bool) -> Vec<i32> {
        let current_year = Utc::now().year();
        if training {
            (current_year - self.training_years - 1..=current_year).collect()
        } else {
            vec![current_year - 1, current_year]
        }
    }
}

#[async_trait]
impl GameFeed for CollegeLinesFeed {
    async fn fetch_training(&self) -> Result<Vec<GameRecord>> {
        let records = self.fetch_years(self.seasons(true)).await?;
        let completed: Vec<GameRecord> =
            records.into_iter().filter(|g| g.is_complete()).collect();
        info!("College training table: {} completed games", completed.len());
        Ok(completed)
    }

    async fn fetch_upcoming(&self) -> Result<Vec<GameRecord>> {
        self.fetch_years(self.seasons(false)).await
    }

    fn league(&self) -> League {
        League::CollegeFootball
    }

    fn name(&self) -> &str {
        "college-lines-api"
    }
}

/// Away-relative spread from the API's formatted string, e.g.
/// "Alabama -7.5". The sign flips when the named (favored) team is the home
/// team; "null"/"-null" mean no line.
pub fn parse_formatted_spread(formatted: &str, away_team: &str) -> Option<f64> {
    let token = formatted.split_whitespace().last()?;
    if token == "null" || token == "-null" {
        return None;
    }
    let value: f64 = token.parse().ok()?;
    if formatted.contains(away_team) {
        Some(value)
    } else {
        Some(-value)
    }
}

/// Flatten per-line snapshots into GameRecords, impute missing away
/// moneylines from the spread, filter to the kept conferences, and reduce
/// duplicate provider snapshots deterministically.
pub fn normalize_college_games(
    games: Vec<(i32, CollegeGame)>,
    imputation: MoneylineImputation,
) -> Vec<GameRecord> {
    let mut snapshots = Vec::new();
    let mut undated = 0usize;
    for (year, game) in games {
        let Some(gameday) = parse_college_date(&game.start_date) else {
            undated += 1;
            continue;
        };
        let game_id = format!(
            "{}_{}_{}",
            year,
            game.away_team.replace(' ', ""),
            game.home_team.replace(' ', "")
        );
        for line in &game.lines {
            let spread_line = line
                .formatted_spread
                .as_deref()
                .and_then(|f| parse_formatted_spread(f, &game.away_team));
            let away_moneyline = line
                .away_moneyline
                .or_else(|| spread_line.map(|s| imputation.moneyline_from_spread(s)));
            snapshots.push(GameRecord {
                game_id: game_id.clone(),
                gameday,
                home_team: game.home_team.clone(),
                away_team: game.away_team.clone(),
                home_conference: game.home_conference.clone(),
                away_conference: game.away_conference.clone(),
                home_score: game.home_score.map(|s| s.round() as i32),
                away_score: game.away_score.map(|s| s.round() as i32),
                spread_line,
                total_line: line.over_under,
                home_moneyline: line.home_moneyline,
                away_moneyline,
            });
        }
    }
    if undated > 0 {
        warn!("Skipped {} college games with unparseable start date", undated);
    }

    let mut records = dedupe_snapshots(snapshots);
    let before = records.len();
    records.retain(|g| {
        let home_ok = g
            .home_conference
            .as_deref()
            .is_some_and(|c| COLLEGE_KEEP_CONFERENCES.contains(&c));
        let away_ok = g
            .away_conference
            .as_deref()
            .is_some_and(|c| COLLEGE_KEEP_CONFERENCES.contains(&c));
        home_ok && away_ok && g.spread_line.is_some()
    });
    if records.len() < before {
        info!(
            "College normalization: kept {} of {} games after conference/line filter",
            records.len(),
            before
        );
    }
    records
}

fn parse_college_date(start_date: &str) -> Option<NaiveDate> {
    let date_part = start_date.split('T').next()?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}
