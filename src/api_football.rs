use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::fetch::{ApiFetcher, FetchError, Pause, ThreadSleep, Transport};
use crate::model::{Fixture, OddsSnapshot};
use crate::report::normalize_team;

pub const DEFAULT_BASE_URL: &str = "https://v3.football.api-sports.io";

/// Played or scheduled states; postponed and cancelled fixtures are left out.
const FIXTURE_STATUSES: &str = "FT-AET-PEN-NS-1H-HT-2H-ET-BT-P";
const MAX_ODDS_PAGES: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamRef {
    pub id: u64,
    pub name: String,
}

pub struct ApiFootball<T, P = ThreadSleep> {
    fetcher: ApiFetcher<T, P>,
}

impl<T: Transport, P: Pause> ApiFootball<T, P> {
    pub fn new(fetcher: ApiFetcher<T, P>) -> Self {
        Self { fetcher }
    }

    pub fn fetcher(&self) -> &ApiFetcher<T, P> {
        &self.fetcher
    }

    /// Search teams by name, preferring an exact case-insensitive hit over the
    /// API's first suggestion.
    pub fn find_team(&self, name: &str) -> Result<Option<TeamRef>, FetchError> {
        let body = self.fetcher.fetch("/teams", &[("search", name.trim().to_string())])?;
        Ok(pick_team(&parse_teams(&body), name))
    }

    pub fn list_fixtures(
        &self,
        team_id: u64,
        from: NaiveDate,
        to: NaiveDate,
        season: Option<u16>,
    ) -> Result<Vec<Fixture>, FetchError> {
        let mut params = vec![
            ("team", team_id.to_string()),
            ("from", from.format("%Y-%m-%d").to_string()),
            ("to", to.format("%Y-%m-%d").to_string()),
            ("status", FIXTURE_STATUSES.to_string()),
        ];
        if let Some(season) = season {
            params.push(("season", season.to_string()));
        }
        let body = self.fetcher.fetch("/fixtures", &params)?;
        Ok(parse_fixtures(&body))
    }

    /// All odds snapshots the API holds for one fixture, across result pages.
    pub fn fixture_odds(&self, fixture_id: u64) -> Result<Vec<OddsSnapshot>, FetchError> {
        let mut out = Vec::new();
        let mut page = 1u32;
        loop {
            let mut params = vec![("fixture", fixture_id.to_string())];
            if page > 1 {
                params.push(("page", page.to_string()));
            }
            let body = self.fetcher.fetch("/odds", &params)?;
            out.extend(
                parse_odds(&body)
                    .into_iter()
                    .filter(|s| s.fixture_id == fixture_id),
            );

            let (_, total) = paging(&body);
            if page >= total {
                break;
            }
            if page >= MAX_ODDS_PAGES {
                warn!(
                    fixture_id,
                    total,
                    fetched = page,
                    "odds paging capped, later pages skipped"
                );
                break;
            }
            page = page.saturating_add(1);
        }
        Ok(out)
    }
}

#[derive(Debug, Deserialize)]
struct TeamItem {
    team: TeamBody,
}

#[derive(Debug, Deserialize)]
struct TeamBody {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct FixtureItem {
    fixture: FixtureBody,
    league: LeagueBody,
    teams: TeamsBody,
    #[serde(default)]
    goals: GoalsBody,
}

#[derive(Debug, Deserialize)]
struct FixtureBody {
    id: u64,
    date: Option<String>,
    timestamp: Option<i64>,
    status: Option<StatusBody>,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    short: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LeagueBody {
    #[serde(default)]
    name: String,
    season: Option<u16>,
    #[serde(default)]
    round: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TeamsBody {
    home: SideBody,
    away: SideBody,
}

#[derive(Debug, Deserialize)]
struct SideBody {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct GoalsBody {
    home: Option<u32>,
    away: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OddsItem {
    fixture: OddsFixtureBody,
    update: Option<String>,
    #[serde(default)]
    bookmakers: Vec<BookmakerBody>,
}

#[derive(Debug, Deserialize)]
struct OddsFixtureBody {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct BookmakerBody {
    id: u32,
    #[serde(default)]
    name: String,
    update: Option<String>,
    #[serde(default)]
    bets: Vec<BetBody>,
}

#[derive(Debug, Deserialize)]
struct BetBody {
    #[serde(default)]
    name: String,
    #[serde(default)]
    values: Vec<BetValue>,
}

#[derive(Debug, Deserialize)]
struct BetValue {
    #[serde(default)]
    value: String,
    odd: Value,
}

fn response_items(body: &Value) -> &[Value] {
    body.get("response")
        .and_then(|v| v.as_array())
        .map(|v| v.as_slice())
        .unwrap_or_default()
}

pub fn parse_teams(body: &Value) -> Vec<TeamRef> {
    response_items(body)
        .iter()
        .filter_map(|item| serde_json::from_value::<TeamItem>(item.clone()).ok())
        .map(|item| TeamRef {
            id: item.team.id,
            name: item.team.name,
        })
        .collect()
}

pub fn pick_team(candidates: &[TeamRef], name: &str) -> Option<TeamRef> {
    let wanted = normalize_team(name);
    candidates
        .iter()
        .find(|t| normalize_team(&t.name) == wanted)
        .or_else(|| candidates.first())
        .cloned()
}

pub fn parse_fixtures(body: &Value) -> Vec<Fixture> {
    let mut out = Vec::new();
    for item in response_items(body) {
        let parsed = match serde_json::from_value::<FixtureItem>(item.clone()) {
            Ok(parsed) => parsed,
            Err(err) => {
                debug!(error = %err, "skipping malformed fixture item");
                continue;
            }
        };
        let Some(kickoff) = parsed
            .fixture
            .timestamp
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .or_else(|| parsed.fixture.date.as_deref().and_then(parse_timestamp))
        else {
            debug!(fixture_id = parsed.fixture.id, "skipping fixture without kickoff time");
            continue;
        };
        out.push(Fixture {
            id: parsed.fixture.id,
            kickoff,
            league: parsed.league.name,
            season: parsed.league.season,
            round: parsed.league.round.unwrap_or_default(),
            home: parsed.teams.home.name,
            away: parsed.teams.away.name,
            status: parsed
                .fixture
                .status
                .and_then(|s| s.short)
                .unwrap_or_default(),
            home_goals: parsed.goals.home,
            away_goals: parsed.goals.away,
        });
    }
    out
}

pub fn parse_fixtures_json(raw: &str) -> Result<Vec<Fixture>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }
    let body: Value = serde_json::from_str(trimmed).context("invalid fixtures json")?;
    Ok(parse_fixtures(&body))
}

/// One snapshot per bookmaker carrying a complete 1x2 price set. Bookmaker
/// update time wins over the item-level update time.
pub fn parse_odds(body: &Value) -> Vec<OddsSnapshot> {
    let mut out = Vec::new();
    for item in response_items(body) {
        let parsed = match serde_json::from_value::<OddsItem>(item.clone()) {
            Ok(parsed) => parsed,
            Err(err) => {
                debug!(error = %err, "skipping malformed odds item");
                continue;
            }
        };
        let item_update = parsed.update.as_deref().and_then(parse_timestamp);
        for book in &parsed.bookmakers {
            let Some(taken_at) = book
                .update
                .as_deref()
                .and_then(parse_timestamp)
                .or(item_update)
            else {
                continue;
            };
            let Some(bet) = book.bets.iter().find(|b| is_match_winner(&b.name)) else {
                continue;
            };
            let Some((home, draw, away)) = extract_1x2(&bet.values) else {
                continue;
            };
            out.push(OddsSnapshot {
                fixture_id: parsed.fixture.id,
                taken_at,
                bookmaker_id: book.id,
                bookmaker: book.name.clone(),
                home,
                draw,
                away,
            });
        }
    }
    out
}

pub fn parse_odds_json(raw: &str) -> Result<Vec<OddsSnapshot>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }
    let body: Value = serde_json::from_str(trimmed).context("invalid odds json")?;
    Ok(parse_odds(&body))
}

/// `(current, total)` from the `paging` block; a missing block means one page.
pub fn paging(body: &Value) -> (u32, u32) {
    let read = |key: &str| {
        body.get("paging")
            .and_then(|p| p.get(key))
            .and_then(|v| v.as_u64())
            .map(|v| v.min(u32::MAX as u64) as u32)
    };
    let current = read("current").unwrap_or(1).max(1);
    let total = read("total").unwrap_or(current);
    (current, total)
}

fn is_match_winner(name: &str) -> bool {
    let n = name.trim();
    n.eq_ignore_ascii_case("match winner") || n.eq_ignore_ascii_case("1x2")
}

fn extract_1x2(values: &[BetValue]) -> Option<(f64, f64, f64)> {
    let mut home = None;
    let mut draw = None;
    let mut away = None;
    for v in values {
        let Some(price) = parse_price(&v.odd) else {
            continue;
        };
        match v.value.trim().to_ascii_lowercase().as_str() {
            "home" | "1" => home = Some(price),
            "draw" | "x" => draw = Some(price),
            "away" | "2" => away = Some(price),
            _ => {}
        }
    }
    Some((home?, draw?, away?))
}

fn parse_price(v: &Value) -> Option<f64> {
    let price = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (price.is_finite() && price > 1.0).then_some(price)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}
