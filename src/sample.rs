//! Offline dataset used when no API key is configured. It is stored in the
//! same JSON shape the API returns and goes through the same parsers, so a
//! sample run produces the same workbook layout as a live one.

use anyhow::{Context, Result};
use tracing::warn;

use crate::api_football::{TeamRef, parse_fixtures_json, parse_odds_json};
use crate::config::RunConfig;
use crate::fetch::FetchError;
use crate::model::{Fixture, OddsSnapshot};
use crate::pipeline::MatchSource;
use crate::report::{TeamSide, team_side};

const SAMPLE_FIXTURES: &str = include_str!("../assets/sample_fixtures.json");
const SAMPLE_ODDS: &str = include_str!("../assets/sample_odds.json");

pub struct SampleSource {
    fixtures: Vec<Fixture>,
    odds: Vec<OddsSnapshot>,
}

impl SampleSource {
    pub fn builtin() -> Result<Self> {
        Ok(Self {
            fixtures: parse_fixtures_json(SAMPLE_FIXTURES).context("built-in sample fixtures")?,
            odds: parse_odds_json(SAMPLE_ODDS).context("built-in sample odds")?,
        })
    }

    pub fn fixture_count(&self) -> usize {
        self.fixtures.len()
    }
}

impl MatchSource for SampleSource {
    fn label(&self) -> &'static str {
        "sample"
    }

    /// Uses the dataset's spelling when the team appears in it. Unknown teams
    /// still resolve so the run yields an empty but well-formed workbook.
    fn resolve_team(&self, name: &str) -> Result<Option<TeamRef>, FetchError> {
        let known = self.fixtures.iter().find_map(|f| match team_side(name, f)? {
            TeamSide::Home => Some(f.home.clone()),
            TeamSide::Away => Some(f.away.clone()),
        });
        let name = known.unwrap_or_else(|| {
            warn!(team = name.trim(), "team not present in the sample dataset");
            name.trim().to_string()
        });
        Ok(Some(TeamRef { id: 0, name }))
    }

    fn fixtures(&self, team: &TeamRef, _cfg: &RunConfig) -> Result<Vec<Fixture>, FetchError> {
        Ok(self
            .fixtures
            .iter()
            .filter(|f| team_side(&team.name, f).is_some())
            .cloned()
            .collect())
    }

    fn odds(&self, fixture: &Fixture) -> Result<Vec<OddsSnapshot>, FetchError> {
        Ok(self
            .odds
            .iter()
            .filter(|s| s.fixture_id == fixture.id)
            .cloned()
            .collect())
    }
}
