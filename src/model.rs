use chrono::{DateTime, Utc};

/// Short status codes API-FOOTBALL uses while a match is being played or is
/// interrupted. Goals reported in these states are not final.
const IN_PLAY_STATUSES: &[&str] = &["1H", "HT", "2H", "ET", "BT", "P", "SUSP", "INT", "LIVE"];

#[derive(Debug, Clone, PartialEq)]
pub struct Fixture {
    pub id: u64,
    pub kickoff: DateTime<Utc>,
    pub league: String,
    pub season: Option<u16>,
    pub round: String,
    pub home: String,
    pub away: String,
    pub status: String,
    pub home_goals: Option<u32>,
    pub away_goals: Option<u32>,
}

impl Fixture {
    pub fn is_in_play(&self) -> bool {
        let status = self.status.trim();
        IN_PLAY_STATUSES
            .iter()
            .any(|s| s.eq_ignore_ascii_case(status))
    }
}

/// One bookmaker's 1x2 prices for a fixture at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct OddsSnapshot {
    pub fixture_id: u64,
    pub taken_at: DateTime<Utc>,
    pub bookmaker_id: u32,
    pub bookmaker: String,
    pub home: f64,
    pub draw: f64,
    pub away: f64,
}
