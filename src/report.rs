use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use tracing::warn;

use crate::model::{Fixture, OddsSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Home,
    Draw,
    Away,
}

impl Outcome {
    /// Result from final goal counts; `None` until both are known.
    pub fn from_goals(home: Option<u32>, away: Option<u32>) -> Option<Self> {
        let (home, away) = (home?, away?);
        Some(if home > away {
            Outcome::Home
        } else if home == away {
            Outcome::Draw
        } else {
            Outcome::Away
        })
    }

    pub fn code(self) -> &'static str {
        match self {
            Outcome::Home => "H",
            Outcome::Draw => "D",
            Outcome::Away => "A",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamSide {
    Home,
    Away,
}

impl TeamSide {
    pub fn label(self) -> &'static str {
        match self {
            TeamSide::Home => "Home",
            TeamSide::Away => "Away",
        }
    }

    fn winning_outcome(self) -> Outcome {
        match self {
            TeamSide::Home => Outcome::Home,
            TeamSide::Away => Outcome::Away,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prices {
    pub home: f64,
    pub draw: f64,
    pub away: f64,
}

impl Prices {
    /// Shortest price; ties resolve Home, then Draw, then Away.
    pub fn favourite(&self) -> Outcome {
        let mut best = (Outcome::Home, self.home);
        for candidate in [(Outcome::Draw, self.draw), (Outcome::Away, self.away)] {
            if candidate.1 < best.1 {
                best = candidate;
            }
        }
        best.0
    }
}

impl From<&OddsSnapshot> for Prices {
    fn from(s: &OddsSnapshot) -> Self {
        Self {
            home: s.home,
            draw: s.draw,
            away: s.away,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchRecord {
    pub kickoff: DateTime<Utc>,
    pub league: String,
    pub season: Option<u16>,
    pub round: String,
    pub home: String,
    pub away: String,
    pub fixture_id: u64,
    pub status: String,
    pub home_goals: Option<u32>,
    pub away_goals: Option<u32>,
    pub outcome: Option<Outcome>,
    pub odds: Option<Prices>,
    pub team_side: TeamSide,
}

impl MatchRecord {
    pub fn team_odds(&self) -> Option<f64> {
        let odds = self.odds?;
        Some(match self.team_side {
            TeamSide::Home => odds.home,
            TeamSide::Away => odds.away,
        })
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("fixture {fixture_id} ({home} vs {away}) does not involve {team}")]
pub struct DataIntegrityError {
    pub fixture_id: u64,
    pub team: String,
    pub home: String,
    pub away: String,
}

/// Case-insensitive, whitespace-collapsed form used to compare team names.
pub fn normalize_team(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn team_side(team: &str, fixture: &Fixture) -> Option<TeamSide> {
    let wanted = normalize_team(team);
    if wanted.is_empty() {
        return None;
    }
    if normalize_team(&fixture.home) == wanted {
        Some(TeamSide::Home)
    } else if normalize_team(&fixture.away) == wanted {
        Some(TeamSide::Away)
    } else {
        None
    }
}

pub fn build_record(
    team: &str,
    fixture: &Fixture,
    odds: Option<&OddsSnapshot>,
) -> Result<MatchRecord, DataIntegrityError> {
    let Some(side) = team_side(team, fixture) else {
        return Err(DataIntegrityError {
            fixture_id: fixture.id,
            team: team.to_string(),
            home: fixture.home.clone(),
            away: fixture.away.clone(),
        });
    };
    let outcome = if fixture.is_in_play() {
        None
    } else {
        Outcome::from_goals(fixture.home_goals, fixture.away_goals)
    };

    Ok(MatchRecord {
        kickoff: fixture.kickoff,
        league: fixture.league.clone(),
        season: fixture.season,
        round: fixture.round.clone(),
        home: fixture.home.clone(),
        away: fixture.away.clone(),
        fixture_id: fixture.id,
        status: fixture.status.clone(),
        home_goals: fixture.home_goals,
        away_goals: fixture.away_goals,
        outcome,
        odds: odds.map(Prices::from),
        team_side: side,
    })
}

/// Build records for every fixture, dropping and logging the ones the team
/// is not part of. Output keeps kickoff order.
pub fn build_records<'a, I>(team: &str, rows: I) -> Vec<MatchRecord>
where
    I: IntoIterator<Item = (&'a Fixture, Option<&'a OddsSnapshot>)>,
{
    let mut out = Vec::new();
    for (fixture, odds) in rows {
        match build_record(team, fixture, odds) {
            Ok(record) => out.push(record),
            Err(err) => warn!(error = %err, "excluding fixture"),
        }
    }
    out.sort_by(|a, b| a.kickoff.cmp(&b.kickoff).then(a.fixture_id.cmp(&b.fixture_id)));
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub team: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub matches: usize,
    pub with_odds: usize,
    pub played: usize,
    pub wins: usize,
    pub draws: usize,
    pub losses: usize,
    /// Played matches with odds, i.e. where the favourite baseline applies.
    pub favourite_picks: usize,
    pub favourite_correct: usize,
    pub avg_team_odds: Option<f64>,
}

impl Summary {
    pub fn from_records(team: &str, from: NaiveDate, to: NaiveDate, records: &[MatchRecord]) -> Self {
        let mut summary = Summary {
            team: team.to_string(),
            from,
            to,
            matches: records.len(),
            with_odds: 0,
            played: 0,
            wins: 0,
            draws: 0,
            losses: 0,
            favourite_picks: 0,
            favourite_correct: 0,
            avg_team_odds: None,
        };
        let mut team_odds_sum = 0.0;

        for record in records {
            if let Some(odds) = record.odds {
                summary.with_odds += 1;
                if let Some(price) = record.team_odds() {
                    team_odds_sum += price;
                }
                if let Some(outcome) = record.outcome {
                    summary.favourite_picks += 1;
                    if odds.favourite() == outcome {
                        summary.favourite_correct += 1;
                    }
                }
            }
            let Some(outcome) = record.outcome else {
                continue;
            };
            summary.played += 1;
            if outcome == Outcome::Draw {
                summary.draws += 1;
            } else if outcome == record.team_side.winning_outcome() {
                summary.wins += 1;
            } else {
                summary.losses += 1;
            }
        }

        if summary.with_odds > 0 {
            summary.avg_team_odds = Some(team_odds_sum / summary.with_odds as f64);
        }
        summary
    }

    pub fn favourite_hit_rate(&self) -> Option<f64> {
        if self.favourite_picks == 0 {
            return None;
        }
        Some(self.favourite_correct as f64 * 100.0 / self.favourite_picks as f64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn fixture(home: &str, away: &str, goals: Option<(u32, u32)>) -> Fixture {
        Fixture {
            id: 7,
            kickoff: Utc.with_ymd_and_hms(2024, 8, 17, 14, 0, 0).unwrap(),
            league: "Premier League".to_string(),
            season: Some(2024),
            round: "Regular Season - 1".to_string(),
            home: home.to_string(),
            away: away.to_string(),
            status: if goals.is_some() { "FT" } else { "NS" }.to_string(),
            home_goals: goals.map(|g| g.0),
            away_goals: goals.map(|g| g.1),
        }
    }

    fn snapshot(home: f64, draw: f64, away: f64) -> OddsSnapshot {
        OddsSnapshot {
            fixture_id: 7,
            taken_at: Utc.with_ymd_and_hms(2024, 8, 17, 13, 0, 0).unwrap(),
            bookmaker_id: 8,
            bookmaker: "Bet365".to_string(),
            home,
            draw,
            away,
        }
    }

    #[test]
    fn outcome_table() {
        assert_eq!(Outcome::from_goals(Some(2), Some(1)), Some(Outcome::Home));
        assert_eq!(Outcome::from_goals(Some(1), Some(1)), Some(Outcome::Draw));
        assert_eq!(Outcome::from_goals(Some(0), Some(3)), Some(Outcome::Away));
        assert_eq!(Outcome::from_goals(None, Some(3)), None);
        assert_eq!(Outcome::from_goals(None, None), None);
    }

    #[test]
    fn side_match_ignores_case_and_spacing() {
        let f = fixture("Arsenal", "Manchester  United", None);
        assert_eq!(team_side("arsenal", &f), Some(TeamSide::Home));
        assert_eq!(team_side(" MANCHESTER UNITED ", &f), Some(TeamSide::Away));
        assert_eq!(team_side("Manchester", &f), None);
    }

    #[test]
    fn team_odds_follow_side() {
        let snap = snapshot(1.75, 3.4, 4.5);
        let home = build_record("Arsenal", &fixture("Arsenal", "Wolves", Some((2, 0))), Some(&snap))
            .expect("home side");
        assert_eq!(home.team_odds(), Some(1.75));
        let away = build_record("Wolves", &fixture("Arsenal", "Wolves", Some((2, 0))), Some(&snap))
            .expect("away side");
        assert_eq!(away.team_odds(), Some(4.5));
        assert_eq!(away.outcome, Some(Outcome::Home));
    }

    #[test]
    fn foreign_fixture_is_an_integrity_error() {
        let err = build_record("Arsenal", &fixture("Chelsea", "Spurs", None), None).unwrap_err();
        assert_eq!(err.fixture_id, 7);
        let kept = build_records(
            "Arsenal",
            [(&fixture("Chelsea", "Spurs", None), None)],
        );
        assert!(kept.is_empty());
    }

    #[test]
    fn live_goals_do_not_produce_outcome() {
        let mut f = fixture("Arsenal", "Wolves", Some((1, 0)));
        f.status = "2H".to_string();
        let record = build_record("Arsenal", &f, None).expect("record");
        assert_eq!(record.outcome, None);
        assert_eq!(record.home_goals, Some(1));
        assert_eq!(record.odds, None);
        assert_eq!(record.team_odds(), None);
    }

    #[test]
    fn favourite_ties_resolve_home_first() {
        let p = Prices {
            home: 2.5,
            draw: 2.5,
            away: 3.0,
        };
        assert_eq!(p.favourite(), Outcome::Home);
        let p = Prices {
            home: 3.0,
            draw: 2.8,
            away: 2.8,
        };
        assert_eq!(p.favourite(), Outcome::Draw);
    }

    #[test]
    fn summary_counts_results_and_baseline() {
        let win = build_record(
            "Arsenal",
            &fixture("Arsenal", "Wolves", Some((2, 0))),
            Some(&snapshot(1.5, 4.0, 6.0)),
        )
        .unwrap();
        let loss = build_record(
            "Arsenal",
            &fixture("Chelsea", "Arsenal", Some((1, 0))),
            Some(&snapshot(3.0, 3.4, 2.2)),
        )
        .unwrap();
        let upcoming = build_record("Arsenal", &fixture("Arsenal", "Spurs", None), None).unwrap();
        let from = NaiveDate::from_ymd_opt(2024, 8, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 9, 1).unwrap();

        let s = Summary::from_records("Arsenal", from, to, &[win, loss, upcoming]);
        assert_eq!(s.matches, 3);
        assert_eq!(s.with_odds, 2);
        assert_eq!(s.played, 2);
        assert_eq!((s.wins, s.draws, s.losses), (1, 0, 1));
        assert_eq!(s.favourite_picks, 2);
        assert_eq!(s.favourite_correct, 1);
        assert_eq!(s.favourite_hit_rate(), Some(50.0));
        assert!((s.avg_team_odds.unwrap() - 1.85).abs() < 1e-9);
    }
}
