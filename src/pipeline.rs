use std::collections::HashSet;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::api_football::{ApiFootball, TeamRef};
use crate::config::RunConfig;
use crate::export::{ExportReport, write_workbook};
use crate::fetch::{FetchError, Pause, Transport};
use crate::model::{Fixture, OddsSnapshot};
use crate::odds_select::select_prematch;
use crate::report::{MatchRecord, Summary, build_records};

/// Where fixtures and odds come from for one run.
pub trait MatchSource {
    fn label(&self) -> &'static str;
    fn resolve_team(&self, name: &str) -> Result<Option<TeamRef>, FetchError>;
    fn fixtures(&self, team: &TeamRef, cfg: &RunConfig) -> Result<Vec<Fixture>, FetchError>;
    fn odds(&self, fixture: &Fixture) -> Result<Vec<OddsSnapshot>, FetchError>;
}

pub struct LiveSource<T, P> {
    api: ApiFootball<T, P>,
    request_spacing: Duration,
}

impl<T: Transport, P: Pause> LiveSource<T, P> {
    pub fn new(api: ApiFootball<T, P>, request_spacing: Duration) -> Self {
        Self {
            api,
            request_spacing,
        }
    }
}

impl<T: Transport, P: Pause> MatchSource for LiveSource<T, P> {
    fn label(&self) -> &'static str {
        "live"
    }

    fn resolve_team(&self, name: &str) -> Result<Option<TeamRef>, FetchError> {
        self.api.find_team(name)
    }

    fn fixtures(&self, team: &TeamRef, cfg: &RunConfig) -> Result<Vec<Fixture>, FetchError> {
        self.api.list_fixtures(team.id, cfg.from, cfg.to, cfg.season)
    }

    fn odds(&self, fixture: &Fixture) -> Result<Vec<OddsSnapshot>, FetchError> {
        let result = self.api.fixture_odds(fixture.id);
        if !self.request_spacing.is_zero() {
            self.api.fetcher().pause().pause(self.request_spacing);
        }
        result
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("team {0:?} not found")]
    TeamNotFound(String),
    #[error("{stage} failed: {source}")]
    Fetch {
        stage: &'static str,
        #[source]
        source: FetchError,
    },
    #[error("export failed")]
    Export(#[source] anyhow::Error),
}

impl PipelineError {
    fn fetch(stage: &'static str, source: FetchError) -> Self {
        Self::Fetch { stage, source }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Fetch { source, .. } if source.is_auth())
    }
}

#[derive(Debug)]
pub struct OddsFailure {
    pub fixture_id: u64,
    pub error: String,
}

pub struct RunReport {
    pub source: &'static str,
    pub team: String,
    pub fixtures: usize,
    pub records: Vec<MatchRecord>,
    pub summary: Summary,
    pub odds_failures: Vec<OddsFailure>,
    pub export: ExportReport,
}

/// Keep fixtures inside the requested window and filters, one per id, in
/// kickoff order.
pub fn filter_fixtures(fixtures: Vec<Fixture>, cfg: &RunConfig) -> Vec<Fixture> {
    let league = cfg.league.as_deref().map(str::to_lowercase);
    let mut seen = HashSet::new();
    let mut out: Vec<Fixture> = fixtures
        .into_iter()
        .filter(|f| {
            let day = f.kickoff.date_naive();
            day >= cfg.from && day <= cfg.to
        })
        .filter(|f| match league.as_deref() {
            Some(wanted) => f.league.to_lowercase().contains(wanted),
            None => true,
        })
        .filter(|f| cfg.season.is_none() || f.season == cfg.season)
        .filter(|f| seen.insert(f.id))
        .collect();
    out.sort_by_key(|f| (f.kickoff, f.id));
    out
}

/// Fetch, select, build and export. Nothing is written unless every
/// run-level step succeeded; odds lookups that fail for a single fixture
/// leave that fixture without odds.
pub fn run<S: MatchSource + ?Sized>(cfg: &RunConfig, source: &S) -> Result<RunReport, PipelineError> {
    info!(
        source = source.label(),
        team = %cfg.team,
        from = %cfg.from,
        to = %cfg.to,
        "starting run"
    );

    let team = source
        .resolve_team(&cfg.team)
        .map_err(|e| PipelineError::fetch("team lookup", e))?
        .ok_or_else(|| PipelineError::TeamNotFound(cfg.team.clone()))?;
    info!(team_id = team.id, team = %team.name, "team resolved");

    let fetched = source
        .fixtures(&team, cfg)
        .map_err(|e| PipelineError::fetch("fixtures", e))?;
    let fetched_count = fetched.len();
    let fixtures = filter_fixtures(fetched, cfg);
    info!(fetched = fetched_count, kept = fixtures.len(), "fixtures loaded");

    let mut selected: Vec<Option<OddsSnapshot>> = Vec::with_capacity(fixtures.len());
    let mut odds_failures = Vec::new();
    for fixture in &fixtures {
        match source.odds(fixture) {
            Ok(snapshots) => {
                let pick = select_prematch(fixture.kickoff, &snapshots).cloned();
                if pick.is_none() {
                    info!(
                        fixture_id = fixture.id,
                        snapshots = snapshots.len(),
                        "no pre-match odds"
                    );
                }
                selected.push(pick);
            }
            Err(err) if err.is_run_fatal() => return Err(PipelineError::fetch("odds", err)),
            Err(err) => {
                warn!(fixture_id = fixture.id, error = %err, "odds lookup failed, row kept without odds");
                odds_failures.push(OddsFailure {
                    fixture_id: fixture.id,
                    error: err.to_string(),
                });
                selected.push(None);
            }
        }
    }

    let records = build_records(
        &team.name,
        fixtures.iter().zip(selected.iter().map(Option::as_ref)),
    );
    let summary = Summary::from_records(&team.name, cfg.from, cfg.to, &records);
    let export = write_workbook(&cfg.out, &records, &summary).map_err(PipelineError::Export)?;
    info!(
        path = %export.path.display(),
        rows = export.data_rows,
        "workbook written"
    );

    Ok(RunReport {
        source: source.label(),
        team: team.name,
        fixtures: fixtures.len(),
        records,
        summary,
        odds_failures,
        export,
    })
}
