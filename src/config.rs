use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use thiserror::Error;

use crate::api_football::DEFAULT_BASE_URL;
use crate::fetch::RetryPolicy;

const DEFAULT_REQUEST_SPACING_MS: u64 = 250;

#[derive(Debug, Parser)]
#[command(
    name = "odds_history",
    version,
    about = "Export a team's fixtures with pre-match 1x2 odds to an xlsx workbook"
)]
pub struct Cli {
    /// Team name as the API knows it, e.g. "Arsenal"
    #[arg(long)]
    pub team: String,

    /// First day of the range (YYYY-MM-DD)
    #[arg(long, value_name = "YYYY-MM-DD")]
    pub from: NaiveDate,

    /// Last day of the range, inclusive (YYYY-MM-DD)
    #[arg(long, value_name = "YYYY-MM-DD")]
    pub to: NaiveDate,

    /// Keep only fixtures whose league name contains this text
    #[arg(long)]
    pub league: Option<String>,

    /// Season start year, e.g. 2024
    #[arg(long)]
    pub season: Option<u16>,

    /// Output workbook path
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// dotenv file holding API_FOOTBALL_KEY (defaults to .env.local and .env)
    #[arg(long, value_name = "PATH")]
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("--team must not be empty")]
    EmptyTeam,
    #[error("--from {from} is after --to {to}")]
    InvertedRange { from: NaiveDate, to: NaiveDate },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub team: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub league: Option<String>,
    pub season: Option<u16>,
    pub out: PathBuf,
}

impl RunConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let team = cli.team.trim().to_string();
        if team.is_empty() {
            return Err(ConfigError::EmptyTeam);
        }
        if cli.from > cli.to {
            return Err(ConfigError::InvertedRange {
                from: cli.from,
                to: cli.to,
            });
        }
        let league = cli
            .league
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let out = cli
            .out
            .clone()
            .unwrap_or_else(|| default_out_path(&team, cli.from, cli.to));

        Ok(Self {
            team,
            from: cli.from,
            to: cli.to,
            league,
            season: cli.season,
            out,
        })
    }
}

/// `odds_history_<team-slug>_<from>_<to>.xlsx` in the working directory.
pub fn default_out_path(team: &str, from: NaiveDate, to: NaiveDate) -> PathBuf {
    let slug = team
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("_");
    let slug = if slug.is_empty() { "team".to_string() } else { slug };
    PathBuf::from(format!(
        "odds_history_{slug}_{}_{}.xlsx",
        from.format("%Y-%m-%d"),
        to.format("%Y-%m-%d")
    ))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiSettings {
    pub api_key: String,
    pub base_url: String,
    pub retry: RetryPolicy,
    /// Pause after each per-fixture odds request.
    pub request_spacing: Duration,
}

impl ApiSettings {
    /// `None` when no key is configured; callers fall back to sample data.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let api_key = non_empty("API_FOOTBALL_KEY").or_else(|| non_empty("APISPORTS_KEY"))?;
        let base_url = non_empty("API_FOOTBALL_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let number = |key: &str| non_empty(key).and_then(|v| v.parse::<u64>().ok());

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: number("ODDS_HISTORY_MAX_ATTEMPTS")
                .map(|v| v.clamp(1, 10) as u32)
                .unwrap_or(defaults.max_attempts),
            base_delay: number("ODDS_HISTORY_BASE_DELAY_MS")
                .map(|v| Duration::from_millis(v.clamp(10, 60_000)))
                .unwrap_or(defaults.base_delay),
            ..defaults
        };
        let request_spacing = Duration::from_millis(
            number("ODDS_HISTORY_REQUEST_SPACING_MS")
                .unwrap_or(DEFAULT_REQUEST_SPACING_MS)
                .min(10_000),
        );

        Some(Self {
            api_key,
            base_url,
            retry,
            request_spacing,
        })
    }
}

/// Load dotenv files into the process environment without overriding
/// variables that are already set. An explicit path must exist; otherwise
/// `.env.local` and `.env` are read when present.
pub fn load_env_file(path: Option<&Path>) -> Result<Vec<PathBuf>> {
    if let Some(path) = path {
        dotenvy::from_path(path)
            .with_context(|| format!("failed loading env file {}", path.display()))?;
        return Ok(vec![path.to_path_buf()]);
    }
    Ok([".env.local", ".env"]
        .into_iter()
        .filter_map(|name| dotenvy::from_filename(name).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn cli(team: &str, from: &str, to: &str) -> Cli {
        Cli::parse_from(["odds_history", "--team", team, "--from", from, "--to", to])
    }

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_output_name_is_derived() {
        let cfg = RunConfig::from_cli(&cli("Real Madrid", "2025-01-01", "2025-11-01")).unwrap();
        assert_eq!(
            cfg.out,
            PathBuf::from("odds_history_real_madrid_2025-01-01_2025-11-01.xlsx")
        );
    }

    #[test]
    fn inverted_range_is_rejected() {
        let err = RunConfig::from_cli(&cli("Arsenal", "2025-06-30", "2024-08-01")).unwrap_err();
        assert!(matches!(err, ConfigError::InvertedRange { .. }));
        let err = RunConfig::from_cli(&cli("  ", "2024-08-01", "2024-08-02")).unwrap_err();
        assert_eq!(err, ConfigError::EmptyTeam);
    }

    #[test]
    fn optional_flags_parse() {
        let parsed = Cli::parse_from([
            "odds_history",
            "--team",
            "Arsenal",
            "--from",
            "2024-08-01",
            "--to",
            "2025-06-30",
            "--league",
            " Premier League ",
            "--season",
            "2024",
            "--out",
            "out.xlsx",
        ]);
        let cfg = RunConfig::from_cli(&parsed).unwrap();
        assert_eq!(cfg.league.as_deref(), Some("Premier League"));
        assert_eq!(cfg.season, Some(2024));
        assert_eq!(cfg.out, PathBuf::from("out.xlsx"));
    }

    #[test]
    fn bad_date_is_a_parse_error() {
        let res = Cli::try_parse_from(["odds_history", "--team", "A", "--from", "01/08/2024", "--to", "2024-09-01"]);
        assert!(res.is_err());
    }

    #[test]
    fn missing_or_blank_key_means_no_api() {
        assert_eq!(ApiSettings::from_lookup(lookup(&[])), None);
        assert_eq!(ApiSettings::from_lookup(lookup(&[("API_FOOTBALL_KEY", "  ")])), None);
    }

    #[test]
    fn api_settings_read_overrides() {
        let settings = ApiSettings::from_lookup(lookup(&[
            ("APISPORTS_KEY", "abc"),
            ("API_FOOTBALL_BASE_URL", "http://127.0.0.1:9"),
            ("ODDS_HISTORY_MAX_ATTEMPTS", "50"),
            ("ODDS_HISTORY_BASE_DELAY_MS", "20"),
            ("ODDS_HISTORY_REQUEST_SPACING_MS", "0"),
        ]))
        .expect("key present");
        assert_eq!(settings.api_key, "abc");
        assert_eq!(settings.base_url, "http://127.0.0.1:9");
        assert_eq!(settings.retry.max_attempts, 10);
        assert_eq!(settings.retry.base_delay, Duration::from_millis(20));
        assert_eq!(settings.request_spacing, Duration::ZERO);
    }

    #[test]
    fn defaults_apply_without_overrides() {
        let settings = ApiSettings::from_lookup(lookup(&[("API_FOOTBALL_KEY", "k")])).unwrap();
        assert_eq!(settings.base_url, DEFAULT_BASE_URL);
        assert_eq!(settings.retry, RetryPolicy::default());
        assert_eq!(settings.request_spacing, Duration::from_millis(250));
    }
}
