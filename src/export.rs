use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rust_xlsxwriter::{Workbook, Worksheet};

use crate::report::{MatchRecord, Summary};

pub const DATA_SHEET: &str = "data";
pub const SUMMARY_SHEET: &str = "summary";

pub const DATA_COLUMNS: [&str; 16] = [
    "DateUTC",
    "League",
    "Season",
    "Round",
    "Home",
    "Away",
    "FixtureID",
    "Status",
    "HomeGoals",
    "AwayGoals",
    "Outcome",
    "Odds_H",
    "Odds_D",
    "Odds_A",
    "TeamSide",
    "TeamOdds",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
    Empty,
}

impl Cell {
    fn text(value: &str) -> Self {
        Cell::Text(value.to_string())
    }

    fn opt_number<T: Into<f64>>(value: Option<T>) -> Self {
        value.map(|v| Cell::Number(v.into())).unwrap_or(Cell::Empty)
    }
}

pub struct ExportReport {
    pub path: PathBuf,
    pub data_rows: usize,
    pub summary_rows: usize,
}

/// Header plus one row per record, in `DATA_COLUMNS` order. Missing values
/// become empty cells, never zero.
pub fn data_rows(records: &[MatchRecord]) -> Vec<Vec<Cell>> {
    let mut rows = vec![DATA_COLUMNS.iter().map(|c| Cell::text(c)).collect()];
    rows.extend(records.iter().map(record_row));
    rows
}

fn record_row(record: &MatchRecord) -> Vec<Cell> {
    let odds = record.odds;
    vec![
        Cell::Text(record.kickoff.format("%Y-%m-%d %H:%M:%S").to_string()),
        Cell::text(&record.league),
        Cell::opt_number(record.season),
        Cell::text(&record.round),
        Cell::text(&record.home),
        Cell::text(&record.away),
        Cell::Number(record.fixture_id as f64),
        Cell::text(&record.status),
        Cell::opt_number(record.home_goals),
        Cell::opt_number(record.away_goals),
        record
            .outcome
            .map(|o| Cell::text(o.code()))
            .unwrap_or(Cell::Empty),
        Cell::opt_number(odds.map(|o| o.home)),
        Cell::opt_number(odds.map(|o| o.draw)),
        Cell::opt_number(odds.map(|o| o.away)),
        Cell::text(record.team_side.label()),
        Cell::opt_number(record.team_odds()),
    ]
}

pub fn summary_rows(summary: &Summary) -> Vec<Vec<Cell>> {
    let count = |n: usize| Cell::Number(n as f64);
    let rounded = |v: Option<f64>| Cell::opt_number(v.map(|x| (x * 100.0).round() / 100.0));
    let period = format!(
        "{} to {}",
        summary.from.format("%Y-%m-%d"),
        summary.to.format("%Y-%m-%d")
    );
    let pairs = vec![
        ("Team", Cell::text(&summary.team)),
        ("Period", Cell::Text(period)),
        ("Matches", count(summary.matches)),
        ("MatchesWithOdds", count(summary.with_odds)),
        ("Played", count(summary.played)),
        ("Wins", count(summary.wins)),
        ("Draws", count(summary.draws)),
        ("Losses", count(summary.losses)),
        ("FavouritePicks", count(summary.favourite_picks)),
        ("FavouriteCorrect", count(summary.favourite_correct)),
        ("FavouriteHitRatePct", rounded(summary.favourite_hit_rate())),
        ("AvgTeamOdds", rounded(summary.avg_team_odds)),
    ];

    let mut rows = vec![vec![Cell::text("Metric"), Cell::text("Value")]];
    rows.extend(
        pairs
            .into_iter()
            .map(|(metric, value)| vec![Cell::text(metric), value]),
    );
    rows
}

/// Write both sheets to `path`. The workbook is saved next to the target
/// first and moved into place, so a failed save leaves no file at `path`.
pub fn write_workbook(path: &Path, records: &[MatchRecord], summary: &Summary) -> Result<ExportReport> {
    let data = data_rows(records);
    let summary = summary_rows(summary);

    let mut workbook = Workbook::new();
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name(DATA_SHEET)?;
        write_rows(sheet, &data)?;
    }
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name(SUMMARY_SHEET)?;
        write_rows(sheet, &summary)?;
    }

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed creating output dir {}", dir.display()))?;
    }
    let tmp = path.with_extension("xlsx.tmp");
    if let Err(err) = workbook.save(&tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(err).with_context(|| format!("failed writing workbook to {}", tmp.display()));
    }
    fs::rename(&tmp, path).with_context(|| format!("failed moving workbook to {}", path.display()))?;

    Ok(ExportReport {
        path: path.to_path_buf(),
        data_rows: data.len().saturating_sub(1),
        summary_rows: summary.len().saturating_sub(1),
    })
}

fn write_rows(worksheet: &mut Worksheet, rows: &[Vec<Cell>]) -> Result<()> {
    for (row_idx, row) in rows.iter().enumerate() {
        for (col_idx, value) in row.iter().enumerate() {
            let (r, c) = (row_idx as u32, col_idx as u16);
            match value {
                Cell::Text(s) => {
                    worksheet
                        .write_string(r, c, s)
                        .with_context(|| format!("write cell ({row_idx},{col_idx})"))?;
                }
                Cell::Number(n) => {
                    worksheet
                        .write_number(r, c, *n)
                        .with_context(|| format!("write cell ({row_idx},{col_idx})"))?;
                }
                Cell::Empty => continue,
            }
        }
    }
    Ok(())
}
