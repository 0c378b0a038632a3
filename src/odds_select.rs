use std::cmp::{Ordering, Reverse};

use chrono::{DateTime, Utc};

use crate::model::OddsSnapshot;

/// Pick the pre-match snapshot for a fixture kicking off at `kickoff`.
///
/// Snapshots stamped at or after kickoff are ignored. Of the rest, the latest
/// one wins; bookmakers quoting at the same instant are ordered by id and the
/// lowest id is taken. Input order does not matter. `None` means the fixture
/// carries no odds.
pub fn select_prematch(
    kickoff: DateTime<Utc>,
    snapshots: &[OddsSnapshot],
) -> Option<&OddsSnapshot> {
    snapshots
        .iter()
        .filter(|s| s.taken_at < kickoff)
        .max_by(|a, b| compare_recency(a, b))
}

fn compare_recency(a: &OddsSnapshot, b: &OddsSnapshot) -> Ordering {
    (a.taken_at, Reverse(a.bookmaker_id)).cmp(&(b.taken_at, Reverse(b.bookmaker_id)))
}
