// SPDX-License-Identifier: MIT OR Apache-2.0
//! JST date derivation.
//!
//! Dated object partitions (`processed/{jstDate}/...`) and the legacy
//! server-side quota counter are keyed by the Japan Standard Time calendar
//! date, regardless of where a worker runs.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

/// UTC+9, no DST.
fn jst() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).expect("JST offset is valid")
}

/// The JST calendar date of an instant.
pub fn jst_date(at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&jst()).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jst_rolls_over_at_15_utc() {
        let before: DateTime<Utc> = "2026-01-14T14:59:59Z".parse().unwrap();
        let after: DateTime<Utc> = "2026-01-14T15:00:00Z".parse().unwrap();
        assert_eq!(jst_date(before).to_string(), "2026-01-14");
        assert_eq!(jst_date(after).to_string(), "2026-01-15");
    }
}
