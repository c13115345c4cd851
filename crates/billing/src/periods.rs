//! Billing period arithmetic
//!
//! Renewal periods advance by exactly one calendar month, clamping the day to
//! the end of the target month (Jan 31 -> Feb 28/29). Half-open windows
//! `[start, end)` everywhere.

use time::{Date, Month, OffsetDateTime};

/// Advance a timestamp by exactly one calendar month, clamping the day
pub fn add_one_month(ts: OffsetDateTime) -> OffsetDateTime {
    let date = ts.date();
    let mut year = date.year();
    let month = date.month().next();
    if month == Month::January {
        year += 1;
    }

    let max_day = time::util::days_in_year_month(year, month);
    let day = date.day().min(max_day);

    // Cannot fail: day is clamped into the target month's range
    let advanced = Date::from_calendar_date(year, month, day).unwrap_or(date);
    ts.replace_date(advanced)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use time::macros::datetime;

    #[test]
    fn plain_month_advance() {
        assert_eq!(
            add_one_month(datetime!(2026-03-15 10:00 UTC)),
            datetime!(2026-04-15 10:00 UTC)
        );
    }

    #[test]
    fn clamps_to_end_of_february() {
        assert_eq!(
            add_one_month(datetime!(2026-01-31 00:00 UTC)),
            datetime!(2026-02-28 00:00 UTC)
        );
        // Leap year
        assert_eq!(
            add_one_month(datetime!(2024-01-31 00:00 UTC)),
            datetime!(2024-02-29 00:00 UTC)
        );
    }

    #[test]
    fn clamps_31_to_30() {
        assert_eq!(
            add_one_month(datetime!(2026-05-31 12:30 UTC)),
            datetime!(2026-06-30 12:30 UTC)
        );
    }

    #[test]
    fn december_rolls_into_next_year() {
        assert_eq!(
            add_one_month(datetime!(2025-12-31 23:59 UTC)),
            datetime!(2026-01-31 23:59 UTC)
        );
    }

    #[test]
    fn preserves_time_of_day() {
        let advanced = add_one_month(datetime!(2026-07-04 08:45:30 UTC));
        assert_eq!(advanced, datetime!(2026-08-04 08:45:30 UTC));
    }
}
