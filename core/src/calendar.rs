//! Snapshot calendar — the monthly as-of grid.
//!
//! Every stage operates on month-end snapshot dates. The grid spans the
//! observed transaction range at monthly granularity; a snapshot date is
//! always the last calendar day of its month.

use chrono::{Datelike, Duration, NaiveDate};

/// Last calendar day of `date`'s month.
pub fn month_end_of(date: NaiveDate) -> NaiveDate {
    let (y, m) = (date.year(), date.month());
    let first_of_next = if m == 12 {
        NaiveDate::from_ymd_opt(y + 1, 1, 1).expect("valid date")
    } else {
        NaiveDate::from_ymd_opt(y, m + 1, 1).expect("valid date")
    };
    first_of_next - Duration::days(1)
}

/// All month-end dates from `first`'s month through `last`'s month, inclusive.
/// Returns an empty vec when `first > last`.
pub fn month_ends_between(first: NaiveDate, last: NaiveDate) -> Vec<NaiveDate> {
    if first > last {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut cursor = month_end_of(first);
    let stop = month_end_of(last);
    while cursor <= stop {
        out.push(cursor);
        cursor = month_end_of(cursor + Duration::days(1));
    }
    out
}

/// Calendar month key, e.g. "2011-07".
pub fn year_month(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}
