//! Staleness rules for cached dates.
//!
//! Publishing follows the US Pacific news day: a date is only complete once
//! Pacific midnight of the following day has passed. Boundaries are computed
//! as absolute instants through the `America/Los_Angeles` zone so they land
//! at 08:00 UTC in standard time and 07:00 UTC in daylight time.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::America::Los_Angeles;

/// Dates strictly older than this many days may be cached indefinitely.
pub const PERMANENT_CACHE_AGE_DAYS: i64 = 3;

/// Whether a date's data is settled enough to cache authoritatively.
pub fn is_permanent_cache_eligible(date: NaiveDate, today: NaiveDate) -> bool {
    (today - date).num_days() > PERMANENT_CACHE_AGE_DAYS
}

/// The UTC instant at which `date`'s news day is over.
pub fn rescrape_boundary(date: NaiveDate) -> DateTime<Utc> {
    let next_day = date.succ_opt().unwrap_or(date);
    let midnight = next_day.and_time(chrono::NaiveTime::MIN);

    match Los_Angeles.from_local_datetime(&midnight).earliest() {
        Some(local) => local.with_timezone(&Utc),
        // Midnight always exists in this zone; keep the standard-time offset
        // rather than panic if the tz database ever disagrees.
        None => midnight.and_utc() + Duration::hours(8),
    }
}

/// Whether data cached at `cached_at` for `date` must be scraped again.
///
/// Anything cached before the date's Pacific-midnight boundary may be
/// missing late publications. Payloads without a timestamp are always stale.
pub fn should_rescrape(date: NaiveDate, cached_at: Option<DateTime<Utc>>) -> bool {
    match cached_at {
        Some(cached_at) => cached_at < rescrape_boundary(date),
        None => true,
    }
}
