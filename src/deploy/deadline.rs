//! # Daily reboot deadline.

use chrono::{DateTime, Days, Local, LocalResult, NaiveDate, NaiveTime, TimeZone};

/// Next occurrence of `reboot_at` strictly after `now`.
///
/// Today at `reboot_at` when that is still ahead, otherwise tomorrow at
/// `reboot_at`. A local time skipped by a DST change resolves to the first
/// valid instant after it; an ambiguous one to its earliest instant.
pub fn next_deadline(now: DateTime<Local>, reboot_at: NaiveTime) -> DateTime<Local> {
    let today = now.date_naive();
    let candidate = at_local(today, reboot_at);
    if candidate > now {
        return candidate;
    }
    let tomorrow = today.checked_add_days(Days::new(1)).unwrap_or(today);
    at_local(tomorrow, reboot_at)
}

fn at_local(date: NaiveDate, time: NaiveTime) -> DateTime<Local> {
    let naive = date.and_time(time);
    match Local.from_local_datetime(&naive) {
        LocalResult::Single(t) => t,
        LocalResult::Ambiguous(earliest, _) => earliest,
        // Inside a DST gap: the wall clock jumps over `time`, so the next
        // valid instant is an hour later.
        LocalResult::None => {
            let shifted = naive + chrono::Duration::hours(1);
            Local
                .from_local_datetime(&shifted)
                .earliest()
                .unwrap_or_else(|| Local.from_utc_datetime(&naive))
        }
    }
}
