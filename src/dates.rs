use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

const SECONDS_PER_DAY: f64 = 86_400.0;

fn month_number(name: &str) -> Option<u32> {
    let month = match name {
        "stycznia" => 1,
        "lutego" => 2,
        "marca" => 3,
        "kwietnia" => 4,
        "maja" => 5,
        "czerwca" => 6,
        "lipca" => 7,
        "sierpnia" => 8,
        "września" | "wrzesnia" => 9,
        "października" | "pazdziernika" => 10,
        "listopada" => 11,
        "grudnia" => 12,
        _ => return None,
    };
    Some(month)
}

/// Parses listing dates such as `12 marca 2025, godz. 10:00`. The time part
/// is optional and defaults to midnight.
pub fn parse_listing_date(text: &str) -> Option<NaiveDateTime> {
    let cleaned = text.replace(',', " ").replace("godz.", " ").replace("godz", " ");
    let mut parts = cleaned.split_whitespace();
    let day: u32 = parts.next()?.parse().ok()?;
    let month = month_number(&parts.next()?.to_lowercase())?;
    let year: i32 = parts.next()?.parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = parts
        .find(|part| part.contains(':'))
        .and_then(|part| {
            let (hour, minute) = part.split_once(':')?;
            NaiveTime::from_hms_opt(hour.parse().ok()?, minute.parse().ok()?, 0)
        })
        .unwrap_or(NaiveTime::MIN);
    Some(date.and_time(time))
}

/// Deadline falls within `days` whole days from now (rounded up).
pub fn is_closing_soon(deadline: NaiveDateTime, now: NaiveDateTime, days: i64) -> bool {
    let remaining = (deadline - now).num_seconds() as f64 / SECONDS_PER_DAY;
    let remaining = remaining.ceil();
    remaining >= 0.0 && remaining <= days as f64
}

pub fn is_newly_initiated(initiated: NaiveDateTime, now: NaiveDateTime) -> bool {
    initiated.date() == now.date()
}
