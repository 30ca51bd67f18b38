use chrono::{NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use homie_core::config::SleepConfig;

fn parse_local(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").ok()
}

/// True when `now_ms` falls inside the configured `[startLocal, endLocal)`
/// window in the configured timezone. Handles windows that wrap past
/// midnight (e.g. `23:00` to `08:00`).
pub fn is_sleep_window_active(config: &SleepConfig, now_ms: i64) -> bool {
    if !config.enabled {
        return false;
    }
    let Ok(tz): Result<Tz, _> = config.timezone.parse() else {
        return false;
    };
    let Some(start) = parse_local(&config.start_local) else {
        return false;
    };
    let Some(end) = parse_local(&config.end_local) else {
        return false;
    };

    let utc = Utc.timestamp_millis_opt(now_ms).single().unwrap_or_else(Utc::now);
    let local = utc.with_timezone(&tz);
    let now = local.time();
    let now_secs = now.num_seconds_from_midnight();
    let start_secs = start.num_seconds_from_midnight();
    let end_secs = end.num_seconds_from_midnight();

    if start_secs <= end_secs {
        now_secs >= start_secs && now_secs < end_secs
    } else {
        now_secs >= start_secs || now_secs < end_secs
    }
}
