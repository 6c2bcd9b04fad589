use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, NaiveTime, TimeZone, Timelike};
use databack_core::job::StartTime;

/// Time from `now` until the next daily occurrence of `start`, on the local
/// wall clock of `now`'s zone.
///
/// Only hour and minute of `now` decide between today and tomorrow, so a
/// `now` inside the start minute (equality) already counts as passed and
/// wraps to the next day. The target is resolved back into the zone before
/// subtracting, so a DST change in between does not shift the fire time.
pub fn initial_delay<Tz: TimeZone>(start: StartTime, now: &DateTime<Tz>) -> Duration {
    let local = now.naive_local();
    let now_minutes = local.hour() * 60 + local.minute();
    let target = NaiveTime::from_hms_opt(start.hour, start.minute, 0).unwrap_or_default();

    let day = if now_minutes < start.minutes_from_midnight() {
        local.date()
    } else {
        local.date().succ_opt().unwrap_or(local.date())
    };
    let fire_local = day.and_time(target);
    let elapsed = match next_instant(now, fire_local) {
        Some(fire) => fire.naive_utc() - now.naive_utc(),
        None => fire_local - local,
    };
    elapsed.to_std().unwrap_or(Duration::ZERO)
}

/// First instant after `now` showing `local` on the zone's clock. Ambiguous
/// times (clocks turned back) take the earliest future reading; times skipped
/// by a forward change move to the first valid minute after the gap.
fn next_instant<Tz: TimeZone>(now: &DateTime<Tz>, local: NaiveDateTime) -> Option<DateTime<Tz>> {
    let tz = now.timezone();
    let after_now = |t: &DateTime<Tz>| t.naive_utc() > now.naive_utc();
    (0..=180).find_map(|m| {
        let resolved = tz.from_local_datetime(&(local + ChronoDuration::minutes(m)));
        [resolved.clone().earliest(), resolved.latest()].into_iter().flatten().find(|t| after_now(t))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, LocalResult, NaiveDate, Utc};

    const DAY: Duration = Duration::from_secs(24 * 3600);

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.from_utc_datetime(&NaiveDate::from_ymd_opt(2025, 3, 14).unwrap().and_hms_opt(h, m, s).unwrap())
    }

    fn st(hour: u32, minute: u32) -> StartTime { StartTime { hour, minute } }

    #[test]
    fn later_today() {
        assert_eq!(initial_delay(st(9, 30), &at(8, 0, 0)), Duration::from_secs(90 * 60));
        assert_eq!(initial_delay(st(9, 0), &at(8, 59, 30)), Duration::from_secs(30));
    }

    #[test]
    fn equal_minute_wraps_to_tomorrow() {
        assert_eq!(initial_delay(st(9, 0), &at(9, 0, 0)), DAY);
        assert_eq!(initial_delay(st(9, 0), &at(9, 0, 45)), DAY - Duration::from_secs(45));
    }

    #[test]
    fn already_passed_today() {
        assert_eq!(initial_delay(st(1, 0), &at(23, 0, 0)), Duration::from_secs(2 * 3600));
        assert_eq!(initial_delay(st(0, 0), &at(23, 59, 59)), Duration::from_secs(1));
    }

    #[test]
    fn uses_local_wall_clock_of_the_zone() {
        let tz = FixedOffset::east_opt(8 * 3600).unwrap();
        // 01:00 UTC is 09:00 in UTC+8.
        let now = at(1, 0, 0).with_timezone(&tz);
        assert_eq!(initial_delay(st(10, 0), &now), Duration::from_secs(3600));
    }

    #[test]
    fn every_target_lands_on_its_minute_within_a_day() {
        let base = at(0, 0, 0);
        for now_step in (0..24 * 60).step_by(37) {
            let now = base + ChronoDuration::minutes(now_step) + ChronoDuration::seconds(now_step % 60);
            for target in (0..24 * 60).step_by(53) {
                let start = st(target / 60, target % 60);
                let delay = initial_delay(start, &now);
                assert!(delay > Duration::ZERO && delay <= DAY, "delay {delay:?} out of range");
                let fire = now + ChronoDuration::from_std(delay).unwrap();
                assert_eq!((fire.hour(), fire.minute()), (start.hour, start.minute));
                assert_eq!(fire.second(), 0);
            }
        }
    }

    /// US Eastern time for 2025 only: EDT from 2025-03-09 07:00 UTC until
    /// 2025-11-02 06:00 UTC, EST otherwise.
    #[derive(Clone, Copy, Debug)]
    struct Eastern2025;

    fn est() -> FixedOffset { FixedOffset::west_opt(5 * 3600).unwrap() }
    fn edt() -> FixedOffset { FixedOffset::west_opt(4 * 3600).unwrap() }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d).unwrap().and_hms_opt(h, mi, 0).unwrap()
    }

    impl TimeZone for Eastern2025 {
        type Offset = FixedOffset;

        fn from_offset(_: &FixedOffset) -> Self { Eastern2025 }

        fn offset_from_utc_datetime(&self, t: &NaiveDateTime) -> FixedOffset {
            if *t >= utc(2025, 3, 9, 7, 0) && *t < utc(2025, 11, 2, 6, 0) { edt() } else { est() }
        }

        fn offset_from_utc_date(&self, d: &NaiveDate) -> FixedOffset {
            self.offset_from_utc_datetime(&d.and_hms_opt(0, 0, 0).unwrap())
        }

        fn offset_from_local_datetime(&self, local: &NaiveDateTime) -> LocalResult<FixedOffset> {
            // earlier instant first: EDT maps a local reading to the earlier UTC time
            let fits: Vec<FixedOffset> = [edt(), est()]
                .into_iter()
                .filter(|off| {
                    let at = *local - ChronoDuration::seconds(off.local_minus_utc() as i64);
                    self.offset_from_utc_datetime(&at) == *off
                })
                .collect();
            match fits.as_slice() {
                [] => LocalResult::None,
                [one] => LocalResult::Single(*one),
                [first, second, ..] => LocalResult::Ambiguous(*first, *second),
            }
        }

        fn offset_from_local_date(&self, d: &NaiveDate) -> LocalResult<FixedOffset> {
            self.offset_from_local_datetime(&d.and_hms_opt(12, 0, 0).unwrap())
        }
    }

    fn eastern(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Eastern2025> {
        Eastern2025.from_utc_datetime(&utc(y, mo, d, h, mi))
    }

    fn fire_of(start: StartTime, now: &DateTime<Eastern2025>) -> DateTime<Eastern2025> {
        now.clone() + ChronoDuration::from_std(initial_delay(start, now)).unwrap()
    }

    #[test]
    fn spring_forward_night_is_an_hour_shorter() {
        // 2025-03-08 23:00 EST
        let now = eastern(2025, 3, 9, 4, 0);
        assert_eq!(initial_delay(st(4, 0), &now), Duration::from_secs(4 * 3600));
        let fire = fire_of(st(4, 0), &now);
        assert_eq!((fire.hour(), fire.minute()), (4, 0));
    }

    #[test]
    fn fall_back_night_is_an_hour_longer() {
        // 2025-11-01 23:00 EDT
        let now = eastern(2025, 11, 2, 3, 0);
        assert_eq!(initial_delay(st(4, 0), &now), Duration::from_secs(6 * 3600));
        let fire = fire_of(st(4, 0), &now);
        assert_eq!((fire.hour(), fire.minute()), (4, 0));
    }

    #[test]
    fn skipped_start_time_fires_when_clocks_resume() {
        // 02:30 does not exist on 2025-03-09; the first valid reading is 03:00 EDT
        let now = eastern(2025, 3, 9, 4, 0);
        assert_eq!(initial_delay(st(2, 30), &now), Duration::from_secs(3 * 3600));
        let fire = fire_of(st(2, 30), &now);
        assert_eq!((fire.hour(), fire.minute()), (3, 0));
    }

    #[test]
    fn repeated_hour_picks_the_next_future_reading() {
        // 01:10 EST, the second pass through 01:xx; 01:30 EDT is already past
        let now = eastern(2025, 11, 2, 6, 10);
        assert_eq!((now.hour(), now.minute()), (1, 10));
        assert_eq!(initial_delay(st(1, 30), &now), Duration::from_secs(20 * 60));
    }
}
