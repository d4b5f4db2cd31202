use std::cmp::Ordering;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeDelta, Timelike, Utc};
use chrono_tz::Tz;

use crate::clock::{Clock, SystemClock};
use crate::tokens::{ClockTime, DayToken};

pub const DEFAULT_TIMEZONE: &str = "America/Sao_Paulo";
pub const DEFAULT_GRACE_MINUTES: i64 = 60;

/// Verification passes after the initial offset estimate.
const MAX_CORRECTION_PASSES: usize = 2;

/// Converts civil wall-clock expressions into absolute instants.
///
/// Conversion never relies on the platform's local-time rules. The UTC offset
/// for a date is discovered by rendering a probe instant through the zone, the
/// candidate is computed from that offset, and the result is re-rendered and
/// corrected by the residual. This handles daylight-saving transitions and
/// offsets that are not whole hours.
#[derive(Clone)]
pub struct TemporalResolver {
    tz: Tz,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TemporalResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemporalResolver")
            .field("tz", &self.tz.name())
            .finish()
    }
}

impl Default for TemporalResolver {
    fn default() -> Self {
        Self::new(chrono_tz::America::Sao_Paulo)
    }
}

impl TemporalResolver {
    pub fn new(tz: Tz) -> Self {
        Self {
            tz,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        let tz: Tz = name
            .parse()
            .map_err(|_| anyhow!("invalid timezone: {name}"))?;
        Ok(Self::new(tz))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// The current instant. Rendering it in the civil zone yields the real
    /// wall-clock time there, whatever the host's timezone is.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn now_civil(&self) -> DateTime<Tz> {
        self.now().with_timezone(&self.tz)
    }

    /// Wall-clock reading of `instant` in the civil zone.
    pub fn wall_clock(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(&self.tz).naive_local()
    }

    pub fn civil_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        self.wall_clock(instant).date()
    }

    pub fn clock_time(&self, instant: DateTime<Utc>) -> ClockTime {
        let wall = self.wall_clock(instant);
        ClockTime::new(wall.hour(), wall.minute()).unwrap_or(ClockTime::MIDNIGHT)
    }

    /// `YYYY-MM-DD HH:MM` in the civil zone.
    pub fn render(&self, instant: DateTime<Utc>) -> String {
        self.wall_clock(instant).format("%Y-%m-%d %H:%M").to_string()
    }

    /// Resolve a day token plus clock token against `anchor`.
    ///
    /// Returns `None` when either token is unparseable.
    pub fn resolve_relative(
        &self,
        period_token: &str,
        clock_token: &str,
        anchor: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let day = DayToken::parse(period_token)?;
        let time = ClockTime::parse(clock_token)?;
        self.resolve_day_time(day, time, anchor)
    }

    pub fn resolve_day_time(
        &self,
        day: DayToken,
        time: ClockTime,
        anchor: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let anchor_date = self.civil_date(anchor);
        let offset = day.offset_days(anchor_date.weekday());
        let date = anchor_date.checked_add_signed(TimeDelta::try_days(offset)?)?;
        self.to_instant(date, time)
    }

    /// Keep the civil calendar day of `base` and swap in a new wall-clock time.
    pub fn apply_time_to_same_day(
        &self,
        base: DateTime<Utc>,
        clock_token: &str,
    ) -> Option<DateTime<Utc>> {
        let time = ClockTime::parse(clock_token)?;
        self.to_instant(self.civil_date(base), time)
    }

    /// Absolute instant whose civil rendering is `date` at `time`.
    pub fn to_instant(&self, date: NaiveDate, time: ClockTime) -> Option<DateTime<Utc>> {
        let desired = date.and_time(time.to_naive_time());
        let offset = self.probe_offset(date)?;

        let mut candidate = desired.checked_sub_signed(offset)?.and_utc();
        let mut best = (candidate, desired - self.wall_clock(candidate));

        for _ in 0..MAX_CORRECTION_PASSES {
            let residual = desired - self.wall_clock(candidate);
            if residual == TimeDelta::zero() {
                return Some(candidate);
            }
            candidate = candidate.checked_add_signed(residual)?;
            let next_residual = desired - self.wall_clock(candidate);
            if next_residual == TimeDelta::zero() {
                return Some(candidate);
            }
            best = closer(best, (candidate, next_residual));
        }

        // Nonexistent wall time (inside a spring-forward gap): the passes
        // oscillate around the gap, keep the later of the closest candidates.
        tracing::debug!(
            tz = self.tz.name(),
            %desired,
            chosen = %best.0,
            "wall-clock time does not exist in civil zone"
        );
        Some(best.0)
    }

    /// UTC offset in effect on `date`, read off a noon probe.
    fn probe_offset(&self, date: NaiveDate) -> Option<TimeDelta> {
        let probe = date.and_hms_opt(12, 0, 0)?.and_utc();
        Some(self.wall_clock(probe) - probe.naive_utc())
    }

    /// Whether `candidate` is not in the past relative to `now`, compared as
    /// civil dates first, then minute-of-day with a same-day grace window.
    /// Cross-day comparisons are exact.
    pub fn is_not_in_the_past(
        &self,
        candidate: DateTime<Utc>,
        now: DateTime<Utc>,
        grace_minutes: i64,
    ) -> bool {
        let c = self.wall_clock(candidate);
        let n = self.wall_clock(now);
        match c.date().cmp(&n.date()) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => {
                let c_minutes = i64::from(c.hour() * 60 + c.minute());
                let n_minutes = i64::from(n.hour() * 60 + n.minute());
                c_minutes + grace_minutes >= n_minutes
            }
        }
    }
}

fn closer(
    a: (DateTime<Utc>, TimeDelta),
    b: (DateTime<Utc>, TimeDelta),
) -> (DateTime<Utc>, TimeDelta) {
    match a.1.abs().cmp(&b.1.abs()) {
        Ordering::Less => a,
        Ordering::Greater => b,
        Ordering::Equal => {
            if b.0 > a.0 {
                b
            } else {
                a
            }
        }
    }
}
