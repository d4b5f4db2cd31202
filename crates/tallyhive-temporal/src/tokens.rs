use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{NaiveTime, Weekday};
use regex::Regex;
use tallyhive_schema::{normalize_text, Periodo};

// "15:00", "15h30", "15h", "15", "3pm", "3:30 pm", "as 8 da noite", "9 in the morning"
static CLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?:as|a|at|para as|pras)\s+)?(\d{1,2})(?:\s*([:h])\s*(\d{2})?)?\s*(?:horas|hora|hrs|hs)?\s*(am|pm|a\.m\.|p\.m\.|(?:da|de|pela) (?:manha|tarde|noite|madrugada)|in the (?:morning|afternoon|evening)|at night|tonight)?$",
    )
    .expect("clock token regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DayPart {
    Morning,
    Afternoon,
    Night,
    Am,
    Pm,
    EarlyHours,
}

impl DayPart {
    fn parse(raw: &str) -> Option<Self> {
        let part = match raw {
            "am" | "a.m." => Self::Am,
            "pm" | "p.m." => Self::Pm,
            "in the morning" => Self::Morning,
            "in the afternoon" => Self::Afternoon,
            "in the evening" | "at night" | "tonight" => Self::Night,
            other if other.ends_with("manha") => Self::Morning,
            other if other.ends_with("tarde") => Self::Afternoon,
            other if other.ends_with("noite") => Self::Night,
            other if other.ends_with("madrugada") => Self::EarlyHours,
            _ => return None,
        };
        Some(part)
    }
}

/// A wall-clock time of day with minute precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime {
    hour: u32,
    minute: u32,
}

impl ClockTime {
    pub const MIDNIGHT: ClockTime = ClockTime { hour: 0, minute: 0 };

    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    pub fn minute_of_day(&self) -> u32 {
        self.hour * 60 + self.minute
    }

    pub fn to_naive_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }

    /// Canonical `HH:MM` rendering used as the bare token inside `SemanticState`.
    pub fn canonical(&self) -> String {
        format!("{:02}:{:02}", self.hour, self.minute)
    }

    /// Parse a bare clock-time token. Returns `None` for anything that is not
    /// unambiguously a time of day; callers must treat that as missing data.
    pub fn parse(token: &str) -> Option<Self> {
        let normalized = normalize_text(token);
        let caps = CLOCK_RE.captures(&normalized)?;

        let mut hour: u32 = caps.get(1)?.as_str().parse().ok()?;
        let separator = caps.get(2).map(|m| m.as_str());
        let minute: u32 = match caps.get(3) {
            Some(m) => m.as_str().parse().ok()?,
            None if separator == Some(":") => return None,
            None => 0,
        };

        match caps.get(4).and_then(|m| DayPart::parse(m.as_str())) {
            Some(DayPart::Am) => {
                if !(1..=12).contains(&hour) {
                    return None;
                }
                if hour == 12 {
                    hour = 0;
                }
            }
            Some(DayPart::Pm) => {
                if !(1..=12).contains(&hour) {
                    return None;
                }
                if hour < 12 {
                    hour += 12;
                }
            }
            Some(DayPart::Afternoon | DayPart::Night) if (1..12).contains(&hour) => hour += 12,
            Some(DayPart::Morning) if hour == 12 => return None,
            _ => {}
        }

        Self::new(hour, minute)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for ClockTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unparseable clock time: {s}"))
    }
}

/// A coarse day offset relative to an anchor instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DayToken {
    Today,
    Tomorrow,
    Yesterday,
    DayAfterTomorrow,
    Weekday(Weekday),
}

impl DayToken {
    pub fn parse(token: &str) -> Option<Self> {
        let normalized = normalize_text(token);
        let mut rest = normalized.as_str();
        for prefix in [
            "on ", "next ", "this ", "na ", "no ", "nesta ", "neste ", "proxima ", "proximo ",
            "essa ", "esse ", "nessa ", "nesse ",
        ] {
            if let Some(stripped) = rest.strip_prefix(prefix) {
                rest = stripped;
                break;
            }
        }
        let rest = rest.trim_end_matches("-feira").trim_end_matches(" feira");

        let day = match rest {
            "today" | "hoje" => Self::Today,
            "tomorrow" | "amanha" => Self::Tomorrow,
            "yesterday" | "ontem" => Self::Yesterday,
            "day after tomorrow" | "depois de amanha" => Self::DayAfterTomorrow,
            other => Self::Weekday(parse_weekday(other)?),
        };
        Some(day)
    }

    /// Single-day periods map to a day token; windows (week, month, year) do not.
    pub fn from_periodo(periodo: Periodo) -> Option<Self> {
        match periodo {
            Periodo::Today => Some(Self::Today),
            Periodo::Tomorrow => Some(Self::Tomorrow),
            Periodo::Yesterday => Some(Self::Yesterday),
            Periodo::Week | Periodo::Month | Periodo::Year => None,
        }
    }

    /// Days to add to the anchor's civil date. Weekdays resolve to the next
    /// occurrence, zero when the anchor already falls on that weekday.
    pub fn offset_days(&self, anchor_weekday: Weekday) -> i64 {
        match self {
            Self::Today => 0,
            Self::Tomorrow => 1,
            Self::Yesterday => -1,
            Self::DayAfterTomorrow => 2,
            Self::Weekday(target) => {
                let from = anchor_weekday.num_days_from_monday() as i64;
                let to = target.num_days_from_monday() as i64;
                (to - from).rem_euclid(7)
            }
        }
    }
}

impl FromStr for DayToken {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unparseable day: {s}"))
    }
}

/// English or Portuguese weekday name, full or abbreviated, accents optional.
pub fn parse_weekday(raw: &str) -> Option<Weekday> {
    let normalized = normalize_text(raw);
    let name = normalized.trim_end_matches("-feira").trim_end_matches(" feira");
    let weekday = match name {
        "monday" | "mon" | "segunda" | "seg" => Weekday::Mon,
        "tuesday" | "tue" | "terca" | "ter" => Weekday::Tue,
        "wednesday" | "wed" | "quarta" | "qua" => Weekday::Wed,
        "thursday" | "thu" | "quinta" | "qui" => Weekday::Thu,
        "friday" | "fri" | "sexta" | "sex" => Weekday::Fri,
        "saturday" | "sat" | "sabado" | "sab" => Weekday::Sat,
        "sunday" | "sun" | "domingo" | "dom" => Weekday::Sun,
        _ => return None,
    };
    Some(weekday)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hm(token: &str) -> Option<(u32, u32)> {
        ClockTime::parse(token).map(|t| (t.hour(), t.minute()))
    }

    #[test]
    fn parses_supported_clock_formats() {
        assert_eq!(hm("15:00"), Some((15, 0)));
        assert_eq!(hm("9:05"), Some((9, 5)));
        assert_eq!(hm("15h30"), Some((15, 30)));
        assert_eq!(hm("22h"), Some((22, 0)));
        assert_eq!(hm("7"), Some((7, 0)));
        assert_eq!(hm("às 22h"), Some((22, 0)));
    }

    #[test]
    fn parses_meridiem_and_day_parts() {
        assert_eq!(hm("3pm"), Some((15, 0)));
        assert_eq!(hm("3:30 pm"), Some((15, 30)));
        assert_eq!(hm("12am"), Some((0, 0)));
        assert_eq!(hm("12pm"), Some((12, 0)));
        assert_eq!(hm("8 da noite"), Some((20, 0)));
        assert_eq!(hm("3 da tarde"), Some((15, 0)));
        assert_eq!(hm("9 da manhã"), Some((9, 0)));
        assert_eq!(hm("9 in the morning"), Some((9, 0)));
    }

    #[test]
    fn rejects_malformed_clock_tokens() {
        assert_eq!(hm("25:00"), None);
        assert_eq!(hm("10:75"), None);
        assert_eq!(hm("15:"), None);
        assert_eq!(hm("13pm"), None);
        assert_eq!(hm("2026-10-19T15:00:00Z"), None);
        assert_eq!(hm("amanhã"), None);
        assert_eq!(hm(""), None);
    }

    #[test]
    fn canonical_form_is_zero_padded() {
        assert_eq!(ClockTime::parse("9h5").map(|t| t.canonical()), None);
        assert_eq!(ClockTime::parse("9h05").unwrap().canonical(), "09:05");
        assert_eq!(ClockTime::parse("7").unwrap().to_string(), "07:00");
    }

    #[test]
    fn parses_day_tokens() {
        assert_eq!(DayToken::parse("amanhã"), Some(DayToken::Tomorrow));
        assert_eq!(DayToken::parse("Today"), Some(DayToken::Today));
        assert_eq!(DayToken::parse("depois de amanhã"), Some(DayToken::DayAfterTomorrow));
        assert_eq!(
            DayToken::parse("segunda-feira"),
            Some(DayToken::Weekday(Weekday::Mon))
        );
        assert_eq!(DayToken::parse("na sexta"), Some(DayToken::Weekday(Weekday::Fri)));
        assert_eq!(DayToken::parse("sábado"), Some(DayToken::Weekday(Weekday::Sat)));
        assert_eq!(DayToken::parse("next friday"), Some(DayToken::Weekday(Weekday::Fri)));
        assert_eq!(DayToken::parse("someday"), None);
    }

    #[test]
    fn weekday_offset_is_next_occurrence() {
        let friday = DayToken::Weekday(Weekday::Fri);
        assert_eq!(friday.offset_days(Weekday::Fri), 0);
        assert_eq!(friday.offset_days(Weekday::Sat), 6);
        assert_eq!(friday.offset_days(Weekday::Mon), 4);
        assert_eq!(DayToken::Yesterday.offset_days(Weekday::Mon), -1);
    }

    #[test]
    fn windows_are_not_day_tokens() {
        assert_eq!(DayToken::from_periodo(Periodo::Week), None);
        assert_eq!(DayToken::from_periodo(Periodo::Tomorrow), Some(DayToken::Tomorrow));
    }
}
