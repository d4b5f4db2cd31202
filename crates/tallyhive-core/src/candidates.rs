//! Scored search over upcoming calendar entries for a loosely described
//! appointment ("the dentist on friday").

use std::cmp::Reverse;

use chrono::{DateTime, NaiveDate, Utc};
use tallyhive_schema::{normalize_text, CalendarEntry, ConversationOwner};
use tallyhive_temporal::TemporalResolver;

use crate::collaborators::CalendarLookup;

pub const TITLE_EXACT: u32 = 5;
pub const TITLE_PARTIAL: u32 = 2;
pub const LOCATION_IN_DESCRIPTION: u32 = 3;
pub const LOCATION_IN_TITLE: u32 = 2;
pub const DATE_SAME_DAY: u32 = 5;
pub const DATE_ADJACENT_DAY: u32 = 2;
pub const MIN_CANDIDATE_SCORE: u32 = 2;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateCriteria {
    pub title: Option<String>,
    pub location: Option<String>,
    pub date: Option<NaiveDate>,
}

impl CandidateCriteria {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.location.is_none() && self.date.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub entry: CalendarEntry,
    pub score: u32,
}

impl ScoredCandidate {
    fn recency(&self) -> DateTime<Utc> {
        self.entry.created_at.unwrap_or(self.entry.scheduled_at)
    }
}

pub fn score_candidate(
    entry: &CalendarEntry,
    criteria: &CandidateCriteria,
    resolver: &TemporalResolver,
) -> u32 {
    let mut score = 0;
    let title = normalize_text(&entry.title);
    let description = entry
        .description
        .as_deref()
        .map(normalize_text)
        .unwrap_or_default();

    if let Some(wanted) = criteria.title.as_deref().map(normalize_text) {
        if !wanted.is_empty() {
            if wanted == title {
                score += TITLE_EXACT;
            } else if title.contains(&wanted) || wanted.contains(&title) {
                score += TITLE_PARTIAL;
            }
        }
    }

    if let Some(wanted) = criteria.location.as_deref().map(normalize_text) {
        if !wanted.is_empty() {
            if description.contains(&wanted) {
                score += LOCATION_IN_DESCRIPTION;
            } else if title.contains(&wanted) {
                score += LOCATION_IN_TITLE;
            }
        }
    }

    if let Some(wanted) = criteria.date {
        let day = resolver.civil_date(entry.scheduled_at);
        match (day - wanted).num_days().abs() {
            0 => score += DATE_SAME_DAY,
            1 => score += DATE_ADJACENT_DAY,
            _ => {}
        }
    }

    score
}

/// Rank `entries`: keep those scoring at least `MIN_CANDIDATE_SCORE`, best
/// score first, most recent first among equals.
pub fn rank_candidates(
    entries: Vec<CalendarEntry>,
    criteria: &CandidateCriteria,
    resolver: &TemporalResolver,
) -> Vec<ScoredCandidate> {
    let mut ranked: Vec<ScoredCandidate> = entries
        .into_iter()
        .map(|entry| {
            let score = score_candidate(&entry, criteria, resolver);
            ScoredCandidate { entry, score }
        })
        .filter(|candidate| candidate.score >= MIN_CANDIDATE_SCORE)
        .collect();
    ranked.sort_by_key(|candidate| (Reverse(candidate.score), Reverse(candidate.recency())));
    ranked
}

/// Query the calendar for entries from `now` on and rank them. Lookup
/// failures yield no candidates.
pub async fn find_matching_candidates(
    calendar: &dyn CalendarLookup,
    owner: &ConversationOwner,
    criteria: &CandidateCriteria,
    resolver: &TemporalResolver,
    now: DateTime<Utc>,
) -> Vec<ScoredCandidate> {
    if criteria.is_empty() {
        return Vec::new();
    }
    match calendar.find_upcoming(owner, now).await {
        Ok(entries) => rank_candidates(entries, criteria, resolver),
        Err(e) => {
            tracing::warn!(
                conversation = %owner.conversation_id,
                error = %e,
                "calendar lookup failed, no candidates"
            );
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{TimeDelta, TimeZone};

    use super::*;
    use crate::collaborators::InMemoryCalendar;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, day, hour, 0, 0).unwrap()
    }

    fn entry(id: &str, title: &str, when: DateTime<Utc>, description: Option<&str>) -> CalendarEntry {
        CalendarEntry {
            id: id.into(),
            title: title.into(),
            scheduled_at: when,
            description: description.map(Into::into),
            created_at: None,
        }
    }

    fn resolver() -> TemporalResolver {
        TemporalResolver::default()
    }

    #[test]
    fn scoring_weights() {
        let r = resolver();
        let dentist = entry("1", "Dentista", at(23, 13), Some("Clínica Sorriso, Centro"));

        let exact = CandidateCriteria {
            title: Some("dentista".into()),
            ..Default::default()
        };
        assert_eq!(score_candidate(&dentist, &exact, &r), TITLE_EXACT);

        let partial = CandidateCriteria {
            title: Some("dentista do joão".into()),
            ..Default::default()
        };
        assert_eq!(score_candidate(&dentist, &partial, &r), TITLE_PARTIAL);

        let located = CandidateCriteria {
            location: Some("centro".into()),
            ..Default::default()
        };
        assert_eq!(score_candidate(&dentist, &located, &r), LOCATION_IN_DESCRIPTION);

        let titled_location = CandidateCriteria {
            location: Some("denti".into()),
            ..Default::default()
        };
        assert_eq!(score_candidate(&dentist, &titled_location, &r), LOCATION_IN_TITLE);

        let same_day = CandidateCriteria {
            date: NaiveDate::from_ymd_opt(2026, 10, 23),
            ..Default::default()
        };
        assert_eq!(score_candidate(&dentist, &same_day, &r), DATE_SAME_DAY);

        let next_day = CandidateCriteria {
            date: NaiveDate::from_ymd_opt(2026, 10, 24),
            ..Default::default()
        };
        assert_eq!(score_candidate(&dentist, &next_day, &r), DATE_ADJACENT_DAY);
    }

    #[test]
    fn date_is_compared_on_the_civil_calendar() {
        // 01:30 UTC on the 24th is still the 23rd in São Paulo.
        let late = entry("1", "Show", at(24, 1) + TimeDelta::minutes(30), None);
        let criteria = CandidateCriteria {
            date: NaiveDate::from_ymd_opt(2026, 10, 23),
            ..Default::default()
        };
        assert_eq!(score_candidate(&late, &criteria, &resolver()), DATE_SAME_DAY);
    }

    #[test]
    fn ranking_filters_and_breaks_ties_by_recency() {
        let mut older = entry("older", "Reunião", at(21, 15), None);
        older.created_at = Some(at(10, 12));
        let mut newer = entry("newer", "Reunião", at(22, 15), None);
        newer.created_at = Some(at(18, 12));
        let unrelated = entry("other", "Academia", at(21, 15), None);

        let criteria = CandidateCriteria {
            title: Some("reuniao".into()),
            ..Default::default()
        };
        let ranked = rank_candidates(vec![older, unrelated, newer], &criteria, &resolver());
        let ids: Vec<&str> = ranked.iter().map(|c| c.entry.id.as_str()).collect();
        assert_eq!(ids, vec!["newer", "older"]);
    }

    #[test]
    fn higher_score_wins_over_recency() {
        let exact = entry("exact", "Reunião", at(21, 15), None);
        let partial = entry("partial", "Reunião de pais", at(25, 15), None);
        let criteria = CandidateCriteria {
            title: Some("reunião".into()),
            date: NaiveDate::from_ymd_opt(2026, 10, 21),
            ..Default::default()
        };
        let ranked = rank_candidates(vec![partial, exact], &criteria, &resolver());
        assert_eq!(ranked[0].entry.id, "exact");
        assert_eq!(ranked[0].score, TITLE_EXACT + DATE_SAME_DAY);
        assert_eq!(ranked[1].score, TITLE_PARTIAL);
    }

    struct BrokenCalendar;

    #[async_trait]
    impl CalendarLookup for BrokenCalendar {
        async fn find_upcoming(
            &self,
            _owner: &ConversationOwner,
            _from: DateTime<Utc>,
        ) -> anyhow::Result<Vec<CalendarEntry>> {
            Err(anyhow::anyhow!("calendar offline"))
        }
    }

    #[tokio::test]
    async fn lookup_failure_yields_no_candidates() {
        let owner = ConversationOwner::new("c", "t", "u");
        let criteria = CandidateCriteria {
            title: Some("reunião".into()),
            ..Default::default()
        };
        let found =
            find_matching_candidates(&BrokenCalendar, &owner, &criteria, &resolver(), at(19, 12)).await;
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn only_future_entries_are_candidates() {
        let owner = ConversationOwner::new("c", "t", "u");
        let calendar = InMemoryCalendar::with_entries(vec![
            entry("past", "Reunião", at(18, 15), None),
            entry("next", "Reunião", at(20, 15), None),
        ]);
        let criteria = CandidateCriteria {
            title: Some("reunião".into()),
            ..Default::default()
        };
        let found = find_matching_candidates(&calendar, &owner, &criteria, &resolver(), at(19, 12)).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].entry.id, "next");
    }
}
