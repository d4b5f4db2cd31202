//! Decaying "current topic" tracker. Repeated consistent mentions of the same
//! entity raise confidence until the target locks, after which references
//! like "this appointment" resolve without asking again.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::Serialize;
use tallyhive_schema::{normalize_text, ActionType};

pub const INITIAL_CONFIDENCE: f64 = 0.5;
pub const CONFIDENCE_STEP: f64 = 0.2;
pub const MAX_CONFIDENCE: f64 = 0.95;
pub const LOCK_MIN_MENTIONS: u32 = 2;
pub const LOCK_MIN_CONFIDENCE: f64 = 0.7;

/// What a single turn said about an entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FocusMention {
    pub target_id: Option<String>,
    pub title: Option<String>,
    pub location: Option<String>,
    pub date: Option<NaiveDate>,
}

impl FocusMention {
    pub fn target(id: impl Into<String>) -> Self {
        Self {
            target_id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.target_id.is_none() && self.title.is_none() && self.location.is_none() && self.date.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusTarget {
    #[serde(rename = "type")]
    pub kind: ActionType,
    pub target_id: Option<String>,
    pub title: Option<String>,
    pub location: Option<String>,
    pub date: Option<NaiveDate>,
    pub mentions: u32,
    pub last_mention: DateTime<Utc>,
    pub confidence: f64,
}

impl FocusTarget {
    fn start(kind: ActionType, mention: FocusMention, now: DateTime<Utc>) -> Self {
        Self {
            kind,
            target_id: mention.target_id,
            title: mention.title,
            location: mention.location,
            date: mention.date,
            mentions: 1,
            last_mention: now,
            confidence: INITIAL_CONFIDENCE,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.mentions >= LOCK_MIN_MENTIONS && self.confidence >= LOCK_MIN_CONFIDENCE
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
        now - self.last_mention > ttl
    }

    /// Every field present on both sides must agree; absent fields never disqualify.
    fn matches(&self, mention: &FocusMention) -> bool {
        fn same_text(existing: &Option<String>, incoming: &Option<String>) -> bool {
            match (existing, incoming) {
                (Some(a), Some(b)) => normalize_text(a) == normalize_text(b),
                _ => true,
            }
        }

        let same_id = match (&self.target_id, &mention.target_id) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        let same_date = match (self.date, mention.date) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        same_id
            && same_date
            && same_text(&self.title, &mention.title)
            && same_text(&self.location, &mention.location)
    }

    fn reinforce(&mut self, mention: FocusMention, now: DateTime<Utc>) {
        self.mentions += 1;
        self.last_mention = now;
        // Rounded so that repeated steps land exactly on the lock threshold.
        let raised = ((self.confidence + CONFIDENCE_STEP) * 100.0).round() / 100.0;
        self.confidence = raised.min(MAX_CONFIDENCE);

        if mention.target_id.is_some() {
            self.target_id = mention.target_id;
        }
        if mention.title.is_some() {
            self.title = mention.title;
        }
        if mention.location.is_some() {
            self.location = mention.location;
        }
        if mention.date.is_some() {
            self.date = mention.date;
        }
    }
}

/// One focus target per entity type for a single conversation.
#[derive(Debug, Clone)]
pub struct FocusTracker {
    targets: HashMap<ActionType, FocusTarget>,
    ttl: TimeDelta,
}

impl Default for FocusTracker {
    fn default() -> Self {
        Self::new(TimeDelta::minutes(5))
    }
}

impl FocusTracker {
    pub fn new(ttl: TimeDelta) -> Self {
        Self {
            targets: HashMap::new(),
            ttl,
        }
    }

    pub fn register_mention(
        &mut self,
        kind: ActionType,
        mention: FocusMention,
        now: DateTime<Utc>,
    ) -> &FocusTarget {
        let ttl = self.ttl;
        let target = match self.targets.remove(&kind) {
            Some(mut existing) if !existing.is_expired(now, ttl) && existing.matches(&mention) => {
                existing.reinforce(mention, now);
                existing
            }
            _ => FocusTarget::start(kind, mention, now),
        };
        tracing::debug!(
            kind = %kind,
            mentions = target.mentions,
            confidence = target.confidence,
            "focus mention registered"
        );
        self.targets.entry(kind).or_insert(target)
    }

    /// A mention of an entity being moved to `new_date`. It matches on what
    /// the entity was, then the target follows it to the new day.
    pub fn register_move(
        &mut self,
        kind: ActionType,
        mention: FocusMention,
        new_date: NaiveDate,
        now: DateTime<Utc>,
    ) {
        let mention = FocusMention {
            date: None,
            ..mention
        };
        self.register_mention(kind, mention, now);
        if let Some(target) = self.targets.get_mut(&kind) {
            target.date = Some(new_date);
        }
    }

    /// The target for `kind` if it is both fresh and locked. Expired targets
    /// are dropped; unlocked ones stay so later mentions can reinforce them.
    pub fn has_lock(&mut self, kind: ActionType, now: DateTime<Utc>) -> Option<FocusTarget> {
        let expired = self.targets.get(&kind)?.is_expired(now, self.ttl);
        if expired {
            self.targets.remove(&kind);
            tracing::debug!(kind = %kind, "focus target expired");
            return None;
        }
        self.targets
            .get(&kind)
            .filter(|target| target.is_locked())
            .cloned()
    }

    /// Locked, unexpired targets without mutating anything.
    pub fn locked(&self, now: DateTime<Utc>) -> Vec<&FocusTarget> {
        let mut locked: Vec<&FocusTarget> = self
            .targets
            .values()
            .filter(|target| !target.is_expired(now, self.ttl) && target.is_locked())
            .collect();
        locked.sort_by_key(|target| std::cmp::Reverse(target.last_mention));
        locked
    }

    pub fn clear(&mut self, kind: ActionType) {
        self.targets.remove(&kind);
    }

    /// Drop whichever target points at `target_id`.
    pub fn forget_target(&mut self, target_id: &str) {
        self.targets
            .retain(|_, target| target.target_id.as_deref() != Some(target_id));
    }

    pub fn clear_all(&mut self) {
        self.targets.clear();
    }

    /// Whether nothing unexpired remains.
    pub fn is_idle(&self, now: DateTime<Utc>) -> bool {
        self.targets
            .values()
            .all(|target| target.is_expired(now, self.ttl))
    }
}
