//! At most one active multi-turn task per conversation, plus a single
//! queued out-of-band message to replay once the task concludes.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tallyhive_schema::{Intent, SemanticState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    CreateAppointment,
    UpdateAppointment,
}

impl TaskKind {
    pub fn from_intent(intent: Intent) -> Option<Self> {
        match intent {
            Intent::CreateAppointment => Some(Self::CreateAppointment),
            Intent::UpdateAppointment => Some(Self::UpdateAppointment),
            _ => None,
        }
    }

    pub fn intent(&self) -> Intent {
        match self {
            Self::CreateAppointment => Intent::CreateAppointment,
            Self::UpdateAppointment => Intent::UpdateAppointment,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveTask {
    pub kind: TaskKind,
    pub state: SemanticState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub queued_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TaskSlot {
    active: Option<ActiveTask>,
    /// Queued message of a task that already concluded, waiting to be replayed.
    replay: Option<String>,
    ttl: TimeDelta,
}

impl Default for TaskSlot {
    fn default() -> Self {
        Self::new(TimeDelta::minutes(10))
    }
}

impl TaskSlot {
    pub fn new(ttl: TimeDelta) -> Self {
        Self {
            active: None,
            replay: None,
            ttl,
        }
    }

    /// Create or overwrite the active task. An existing task's `created_at`
    /// and queued message carry over.
    pub fn set_active(&mut self, kind: TaskKind, state: SemanticState, now: DateTime<Utc>) {
        let (created_at, queued_message) = match self.active.take() {
            Some(previous) if !self.is_expired(&previous, now) => {
                (previous.created_at, previous.queued_message)
            }
            Some(previous) => {
                self.park(previous.queued_message);
                (now, None)
            }
            None => (now, None),
        };
        self.active = Some(ActiveTask {
            kind,
            state,
            created_at,
            updated_at: now,
            queued_message,
        });
    }

    pub fn get_active(&mut self, now: DateTime<Utc>) -> Option<&ActiveTask> {
        let expired = self
            .active
            .as_ref()
            .is_some_and(|task| self.is_expired(task, now));
        if expired {
            tracing::debug!("active task expired");
            self.clear_active();
        }
        self.active.as_ref()
    }

    /// Peek without expiring anything.
    pub fn peek(&self, now: DateTime<Utc>) -> Option<&ActiveTask> {
        self.active
            .as_ref()
            .filter(|task| !self.is_expired(task, now))
    }

    /// Drop the active task. Its queued message, if any, stays available to
    /// `consume_queued_message`.
    pub fn clear_active(&mut self) {
        if let Some(task) = self.active.take() {
            self.park(task.queued_message);
        }
    }

    /// Attach `text` to the active task, replacing any earlier queued message.
    /// Returns false when there is no active task to attach it to.
    pub fn queue_message(&mut self, text: impl Into<String>, now: DateTime<Utc>) -> bool {
        if self.get_active(now).is_none() {
            return false;
        }
        match self.active.as_mut() {
            Some(task) => {
                task.queued_message = Some(text.into());
                task.updated_at = now;
                true
            }
            None => false,
        }
    }

    pub fn consume_queued_message(&mut self) -> Option<String> {
        self.active
            .as_mut()
            .and_then(|task| task.queued_message.take())
            .or_else(|| self.replay.take())
    }

    pub fn has_queued_message(&self) -> bool {
        self.replay.is_some()
            || self
                .active
                .as_ref()
                .is_some_and(|task| task.queued_message.is_some())
    }

    pub fn reset(&mut self) {
        self.active = None;
        self.replay = None;
    }

    pub fn is_idle(&self, now: DateTime<Utc>) -> bool {
        self.replay.is_none() && self.peek(now).is_none()
    }

    fn is_expired(&self, task: &ActiveTask, now: DateTime<Utc>) -> bool {
        now - task.updated_at > self.ttl
    }

    fn park(&mut self, queued: Option<String>) {
        if queued.is_some() {
            self.replay = queued;
        }
    }
}
