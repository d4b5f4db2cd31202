//! Per-conversation state bundles with per-conversation locking.
//!
//! Turns of one conversation serialize on that conversation's mutex while
//! different conversations proceed in parallel. The outer map lock is only
//! held to fetch or create a bundle.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tallyhive_schema::{ActionType, SemanticState};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::action_ledger::{ActionLedger, DEFAULT_LEDGER_CAPACITY};
use crate::config::EngineConfig;
use crate::focus_lock::{FocusTarget, FocusTracker};
use crate::inheritance::{LastValidState, DEFAULT_VALID_STATE_THRESHOLD};
use crate::task_queue::{TaskKind, TaskSlot};

const SNAPSHOT_LEDGER_ENTRIES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateSettings {
    pub ledger_capacity: usize,
    pub focus_ttl: TimeDelta,
    pub task_ttl: TimeDelta,
    pub valid_state_threshold: f64,
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            ledger_capacity: DEFAULT_LEDGER_CAPACITY,
            focus_ttl: TimeDelta::minutes(5),
            task_ttl: TimeDelta::minutes(10),
            valid_state_threshold: DEFAULT_VALID_STATE_THRESHOLD,
        }
    }
}

impl StateSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            ledger_capacity: config.ledger_capacity,
            focus_ttl: config.focus_ttl(),
            task_ttl: config.task_ttl(),
            valid_state_threshold: config.valid_state_threshold,
        }
    }
}

/// Everything the engine remembers about one conversation.
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub ledger: ActionLedger,
    pub focus: FocusTracker,
    pub task: TaskSlot,
    pub last_valid: LastValidState,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new(&StateSettings::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerHint {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActionType,
    pub created_at: DateTime<Utc>,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskHint {
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub state: SemanticState,
    pub has_queued_message: bool,
}

/// Read-only view of a conversation handed to the interpreter as hints.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    pub recent_actions: Vec<LedgerHint>,
    pub focus: Option<FocusTarget>,
    pub active_task: Option<TaskHint>,
    pub last_valid_state: Option<SemanticState>,
}

impl ContextSnapshot {
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

impl ConversationState {
    pub fn new(settings: &StateSettings) -> Self {
        Self {
            ledger: ActionLedger::new(settings.ledger_capacity),
            focus: FocusTracker::new(settings.focus_ttl),
            task: TaskSlot::new(settings.task_ttl),
            last_valid: LastValidState::new(settings.valid_state_threshold),
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> ContextSnapshot {
        ContextSnapshot {
            recent_actions: self
                .ledger
                .iter()
                .take(SNAPSHOT_LEDGER_ENTRIES)
                .map(|action| LedgerHint {
                    id: action.id.clone(),
                    kind: action.kind,
                    created_at: action.created_at,
                    summary: action.summary(),
                })
                .collect(),
            focus: self.focus.locked(now).first().map(|target| (*target).clone()),
            active_task: self.task.peek(now).map(|task| TaskHint {
                kind: task.kind,
                state: task.state.clone(),
                has_queued_message: task.queued_message.is_some(),
            }),
            last_valid_state: self.last_valid.get().cloned(),
        }
    }

    pub fn reset(&mut self) {
        self.ledger.clear();
        self.focus.clear_all();
        self.task.reset();
        self.last_valid.clear();
    }

    /// Nothing left worth keeping in memory.
    pub fn is_idle(&self, now: DateTime<Utc>) -> bool {
        self.ledger.is_empty()
            && self.focus.is_idle(now)
            && self.task.is_idle(now)
            && self.last_valid.get().is_none()
    }
}

#[derive(Clone, Default)]
pub struct ConversationStore {
    conversations: Arc<Mutex<HashMap<String, Arc<Mutex<ConversationState>>>>>,
    settings: StateSettings,
}

impl ConversationStore {
    pub fn new(settings: StateSettings) -> Self {
        Self {
            conversations: Arc::new(Mutex::new(HashMap::new())),
            settings,
        }
    }

    /// Lock the bundle for `key`, creating it on first use. The guard holds
    /// the conversation until dropped.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<ConversationState> {
        let bundle = {
            let mut conversations = self.conversations.lock().await;
            conversations
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(ConversationState::new(&self.settings))))
                .clone()
        };
        bundle.lock_owned().await
    }

    pub async fn remove(&self, key: &str) -> bool {
        self.conversations.lock().await.remove(key).is_some()
    }

    pub async fn len(&self) -> usize {
        self.conversations.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop idle bundles nobody is using. Returns how many were removed.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut conversations = self.conversations.lock().await;
        let before = conversations.len();
        conversations.retain(|_, bundle| match bundle.try_lock() {
            Ok(state) => !state.is_idle(now),
            Err(_) => true,
        });
        let removed = before - conversations.len();
        if removed > 0 {
            tracing::debug!(removed, "swept idle conversations");
        }
        removed
    }
}
