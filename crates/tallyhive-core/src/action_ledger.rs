//! Bounded, per-conversation log of actions the downstream services already
//! materialized. Backs "fix the last one" style corrections.

use std::collections::VecDeque;

use tallyhive_schema::{ActionType, RecentAction};

pub const DEFAULT_LEDGER_CAPACITY: usize = 10;

#[derive(Debug, Clone)]
pub struct ActionLedger {
    /// Most recent first.
    entries: VecDeque<RecentAction>,
    capacity: usize,
    last_touched_appointment: Option<String>,
}

impl Default for ActionLedger {
    fn default() -> Self {
        Self::new(DEFAULT_LEDGER_CAPACITY)
    }
}

impl ActionLedger {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            last_touched_appointment: None,
        }
    }

    /// Upsert by id: an existing entry is removed and the new one goes to the
    /// front. The oldest entry is evicted past capacity.
    pub fn record(&mut self, action: RecentAction) {
        self.entries.retain(|entry| entry.id != action.id);
        if action.kind == ActionType::Appointment {
            self.last_touched_appointment = Some(action.id.clone());
        }
        self.entries.push_front(action);
        while self.entries.len() > self.capacity {
            if let Some(evicted) = self.entries.pop_back() {
                tracing::debug!(action_id = %evicted.id, "evicted oldest ledger entry");
            }
        }
    }

    pub fn last_of_type(&self, kind: ActionType) -> Option<&RecentAction> {
        self.entries.iter().find(|entry| entry.kind == kind)
    }

    pub fn most_recent_any(&self) -> Option<&RecentAction> {
        self.entries.front()
    }

    pub fn get(&self, id: &str) -> Option<&RecentAction> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// Id of the most recently created or updated appointment. Survives eviction.
    pub fn last_touched_appointment_id(&self) -> Option<&str> {
        self.last_touched_appointment.as_deref()
    }

    pub fn forget(&mut self, id: &str) -> Option<RecentAction> {
        let position = self.entries.iter().position(|entry| entry.id == id);
        let removed = position.and_then(|index| self.entries.remove(index));

        if self.last_touched_appointment.as_deref() == Some(id) {
            self.last_touched_appointment = self
                .last_of_type(ActionType::Appointment)
                .map(|entry| entry.id.clone());
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.last_touched_appointment = None;
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecentAction> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.last_touched_appointment.is_none()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;

    fn action(id: &str, kind: ActionType) -> RecentAction {
        RecentAction {
            id: id.into(),
            kind,
            tenant_id: "tenant".into(),
            user_id: "user".into(),
            created_at: Utc::now(),
            data: json!({ "title": id }),
        }
    }

    fn ids(ledger: &ActionLedger) -> Vec<String> {
        ledger.iter().map(|entry| entry.id.clone()).collect()
    }

    #[test]
    fn recording_same_id_replaces_and_moves_to_front() {
        let mut ledger = ActionLedger::default();
        ledger.record(action("a", ActionType::Expense));
        ledger.record(action("b", ActionType::Expense));
        ledger.record(action("a", ActionType::Expense));

        assert_eq!(ids(&ledger), vec!["a", "b"]);
    }

    #[test]
    fn eleventh_record_evicts_exactly_the_oldest() {
        let mut ledger = ActionLedger::default();
        for i in 0..11 {
            ledger.record(action(&format!("e{i}"), ActionType::Expense));
        }

        assert_eq!(ledger.len(), 10);
        let expected: Vec<String> = (1..11).rev().map(|i| format!("e{i}")).collect();
        assert_eq!(ids(&ledger), expected);
        assert!(ledger.get("e0").is_none());
    }

    #[test]
    fn last_of_type_follows_recency() {
        let mut ledger = ActionLedger::default();
        ledger.record(action("apt-1", ActionType::Appointment));
        ledger.record(action("exp-1", ActionType::Expense));
        ledger.record(action("apt-2", ActionType::Appointment));

        assert_eq!(ledger.last_of_type(ActionType::Appointment).unwrap().id, "apt-2");
        assert_eq!(ledger.last_of_type(ActionType::Expense).unwrap().id, "exp-1");
        assert!(ledger.last_of_type(ActionType::Revenue).is_none());
        assert_eq!(ledger.most_recent_any().unwrap().id, "apt-2");
    }

    #[test]
    fn last_touched_survives_eviction() {
        let mut ledger = ActionLedger::new(2);
        ledger.record(action("apt-1", ActionType::Appointment));
        ledger.record(action("exp-1", ActionType::Expense));
        ledger.record(action("exp-2", ActionType::Expense));

        assert!(ledger.get("apt-1").is_none());
        assert_eq!(ledger.last_touched_appointment_id(), Some("apt-1"));
    }

    #[test]
    fn forget_repoints_last_touched() {
        let mut ledger = ActionLedger::default();
        ledger.record(action("apt-1", ActionType::Appointment));
        ledger.record(action("apt-2", ActionType::Appointment));

        assert!(ledger.forget("apt-2").is_some());
        assert_eq!(ledger.last_touched_appointment_id(), Some("apt-1"));

        ledger.forget("apt-1");
        assert_eq!(ledger.last_touched_appointment_id(), None);
        assert!(ledger.forget("missing").is_none());
    }

    #[test]
    fn clear_wipes_entries_and_pointer() {
        let mut ledger = ActionLedger::default();
        ledger.record(action("apt-1", ActionType::Appointment));
        ledger.clear();
        assert!(ledger.is_empty());
        assert_eq!(ledger.last_touched_appointment_id(), None);
    }
}
