//! In-process stand-ins for the ledger and calendar services the engine hands
//! ready states to.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tallyhive_core::InMemoryCalendar;
use tallyhive_schema::{ActionType, CalendarEntry, ConversationOwner, Intent, RecentAction, SemanticState};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Recorded(RecentAction),
    Removed(String),
    Nothing,
}

pub struct LocalServices {
    calendar: Arc<InMemoryCalendar>,
    owner: ConversationOwner,
}

impl LocalServices {
    pub fn new(calendar: Arc<InMemoryCalendar>, owner: ConversationOwner) -> Self {
        Self { calendar, owner }
    }

    /// Execute a ready state. Non-ready states are ignored.
    pub async fn apply(&self, state: &SemanticState, now: DateTime<Utc>) -> Result<Applied> {
        if !state.ready_to_save {
            return Ok(Applied::Nothing);
        }
        let applied = match state.intent {
            Intent::RegisterExpense => {
                Applied::Recorded(self.action(new_id(), ActionType::Expense, money(state), now))
            }
            Intent::RegisterRevenue => {
                Applied::Recorded(self.action(new_id(), ActionType::Revenue, money(state), now))
            }
            Intent::UpdateExpense | Intent::UpdateRevenue => {
                let kind = if state.intent == Intent::UpdateExpense {
                    ActionType::Expense
                } else {
                    ActionType::Revenue
                };
                Applied::Recorded(self.action(target(state)?, kind, money(state), now))
            }
            Intent::CreateAppointment => {
                let scheduled_at = state
                    .resolved_at
                    .ok_or_else(|| anyhow!("ready appointment without resolved time"))?;
                let entry = CalendarEntry {
                    id: new_id(),
                    title: state.title.clone().unwrap_or_default(),
                    scheduled_at,
                    description: state.description.clone(),
                    created_at: Some(now),
                };
                self.save_entry(entry, state.location.as_deref(), now).await
            }
            Intent::UpdateAppointment => {
                let id = target(state)?;
                let mut entry = self
                    .calendar
                    .get(&id)
                    .await
                    .ok_or_else(|| anyhow!("appointment not found: {id}"))?;
                if let Some(title) = &state.title {
                    entry.title.clone_from(title);
                }
                if state.description.is_some() {
                    entry.description.clone_from(&state.description);
                }
                if let Some(at) = state.resolved_at {
                    entry.scheduled_at = at;
                }
                self.save_entry(entry, state.location.as_deref(), now).await
            }
            Intent::CancelAppointment => {
                let id = target(state)?;
                self.calendar
                    .remove(&id)
                    .await
                    .ok_or_else(|| anyhow!("appointment not found: {id}"))?;
                Applied::Removed(id)
            }
            Intent::Query | Intent::Report | Intent::Chat | Intent::Confirm | Intent::Cancel => {
                Applied::Nothing
            }
        };
        Ok(applied)
    }

    async fn save_entry(&self, entry: CalendarEntry, location: Option<&str>, now: DateTime<Utc>) -> Applied {
        let mut data = json!({
            "title": entry.title,
            "scheduled_at": entry.scheduled_at.to_rfc3339(),
        });
        if let (Some(location), Some(map)) = (location, data.as_object_mut()) {
            map.insert("location".into(), Value::from(location));
        }
        let action = self.action(entry.id.clone(), ActionType::Appointment, data, now);
        self.calendar.upsert(entry).await;
        Applied::Recorded(action)
    }

    fn action(&self, id: String, kind: ActionType, data: Value, now: DateTime<Utc>) -> RecentAction {
        RecentAction {
            id,
            kind,
            tenant_id: self.owner.tenant_id.clone(),
            user_id: self.owner.user_id.clone(),
            created_at: now,
            data,
        }
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn target(state: &SemanticState) -> Result<String> {
    state
        .target_id
        .clone()
        .ok_or_else(|| anyhow!("ready {} without target", state.intent))
}

fn money(state: &SemanticState) -> Value {
    let mut data = Map::new();
    if let Some(amount) = state.amount {
        data.insert("amount".into(), Value::from(amount));
    }
    for (key, value) in [
        ("description", &state.description),
        ("category", &state.category),
        ("subcategory", &state.subcategory),
    ] {
        if let Some(value) = value {
            data.insert(key.into(), Value::from(value.as_str()));
        }
    }
    Value::Object(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn services() -> (LocalServices, Arc<InMemoryCalendar>) {
        let calendar = Arc::new(InMemoryCalendar::new());
        let owner = ConversationOwner::new("repl", "local", "me");
        (LocalServices::new(calendar.clone(), owner), calendar)
    }

    fn ready(mut state: SemanticState, at: Option<DateTime<Utc>>) -> SemanticState {
        state.mark_ready(at);
        state
    }

    #[tokio::test]
    async fn expense_becomes_a_ledger_action() {
        let (services, _) = services();
        let mut state = SemanticState::new(Intent::RegisterExpense, 0.9);
        state.amount = Some(50.0);
        state.description = Some("mercado".into());

        let Applied::Recorded(action) = services.apply(&ready(state, None), Utc::now()).await.unwrap()
        else {
            panic!("expected a recorded action");
        };
        assert_eq!(action.kind, ActionType::Expense);
        assert_eq!(action.amount(), Some(50.0));
        assert_eq!(action.title(), Some("mercado"));
        assert_eq!(action.tenant_id, "local");
    }

    #[tokio::test]
    async fn appointment_lifecycle_touches_the_calendar() {
        let (services, calendar) = services();
        let now = Utc::now();
        let when = now + chrono::TimeDelta::days(1);

        let mut create = SemanticState::new(Intent::CreateAppointment, 0.9);
        create.title = Some("Dentista".into());
        let Applied::Recorded(created) = services.apply(&ready(create, Some(when)), now).await.unwrap()
        else {
            panic!("expected a recorded action");
        };
        assert_eq!(created.scheduled_at(), Some(when));
        assert!(calendar.get(&created.id).await.is_some());

        let later = when + chrono::TimeDelta::hours(2);
        let mut update = SemanticState::new(Intent::UpdateAppointment, 0.9);
        update.target_id = Some(created.id.clone());
        let Applied::Recorded(updated) = services.apply(&ready(update, Some(later)), now).await.unwrap()
        else {
            panic!("expected a recorded action");
        };
        assert_eq!(updated.id, created.id);
        assert_eq!(calendar.get(&created.id).await.unwrap().scheduled_at, later);
        assert_eq!(updated.title(), Some("Dentista"));

        let mut cancel = SemanticState::new(Intent::CancelAppointment, 0.9);
        cancel.target_id = Some(created.id.clone());
        assert_eq!(
            services.apply(&ready(cancel, None), now).await.unwrap(),
            Applied::Removed(created.id.clone())
        );
        assert!(calendar.get(&created.id).await.is_none());
    }

    #[tokio::test]
    async fn pending_states_are_not_applied() {
        let (services, _) = services();
        let state = SemanticState::new(Intent::CreateAppointment, 0.9).clarify("Que horas?");
        assert_eq!(services.apply(&state, Utc::now()).await.unwrap(), Applied::Nothing);
    }
}
