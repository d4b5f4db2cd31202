use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use tallyhive_core::*;
use tallyhive_provider::StubProvider;
use tallyhive_schema::{
    ActionType, CalendarEntry, ConversationOwner, Domain, Intent, Periodo, RecentAction,
};
use tallyhive_temporal::{ManualClock, TemporalResolver};

/// Replays canned interpreter guesses in order.
struct ScriptedInterpreter {
    replies: Mutex<VecDeque<RawGuess>>,
}

impl ScriptedInterpreter {
    fn new(replies: Vec<serde_json::Value>) -> Arc<Self> {
        let replies = replies
            .into_iter()
            .map(|v| serde_json::from_value(v).unwrap())
            .collect();
        Arc::new(Self {
            replies: Mutex::new(replies),
        })
    }
}

#[async_trait]
impl IntentInterpreter for ScriptedInterpreter {
    async fn infer(&self, _request: InferenceRequest<'_>) -> anyhow::Result<RawGuess> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("script exhausted"))
    }
}

struct SlowInterpreter;

#[async_trait]
impl IntentInterpreter for SlowInterpreter {
    async fn infer(&self, _request: InferenceRequest<'_>) -> anyhow::Result<RawGuess> {
        tokio::time::sleep(Duration::from_secs(120)).await;
        Ok(RawGuess::with_intent(Intent::Chat, 0.9))
    }
}

fn at(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
}

fn owner() -> ConversationOwner {
    ConversationOwner::new("conv-1", "tenant-1", "user-1")
}

// Monday 2026-10-19, 10:00 in São Paulo.
fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(at("2026-10-19T13:00:00Z")))
}

fn engine_with(
    interpreter: Arc<dyn IntentInterpreter>,
    calendar: Arc<InMemoryCalendar>,
    clock: Arc<ManualClock>,
) -> IntentResolver {
    let config = EngineConfig::default();
    let resolver = TemporalResolver::from_name(&config.timezone).unwrap();
    IntentResolver::new(
        interpreter,
        calendar,
        Arc::new(StaticCategoryNormalizer::everyday()),
        resolver,
        &config,
    )
    .with_clock(clock)
}

/// Offline engine: the stub provider always fails, so every turn goes
/// through the fallback grammar.
fn offline_engine() -> IntentResolver {
    let interpreter = Arc::new(LlmInterpreter::new(Arc::new(StubProvider), "stub"));
    engine_with(interpreter, Arc::new(InMemoryCalendar::new()), clock())
}

#[tokio::test]
async fn expense_is_ready_in_one_turn() {
    let engine = offline_engine();
    let state = engine
        .resolve_intention("gastei 50 no mercado", &[], &owner())
        .await;

    assert_eq!(state.intent, Intent::RegisterExpense);
    assert_eq!(state.amount, Some(50.0));
    assert_eq!(state.description.as_deref(), Some("mercado"));
    assert_eq!(state.category.as_deref(), Some("Alimentação"));
    assert!(state.ready_to_save);
    assert!(!state.needs_clarification);
    assert_eq!(state.resolved_at, None);
}

#[tokio::test]
async fn scripted_expense_matches_offline_result() {
    let interpreter = ScriptedInterpreter::new(vec![serde_json::json!({
        "intent": "register_expense",
        "amount": 50,
        "description": "mercado",
        "confidence": 0.95
    })]);
    let engine = engine_with(interpreter, Arc::new(InMemoryCalendar::new()), clock());
    let state = engine
        .resolve_intention("gastei 50 no mercado", &[], &owner())
        .await;

    assert_eq!(state.intent, Intent::RegisterExpense);
    assert_eq!(state.amount, Some(50.0));
    assert_eq!(state.domain, Some(Domain::Financeiro));
    assert!(state.ready_to_save);
}

#[tokio::test]
async fn bare_appointment_asks_for_day_and_time_together() {
    let engine = offline_engine();
    let state = engine.resolve_intention("reunião", &[], &owner()).await;

    assert_eq!(state.intent, Intent::CreateAppointment);
    assert_eq!(state.title.as_deref(), Some("Reunião"));
    assert!(!state.ready_to_save);
    assert!(state.needs_clarification);
    assert_eq!(
        state.clarification_message.as_deref(),
        Some("Para quando? Me diga o dia e o horário.")
    );
}

#[tokio::test]
async fn fragment_completes_pending_appointment() {
    let engine = offline_engine();
    engine.resolve_intention("reunião", &[], &owner()).await;
    let state = engine
        .resolve_intention("amanhã às 15h", &[], &owner())
        .await;

    assert_eq!(state.intent, Intent::CreateAppointment);
    assert_eq!(state.title.as_deref(), Some("Reunião"));
    assert_eq!(state.scheduled_at.as_deref(), Some("15:00"));
    assert!(state.ready_to_save);
    assert_eq!(state.resolved_at, Some(at("2026-10-20T18:00:00Z")));
    assert!(engine.snapshot(&owner()).await.active_task.is_none());
}

#[tokio::test]
async fn time_correction_targets_last_touched_appointment() {
    let engine = offline_engine();
    engine
        .record_materialized_action(
            &owner(),
            RecentAction {
                id: "X".into(),
                kind: ActionType::Appointment,
                tenant_id: "tenant-1".into(),
                user_id: "user-1".into(),
                created_at: at("2026-10-19T12:50:00Z"),
                data: serde_json::json!({
                    "title": "Reunião",
                    "scheduled_at": "2026-10-20T18:00:00Z"
                }),
            },
        )
        .await;

    let state = engine
        .resolve_intention("não, é às 22h", &[], &owner())
        .await;

    assert_eq!(state.intent, Intent::UpdateAppointment);
    assert_eq!(state.target_id.as_deref(), Some("X"));
    assert_eq!(state.scheduled_at.as_deref(), Some("22:00"));
    assert_eq!(state.resolved_at, Some(at("2026-10-21T01:00:00Z")));
    assert_eq!(state.title, None);
    assert_eq!(state.description, None);
    assert!(state.ready_to_save);
}

#[tokio::test]
async fn unknown_target_from_model_falls_back_to_ledger() {
    let interpreter = ScriptedInterpreter::new(vec![serde_json::json!({
        "intent": "update_expense",
        "targetId": "deleted-1",
        "amount": 45,
        "confidence": 0.9
    })]);
    let engine = engine_with(interpreter, Arc::new(InMemoryCalendar::new()), clock());
    engine
        .record_materialized_action(
            &owner(),
            RecentAction {
                id: "E".into(),
                kind: ActionType::Expense,
                tenant_id: "tenant-1".into(),
                user_id: "user-1".into(),
                created_at: at("2026-10-19T12:55:00Z"),
                data: serde_json::json!({"amount": 50.0, "description": "mercado"}),
            },
        )
        .await;

    let state = engine
        .resolve_intention("não, foram 45", &[], &owner())
        .await;

    assert_eq!(state.intent, Intent::UpdateExpense);
    assert_eq!(state.target_id.as_deref(), Some("E"));
    assert_eq!(state.amount, Some(45.0));
    assert!(state.ready_to_save);
}

#[tokio::test]
async fn focus_lock_forms_then_expires() {
    let calendar = Arc::new(InMemoryCalendar::with_entries(vec![CalendarEntry {
        id: "D".into(),
        title: "Dentista".into(),
        scheduled_at: at("2026-10-20T12:00:00Z"),
        description: None,
        created_at: None,
    }]));
    let interpreter = ScriptedInterpreter::new(vec![
        serde_json::json!({"intent": "update_appointment", "title": "Dentista", "scheduled_at": "16:00", "confidence": 0.9}),
        serde_json::json!({"intent": "update_appointment", "title": "Dentista", "scheduled_at": "17:00", "confidence": 0.9}),
        serde_json::json!({"intent": "update_appointment", "scheduled_at": "18:00", "confidence": 0.9}),
        serde_json::json!({"intent": "update_appointment", "scheduled_at": "18:30", "confidence": 0.9}),
    ]);
    let clock = clock();
    let engine = engine_with(interpreter, calendar, clock.clone());

    let first = engine.resolve_intention("remarca o dentista para 16h", &[], &owner()).await;
    assert_eq!(first.target_id.as_deref(), Some("D"));
    assert_eq!(first.resolved_at, Some(at("2026-10-20T19:00:00Z")));
    assert!(engine.snapshot(&owner()).await.focus.is_none());

    engine.resolve_intention("melhor 17h no dentista", &[], &owner()).await;
    let focus = engine.snapshot(&owner()).await.focus.unwrap();
    assert_eq!(focus.target_id.as_deref(), Some("D"));
    assert_eq!(focus.mentions, 2);

    let locked = engine.resolve_intention("passa pras 18h", &[], &owner()).await;
    assert_eq!(locked.target_id.as_deref(), Some("D"));
    assert!(locked.ready_to_save);
    assert_eq!(locked.resolved_at, Some(at("2026-10-20T21:00:00Z")));

    clock.advance(TimeDelta::minutes(6));
    let expired = engine.resolve_intention("passa pras 18h30", &[], &owner()).await;
    assert!(!expired.ready_to_save);
    assert_eq!(expired.target_id, None);
    let question = expired.clarification_message.unwrap();
    assert!(question.contains("1. Dentista (2026-10-20 09:00)"), "{question}");
}

#[tokio::test]
async fn follow_up_query_inherits_the_window() {
    let engine = offline_engine();
    let first = engine
        .resolve_intention("quanto gastei com alimentação essa semana?", &[], &owner())
        .await;
    assert_eq!(first.intent, Intent::Query);
    assert_eq!(first.periodo, Some(Periodo::Week));
    assert!(first.ready_to_save);

    let second = engine
        .resolve_intention("e com transporte?", &[], &owner())
        .await;
    assert_eq!(second.intent, Intent::Query);
    assert_eq!(second.category.as_deref(), Some("Transporte"));
    assert_eq!(second.periodo, Some(Periodo::Week));
    assert_eq!(second.domain, Some(Domain::Financeiro));
    assert_eq!(second.query_type.as_deref(), Some("expense_total"));
}

#[tokio::test]
async fn unrelated_message_is_queued_and_replayed_after_finish() {
    let engine = offline_engine();
    engine.resolve_intention("reunião", &[], &owner()).await;

    let held = engine
        .resolve_intention("gastei 50 no mercado", &[], &owner())
        .await;
    assert_eq!(held.intent, Intent::CreateAppointment);
    assert!(held.needs_clarification);
    assert!(held
        .clarification_message
        .as_deref()
        .unwrap()
        .contains("terminar ou cancelar"));
    assert_eq!(engine.consume_queued_message(&owner()).await, Some("gastei 50 no mercado".into()));

    engine
        .resolve_intention("gastei 50 no mercado", &[], &owner())
        .await;
    let done = engine
        .resolve_intention("amanhã às 15h", &[], &owner())
        .await;
    assert!(done.ready_to_save);
    assert_eq!(
        engine.consume_queued_message(&owner()).await,
        Some("gastei 50 no mercado".into())
    );
    assert_eq!(engine.consume_queued_message(&owner()).await, None);
}

#[tokio::test]
async fn new_appointment_waits_behind_pending_one() {
    let engine = offline_engine();
    engine.resolve_intention("reunião", &[], &owner()).await;

    let held = engine
        .resolve_intention("dentista amanhã às 10h", &[], &owner())
        .await;
    assert_eq!(held.intent, Intent::CreateAppointment);
    assert_eq!(held.title.as_deref(), Some("Reunião"));
    assert!(!held.ready_to_save);
    assert!(held
        .clarification_message
        .as_deref()
        .unwrap()
        .contains("marcando \"Reunião\""));

    let meeting = engine
        .resolve_intention("amanhã às 15h", &[], &owner())
        .await;
    assert_eq!(meeting.title.as_deref(), Some("Reunião"));
    assert!(meeting.ready_to_save);

    let queued = engine.consume_queued_message(&owner()).await.unwrap();
    assert_eq!(queued, "dentista amanhã às 10h");
    let dentist = engine.resolve_intention(&queued, &[], &owner()).await;
    assert_eq!(dentist.title.as_deref(), Some("Dentista"));
    assert!(dentist.ready_to_save);
    assert_eq!(dentist.resolved_at, Some(at("2026-10-20T13:00:00Z")));
}

#[tokio::test]
async fn second_unrelated_message_replaces_the_queued_one() {
    let engine = offline_engine();
    engine.resolve_intention("reunião", &[], &owner()).await;

    let first = engine
        .resolve_intention("gastei 50 no mercado", &[], &owner())
        .await;
    let second = engine
        .resolve_intention("recebi 200 do cliente", &[], &owner())
        .await;
    assert!(second.needs_clarification);
    assert_eq!(first.clarification_message, second.clarification_message);

    let done = engine
        .resolve_intention("amanhã às 15h", &[], &owner())
        .await;
    assert!(done.ready_to_save);
    assert_eq!(
        engine.consume_queued_message(&owner()).await,
        Some("recebi 200 do cliente".into())
    );
    assert_eq!(engine.consume_queued_message(&owner()).await, None);
}

#[tokio::test]
async fn cancel_drops_task_but_keeps_queued_message() {
    let engine = offline_engine();
    engine.resolve_intention("reunião", &[], &owner()).await;
    engine
        .resolve_intention("recebi 200 do cliente", &[], &owner())
        .await;

    let cancelled = engine.resolve_intention("cancela", &[], &owner()).await;
    assert_eq!(cancelled.intent, Intent::Cancel);
    assert!(!cancelled.needs_clarification);
    assert!(!cancelled.ready_to_save);
    assert!(engine.snapshot(&owner()).await.active_task.is_none());
    assert_eq!(
        engine.consume_queued_message(&owner()).await,
        Some("recebi 200 do cliente".into())
    );

    let nothing = engine.resolve_intention("cancela", &[], &owner()).await;
    assert_eq!(nothing.intent, Intent::Cancel);
    assert!(nothing.clarification_message.is_some());
}

#[tokio::test]
async fn past_time_is_rejected_outside_grace_window() {
    let interpreter = ScriptedInterpreter::new(vec![
        serde_json::json!({"intent": "create_appointment", "title": "Café", "periodo": "hoje", "scheduled_at": "08:00", "confidence": 0.9}),
        serde_json::json!({"intent": "create_appointment", "title": "Café", "periodo": "hoje", "scheduled_at": "09:30", "confidence": 0.9}),
    ]);
    let engine = engine_with(interpreter, Arc::new(InMemoryCalendar::new()), clock());

    let late = engine.resolve_intention("café hoje às 8h", &[], &owner()).await;
    assert!(!late.ready_to_save);
    assert!(late
        .clarification_message
        .as_deref()
        .unwrap()
        .contains("2026-10-19 08:00 já passou"));

    let within_grace = engine.resolve_intention("café hoje às 9h30", &[], &owner()).await;
    assert!(within_grace.ready_to_save);
    assert_eq!(within_grace.resolved_at, Some(at("2026-10-19T12:30:00Z")));
}

#[tokio::test(start_paused = true)]
async fn slow_interpreter_falls_back_to_grammar() {
    let engine = engine_with(Arc::new(SlowInterpreter), Arc::new(InMemoryCalendar::new()), clock());
    let state = engine
        .resolve_intention("gastei 50 no mercado", &[], &owner())
        .await;
    assert_eq!(state.intent, Intent::RegisterExpense);
    assert!(state.ready_to_save);

    let unknown = engine.resolve_intention("bom dia", &[], &owner()).await;
    assert_eq!(unknown.intent, Intent::Chat);
    assert!(unknown.needs_clarification);
    assert_eq!(unknown.clarification_message.as_deref(), Some(RETRY_MESSAGE));
}

#[tokio::test]
async fn disabled_grammar_returns_generic_retry() {
    let config = EngineConfig {
        fallback_grammar: false,
        ..EngineConfig::default()
    };
    let resolver = TemporalResolver::from_name(&config.timezone).unwrap();
    let engine = IntentResolver::new(
        Arc::new(LlmInterpreter::new(Arc::new(StubProvider), "stub")),
        Arc::new(InMemoryCalendar::new()),
        Arc::new(StaticCategoryNormalizer::everyday()),
        resolver,
        &config,
    )
    .with_clock(clock());

    let state = engine
        .resolve_intention("gastei 50 no mercado", &[], &owner())
        .await;
    assert_eq!(state.intent, Intent::Chat);
    assert_eq!(state.confidence, 0.5);
    assert!(state.needs_clarification);
    assert!(!state.ready_to_save);
    assert_eq!(state.amount, None);
    assert_eq!(state.clarification_message.as_deref(), Some(RETRY_MESSAGE));
}

fn dentist_at(raw: &str) -> RecentAction {
    RecentAction {
        id: "D".into(),
        kind: ActionType::Appointment,
        tenant_id: "tenant-1".into(),
        user_id: "user-1".into(),
        created_at: at("2026-10-19T12:00:00Z"),
        data: serde_json::json!({"title": "Dentista", "scheduled_at": raw}),
    }
}

#[tokio::test]
async fn rescheduled_appointment_stays_in_focus() {
    let calendar = Arc::new(InMemoryCalendar::with_entries(vec![CalendarEntry {
        id: "D".into(),
        title: "Dentista".into(),
        scheduled_at: at("2026-10-20T12:00:00Z"),
        description: None,
        created_at: None,
    }]));
    let interpreter = ScriptedInterpreter::new(vec![serde_json::json!({
        "intent": "update_appointment",
        "title": "Dentista",
        "weekday": "quarta",
        "scheduled_at": "16:00",
        "confidence": 0.9
    })]);
    let engine = engine_with(interpreter, calendar, clock());
    engine
        .record_materialized_action(&owner(), dentist_at("2026-10-20T12:00:00Z"))
        .await;

    let moved = engine
        .resolve_intention("passa o dentista pra quarta às 16h", &[], &owner())
        .await;
    assert_eq!(moved.target_id.as_deref(), Some("D"));
    assert!(moved.ready_to_save);
    assert_eq!(moved.resolved_at, Some(at("2026-10-21T19:00:00Z")));

    let focus = engine.snapshot(&owner()).await.focus.unwrap();
    assert_eq!(focus.mentions, 2);
    assert_eq!(focus.date, NaiveDate::from_ymd_opt(2026, 10, 21));

    engine
        .record_materialized_action(&owner(), dentist_at("2026-10-21T19:00:00Z"))
        .await;
    let focus = engine.snapshot(&owner()).await.focus.unwrap();
    assert_eq!(focus.mentions, 3);
    assert_eq!(focus.target_id.as_deref(), Some("D"));
}

#[tokio::test]
async fn conversations_do_not_share_state() {
    let engine = offline_engine();
    let other = ConversationOwner::new("conv-2", "tenant-1", "user-1");
    engine.resolve_intention("reunião", &[], &owner()).await;

    let state = engine
        .resolve_intention("gastei 50 no mercado", &[], &other)
        .await;
    assert_eq!(state.intent, Intent::RegisterExpense);
    assert!(state.ready_to_save);

    engine.clear_conversation_state(&owner()).await;
    assert!(engine.snapshot(&owner()).await.active_task.is_none());
}
