//! Turn resolution: one interpreter call followed by deterministic
//! post-processing into a validated `SemanticState` and a readiness decision.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Datelike, NaiveDate, TimeDelta, Utc};
use tallyhive_provider::{LlmProvider, ProviderRegistry, StubProvider};
use tallyhive_schema::{
    normalize_text, ActionType, ConversationOwner, HistoryTurn, Intent, RecentAction,
    SemanticState,
};
use tallyhive_temporal::{Clock, ClockTime, DayToken, TemporalResolver};

use crate::candidates::{find_matching_candidates, CandidateCriteria};
use crate::collaborators::{CalendarLookup, CategoryNormalizer};
use crate::completeness::{is_actionable, validate_completeness};
use crate::config::{CategoryDefault, EngineConfig};
use crate::conversation_store::{ContextSnapshot, ConversationState, ConversationStore, StateSettings};
use crate::error::{chat_retry, MissingFact, ResolveError};
use crate::focus_lock::FocusMention;
use crate::grammar::FallbackGrammar;
use crate::inheritance::apply_default_query_period;
use crate::interpreter::{InferenceRequest, IntentInterpreter, LlmInterpreter};
use crate::task_queue::{ActiveTask, TaskKind};

/// Upcoming entries listed when asking which appointment was meant.
pub const MAX_LISTED_OPTIONS: usize = 3;

const CANCELLED: &str = "Tudo bem, cancelei.";
const NOTHING_TO_CANCEL: &str = "Tudo bem, não havia nada pendente.";

enum Arbitration {
    Continue(SemanticState),
    Queue,
    Cancel,
}

pub struct IntentResolver {
    interpreter: Arc<dyn IntentInterpreter>,
    calendar: Arc<dyn CalendarLookup>,
    categories: Arc<dyn CategoryNormalizer>,
    resolver: TemporalResolver,
    store: ConversationStore,
    grammar: &'static FallbackGrammar,
    nlu_timeout: Duration,
    grace_minutes: i64,
    fallback_grammar: bool,
    revenue_default: Option<CategoryDefault>,
}

impl IntentResolver {
    pub fn new(
        interpreter: Arc<dyn IntentInterpreter>,
        calendar: Arc<dyn CalendarLookup>,
        categories: Arc<dyn CategoryNormalizer>,
        resolver: TemporalResolver,
        config: &EngineConfig,
    ) -> Self {
        Self {
            interpreter,
            calendar,
            categories,
            resolver,
            store: ConversationStore::new(StateSettings::from_config(config)),
            grammar: FallbackGrammar::standard(),
            nlu_timeout: config.nlu_timeout(),
            grace_minutes: config.grace_minutes,
            fallback_grammar: config.fallback_grammar,
            revenue_default: config.revenue_default_category.clone(),
        }
    }

    /// Wire the interpreter from the configured provider, or the offline stub
    /// when none is configured.
    pub fn from_config(
        config: &EngineConfig,
        registry: &ProviderRegistry,
        calendar: Arc<dyn CalendarLookup>,
        categories: Arc<dyn CategoryNormalizer>,
    ) -> Result<Self> {
        let provider: Arc<dyn LlmProvider> = match &config.nlu.provider_id {
            Some(id) => registry.get(id)?,
            None => {
                tracing::info!("no nlu provider configured, using stub and fallback grammar");
                Arc::new(StubProvider)
            }
        };
        let interpreter = Arc::new(LlmInterpreter::from_config(provider, &config.nlu));
        let resolver = TemporalResolver::new(config.tz()?);
        Ok(Self::new(interpreter, calendar, categories, resolver, config))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.resolver = self.resolver.with_clock(clock);
        self
    }

    pub fn resolver(&self) -> &TemporalResolver {
        &self.resolver
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Resolve one inbound message. Always returns a well-formed state.
    pub async fn resolve_intention(
        &self,
        message: &str,
        history: &[HistoryTurn],
        owner: &ConversationOwner,
    ) -> SemanticState {
        let mut conversation = self.store.acquire(owner.key()).await;
        let now = self.resolver.now();
        let state = self
            .resolve_turn(&mut *conversation, message, history, owner, now)
            .await;
        tracing::info!(
            conversation = %owner.conversation_id,
            intent = %state.intent,
            ready = state.ready_to_save,
            clarification = state.needs_clarification,
            "resolved turn"
        );
        state
    }

    /// Called by downstream services after they persisted an action.
    pub async fn record_materialized_action(&self, owner: &ConversationOwner, action: RecentAction) {
        let mut conversation = self.store.acquire(owner.key()).await;
        let now = self.resolver.now();

        if action.kind == ActionType::Appointment {
            let mention = FocusMention {
                target_id: Some(action.id.clone()),
                title: action.title().map(str::to_string),
                location: None,
                date: action.scheduled_at().map(|at| self.resolver.civil_date(at)),
            };
            conversation
                .focus
                .register_mention(ActionType::Appointment, mention, now);

            let concludes_task = conversation.task.get_active(now).is_some_and(|task| {
                task.state
                    .target_id
                    .as_deref()
                    .is_none_or(|id| id == action.id)
            });
            if concludes_task {
                conversation.task.clear_active();
            }
        }
        tracing::debug!(
            conversation = %owner.conversation_id,
            action_id = %action.id,
            kind = %action.kind,
            "recorded materialized action"
        );
        conversation.ledger.record(action);
    }

    pub async fn forget_action(&self, owner: &ConversationOwner, id: &str) -> bool {
        let mut conversation = self.store.acquire(owner.key()).await;
        conversation.focus.forget_target(id);
        conversation.ledger.forget(id).is_some()
    }

    pub async fn clear_conversation_state(&self, owner: &ConversationOwner) {
        {
            let mut conversation = self.store.acquire(owner.key()).await;
            conversation.reset();
        }
        self.store.remove(owner.key()).await;
        tracing::info!(conversation = %owner.conversation_id, "conversation state cleared");
    }

    /// Pop the message queued while a task was active, for the caller to replay.
    pub async fn consume_queued_message(&self, owner: &ConversationOwner) -> Option<String> {
        self.store
            .acquire(owner.key())
            .await
            .task
            .consume_queued_message()
    }

    pub async fn snapshot(&self, owner: &ConversationOwner) -> ContextSnapshot {
        let now = self.resolver.now();
        self.store.acquire(owner.key()).await.snapshot(now)
    }

    pub async fn sweep_expired(&self) -> usize {
        self.store.sweep_expired(self.resolver.now()).await
    }

    async fn resolve_turn(
        &self,
        conversation: &mut ConversationState,
        message: &str,
        history: &[HistoryTurn],
        owner: &ConversationOwner,
        now: DateTime<Utc>,
    ) -> SemanticState {
        let interpreted = match self.interpret(conversation, message, history, owner, now).await {
            Ok(state) => state,
            Err(e) => return e.into_state(chat_retry()),
        };

        let mut state = match conversation.task.get_active(now).cloned() {
            None => interpreted,
            Some(task) => match arbitrate(&task, interpreted) {
                Arbitration::Continue(merged) => merged,
                Arbitration::Cancel => {
                    conversation.task.clear_active();
                    return acknowledge(Intent::Cancel, CANCELLED);
                }
                Arbitration::Queue => {
                    conversation.task.queue_message(message, now);
                    tracing::debug!(
                        conversation = %owner.conversation_id,
                        "queued message behind active task"
                    );
                    return finish_or_cancel(&task);
                }
            },
        };

        if !is_actionable(state.intent) {
            if state.intent == Intent::Cancel {
                return acknowledge(Intent::Cancel, NOTHING_TO_CANCEL);
            }
            return state;
        }

        if matches!(state.intent, Intent::RegisterExpense | Intent::RegisterRevenue) {
            self.categorize(&mut state).await;
        }

        state = conversation.last_valid.inherit(state);
        apply_default_query_period(&mut state);

        if state.intent.needs_target() {
            if let Some(id) = state.target_id.clone() {
                if let Err(e) = self.verify_target(conversation, &state, &id, owner, now).await {
                    tracing::debug!(conversation = %owner.conversation_id, error = %e, "dropping target");
                    state.target_id = None;
                }
            }
        }
        if state.intent.needs_target() && state.target_id.is_none() {
            match self.resolve_target(conversation, &state, owner, now).await {
                Ok(id) => state.target_id = Some(id),
                Err(e) => return self.settle(conversation, state, Err(e), now),
            }
        }

        let outcome = match validate_completeness(&state) {
            Ok(()) => self.schedule(conversation, &state, owner, now).await,
            Err(e) => Err(e),
        };
        self.settle(conversation, state, outcome, now)
    }

    async fn interpret(
        &self,
        conversation: &ConversationState,
        message: &str,
        history: &[HistoryTurn],
        owner: &ConversationOwner,
        now: DateTime<Utc>,
    ) -> Result<SemanticState, ResolveError> {
        let today = self.resolver.civil_date(now);
        let snapshot = conversation.snapshot(now);
        let request = InferenceRequest {
            message,
            history,
            snapshot: &snapshot,
            now_civil: self.resolver.wall_clock(now),
        };

        let guessed = match tokio::time::timeout(self.nlu_timeout, self.interpreter.infer(request)).await {
            Ok(Ok(raw)) => raw.into_state(today),
            Ok(Err(e)) => Err(ResolveError::CollaboratorFailure(format!("{e:#}"))),
            Err(_) => Err(ResolveError::CollaboratorFailure(format!(
                "interpreter timed out after {:?}",
                self.nlu_timeout
            ))),
        };
        let failure = match guessed {
            Ok(state) => return Ok(state),
            Err(e) => e,
        };

        tracing::warn!(
            conversation = %owner.conversation_id,
            error = %failure,
            "interpreter output unusable"
        );
        if !self.fallback_grammar {
            return Err(failure);
        }
        match self.grammar.parse(message) {
            Some((rule, raw)) => {
                tracing::debug!(conversation = %owner.conversation_id, rule, "fallback grammar matched");
                raw.into_state(today)
            }
            None => Err(failure),
        }
    }

    async fn categorize(&self, state: &mut SemanticState) {
        let source = state
            .category
            .clone()
            .or_else(|| state.description.clone())
            .or_else(|| state.title.clone());

        if let Some(text) = source {
            match self.categories.normalize(&text).await {
                Ok(Some(found)) => {
                    state.category = Some(found.category);
                    if found.subcategory.is_some() {
                        state.subcategory = found.subcategory;
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "category normalization failed"),
            }
        }

        if state.category.is_none() && state.intent == Intent::RegisterRevenue {
            if let Some(policy) = &self.revenue_default {
                state.category = Some(policy.category.clone());
                state.subcategory.clone_from(&policy.subcategory);
                state.confidence = state.confidence.min(policy.confidence);
                tracing::debug!(category = %policy.category, "applied default revenue category");
            }
        }
    }

    /// Focus lock, then scored calendar candidates, then the ledger.
    async fn resolve_target(
        &self,
        conversation: &mut ConversationState,
        state: &SemanticState,
        owner: &ConversationOwner,
        now: DateTime<Utc>,
    ) -> Result<String, ResolveError> {
        let ambiguous = |options: Vec<String>| ResolveError::AmbiguousReference {
            intent: state.intent,
            options,
        };
        let Some(kind) = state.intent.target_type() else {
            return Err(ambiguous(Vec::new()));
        };

        if let Some(id) = conversation
            .focus
            .has_lock(kind, now)
            .and_then(|target| target.target_id)
        {
            tracing::debug!(conversation = %owner.conversation_id, target = %id, "target from focus lock");
            return Ok(id);
        }

        if kind == ActionType::Appointment {
            // An update's day is the new value, not a description of the target.
            let criteria = CandidateCriteria {
                title: state.title.clone(),
                location: state.location.clone(),
                date: if state.intent == Intent::CancelAppointment {
                    self.civil_day(state, now)
                } else {
                    None
                },
            };
            let found = find_matching_candidates(
                self.calendar.as_ref(),
                owner,
                &criteria,
                &self.resolver,
                now,
            )
            .await;
            if let Some(best) = found.first() {
                tracing::debug!(
                    conversation = %owner.conversation_id,
                    target = %best.entry.id,
                    score = best.score,
                    candidates = found.len(),
                    "target from calendar candidates"
                );
                return Ok(best.entry.id.clone());
            }
        }

        let from_ledger = match kind {
            ActionType::Appointment => conversation
                .ledger
                .last_touched_appointment_id()
                .map(str::to_string),
            _ => conversation.ledger.last_of_type(kind).map(|action| action.id.clone()),
        };
        if let Some(id) = from_ledger {
            tracing::debug!(conversation = %owner.conversation_id, target = %id, "target from ledger");
            return Ok(id);
        }

        let options = if kind == ActionType::Appointment {
            self.upcoming_options(owner, now).await
        } else {
            Vec::new()
        };
        Err(ambiguous(options))
    }

    /// A supplied target must still be known to the ledger or the calendar.
    async fn verify_target(
        &self,
        conversation: &ConversationState,
        state: &SemanticState,
        id: &str,
        owner: &ConversationOwner,
        now: DateTime<Utc>,
    ) -> Result<(), ResolveError> {
        if conversation.ledger.get(id).is_some() {
            return Ok(());
        }
        let on_calendar = state.intent.target_type() == Some(ActionType::Appointment)
            && self.current_instant(conversation, owner, id, now).await.is_some();
        if on_calendar {
            Ok(())
        } else {
            Err(ResolveError::StaleReference(id.to_string()))
        }
    }

    async fn upcoming_options(&self, owner: &ConversationOwner, now: DateTime<Utc>) -> Vec<String> {
        match self.calendar.find_upcoming(owner, now).await {
            Ok(entries) => entries
                .iter()
                .take(MAX_LISTED_OPTIONS)
                .map(|entry| format!("{} ({})", entry.title, self.resolver.render(entry.scheduled_at)))
                .collect(),
            Err(e) => {
                tracing::warn!(conversation = %owner.conversation_id, error = %e, "calendar lookup failed");
                Vec::new()
            }
        }
    }

    /// The absolute instant a complete appointment state refers to.
    async fn schedule(
        &self,
        conversation: &ConversationState,
        state: &SemanticState,
        owner: &ConversationOwner,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ResolveError> {
        let token = state.scheduled_at.as_deref();
        let time = token.map(parse_clock).transpose()?;
        let day = day_token(state);

        let resolved = match state.intent {
            Intent::CreateAppointment => match (day, time) {
                (Some(day), Some(time)) => self.resolver.resolve_day_time(day, time, now),
                (day, _) => {
                    let mut missing = Vec::new();
                    if day.is_none() {
                        missing.push(MissingFact::Day);
                    }
                    if time.is_none() {
                        missing.push(MissingFact::Time);
                    }
                    return Err(ResolveError::IncompleteIntent {
                        intent: state.intent,
                        missing,
                    });
                }
            },
            Intent::UpdateAppointment => {
                if day.is_none() && time.is_none() {
                    return Ok(None);
                }
                let base = match state.target_id.as_deref() {
                    Some(id) => self.current_instant(conversation, owner, id, now).await,
                    None => None,
                };
                match (day, time, base) {
                    (Some(day), Some(time), _) => self.resolver.resolve_day_time(day, time, now),
                    (None, Some(_), Some(base)) => {
                        token.and_then(|token| self.resolver.apply_time_to_same_day(base, token))
                    }
                    (Some(day), None, Some(base)) => {
                        self.resolver
                            .resolve_day_time(day, self.resolver.clock_time(base), now)
                    }
                    (day, _, None) => {
                        let missing = if day.is_some() {
                            MissingFact::Time
                        } else {
                            MissingFact::Day
                        };
                        return Err(ResolveError::IncompleteIntent {
                            intent: state.intent,
                            missing: vec![missing],
                        });
                    }
                    (None, None, _) => return Ok(None),
                }
            }
            _ => return Ok(None),
        };

        let at = resolved.ok_or_else(|| ResolveError::ParseFailure {
            field: "scheduled_at",
            token: token.unwrap_or_default().to_string(),
        })?;
        if !self.resolver.is_not_in_the_past(at, now, self.grace_minutes) {
            return Err(ResolveError::PastTime {
                when: self.resolver.render(at),
            });
        }
        Ok(Some(at))
    }

    /// Current instant of an existing appointment, from the ledger or the calendar.
    async fn current_instant(
        &self,
        conversation: &ConversationState,
        owner: &ConversationOwner,
        id: &str,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if let Some(at) = conversation.ledger.get(id).and_then(|action| action.scheduled_at()) {
            return Some(at);
        }
        match self.calendar.find_upcoming(owner, now - TimeDelta::days(1)).await {
            Ok(entries) => entries
                .into_iter()
                .find(|entry| entry.id == id)
                .map(|entry| entry.scheduled_at),
            Err(e) => {
                tracing::warn!(conversation = %owner.conversation_id, error = %e, "calendar lookup failed");
                None
            }
        }
    }

    fn civil_day(&self, state: &SemanticState, now: DateTime<Utc>) -> Option<NaiveDate> {
        let today = self.resolver.civil_date(now);
        let offset = day_token(state)?.offset_days(today.weekday());
        today.checked_add_signed(TimeDelta::days(offset))
    }

    /// Final bookkeeping for a turn: readiness, inheritance source, active
    /// task and focus.
    fn settle(
        &self,
        conversation: &mut ConversationState,
        state: SemanticState,
        outcome: Result<Option<DateTime<Utc>>, ResolveError>,
        now: DateTime<Utc>,
    ) -> SemanticState {
        let state = match outcome {
            Ok(resolved_at) => {
                let mut ready = state;
                ready.mark_ready(resolved_at);
                ready
            }
            Err(e) => {
                tracing::debug!(intent = %state.intent, error = %e, "turn needs more from the user");
                e.into_state(state)
            }
        };

        conversation.last_valid.save_last_valid(&state);

        if let Some(kind) = TaskKind::from_intent(state.intent) {
            if state.ready_to_save {
                conversation.task.clear_active();
            } else {
                conversation.task.set_active(kind, state.clone(), now);
            }
        }

        self.register_focus(conversation, &state, now);
        state
    }

    fn register_focus(&self, conversation: &mut ConversationState, state: &SemanticState, now: DateTime<Utc>) {
        let Some(kind) = state.intent.target_type() else {
            return;
        };
        // Ready creations are registered when the action is recorded.
        let creates = matches!(
            state.intent,
            Intent::CreateAppointment | Intent::RegisterExpense | Intent::RegisterRevenue
        );
        if creates && state.ready_to_save {
            return;
        }
        let mut mention = FocusMention {
            target_id: state.target_id.clone(),
            title: state.title.clone(),
            location: state.location.clone(),
            date: state.resolved_at.map(|at| self.resolver.civil_date(at)),
        };
        // A rescheduled entry is still the one that sits on its old day.
        if state.intent == Intent::UpdateAppointment {
            if let Some(new_date) = mention.date.take() {
                conversation.focus.register_move(kind, mention, new_date, now);
                return;
            }
        }
        if !mention.is_empty() {
            conversation.focus.register_mention(kind, mention, now);
        }
    }
}

fn arbitrate(task: &ActiveTask, new: SemanticState) -> Arbitration {
    if new.intent == Intent::Cancel {
        return Arbitration::Cancel;
    }
    let continues = new.intent == task.kind.intent()
        || (task.kind == TaskKind::CreateAppointment && new.intent == Intent::UpdateAppointment)
        || new.intent == Intent::Confirm
        || (new.intent == Intent::Chat && new.fills_slots());
    if !continues || names_another_entity(task, &new) {
        return Arbitration::Queue;
    }

    let mut merged = task.state.clone();
    merged.overlay(&new);
    merged.intent = task.kind.intent();
    if task.kind == TaskKind::CreateAppointment {
        merged.target_id = None;
    }
    Arbitration::Continue(merged)
}

/// Same intent, different subject: a new appointment while another is
/// pending, or an update aimed at some other entry.
fn names_another_entity(task: &ActiveTask, new: &SemanticState) -> bool {
    match (task.kind, new.intent) {
        (TaskKind::CreateAppointment, Intent::CreateAppointment) => {
            match (task.state.title.as_deref(), new.title.as_deref()) {
                (Some(pending), Some(named)) => {
                    let (pending, named) = (normalize_text(pending), normalize_text(named));
                    !pending.contains(&named) && !named.contains(&pending)
                }
                _ => false,
            }
        }
        (TaskKind::UpdateAppointment, Intent::UpdateAppointment) => matches!(
            (task.state.target_id.as_deref(), new.target_id.as_deref()),
            (Some(pending), Some(named)) if pending != named
        ),
        _ => false,
    }
}

fn finish_or_cancel(task: &ActiveTask) -> SemanticState {
    let title = task.state.title.as_deref().unwrap_or("compromisso");
    let doing = match task.kind {
        TaskKind::CreateAppointment => "marcando",
        TaskKind::UpdateAppointment => "alterando",
    };
    task.state.clone().clarify(format!(
        "Ainda estamos {doing} \"{title}\". Quer terminar ou cancelar? Guardei sua outra mensagem para depois."
    ))
}

fn acknowledge(intent: Intent, message: &str) -> SemanticState {
    let mut state = SemanticState::new(intent, 1.0);
    state.clarification_message = Some(message.to_string());
    state
}

fn day_token(state: &SemanticState) -> Option<DayToken> {
    state
        .weekday
        .map(DayToken::Weekday)
        .or_else(|| state.periodo.and_then(DayToken::from_periodo))
}

fn parse_clock(token: &str) -> Result<ClockTime, ResolveError> {
    ClockTime::parse(token).ok_or_else(|| ResolveError::ParseFailure {
        field: "scheduled_at",
        token: token.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use chrono::Weekday;
    use tallyhive_schema::Periodo;

    use super::*;

    fn pending_create() -> ActiveTask {
        let mut state = SemanticState::new(Intent::CreateAppointment, 0.7);
        state.title = Some("Reunião".into());
        ActiveTask {
            kind: TaskKind::CreateAppointment,
            state,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            queued_message: None,
        }
    }

    #[test]
    fn cancel_always_wins_arbitration() {
        let task = pending_create();
        let turn = SemanticState::new(Intent::Cancel, 0.8);
        assert!(matches!(arbitrate(&task, turn), Arbitration::Cancel));
    }

    #[test]
    fn correction_while_creating_stays_a_creation() {
        let task = pending_create();
        let mut turn = SemanticState::new(Intent::UpdateAppointment, 0.75);
        turn.scheduled_at = Some("22:00".into());
        turn.target_id = Some("apt-1".into());

        let Arbitration::Continue(merged) = arbitrate(&task, turn) else {
            panic!("expected continuation");
        };
        assert_eq!(merged.intent, Intent::CreateAppointment);
        assert_eq!(merged.title.as_deref(), Some("Reunião"));
        assert_eq!(merged.scheduled_at.as_deref(), Some("22:00"));
        assert_eq!(merged.target_id, None);
    }

    #[test]
    fn slot_only_chat_continues_but_small_talk_queues() {
        let task = pending_create();
        let mut fragment = SemanticState::new(Intent::Chat, 0.6);
        fragment.periodo = Some(Periodo::Tomorrow);
        assert!(matches!(arbitrate(&task, fragment), Arbitration::Continue(_)));

        let small_talk = SemanticState::new(Intent::Chat, 0.6);
        assert!(matches!(arbitrate(&task, small_talk), Arbitration::Queue));

        let expense = SemanticState::new(Intent::RegisterExpense, 0.8);
        assert!(matches!(arbitrate(&task, expense), Arbitration::Queue));
    }

    #[test]
    fn another_title_or_target_queues() {
        let task = pending_create();
        let mut same = SemanticState::new(Intent::CreateAppointment, 0.8);
        same.title = Some("reuniao com o time".into());
        same.periodo = Some(Periodo::Tomorrow);
        assert!(matches!(arbitrate(&task, same), Arbitration::Continue(_)));

        let mut other = SemanticState::new(Intent::CreateAppointment, 0.8);
        other.title = Some("Dentista".into());
        other.periodo = Some(Periodo::Tomorrow);
        assert!(matches!(arbitrate(&task, other), Arbitration::Queue));

        let mut moving = SemanticState::new(Intent::UpdateAppointment, 0.7);
        moving.target_id = Some("apt-1".into());
        let task = ActiveTask {
            kind: TaskKind::UpdateAppointment,
            state: moving,
            ..pending_create()
        };
        let mut same_target = SemanticState::new(Intent::UpdateAppointment, 0.8);
        same_target.target_id = Some("apt-1".into());
        same_target.scheduled_at = Some("10:00".into());
        assert!(matches!(arbitrate(&task, same_target), Arbitration::Continue(_)));

        let mut other_target = SemanticState::new(Intent::UpdateAppointment, 0.8);
        other_target.target_id = Some("apt-2".into());
        other_target.scheduled_at = Some("10:00".into());
        assert!(matches!(arbitrate(&task, other_target), Arbitration::Queue));
    }

    #[test]
    fn finish_or_cancel_names_the_pending_task() {
        let state = finish_or_cancel(&pending_create());
        assert!(state.needs_clarification);
        assert!(!state.ready_to_save);
        let message = state.clarification_message.unwrap();
        assert!(message.contains("marcando \"Reunião\""));
        assert!(message.contains("terminar ou cancelar"));
    }

    #[test]
    fn weekday_takes_precedence_over_period() {
        let mut state = SemanticState::new(Intent::CreateAppointment, 0.9);
        state.periodo = Some(Periodo::Week);
        assert_eq!(day_token(&state), None);

        state.weekday = Some(Weekday::Fri);
        assert_eq!(day_token(&state), Some(DayToken::Weekday(Weekday::Fri)));

        state.weekday = None;
        state.periodo = Some(Periodo::Tomorrow);
        assert_eq!(day_token(&state), Some(DayToken::Tomorrow));
    }

    #[test]
    fn acknowledgement_is_not_a_question() {
        let state = acknowledge(Intent::Cancel, CANCELLED);
        assert_eq!(state.intent, Intent::Cancel);
        assert!(!state.needs_clarification);
        assert!(!state.ready_to_save);
        assert_eq!(state.clarification_message.as_deref(), Some(CANCELLED));
    }
}
