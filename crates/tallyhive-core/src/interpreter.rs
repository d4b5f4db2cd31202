//! The natural-language-understanding seam: one inference call per turn,
//! returning a loosely typed guess that is validated here before anything
//! else in the engine sees it.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tallyhive_provider::{LlmMessage, LlmProvider, LlmRequest};
use tallyhive_schema::{HistoryTurn, Intent, Periodo, SemanticState, Speaker};
use tallyhive_temporal::{parse_weekday, ClockTime, DayToken};

use crate::config::NluConfig;
use crate::conversation_store::ContextSnapshot;
use crate::error::ResolveError;

const DEFAULT_GUESS_CONFIDENCE: f64 = 0.5;

/// Everything the interpreter may look at for one turn.
#[derive(Debug, Clone, Copy)]
pub struct InferenceRequest<'a> {
    pub message: &'a str,
    pub history: &'a [HistoryTurn],
    pub snapshot: &'a ContextSnapshot,
    /// Current wall-clock time in the civil zone.
    pub now_civil: NaiveDateTime,
}

#[async_trait]
pub trait IntentInterpreter: Send + Sync {
    async fn infer(&self, request: InferenceRequest<'_>) -> Result<RawGuess>;
}

/// Untrusted interpreter output. Accepts snake_case and camelCase keys and
/// loose value types; `into_state` is the only way into a `SemanticState`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawGuess {
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default, alias = "period")]
    pub periodo: Option<String>,
    #[serde(default)]
    pub weekday: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default, alias = "queryType")]
    pub query_type: Option<String>,
    #[serde(default)]
    pub amount: Option<Value>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "scheduledAt")]
    pub scheduled_at: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub confidence: Option<Value>,
    #[serde(default, alias = "clarificationMessage")]
    pub clarification_message: Option<String>,
    #[serde(default, alias = "targetId")]
    pub target_id: Option<Value>,
}

impl RawGuess {
    pub fn with_intent(intent: Intent, confidence: f64) -> Self {
        Self {
            intent: Some(intent.as_str().to_string()),
            confidence: Some(Value::from(confidence)),
            ..Self::default()
        }
    }

    /// Validate into a `SemanticState`. `today` is the civil date used to
    /// turn relative day words into a weekday.
    pub fn into_state(&self, today: NaiveDate) -> Result<SemanticState, ResolveError> {
        let raw_intent = clean(&self.intent)
            .ok_or_else(|| ResolveError::CollaboratorFailure("guess has no intent".into()))?;
        let intent: Intent = raw_intent
            .parse()
            .map_err(ResolveError::CollaboratorFailure)?;

        let confidence = self
            .confidence
            .as_ref()
            .and_then(number)
            .filter(|c| c.is_finite())
            .unwrap_or(DEFAULT_GUESS_CONFIDENCE)
            .clamp(0.0, 1.0);

        let mut state = SemanticState::new(intent, confidence);
        state.domain = clean(&self.domain)
            .and_then(|d| d.parse().ok())
            .or_else(|| intent.default_domain());

        if let Some(raw) = clean(&self.periodo) {
            apply_day(&mut state, raw, today);
        }
        if let Some(raw) = clean(&self.weekday) {
            match parse_weekday(raw) {
                Some(weekday) => {
                    state.weekday = Some(weekday);
                    state.periodo = None;
                }
                None => apply_day(&mut state, raw, today),
            }
        }

        state.category = clean(&self.category).map(str::to_string);
        state.subcategory = clean(&self.subcategory).map(str::to_string);
        state.query_type = clean(&self.query_type).map(str::to_string);
        state.title = clean(&self.title).map(str::to_string);
        state.description = clean(&self.description).map(str::to_string);
        state.location = clean(&self.location).map(str::to_string);
        state.amount = self.amount.as_ref().and_then(parse_amount);

        if let Some(raw) = clean(&self.scheduled_at) {
            match ClockTime::parse(raw) {
                Some(time) => state.scheduled_at = Some(time.canonical()),
                None => tracing::warn!(token = raw, "dropping scheduled_at that is not a bare clock time"),
            }
        }

        state.target_id = self.target_id.as_ref().and_then(|value| match value {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

        if intent == Intent::Chat {
            state.clarification_message = clean(&self.clarification_message).map(str::to_string);
        }

        Ok(state)
    }
}

fn clean(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A day word goes into `periodo` when it names one, into `weekday` otherwise.
fn apply_day(state: &mut SemanticState, raw: &str, today: NaiveDate) {
    if let Ok(periodo) = raw.parse::<Periodo>() {
        state.periodo = Some(periodo);
        state.weekday = None;
        return;
    }
    match DayToken::parse(raw) {
        Some(DayToken::Weekday(weekday)) => {
            state.weekday = Some(weekday);
            state.periodo = None;
        }
        Some(DayToken::DayAfterTomorrow) => {
            state.weekday = Some((today + TimeDelta::days(2)).weekday());
            state.periodo = None;
        }
        Some(DayToken::Today) => state.periodo = Some(Periodo::Today),
        Some(DayToken::Tomorrow) => state.periodo = Some(Periodo::Tomorrow),
        Some(DayToken::Yesterday) => state.periodo = Some(Periodo::Yesterday),
        None => tracing::debug!(token = raw, "ignoring unrecognized period"),
    }
}

fn parse_amount(value: &Value) -> Option<f64> {
    let amount = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => parse_amount_text(s)?,
        _ => return None,
    };
    amount.is_finite().then_some(amount)
}

/// Money written the Brazilian way or plainly: `"R$ 1.234,56"`, `"50,00"`,
/// `"1.500"`, `"49.90"`, `"30 reais"`.
pub fn parse_amount_text(raw: &str) -> Option<f64> {
    let digits: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-'))
        .collect();
    let digits = digits.trim_matches(|c| c == '.' || c == ',');
    if !digits.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let normalized = if digits.contains(',') {
        digits.replace('.', "").replace(',', ".")
    } else if digits
        .rsplit_once('.')
        .is_some_and(|(_, tail)| tail.len() == 3)
    {
        // "1.500" is fifteen hundred
        digits.replace('.', "")
    } else {
        digits.to_string()
    };
    normalized.parse().ok()
}

/// Pull the JSON object out of a model reply, tolerating code fences and prose.
pub fn extract_json(input: &str) -> Option<&str> {
    let trimmed = input.trim();
    let stripped = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.strip_suffix("```").unwrap_or(rest).trim())
        .unwrap_or(trimmed);

    let start = stripped.find('{')?;
    let end = stripped.rfind('}')?;
    (end > start).then(|| &stripped[start..=end])
}

/// Interpreter backed by a chat-completion provider.
pub struct LlmInterpreter {
    provider: Arc<dyn LlmProvider>,
    model: String,
    max_tokens: u32,
    history_turns: usize,
}

impl LlmInterpreter {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens: 512,
            history_turns: 6,
        }
    }

    pub fn from_config(provider: Arc<dyn LlmProvider>, config: &NluConfig) -> Self {
        Self {
            provider,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            history_turns: config.history_turns,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_history_turns(mut self, turns: usize) -> Self {
        self.history_turns = turns;
        self
    }

    fn build_messages(&self, request: &InferenceRequest<'_>) -> Vec<LlmMessage> {
        let skip = request.history.len().saturating_sub(self.history_turns);
        let mut messages: Vec<LlmMessage> = request
            .history
            .iter()
            .skip(skip)
            .map(|turn| match turn.speaker {
                Speaker::User => LlmMessage::user(turn.text.clone()),
                Speaker::Assistant => LlmMessage::assistant(turn.text.clone()),
            })
            .collect();
        messages.push(LlmMessage::user(request.message));
        messages
    }
}

pub fn build_system_prompt(request: &InferenceRequest<'_>) -> String {
    format!(
        r#"You extract the user's intention from a chat message about personal finances and appointments. The user usually writes in Brazilian Portuguese.

Reply with ONE JSON object and nothing else. Allowed keys:
- intent (required): register_expense | register_revenue | create_appointment | update_expense | update_revenue | update_appointment | cancel_appointment | query | report | chat | confirm | cancel
- domain: financeiro | agenda | geral
- periodo: today | yesterday | tomorrow | week | month | year
- weekday: a weekday name, when the user names one
- category, subcategory, queryType: free text
- amount: number
- title, description, location: free text, only what the user actually said
- scheduled_at: the clock time ONLY, as "HH:MM". Never a date, never a timestamp.
- targetId: only an id copied from the context below
- confidence: 0..1
- clarificationMessage: only for intent chat, a short friendly reply

Rules:
- Do not compute dates. Put the day in periodo or weekday and the time in scheduled_at.
- Corrections such as "não, é às 22h" are updates of the entity being discussed; copy only the fields that change.
- Omit keys you are not sure about.

Now (civil time): {now} ({weekday})

Context:
{context}"#,
        now = request.now_civil.format("%Y-%m-%d %H:%M"),
        weekday = request.now_civil.weekday(),
        context = request.snapshot.to_json(),
    )
}

#[async_trait]
impl IntentInterpreter for LlmInterpreter {
    async fn infer(&self, request: InferenceRequest<'_>) -> Result<RawGuess> {
        let llm_request = LlmRequest::structured(
            self.model.clone(),
            build_system_prompt(&request),
            self.build_messages(&request),
            self.max_tokens,
        );
        let response = self
            .provider
            .chat(llm_request)
            .await
            .context("interpreter call failed")?;
        let json = extract_json(&response.text)
            .ok_or_else(|| anyhow!("interpreter reply has no JSON object"))?;
        serde_json::from_str(json).context("interpreter reply does not match the guess shape")
    }
}
