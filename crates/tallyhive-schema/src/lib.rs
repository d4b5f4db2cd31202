use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// What the user wants done with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    RegisterExpense,
    RegisterRevenue,
    CreateAppointment,
    UpdateExpense,
    UpdateRevenue,
    UpdateAppointment,
    CancelAppointment,
    Query,
    Report,
    Chat,
    Confirm,
    Cancel,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RegisterExpense => "register_expense",
            Self::RegisterRevenue => "register_revenue",
            Self::CreateAppointment => "create_appointment",
            Self::UpdateExpense => "update_expense",
            Self::UpdateRevenue => "update_revenue",
            Self::UpdateAppointment => "update_appointment",
            Self::CancelAppointment => "cancel_appointment",
            Self::Query => "query",
            Self::Report => "report",
            Self::Chat => "chat",
            Self::Confirm => "confirm",
            Self::Cancel => "cancel",
        }
    }

    /// Update and cancel intents act on an existing entity and need a `targetId`.
    pub fn needs_target(&self) -> bool {
        matches!(
            self,
            Self::UpdateExpense
                | Self::UpdateRevenue
                | Self::UpdateAppointment
                | Self::CancelAppointment
        )
    }

    pub fn is_update(&self) -> bool {
        matches!(
            self,
            Self::UpdateExpense | Self::UpdateRevenue | Self::UpdateAppointment
        )
    }

    pub fn is_analytical(&self) -> bool {
        matches!(self, Self::Query | Self::Report)
    }

    /// The kind of materialized entity an intent creates or touches.
    pub fn target_type(&self) -> Option<ActionType> {
        match self {
            Self::RegisterExpense | Self::UpdateExpense => Some(ActionType::Expense),
            Self::RegisterRevenue | Self::UpdateRevenue => Some(ActionType::Revenue),
            Self::CreateAppointment | Self::UpdateAppointment | Self::CancelAppointment => {
                Some(ActionType::Appointment)
            }
            _ => None,
        }
    }

    pub fn default_domain(&self) -> Option<Domain> {
        match self.target_type() {
            Some(ActionType::Appointment) => Some(Domain::Agenda),
            Some(ActionType::Expense | ActionType::Revenue) => Some(Domain::Financeiro),
            None => None,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let intent = match normalize_text(s).replace([' ', '-'], "_").as_str() {
            "register_expense" => Self::RegisterExpense,
            "register_revenue" => Self::RegisterRevenue,
            "create_appointment" => Self::CreateAppointment,
            "update_expense" => Self::UpdateExpense,
            "update_revenue" => Self::UpdateRevenue,
            "update_appointment" => Self::UpdateAppointment,
            "cancel_appointment" => Self::CancelAppointment,
            "query" => Self::Query,
            "report" => Self::Report,
            "chat" => Self::Chat,
            "confirm" => Self::Confirm,
            "cancel" => Self::Cancel,
            other => return Err(format!("unknown intent: {other}")),
        };
        Ok(intent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Financeiro,
    Agenda,
    Geral,
}

impl FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_text(s).as_str() {
            "financeiro" | "finance" | "financial" => Ok(Self::Financeiro),
            "agenda" | "calendar" => Ok(Self::Agenda),
            "geral" | "general" => Ok(Self::Geral),
            other => Err(format!("unknown domain: {other}")),
        }
    }
}

/// Coarse time window of a query, or the day of an appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Periodo {
    Today,
    Yesterday,
    Tomorrow,
    Week,
    Month,
    Year,
}

impl Periodo {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Yesterday => "yesterday",
            Self::Tomorrow => "tomorrow",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    /// Whether the period names a single calendar day.
    pub fn is_single_day(&self) -> bool {
        matches!(self, Self::Today | Self::Yesterday | Self::Tomorrow)
    }
}

impl FromStr for Periodo {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_text(s).as_str() {
            "today" | "hoje" => Ok(Self::Today),
            "yesterday" | "ontem" => Ok(Self::Yesterday),
            "tomorrow" | "amanha" => Ok(Self::Tomorrow),
            "week" | "semana" | "esta semana" | "this week" => Ok(Self::Week),
            "month" | "mes" | "este mes" | "this month" => Ok(Self::Month),
            "year" | "ano" | "este ano" | "this year" => Ok(Self::Year),
            other => Err(format!("unknown period: {other}")),
        }
    }
}

/// The single structured unit produced and consumed by every stage of the engine.
///
/// `scheduled_at` is always a bare clock-time token (`"15:00"`). The absolute
/// instant lives in `resolved_at` and is only filled once the state is ready
/// to be handed to the ledger/calendar services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticState {
    pub intent: Intent,
    #[serde(default)]
    pub domain: Option<Domain>,
    #[serde(default)]
    pub periodo: Option<Periodo>,
    #[serde(default)]
    pub weekday: Option<Weekday>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub query_type: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, rename = "scheduled_at")]
    pub scheduled_at: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    pub confidence: f64,
    #[serde(default)]
    pub needs_clarification: bool,
    #[serde(default)]
    pub clarification_message: Option<String>,
    #[serde(default)]
    pub needs_confirmation: bool,
    #[serde(default)]
    pub confirmation_message: Option<String>,
    #[serde(default)]
    pub target_id: Option<String>,
    #[serde(default)]
    pub ready_to_save: bool,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl SemanticState {
    pub fn new(intent: Intent, confidence: f64) -> Self {
        Self {
            intent,
            domain: None,
            periodo: None,
            weekday: None,
            category: None,
            subcategory: None,
            query_type: None,
            amount: None,
            title: None,
            scheduled_at: None,
            description: None,
            location: None,
            confidence,
            needs_clarification: false,
            clarification_message: None,
            needs_confirmation: false,
            confirmation_message: None,
            target_id: None,
            ready_to_save: false,
            resolved_at: None,
        }
    }

    /// True when the state pins a single calendar day (period or weekday).
    pub fn has_day(&self) -> bool {
        self.weekday.is_some() || self.periodo.is_some_and(|p| p.is_single_day())
    }

    /// Ask the user one question; the state is not ready afterwards.
    pub fn clarify(mut self, message: impl Into<String>) -> Self {
        self.ready_to_save = false;
        self.resolved_at = None;
        self.needs_clarification = true;
        self.clarification_message = Some(message.into());
        self.needs_confirmation = false;
        self.confirmation_message = None;
        self
    }

    /// Mark the state executable. A ready state never asks anything.
    pub fn mark_ready(&mut self, resolved_at: Option<DateTime<Utc>>) {
        self.ready_to_save = true;
        self.resolved_at = resolved_at;
        self.needs_clarification = false;
        self.clarification_message = None;
        self.needs_confirmation = false;
        self.confirmation_message = None;
    }

    /// Copy every field `newer` supplies over this state, leaving the rest untouched.
    pub fn overlay(&mut self, newer: &SemanticState) {
        fn take<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                slot.clone_from(value);
            }
        }
        take(&mut self.domain, &newer.domain);
        // A newly named day replaces the old one whichever form either used.
        if newer.periodo.is_some() || newer.weekday.is_some() {
            self.periodo = newer.periodo;
            self.weekday = newer.weekday;
        }
        take(&mut self.category, &newer.category);
        take(&mut self.subcategory, &newer.subcategory);
        take(&mut self.query_type, &newer.query_type);
        take(&mut self.amount, &newer.amount);
        take(&mut self.title, &newer.title);
        take(&mut self.scheduled_at, &newer.scheduled_at);
        take(&mut self.description, &newer.description);
        take(&mut self.location, &newer.location);
        take(&mut self.target_id, &newer.target_id);
        self.confidence = self.confidence.max(newer.confidence);
    }

    /// Fields an update would change on its target.
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.amount.is_some() {
            fields.push("amount");
        }
        if self.title.is_some() {
            fields.push("title");
        }
        if self.description.is_some() {
            fields.push("description");
        }
        if self.category.is_some() {
            fields.push("category");
        }
        if self.scheduled_at.is_some() {
            fields.push("scheduled_at");
        }
        if self.has_day() {
            fields.push("periodo");
        }
        if self.location.is_some() {
            fields.push("location");
        }
        fields
    }

    /// Whether the turn carries any slot a pending appointment flow could use.
    pub fn fills_slots(&self) -> bool {
        self.title.is_some()
            || self.scheduled_at.is_some()
            || self.has_day()
            || self.location.is_some()
            || self.description.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Expense,
    Revenue,
    Appointment,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expense => "expense",
            Self::Revenue => "revenue",
            Self::Appointment => "appointment",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An action the downstream services already materialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentAction {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActionType,
    pub tenant_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl RecentAction {
    pub fn title(&self) -> Option<&str> {
        self.data
            .get("title")
            .or_else(|| self.data.get("description"))
            .and_then(|v| v.as_str())
    }

    /// Absolute instant of an appointment, when the payload carries one.
    pub fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        self.data
            .get("scheduled_at")
            .or_else(|| self.data.get("scheduledAt"))
            .and_then(|v| v.as_str())
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn amount(&self) -> Option<f64> {
        self.data.get("amount").and_then(|v| v.as_f64())
    }

    pub fn summary(&self) -> String {
        let mut parts = vec![self.kind.to_string()];
        if let Some(title) = self.title() {
            parts.push(title.to_string());
        }
        if let Some(amount) = self.amount() {
            parts.push(format!("{amount:.2}"));
        }
        if let Some(at) = self.scheduled_at() {
            parts.push(at.to_rfc3339());
        }
        parts.join(" | ")
    }
}

/// Identity of the conversation and the account it acts on.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConversationOwner {
    pub conversation_id: String,
    pub tenant_id: String,
    pub user_id: String,
}

impl ConversationOwner {
    pub fn new(
        conversation_id: impl Into<String>,
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.conversation_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub speaker: Speaker,
    pub text: String,
}

impl HistoryTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Assistant,
            text: text.into(),
        }
    }
}

/// An upcoming calendar entry as reported by the calendar service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEntry {
    pub id: String,
    pub title: String,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Lowercase, strip diacritics and collapse whitespace.
///
/// `"  Reunião  com   JOÃO"` becomes `"reuniao com joao"`.
pub fn normalize_text(input: &str) -> String {
    let stripped: String = input
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}
