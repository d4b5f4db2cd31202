use tallyhive_schema::{Intent, SemanticState};
use tallyhive_temporal::ClockTime;

use crate::error::{MissingFact, ResolveError};

/// Intents that can be executed once complete. Everything else is
/// conversational and never ready.
pub fn is_actionable(intent: Intent) -> bool {
    !matches!(intent, Intent::Chat | Intent::Confirm | Intent::Cancel)
}

/// Structural completeness of `state` for its intent. Time arithmetic is not
/// done here; only the presence and shape of the tokens is checked.
pub fn validate_completeness(state: &SemanticState) -> Result<(), ResolveError> {
    let mut missing = Vec::new();

    match state.intent {
        Intent::RegisterExpense | Intent::RegisterRevenue => {
            if !state.amount.is_some_and(|amount| amount > 0.0) {
                missing.push(MissingFact::Amount);
            }
            let described = state
                .description
                .as_deref()
                .or(state.title.as_deref())
                .is_some_and(|d| !d.trim().is_empty());
            if !described {
                missing.push(MissingFact::Description);
            }
        }
        Intent::CreateAppointment => {
            if state.title.as_deref().is_none_or(|t| t.trim().is_empty()) {
                missing.push(MissingFact::Title);
            }
            if !state.has_day() {
                missing.push(MissingFact::Day);
            }
            match state.scheduled_at.as_deref() {
                None => missing.push(MissingFact::Time),
                Some(token) => check_clock_token(token)?,
            }
        }
        Intent::UpdateExpense | Intent::UpdateRevenue | Intent::UpdateAppointment => {
            if state.target_id.is_none() {
                missing.push(MissingFact::Target);
            }
            if state.changed_fields().is_empty() {
                missing.push(MissingFact::Change);
            }
            if let Some(token) = state.scheduled_at.as_deref() {
                check_clock_token(token)?;
            }
            if state.intent != Intent::UpdateAppointment && state.amount.is_some_and(|a| a <= 0.0) {
                missing.push(MissingFact::Amount);
            }
        }
        Intent::CancelAppointment => {
            if state.target_id.is_none() {
                missing.push(MissingFact::Target);
            }
        }
        Intent::Query | Intent::Report | Intent::Chat | Intent::Confirm | Intent::Cancel => {}
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ResolveError::IncompleteIntent {
            intent: state.intent,
            missing,
        })
    }
}

fn check_clock_token(token: &str) -> Result<(), ResolveError> {
    match ClockTime::parse(token) {
        Some(_) => Ok(()),
        None => Err(ResolveError::ParseFailure {
            field: "scheduled_at",
            token: token.to_string(),
        }),
    }
}
