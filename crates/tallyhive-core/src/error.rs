use tallyhive_schema::{Intent, SemanticState};
use thiserror::Error;

pub const RETRY_MESSAGE: &str = "Desculpe, não consegui entender. Pode repetir de outro jeito?";

/// A fact the current intent still needs before it can be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingFact {
    Amount,
    Description,
    Title,
    Day,
    Time,
    Target,
    Change,
}

/// Everything that can go wrong while resolving a turn. None of these escape
/// the engine: each one degrades into a well-formed `SemanticState`.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolveError {
    #[error("could not parse {field} token {token:?}")]
    ParseFailure { field: &'static str, token: String },

    #[error("{intent} is missing {missing:?}")]
    IncompleteIntent {
        intent: Intent,
        missing: Vec<MissingFact>,
    },

    #[error("no target found for {intent}")]
    AmbiguousReference {
        intent: Intent,
        options: Vec<String>,
    },

    #[error("collaborator failure: {0}")]
    CollaboratorFailure(String),

    #[error("reference {0} no longer exists")]
    StaleReference(String),

    #[error("{when} is already in the past")]
    PastTime { when: String },
}

impl ResolveError {
    /// Degrade into the state handed back to the caller. `partial` is whatever
    /// was understood so far; collaborator failures discard it.
    pub fn into_state(self, partial: SemanticState) -> SemanticState {
        match self {
            Self::CollaboratorFailure(_) => chat_retry(),
            Self::StaleReference(_) => partial,
            Self::ParseFailure { field, token } => {
                let message = match field {
                    "scheduled_at" => format!(
                        "Não entendi o horário \"{token}\". Pode me dizer de novo? (ex.: 15:00)"
                    ),
                    _ => format!("Não entendi \"{token}\". Pode repetir?"),
                };
                partial.clarify(message)
            }
            Self::IncompleteIntent { intent, missing } => {
                partial.clarify(question_for(intent, &missing))
            }
            Self::AmbiguousReference { intent, options } => {
                partial.clarify(which_one(intent, &options))
            }
            Self::PastTime { when } => partial.clarify(format!(
                "O horário {when} já passou. Para quando devo marcar?"
            )),
        }
    }
}

/// Generic retry state used whenever the interpreter is unusable.
pub fn chat_retry() -> SemanticState {
    SemanticState::new(Intent::Chat, 0.5).clarify(RETRY_MESSAGE)
}

/// One question per turn. Day and time are asked together when both are missing.
fn question_for(intent: Intent, missing: &[MissingFact]) -> String {
    let has = |fact: MissingFact| missing.contains(&fact);

    if has(MissingFact::Target) {
        return which_one(intent, &[]);
    }
    if has(MissingFact::Title) {
        return "Qual é o compromisso?".into();
    }
    if has(MissingFact::Day) && has(MissingFact::Time) {
        return "Para quando? Me diga o dia e o horário.".into();
    }
    if has(MissingFact::Day) {
        return "Em que dia?".into();
    }
    if has(MissingFact::Time) {
        return "Que horas?".into();
    }
    if has(MissingFact::Amount) {
        return match intent {
            Intent::RegisterRevenue | Intent::UpdateRevenue => "Qual foi o valor recebido?".into(),
            _ => "Qual foi o valor?".into(),
        };
    }
    if has(MissingFact::Description) {
        return match intent {
            Intent::RegisterRevenue => "De onde veio esse valor?".into(),
            _ => "Com o que foi esse gasto?".into(),
        };
    }
    if has(MissingFact::Change) {
        return "O que você quer alterar?".into();
    }
    RETRY_MESSAGE.into()
}

fn which_one(intent: Intent, options: &[String]) -> String {
    let noun = match intent {
        Intent::UpdateExpense => "gasto",
        Intent::UpdateRevenue => "receita",
        _ => "compromisso",
    };
    if options.is_empty() {
        return format!("Não encontrei o {noun}. Qual deles você quer alterar?");
    }
    let listed = options
        .iter()
        .enumerate()
        .map(|(i, option)| format!("{}. {option}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Qual {noun}?\n{listed}")
}
