//! Carry-forward of domain, period, query type and category from the last
//! confident turn into an ambiguous follow-up.

use serde::Serialize;
use tallyhive_schema::{normalize_text, Intent, Periodo, SemanticState};

pub const DEFAULT_VALID_STATE_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Serialize)]
pub struct LastValidState {
    state: Option<SemanticState>,
    #[serde(skip)]
    threshold: f64,
}

impl Default for LastValidState {
    fn default() -> Self {
        Self::new(DEFAULT_VALID_STATE_THRESHOLD)
    }
}

impl LastValidState {
    pub fn new(threshold: f64) -> Self {
        Self {
            state: None,
            threshold,
        }
    }

    /// Keep `state` as the inheritance source when it is confident and not chat.
    pub fn save_last_valid(&mut self, state: &SemanticState) -> bool {
        if state.confidence < self.threshold || state.intent == Intent::Chat {
            return false;
        }
        self.state = Some(state.clone());
        true
    }

    pub fn get(&self) -> Option<&SemanticState> {
        self.state.as_ref()
    }

    pub fn clear(&mut self) {
        self.state = None;
    }

    /// Fill gaps in `new` from the stored state.
    ///
    /// A change of intent where neither side is a query is a topic change and
    /// inherits nothing. Periods only flow into query/report turns, so a
    /// registration never acts on a stale window. A category switch keeps the
    /// new category and still inherits the window.
    pub fn inherit(&self, new: SemanticState) -> SemanticState {
        let Some(prior) = &self.state else {
            return new;
        };
        if prior.intent != new.intent && prior.intent != Intent::Query && new.intent != Intent::Query
        {
            return new;
        }

        let mut merged = new;
        if merged.domain.is_none() {
            merged.domain = prior.domain;
        }
        if merged.intent.is_analytical() && merged.periodo.is_none() && merged.weekday.is_none() {
            merged.periodo = prior.periodo;
            merged.weekday = prior.weekday;
        }
        if merged.intent == Intent::Query && merged.query_type.is_none() {
            merged.query_type.clone_from(&prior.query_type);
        }
        if merged.category.is_none() {
            if merged.intent == Intent::Query {
                merged.category.clone_from(&prior.category);
                merged.subcategory.clone_from(&prior.subcategory);
            }
        } else if let Some(category) = merged
            .category
            .as_deref()
            .filter(|c| !same_category(c, prior.category.as_deref()))
        {
            tracing::debug!(
                from = prior.category.as_deref().unwrap_or("-"),
                to = category,
                "category switched, keeping time window"
            );
        }
        merged
    }
}

fn same_category(a: &str, b: Option<&str>) -> bool {
    b.is_some_and(|b| normalize_text(a) == normalize_text(b))
}

/// Analytical turns that name no period default to today. Registration
/// intents are never touched.
pub fn apply_default_query_period(state: &mut SemanticState) {
    if state.intent.is_analytical() && state.periodo.is_none() && state.weekday.is_none() {
        state.periodo = Some(Periodo::Today);
    }
}
