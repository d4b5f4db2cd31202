//! External services the engine consults but does not own: the calendar and
//! the category dictionary.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tallyhive_schema::{normalize_text, CalendarEntry, ConversationOwner};
use tokio::sync::RwLock;

#[async_trait]
pub trait CalendarLookup: Send + Sync {
    /// Entries scheduled at or after `from`, soonest first.
    async fn find_upcoming(
        &self,
        owner: &ConversationOwner,
        from: DateTime<Utc>,
    ) -> Result<Vec<CalendarEntry>>;
}

/// Process-local calendar used by tests and the CLI.
#[derive(Debug, Default)]
pub struct InMemoryCalendar {
    entries: RwLock<Vec<CalendarEntry>>,
}

impl InMemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: Vec<CalendarEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Insert or replace by id.
    pub async fn upsert(&self, entry: CalendarEntry) {
        let mut entries = self.entries.write().await;
        entries.retain(|existing| existing.id != entry.id);
        entries.push(entry);
    }

    pub async fn remove(&self, id: &str) -> Option<CalendarEntry> {
        let mut entries = self.entries.write().await;
        let index = entries.iter().position(|entry| entry.id == id)?;
        Some(entries.remove(index))
    }

    pub async fn get(&self, id: &str) -> Option<CalendarEntry> {
        self.entries
            .read()
            .await
            .iter()
            .find(|entry| entry.id == id)
            .cloned()
    }
}

#[async_trait]
impl CalendarLookup for InMemoryCalendar {
    async fn find_upcoming(
        &self,
        _owner: &ConversationOwner,
        from: DateTime<Utc>,
    ) -> Result<Vec<CalendarEntry>> {
        let mut upcoming: Vec<CalendarEntry> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|entry| entry.scheduled_at >= from)
            .cloned()
            .collect();
        upcoming.sort_by_key(|entry| entry.scheduled_at);
        Ok(upcoming)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryMatch {
    pub category: String,
    #[serde(default)]
    pub subcategory: Option<String>,
    pub confidence: f64,
}

#[async_trait]
pub trait CategoryNormalizer: Send + Sync {
    async fn normalize(&self, text: &str) -> Result<Option<CategoryMatch>>;
}

/// Never recognizes anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCategoryNormalizer;

#[async_trait]
impl CategoryNormalizer for NoopCategoryNormalizer {
    async fn normalize(&self, _text: &str) -> Result<Option<CategoryMatch>> {
        Ok(None)
    }
}

/// Keyword table, first hit wins. Keywords match whole words of the
/// normalized text.
#[derive(Debug, Clone, Default)]
pub struct StaticCategoryNormalizer {
    rules: Vec<(String, CategoryMatch)>,
}

impl StaticCategoryNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(
        mut self,
        keyword: &str,
        category: impl Into<String>,
        subcategory: Option<&str>,
    ) -> Self {
        self.rules.push((
            normalize_text(keyword),
            CategoryMatch {
                category: category.into(),
                subcategory: subcategory.map(Into::into),
                confidence: 0.9,
            },
        ));
        self
    }

    /// A small everyday table for local runs.
    pub fn everyday() -> Self {
        Self::new()
            .with_rule("mercado", "Alimentação", Some("Supermercado"))
            .with_rule("supermercado", "Alimentação", Some("Supermercado"))
            .with_rule("restaurante", "Alimentação", Some("Restaurantes"))
            .with_rule("almoço", "Alimentação", Some("Restaurantes"))
            .with_rule("ifood", "Alimentação", Some("Delivery"))
            .with_rule("uber", "Transporte", Some("Aplicativos"))
            .with_rule("gasolina", "Transporte", Some("Combustível"))
            .with_rule("combustível", "Transporte", Some("Combustível"))
            .with_rule("aluguel", "Moradia", Some("Aluguel"))
            .with_rule("luz", "Moradia", Some("Energia"))
            .with_rule("farmácia", "Saúde", Some("Farmácia"))
            .with_rule("salário", "Renda", Some("Salário"))
    }

    fn lookup(&self, text: &str) -> Option<CategoryMatch> {
        let normalized = normalize_text(text);
        let words: Vec<&str> = normalized
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        self.rules
            .iter()
            .find(|(keyword, _)| {
                if keyword.contains(' ') {
                    normalized.contains(keyword.as_str())
                } else {
                    words.contains(&keyword.as_str())
                }
            })
            .map(|(_, category)| category.clone())
    }
}

#[async_trait]
impl CategoryNormalizer for StaticCategoryNormalizer {
    async fn normalize(&self, text: &str) -> Result<Option<CategoryMatch>> {
        Ok(self.lookup(text))
    }
}
