//! Offline rule grammar used when the interpreter is unavailable.
//!
//! Rules are tried in order against the lowercased message and the first
//! match wins. Each rule only extracts raw tokens; validation and time
//! arithmetic happen downstream exactly as for interpreter output.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;
use tallyhive_schema::Intent;

use crate::interpreter::RawGuess;

const DAY: &str = r"hoje|amanh[aã]|depois de amanh[aã]|ontem|(?:segunda|ter[cç]a|quarta|quinta|sexta)(?:-feira)?|s[aá]bado|domingo";
const TIME: &str = r"\d{1,2}(?:(?::|h)\d{2}|h)?(?:\s*(?:am|pm))?(?:\s+(?:da|de)\s+(?:manh[aã]|tarde|noite))?";
const AMOUNT: &str = r"(?:r\$\s*)?(?P<amount>\d+(?:[.,]\d+)*)(?:\s*(?:reais|real|contos?|pila))?";

static DAY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"\b(?:(?:na|no|nesta|neste|pr[oó]xima|pr[oó]ximo)\s+)?({DAY})\b")).expect("day regex"));
static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?:^|\s)(?:[aà]s\s+|[aà]\s+)?({TIME})(?:\s|$)")).expect("time regex"));
static WINDOW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(hoje|ontem|semana|m[eê]s|ano)\b").expect("window regex")
});
static QUERY_CATEGORY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:com|em|no|na|de)\s+(?P<cat>[\p{L} ]+?)(?:\s+(?:hoje|ontem|(?:essa|esta|nessa|nesta|na)\s+semana|(?:esse|este|nesse|neste|no)\s+m[eê]s|(?:esse|este|nesse|neste|no)\s+ano))?$")
        .expect("query category regex")
});

/// One `{pattern, extractor}` pair.
pub struct GrammarRule {
    pub name: &'static str,
    pub pattern: Regex,
    pub extract: fn(&Captures) -> RawGuess,
}

impl std::fmt::Debug for GrammarRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrammarRule")
            .field("name", &self.name)
            .field("pattern", &self.pattern.as_str())
            .finish()
    }
}

#[derive(Debug)]
pub struct FallbackGrammar {
    rules: Vec<GrammarRule>,
}

static STANDARD: LazyLock<FallbackGrammar> = LazyLock::new(FallbackGrammar::build_standard);

impl FallbackGrammar {
    /// The built-in Portuguese rule set.
    pub fn standard() -> &'static FallbackGrammar {
        &STANDARD
    }

    pub fn rules(&self) -> &[GrammarRule] {
        &self.rules
    }

    /// First matching rule's name and guess.
    pub fn parse(&self, message: &str) -> Option<(&'static str, RawGuess)> {
        let text = prepare(message);
        if text.is_empty() {
            return None;
        }
        self.rules.iter().find_map(|rule| {
            rule.pattern
                .captures(&text)
                .map(|caps| (rule.name, (rule.extract)(&caps)))
        })
    }

    fn build_standard() -> Self {
        let rules = vec![
            rule(
                "cancel_task",
                r"^(?:cancela|cancelar|cancele|deixa (?:pra|para) l[aá]|esquece|esque[cç]a|desisto)(?:\s+(?:isso|tudo))?$",
                |_| RawGuess::with_intent(Intent::Cancel, 0.8),
            ),
            rule(
                "confirm",
                r"^(?:sim|s|ok|okay|confirmo|confirma|confirmado|pode|pode ser|pode sim|isso|isso mesmo|certo|beleza|fechado)$",
                |_| RawGuess::with_intent(Intent::Confirm, 0.8),
            ),
            rule(
                "time_correction",
                &format!(
                    r"^(?:(?:n[aã]o|na verdade|ali[aá]s|corrigindo)[,.]?\s+(?:(?:[eé]|era|ser[aá]|fica)\s+)?(?:(?:pra|para)\s+)?(?:[aà]s?\s+)?|(?:[eé]|era|fica|muda|mudar|troca|trocar|passa|passar)\s+(?:(?:pra|para)\s+)?(?:[aà]s?\s+)?|(?:[aà]s|pras)\s+)(?P<time>{TIME})$"
                ),
                |caps| RawGuess {
                    scheduled_at: group(caps, "time"),
                    ..RawGuess::with_intent(Intent::UpdateAppointment, 0.75)
                },
            ),
            rule(
                "cancel_appointment",
                &format!(
                    r"^(?:cancela|cancelar|cancele|desmarca|desmarcar|desmarque)\s+(?:(?:o|a|meu|minha)\s+)?(?P<title>.+?)(?:\s+(?:de\s+)?(?:(?:na|no)\s+)?(?P<day>{DAY}))?$"
                ),
                |caps| RawGuess {
                    title: group(caps, "title").map(|t| capitalize(&t)),
                    periodo: group(caps, "day"),
                    ..RawGuess::with_intent(Intent::CancelAppointment, 0.75)
                },
            ),
            rule(
                "expense",
                &format!(
                    r"^(?:eu\s+)?(?:gastei|paguei|comprei|torrei)\s+{AMOUNT}(?:\s+(?:no|na|nos|nas|em|de|do|da|com|pro|pra|para|pelo|pela)\s+(?P<desc>.+?))?$"
                ),
                |caps| RawGuess {
                    amount: group(caps, "amount").map(Value::from),
                    description: group(caps, "desc"),
                    ..RawGuess::with_intent(Intent::RegisterExpense, 0.8)
                },
            ),
            rule(
                "revenue",
                &format!(
                    r"^(?:eu\s+)?(?:recebi|ganhei|faturei|entrou|entraram)\s+{AMOUNT}(?:\s+(?:do|da|de|dos|das|com|no|na|em|por|pelo|pela)\s+(?P<desc>.+?))?$"
                ),
                |caps| RawGuess {
                    amount: group(caps, "amount").map(Value::from),
                    description: group(caps, "desc"),
                    ..RawGuess::with_intent(Intent::RegisterRevenue, 0.8)
                },
            ),
            rule(
                "spending_query",
                r"^(?:quanto\s+(?:eu\s+)?(?P<verb>gastei|gasto|gastamos|paguei|recebi|ganhei)(?P<rest>.*)|e\s+(?:com|em|no|na)\s+(?P<followup>[\p{L} ]+))$",
                extract_query,
            ),
            rule(
                "appointment",
                r"^(?:(?:marcar|marca|marque|agendar|agenda|agende|tenho|terei|vou ter)\s+)?(?:(?:uma?|o|a)\s+)?(?P<title>reuni[aã]o|consulta|dentista|m[eé]dico|almo[cç]o|jantar|call|academia|aula|entrevista|compromisso|evento|encontro|visita|exame|barbeiro)(?:\s+com\s+(?P<with>\p{L}+))?(?P<rest>.*)$",
                extract_appointment,
            ),
            rule(
                "day_time_fragment",
                &format!(r"^(?:(?:na|no)\s+)?(?P<day>{DAY})?\s*(?:(?:[aà]s|[aà])\s+)?(?P<time>{TIME})?$"),
                |caps| RawGuess {
                    periodo: group(caps, "day"),
                    scheduled_at: group(caps, "time"),
                    ..RawGuess::with_intent(Intent::Chat, 0.6)
                },
            ),
        ];
        Self { rules }
    }
}

fn rule(name: &'static str, pattern: &str, extract: fn(&Captures) -> RawGuess) -> GrammarRule {
    GrammarRule {
        name,
        pattern: Regex::new(pattern).expect("grammar rule regex"),
        extract,
    }
}

fn extract_query(caps: &Captures) -> RawGuess {
    let mut guess = RawGuess {
        domain: Some("financeiro".into()),
        ..RawGuess::with_intent(Intent::Query, 0.7)
    };
    if let Some(category) = group(caps, "followup") {
        guess.category = Some(capitalize(&category));
        return guess;
    }

    guess.query_type = match caps.name("verb").map(|m| m.as_str()) {
        Some("recebi" | "ganhei") => Some("revenue_total".into()),
        _ => Some("expense_total".into()),
    };
    let rest = caps.name("rest").map(|m| m.as_str().trim()).unwrap_or_default();
    guess.periodo = WINDOW_RE.captures(rest).and_then(|c| c.get(1)).map(|m| {
        match m.as_str() {
            "semana" => "week",
            "mes" | "mês" => "month",
            "ano" => "year",
            other => other,
        }
        .to_string()
    });
    guess.category = QUERY_CATEGORY_RE
        .captures(rest)
        .and_then(|c| group(&c, "cat"))
        .filter(|cat| !WINDOW_RE.is_match(cat))
        .map(|cat| capitalize(&cat));
    guess
}

fn extract_appointment(caps: &Captures) -> RawGuess {
    let mut title = group(caps, "title").map(|t| capitalize(&t)).unwrap_or_default();
    if let Some(with) = group(caps, "with") {
        title = format!("{title} com {}", capitalize(&with));
    }
    let rest = caps.name("rest").map(|m| m.as_str()).unwrap_or_default();

    RawGuess {
        title: Some(title),
        periodo: DAY_RE
            .captures(rest)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string()),
        scheduled_at: TIME_RE
            .captures(rest)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string()),
        ..RawGuess::with_intent(Intent::CreateAppointment, 0.7)
    }
}

fn group(caps: &Captures, name: &str) -> Option<String> {
    caps.name(name)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Lowercase, collapse whitespace, drop trailing punctuation.
fn prepare(message: &str) -> String {
    message
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(['.', '!', '?', ' '])
        .to_string()
}
