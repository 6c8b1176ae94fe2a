use crate::document::config::{DatabaseTable, QuickText};
use crate::document::model::Chip;

/// Two-character token that opens a database lookup (`table` then `.field`).
pub const DB_TRIGGER: &str = "{{";
/// Two-character token that opens the quick-text lookup.
pub const QUICK_TRIGGER: &str = "@@";

/// Grammar position inside a triggered sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Table,
    Field { table: String },
    QuickText,
}

/// Result of scanning the text immediately before the caret. `span_chars` is
/// the length of the whole triggered sequence including the trigger token,
/// counted in characters back from the caret.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerScan {
    pub phase: Phase,
    pub query: String,
    pub span_chars: usize,
}

/// Scans backward from the caret for an open trigger sequence. Only the text
/// of the current run is considered; a closed sequence (`}}` present) or a
/// line break ends the search.
pub fn scan_trigger(text_before_caret: &str) -> Option<TriggerScan> {
    let db = text_before_caret.rfind(DB_TRIGGER);
    let quick = text_before_caret.rfind(QUICK_TRIGGER);
    let (at, trigger) = match (db, quick) {
        (Some(d), Some(q)) if q > d => (q, QUICK_TRIGGER),
        (Some(d), _) => (d, DB_TRIGGER),
        (None, Some(q)) => (q, QUICK_TRIGGER),
        (None, None) => return None,
    };
    let tail = &text_before_caret[at + trigger.len()..];
    if tail.contains("}}") || tail.contains('\n') {
        return None;
    }
    let span_chars = trigger.len() + tail.chars().count();
    if trigger == QUICK_TRIGGER {
        return Some(TriggerScan {
            phase: Phase::QuickText,
            query: tail.to_string(),
            span_chars,
        });
    }
    match tail.split_once('.') {
        Some((table, query)) => Some(TriggerScan {
            phase: Phase::Field {
                table: table.to_string(),
            },
            query: query.to_string(),
            span_chars,
        }),
        None => Some(TriggerScan {
            phase: Phase::Table,
            query: tail.to_string(),
            span_chars,
        }),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SuggestionItem {
    Table { name: String, label: String },
    Field { table: String, name: String, label: String },
    QuickText { name: String, content: String },
    NoResults,
}

impl SuggestionItem {
    pub fn label(&self) -> &str {
        match self {
            SuggestionItem::Table { label, .. }
            | SuggestionItem::Field { label, .. } => label,
            SuggestionItem::QuickText { name, .. } => name,
            SuggestionItem::NoResults => "No results",
        }
    }
}

/// What the editor should do after a confirmed suggestion. `replace_chars`
/// counts back from the caret and always covers the full triggered span.
#[derive(Debug, Clone, PartialEq)]
pub enum Confirmation {
    /// Table phase: re-insert the sequence with the chosen table and a dot,
    /// which re-opens the popup in field phase.
    InsertText { replace_chars: usize, text: String },
    /// Field phase: the whole span collapses into a placeholder chip.
    InsertChip { replace_chars: usize, chip: Chip },
    /// Quick-text phase: the span is replaced by the snippet's markup.
    InsertMarkup { replace_chars: usize, markup: String },
}

#[derive(Debug)]
struct Session {
    phase: Phase,
    query: String,
    span_chars: usize,
    items: Vec<SuggestionItem>,
    selected: usize,
}

/// Popup state machine. The editor refreshes it after every text mutation
/// and routes navigation keys here while a session is open.
#[derive(Debug, Default)]
pub struct AutocompleteState {
    session: Option<Session>,
}

impl AutocompleteState {
    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn items(&self) -> &[SuggestionItem] {
        self.session.as_ref().map(|s| s.items.as_slice()).unwrap_or(&[])
    }

    pub fn selected(&self) -> usize {
        self.session.as_ref().map(|s| s.selected).unwrap_or(0)
    }

    pub fn phase(&self) -> Option<&Phase> {
        self.session.as_ref().map(|s| &s.phase)
    }

    /// Re-scans the caret context and rebuilds the suggestion list. Returns
    /// whether the popup is open afterwards.
    pub fn refresh(
        &mut self,
        text_before_caret: &str,
        tables: &[DatabaseTable],
        quick_texts: &[QuickText],
    ) -> bool {
        let Some(scan) = scan_trigger(text_before_caret) else {
            self.session = None;
            return false;
        };
        let items = build_items(&scan, tables, quick_texts);
        let keep_selection = self
            .session
            .as_ref()
            .is_some_and(|s| s.phase == scan.phase && s.query == scan.query);
        let selected = if keep_selection {
            self.session
                .as_ref()
                .map(|s| s.selected.min(items.len().saturating_sub(1)))
                .unwrap_or(0)
        } else {
            0
        };
        self.session = Some(Session {
            phase: scan.phase,
            query: scan.query,
            span_chars: scan.span_chars,
            items,
            selected,
        });
        true
    }

    pub fn dismiss(&mut self) {
        self.session = None;
    }

    pub fn select_next(&mut self) {
        if let Some(s) = self.session.as_mut() {
            if !s.items.is_empty() {
                s.selected = (s.selected + 1) % s.items.len();
            }
        }
    }

    pub fn select_prev(&mut self) {
        if let Some(s) = self.session.as_mut() {
            if !s.items.is_empty() {
                s.selected = (s.selected + s.items.len() - 1) % s.items.len();
            }
        }
    }

    /// Confirms the highlighted suggestion. The no-results entry confirms to
    /// nothing and leaves the popup open.
    pub fn confirm(&mut self) -> Option<Confirmation> {
        let session = self.session.as_ref()?;
        let item = session.items.get(session.selected)?;
        let confirmation = match item {
            SuggestionItem::NoResults => return None,
            SuggestionItem::Table { name, .. } => Confirmation::InsertText {
                replace_chars: session.span_chars,
                text: format!("{DB_TRIGGER}{name}."),
            },
            SuggestionItem::Field { table, name, .. } => Confirmation::InsertChip {
                replace_chars: session.span_chars,
                chip: Chip::variable(table.clone(), name.clone()),
            },
            SuggestionItem::QuickText { content, .. } => Confirmation::InsertMarkup {
                replace_chars: session.span_chars,
                markup: content.clone(),
            },
        };
        self.session = None;
        Some(confirmation)
    }
}

fn build_items(
    scan: &TriggerScan,
    tables: &[DatabaseTable],
    quick_texts: &[QuickText],
) -> Vec<SuggestionItem> {
    let query = scan.query.trim().to_lowercase();
    let mut items = match &scan.phase {
        Phase::Table => filter_ranked(tables.iter(), &query, |t| {
            (&t.table_name, &t.display_name)
        })
        .map(|t| SuggestionItem::Table {
            name: t.table_name.clone(),
            label: pick_label(&t.display_name, &t.table_name),
        })
        .collect::<Vec<_>>(),
        Phase::Field { table } => {
            let wanted = table.trim().to_lowercase();
            tables
                .iter()
                .find(|t| {
                    t.table_name.to_lowercase() == wanted
                        || t.display_name.to_lowercase() == wanted
                })
                .map(|t| {
                    filter_ranked(t.fields.iter(), &query, |f| (&f.name, &f.display_name))
                        .map(|f| SuggestionItem::Field {
                            table: t.table_name.clone(),
                            name: f.name.clone(),
                            label: pick_label(&f.display_name, &f.name),
                        })
                        .collect()
                })
                .unwrap_or_default()
        }
        Phase::QuickText => filter_ranked(quick_texts.iter(), &query, |q| (&q.name, &q.name))
            .map(|q| SuggestionItem::QuickText {
                name: q.name.clone(),
                content: q.content.clone(),
            })
            .collect(),
    };
    if items.is_empty() {
        items.push(SuggestionItem::NoResults);
    }
    items
}

// Prefix matches list ahead of substring matches, both in catalog order.
fn filter_ranked<'a, T, F>(
    candidates: impl Iterator<Item = &'a T>,
    query: &str,
    keys: F,
) -> impl Iterator<Item = &'a T>
where
    F: Fn(&T) -> (&String, &String),
    T: 'a,
{
    let mut prefix = Vec::new();
    let mut substring = Vec::new();
    for candidate in candidates {
        let (primary, secondary) = keys(candidate);
        let primary = primary.to_lowercase();
        let secondary = secondary.to_lowercase();
        if query.is_empty() || primary.starts_with(query) || secondary.starts_with(query) {
            prefix.push(candidate);
        } else if primary.contains(query) || secondary.contains(query) {
            substring.push(candidate);
        }
    }
    prefix.into_iter().chain(substring)
}

fn pick_label(display: &str, name: &str) -> String {
    if display.is_empty() {
        name.to_string()
    } else {
        display.to_string()
    }
}
