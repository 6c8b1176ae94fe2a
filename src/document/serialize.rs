use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::document::config::{DatabaseTable, PageConfig, QuickText};
use crate::document::model::{Block, Inline};

/// A placeholder found in serialized content. `{{table.field}}` decomposes
/// into a data-bound variable; anything else inside double braces becomes a
/// generic text marker preserved verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Marker {
    Variable {
        value: String,
        table: String,
        field: String,
    },
    Text {
        value: String,
    },
}

impl Marker {
    pub fn value(&self) -> &str {
        match self {
            Marker::Variable { value, .. } | Marker::Text { value } => value,
        }
    }
}

/// Header and footer content per variant, stored as canonical markup with
/// placeholder text (never chips).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ChromeContent {
    pub header: String,
    pub footer: String,
    pub first_page_header: String,
    pub first_page_footer: String,
    pub even_page_header: String,
    pub even_page_footer: String,
}

/// Page geometry plus the chrome markup, persisted together.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedPageConfig {
    #[serde(flatten)]
    pub config: PageConfig,
    #[serde(flatten)]
    pub chrome: ChromeContent,
}

/// The complete persistable editor state.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SerializedDocument {
    pub html: String,
    pub markers: Vec<Marker>,
    pub page_config: PersistedPageConfig,
    pub db_models: Vec<DatabaseTable>,
    pub quick_texts: Vec<QuickText>,
}

impl SerializedDocument {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }
}

/// Builds the persisted state from the live parts. Marker extraction runs on
/// the body only; `{{page}}` and `{{total}}` inside chrome are pagination
/// values, not markers.
pub fn serialize_state(
    body: &[Block],
    config: &PageConfig,
    chrome: &ChromeContent,
    db_models: &[DatabaseTable],
    quick_texts: &[QuickText],
) -> SerializedDocument {
    let html = crate::document::html::blocks_to_html(body);
    let markers = extract_markers(&placeholder_projection(body));
    SerializedDocument {
        html,
        markers,
        page_config: PersistedPageConfig {
            config: config.clone(),
            chrome: chrome.clone(),
        },
        db_models: db_models.to_vec(),
        quick_texts: quick_texts.to_vec(),
    }
}

/// Text projection used for marker scanning: runs contribute their text,
/// chips contribute their canonical placeholder form.
pub fn placeholder_projection(blocks: &[Block]) -> String {
    let mut out = String::new();
    for block in blocks {
        project_block(block, &mut out);
        out.push('\n');
    }
    out
}

fn project_block(block: &Block, out: &mut String) {
    match block {
        Block::Paragraph(_) | Block::Heading(_) => {
            if let Some(inlines) = block.inlines() {
                project_inlines(inlines, out);
            }
        }
        Block::List(list) => {
            for item in &list.items {
                project_inlines(&item.inlines, out);
                out.push('\n');
            }
        }
        Block::Table(table) => {
            for row in &table.rows {
                for cell in &row.cells {
                    for nested in &cell.blocks {
                        project_block(nested, out);
                    }
                    out.push('\t');
                }
                out.push('\n');
            }
        }
        Block::Image(_) | Block::HorizontalRule | Block::PageBreak => {}
    }
}

fn project_inlines(inlines: &[Inline], out: &mut String) {
    for inline in inlines {
        match inline {
            Inline::Run(run) => out.push_str(&run.text),
            Inline::Chip(chip) => out.push_str(&chip.placeholder()),
        }
    }
}

/// Scans text for `{{...}}` placeholders and classifies each one. A single
/// interior dot with non-empty sides makes a variable marker; everything else
/// is a text marker.
pub fn extract_markers(text: &str) -> Vec<Marker> {
    let Ok(pattern) = Regex::new(r"\{\{([^{}]+)\}\}") else {
        return Vec::new();
    };
    let mut markers = Vec::new();
    for capture in pattern.captures_iter(text) {
        let full = capture.get(0).map(|m| m.as_str()).unwrap_or_default();
        let inner = capture.get(1).map(|m| m.as_str()).unwrap_or_default().trim();
        markers.push(classify_marker(full, inner));
    }
    markers
}

fn classify_marker(full: &str, inner: &str) -> Marker {
    let mut parts = inner.splitn(2, '.');
    if let (Some(table), Some(field)) = (parts.next(), parts.next()) {
        let table = table.trim();
        let field = field.trim();
        if !table.is_empty() && !field.is_empty() && !field.contains('.') {
            return Marker::Variable {
                value: full.to_string(),
                table: table.to_string(),
                field: field.to_string(),
            };
        }
    }
    Marker::Text {
        value: full.to_string(),
    }
}
