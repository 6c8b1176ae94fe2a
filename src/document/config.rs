use serde::{Deserialize, Serialize};

use crate::document::model::Color;

pub const ZOOM_MIN: u16 = 25;
pub const ZOOM_MAX: u16 = 200;
pub const COLUMNS_MAX: u8 = 3;

/// Physical page sizes, dimensioned in CSS pixels at 96 dpi.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PageSizeId {
    A4,
    Letter,
    Legal,
    A3,
    A5,
}

impl PageSizeId {
    pub const fn dimensions(self) -> (f32, f32) {
        match self {
            Self::A4 => (794.0, 1123.0),
            Self::Letter => (816.0, 1056.0),
            Self::Legal => (816.0, 1344.0),
            Self::A3 => (1123.0, 1587.0),
            Self::A5 => (559.0, 794.0),
        }
    }

    pub const fn title(self) -> &'static str {
        match self {
            Self::A4 => "A4",
            Self::Letter => "Letter",
            Self::Legal => "Legal",
            Self::A3 => "A3",
            Self::A5 => "A5",
        }
    }

    pub const fn all() -> [Self; 5] {
        [Self::A4, Self::Letter, Self::Legal, Self::A3, Self::A5]
    }
}

impl Default for PageSizeId {
    fn default() -> Self {
        Self::A4
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Orientation {
    Portrait,
    Landscape,
}

impl Default for Orientation {
    fn default() -> Self {
        Self::Portrait
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Margins {
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub left: f32,
}

impl Default for Margins {
    fn default() -> Self {
        Self {
            top: 96.0,
            right: 96.0,
            bottom: 96.0,
            left: 96.0,
        }
    }
}

impl Margins {
    pub const fn uniform(v: f32) -> Self {
        Self {
            top: v,
            right: v,
            bottom: v,
            left: v,
        }
    }

    /// Named presets offered by the margin picker.
    pub const fn preset(name: MarginPreset) -> Self {
        match name {
            MarginPreset::Normal => Self::uniform(96.0),
            MarginPreset::Narrow => Self::uniform(48.0),
            MarginPreset::Moderate => Self {
                top: 96.0,
                bottom: 96.0,
                left: 72.0,
                right: 72.0,
            },
            MarginPreset::Wide => Self {
                top: 96.0,
                bottom: 96.0,
                left: 192.0,
                right: 192.0,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MarginPreset {
    Normal,
    Narrow,
    Moderate,
    Wide,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Watermark {
    pub text: String,
    pub opacity: f32,
}

impl Default for Watermark {
    fn default() -> Self {
        Self {
            text: String::new(),
            opacity: 0.15,
        }
    }
}

/// Page setup for the whole document. Header and footer content lives in the
/// chrome state; the two variant flags live here because they are toggled from
/// page setup and only read during resolution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PageConfig {
    pub size: PageSizeId,
    pub orientation: Orientation,
    pub margins: Margins,
    pub page_gap: f32,
    pub columns: u8,
    pub background: Option<Color>,
    pub watermark: Option<Watermark>,
    pub first_page_different: bool,
    pub even_odd_different: bool,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            size: PageSizeId::A4,
            orientation: Orientation::Portrait,
            margins: Margins::default(),
            page_gap: 24.0,
            columns: 1,
            background: None,
            watermark: None,
            first_page_different: false,
            even_odd_different: false,
        }
    }
}

impl PageConfig {
    pub fn page_width(&self) -> f32 {
        let (w, h) = self.size.dimensions();
        match self.orientation {
            Orientation::Portrait => w,
            Orientation::Landscape => h,
        }
    }

    pub fn page_height(&self) -> f32 {
        let (w, h) = self.size.dimensions();
        match self.orientation {
            Orientation::Portrait => h,
            Orientation::Landscape => w,
        }
    }

    pub fn content_width(&self) -> f32 {
        (self.page_width() - self.margins.left - self.margins.right).max(1.0)
    }

    pub fn content_height(&self) -> f32 {
        (self.page_height() - self.margins.top - self.margins.bottom).max(1.0)
    }

    /// Width available to one text column.
    pub fn column_width(&self) -> f32 {
        self.content_width() / self.columns.max(1) as f32
    }

    /// Margins may never swallow the page. Each axis keeps at least a sliver
    /// of content area; offending values are scaled back proportionally.
    pub fn set_margins(&mut self, margins: Margins) {
        let mut m = Margins {
            top: margins.top.max(0.0),
            right: margins.right.max(0.0),
            bottom: margins.bottom.max(0.0),
            left: margins.left.max(0.0),
        };
        let max_v = self.page_height() - 1.0;
        if m.top + m.bottom > max_v {
            let scale = max_v / (m.top + m.bottom);
            m.top *= scale;
            m.bottom *= scale;
        }
        let max_h = self.page_width() - 1.0;
        if m.left + m.right > max_h {
            let scale = max_h / (m.left + m.right);
            m.left *= scale;
            m.right *= scale;
        }
        self.margins = m;
    }

    pub fn set_columns(&mut self, columns: u8) {
        self.columns = columns.clamp(1, COLUMNS_MAX);
    }

    pub fn set_watermark(&mut self, watermark: Option<Watermark>) {
        self.watermark = watermark.map(|mut w| {
            w.opacity = w.opacity.clamp(0.0, 1.0);
            w
        });
    }
}

pub fn clamp_zoom(zoom: u16) -> u16 {
    zoom.clamp(ZOOM_MIN, ZOOM_MAX)
}

/// One table of the relational schema offered to the variable autocomplete.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseTable {
    pub table_name: String,
    pub display_name: String,
    pub fields: Vec<DatabaseField>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseField {
    pub name: String,
    pub display_name: String,
}

/// A reusable snippet insertable through the quick-text autocomplete. The
/// content is markup and may itself carry placeholders.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct QuickText {
    pub name: String,
    pub content: String,
}

/// Resting values of the host toolbar's style controls: the look given to
/// text typed into an empty context and the block type new content starts
/// as. `None` fields fall back to the stylesheet.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct StyleDefaults {
    pub font_family: Option<String>,
    pub font_size: Option<f32>,
    pub text_color: Option<Color>,
    pub highlight_color: Option<Color>,
    /// `None` is a normal paragraph; `Some(n)` starts heading level `n`.
    pub heading_level: Option<u8>,
}

impl StyleDefaults {
    /// The run style for fresh text where there is no neighbour to inherit
    /// from.
    pub fn run_style(&self) -> crate::document::model::RunStyle {
        crate::document::model::RunStyle {
            font_family: self.font_family.clone(),
            font_size: self.font_size,
            color: self.text_color,
            background: self.highlight_color,
            ..Default::default()
        }
    }
}

/// Construction-time options, supplied once by the host.
#[derive(Debug, Clone, Default)]
pub struct EditorOptions {
    pub initial_content: Option<String>,
    pub database: Vec<DatabaseTable>,
    pub quick_texts: Vec<QuickText>,
    pub page_config: PageConfig,
    pub read_only: bool,
    pub dark_mode: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landscape_swaps_dimensions() {
        let mut config = PageConfig::default();
        assert_eq!(config.page_width(), 794.0);
        assert_eq!(config.page_height(), 1123.0);
        config.orientation = Orientation::Landscape;
        assert_eq!(config.page_width(), 1123.0);
        assert_eq!(config.page_height(), 794.0);
    }

    #[test]
    fn margins_never_swallow_the_page() {
        let mut config = PageConfig::default();
        config.set_margins(Margins::uniform(2000.0));
        assert!(config.margins.top + config.margins.bottom < config.page_height());
        assert!(config.margins.left + config.margins.right < config.page_width());
        assert!(config.content_height() >= 1.0);
    }

    #[test]
    fn column_and_zoom_clamps() {
        let mut config = PageConfig::default();
        config.set_columns(9);
        assert_eq!(config.columns, COLUMNS_MAX);
        config.set_columns(0);
        assert_eq!(config.columns, 1);
        assert_eq!(clamp_zoom(10), ZOOM_MIN);
        assert_eq!(clamp_zoom(400), ZOOM_MAX);
        assert_eq!(clamp_zoom(100), 100);
    }

    #[test]
    fn watermark_opacity_is_clamped() {
        let mut config = PageConfig::default();
        config.set_watermark(Some(Watermark {
            text: "DRAFT".into(),
            opacity: 3.0,
        }));
        assert_eq!(config.watermark.as_ref().unwrap().opacity, 1.0);
    }

    #[test]
    fn interchange_types_use_camel_case() {
        let table = DatabaseTable {
            table_name: "customers".into(),
            display_name: "Customers".into(),
            fields: vec![DatabaseField {
                name: "firstName".into(),
                display_name: "First name".into(),
            }],
        };
        let json = serde_json::to_string(&table).unwrap();
        assert!(json.contains("\"tableName\""));
        assert!(json.contains("\"displayName\""));
    }
}
