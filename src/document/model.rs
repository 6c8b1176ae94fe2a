use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::SourceFormat;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Document {
    pub metadata: DocumentMetadata,
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: String,
    pub author: String,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub source_path: Option<PathBuf>,
    pub format: SourceFormat,
}

impl Default for DocumentMetadata {
    fn default() -> Self {
        Self {
            title: String::new(),
            author: String::new(),
            created: None,
            modified: None,
            source_path: None,
            format: SourceFormat::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Block {
    Paragraph(Paragraph),
    Heading(Heading),
    Table(Table),
    Image(ImageBlock),
    List(List),
    HorizontalRule,
    PageBreak,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct BlockId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Paragraph {
    pub id: BlockId,
    pub inlines: Vec<Inline>,
    pub alignment: ParagraphAlignment,
    pub spacing: ParagraphSpacing,
    pub indent: Indent,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Heading {
    pub id: BlockId,
    pub level: u8,
    pub inlines: Vec<Inline>,
    pub alignment: ParagraphAlignment,
}

/// Inline content of a paragraph: styled text runs interleaved with atomic
/// placeholder chips. Chips are never split by editing operations; for cursor
/// arithmetic each chip occupies exactly one character position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Inline {
    Run(Run),
    Chip(Chip),
}

impl Inline {
    pub fn char_len(&self) -> usize {
        match self {
            Inline::Run(run) => run.text.chars().count(),
            Inline::Chip(_) => 1,
        }
    }

    pub fn visible_text(&self) -> String {
        match self {
            Inline::Run(run) => run.text.clone(),
            Inline::Chip(chip) => chip.label(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Run {
    pub text: String,
    pub style: RunStyle,
}

impl Run {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            style: RunStyle::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RunStyle {
    pub font_family: Option<String>,
    pub font_size: Option<f32>,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub strikethrough: bool,
    pub color: Option<Color>,
    pub background: Option<Color>,
    pub superscript: bool,
    pub subscript: bool,
}

/// A non-editable token standing in for text substituted later: a data-bound
/// variable, or the page counters that only resolve at export time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chip {
    pub kind: ChipKind,
    pub style: RunStyle,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ChipKind {
    Variable { table: String, field: String },
    PageNumber,
    PageTotal,
}

impl Chip {
    pub fn variable(table: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            kind: ChipKind::Variable {
                table: table.into(),
                field: field.into(),
            },
            style: RunStyle::default(),
        }
    }

    pub fn page_number() -> Self {
        Self {
            kind: ChipKind::PageNumber,
            style: RunStyle::default(),
        }
    }

    pub fn page_total() -> Self {
        Self {
            kind: ChipKind::PageTotal,
            style: RunStyle::default(),
        }
    }

    /// The canonical placeholder text this chip stands for.
    pub fn placeholder(&self) -> String {
        match &self.kind {
            ChipKind::Variable { table, field } => format!("{{{{{table}.{field}}}}}"),
            ChipKind::PageNumber => "{{page}}".to_string(),
            ChipKind::PageTotal => "{{total}}".to_string(),
        }
    }

    /// Display label shown inside the token.
    pub fn label(&self) -> String {
        match &self.kind {
            ChipKind::Variable { table, field } => format!("{table}.{field}"),
            ChipKind::PageNumber => "page".to_string(),
            ChipKind::PageTotal => "total".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Table {
    pub id: BlockId,
    pub rows: Vec<TableRow>,
    pub column_widths: Vec<f32>,
    pub borders: TableBorders,
    pub cell_padding: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TableRow {
    pub cells: Vec<TableCell>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TableCell {
    pub blocks: Vec<Block>,
    pub rowspan: u16,
    pub colspan: u16,
    pub background: Option<Color>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TableBorders {
    pub outer: BorderStyle,
    pub inner_horizontal: BorderStyle,
    pub inner_vertical: BorderStyle,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BorderStyle {
    pub width: f32,
    pub color: Color,
}

impl Default for BorderStyle {
    fn default() -> Self {
        Self {
            width: 1.0,
            color: Color::rgb(0.7, 0.7, 0.7),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct List {
    pub id: BlockId,
    pub items: Vec<ListItem>,
    pub list_type: ListType,
    pub start_number: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ListItem {
    pub inlines: Vec<Inline>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ListType {
    Bullet,
    Numbered,
}

impl Default for ListType {
    fn default() -> Self {
        Self::Bullet
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ImageBlock {
    pub id: BlockId,
    pub data: Option<ImageData>,
    pub src: Option<String>,
    pub alt_text: String,
    pub width: f32,
    pub height: f32,
    pub original_width: u32,
    pub original_height: u32,
    pub wrap: TextWrap,
    pub qr: Option<QrPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ImageData {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub width: u32,
    pub height: u32,
}

/// How body text flows around an image.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TextWrap {
    Inline,
    FloatLeft,
    FloatRight,
    Center,
    Behind,
    InFront,
}

impl Default for TextWrap {
    fn default() -> Self {
        Self::Inline
    }
}

/// Payload of a QR component. The core stores the encoded data and the wanted
/// footprint; rendering the matrix is the host rasterizer's job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QrPayload {
    pub data: String,
    pub module_size: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ParagraphAlignment {
    Left,
    Center,
    Right,
    Justify,
}

impl Default for ParagraphAlignment {
    fn default() -> Self {
        Self::Left
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ParagraphSpacing {
    pub before: f32,
    pub after: f32,
    /// Line-height multiplier; zero means the renderer default.
    pub line: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Indent {
    pub left: f32,
    pub right: f32,
    pub first_line: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn from_rgb8(r: u8, g: u8, b: u8) -> Self {
        Self::rgb(r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0)
    }

    pub fn to_rgb8(self) -> (u8, u8, u8) {
        (
            (self.r.clamp(0.0, 1.0) * 255.0).round() as u8,
            (self.g.clamp(0.0, 1.0) * 255.0).round() as u8,
            (self.b.clamp(0.0, 1.0) * 255.0).round() as u8,
        )
    }

    pub fn to_css(self) -> String {
        let (r, g, b) = self.to_rgb8();
        if (self.a - 1.0).abs() < f32::EPSILON {
            format!("rgb({r}, {g}, {b})")
        } else {
            format!("rgba({r}, {g}, {b}, {:.2})", self.a)
        }
    }

    /// Parses the color notations that show up in pasted or converted markup:
    /// `#rgb`, `#rrggbb`, `rgb(..)` and `rgba(..)`.
    pub fn parse_css(value: &str) -> Option<Self> {
        let value = value.trim();
        if let Some(hex) = value.strip_prefix('#') {
            return match hex.len() {
                3 => {
                    let mut chans = [0u8; 3];
                    for (i, c) in hex.chars().enumerate() {
                        let d = c.to_digit(16)? as u8;
                        chans[i] = d * 16 + d;
                    }
                    Some(Self::from_rgb8(chans[0], chans[1], chans[2]))
                }
                6 => {
                    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
                    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
                    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
                    Some(Self::from_rgb8(r, g, b))
                }
                _ => None,
            };
        }
        let inner = value
            .strip_prefix("rgba(")
            .or_else(|| value.strip_prefix("rgb("))?
            .strip_suffix(')')?;
        let parts: Vec<&str> = inner.split(',').map(str::trim).collect();
        if parts.len() < 3 {
            return None;
        }
        let r: u8 = parts[0].parse().ok()?;
        let g: u8 = parts[1].parse().ok()?;
        let b: u8 = parts[2].parse().ok()?;
        let a: f32 = match parts.get(3) {
            Some(p) => p.parse().ok()?,
            None => 1.0,
        };
        Some(Self::rgba(
            r as f32 / 255.0,
            g as f32 / 255.0,
            b as f32 / 255.0,
            a,
        ))
    }
}

impl Block {
    pub fn id(&self) -> Option<BlockId> {
        match self {
            Block::Paragraph(p) => Some(p.id),
            Block::Heading(h) => Some(h.id),
            Block::Table(t) => Some(t.id),
            Block::Image(img) => Some(img.id),
            Block::List(l) => Some(l.id),
            Block::HorizontalRule | Block::PageBreak => None,
        }
    }

    pub fn inlines(&self) -> Option<&[Inline]> {
        match self {
            Block::Paragraph(p) => Some(&p.inlines),
            Block::Heading(h) => Some(&h.inlines),
            _ => None,
        }
    }

    pub fn inlines_mut(&mut self) -> Option<&mut Vec<Inline>> {
        match self {
            Block::Paragraph(p) => Some(&mut p.inlines),
            Block::Heading(h) => Some(&mut h.inlines),
            _ => None,
        }
    }

    pub fn visible_text(&self) -> String {
        match self {
            Block::Paragraph(_) | Block::Heading(_) => self
                .inlines()
                .map(|inlines| inlines.iter().map(Inline::visible_text).collect())
                .unwrap_or_default(),
            Block::List(list) => {
                let mut out = String::new();
                for item in &list.items {
                    for inline in &item.inlines {
                        out.push_str(&inline.visible_text());
                    }
                    out.push('\n');
                }
                out
            }
            Block::Table(table) => {
                let mut out = String::new();
                for row in &table.rows {
                    for cell in &row.cells {
                        for block in &cell.blocks {
                            out.push_str(&block.visible_text());
                            out.push(' ');
                        }
                    }
                    out.push('\n');
                }
                out
            }
            Block::Image(img) => img.alt_text.clone(),
            Block::HorizontalRule | Block::PageBreak => String::new(),
        }
    }
}

impl Paragraph {
    pub fn with_text(id: BlockId, text: impl Into<String>) -> Self {
        let text = text.into();
        let inlines = if text.is_empty() {
            Vec::new()
        } else {
            vec![Inline::Run(Run::plain(text))]
        };
        Self {
            id,
            inlines,
            ..Default::default()
        }
    }

    pub fn char_len(&self) -> usize {
        self.inlines.iter().map(Inline::char_len).sum()
    }

    pub fn text(&self) -> String {
        self.inlines.iter().map(|i| i.visible_text()).collect()
    }
}

impl Document {
    pub fn with_blocks(blocks: Vec<Block>) -> Self {
        Self {
            metadata: DocumentMetadata::default(),
            blocks,
        }
    }

    /// Ids are allocated above the current maximum, the same scheme used for
    /// every block insertion path.
    pub fn next_block_id(&self) -> BlockId {
        fn scan(blocks: &[Block], max: &mut u64) {
            for block in blocks {
                if let Some(id) = block.id() {
                    *max = (*max).max(id.0);
                }
                if let Block::Table(table) = block {
                    for row in &table.rows {
                        for cell in &row.cells {
                            scan(&cell.blocks, max);
                        }
                    }
                }
            }
        }
        let mut max = 0u64;
        scan(&self.blocks, &mut max);
        BlockId(max + 1)
    }

    pub fn find_block(&self, id: BlockId) -> Option<&Block> {
        fn walk(blocks: &[Block], id: BlockId) -> Option<&Block> {
            for block in blocks {
                if block.id() == Some(id) {
                    return Some(block);
                }
                if let Block::Table(table) = block {
                    for row in &table.rows {
                        for cell in &row.cells {
                            if let Some(found) = walk(&cell.blocks, id) {
                                return Some(found);
                            }
                        }
                    }
                }
            }
            None
        }
        walk(&self.blocks, id)
    }

    pub fn find_block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        fn walk(blocks: &mut [Block], id: BlockId) -> Option<&mut Block> {
            for block in blocks {
                if block.id() == Some(id) {
                    return Some(block);
                }
                if let Block::Table(table) = block {
                    for row in &mut table.rows {
                        for cell in &mut row.cells {
                            if let Some(found) = walk(&mut cell.blocks, id) {
                                return Some(found);
                            }
                        }
                    }
                }
            }
            None
        }
        walk(&mut self.blocks, id)
    }

    pub fn find_paragraph_mut(&mut self, id: BlockId) -> Option<&mut Paragraph> {
        match self.find_block_mut(id)? {
            Block::Paragraph(p) => Some(p),
            _ => None,
        }
    }

    pub fn block_index(&self, id: BlockId) -> Option<usize> {
        self.blocks.iter().position(|b| b.id() == Some(id))
    }

    /// A body is considered empty when it has no blocks or a single paragraph
    /// with no content.
    pub fn is_empty_body(&self) -> bool {
        match self.blocks.as_slice() {
            [] => true,
            [Block::Paragraph(p)] => p.inlines.is_empty(),
            _ => false,
        }
    }
}

/// A fresh table with one empty, individually addressable paragraph per cell.
/// Cell paragraphs are numbered sequentially after the table's own id.
pub fn empty_table(id: BlockId, rows: usize, cols: usize) -> Table {
    let rows = rows.clamp(1, 200);
    let cols = cols.clamp(1, 24);
    let mut next = id.0;
    let mut make_row = |cols: usize| TableRow {
        cells: (0..cols)
            .map(|_| {
                next += 1;
                TableCell {
                    blocks: vec![Block::Paragraph(Paragraph {
                        id: BlockId(next),
                        ..Paragraph::default()
                    })],
                    rowspan: 1,
                    colspan: 1,
                    background: None,
                }
            })
            .collect(),
    };
    Table {
        id,
        rows: (0..rows).map(|_| make_row(cols)).collect(),
        column_widths: vec![1.0 / cols as f32; cols],
        borders: TableBorders::default(),
        cell_padding: 6.0,
    }
}
