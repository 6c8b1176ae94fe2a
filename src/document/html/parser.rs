use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::document::model::{
    Block, BlockId, BorderStyle, Chip, ChipKind, Color, ImageBlock, ImageData, Inline, List,
    ListItem, ListType, Paragraph, ParagraphAlignment, ParagraphSpacing, QrPayload, Run, RunStyle,
    Table, TableCell, TableRow, TextWrap,
};

/// Parses editor or foreign markup into blocks.
///
/// This is a pragmatic tag walker, not a conforming HTML parser: it handles
/// the canonical markup the writer emits, the subset real clipboards and
/// converters produce, and silently drops what it does not understand.
/// Pagination spacer elements from previously persisted documents are
/// stripped here so stale layout artifacts never re-enter the model.
pub fn parse_html(html: &str) -> Vec<Block> {
    let mut parser = HtmlParser::new();
    for token in tokenize(html) {
        match token {
            Token::Text(text) => parser.handle_text(&text),
            Token::Open {
                name,
                attrs,
                self_closing,
            } => parser.handle_open_tag(&name, &attrs, self_closing),
            Token::Close(name) => parser.handle_close_tag(&name),
        }
    }
    parser.finish()
}

enum Token {
    Text(String),
    Open {
        name: String,
        attrs: String,
        self_closing: bool,
    },
    Close(String),
}

fn tokenize(html: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut rest = html;
    loop {
        let Some(lt) = rest.find('<') else {
            if !rest.is_empty() {
                tokens.push(Token::Text(rest.to_string()));
            }
            return tokens;
        };
        if lt > 0 {
            tokens.push(Token::Text(rest[..lt].to_string()));
        }
        rest = &rest[lt..];
        if rest.starts_with("<!--") {
            match rest.find("-->") {
                Some(end) => rest = &rest[end + 3..],
                None => return tokens,
            }
            continue;
        }
        if rest.starts_with("<!") || rest.starts_with("<?") {
            match rest.find('>') {
                Some(end) => rest = &rest[end + 1..],
                None => return tokens,
            }
            continue;
        }
        // Find the closing angle bracket, ignoring any inside quoted values.
        let mut end = None;
        let mut quote: Option<char> = None;
        for (i, c) in rest.char_indices().skip(1) {
            match quote {
                Some(q) if c == q => quote = None,
                Some(_) => {}
                None => match c {
                    '"' | '\'' => quote = Some(c),
                    '>' => {
                        end = Some(i);
                        break;
                    }
                    _ => {}
                },
            }
        }
        let Some(end) = end else {
            return tokens;
        };
        let inner = rest[1..end].trim();
        rest = &rest[end + 1..];
        if inner.is_empty() {
            continue;
        }
        if let Some(name) = inner.strip_prefix('/') {
            tokens.push(Token::Close(name.trim().to_ascii_lowercase()));
            continue;
        }
        let self_closing = inner.ends_with('/');
        let inner = inner.trim_end_matches('/').trim_end();
        let (name, attrs) = match inner.find(char::is_whitespace) {
            Some(split) => (
                inner[..split].to_ascii_lowercase(),
                inner[split + 1..].to_string(),
            ),
            None => (inner.to_ascii_lowercase(), String::new()),
        };
        tokens.push(Token::Open {
            name,
            attrs,
            self_closing,
        });
    }
}

#[derive(Default)]
struct ParaState {
    inlines: Vec<Inline>,
    alignment: ParagraphAlignment,
    spacing: ParagraphSpacing,
    indent: crate::document::model::Indent,
    heading: Option<u8>,
    pending_break: bool,
}

struct ListState {
    list_type: ListType,
    start_number: u32,
    items: Vec<ListItem>,
    current: Option<Vec<Inline>>,
    depth: usize,
}

struct TableState {
    rows: Vec<TableRow>,
    current_row: Option<Vec<TableCell>>,
    column_widths: Vec<f32>,
    outer_border: Option<BorderStyle>,
    inner_border: Option<BorderStyle>,
    cell_padding: f32,
    pending_cell: Option<PendingCell>,
    sink_depth: usize,
}

struct PendingCell {
    rowspan: u16,
    colspan: u16,
    background: Option<Color>,
}

#[derive(Default)]
struct BlockSink {
    blocks: Vec<Block>,
    para: Option<ParaState>,
    list: Option<ListState>,
}

struct ChipCapture {
    chip: Chip,
    span_depth: usize,
}

struct HtmlParser {
    sinks: Vec<BlockSink>,
    tables: Vec<TableState>,
    style_stack: Vec<RunStyle>,
    skip_stack: Vec<String>,
    chip: Option<ChipCapture>,
    next_id: u64,
}

impl HtmlParser {
    fn new() -> Self {
        Self {
            sinks: vec![BlockSink::default()],
            tables: Vec::new(),
            style_stack: vec![RunStyle::default()],
            skip_stack: Vec::new(),
            chip: None,
            next_id: 1,
        }
    }

    fn finish(mut self) -> Vec<Block> {
        self.close_list(true);
        self.flush_para();
        while self.tables.last().is_some() {
            self.close_table();
        }
        self.sinks.truncate(1);
        self.sinks.pop().map(|s| s.blocks).unwrap_or_default()
    }

    fn alloc_id(&mut self) -> BlockId {
        let id = BlockId(self.next_id);
        self.next_id += 1;
        id
    }

    fn current_style(&self) -> RunStyle {
        self.style_stack.last().cloned().unwrap_or_default()
    }

    fn push_modified_style<F: FnOnce(&mut RunStyle)>(&mut self, mutate: F) {
        let mut style = self.current_style();
        mutate(&mut style);
        self.style_stack.push(style);
    }

    fn pop_style(&mut self) {
        if self.style_stack.len() > 1 {
            self.style_stack.pop();
        }
    }

    // Text between an opened table and its first cell belongs to nobody.
    fn in_table_gap(&self) -> bool {
        self.tables
            .last()
            .is_some_and(|t| self.sinks.len() == t.sink_depth)
    }

    fn handle_text(&mut self, raw: &str) {
        if !self.skip_stack.is_empty() || self.chip.is_some() || self.in_table_gap() {
            return;
        }
        let decoded = decode_entities(raw);
        let normalized = normalize_whitespace(&decoded);
        if normalized.is_empty() {
            return;
        }
        if normalized.trim().is_empty() {
            // Bare whitespace only matters as a word separator inside flow.
            let has_flow = self.sinks.last().is_some_and(|s| {
                s.para.as_ref().is_some_and(|p| !p.inlines.is_empty())
                    || s.list
                        .as_ref()
                        .is_some_and(|l| l.current.as_ref().is_some_and(|c| !c.is_empty()))
            });
            if !has_flow {
                return;
            }
        }
        let style = self.current_style();
        self.push_inline(Inline::Run(Run {
            text: normalized,
            style,
        }));
    }

    fn push_inline(&mut self, inline: Inline) {
        {
            let sink = self.sinks.last_mut().expect("root sink");
            if let Some(list) = sink.list.as_mut() {
                if let Some(item) = list.current.as_mut() {
                    item.push(inline);
                    return;
                }
            }
        }
        let pending_break = self.sinks.last_mut().is_some_and(|sink| {
            sink.para
                .get_or_insert_with(ParaState::default)
                .pending_break
        });
        if pending_break {
            // A line break splits the paragraph at the model level.
            self.split_paragraph_at_break();
        }
        if let Some(para) = self.sinks.last_mut().and_then(|s| s.para.as_mut()) {
            para.inlines.push(inline);
        }
    }

    fn split_paragraph_at_break(&mut self) {
        let Some(sink) = self.sinks.last_mut() else {
            return;
        };
        let Some(mut para) = sink.para.take() else {
            return;
        };
        para.pending_break = false;
        let continuation = ParaState {
            alignment: para.alignment,
            spacing: para.spacing.clone(),
            indent: para.indent.clone(),
            heading: para.heading,
            ..Default::default()
        };
        sink.para = Some(para);
        self.flush_para();
        if let Some(sink) = self.sinks.last_mut() {
            sink.para = Some(continuation);
        }
    }

    fn flush_para(&mut self) {
        let Some(para) = self.sinks.last_mut().and_then(|s| s.para.take()) else {
            return;
        };
        let id = self.alloc_id();
        let mut inlines = para.inlines;
        crate::editor::commands::merge_adjacent_runs(&mut inlines);
        let block = match para.heading {
            Some(level) => Block::Heading(crate::document::model::Heading {
                id,
                level,
                inlines,
                alignment: para.alignment,
            }),
            None => Block::Paragraph(Paragraph {
                id,
                inlines,
                alignment: para.alignment,
                spacing: para.spacing,
                indent: para.indent,
            }),
        };
        if let Some(sink) = self.sinks.last_mut() {
            sink.blocks.push(block);
        }
    }

    fn push_block(&mut self, block: Block) {
        self.flush_para();
        if let Some(sink) = self.sinks.last_mut() {
            sink.blocks.push(block);
        }
    }

    fn open_para(&mut self, attrs: &str, heading: Option<u8>) {
        // Inside an open list item the content flows into the item instead.
        if self
            .sinks
            .last()
            .and_then(|s| s.list.as_ref())
            .is_some_and(|l| l.current.is_some())
        {
            return;
        }
        self.flush_para();
        let mut para = ParaState {
            heading,
            ..Default::default()
        };
        if let Some(style) = extract_attr_value(attrs, "style") {
            apply_paragraph_css(&mut para, &style);
        }
        if let Some(align) = extract_attr_value(attrs, "align") {
            if let Some(alignment) = parse_alignment(&align) {
                para.alignment = alignment;
            }
        }
        if let Some(sink) = self.sinks.last_mut() {
            sink.para = Some(para);
        }
    }

    fn handle_open_tag(&mut self, name: &str, attrs: &str, self_closing: bool) {
        if !self.skip_stack.is_empty() {
            if !self_closing && Some(name) == self.skip_stack.last().map(String::as_str) {
                self.skip_stack.push(name.to_string());
            }
            return;
        }
        if let Some(capture) = self.chip.as_mut() {
            if name == "span" {
                capture.span_depth += 1;
            }
            return;
        }
        match name {
            "script" | "style" | "head" | "title" | "caption" => {
                self.skip_stack.push(name.to_string());
            }
            "meta" | "link" | "html" | "body" | "tbody" | "thead" | "tfoot" | "colgroup"
            | "figure" | "figcaption" | "section" | "article" | "main" | "o:p" => {}
            "p" => self.open_para(attrs, None),
            "div" => {
                if has_class(attrs, "page-spacer") || extract_attr_value(attrs, "data-page-spacer").is_some() {
                    self.flush_para();
                    self.skip_stack.push(name.to_string());
                } else if has_class(attrs, "page-break")
                    || style_contains(attrs, "page-break-after")
                {
                    self.push_block(Block::PageBreak);
                } else {
                    self.open_para(attrs, None);
                }
            }
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = name.as_bytes()[1] - b'0';
                self.open_para(attrs, Some(level));
            }
            "blockquote" => {
                self.open_para(attrs, None);
                if let Some(para) = self.sinks.last_mut().and_then(|s| s.para.as_mut()) {
                    para.indent.left += 24.0;
                }
            }
            "pre" => {
                self.open_para(attrs, None);
                self.push_modified_style(|s| s.font_family = Some("monospace".to_string()));
            }
            "ul" | "ol" => self.open_list(name == "ol", attrs),
            "li" => self.open_list_item(),
            "table" => self.open_table(attrs),
            "col" => {
                if let Some(table) = self.tables.last_mut() {
                    if let Some(style) = extract_attr_value(attrs, "style") {
                        if let Some(width) = css_value(&style, "width")
                            .and_then(|v| v.trim_end_matches('%').trim().parse::<f32>().ok())
                        {
                            table.column_widths.push(width / 100.0);
                        }
                    }
                }
            }
            "tr" => self.open_row(),
            "td" | "th" => self.open_cell(attrs, name == "th"),
            "img" => self.handle_img(attrs),
            "hr" => self.push_block(Block::HorizontalRule),
            "br" => {
                if let Some(para) = self.sinks.last_mut().and_then(|s| s.para.as_mut()) {
                    para.pending_break = true;
                }
            }
            "span" => {
                if let Some(kind) = chip_kind(attrs) {
                    let mut style = self.current_style();
                    if let Some(css) = extract_attr_value(attrs, "style") {
                        apply_inline_css(&mut style, &css);
                    }
                    self.chip = Some(ChipCapture {
                        chip: Chip { kind, style },
                        span_depth: 1,
                    });
                } else {
                    let css = extract_attr_value(attrs, "style");
                    self.push_modified_style(|style| {
                        if let Some(css) = css {
                            apply_inline_css(style, &css);
                        }
                    });
                }
            }
            "b" | "strong" => self.push_modified_style(|s| s.bold = true),
            "i" | "em" => self.push_modified_style(|s| s.italic = true),
            "u" | "ins" => self.push_modified_style(|s| s.underline = true),
            "s" | "strike" | "del" => self.push_modified_style(|s| s.strikethrough = true),
            "sup" => self.push_modified_style(|s| {
                s.superscript = true;
                s.subscript = false;
            }),
            "sub" => self.push_modified_style(|s| {
                s.subscript = true;
                s.superscript = false;
            }),
            "code" => self.push_modified_style(|s| s.font_family = Some("monospace".to_string())),
            "a" => {
                let css = extract_attr_value(attrs, "style");
                self.push_modified_style(|style| {
                    if let Some(css) = css {
                        apply_inline_css(style, &css);
                    }
                });
            }
            "font" => {
                let color = extract_attr_value(attrs, "color").and_then(|c| Color::parse_css(&c));
                let face = extract_attr_value(attrs, "face");
                self.push_modified_style(|style| {
                    if let Some(color) = color {
                        style.color = Some(color);
                    }
                    if let Some(face) = face {
                        style.font_family = Some(face);
                    }
                });
            }
            _ => {}
        }
    }

    fn handle_close_tag(&mut self, name: &str) {
        if let Some(top) = self.skip_stack.last() {
            if top == name {
                self.skip_stack.pop();
            }
            return;
        }
        if let Some(capture) = self.chip.as_mut() {
            if name == "span" {
                capture.span_depth -= 1;
                if capture.span_depth == 0 {
                    let chip = self.chip.take().map(|c| c.chip);
                    if let Some(chip) = chip {
                        self.push_inline(Inline::Chip(chip));
                    }
                }
            }
            return;
        }
        match name {
            "p" | "div" | "blockquote" => self.flush_para(),
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => self.flush_para(),
            "pre" => {
                self.flush_para();
                self.pop_style();
            }
            "li" => self.close_list_item(),
            "ul" | "ol" => self.close_list(false),
            "td" | "th" => self.close_cell(),
            "tr" => self.close_row(),
            "table" => self.close_table(),
            "span" | "b" | "strong" | "i" | "em" | "u" | "ins" | "s" | "strike" | "del"
            | "sup" | "sub" | "code" | "a" | "font" => self.pop_style(),
            _ => {}
        }
    }

    fn open_list(&mut self, numbered: bool, attrs: &str) {
        self.flush_para();
        let sink = self.sinks.last_mut().expect("root sink");
        match sink.list.as_mut() {
            Some(list) => list.depth += 1,
            None => {
                let start_number = extract_attr_value(attrs, "start")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1);
                sink.list = Some(ListState {
                    list_type: if numbered {
                        ListType::Numbered
                    } else {
                        ListType::Bullet
                    },
                    start_number,
                    items: Vec::new(),
                    current: None,
                    depth: 1,
                });
            }
        }
    }

    fn open_list_item(&mut self) {
        let Some(list) = self.sinks.last_mut().and_then(|s| s.list.as_mut()) else {
            // A stray item outside any list reads as a paragraph.
            self.open_para("", None);
            return;
        };
        if let Some(done) = list.current.take() {
            list.items.push(ListItem { inlines: done });
        }
        list.current = Some(Vec::new());
    }

    fn close_list_item(&mut self) {
        if let Some(list) = self.sinks.last_mut().and_then(|s| s.list.as_mut()) {
            if let Some(mut done) = list.current.take() {
                crate::editor::commands::merge_adjacent_runs(&mut done);
                list.items.push(ListItem { inlines: done });
            }
        }
    }

    fn close_list(&mut self, force: bool) {
        let Some(list) = self.sinks.last_mut().and_then(|s| s.list.as_mut()) else {
            return;
        };
        if !force && list.depth > 1 {
            list.depth -= 1;
            return;
        }
        self.close_list_item();
        let Some(list) = self.sinks.last_mut().and_then(|s| s.list.take()) else {
            return;
        };
        if list.items.is_empty() {
            return;
        }
        let id = self.alloc_id();
        let block = Block::List(List {
            id,
            items: list.items,
            list_type: list.list_type,
            start_number: list.start_number,
        });
        if let Some(sink) = self.sinks.last_mut() {
            sink.blocks.push(block);
        }
    }

    fn open_table(&mut self, attrs: &str) {
        self.flush_para();
        let style = extract_attr_value(attrs, "style").unwrap_or_default();
        let outer_border = css_value(&style, "border").and_then(|v| parse_border(&v));
        let cell_padding = extract_attr_value(attrs, "data-cell-padding")
            .and_then(|v| v.parse().ok())
            .unwrap_or(6.0);
        self.tables.push(TableState {
            rows: Vec::new(),
            current_row: None,
            column_widths: Vec::new(),
            outer_border,
            inner_border: None,
            cell_padding,
            pending_cell: None,
            sink_depth: self.sinks.len(),
        });
    }

    fn open_row(&mut self) {
        self.close_row();
        if let Some(table) = self.tables.last_mut() {
            table.current_row = Some(Vec::new());
        }
    }

    fn open_cell(&mut self, attrs: &str, header: bool) {
        self.close_cell();
        let Some(table) = self.tables.last_mut() else {
            return;
        };
        if table.current_row.is_none() {
            table.current_row = Some(Vec::new());
        }
        let style = extract_attr_value(attrs, "style").unwrap_or_default();
        if table.inner_border.is_none() {
            table.inner_border = css_value(&style, "border").and_then(|v| parse_border(&v));
        }
        table.pending_cell = Some(PendingCell {
            rowspan: extract_attr_value(attrs, "rowspan")
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
            colspan: extract_attr_value(attrs, "colspan")
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
            background: css_value(&style, "background-color").and_then(|v| Color::parse_css(&v)),
        });
        self.sinks.push(BlockSink::default());
        if header {
            self.push_modified_style(|s| s.bold = true);
        } else {
            let current = self.current_style();
            self.style_stack.push(current);
        }
    }

    fn close_cell(&mut self) {
        let Some(table_has_pending) = self.tables.last().map(|t| t.pending_cell.is_some()) else {
            return;
        };
        if !table_has_pending {
            return;
        }
        self.close_list(true);
        self.flush_para();
        self.pop_style();
        let Some(sink) = self.sinks.pop() else {
            return;
        };
        let mut blocks = sink.blocks;
        if blocks.is_empty() {
            blocks.push(Block::Paragraph(Paragraph {
                id: self.alloc_id(),
                ..Default::default()
            }));
        }
        let Some(table) = self.tables.last_mut() else {
            return;
        };
        let Some(pending) = table.pending_cell.take() else {
            return;
        };
        if let Some(row) = table.current_row.as_mut() {
            row.push(TableCell {
                blocks,
                rowspan: pending.rowspan,
                colspan: pending.colspan,
                background: pending.background,
            });
        }
    }

    fn close_row(&mut self) {
        self.close_cell();
        if let Some(table) = self.tables.last_mut() {
            if let Some(cells) = table.current_row.take() {
                if !cells.is_empty() {
                    table.rows.push(TableRow { cells });
                }
            }
        }
    }

    fn close_table(&mut self) {
        self.close_row();
        let Some(state) = self.tables.pop() else {
            return;
        };
        if state.rows.is_empty() {
            return;
        }
        let cols = state
            .rows
            .iter()
            .map(|r| r.cells.len())
            .max()
            .unwrap_or(1)
            .max(1);
        let column_widths = if state.column_widths.len() == cols {
            state.column_widths
        } else {
            vec![1.0 / cols as f32; cols]
        };
        let mut borders = crate::document::model::TableBorders::default();
        if let Some(outer) = state.outer_border {
            borders.outer = outer;
        }
        if let Some(inner) = state.inner_border {
            borders.inner_horizontal = inner.clone();
            borders.inner_vertical = inner;
        }
        let id = self.alloc_id();
        self.push_block(Block::Table(Table {
            id,
            rows: state.rows,
            column_widths,
            borders,
            cell_padding: state.cell_padding,
        }));
    }

    fn handle_img(&mut self, attrs: &str) {
        let src = extract_attr_value(attrs, "src");
        let alt = extract_attr_value(attrs, "alt").unwrap_or_default();
        let attr_f32 = |name: &str| {
            extract_attr_value(attrs, name)
                .and_then(|v| v.trim_end_matches("px").trim().parse::<f32>().ok())
        };
        let mut width = attr_f32("width").unwrap_or(0.0);
        let mut height = attr_f32("height").unwrap_or(0.0);

        let mut data = None;
        let mut original = (0u32, 0u32);
        let mut keep_src = None;
        if let Some(src) = src {
            if let Some(decoded) = decode_data_uri(&src) {
                original = probe_dimensions(&decoded.bytes).unwrap_or((0, 0));
                data = Some(ImageData {
                    width: original.0,
                    height: original.1,
                    ..decoded
                });
            } else {
                keep_src = Some(src);
            }
        }
        if width <= 0.0 {
            width = original.0 as f32;
        }
        if height <= 0.0 {
            height = original.1 as f32;
        }

        let style = extract_attr_value(attrs, "style").unwrap_or_default();
        let wrap = extract_attr_value(attrs, "data-wrap")
            .and_then(|v| parse_wrap_name(&v))
            .unwrap_or_else(|| sniff_wrap_from_css(&style));

        let qr = extract_attr_value(attrs, "data-qr").map(|data| QrPayload {
            data,
            module_size: extract_attr_value(attrs, "data-qr-size")
                .and_then(|v| v.parse().ok())
                .unwrap_or(4.0),
        });

        let id = self.alloc_id();
        self.push_block(Block::Image(ImageBlock {
            id,
            data,
            src: keep_src,
            alt_text: alt,
            width,
            height,
            original_width: original.0,
            original_height: original.1,
            wrap,
            qr,
        }));
    }
}

fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_space = false;
    for c in text.chars() {
        if c == '\n' || c == '\r' || c == '\t' || c == ' ' {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.push(c);
            last_space = false;
        }
    }
    out
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        // Entity names are short; anything without a nearby semicolon is a
        // bare ampersand.
        let Some(semi) = rest.find(';').filter(|&at| at <= 12) else {
            out.push('&');
            rest = &rest[1..];
            continue;
        };
        let entity = &rest[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some('\u{a0}'),
            _ if entity.starts_with("#x") || entity.starts_with("#X") => {
                u32::from_str_radix(&entity[2..], 16)
                    .ok()
                    .and_then(char::from_u32)
            }
            _ if entity.starts_with('#') => entity[1..].parse::<u32>().ok().and_then(char::from_u32),
            _ => None,
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Pulls one attribute value out of a raw attribute string, handling double,
/// single, and missing quotes.
fn extract_attr_value(attrs: &str, name: &str) -> Option<String> {
    let lower = attrs.to_ascii_lowercase();
    let needle = format!("{name}=");
    let mut search = 0;
    while let Some(found) = lower[search..].find(&needle) {
        let at = search + found;
        let boundary = at == 0
            || lower.as_bytes()[at - 1].is_ascii_whitespace()
            || lower.as_bytes()[at - 1] == b'"'
            || lower.as_bytes()[at - 1] == b'\'';
        if !boundary {
            search = at + needle.len();
            continue;
        }
        let value_start = at + needle.len();
        let rest = &attrs[value_start..];
        let value = if let Some(stripped) = rest.strip_prefix('"') {
            stripped.split('"').next().unwrap_or("")
        } else if let Some(stripped) = rest.strip_prefix('\'') {
            stripped.split('\'').next().unwrap_or("")
        } else {
            rest.split(char::is_whitespace).next().unwrap_or("")
        };
        return Some(decode_entities(value));
    }
    None
}

fn has_class(attrs: &str, class: &str) -> bool {
    extract_attr_value(attrs, "class")
        .is_some_and(|v| v.split_whitespace().any(|c| c.eq_ignore_ascii_case(class)))
}

fn style_contains(attrs: &str, needle: &str) -> bool {
    extract_attr_value(attrs, "style").is_some_and(|v| v.to_ascii_lowercase().contains(needle))
}

fn chip_kind(attrs: &str) -> Option<ChipKind> {
    let kind = extract_attr_value(attrs, "data-chip")?;
    match kind.as_str() {
        "variable" => Some(ChipKind::Variable {
            table: extract_attr_value(attrs, "data-table")?,
            field: extract_attr_value(attrs, "data-field")?,
        }),
        "page" => Some(ChipKind::PageNumber),
        "total" => Some(ChipKind::PageTotal),
        _ => None,
    }
}

fn css_declarations(style: &str) -> impl Iterator<Item = (String, String)> + '_ {
    style.split(';').filter_map(|decl| {
        let (name, value) = decl.split_once(':')?;
        Some((
            name.trim().to_ascii_lowercase(),
            value.trim().to_string(),
        ))
    })
}

fn css_value(style: &str, name: &str) -> Option<String> {
    css_declarations(style).find(|(n, _)| n == name).map(|(_, v)| v)
}

fn parse_px(value: &str) -> Option<f32> {
    let value = value.trim();
    if let Some(px) = value.strip_suffix("px") {
        return px.trim().parse().ok();
    }
    if let Some(pt) = value.strip_suffix("pt") {
        return pt.trim().parse::<f32>().ok().map(|v| v * 96.0 / 72.0);
    }
    value.parse().ok()
}

fn parse_alignment(value: &str) -> Option<ParagraphAlignment> {
    match value.trim().to_ascii_lowercase().as_str() {
        "left" | "start" => Some(ParagraphAlignment::Left),
        "center" => Some(ParagraphAlignment::Center),
        "right" | "end" => Some(ParagraphAlignment::Right),
        "justify" => Some(ParagraphAlignment::Justify),
        _ => None,
    }
}

fn apply_paragraph_css(para: &mut ParaState, style: &str) {
    for (name, value) in css_declarations(style) {
        match name.as_str() {
            "text-align" => {
                if let Some(alignment) = parse_alignment(&value) {
                    para.alignment = alignment;
                }
            }
            "line-height" => {
                let v = value.trim();
                if v.eq_ignore_ascii_case("normal") {
                    para.spacing.line = 0.0;
                } else if let Ok(mult) = v.parse::<f32>() {
                    para.spacing.line = mult;
                } else if let Some(px) = parse_px(v) {
                    para.spacing.line = px / 16.0;
                }
            }
            "margin-top" => para.spacing.before = parse_px(&value).unwrap_or(0.0),
            "margin-bottom" => para.spacing.after = parse_px(&value).unwrap_or(0.0),
            "margin-left" => para.indent.left = parse_px(&value).unwrap_or(0.0),
            "margin-right" => para.indent.right = parse_px(&value).unwrap_or(0.0),
            "text-indent" => para.indent.first_line = parse_px(&value).unwrap_or(0.0),
            _ => {}
        }
    }
}

/// Folds inline CSS declarations into a run style. Mirrors what the canonical
/// writer emits plus the declarations word processors put on pasted spans.
fn apply_inline_css(style: &mut RunStyle, css: &str) {
    for (name, value) in css_declarations(css) {
        let lower = value.to_ascii_lowercase();
        match name.as_str() {
            "font-weight" => {
                style.bold = lower == "bold"
                    || lower == "bolder"
                    || lower.parse::<u32>().map(|w| w >= 600).unwrap_or(false);
            }
            "font-style" => style.italic = lower.contains("italic") || lower.contains("oblique"),
            "text-decoration" | "text-decoration-line" => {
                if lower.contains("underline") {
                    style.underline = true;
                }
                if lower.contains("line-through") {
                    style.strikethrough = true;
                }
                if lower.contains("none") {
                    style.underline = false;
                    style.strikethrough = false;
                }
            }
            "vertical-align" => {
                if lower == "super" {
                    style.superscript = true;
                    style.subscript = false;
                } else if lower == "sub" {
                    style.subscript = true;
                    style.superscript = false;
                }
            }
            "color" => {
                if let Some(color) = Color::parse_css(&value) {
                    style.color = Some(color);
                }
            }
            "background-color" | "background" => {
                if lower != "transparent" && lower != "none" {
                    if let Some(color) = Color::parse_css(&value) {
                        style.background = Some(color);
                    }
                }
            }
            "font-size" => {
                if let Some(px) = parse_px(&value) {
                    style.font_size = Some(px);
                }
            }
            "font-family" => {
                let family = value.trim().trim_matches(|c| c == '"' || c == '\'');
                if !family.is_empty() {
                    style.font_family = Some(family.to_string());
                }
            }
            _ => {}
        }
    }
}

fn parse_border(value: &str) -> Option<BorderStyle> {
    let mut width = None;
    let mut color = None;
    for token in value.split_whitespace() {
        if width.is_none() {
            if let Some(px) = token.strip_suffix("px").and_then(|v| v.parse::<f32>().ok()) {
                width = Some(px);
                continue;
            }
        }
        if let Some(parsed) = Color::parse_css(token) {
            color = Some(parsed);
        }
    }
    // "rgb(1, 2, 3)" splits on whitespace; retry on the tail of the value.
    if color.is_none() {
        if let Some(at) = value.find("rgb") {
            color = Color::parse_css(value[at..].trim());
        }
    }
    let width = width?;
    if width <= 0.0 {
        return None;
    }
    Some(BorderStyle {
        width,
        color: color.unwrap_or(Color::rgb(0.7, 0.7, 0.7)),
    })
}

fn parse_wrap_name(value: &str) -> Option<TextWrap> {
    match value.trim() {
        "inline" => Some(TextWrap::Inline),
        "float-left" => Some(TextWrap::FloatLeft),
        "float-right" => Some(TextWrap::FloatRight),
        "center" => Some(TextWrap::Center),
        "behind" => Some(TextWrap::Behind),
        "in-front" => Some(TextWrap::InFront),
        _ => None,
    }
}

fn sniff_wrap_from_css(style: &str) -> TextWrap {
    match css_value(style, "float").as_deref() {
        Some("left") => return TextWrap::FloatLeft,
        Some("right") => return TextWrap::FloatRight,
        _ => {}
    }
    if css_value(style, "position").as_deref() == Some("absolute") {
        let behind = css_value(style, "z-index")
            .and_then(|v| v.parse::<i32>().ok())
            .map(|z| z < 0)
            .unwrap_or(false);
        return if behind {
            TextWrap::Behind
        } else {
            TextWrap::InFront
        };
    }
    if css_value(style, "display").as_deref() == Some("block") {
        return TextWrap::Center;
    }
    TextWrap::Inline
}

fn decode_data_uri(src: &str) -> Option<ImageData> {
    let rest = src.strip_prefix("data:")?;
    let (mime, payload) = rest.split_once(";base64,")?;
    let bytes = BASE64.decode(payload.trim()).ok()?;
    Some(ImageData {
        bytes,
        mime: mime.to_string(),
        width: 0,
        height: 0,
    })
}

fn probe_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    use image::GenericImageView;
    let decoded = image::load_from_memory(bytes).ok()?;
    Some(decoded.dimensions())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::html::writer::blocks_to_html;
    use crate::document::model::Heading;

    fn first_paragraph(blocks: &[Block]) -> &Paragraph {
        match &blocks[0] {
            Block::Paragraph(p) => p,
            other => panic!("expected paragraph, got {other:?}"),
        }
    }

    #[test]
    fn parses_paragraphs_and_inline_styles() {
        let blocks = parse_html("<p>plain <b>bold</b> <i>italic</i></p>");
        let p = first_paragraph(&blocks);
        assert_eq!(p.text(), "plain bold italic");
        let bold_run = p
            .inlines
            .iter()
            .find_map(|i| match i {
                Inline::Run(r) if r.text == "bold" => Some(r),
                _ => None,
            })
            .unwrap();
        assert!(bold_run.style.bold);
    }

    #[test]
    fn divs_and_word_spans_read_like_paragraphs() {
        let blocks = parse_html(
            "<div>start <span style=\"font-weight:700\">heavy</span></div><div>next</div>",
        );
        assert_eq!(blocks.len(), 2);
        let p = first_paragraph(&blocks);
        assert_eq!(p.text(), "start heavy");
        match &p.inlines[1] {
            Inline::Run(r) => assert!(r.style.bold),
            _ => panic!(),
        }
    }

    #[test]
    fn page_spacer_elements_are_stripped() {
        let blocks = parse_html(
            "<p>a</p><div class=\"page-spacer\" style=\"height: 240px\"></div><p>b</p>",
        );
        assert_eq!(blocks.len(), 2);
        assert_eq!(first_paragraph(&blocks).text(), "a");
    }

    #[test]
    fn chip_span_round_trips() {
        let mut p = Paragraph::with_text(BlockId(1), "Dear ");
        p.inlines.push(Inline::Chip(Chip::variable("customers", "name")));
        let html = blocks_to_html(&[Block::Paragraph(p)]);
        let blocks = parse_html(&html);
        let parsed = first_paragraph(&blocks);
        match &parsed.inlines[1] {
            Inline::Chip(chip) => match &chip.kind {
                ChipKind::Variable { table, field } => {
                    assert_eq!(table, "customers");
                    assert_eq!(field, "name");
                }
                other => panic!("wrong chip kind {other:?}"),
            },
            other => panic!("expected chip, got {other:?}"),
        }
    }

    #[test]
    fn chip_label_text_is_not_duplicated_as_a_run() {
        let blocks = parse_html(
            "<p><span class=\"placeholder-chip\" data-chip=\"page\">page</span></p>",
        );
        let p = first_paragraph(&blocks);
        assert_eq!(p.inlines.len(), 1);
        assert!(matches!(
            &p.inlines[0],
            Inline::Chip(Chip {
                kind: ChipKind::PageNumber,
                ..
            })
        ));
    }

    #[test]
    fn entities_decode_in_text_and_attributes() {
        let blocks = parse_html("<p>a &amp; b &#65;&#x42;</p>");
        assert_eq!(first_paragraph(&blocks).text(), "a & b AB");
    }

    #[test]
    fn empty_paragraph_with_lone_break() {
        let blocks = parse_html("<p><br></p>");
        assert_eq!(blocks.len(), 1);
        assert!(first_paragraph(&blocks).inlines.is_empty());
    }

    #[test]
    fn break_splits_a_paragraph_in_two() {
        let blocks = parse_html("<p>first<br>second</p>");
        assert_eq!(blocks.len(), 2);
        assert_eq!(first_paragraph(&blocks).text(), "first");
        match &blocks[1] {
            Block::Paragraph(p) => assert_eq!(p.text(), "second"),
            _ => panic!(),
        }
    }

    #[test]
    fn headings_keep_level_and_alignment() {
        let blocks = parse_html("<h2 style=\"text-align: center\">Title</h2>");
        match &blocks[0] {
            Block::Heading(Heading {
                level, alignment, ..
            }) => {
                assert_eq!(*level, 2);
                assert_eq!(*alignment, ParagraphAlignment::Center);
            }
            _ => panic!("expected heading"),
        }
    }

    #[test]
    fn tables_parse_rows_cells_and_spans() {
        let blocks = parse_html(
            "<table><tr><td>a</td><td colspan=\"2\" style=\"background-color: #ff0000\">b</td></tr><tr><td>c</td><td>d</td><td>e</td></tr></table>",
        );
        match &blocks[0] {
            Block::Table(table) => {
                assert_eq!(table.rows.len(), 2);
                assert_eq!(table.rows[0].cells.len(), 2);
                assert_eq!(table.rows[0].cells[1].colspan, 2);
                assert!(table.rows[0].cells[1].background.is_some());
                assert_eq!(table.rows[1].cells.len(), 3);
            }
            _ => panic!("expected table"),
        }
    }

    #[test]
    fn lists_parse_items_and_numbering() {
        let blocks = parse_html("<ol start=\"3\"><li>x</li><li>y</li></ol>");
        match &blocks[0] {
            Block::List(list) => {
                assert_eq!(list.list_type, ListType::Numbered);
                assert_eq!(list.start_number, 3);
                assert_eq!(list.items.len(), 2);
            }
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn image_attributes_round_trip() {
        let img = ImageBlock {
            id: BlockId(1),
            src: Some("https://example.com/pic.png".into()),
            alt_text: "logo".into(),
            width: 200.0,
            height: 100.0,
            wrap: TextWrap::FloatRight,
            ..Default::default()
        };
        let html = blocks_to_html(&[Block::Image(img)]);
        let blocks = parse_html(&html);
        match &blocks[0] {
            Block::Image(parsed) => {
                assert_eq!(parsed.src.as_deref(), Some("https://example.com/pic.png"));
                assert_eq!(parsed.alt_text, "logo");
                assert_eq!(parsed.width, 200.0);
                assert_eq!(parsed.wrap, TextWrap::FloatRight);
            }
            _ => panic!("expected image"),
        }
    }

    #[test]
    fn qr_payload_survives_round_trip() {
        let img = ImageBlock {
            id: BlockId(1),
            width: 120.0,
            height: 120.0,
            qr: Some(QrPayload {
                data: "https://example.com/order/17".into(),
                module_size: 4.0,
            }),
            ..Default::default()
        };
        let html = blocks_to_html(&[Block::Image(img)]);
        let blocks = parse_html(&html);
        match &blocks[0] {
            Block::Image(parsed) => {
                let qr = parsed.qr.as_ref().unwrap();
                assert_eq!(qr.data, "https://example.com/order/17");
            }
            _ => panic!("expected image"),
        }
    }

    #[test]
    fn comments_doctype_and_head_content_are_ignored() {
        let blocks = parse_html(
            "<!DOCTYPE html><!-- note --><html><head><title>x</title><style>p { color: red }</style></head><body><p>body text</p></body></html>",
        );
        assert_eq!(blocks.len(), 1);
        assert_eq!(first_paragraph(&blocks).text(), "body text");
    }

    #[test]
    fn styled_round_trip_preserves_color_and_size() {
        let p = Paragraph {
            id: BlockId(1),
            inlines: vec![Inline::Run(Run {
                text: "styled".into(),
                style: RunStyle {
                    color: Some(Color::rgb(1.0, 0.0, 0.0)),
                    font_size: Some(20.0),
                    bold: true,
                    ..Default::default()
                },
            })],
            ..Default::default()
        };
        let html = blocks_to_html(&[Block::Paragraph(p)]);
        let blocks = parse_html(&html);
        let parsed = first_paragraph(&blocks);
        match &parsed.inlines[0] {
            Inline::Run(run) => {
                assert!(run.style.bold);
                assert_eq!(run.style.font_size, Some(20.0));
                assert_eq!(run.style.color.unwrap().to_rgb8(), (255, 0, 0));
            }
            _ => panic!(),
        }
    }

    #[test]
    fn page_break_div_round_trips() {
        let html = blocks_to_html(&[Block::PageBreak]);
        let blocks = parse_html(&html);
        assert!(matches!(blocks[0], Block::PageBreak));
    }
}
