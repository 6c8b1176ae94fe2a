use crate::document::model::{
    Block, BlockId, Color, Document, Inline, List, ListItem, ListType, Paragraph,
    ParagraphAlignment, Run, RunStyle,
};
use crate::editor::cursor::SelectionRange;

/// Formatting operations as data. The editor resolves the selection and hands
/// the command to [`apply_format`]; nothing here talks to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum FormatCommand {
    Bold,
    Italic,
    Underline,
    Strikethrough,
    Superscript,
    Subscript,
    Align(ParagraphAlignment),
    List(Option<ListType>),
    LineHeight(f32),
    FontFamily(String),
    FontSize(f32),
    TextColor(Color),
    HighlightColor(Color),
    CaseTransform(CaseMode),
    RemoveFormatting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseMode {
    Upper,
    Lower,
    Title,
}

/// Partial style override. `None` fields leave the run untouched.
#[derive(Debug, Clone, Default)]
pub struct RunStylePatch {
    pub bold: Option<bool>,
    pub italic: Option<bool>,
    pub underline: Option<bool>,
    pub strikethrough: Option<bool>,
    pub superscript: Option<bool>,
    pub subscript: Option<bool>,
    pub font_family: Option<String>,
    pub font_size: Option<f32>,
    pub color: Option<Color>,
    pub background: Option<Color>,
}

impl RunStylePatch {
    pub fn apply_to(&self, style: &mut RunStyle) {
        if let Some(v) = self.bold {
            style.bold = v;
        }
        if let Some(v) = self.italic {
            style.italic = v;
        }
        if let Some(v) = self.underline {
            style.underline = v;
        }
        if let Some(v) = self.strikethrough {
            style.strikethrough = v;
        }
        if let Some(v) = self.superscript {
            style.superscript = v;
            if v {
                style.subscript = false;
            }
        }
        if let Some(v) = self.subscript {
            style.subscript = v;
            if v {
                style.superscript = false;
            }
        }
        if let Some(v) = &self.font_family {
            style.font_family = Some(v.clone());
        }
        if let Some(v) = self.font_size {
            style.font_size = Some(v.max(1.0));
        }
        if let Some(v) = self.color {
            style.color = Some(v);
        }
        if let Some(v) = self.background {
            style.background = Some(v);
        }
    }

    /// Chips only mirror the four plain text decorations; fonts and colors
    /// stay with the chip's own styling.
    pub fn apply_to_chip(&self, style: &mut RunStyle) {
        if let Some(v) = self.bold {
            style.bold = v;
        }
        if let Some(v) = self.italic {
            style.italic = v;
        }
        if let Some(v) = self.underline {
            style.underline = v;
        }
        if let Some(v) = self.strikethrough {
            style.strikethrough = v;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionToggleState {
    Off,
    On,
    Mixed,
}

impl SelectionToggleState {
    pub fn toggled_target(self) -> bool {
        !matches!(self, Self::On)
    }
}

/// Orders a selection against the document so `start` always precedes `end`,
/// dropping ranges whose endpoints no longer resolve to blocks.
pub fn normalize_selection(document: &Document, range: SelectionRange) -> Option<SelectionRange> {
    let start_index = document.block_index(range.start.block_id)?;
    let end_index = document.block_index(range.end.block_id)?;
    let flipped = match start_index.cmp(&end_index) {
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Equal => range.start.offset > range.end.offset,
    };
    Some(if flipped {
        SelectionRange {
            start: range.end,
            end: range.start,
        }
    } else {
        range
    })
}

/// Ids of the top-level blocks a normalized selection touches, in order.
pub fn blocks_in_range(document: &Document, range: SelectionRange) -> Vec<BlockId> {
    let Some(start) = document.block_index(range.start.block_id) else {
        return Vec::new();
    };
    let Some(end) = document.block_index(range.end.block_id) else {
        return Vec::new();
    };
    document.blocks[start..=end]
        .iter()
        .filter_map(|b| b.id())
        .collect()
}

fn inline_char_len(inlines: &[Inline]) -> usize {
    inlines.iter().map(Inline::char_len).sum()
}

fn block_char_len(block: &Block) -> usize {
    match block {
        Block::Paragraph(p) => p.char_len(),
        Block::Heading(h) => inline_char_len(&h.inlines),
        Block::List(l) => l.items.iter().map(|i| inline_char_len(&i.inlines)).sum(),
        _ => 1,
    }
}

/// The character span the selection covers inside one of its blocks.
pub fn span_in_block(
    document: &Document,
    range: SelectionRange,
    block_id: BlockId,
) -> Option<(usize, usize)> {
    let block = document.find_block(block_id)?;
    let len = block_char_len(block);
    let start = if block_id == range.start.block_id {
        range.start.offset.min(len)
    } else {
        0
    };
    let end = if block_id == range.end.block_id {
        range.end.offset.min(len)
    } else {
        len
    };
    (start <= end).then_some((start, end))
}

/// Splits whichever run straddles `offset` and returns the inline index that
/// now starts at `offset`. Chips are atomic; offsets only ever land on their
/// edges.
pub fn split_inlines_at(inlines: &mut Vec<Inline>, offset: usize) -> usize {
    let mut cursor = 0usize;
    for index in 0..inlines.len() {
        if cursor == offset {
            return index;
        }
        let len = inlines[index].char_len();
        if offset < cursor + len {
            if let Inline::Run(run) = &mut inlines[index] {
                let split_chars = offset - cursor;
                let byte = byte_offset(&run.text, split_chars);
                let tail = run.text.split_off(byte);
                let style = run.style.clone();
                inlines.insert(
                    index + 1,
                    Inline::Run(Run {
                        text: tail,
                        style,
                    }),
                );
            }
            return index + 1;
        }
        cursor += len;
    }
    inlines.len()
}

fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

/// Collapses neighbouring runs with identical styling and drops empty runs.
pub fn merge_adjacent_runs(inlines: &mut Vec<Inline>) {
    inlines.retain(|inline| match inline {
        Inline::Run(run) => !run.text.is_empty(),
        Inline::Chip(_) => true,
    });
    let mut index = 1;
    while index < inlines.len() {
        let merge = match (&inlines[index - 1], &inlines[index]) {
            (Inline::Run(a), Inline::Run(b)) => a.style == b.style,
            _ => false,
        };
        if merge {
            if let Inline::Run(b) = inlines.remove(index) {
                if let Some(Inline::Run(a)) = inlines.get_mut(index - 1) {
                    a.text.push_str(&b.text);
                }
            }
        } else {
            index += 1;
        }
    }
}

/// Runs `f` over exactly the inlines covered by `start..end`, splitting at
/// the boundaries first and re-merging afterwards. The start boundary is
/// split first; the end split only touches inlines past it, so both indices
/// stay valid.
fn for_span<F>(inlines: &mut Vec<Inline>, start: usize, end: usize, mut f: F)
where
    F: FnMut(&mut Inline),
{
    if start >= end {
        return;
    }
    let start_index = split_inlines_at(inlines, start);
    let end_index = split_inlines_at(inlines, end);
    for inline in inlines[start_index..end_index.min(inlines.len())].iter_mut() {
        f(inline);
    }
    merge_adjacent_runs(inlines);
}

pub fn apply_patch_to_span(
    inlines: &mut Vec<Inline>,
    start: usize,
    end: usize,
    patch: &RunStylePatch,
) {
    for_span(inlines, start, end, |inline| match inline {
        Inline::Run(run) => patch.apply_to(&mut run.style),
        Inline::Chip(chip) => patch.apply_to_chip(&mut chip.style),
    });
}

pub fn remove_formatting_in_span(inlines: &mut Vec<Inline>, start: usize, end: usize) {
    for_span(inlines, start, end, |inline| match inline {
        Inline::Run(run) => run.style = RunStyle::default(),
        Inline::Chip(chip) => chip.style = RunStyle::default(),
    });
}

pub fn transform_case_in_span(inlines: &mut Vec<Inline>, start: usize, end: usize, mode: CaseMode) {
    for_span(inlines, start, end, |inline| {
        if let Inline::Run(run) = inline {
            run.text = transform_case(&run.text, mode);
        }
    });
}

fn transform_case(text: &str, mode: CaseMode) -> String {
    match mode {
        CaseMode::Upper => text.to_uppercase(),
        CaseMode::Lower => text.to_lowercase(),
        CaseMode::Title => {
            let mut out = String::with_capacity(text.len());
            let mut at_word_start = true;
            for ch in text.chars() {
                if ch.is_whitespace() {
                    at_word_start = true;
                    out.push(ch);
                } else if at_word_start {
                    out.extend(ch.to_uppercase());
                    at_word_start = false;
                } else {
                    out.extend(ch.to_lowercase());
                }
            }
            out
        }
    }
}

/// Inserts text at a character offset. Without an explicit style the text
/// joins the run to its left so typing inherits the surrounding look; with
/// one (pending formatting from a collapsed-selection toggle) it becomes its
/// own run.
pub fn insert_text_at(
    inlines: &mut Vec<Inline>,
    offset: usize,
    text: &str,
    style: Option<&RunStyle>,
) {
    if text.is_empty() {
        return;
    }
    let index = split_inlines_at(inlines, offset);
    if let Some(style) = style {
        inlines.insert(
            index,
            Inline::Run(Run {
                text: text.to_string(),
                style: style.clone(),
            }),
        );
        merge_adjacent_runs(inlines);
        return;
    }
    if index > 0 {
        if let Some(Inline::Run(run)) = inlines.get_mut(index - 1) {
            run.text.push_str(text);
            return;
        }
    }
    if let Some(Inline::Run(run)) = inlines.get_mut(index) {
        run.text.insert_str(0, text);
        return;
    }
    inlines.insert(index, Inline::Run(Run::plain(text)));
}

pub fn insert_inline_at(inlines: &mut Vec<Inline>, offset: usize, inline: Inline) {
    let index = split_inlines_at(inlines, offset);
    inlines.insert(index, inline);
    merge_adjacent_runs(inlines);
}

pub fn delete_span(inlines: &mut Vec<Inline>, start: usize, end: usize) {
    if start >= end {
        return;
    }
    let start_index = split_inlines_at(inlines, start);
    let end_index = split_inlines_at(inlines, end);
    inlines.drain(start_index..end_index.min(inlines.len()));
    merge_adjacent_runs(inlines);
}

/// Aggregate on/off state of one style flag across everything selected.
pub fn detect_toggle_state<F>(
    document: &Document,
    range: SelectionRange,
    selector: F,
) -> SelectionToggleState
where
    F: Fn(&RunStyle) -> bool,
{
    let mut total = 0usize;
    let mut on = 0usize;
    for block_id in blocks_in_range(document, range) {
        let Some((start, end)) = span_in_block(document, range, block_id) else {
            continue;
        };
        let Some(block) = document.find_block(block_id) else {
            continue;
        };
        let Some(inlines) = block.inlines() else {
            continue;
        };
        let mut cursor = 0usize;
        for inline in inlines {
            let len = inline.char_len();
            let next = cursor + len;
            if next > start && cursor < end && len > 0 {
                total += 1;
                let style = match inline {
                    Inline::Run(run) => &run.style,
                    Inline::Chip(chip) => &chip.style,
                };
                if selector(style) {
                    on += 1;
                }
            }
            cursor = next;
        }
    }
    if total == 0 || on == 0 {
        SelectionToggleState::Off
    } else if on == total {
        SelectionToggleState::On
    } else {
        SelectionToggleState::Mixed
    }
}

/// Applies a formatting command to a normalized selection. Returns whether
/// any block was touched.
pub fn apply_format(
    document: &mut Document,
    range: SelectionRange,
    command: &FormatCommand,
) -> bool {
    let Some(range) = normalize_selection(document, range) else {
        return false;
    };
    match command {
        FormatCommand::Bold => toggle(document, range, |s| s.bold, |v| RunStylePatch {
            bold: Some(v),
            ..Default::default()
        }),
        FormatCommand::Italic => toggle(document, range, |s| s.italic, |v| RunStylePatch {
            italic: Some(v),
            ..Default::default()
        }),
        FormatCommand::Underline => toggle(document, range, |s| s.underline, |v| RunStylePatch {
            underline: Some(v),
            ..Default::default()
        }),
        FormatCommand::Strikethrough => {
            toggle(document, range, |s| s.strikethrough, |v| RunStylePatch {
                strikethrough: Some(v),
                ..Default::default()
            })
        }
        FormatCommand::Superscript => {
            toggle(document, range, |s| s.superscript, |v| RunStylePatch {
                superscript: Some(v),
                ..Default::default()
            })
        }
        FormatCommand::Subscript => toggle(document, range, |s| s.subscript, |v| RunStylePatch {
            subscript: Some(v),
            ..Default::default()
        }),
        FormatCommand::FontFamily(family) => patch_range(document, range, &RunStylePatch {
            font_family: Some(family.clone()),
            ..Default::default()
        }),
        FormatCommand::FontSize(size) => patch_range(document, range, &RunStylePatch {
            font_size: Some(*size),
            ..Default::default()
        }),
        FormatCommand::TextColor(color) => patch_range(document, range, &RunStylePatch {
            color: Some(*color),
            ..Default::default()
        }),
        FormatCommand::HighlightColor(color) => patch_range(document, range, &RunStylePatch {
            background: Some(*color),
            ..Default::default()
        }),
        FormatCommand::Align(alignment) => {
            let mut touched = false;
            for block_id in blocks_in_range(document, range) {
                match document.find_block_mut(block_id) {
                    Some(Block::Paragraph(p)) => {
                        p.alignment = *alignment;
                        touched = true;
                    }
                    Some(Block::Heading(h)) => {
                        h.alignment = *alignment;
                        touched = true;
                    }
                    _ => {}
                }
            }
            touched
        }
        FormatCommand::LineHeight(value) => {
            let value = value.max(0.5);
            let mut touched = false;
            for block_id in blocks_in_range(document, range) {
                if let Some(Block::Paragraph(p)) = document.find_block_mut(block_id) {
                    p.spacing.line = value;
                    touched = true;
                }
            }
            touched
        }
        FormatCommand::CaseTransform(mode) => {
            each_span(document, range, |inlines, start, end| {
                transform_case_in_span(inlines, start, end, *mode)
            })
        }
        FormatCommand::RemoveFormatting => each_span(document, range, |inlines, start, end| {
            remove_formatting_in_span(inlines, start, end)
        }),
        FormatCommand::List(target) => toggle_list(document, range, *target),
    }
}

fn toggle<S, P>(document: &mut Document, range: SelectionRange, selector: S, patch: P) -> bool
where
    S: Fn(&RunStyle) -> bool,
    P: Fn(bool) -> RunStylePatch,
{
    let target = detect_toggle_state(document, range, selector).toggled_target();
    patch_range(document, range, &patch(target))
}

fn patch_range(document: &mut Document, range: SelectionRange, patch: &RunStylePatch) -> bool {
    each_span(document, range, |inlines, start, end| {
        apply_patch_to_span(inlines, start, end, patch)
    })
}

fn each_span<F>(document: &mut Document, range: SelectionRange, mut f: F) -> bool
where
    F: FnMut(&mut Vec<Inline>, usize, usize),
{
    let mut touched = false;
    for block_id in blocks_in_range(document, range) {
        let Some((start, end)) = span_in_block(document, range, block_id) else {
            continue;
        };
        if start == end {
            continue;
        }
        if let Some(inlines) = document
            .find_block_mut(block_id)
            .and_then(Block::inlines_mut)
        {
            f(inlines, start, end);
            touched = true;
        }
    }
    touched
}

/// Wraps the selected paragraphs into a list, switches an existing list's
/// type, or unwraps back to paragraphs.
fn toggle_list(document: &mut Document, range: SelectionRange, target: Option<ListType>) -> bool {
    let anchor = range.start.block_id;
    let Some(anchor_index) = document.block_index(anchor) else {
        return false;
    };

    if let Block::List(list) = &document.blocks[anchor_index] {
        match target {
            Some(t) if t != list.list_type => {
                let Some(Block::List(list)) = document.find_block_mut(anchor) else {
                    return false;
                };
                list.list_type = t;
                true
            }
            // Unwrap: every item becomes a paragraph again.
            _ => {
                let Block::List(list) = document.blocks.remove(anchor_index) else {
                    return false;
                };
                let mut next_id = document.next_block_id().0;
                for (i, item) in list.items.into_iter().enumerate() {
                    let paragraph = Paragraph {
                        id: BlockId(next_id),
                        inlines: item.inlines,
                        ..Default::default()
                    };
                    next_id += 1;
                    document
                        .blocks
                        .insert(anchor_index + i, Block::Paragraph(paragraph));
                }
                true
            }
        }
    } else {
        let Some(list_type) = target else {
            return false;
        };
        let Some(end_index) = document.block_index(range.end.block_id) else {
            return false;
        };
        let (from, to) = if anchor_index <= end_index {
            (anchor_index, end_index)
        } else {
            (end_index, anchor_index)
        };
        // Only whole paragraphs can become items.
        if !document.blocks[from..=to]
            .iter()
            .all(|b| matches!(b, Block::Paragraph(_)))
        {
            return false;
        }
        let id = document.next_block_id();
        let items: Vec<ListItem> = document
            .blocks
            .drain(from..=to)
            .map(|block| match block {
                Block::Paragraph(p) => ListItem { inlines: p.inlines },
                _ => unreachable!(),
            })
            .collect();
        document.blocks.insert(
            from,
            Block::List(List {
                id,
                items,
                list_type,
                start_number: 1,
            }),
        );
        true
    }
}
