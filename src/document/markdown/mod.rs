use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd};

use crate::document::model::{
    Block, BlockId, Heading, ImageBlock, Indent, Inline, List, ListItem, ListType, Paragraph,
    Run, RunStyle, Table, TableCell, TableRow,
};

#[derive(Default)]
struct ListBuilder {
    list_type: ListType,
    start_number: u32,
    items: Vec<ListItem>,
    current_item: Option<Vec<Inline>>,
}

#[derive(Default)]
struct TableBuilder {
    rows: Vec<TableRow>,
    current_row: Vec<TableCell>,
    cell: Option<Vec<Inline>>,
}

pub fn markdown_to_blocks(source: &str) -> Vec<Block> {
    let options = Options::ENABLE_TABLES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_HEADING_ATTRIBUTES;
    let parser = Parser::new_ext(source, options);

    let mut blocks: Vec<Block> = Vec::new();
    let mut next_id = 1_u64;

    let mut in_paragraph = false;
    let mut current: Vec<Inline> = Vec::new();
    let mut pending_images: Vec<ImageBlock> = Vec::new();

    let mut in_heading: Option<u8> = None;
    let mut heading_inlines: Vec<Inline> = Vec::new();

    let mut list_stack: Vec<ListBuilder> = Vec::new();

    let mut in_code_block = false;
    let mut code_text = String::new();

    let mut quote_depth = 0_usize;

    let mut table: Option<TableBuilder> = None;

    let mut style_stack: Vec<RunStyle> = vec![RunStyle::default()];
    let mut image_alt: Option<(String, String)> = None;

    for event in parser {
        match event {
            Event::Start(tag) => match tag {
                Tag::Paragraph => {
                    in_paragraph = true;
                    current.clear();
                }
                Tag::Heading { level, .. } => {
                    in_heading = Some(heading_level_to_u8(level));
                    heading_inlines.clear();
                }
                Tag::List(start) => {
                    list_stack.push(ListBuilder {
                        list_type: if start.is_some() {
                            ListType::Numbered
                        } else {
                            ListType::Bullet
                        },
                        start_number: start.unwrap_or(1) as u32,
                        ..ListBuilder::default()
                    });
                }
                Tag::Item => {
                    if let Some(top) = list_stack.last_mut() {
                        top.current_item = Some(Vec::new());
                    }
                }
                Tag::CodeBlock(CodeBlockKind::Indented | CodeBlockKind::Fenced(_)) => {
                    in_code_block = true;
                    code_text.clear();
                }
                Tag::BlockQuote(_) => quote_depth += 1,
                Tag::Emphasis => push_modified(&mut style_stack, |s| s.italic = true),
                Tag::Strong => push_modified(&mut style_stack, |s| s.bold = true),
                Tag::Strikethrough => push_modified(&mut style_stack, |s| s.strikethrough = true),
                Tag::Link { .. } => push_modified(&mut style_stack, |_| {}),
                Tag::Image { dest_url, .. } => {
                    image_alt = Some((dest_url.to_string(), String::new()));
                }
                Tag::Table(_) => table = Some(TableBuilder::default()),
                Tag::TableHead => {
                    push_modified(&mut style_stack, |s| s.bold = true);
                }
                Tag::TableRow => {
                    if let Some(table) = table.as_mut() {
                        table.current_row.clear();
                    }
                }
                Tag::TableCell => {
                    if let Some(table) = table.as_mut() {
                        table.cell = Some(Vec::new());
                    }
                }
                _ => {}
            },
            Event::End(tag) => match tag {
                TagEnd::Paragraph => {
                    if in_paragraph {
                        in_paragraph = false;
                        let inlines = std::mem::take(&mut current);
                        if let Some(list) = list_stack.last_mut() {
                            if let Some(item) = list.current_item.as_mut() {
                                if !item.is_empty() {
                                    item.push(Inline::Run(Run::plain(" ")));
                                }
                                item.extend(inlines);
                            }
                        } else {
                            blocks.push(Block::Paragraph(Paragraph {
                                id: BlockId(next_id),
                                inlines,
                                indent: Indent {
                                    left: quote_depth as f32 * 24.0,
                                    ..Indent::default()
                                },
                                ..Paragraph::default()
                            }));
                            next_id += 1;
                        }
                        for mut image in pending_images.drain(..) {
                            image.id = BlockId(next_id);
                            next_id += 1;
                            blocks.push(Block::Image(image));
                        }
                    }
                }
                TagEnd::Heading(..) => {
                    if let Some(level) = in_heading.take() {
                        blocks.push(Block::Heading(Heading {
                            id: BlockId(next_id),
                            level,
                            inlines: std::mem::take(&mut heading_inlines),
                            ..Heading::default()
                        }));
                        next_id += 1;
                        for mut image in pending_images.drain(..) {
                            image.id = BlockId(next_id);
                            next_id += 1;
                            blocks.push(Block::Image(image));
                        }
                    }
                }
                TagEnd::Item => {
                    if let Some(list) = list_stack.last_mut() {
                        if let Some(inlines) = list.current_item.take() {
                            list.items.push(ListItem { inlines });
                        }
                    }
                }
                TagEnd::List(_) => {
                    if let Some(done) = list_stack.pop() {
                        match list_stack.last_mut() {
                            // Nested lists flatten into the parent's items.
                            Some(parent) => parent.items.extend(done.items),
                            None => {
                                blocks.push(Block::List(List {
                                    id: BlockId(next_id),
                                    items: done.items,
                                    list_type: done.list_type,
                                    start_number: done.start_number,
                                }));
                                next_id += 1;
                            }
                        }
                    }
                }
                TagEnd::CodeBlock => {
                    if in_code_block {
                        in_code_block = false;
                        let text = code_text.trim_end_matches('\n').to_string();
                        blocks.push(Block::Paragraph(Paragraph {
                            id: BlockId(next_id),
                            inlines: vec![Inline::Run(Run {
                                text,
                                style: RunStyle {
                                    font_family: Some("monospace".to_string()),
                                    ..RunStyle::default()
                                },
                            })],
                            ..Paragraph::default()
                        }));
                        next_id += 1;
                    }
                }
                TagEnd::BlockQuote(_) => quote_depth = quote_depth.saturating_sub(1),
                TagEnd::Emphasis
                | TagEnd::Strong
                | TagEnd::Strikethrough
                | TagEnd::Link => pop_style(&mut style_stack),
                TagEnd::Image => {
                    if let Some((url, alt)) = image_alt.take() {
                        let image = ImageBlock {
                            src: Some(url),
                            alt_text: alt,
                            ..ImageBlock::default()
                        };
                        if in_paragraph || in_heading.is_some() {
                            pending_images.push(image);
                        } else {
                            blocks.push(Block::Image(ImageBlock {
                                id: BlockId(next_id),
                                ..image
                            }));
                            next_id += 1;
                        }
                    }
                }
                TagEnd::TableCell => {
                    if let Some(table) = table.as_mut() {
                        if let Some(inlines) = table.cell.take() {
                            let id = BlockId(next_id);
                            next_id += 1;
                            table.current_row.push(TableCell {
                                blocks: vec![Block::Paragraph(Paragraph {
                                    id,
                                    inlines,
                                    ..Paragraph::default()
                                })],
                                rowspan: 1,
                                colspan: 1,
                                background: None,
                            });
                        }
                    }
                }
                TagEnd::TableHead => {
                    pop_style(&mut style_stack);
                    if let Some(table) = table.as_mut() {
                        let cells = std::mem::take(&mut table.current_row);
                        if !cells.is_empty() {
                            table.rows.push(TableRow { cells });
                        }
                    }
                }
                TagEnd::TableRow => {
                    if let Some(table) = table.as_mut() {
                        let cells = std::mem::take(&mut table.current_row);
                        if !cells.is_empty() {
                            table.rows.push(TableRow { cells });
                        }
                    }
                }
                TagEnd::Table => {
                    if let Some(done) = table.take() {
                        if !done.rows.is_empty() {
                            let cols = done
                                .rows
                                .iter()
                                .map(|r| r.cells.len())
                                .max()
                                .unwrap_or(1)
                                .max(1);
                            blocks.push(Block::Table(Table {
                                id: BlockId(next_id),
                                rows: done.rows,
                                column_widths: vec![1.0 / cols as f32; cols],
                                borders: Default::default(),
                                cell_padding: 6.0,
                            }));
                            next_id += 1;
                        }
                    }
                }
                _ => {}
            },
            Event::Text(text) => {
                if let Some((_, alt)) = image_alt.as_mut() {
                    alt.push_str(&text);
                } else if in_code_block {
                    code_text.push_str(&text);
                } else {
                    let style = style_stack.last().cloned().unwrap_or_default();
                    route_inline(
                        Inline::Run(Run {
                            text: text.to_string(),
                            style,
                        }),
                        &mut table,
                        &mut in_heading,
                        &mut heading_inlines,
                        &mut list_stack,
                        in_paragraph,
                        &mut current,
                    );
                }
            }
            Event::Code(text) => {
                let mut style = style_stack.last().cloned().unwrap_or_default();
                style.font_family = Some("monospace".to_string());
                route_inline(
                    Inline::Run(Run {
                        text: text.to_string(),
                        style,
                    }),
                    &mut table,
                    &mut in_heading,
                    &mut heading_inlines,
                    &mut list_stack,
                    in_paragraph,
                    &mut current,
                );
            }
            Event::Rule => blocks.push(Block::HorizontalRule),
            Event::SoftBreak | Event::HardBreak => {
                if in_code_block {
                    code_text.push('\n');
                } else {
                    route_inline(
                        Inline::Run(Run::plain(" ")),
                        &mut table,
                        &mut in_heading,
                        &mut heading_inlines,
                        &mut list_stack,
                        in_paragraph,
                        &mut current,
                    );
                }
            }
            _ => {}
        }
    }

    blocks
}

fn push_modified<F: FnOnce(&mut RunStyle)>(stack: &mut Vec<RunStyle>, mutate: F) {
    let mut style = stack.last().cloned().unwrap_or_default();
    mutate(&mut style);
    stack.push(style);
}

fn pop_style(stack: &mut Vec<RunStyle>) {
    if stack.len() > 1 {
        stack.pop();
    }
}

fn route_inline(
    inline: Inline,
    table: &mut Option<TableBuilder>,
    in_heading: &mut Option<u8>,
    heading_inlines: &mut Vec<Inline>,
    list_stack: &mut [ListBuilder],
    in_paragraph: bool,
    current: &mut Vec<Inline>,
) {
    if let Some(cell) = table.as_mut().and_then(|t| t.cell.as_mut()) {
        cell.push(inline);
        return;
    }
    if in_heading.is_some() {
        heading_inlines.push(inline);
        return;
    }
    if !in_paragraph {
        // Tight list items carry their text without paragraph events.
        if let Some(item) = list_stack.last_mut().and_then(|l| l.current_item.as_mut()) {
            item.push(inline);
            return;
        }
    }
    if in_paragraph {
        current.push(inline);
    }
}

fn heading_level_to_u8(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heading_and_styled_paragraph() {
        let blocks = markdown_to_blocks("# Title\n\nplain **bold** *italic*\n");
        assert_eq!(blocks.len(), 2);
        match &blocks[0] {
            Block::Heading(h) => {
                assert_eq!(h.level, 1);
                assert_eq!(h.inlines[0].visible_text(), "Title");
            }
            _ => panic!("expected heading"),
        }
        match &blocks[1] {
            Block::Paragraph(p) => {
                let bold = p
                    .inlines
                    .iter()
                    .find_map(|i| match i {
                        Inline::Run(r) if r.text == "bold" => Some(r),
                        _ => None,
                    })
                    .unwrap();
                assert!(bold.style.bold);
            }
            _ => panic!("expected paragraph"),
        }
    }

    #[test]
    fn tight_list_items_keep_their_text() {
        let blocks = markdown_to_blocks("- one\n- two\n");
        match &blocks[0] {
            Block::List(list) => {
                assert_eq!(list.items.len(), 2);
                assert_eq!(list.items[0].inlines[0].visible_text(), "one");
            }
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn ordered_list_keeps_start_number() {
        let blocks = markdown_to_blocks("5. five\n6. six\n");
        match &blocks[0] {
            Block::List(list) => {
                assert_eq!(list.list_type, ListType::Numbered);
                assert_eq!(list.start_number, 5);
            }
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn fenced_code_becomes_monospace_paragraph() {
        let blocks = markdown_to_blocks("```\nlet x = 1;\n```\n");
        match &blocks[0] {
            Block::Paragraph(p) => match &p.inlines[0] {
                Inline::Run(run) => {
                    assert_eq!(run.text, "let x = 1;");
                    assert_eq!(run.style.font_family.as_deref(), Some("monospace"));
                }
                _ => panic!(),
            },
            _ => panic!("expected paragraph"),
        }
    }

    #[test]
    fn pipe_table_parses_head_and_body() {
        let blocks = markdown_to_blocks("| a | b |\n| - | - |\n| 1 | 2 |\n");
        match &blocks[0] {
            Block::Table(table) => {
                assert_eq!(table.rows.len(), 2);
                assert_eq!(table.rows[0].cells.len(), 2);
                assert_eq!(table.rows[1].cells[0].blocks[0].visible_text(), "1");
            }
            _ => panic!("expected table"),
        }
    }

    #[test]
    fn blockquote_paragraph_gets_indent() {
        let blocks = markdown_to_blocks("> quoted\n");
        match &blocks[0] {
            Block::Paragraph(p) => assert!(p.indent.left > 0.0),
            _ => panic!("expected paragraph"),
        }
    }

    #[test]
    fn image_reference_becomes_image_block() {
        let blocks = markdown_to_blocks("![logo](https://example.com/x.png)\n");
        let image = blocks
            .iter()
            .find_map(|b| match b {
                Block::Image(img) => Some(img),
                _ => None,
            })
            .unwrap();
        assert_eq!(image.src.as_deref(), Some("https://example.com/x.png"));
        assert_eq!(image.alt_text, "logo");
    }
}
