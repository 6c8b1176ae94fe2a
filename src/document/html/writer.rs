use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::document::config::PageConfig;
use crate::document::model::{
    Block, Chip, ChipKind, Document, Heading, ImageBlock, Inline, List, ListType, Paragraph,
    ParagraphAlignment, Run, RunStyle, Table, TextWrap,
};

/// Canonical markup for a block sequence. The parser in this module's sibling
/// understands everything emitted here, so writer output round-trips.
pub fn blocks_to_html(blocks: &[Block]) -> String {
    let mut out = String::new();
    for block in blocks {
        block_to_html(block, &mut out);
    }
    out
}

pub fn document_to_html(document: &Document) -> String {
    blocks_to_html(&document.blocks)
}

fn block_to_html(block: &Block, out: &mut String) {
    match block {
        Block::Paragraph(p) => paragraph_to_html(p, out),
        Block::Heading(h) => heading_to_html(h, out),
        Block::Table(t) => table_to_html(t, out),
        Block::Image(img) => image_to_html(img, out),
        Block::List(l) => list_to_html(l, out),
        Block::HorizontalRule => out.push_str("<hr>"),
        Block::PageBreak => out.push_str("<div class=\"page-break\"></div>"),
    }
}

fn paragraph_to_html(p: &Paragraph, out: &mut String) {
    let style = paragraph_css(p);
    if style.is_empty() {
        out.push_str("<p>");
    } else {
        out.push_str(&format!("<p style=\"{style}\">"));
    }
    if p.inlines.is_empty() {
        // contenteditable keeps empty paragraphs selectable with a lone break
        out.push_str("<br>");
    } else {
        for inline in &p.inlines {
            inline_to_html(inline, out);
        }
    }
    out.push_str("</p>");
}

fn heading_to_html(h: &Heading, out: &mut String) {
    let level = h.level.clamp(1, 6);
    let mut style = String::new();
    push_alignment_css(h.alignment, &mut style);
    if style.is_empty() {
        out.push_str(&format!("<h{level}>"));
    } else {
        out.push_str(&format!("<h{level} style=\"{style}\">"));
    }
    for inline in &h.inlines {
        inline_to_html(inline, out);
    }
    out.push_str(&format!("</h{level}>"));
}

fn paragraph_css(p: &Paragraph) -> String {
    let mut style = String::new();
    push_alignment_css(p.alignment, &mut style);
    if p.spacing.line > 0.0 {
        push_css(&mut style, "line-height", &trim_float(p.spacing.line));
    }
    if p.spacing.before > 0.0 {
        push_css(&mut style, "margin-top", &px(p.spacing.before));
    }
    if p.spacing.after > 0.0 {
        push_css(&mut style, "margin-bottom", &px(p.spacing.after));
    }
    if p.indent.left > 0.0 {
        push_css(&mut style, "margin-left", &px(p.indent.left));
    }
    if p.indent.right > 0.0 {
        push_css(&mut style, "margin-right", &px(p.indent.right));
    }
    if p.indent.first_line > 0.0 {
        push_css(&mut style, "text-indent", &px(p.indent.first_line));
    }
    style
}

fn push_alignment_css(alignment: ParagraphAlignment, style: &mut String) {
    let value = match alignment {
        ParagraphAlignment::Left => return,
        ParagraphAlignment::Center => "center",
        ParagraphAlignment::Right => "right",
        ParagraphAlignment::Justify => "justify",
    };
    push_css(style, "text-align", value);
}

fn push_css(style: &mut String, name: &str, value: &str) {
    if !style.is_empty() {
        style.push_str("; ");
    }
    style.push_str(name);
    style.push_str(": ");
    style.push_str(value);
}

fn px(v: f32) -> String {
    format!("{}px", trim_float(v))
}

fn trim_float(v: f32) -> String {
    if (v - v.round()).abs() < 0.001 {
        format!("{}", v.round() as i64)
    } else {
        format!("{v:.2}")
    }
}

fn inline_to_html(inline: &Inline, out: &mut String) {
    match inline {
        Inline::Run(run) => run_to_html(run, out),
        Inline::Chip(chip) => chip_to_html(chip, out),
    }
}

fn run_to_html(run: &Run, out: &mut String) {
    let span_style = span_css(&run.style);
    let mut close = Vec::new();
    if !span_style.is_empty() {
        out.push_str(&format!("<span style=\"{span_style}\">"));
        close.push("</span>");
    }
    for (flag, open, end) in [
        (run.style.bold, "<b>", "</b>"),
        (run.style.italic, "<i>", "</i>"),
        (run.style.underline, "<u>", "</u>"),
        (run.style.strikethrough, "<s>", "</s>"),
        (run.style.superscript, "<sup>", "</sup>"),
        (run.style.subscript, "<sub>", "</sub>"),
    ] {
        if flag {
            out.push_str(open);
            close.push(end);
        }
    }
    out.push_str(&escape_html(&run.text));
    for tag in close.into_iter().rev() {
        out.push_str(tag);
    }
}

/// Fonts and colors only; the boolean decorations become semantic tags.
fn span_css(style: &RunStyle) -> String {
    let mut css = String::new();
    if let Some(family) = &style.font_family {
        push_css(&mut css, "font-family", family);
    }
    if let Some(size) = style.font_size {
        push_css(&mut css, "font-size", &px(size));
    }
    if let Some(color) = style.color {
        push_css(&mut css, "color", &color.to_css());
    }
    if let Some(background) = style.background {
        push_css(&mut css, "background-color", &background.to_css());
    }
    css
}

fn chip_to_html(chip: &Chip, out: &mut String) {
    let kind_attrs = match &chip.kind {
        ChipKind::Variable { table, field } => format!(
            "data-chip=\"variable\" data-table=\"{}\" data-field=\"{}\"",
            escape_html(table),
            escape_html(field)
        ),
        ChipKind::PageNumber => "data-chip=\"page\"".to_string(),
        ChipKind::PageTotal => "data-chip=\"total\"".to_string(),
    };
    let mut style = span_css(&chip.style);
    for (flag, name, value) in [
        (chip.style.bold, "font-weight", "bold"),
        (chip.style.italic, "font-style", "italic"),
        (chip.style.underline, "text-decoration", "underline"),
        (chip.style.strikethrough, "text-decoration", "line-through"),
    ] {
        if flag {
            push_css(&mut style, name, value);
        }
    }
    let style_attr = if style.is_empty() {
        String::new()
    } else {
        format!(" style=\"{style}\"")
    };
    out.push_str(&format!(
        "<span class=\"placeholder-chip\" {kind_attrs} contenteditable=\"false\"{style_attr}>{}</span>",
        escape_html(&chip.label())
    ));
}

fn table_to_html(table: &Table, out: &mut String) {
    let mut style = String::new();
    push_css(&mut style, "border-collapse", "collapse");
    if table.borders.outer.width > 0.0 {
        push_css(
            &mut style,
            "border",
            &format!(
                "{} solid {}",
                px(table.borders.outer.width),
                table.borders.outer.color.to_css()
            ),
        );
    }
    out.push_str(&format!(
        "<table style=\"{style}\" data-cell-padding=\"{}\">",
        trim_float(table.cell_padding)
    ));
    if !table.column_widths.is_empty() {
        out.push_str("<colgroup>");
        for width in &table.column_widths {
            out.push_str(&format!(
                "<col style=\"width: {:.1}%\">",
                (width * 100.0).clamp(0.0, 100.0)
            ));
        }
        out.push_str("</colgroup>");
    }
    let mut cell_style = String::new();
    if table.borders.inner_horizontal.width > 0.0 || table.borders.inner_vertical.width > 0.0 {
        let b = &table.borders.inner_horizontal;
        let width = b.width.max(table.borders.inner_vertical.width);
        push_css(
            &mut cell_style,
            "border",
            &format!("{} solid {}", px(width), b.color.to_css()),
        );
    }
    push_css(&mut cell_style, "padding", &px(table.cell_padding));
    for row in &table.rows {
        out.push_str("<tr>");
        for cell in &row.cells {
            let mut td_style = cell_style.clone();
            if let Some(background) = cell.background {
                push_css(&mut td_style, "background-color", &background.to_css());
            }
            out.push_str(&format!("<td style=\"{td_style}\""));
            if cell.rowspan > 1 {
                out.push_str(&format!(" rowspan=\"{}\"", cell.rowspan));
            }
            if cell.colspan > 1 {
                out.push_str(&format!(" colspan=\"{}\"", cell.colspan));
            }
            out.push('>');
            for block in &cell.blocks {
                block_to_html(block, out);
            }
            out.push_str("</td>");
        }
        out.push_str("</tr>");
    }
    out.push_str("</table>");
}

fn list_to_html(list: &List, out: &mut String) {
    let (open, close) = match list.list_type {
        ListType::Bullet => ("<ul>".to_string(), "</ul>"),
        ListType::Numbered => {
            if list.start_number > 1 {
                (format!("<ol start=\"{}\">", list.start_number), "</ol>")
            } else {
                ("<ol>".to_string(), "</ol>")
            }
        }
    };
    out.push_str(&open);
    for item in &list.items {
        out.push_str("<li>");
        for inline in &item.inlines {
            inline_to_html(inline, out);
        }
        out.push_str("</li>");
    }
    out.push_str(close);
}

fn image_to_html(image: &ImageBlock, out: &mut String) {
    out.push_str("<img");
    if let Some(src) = image_src(image) {
        out.push_str(&format!(" src=\"{}\"", escape_html(&src)));
    }
    if !image.alt_text.is_empty() {
        out.push_str(&format!(" alt=\"{}\"", escape_html(&image.alt_text)));
    }
    if image.width > 0.0 {
        out.push_str(&format!(" width=\"{}\"", trim_float(image.width)));
    }
    if image.height > 0.0 {
        out.push_str(&format!(" height=\"{}\"", trim_float(image.height)));
    }
    out.push_str(&format!(" data-wrap=\"{}\"", wrap_name(image.wrap)));
    if let Some(qr) = &image.qr {
        out.push_str(&format!(
            " data-qr=\"{}\" data-qr-size=\"{}\"",
            escape_html(&qr.data),
            trim_float(qr.module_size)
        ));
    }
    let css = wrap_css(image.wrap);
    if !css.is_empty() {
        out.push_str(&format!(" style=\"{css}\""));
    }
    out.push('>');
}

fn image_src(image: &ImageBlock) -> Option<String> {
    if let Some(src) = &image.src {
        return Some(src.clone());
    }
    image
        .data
        .as_ref()
        .map(|data| format!("data:{};base64,{}", data.mime, BASE64.encode(&data.bytes)))
}

pub fn wrap_name(wrap: TextWrap) -> &'static str {
    match wrap {
        TextWrap::Inline => "inline",
        TextWrap::FloatLeft => "float-left",
        TextWrap::FloatRight => "float-right",
        TextWrap::Center => "center",
        TextWrap::Behind => "behind",
        TextWrap::InFront => "in-front",
    }
}

/// Layout-equivalent CSS for each wrap mode. Rasterizers and browsers both
/// reproduce the editor placement from these plain declarations.
pub fn wrap_css(wrap: TextWrap) -> &'static str {
    match wrap {
        TextWrap::Inline => "",
        TextWrap::FloatLeft => "float: left; margin: 0 12px 8px 0",
        TextWrap::FloatRight => "float: right; margin: 0 0 8px 12px",
        TextWrap::Center => "display: block; margin: 8px auto",
        TextWrap::Behind => "position: absolute; z-index: -1",
        TextWrap::InFront => "position: absolute; z-index: 10",
    }
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn blocks_to_plain_text(blocks: &[Block]) -> String {
    let mut out = String::new();
    for block in blocks {
        match block {
            Block::Paragraph(p) => {
                out.push_str(&p.text());
                out.push('\n');
            }
            Block::Heading(h) => {
                for inline in &h.inlines {
                    out.push_str(&inline.visible_text());
                }
                out.push('\n');
            }
            Block::List(list) => {
                for (i, item) in list.items.iter().enumerate() {
                    match list.list_type {
                        ListType::Bullet => out.push_str("- "),
                        ListType::Numbered => {
                            out.push_str(&format!("{}. ", list.start_number as usize + i))
                        }
                    }
                    for inline in &item.inlines {
                        out.push_str(&inline.visible_text());
                    }
                    out.push('\n');
                }
            }
            Block::Table(table) => {
                for row in &table.rows {
                    let cells: Vec<String> = row
                        .cells
                        .iter()
                        .map(|cell| {
                            cell.blocks
                                .iter()
                                .map(|b| b.visible_text().trim().to_string())
                                .collect::<Vec<_>>()
                                .join(" ")
                        })
                        .collect();
                    out.push_str(&cells.join("\t"));
                    out.push('\n');
                }
            }
            Block::Image(img) => {
                if !img.alt_text.is_empty() {
                    out.push_str(&img.alt_text);
                    out.push('\n');
                }
            }
            Block::HorizontalRule | Block::PageBreak => out.push('\n'),
        }
    }
    out
}

/// Body markup wrapped for the rasterizer: fixed content width and the editor
/// font defaults. Watermark and page background are composited later per page.
pub fn print_body_html(document: &Document, config: &PageConfig) -> String {
    let body = blocks_to_html(&document.blocks);
    format!(
        "<div style=\"width: {}; font-family: Arial, sans-serif; font-size: 16px; line-height: 1.5; column-count: {}\">{body}</div>",
        px(config.content_width()),
        config.columns.max(1)
    )
}

/// Complete standalone page for the HTML export format.
pub fn standalone_html(document: &Document, config: &PageConfig, title: &str) -> String {
    let body = blocks_to_html(&document.blocks);
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n<style>\n@page {{ size: {} {}; margin: {} {} {} {}; }}\nbody {{ font-family: Arial, sans-serif; font-size: 16px; line-height: 1.5; max-width: {}; margin: 0 auto; }}\n.placeholder-chip {{ background: #eef2ff; border-radius: 3px; padding: 0 3px; }}\ntable {{ border-collapse: collapse; }}\n</style>\n</head>\n<body>\n{}\n</body>\n</html>\n",
        escape_html(title),
        pt(config.page_width()),
        pt(config.page_height()),
        pt(config.margins.top),
        pt(config.margins.right),
        pt(config.margins.bottom),
        pt(config.margins.left),
        px(config.content_width()),
        body
    )
}

/// Word-namespaced HTML. Word opens this as a regular document when it is
/// saved with a `.docx` extension and an `application/msword` content type,
/// which is exactly how the editor ships its DOCX download.
pub fn word_wrapper_html(document: &Document, config: &PageConfig, title: &str) -> String {
    let body = blocks_to_html(&document.blocks);
    format!(
        "<html xmlns:o=\"urn:schemas-microsoft-com:office:office\" xmlns:w=\"urn:schemas-microsoft-com:office:word\" xmlns=\"http://www.w3.org/TR/REC-html40\">\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n<!--[if gte mso 9]><xml><w:WordDocument><w:View>Print</w:View><w:Zoom>100</w:Zoom><w:DoNotOptimizeForBrowser/></w:WordDocument></xml><![endif]-->\n<style>\n@page WordSection1 {{ size: {} {}; margin: {} {} {} {}; mso-header-margin: 35.4pt; mso-footer-margin: 35.4pt; }}\ndiv.WordSection1 {{ page: WordSection1; }}\ntable {{ border-collapse: collapse; }}\n</style>\n</head>\n<body>\n<div class=\"WordSection1\">\n{}\n</div>\n</body>\n</html>\n",
        escape_html(title),
        pt(config.page_width()),
        pt(config.page_height()),
        pt(config.margins.top),
        pt(config.margins.right),
        pt(config.margins.bottom),
        pt(config.margins.left),
        body
    )
}

fn pt(px_value: f32) -> String {
    format!("{:.1}pt", px_value * 72.0 / 96.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::model::{BlockId, Color};

    #[test]
    fn styled_run_uses_semantic_tags() {
        let mut p = Paragraph::with_text(BlockId(1), "plain ");
        p.inlines.push(Inline::Run(Run {
            text: "strong".into(),
            style: RunStyle {
                bold: true,
                italic: true,
                ..Default::default()
            },
        }));
        let html = blocks_to_html(&[Block::Paragraph(p)]);
        assert_eq!(html, "<p>plain <b><i>strong</i></b></p>");
    }

    #[test]
    fn colored_run_gets_a_span() {
        let p = Paragraph {
            id: BlockId(1),
            inlines: vec![Inline::Run(Run {
                text: "red".into(),
                style: RunStyle {
                    color: Some(Color::rgb(1.0, 0.0, 0.0)),
                    ..Default::default()
                },
            })],
            ..Default::default()
        };
        let html = blocks_to_html(&[Block::Paragraph(p)]);
        assert!(html.contains("<span style=\"color: rgb(255, 0, 0)\">red</span>"));
    }

    #[test]
    fn empty_paragraph_keeps_a_line_break() {
        let html = blocks_to_html(&[Block::Paragraph(Paragraph::default())]);
        assert_eq!(html, "<p><br></p>");
    }

    #[test]
    fn chip_emits_data_attributes_and_label() {
        let p = Paragraph {
            id: BlockId(1),
            inlines: vec![Inline::Chip(Chip::variable("customers", "name"))],
            ..Default::default()
        };
        let html = blocks_to_html(&[Block::Paragraph(p)]);
        assert!(html.contains("data-chip=\"variable\""));
        assert!(html.contains("data-table=\"customers\""));
        assert!(html.contains("data-field=\"name\""));
        assert!(html.contains(">customers.name</span>"));
        assert!(html.contains("contenteditable=\"false\""));
    }

    #[test]
    fn escape_covers_markup_characters() {
        assert_eq!(escape_html("a<b&\"c\">"), "a&lt;b&amp;&quot;c&quot;&gt;");
    }

    #[test]
    fn word_wrapper_carries_the_word_namespace_and_page_size() {
        let doc = Document::with_blocks(vec![Block::Paragraph(Paragraph::with_text(
            BlockId(1),
            "hello",
        ))]);
        let html = word_wrapper_html(&doc, &PageConfig::default(), "Report");
        assert!(html.contains("xmlns:w=\"urn:schemas-microsoft-com:office:word\""));
        assert!(html.contains("@page WordSection1"));
        // A4 at 96dpi is 595.5 x 842.2 points.
        assert!(html.contains("595.5pt"));
        assert!(html.contains("WordSection1"));
    }

    #[test]
    fn plain_text_renders_lists_and_tables() {
        let list = List {
            id: BlockId(1),
            items: vec![
                ListItem {
                    inlines: vec![Inline::Run(Run::plain("first"))],
                },
                ListItem {
                    inlines: vec![Inline::Run(Run::plain("second"))],
                },
            ],
            list_type: ListType::Numbered,
            start_number: 1,
        };
        let text = blocks_to_plain_text(&[Block::List(list)]);
        assert_eq!(text, "1. first\n2. second\n");
    }

    #[test]
    fn page_break_round_trip_marker() {
        let html = blocks_to_html(&[Block::PageBreak]);
        assert_eq!(html, "<div class=\"page-break\"></div>");
    }
}
