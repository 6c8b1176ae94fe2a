use std::collections::HashMap;
use std::io::{Cursor, Read};

use quick_xml::{
    Reader,
    events::{BytesStart, Event},
};
use zip::ZipArchive;

use crate::document::docx::{ConvertError, DocxConverter};
use crate::document::html::blocks_to_html;
use crate::document::model::{
    Block, BlockId, Heading, ImageBlock, ImageData, Inline, List, ListItem, ListType, Paragraph,
    ParagraphAlignment, Run, Table, TableCell, TableRow,
};

/// In-process docx reader: unpacks the archive, walks `word/document.xml`,
/// and renders the result as canonical markup. Embedded images are inlined
/// so the output is self-contained.
#[derive(Debug, Default)]
pub struct BundledDocxConverter;

impl DocxConverter for BundledDocxConverter {
    fn convert_to_html(&self, bytes: &[u8]) -> Result<String, ConvertError> {
        if super::is_legacy_doc(bytes) {
            return Err(ConvertError::LegacyDocFormat);
        }
        let blocks = parse_docx_blocks(bytes)?;
        Ok(blocks_to_html(&blocks))
    }
}

#[derive(Debug, Default)]
struct ParsedRels {
    target_by_id: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct ParagraphBuilder {
    inlines: Vec<Inline>,
    style_id: Option<String>,
    alignment: ParagraphAlignment,
    list_type: Option<ListType>,
}

#[derive(Debug, Default)]
struct TableBuilder {
    rows: Vec<Vec<String>>,
    current_row: Vec<String>,
    current_cell_text: String,
    in_cell: bool,
}

fn parse_docx_blocks(bytes: &[u8]) -> Result<Vec<Block>, ConvertError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ConvertError::Archive(e.to_string()))?;

    let mut entries = HashMap::<String, Vec<u8>>::new();
    for i in 0..archive.len() {
        let mut f = archive
            .by_index(i)
            .map_err(|e| ConvertError::Archive(e.to_string()))?;
        let name = f.name().to_string();
        let mut data = Vec::with_capacity(f.size() as usize);
        f.read_to_end(&mut data)
            .map_err(|e| ConvertError::Archive(e.to_string()))?;
        entries.insert(name, data);
    }

    let rels = entries
        .get("word/_rels/document.xml.rels")
        .map(|v| parse_relationships(v.as_slice()))
        .unwrap_or_default();

    let content_types = entries
        .get("[Content_Types].xml")
        .map(|v| parse_content_types(v.as_slice()))
        .unwrap_or_default();

    let Some(document_xml) = entries.get("word/document.xml") else {
        return Err(ConvertError::Malformed(
            "missing word/document.xml".to_string(),
        ));
    };

    let mut blocks = parse_document_xml(document_xml, &entries, &rels, &content_types)?;
    coalesce_lists(&mut blocks);
    Ok(blocks)
}

fn parse_relationships(xml: &[u8]) -> ParsedRels {
    let mut reader = Reader::from_reader(Cursor::new(xml));
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut rels = ParsedRels::default();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) => {
                if local_name(e.local_name().as_ref()) == "Relationship" {
                    let id = attr_value(&e, "Id", reader.decoder()).unwrap_or_default();
                    let target = attr_value(&e, "Target", reader.decoder()).unwrap_or_default();
                    if !id.is_empty() && !target.is_empty() {
                        rels.target_by_id.insert(id, target);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    rels
}

fn parse_content_types(xml: &[u8]) -> HashMap<String, String> {
    let mut reader = Reader::from_reader(Cursor::new(xml));
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut out = HashMap::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) => {
                if local_name(e.local_name().as_ref()) == "Default" {
                    let ext = attr_value(&e, "Extension", reader.decoder()).unwrap_or_default();
                    let content_type =
                        attr_value(&e, "ContentType", reader.decoder()).unwrap_or_default();
                    if !ext.is_empty() && !content_type.is_empty() {
                        out.insert(ext.to_ascii_lowercase(), content_type);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    out
}

fn parse_document_xml(
    xml: &[u8],
    entries: &HashMap<String, Vec<u8>>,
    rels: &ParsedRels,
    content_types: &HashMap<String, String>,
) -> Result<Vec<Block>, ConvertError> {
    let mut reader = Reader::from_reader(Cursor::new(xml));
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    let mut blocks: Vec<Block> = Vec::new();
    let mut block_id = 1_u64;
    let mut paragraph: Option<ParagraphBuilder> = None;
    let mut run: Option<Run> = None;
    let mut in_text = false;
    let mut in_run_props = false;
    let mut in_paragraph_props = false;
    let mut current_table: Option<TableBuilder> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = local_name(e.local_name().as_ref());
                match name.as_str() {
                    "p" if current_table.is_none() => {
                        paragraph = Some(ParagraphBuilder::default());
                    }
                    "pPr" => in_paragraph_props = true,
                    "r" => run = Some(Run::default()),
                    "rPr" => in_run_props = true,
                    "t" => in_text = true,
                    "tbl" => current_table = Some(TableBuilder::default()),
                    "tr" => {
                        if let Some(tbl) = &mut current_table {
                            tbl.current_row.clear();
                        }
                    }
                    "tc" => {
                        if let Some(tbl) = &mut current_table {
                            tbl.current_cell_text.clear();
                            tbl.in_cell = true;
                        }
                    }
                    _ => handle_property_tag(
                        &name,
                        &e,
                        &reader,
                        &mut paragraph,
                        &mut run,
                        in_paragraph_props,
                        in_run_props,
                        &mut blocks,
                        &mut block_id,
                        entries,
                        rels,
                        content_types,
                    ),
                }
            }
            Ok(Event::Empty(e)) => {
                let name = local_name(e.local_name().as_ref());
                handle_property_tag(
                    &name,
                    &e,
                    &reader,
                    &mut paragraph,
                    &mut run,
                    in_paragraph_props,
                    in_run_props,
                    &mut blocks,
                    &mut block_id,
                    entries,
                    rels,
                    content_types,
                );
            }
            Ok(Event::Text(t)) => {
                let text = match t.decode() {
                    Ok(v) => v.into_owned(),
                    Err(_) => String::new(),
                };
                if let Some(tbl) = &mut current_table {
                    if tbl.in_cell && in_text {
                        tbl.current_cell_text.push_str(&text);
                    }
                } else if in_text {
                    if let Some(r) = &mut run {
                        r.text.push_str(&text);
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = local_name(e.local_name().as_ref());
                match name.as_str() {
                    "pPr" => in_paragraph_props = false,
                    "rPr" => in_run_props = false,
                    "t" => in_text = false,
                    "r" => {
                        if let (Some(p), Some(r)) = (&mut paragraph, run.take()) {
                            if !r.text.is_empty() {
                                p.inlines.push(Inline::Run(r));
                            }
                        }
                    }
                    "p" if current_table.is_none() => {
                        if let Some(p) = paragraph.take() {
                            push_paragraph(p, &mut blocks, &mut block_id);
                        }
                    }
                    "tc" => {
                        if let Some(tbl) = &mut current_table {
                            tbl.current_row
                                .push(tbl.current_cell_text.trim().to_string());
                            tbl.current_cell_text.clear();
                            tbl.in_cell = false;
                        }
                    }
                    "tr" => {
                        if let Some(tbl) = &mut current_table {
                            if !tbl.current_row.is_empty() {
                                tbl.rows.push(std::mem::take(&mut tbl.current_row));
                            }
                        }
                    }
                    "tbl" => {
                        if let Some(tbl) = current_table.take() {
                            push_table(tbl, &mut blocks, &mut block_id);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                return Err(ConvertError::Malformed(format!(
                    "document.xml parse error: {err}"
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    if blocks.is_empty() {
        let fallback = parse_plain_text_runs(xml);
        if !fallback.is_empty() {
            blocks.push(Block::Paragraph(Paragraph::with_text(
                next_block_id(&mut block_id),
                fallback,
            )));
        }
    }

    Ok(blocks)
}

#[allow(clippy::too_many_arguments)]
fn handle_property_tag(
    name: &str,
    e: &BytesStart<'_>,
    reader: &Reader<Cursor<&[u8]>>,
    paragraph: &mut Option<ParagraphBuilder>,
    run: &mut Option<Run>,
    in_paragraph_props: bool,
    in_run_props: bool,
    blocks: &mut Vec<Block>,
    block_id: &mut u64,
    entries: &HashMap<String, Vec<u8>>,
    rels: &ParsedRels,
    content_types: &HashMap<String, String>,
) {
    match name {
        "pStyle" if in_paragraph_props => {
            if let Some(p) = paragraph {
                p.style_id = attr_value(e, "val", reader.decoder());
            }
        }
        "jc" if in_paragraph_props => {
            if let Some(p) = paragraph {
                if let Some(v) = attr_value(e, "val", reader.decoder()) {
                    p.alignment = match v.as_str() {
                        "center" => ParagraphAlignment::Center,
                        "right" => ParagraphAlignment::Right,
                        "both" => ParagraphAlignment::Justify,
                        _ => ParagraphAlignment::Left,
                    };
                }
            }
        }
        "numPr" if in_paragraph_props => {
            if let Some(p) = paragraph {
                p.list_type = Some(ListType::Numbered);
            }
        }
        "numFmt" if in_paragraph_props => {
            if let Some(p) = paragraph {
                if let Some(v) = attr_value(e, "val", reader.decoder()) {
                    p.list_type = Some(if v == "bullet" {
                        ListType::Bullet
                    } else {
                        ListType::Numbered
                    });
                }
            }
        }
        "b" if in_run_props => {
            if let Some(r) = run {
                r.style.bold = attr_on(e, reader);
            }
        }
        "i" if in_run_props => {
            if let Some(r) = run {
                r.style.italic = attr_on(e, reader);
            }
        }
        "u" if in_run_props => {
            if let Some(r) = run {
                r.style.underline =
                    attr_value(e, "val", reader.decoder()).as_deref() != Some("none");
            }
        }
        "strike" if in_run_props => {
            if let Some(r) = run {
                r.style.strikethrough = attr_on(e, reader);
            }
        }
        "rFonts" if in_run_props => {
            if let Some(r) = run {
                r.style.font_family = attr_value(e, "ascii", reader.decoder())
                    .or_else(|| attr_value(e, "cs", reader.decoder()));
            }
        }
        "sz" if in_run_props => {
            if let Some(r) = run {
                if let Some(v) = attr_value(e, "val", reader.decoder()) {
                    if let Ok(half_points) = v.parse::<f32>() {
                        // Half-points to CSS pixels.
                        r.style.font_size = Some(half_points * 2.0 / 3.0);
                    }
                }
            }
        }
        "color" if in_run_props => {
            if let Some(r) = run {
                if let Some(v) = attr_value(e, "val", reader.decoder()) {
                    r.style.color = parse_docx_hex(&v);
                }
            }
        }
        "vertAlign" if in_run_props => {
            if let Some(r) = run {
                if let Some(v) = attr_value(e, "val", reader.decoder()) {
                    r.style.superscript = v == "superscript";
                    r.style.subscript = v == "subscript";
                }
            }
        }
        "br" => {
            let break_type = attr_value(e, "type", reader.decoder()).unwrap_or_default();
            if break_type == "page" {
                if let Some(p) = paragraph.take() {
                    push_paragraph(p, blocks, block_id);
                }
                blocks.push(Block::PageBreak);
                *paragraph = Some(ParagraphBuilder::default());
            } else if let Some(r) = run {
                r.text.push('\n');
            }
        }
        "blip" => {
            if let Some(embedded) = attr_value(e, "embed", reader.decoder()) {
                if let Some(image) = resolve_image(&embedded, entries, rels, content_types) {
                    blocks.push(Block::Image(ImageBlock {
                        id: next_block_id(block_id),
                        width: image.width as f32,
                        height: image.height as f32,
                        original_width: image.width,
                        original_height: image.height,
                        data: Some(image),
                        ..ImageBlock::default()
                    }));
                }
            }
        }
        _ => {}
    }
}

// Toggle properties are on unless an explicit false/0 value is present.
fn attr_on(e: &BytesStart<'_>, reader: &Reader<Cursor<&[u8]>>) -> bool {
    match attr_value(e, "val", reader.decoder()).as_deref() {
        Some("false") | Some("0") | Some("none") => false,
        _ => true,
    }
}

fn push_paragraph(p: ParagraphBuilder, blocks: &mut Vec<Block>, block_id: &mut u64) {
    if p.inlines.is_empty() && p.list_type.is_none() {
        blocks.push(Block::Paragraph(Paragraph {
            id: next_block_id(block_id),
            alignment: p.alignment,
            ..Paragraph::default()
        }));
        return;
    }
    let id = next_block_id(block_id);
    if let Some(level) = p.style_id.as_deref().and_then(parse_heading_level) {
        blocks.push(Block::Heading(Heading {
            id,
            level,
            inlines: p.inlines,
            alignment: p.alignment,
        }));
    } else if let Some(list_type) = p.list_type {
        blocks.push(Block::List(List {
            id,
            items: vec![ListItem { inlines: p.inlines }],
            list_type,
            start_number: 1,
        }));
    } else {
        blocks.push(Block::Paragraph(Paragraph {
            id,
            inlines: p.inlines,
            alignment: p.alignment,
            ..Paragraph::default()
        }));
    }
}

fn push_table(tbl: TableBuilder, blocks: &mut Vec<Block>, block_id: &mut u64) {
    if tbl.rows.is_empty() {
        return;
    }
    let rows: Vec<TableRow> = tbl
        .rows
        .into_iter()
        .map(|row| TableRow {
            cells: row
                .into_iter()
                .map(|text| TableCell {
                    blocks: vec![Block::Paragraph(Paragraph::with_text(
                        next_block_id(block_id),
                        text,
                    ))],
                    rowspan: 1,
                    colspan: 1,
                    background: None,
                })
                .collect(),
        })
        .collect();

    let cols = rows.iter().map(|r| r.cells.len()).max().unwrap_or(1).max(1);
    blocks.push(Block::Table(Table {
        id: next_block_id(block_id),
        rows,
        column_widths: vec![1.0 / cols as f32; cols],
        borders: Default::default(),
        cell_padding: 6.0,
    }));
}

/// Word emits each list paragraph on its own; adjacent ones of the same kind
/// belong to one list.
fn coalesce_lists(blocks: &mut Vec<Block>) {
    let mut merged: Vec<Block> = Vec::with_capacity(blocks.len());
    for block in blocks.drain(..) {
        match (merged.last_mut(), block) {
            (Some(Block::List(prev)), Block::List(next))
                if prev.list_type == next.list_type =>
            {
                prev.items.extend(next.items);
            }
            (_, block) => merged.push(block),
        }
    }
    *blocks = merged;
}

struct ResolvedImage {
    bytes: Vec<u8>,
    mime: String,
    width: u32,
    height: u32,
}

impl From<ResolvedImage> for ImageData {
    fn from(img: ResolvedImage) -> Self {
        ImageData {
            bytes: img.bytes,
            mime: img.mime,
            width: img.width,
            height: img.height,
        }
    }
}

fn resolve_image(
    rel_id: &str,
    entries: &HashMap<String, Vec<u8>>,
    rels: &ParsedRels,
    content_types: &HashMap<String, String>,
) -> Option<ImageData> {
    let target = rels.target_by_id.get(rel_id)?;
    let normalized = if target.starts_with("word/") {
        target.to_string()
    } else {
        format!("word/{}", target.trim_start_matches("./"))
    };
    let bytes = entries.get(&normalized)?;
    let ext = normalized
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    let mime = content_types
        .get(&ext)
        .cloned()
        .unwrap_or_else(|| default_mime_for_ext(&ext).to_string());

    let (width, height) = {
        use image::GenericImageView;
        image::load_from_memory(bytes)
            .map(|decoded| decoded.dimensions())
            .unwrap_or((0, 0))
    };

    Some(
        ResolvedImage {
            bytes: bytes.clone(),
            mime,
            width,
            height,
        }
        .into(),
    )
}

fn parse_plain_text_runs(xml: &[u8]) -> String {
    let mut reader = Reader::from_reader(Cursor::new(xml));
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_text = false;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if local_name(e.local_name().as_ref()) == "t" {
                    in_text = true;
                }
            }
            Ok(Event::Text(t)) if in_text => {
                if let Ok(v) = t.decode() {
                    text.push_str(v.as_ref());
                    text.push(' ');
                }
            }
            Ok(Event::End(e)) => {
                if local_name(e.local_name().as_ref()) == "t" {
                    in_text = false;
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    text.trim().to_string()
}

fn parse_heading_level(style_id: &str) -> Option<u8> {
    let lower = style_id.to_ascii_lowercase();
    if let Some(num) = lower.strip_prefix("heading") {
        return num.parse::<u8>().ok().filter(|v| (1..=6).contains(v));
    }
    None
}

fn parse_docx_hex(value: &str) -> Option<crate::document::model::Color> {
    let hex = value.trim_start_matches('#');
    if hex.len() != 6 || hex.eq_ignore_ascii_case("auto") {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some(crate::document::model::Color::from_rgb8(r, g, b))
}

fn local_name(bytes: &[u8]) -> String {
    let full = std::str::from_utf8(bytes).unwrap_or_default();
    full.rsplit(':').next().unwrap_or(full).to_string()
}

fn attr_value(
    event: &BytesStart<'_>,
    key_suffix: &str,
    decoder: quick_xml::encoding::Decoder,
) -> Option<String> {
    event.attributes().flatten().find_map(|a| {
        let key = std::str::from_utf8(a.key.as_ref()).ok()?;
        if key.rsplit(':').next() == Some(key_suffix) {
            a.decode_and_unescape_value(decoder)
                .ok()
                .map(|v| v.to_string())
        } else {
            None
        }
    })
}

fn next_block_id(counter: &mut u64) -> BlockId {
    let id = *counter;
    *counter += 1;
    BlockId(id)
}

fn default_mime_for_ext(ext: &str) -> &'static str {
    match ext {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "bmp" => "image/bmp",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "tif" | "tiff" => "image/tiff",
        "emf" => "image/emf",
        "wmf" => "image/wmf",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

    fn build_docx(document_xml: &str) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = ZipWriter::new(&mut cursor);
            let options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
            writer.start_file("word/document.xml", options).unwrap();
            writer.write_all(document_xml.as_bytes()).unwrap();
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    fn wrap_body(body: &str) -> String {
        format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{body}</w:body></w:document>"
        )
    }

    #[test]
    fn bold_run_converts_to_markup() {
        let docx = build_docx(&wrap_body(
            "<w:p><w:r><w:rPr><w:b/></w:rPr><w:t>Hello</w:t></w:r></w:p>",
        ));
        let html = BundledDocxConverter.convert_to_html(&docx).unwrap();
        assert!(html.contains("<b>Hello</b>"), "got: {html}");
    }

    #[test]
    fn heading_style_maps_to_heading_tag() {
        let docx = build_docx(&wrap_body(
            "<w:p><w:pPr><w:pStyle w:val=\"Heading1\"/></w:pPr><w:r><w:t>Title</w:t></w:r></w:p>",
        ));
        let html = BundledDocxConverter.convert_to_html(&docx).unwrap();
        assert!(html.contains("<h1"), "got: {html}");
        assert!(html.contains("Title"));
    }

    #[test]
    fn table_cells_become_table_markup() {
        let docx = build_docx(&wrap_body(
            "<w:tbl><w:tr><w:tc><w:p><w:r><w:t>A1</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>B1</w:t></w:r></w:p></w:tc></w:tr></w:tbl>",
        ));
        let html = BundledDocxConverter.convert_to_html(&docx).unwrap();
        assert!(html.contains("<table"), "got: {html}");
        assert!(html.contains("A1") && html.contains("B1"));
    }

    #[test]
    fn consecutive_list_paragraphs_merge() {
        let body = "<w:p><w:pPr><w:numPr><w:ilvl w:val=\"0\"/></w:numPr></w:pPr><w:r><w:t>one</w:t></w:r></w:p>\
                    <w:p><w:pPr><w:numPr><w:ilvl w:val=\"0\"/></w:numPr></w:pPr><w:r><w:t>two</w:t></w:r></w:p>";
        let docx = build_docx(&wrap_body(body));
        let html = BundledDocxConverter.convert_to_html(&docx).unwrap();
        assert_eq!(html.matches("<ol").count(), 1, "got: {html}");
        assert_eq!(html.matches("<li>").count(), 2);
    }

    #[test]
    fn page_break_survives_conversion() {
        let docx = build_docx(&wrap_body(
            "<w:p><w:r><w:br w:type=\"page\"/></w:r><w:r><w:t>after</w:t></w:r></w:p>",
        ));
        let html = BundledDocxConverter.convert_to_html(&docx).unwrap();
        assert!(html.contains("page-break"), "got: {html}");
    }

    #[test]
    fn legacy_doc_bytes_are_rejected() {
        let mut bytes = vec![0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
        bytes.extend_from_slice(&[0u8; 64]);
        let err = BundledDocxConverter.convert_to_html(&bytes).unwrap_err();
        assert!(matches!(err, ConvertError::LegacyDocFormat));
    }

    #[test]
    fn archive_without_document_xml_is_malformed() {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = ZipWriter::new(&mut cursor);
            let options = SimpleFileOptions::default();
            writer.start_file("word/other.xml", options).unwrap();
            writer.write_all(b"<x/>").unwrap();
            writer.finish().unwrap();
        }
        let err = BundledDocxConverter
            .convert_to_html(&cursor.into_inner())
            .unwrap_err();
        assert!(matches!(err, ConvertError::Malformed(_)));
    }
}
