//! File ingestion pipeline.
//!
//! Rich-document files go through the [`DocxConverter`] seam and the returned
//! markup is normalized before it reaches the model; web markup, Markdown and
//! plain text are parsed in-process. Nothing here touches editor state: a
//! failed import returns an error and the caller keeps its current document.

use std::path::Path;

use thiserror::Error;

use crate::document::docx::{ConvertError, DocxConverter, is_legacy_doc};
use crate::document::html::parse_html;
use crate::document::markdown::markdown_to_blocks;
use crate::document::model::{Block, BorderStyle};
use crate::document::txt;
use crate::document::{SourceFormat, detect_format};

const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
const DEFAULT_CELL_PADDING: f32 = 6.0;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Convert(#[from] ConvertError),
    #[error("cannot import \"{0}\": unrecognized file format")]
    Unrecognized(String),
}

/// Parsed body of an imported file plus the format it was read as.
#[derive(Debug)]
pub struct ImportedContent {
    pub format: SourceFormat,
    pub blocks: Vec<Block>,
}

/// Reads a file into document blocks. The format comes from the extension
/// first and the leading bytes second, so renamed files still import.
pub fn import_file(
    filename: &str,
    bytes: &[u8],
    converter: &dyn DocxConverter,
) -> Result<ImportedContent, ImportError> {
    let format = resolve_format(filename, bytes);
    let blocks = match format {
        SourceFormat::Docx => {
            if is_legacy_doc(bytes) {
                return Err(ConvertError::LegacyDocFormat.into());
            }
            let markup = converter.convert_to_html(bytes)?;
            let mut blocks = parse_html(&markup);
            normalize_converted(&mut blocks);
            blocks
        }
        SourceFormat::Html => {
            let (text, _) = txt::decode_text(bytes);
            parse_html(&text)
        }
        SourceFormat::Markdown => {
            let (text, _) = txt::decode_text(bytes);
            markdown_to_blocks(&text)
        }
        SourceFormat::Text => txt::import_bytes(bytes).0,
        SourceFormat::Unknown => {
            return Err(ImportError::Unrecognized(filename.to_string()));
        }
    };
    Ok(ImportedContent { format, blocks })
}

/// Extension wins; unknown extensions fall back to sniffing the payload.
/// A docx is a zip archive, a legacy doc an OLE container, markup starts with
/// a tag, and anything that decodes as text imports as plain text.
fn resolve_format(filename: &str, bytes: &[u8]) -> SourceFormat {
    let by_extension = detect_format(Path::new(filename));
    if by_extension != SourceFormat::Unknown {
        return by_extension;
    }
    if bytes.starts_with(&ZIP_MAGIC) || is_legacy_doc(bytes) {
        return SourceFormat::Docx;
    }
    let (text, _) = txt::decode_text(bytes);
    if text.trim_start().starts_with('<') {
        SourceFormat::Html
    } else if looks_binary(&text) {
        SourceFormat::Unknown
    } else {
        SourceFormat::Text
    }
}

/// Control characters early in the decoded text mean the payload is some
/// binary format none of the parsers can make sense of.
fn looks_binary(text: &str) -> bool {
    text.chars()
        .take(512)
        .any(|c| c.is_control() && !matches!(c, '\t' | '\n' | '\r'))
}

/// Converters routinely hand back borderless tables with zero padding, which
/// render as invisible grids. Imported tables always get visible borders and
/// the editor's default cell padding.
fn normalize_converted(blocks: &mut [Block]) {
    for block in blocks {
        if let Block::Table(table) = block {
            for border in [
                &mut table.borders.outer,
                &mut table.borders.inner_horizontal,
                &mut table.borders.inner_vertical,
            ] {
                if border.width <= 0.0 {
                    *border = BorderStyle::default();
                }
            }
            if table.cell_padding <= 0.0 {
                table.cell_padding = DEFAULT_CELL_PADDING;
            }
            for row in &mut table.rows {
                for cell in &mut row.cells {
                    normalize_converted(&mut cell.blocks);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::model::{Table, TableCell, TableRow};

    /// Converter double that returns a canned markup string.
    struct FixedConverter(&'static str);

    impl DocxConverter for FixedConverter {
        fn convert_to_html(&self, _bytes: &[u8]) -> Result<String, ConvertError> {
            Ok(self.0.to_string())
        }
    }

    struct RefusingConverter;

    impl DocxConverter for RefusingConverter {
        fn convert_to_html(&self, _bytes: &[u8]) -> Result<String, ConvertError> {
            Err(ConvertError::Malformed("converter offline".into()))
        }
    }

    fn ole_bytes() -> Vec<u8> {
        let mut bytes = vec![0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
        bytes.extend_from_slice(&[0u8; 16]);
        bytes
    }

    #[test]
    fn plain_text_imports_as_paragraphs() {
        let imported = import_file("notes.txt", b"one\ntwo", &RefusingConverter).unwrap();
        assert_eq!(imported.format, SourceFormat::Text);
        assert_eq!(imported.blocks.len(), 2);
    }

    #[test]
    fn markup_imports_through_the_html_parser() {
        let imported =
            import_file("page.html", b"<p>Hello <b>there</b></p>", &RefusingConverter).unwrap();
        assert_eq!(imported.format, SourceFormat::Html);
        assert_eq!(imported.blocks.len(), 1);
        assert_eq!(imported.blocks[0].visible_text(), "Hello there");
    }

    #[test]
    fn markdown_imports_by_extension() {
        let imported = import_file("readme.md", b"# Title\n\nBody", &RefusingConverter).unwrap();
        assert_eq!(imported.format, SourceFormat::Markdown);
        assert!(matches!(imported.blocks[0], Block::Heading(_)));
    }

    #[test]
    fn legacy_doc_is_rejected_with_a_message() {
        let err = import_file("old.doc", &ole_bytes(), &RefusingConverter).unwrap_err();
        assert!(matches!(
            err,
            ImportError::Convert(ConvertError::LegacyDocFormat)
        ));
        assert!(err.to_string().contains("re-save the file as .docx"));
    }

    #[test]
    fn converter_errors_pass_through() {
        let err = import_file("letter.docx", b"PK\x03\x04junk", &RefusingConverter).unwrap_err();
        assert!(matches!(
            err,
            ImportError::Convert(ConvertError::Malformed(_))
        ));
    }

    #[test]
    fn converted_markup_is_parsed_and_normalized() {
        let markup = "<table style=\"border: 0\"><tr><td>cell</td></tr></table>";
        let imported = import_file("grid.docx", b"PK\x03\x04junk", &FixedConverter(markup)).unwrap();
        let Block::Table(table) = &imported.blocks[0] else {
            panic!("expected a table");
        };
        assert!(table.borders.outer.width > 0.0);
        assert!(table.cell_padding > 0.0);
    }

    #[test]
    fn unknown_extension_sniffs_the_payload() {
        let html = import_file("download.bin", b"  <div>hi</div>", &RefusingConverter).unwrap();
        assert_eq!(html.format, SourceFormat::Html);

        let text = import_file("download.bin", b"just words", &RefusingConverter).unwrap();
        assert_eq!(text.format, SourceFormat::Text);

        let zip = import_file("download.bin", b"PK\x03\x04junk", &FixedConverter("<p>x</p>"));
        assert_eq!(zip.unwrap().format, SourceFormat::Docx);

        let err = import_file("photo.bin", b"\x89PNG\r\n\x1a\n1234", &RefusingConverter);
        assert!(matches!(err, Err(ImportError::Unrecognized(_))));
    }

    #[test]
    fn nested_tables_are_normalized_too() {
        let inner = Table {
            cell_padding: 0.0,
            ..Default::default()
        };
        let mut outer = Table {
            cell_padding: 0.0,
            ..Default::default()
        };
        outer.rows.push(TableRow {
            cells: vec![TableCell {
                blocks: vec![Block::Table(inner)],
                rowspan: 1,
                colspan: 1,
                background: None,
            }],
        });
        let mut blocks = vec![Block::Table(outer)];
        normalize_converted(&mut blocks);
        let Block::Table(outer) = &blocks[0] else {
            panic!("expected a table");
        };
        assert!(outer.cell_padding > 0.0);
        let Block::Table(inner) = &outer.rows[0].cells[0].blocks[0] else {
            panic!("expected a nested table");
        };
        assert!(inner.cell_padding > 0.0);
    }
}
