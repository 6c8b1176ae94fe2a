mod convert;

pub use convert::BundledDocxConverter;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("legacy .doc files are not supported; re-save the file as .docx")]
    LegacyDocFormat,
    #[error("not a valid docx archive: {0}")]
    Archive(String),
    #[error("docx content is malformed: {0}")]
    Malformed(String),
}

/// Conversion seam for rich-document files. The import pipeline hands the raw
/// bytes to whatever converter the host supplies and normalizes the markup it
/// gets back; [`BundledDocxConverter`] reads the archive in-process.
pub trait DocxConverter {
    fn convert_to_html(&self, bytes: &[u8]) -> Result<String, ConvertError>;
}

/// OLE compound-file signature carried by legacy `.doc` files.
const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

pub fn is_legacy_doc(bytes: &[u8]) -> bool {
    bytes.starts_with(&OLE_MAGIC)
}
