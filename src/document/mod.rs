pub mod config;
pub mod docx;
pub mod html;
pub mod markdown;
pub mod model;
pub mod serialize;
pub mod txt;

use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceFormat {
    Docx,
    Html,
    Markdown,
    Text,
    Unknown,
}

pub fn detect_format(path: &Path) -> SourceFormat {
    match path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
    {
        Some(ext) if ext == "docx" || ext == "doc" => SourceFormat::Docx,
        Some(ext) if ext == "html" || ext == "htm" || ext == "xhtml" => SourceFormat::Html,
        Some(ext) if ext == "md" || ext == "markdown" => SourceFormat::Markdown,
        Some(ext) if ext == "txt" || ext == "text" || ext == "log" => SourceFormat::Text,
        _ => SourceFormat::Unknown,
    }
}
