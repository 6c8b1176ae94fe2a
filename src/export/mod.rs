//! File output pipeline.
//!
//! PDF is the only format that rasterizes: the body markup is rendered once
//! at high scale through the [`Rasterizer`] seam, sliced into per-page
//! bitmaps, and composed with the resolved header/footer bands at true page
//! dimensions. HTML, plain text, and the Word-namespaced wrapper are written
//! straight from the model.

pub mod pdf;
pub mod raster;

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::document::config::PageConfig;
use crate::document::html::{
    blocks_to_plain_text, print_body_html, standalone_html, word_wrapper_html,
};
use crate::document::model::Document;
use crate::editor::chrome::{ChromeState, ChromeZone};
use crate::export::pdf::PageRasters;
use crate::export::raster::{RASTER_SCALE, RasterCache, RasterKind, Rasterizer};
use crate::layout::PageLayout;

const CHROME_CACHE_ENTRIES: usize = 16;
const CHROME_CACHE_BYTES: usize = 32 * 1024 * 1024;
const DEFAULT_FILE_STEM: &str = "document";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("an export is already in progress")]
    Busy,
    #[error("rasterization failed: {0}")]
    Raster(String),
    #[error("pdf assembly failed: {0}")]
    Assembly(String),
    #[error("could not write \"{path}\": {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Pdf,
    Docx,
    Html,
    Txt,
}

impl ExportFormat {
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Pdf => ".pdf",
            Self::Docx => ".docx",
            Self::Html => ".html",
            Self::Txt => ".txt",
        }
    }

    pub const fn mime(self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            // Word opens the namespaced HTML wrapper under this type.
            Self::Docx => "application/msword",
            Self::Html => "text/html",
            Self::Txt => "text/plain",
        }
    }
}

/// Where a finished export goes. `Download` writes the file into a host
/// directory; `Blob` hands the bytes back without touching the filesystem.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExportDestination {
    #[default]
    Blob,
    Download {
        dir: PathBuf,
    },
}

#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub format: ExportFormat,
    pub filename: Option<String>,
    pub destination: ExportDestination,
}

impl ExportRequest {
    pub fn new(format: ExportFormat) -> Self {
        Self {
            format,
            filename: None,
            destination: ExportDestination::Blob,
        }
    }

    pub fn with_filename(format: ExportFormat, filename: impl Into<String>) -> Self {
        Self {
            format,
            filename: Some(filename.into()),
            destination: ExportDestination::Blob,
        }
    }

    pub fn download_to(mut self, dir: impl Into<PathBuf>) -> Self {
        self.destination = ExportDestination::Download { dir: dir.into() };
        self
    }
}

#[derive(Debug, Clone)]
pub enum ExportPayload {
    /// In-memory bytes for the host's blob machinery.
    Bytes(Vec<u8>),
    /// Path of the file written under the requested download directory.
    File(PathBuf),
}

/// Finished export the host hands to its download or blob machinery.
#[derive(Debug, Clone)]
pub struct ExportOutput {
    pub filename: String,
    pub mime: &'static str,
    pub payload: ExportPayload,
}

impl ExportOutput {
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            ExportPayload::Bytes(bytes) => Some(bytes),
            ExportPayload::File(_) => None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.payload {
            ExportPayload::File(path) => Some(path),
            ExportPayload::Bytes(_) => None,
        }
    }
}

pub type ExportResult = Result<ExportOutput, ExportError>;

/// Produces the requested payload from the current model. Reads only; a
/// failure partway through leaves no trace on the document.
pub fn export_document(
    document: &Document,
    config: &PageConfig,
    chrome: &ChromeState,
    layout: &PageLayout,
    rasterizer: &dyn Rasterizer,
    request: &ExportRequest,
) -> ExportResult {
    let filename = output_filename(request);
    let title = file_stem(&filename);

    let bytes = match request.format {
        ExportFormat::Pdf => export_pdf(document, config, chrome, layout, rasterizer)?,
        ExportFormat::Docx => word_wrapper_html(document, config, title).into_bytes(),
        ExportFormat::Html => standalone_html(document, config, title).into_bytes(),
        ExportFormat::Txt => blocks_to_plain_text(&document.blocks).into_bytes(),
    };

    let payload = match &request.destination {
        ExportDestination::Blob => ExportPayload::Bytes(bytes),
        ExportDestination::Download { dir } => {
            let path = dir.join(&filename);
            fs::write(&path, &bytes).map_err(|source| ExportError::Write {
                path: path.clone(),
                source,
            })?;
            log::debug!("export written to {}", path.display());
            ExportPayload::File(path)
        }
    };

    Ok(ExportOutput {
        filename,
        mime: request.format.mime(),
        payload,
    })
}

fn export_pdf(
    document: &Document,
    config: &PageConfig,
    chrome: &ChromeState,
    layout: &PageLayout,
    rasterizer: &dyn Rasterizer,
) -> Result<Vec<u8>, ExportError> {
    let page_total = layout.page_count.max(1);
    let content_w = scaled(config.content_width());
    let content_h = scaled(config.content_height());

    let body_html = print_body_html(document, config);
    let body = rasterizer.rasterize(
        &body_html,
        content_w,
        content_h.saturating_mul(page_total as u32),
        RasterKind::Body,
    )?;
    let slices = raster::slice_pages(&body, content_h, page_total);

    let header_h = scaled(config.margins.top);
    let footer_h = scaled(config.margins.bottom);
    let mut cache = RasterCache::with_capacity(CHROME_CACHE_ENTRIES, CHROME_CACHE_BYTES);

    let mut pages = Vec::with_capacity(page_total);
    for (index, body_slice) in slices.into_iter().enumerate() {
        let number = index + 1;
        let header = chrome_band(
            &mut cache,
            rasterizer,
            chrome,
            ChromeZone::Header,
            number,
            page_total,
            config,
            content_w,
            header_h,
        )?;
        let footer = chrome_band(
            &mut cache,
            rasterizer,
            chrome,
            ChromeZone::Footer,
            number,
            page_total,
            config,
            content_w,
            footer_h,
        )?;
        pages.push(PageRasters {
            body: body_slice,
            header,
            footer,
        });
    }

    pdf::compose_pdf(&pages, config)
}

/// Resolves one chrome band for one page and rasterizes it through the memo
/// table, so pages sharing a variant reuse the same bitmap. Empty markup
/// means no band on that page.
#[allow(clippy::too_many_arguments)]
fn chrome_band(
    cache: &mut RasterCache,
    rasterizer: &dyn Rasterizer,
    chrome: &ChromeState,
    zone: ChromeZone,
    page_number: usize,
    page_total: usize,
    config: &PageConfig,
    width: u32,
    height: u32,
) -> Result<Option<image::RgbaImage>, ExportError> {
    let resolved = chrome.resolved_for_page(zone, page_number, page_total, config);
    if resolved.trim().is_empty() || height == 0 {
        return Ok(None);
    }
    let kind = match zone {
        ChromeZone::Header => RasterKind::Header,
        ChromeZone::Footer => RasterKind::Footer,
    };
    cache
        .render(rasterizer, &resolved, width, height, kind)
        .map(Some)
}

fn scaled(px: f32) -> u32 {
    (px * RASTER_SCALE).round().max(1.0) as u32
}

fn output_filename(request: &ExportRequest) -> String {
    let stem = request
        .filename
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_FILE_STEM);
    let extension = request.format.extension();
    if stem.to_ascii_lowercase().ends_with(extension) {
        stem.to_string()
    } else {
        format!("{stem}{extension}")
    }
}

fn file_stem(filename: &str) -> &str {
    filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(filename)
}
