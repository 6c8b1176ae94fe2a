//! Paginated rich-document editing core.
//!
//! The crate is headless: it owns the document model, pagination, headers
//! and footers, history, autocomplete, serialization, import and export,
//! and leaves rendering, input handling and timers to the embedding host.
//! [`Editor`] is the entry point; hosts construct it with [`EditorOptions`]
//! and an [`EditorEvents`] sink, drive it through its imperative methods,
//! and render from the state it exposes.
//!
//! Layout is expressed through the [`layout::BlockMeasurer`] seam and raster
//! output through [`export::raster::Rasterizer`], so the same core runs
//! against a real text stack or the bundled heuristics in tests.

pub mod document;
pub mod editor;
pub mod export;
pub mod import;
pub mod layout;

pub use document::SourceFormat;
pub use document::config::{
    DatabaseField, DatabaseTable, EditorOptions, MarginPreset, Margins, Orientation, PageConfig,
    PageSizeId, QuickText, StyleDefaults, Watermark,
};
pub use document::docx::{BundledDocxConverter, ConvertError, DocxConverter};
pub use document::model::{Block, BlockId, Chip, Color, Document, ImageBlock, Inline, Run};
pub use document::serialize::{ChromeContent, Marker, SerializedDocument};
pub use editor::autocomplete::SuggestionItem;
pub use editor::chrome::{ChromeVariant, ChromeZone};
pub use editor::commands::FormatCommand;
pub use editor::cursor::{CursorPosition, SelectionRange};
pub use editor::stats::WordStats;
pub use editor::{Editor, EditorEvents};
pub use export::raster::{RasterKind, Rasterizer};
pub use export::{
    ExportDestination, ExportError, ExportFormat, ExportOutput, ExportPayload, ExportRequest,
    ExportResult,
};
pub use import::{ImportError, ImportedContent};
pub use layout::{BlockMeasurer, HeuristicMeasurer, PageLayout, PageSpacer};
