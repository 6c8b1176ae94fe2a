//! Editor state and the host-facing facade.
//!
//! [`Editor`] owns the document, page configuration, chrome, history, cursor
//! and autocomplete state, and exposes the imperative surface hosts drive:
//! content get/set, formatting, insertion, chrome edit sessions, undo/redo,
//! import and export. Every committed mutation repaginates, recomputes stats
//! and notifies the host through [`EditorEvents`].

pub mod autocomplete;
pub mod chrome;
pub mod commands;
pub mod cursor;
pub mod history;
pub mod stats;

use std::path::Path;
use std::time::Instant;

use chrono::Utc;

use crate::document::SourceFormat;
use crate::document::config::{
    DatabaseTable, EditorOptions, MarginPreset, Margins, Orientation, PageConfig, PageSizeId,
    QuickText, StyleDefaults, Watermark, clamp_zoom,
};
use crate::document::docx::{BundledDocxConverter, DocxConverter};
use crate::document::html::{blocks_to_html, blocks_to_plain_text, parse_html};
use crate::document::model::{
    Block, BlockId, Chip, Color, Document, ImageBlock, Inline, Paragraph, QrPayload, TextWrap,
    empty_table,
};
use crate::document::serialize::{ChromeContent, SerializedDocument, serialize_state};
use crate::editor::autocomplete::{AutocompleteState, Confirmation, SuggestionItem};
use crate::editor::chrome::{ChromeState, ChromeZone, placeholders_to_chips};
use crate::editor::commands::{FormatCommand, apply_format, delete_span, insert_text_at};
use crate::editor::cursor::{CursorPosition, CursorState, SelectionRange};
use crate::editor::history::{DocSnapshot, History};
use crate::editor::stats::{WordStats, compute_stats};
use crate::export::raster::Rasterizer;
use crate::export::{ExportError, ExportRequest, ExportResult, export_document};
use crate::import::{ImportError, import_file};
use crate::layout::{BlockMeasurer, HeuristicMeasurer, PageLayout, paginate};

/// Notifications the core pushes to its host. All methods default to no-ops
/// so a host only implements what it listens to.
pub trait EditorEvents {
    /// Body markup after every committed mutation.
    fn on_change(&mut self, _html: &str) {}
    /// Fresh statistics after every layout recomputation.
    fn on_stats(&mut self, _stats: &WordStats) {}
    /// Fired exactly once, when construction finishes.
    fn on_ready(&mut self) {}
}

/// Silent host for headless use.
impl EditorEvents for () {}

pub struct Editor {
    document: Document,
    config: PageConfig,
    chrome: ChromeState,
    history: History,
    cursor: CursorState,
    autocomplete: AutocompleteState,
    layout: PageLayout,
    stats: WordStats,
    database: Vec<DatabaseTable>,
    quick_texts: Vec<QuickText>,
    defaults: StyleDefaults,
    measurer: Box<dyn BlockMeasurer>,
    converter: Box<dyn DocxConverter>,
    events: Box<dyn EditorEvents>,
    zoom: u16,
    active_tab: usize,
    read_only: bool,
    dark_mode: bool,
    is_exporting: bool,
    epoch: Instant,
}

impl Editor {
    pub fn new(options: EditorOptions, events: Box<dyn EditorEvents>) -> Self {
        Self::with_measurer(options, events, Box::new(HeuristicMeasurer::default()))
    }

    /// Construction with an explicit measurement seam. `on_ready` fires once
    /// everything below it (layout, stats, history seed) is in place.
    pub fn with_measurer(
        options: EditorOptions,
        events: Box<dyn EditorEvents>,
        measurer: Box<dyn BlockMeasurer>,
    ) -> Self {
        let document = match options.initial_content.as_deref() {
            Some(html) if !html.trim().is_empty() => Document::with_blocks(parse_html(html)),
            _ => empty_document(),
        };
        let mut editor = Self {
            document,
            config: options.page_config,
            chrome: ChromeState::default(),
            history: History::default(),
            cursor: CursorState::default(),
            autocomplete: AutocompleteState::default(),
            layout: PageLayout::single_page(),
            stats: WordStats::default(),
            database: options.database,
            quick_texts: options.quick_texts,
            defaults: StyleDefaults::default(),
            measurer,
            converter: Box::new(BundledDocxConverter),
            events,
            zoom: 100,
            active_tab: 0,
            read_only: options.read_only,
            dark_mode: options.dark_mode,
            is_exporting: false,
            epoch: Instant::now(),
        };
        editor.ensure_nonempty_body();
        editor.reset_caret();
        editor.refresh_layout();
        let now = editor.now_ms();
        let seed = editor.take_snapshot();
        editor.history.init(seed, now);
        editor.events.on_ready();
        editor
    }

    pub fn set_converter(&mut self, converter: Box<dyn DocxConverter>) {
        self.converter = converter;
    }

    // ---- content ----------------------------------------------------------

    pub fn html(&self) -> String {
        blocks_to_html(&self.document.blocks)
    }

    pub fn set_html(&mut self, html: &str) {
        self.document.blocks = parse_html(html);
        self.ensure_nonempty_body();
        self.reset_caret();
        self.commit(false);
    }

    pub fn text(&self) -> String {
        blocks_to_plain_text(&self.document.blocks)
    }

    pub fn serialize(&self) -> SerializedDocument {
        serialize_state(
            &self.document.blocks,
            &self.config,
            &self.chrome.snapshot(),
            &self.database,
            &self.quick_texts,
        )
    }

    /// Replaces the whole editor state from a persisted document and starts a
    /// fresh history, exactly like constructing over that content.
    pub fn load_serialized(&mut self, state: &SerializedDocument) {
        self.document.blocks = parse_html(&state.html);
        self.ensure_nonempty_body();
        self.config = state.page_config.config.clone();
        self.chrome.restore(&state.page_config.chrome);
        self.database = state.db_models.clone();
        self.quick_texts = state.quick_texts.clone();
        self.reset_caret();
        self.refresh_layout();
        let now = self.now_ms();
        let seed = self.take_snapshot();
        self.history.init(seed, now);
        let html = self.html();
        self.events.on_change(&html);
    }

    pub fn clear(&mut self) {
        if self.read_only {
            return;
        }
        self.document.blocks.clear();
        self.ensure_nonempty_body();
        self.reset_caret();
        self.commit(false);
    }

    // ---- history ----------------------------------------------------------

    pub fn undo(&mut self) -> bool {
        if self.read_only {
            return false;
        }
        match self.history.undo() {
            Some(snapshot) => {
                self.restore_snapshot(snapshot);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        if self.read_only {
            return false;
        }
        match self.history.redo() {
            Some(snapshot) => {
                self.restore_snapshot(snapshot);
                true
            }
            None => false,
        }
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    // ---- catalogs ---------------------------------------------------------

    pub fn set_database_schema(&mut self, tables: Vec<DatabaseTable>) {
        self.database = tables;
    }

    pub fn set_quick_texts(&mut self, quick_texts: Vec<QuickText>) {
        self.quick_texts = quick_texts;
    }

    // ---- cursor -----------------------------------------------------------

    pub fn set_caret(&mut self, block_id: BlockId, offset: usize) {
        self.cursor.set_caret(CursorPosition { block_id, offset });
    }

    pub fn set_selection(&mut self, start: CursorPosition, end: CursorPosition) {
        self.cursor.set_selection(start, end);
    }

    pub fn caret(&self) -> CursorPosition {
        self.cursor.position
    }

    pub fn selection(&self) -> Option<SelectionRange> {
        self.cursor.selection
    }

    /// The host calls this when focus leaves the editing surface, typically
    /// because a toolbar control was clicked. The live selection collapses
    /// but is remembered so the next formatting command can restore it; an
    /// open suggestion popup is dismissed.
    pub fn notify_focus_lost(&mut self) {
        self.cursor.remember_active();
        self.cursor.clear_selection();
        self.autocomplete.dismiss();
    }

    // ---- formatting -------------------------------------------------------

    /// Applies a formatting command to the live selection, falling back to
    /// the selection remembered across focus loss. With neither, this is a
    /// silent no-op.
    pub fn format(&mut self, command: &FormatCommand) -> bool {
        if self.read_only {
            return false;
        }
        let Some(range) = self.cursor.take_for_command() else {
            return false;
        };
        if !apply_format(&mut self.document, range, command) {
            return false;
        }
        self.commit(false);
        true
    }

    // ---- editing ----------------------------------------------------------

    /// Inserts text at the caret, replacing any active selection. Keystroke
    /// grade: bursts coalesce into one history step.
    pub fn insert_text(&mut self, text: &str) -> bool {
        if self.read_only || text.is_empty() {
            return false;
        }
        let had_selection = self.cursor.selection.is_some();
        let Some(caret) = self.collapse_selection() else {
            return false;
        };
        let fresh_style = self.defaults.run_style();
        match self
            .document
            .find_block_mut(caret.block_id)
            .and_then(Block::inlines_mut)
        {
            Some(inlines) => {
                let len: usize = inlines.iter().map(Inline::char_len).sum();
                let offset = caret.offset.min(len);
                // In an empty context there is no neighbour to inherit from;
                // the toolbar's resting defaults apply instead.
                let style = inlines.is_empty().then_some(&fresh_style);
                insert_text_at(inlines, offset, text, style);
                self.cursor.set_caret(CursorPosition {
                    block_id: caret.block_id,
                    offset: offset + text.chars().count(),
                });
            }
            // The landing block cannot take text. A deleted selection still
            // has to commit.
            None if had_selection => {
                self.commit(true);
                return false;
            }
            None => return false,
        }
        self.commit(true);
        self.autocomplete_refresh();
        true
    }

    /// Deletes the selection, or the character before the caret.
    pub fn delete_backward(&mut self) -> bool {
        if self.read_only {
            return false;
        }
        if let Some(range) = self.cursor.selection {
            let Some(caret) = self.delete_selection(range) else {
                return false;
            };
            self.cursor.set_caret(caret);
        } else {
            let caret = self.cursor.position;
            if caret.offset == 0 {
                return false;
            }
            let Some(inlines) = self
                .document
                .find_block_mut(caret.block_id)
                .and_then(Block::inlines_mut)
            else {
                return false;
            };
            delete_span(inlines, caret.offset - 1, caret.offset);
            self.cursor.set_caret(CursorPosition {
                block_id: caret.block_id,
                offset: caret.offset - 1,
            });
        }
        self.commit(true);
        self.autocomplete_refresh();
        true
    }

    /// Inserts a data-bound variable chip at the caret (the Insert menu path;
    /// the autocomplete arrives at the same chip through its own confirm).
    pub fn insert_variable(&mut self, table: &str, field: &str) -> bool {
        self.insert_inline(Inline::Chip(Chip::variable(table, field)))
    }

    pub fn insert_table(&mut self, rows: usize, cols: usize) -> bool {
        let id = self.document.next_block_id();
        self.insert_block(Block::Table(empty_table(id, rows, cols)))
    }

    pub fn insert_image(&mut self, mut image: ImageBlock) -> bool {
        image.id = self.document.next_block_id();
        self.insert_block(Block::Image(image))
    }

    /// Inserts a QR component. The core stores the payload; the rasterizer
    /// renders the matrix at export time.
    pub fn insert_qr_code(&mut self, data: &str, size: f32) -> bool {
        let size = size.max(16.0);
        let image = ImageBlock {
            id: self.document.next_block_id(),
            alt_text: "QR code".to_string(),
            width: size,
            height: size,
            wrap: TextWrap::Inline,
            qr: Some(QrPayload {
                data: data.to_string(),
                module_size: size / 29.0,
            }),
            ..Default::default()
        };
        self.insert_block(Block::Image(image))
    }

    pub fn insert_page_break(&mut self) -> bool {
        self.insert_block(Block::PageBreak)
    }

    pub fn insert_horizontal_rule(&mut self) -> bool {
        self.insert_block(Block::HorizontalRule)
    }

    /// Inserts a block after the caret's block and moves the caret into it
    /// when it is addressable.
    pub fn insert_block(&mut self, block: Block) -> bool {
        if self.read_only {
            return false;
        }
        let index = self
            .document
            .block_index(self.cursor.position.block_id)
            .map(|i| i + 1)
            .unwrap_or(self.document.blocks.len());
        let target = block.id();
        self.document.blocks.insert(index, block);
        if let Some(id) = target {
            self.cursor.set_caret(CursorPosition {
                block_id: id,
                offset: 0,
            });
        }
        self.commit(false);
        true
    }

    fn insert_inline(&mut self, inline: Inline) -> bool {
        if self.read_only {
            return false;
        }
        let had_selection = self.cursor.selection.is_some();
        let Some(caret) = self.collapse_selection() else {
            return false;
        };
        match self
            .document
            .find_block_mut(caret.block_id)
            .and_then(Block::inlines_mut)
        {
            Some(inlines) => {
                let len: usize = inlines.iter().map(Inline::char_len).sum();
                let offset = caret.offset.min(len);
                let advance = inline.char_len();
                commands::insert_inline_at(inlines, offset, inline);
                self.cursor.set_caret(CursorPosition {
                    block_id: caret.block_id,
                    offset: offset + advance,
                });
            }
            None if had_selection => {
                self.commit(false);
                return false;
            }
            None => return false,
        }
        self.commit(false);
        true
    }

    // ---- autocomplete -----------------------------------------------------

    /// Re-scans the text before the caret and rebuilds the suggestion popup.
    /// Called internally after every text mutation; hosts call it when they
    /// move the caret themselves.
    pub fn autocomplete_refresh(&mut self) -> bool {
        let text = self.text_before_caret();
        self.autocomplete
            .refresh(&text, &self.database, &self.quick_texts)
    }

    pub fn autocomplete_is_open(&self) -> bool {
        self.autocomplete.is_open()
    }

    pub fn autocomplete_items(&self) -> &[SuggestionItem] {
        self.autocomplete.items()
    }

    pub fn autocomplete_selected(&self) -> usize {
        self.autocomplete.selected()
    }

    pub fn autocomplete_next(&mut self) {
        self.autocomplete.select_next();
    }

    pub fn autocomplete_prev(&mut self) {
        self.autocomplete.select_prev();
    }

    pub fn autocomplete_dismiss(&mut self) {
        self.autocomplete.dismiss();
    }

    /// Confirms the highlighted suggestion and applies its insertion at the
    /// caret. A confirmed table name re-opens the popup in field phase.
    pub fn autocomplete_confirm(&mut self) -> bool {
        if self.read_only {
            return false;
        }
        let Some(confirmation) = self.autocomplete.confirm() else {
            return false;
        };
        let caret = self.cursor.position;
        match confirmation {
            Confirmation::InsertText {
                replace_chars,
                text,
            } => {
                let Some(start) =
                    self.replace_before_caret(caret, replace_chars, |inlines, start| {
                        insert_text_at(inlines, start, &text, None);
                    })
                else {
                    return false;
                };
                self.cursor.set_caret(CursorPosition {
                    block_id: caret.block_id,
                    offset: start + text.chars().count(),
                });
                self.commit(true);
                self.autocomplete_refresh();
            }
            Confirmation::InsertChip {
                replace_chars,
                chip,
            } => {
                let Some(start) =
                    self.replace_before_caret(caret, replace_chars, |inlines, start| {
                        commands::insert_inline_at(inlines, start, Inline::Chip(chip));
                    })
                else {
                    return false;
                };
                self.cursor.set_caret(CursorPosition {
                    block_id: caret.block_id,
                    offset: start + 1,
                });
                self.commit(false);
            }
            Confirmation::InsertMarkup {
                replace_chars,
                markup,
            } => {
                let mut blocks = parse_html(&markup);
                let mut next = self.document.next_block_id().0;
                renumber_blocks(&mut blocks, &mut next);
                if let [Block::Paragraph(paragraph)] = &mut blocks[..] {
                    // A single-paragraph snippet splices into the current line.
                    let spliced = std::mem::take(&mut paragraph.inlines);
                    let count: usize = spliced.iter().map(Inline::char_len).sum();
                    let Some(start) =
                        self.replace_before_caret(caret, replace_chars, |inlines, start| {
                            let index = commands::split_inlines_at(inlines, start);
                            for (k, inline) in spliced.into_iter().enumerate() {
                                inlines.insert(index + k, inline);
                            }
                            commands::merge_adjacent_runs(inlines);
                        })
                    else {
                        return false;
                    };
                    self.cursor.set_caret(CursorPosition {
                        block_id: caret.block_id,
                        offset: start + count,
                    });
                } else {
                    if self
                        .replace_before_caret(caret, replace_chars, |_, _| {})
                        .is_none()
                    {
                        return false;
                    }
                    let index = self
                        .document
                        .block_index(caret.block_id)
                        .map(|i| i + 1)
                        .unwrap_or(self.document.blocks.len());
                    let landing = blocks.iter().rev().find_map(Block::id);
                    self.document.blocks.splice(index..index, blocks);
                    if let Some(id) = landing {
                        self.cursor.set_caret(CursorPosition {
                            block_id: id,
                            offset: 0,
                        });
                    }
                }
                self.commit(false);
            }
        }
        true
    }

    // ---- chrome -----------------------------------------------------------

    /// Opens an edit session on a header or footer zone and returns the
    /// chip-form markup the host surface should display. A session already
    /// open on the other zone commits unchanged first, so no exit path can
    /// drop content.
    pub fn enter_chrome_edit(&mut self, zone: ChromeZone) -> Option<String> {
        if self.read_only {
            return None;
        }
        if let Some(open) = self.chrome.editing() {
            if open != zone {
                let unchanged = self.chrome.enter_edit(open, &self.config);
                self.chrome.commit_edit(&unchanged, &self.config);
            }
        }
        Some(self.chrome.enter_edit(zone, &self.config))
    }

    /// Commits the open chrome session from the host's surface markup.
    /// Outside click, Escape and the explicit close control all funnel here.
    pub fn close_chrome_editor(&mut self, surface_html: &str) -> bool {
        if self.chrome.commit_edit(surface_html, &self.config).is_none() {
            return false;
        }
        self.commit(false);
        true
    }

    /// Drag-and-drop onto the top or bottom margin band: activates the zone's
    /// edit session if needed, appends the dropped markup, and returns the
    /// updated surface for the host to display. The session stays open.
    pub fn drop_on_margin_band(&mut self, zone: ChromeZone, markup: &str) -> Option<String> {
        let surface = self.enter_chrome_edit(zone)?;
        Some(format!("{surface}{}", placeholders_to_chips(markup)))
    }

    pub fn chrome_editing(&self) -> Option<ChromeZone> {
        self.chrome.editing()
    }

    /// Chrome markup for one page with the counters substituted, for the
    /// host's page preview.
    pub fn chrome_for_page(&self, zone: ChromeZone, page_number: usize) -> String {
        self.chrome
            .resolved_for_page(zone, page_number, self.layout.page_count, &self.config)
    }

    /// Restores persisted chrome content wholesale, without a history step.
    pub fn restore_chrome(&mut self, content: &ChromeContent) {
        self.chrome.restore(content);
    }

    // ---- page setup -------------------------------------------------------

    pub fn set_margins(&mut self, margins: Margins) {
        self.config.set_margins(margins);
        self.refresh_layout();
    }

    pub fn set_margin_preset(&mut self, preset: MarginPreset) {
        self.set_margins(Margins::preset(preset));
    }

    pub fn set_page_size(&mut self, size: PageSizeId) {
        self.config.size = size;
        self.reclamp_margins();
        self.refresh_layout();
    }

    pub fn set_orientation(&mut self, orientation: Orientation) {
        self.config.orientation = orientation;
        self.reclamp_margins();
        self.refresh_layout();
    }

    pub fn set_columns(&mut self, columns: u8) {
        self.config.set_columns(columns);
        self.refresh_layout();
    }

    pub fn set_page_background(&mut self, color: Option<Color>) {
        self.config.background = color;
    }

    pub fn set_watermark(&mut self, watermark: Option<Watermark>) {
        self.config.set_watermark(watermark);
    }

    pub fn set_first_page_different(&mut self, enabled: bool) {
        self.config.first_page_different = enabled;
    }

    pub fn set_even_odd_different(&mut self, enabled: bool) {
        self.config.even_odd_different = enabled;
    }

    /// Zoom scales the rendered surface; heights are measured at 100%, so
    /// the layout is re-derived but lands unchanged. Returns the clamped
    /// value actually applied.
    pub fn set_zoom(&mut self, zoom: u16) -> u16 {
        self.zoom = clamp_zoom(zoom);
        self.refresh_layout();
        self.zoom
    }

    pub fn zoom(&self) -> u16 {
        self.zoom
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn set_dark_mode(&mut self, dark_mode: bool) {
        self.dark_mode = dark_mode;
    }

    pub fn dark_mode(&self) -> bool {
        self.dark_mode
    }

    /// Toolbar resting style state; applied to text typed where nothing can
    /// be inherited.
    pub fn set_style_defaults(&mut self, defaults: StyleDefaults) {
        self.defaults = defaults;
    }

    pub fn style_defaults(&self) -> &StyleDefaults {
        &self.defaults
    }

    /// Which host toolbar tab is active. Presentation state only; tracked so
    /// an embedding can round-trip its session.
    pub fn set_active_tab(&mut self, tab: usize) {
        self.active_tab = tab;
    }

    pub fn active_tab(&self) -> usize {
        self.active_tab
    }

    // ---- layout & stats ---------------------------------------------------

    /// Recomputes pagination and statistics from the current content. Pure
    /// and idempotent, so it doubles as the repair hook for hosts that
    /// suspect their rendered state drifted.
    pub fn refresh_layout(&mut self) {
        self.layout = paginate(&self.document, &self.config, self.measurer.as_ref());
        self.stats = compute_stats(
            &self.document,
            &self.layout,
            self.measurer.as_ref(),
            self.config.column_width(),
        );
        let stats = self.stats;
        self.events.on_stats(&stats);
    }

    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }

    pub fn page_count(&self) -> usize {
        self.layout.page_count
    }

    pub fn stats(&self) -> WordStats {
        self.stats
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn config(&self) -> &PageConfig {
        &self.config
    }

    // ---- import & export --------------------------------------------------

    /// Produces an export payload from the current model. Guarded against
    /// re-entrancy; the busy flag clears on every path out.
    pub fn export(&mut self, request: &ExportRequest, rasterizer: &dyn Rasterizer) -> ExportResult {
        if self.is_exporting {
            return Err(ExportError::Busy);
        }
        self.is_exporting = true;
        let result = export_document(
            &self.document,
            &self.config,
            &self.chrome,
            &self.layout,
            rasterizer,
            request,
        );
        self.is_exporting = false;
        if let Err(err) = &result {
            log::warn!("export failed: {err}");
        }
        result
    }

    pub fn is_exporting(&self) -> bool {
        self.is_exporting
    }

    /// Replaces the document with an imported file. On failure the current
    /// content stays untouched; success pushes a history step.
    pub fn import_bytes(
        &mut self,
        filename: &str,
        bytes: &[u8],
    ) -> Result<SourceFormat, ImportError> {
        let imported = import_file(filename, bytes, self.converter.as_ref())?;
        self.document.blocks = imported.blocks;
        self.ensure_nonempty_body();
        self.document.metadata.title = Path::new(filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(filename)
            .to_string();
        self.document.metadata.format = imported.format;
        self.document.metadata.source_path = Some(filename.into());
        self.document.metadata.modified = Some(Utc::now());
        self.reset_caret();
        self.commit(false);
        Ok(imported.format)
    }

    // ---- internals --------------------------------------------------------

    fn now_ms(&self) -> u128 {
        self.epoch.elapsed().as_millis()
    }

    fn take_snapshot(&self) -> DocSnapshot {
        let chrome = self.chrome.snapshot();
        DocSnapshot {
            body: blocks_to_html(&self.document.blocks),
            header: chrome.header,
            footer: chrome.footer,
            first_page_header: chrome.first_page_header,
            first_page_footer: chrome.first_page_footer,
            even_page_header: chrome.even_page_header,
            even_page_footer: chrome.even_page_footer,
        }
    }

    fn restore_snapshot(&mut self, snapshot: DocSnapshot) {
        self.document.blocks = parse_html(&snapshot.body);
        self.ensure_nonempty_body();
        self.chrome.restore(&ChromeContent {
            header: snapshot.header,
            footer: snapshot.footer,
            first_page_header: snapshot.first_page_header,
            first_page_footer: snapshot.first_page_footer,
            even_page_header: snapshot.even_page_header,
            even_page_footer: snapshot.even_page_footer,
        });
        self.reset_caret();
        self.refresh_layout();
        let html = self.html();
        self.events.on_change(&html);
    }

    /// Layout, stats, history, notification: the tail of every mutation.
    fn commit(&mut self, debounced: bool) {
        self.refresh_layout();
        let now = self.now_ms();
        let snapshot = self.take_snapshot();
        if debounced {
            self.history.push_debounced(snapshot, now);
        } else {
            self.history.push(snapshot, now);
        }
        let html = self.html();
        self.events.on_change(&html);
    }

    /// The body always holds at least one paragraph so the caret has a home.
    fn ensure_nonempty_body(&mut self) {
        if self.document.blocks.is_empty() {
            self.document
                .blocks
                .push(Block::Paragraph(Paragraph::with_text(BlockId(1), "")));
        }
    }

    fn reset_caret(&mut self) {
        self.cursor.clear_selection();
        self.cursor.remembered = None;
        self.autocomplete.dismiss();
        if let Some(id) = self.document.blocks.iter().find_map(Block::id) {
            self.cursor.set_caret(CursorPosition {
                block_id: id,
                offset: 0,
            });
        }
    }

    /// Resolves where an insertion lands: the caret, or the start of the
    /// active selection after deleting it.
    fn collapse_selection(&mut self) -> Option<CursorPosition> {
        match self.cursor.selection {
            Some(range) => {
                let caret = self.delete_selection(range)?;
                self.cursor.set_caret(caret);
                Some(caret)
            }
            None => Some(self.cursor.position),
        }
    }

    /// Removes the selected content. Within one block this is a span delete;
    /// across blocks the tail of the end block is spliced onto the start
    /// block and the blocks in between are dropped.
    fn delete_selection(&mut self, range: SelectionRange) -> Option<CursorPosition> {
        let range = commands::normalize_selection(&self.document, range)?;
        if range.is_caret() {
            return Some(range.start);
        }
        if range.start.block_id == range.end.block_id {
            if let Some(inlines) = self
                .document
                .find_block_mut(range.start.block_id)
                .and_then(Block::inlines_mut)
            {
                delete_span(inlines, range.start.offset, range.end.offset);
            }
            return Some(range.start);
        }
        let start_index = self.document.block_index(range.start.block_id)?;
        let end_index = self.document.block_index(range.end.block_id)?;
        let tail: Vec<Inline> = match self
            .document
            .find_block_mut(range.end.block_id)
            .and_then(Block::inlines_mut)
        {
            Some(inlines) => {
                delete_span(inlines, 0, range.end.offset);
                inlines.drain(..).collect()
            }
            None => Vec::new(),
        };
        if let Some(inlines) = self
            .document
            .find_block_mut(range.start.block_id)
            .and_then(Block::inlines_mut)
        {
            let len: usize = inlines.iter().map(Inline::char_len).sum();
            delete_span(inlines, range.start.offset, len);
            inlines.extend(tail);
            commands::merge_adjacent_runs(inlines);
        }
        self.document.blocks.drain(start_index + 1..=end_index);
        Some(range.start)
    }

    /// Deletes `chars` characters ending at the caret and lets `insert` place
    /// the replacement at the resulting offset, which is returned.
    fn replace_before_caret<F>(
        &mut self,
        caret: CursorPosition,
        chars: usize,
        insert: F,
    ) -> Option<usize>
    where
        F: FnOnce(&mut Vec<Inline>, usize),
    {
        let inlines = self
            .document
            .find_block_mut(caret.block_id)
            .and_then(Block::inlines_mut)?;
        let len: usize = inlines.iter().map(Inline::char_len).sum();
        let end = caret.offset.min(len);
        let start = end.saturating_sub(chars);
        delete_span(inlines, start, end);
        insert(inlines, start);
        Some(start)
    }

    /// Text of the run the caret sits in, up to the caret. Chips and block
    /// boundaries end the scan, so trigger sequences never span inline
    /// elements.
    fn text_before_caret(&self) -> String {
        let caret = self.cursor.position;
        let Some(inlines) = self
            .document
            .find_block(caret.block_id)
            .and_then(Block::inlines)
        else {
            return String::new();
        };
        let mut cursor = 0usize;
        for inline in inlines {
            let len = inline.char_len();
            if caret.offset <= cursor + len {
                return match inline {
                    Inline::Run(run) => run.text.chars().take(caret.offset - cursor).collect(),
                    Inline::Chip(_) => String::new(),
                };
            }
            cursor += len;
        }
        String::new()
    }

    fn reclamp_margins(&mut self) {
        let margins = self.config.margins;
        self.config.set_margins(margins);
    }
}

fn empty_document() -> Document {
    Document::with_blocks(vec![Block::Paragraph(Paragraph::with_text(BlockId(1), ""))])
}

/// Re-ids parsed blocks so spliced content never collides with ids already
/// present in the document.
fn renumber_blocks(blocks: &mut [Block], next: &mut u64) {
    for block in blocks {
        match block {
            Block::Paragraph(p) => {
                p.id = BlockId(*next);
                *next += 1;
            }
            Block::Heading(h) => {
                h.id = BlockId(*next);
                *next += 1;
            }
            Block::List(l) => {
                l.id = BlockId(*next);
                *next += 1;
            }
            Block::Image(img) => {
                img.id = BlockId(*next);
                *next += 1;
            }
            Block::Table(table) => {
                table.id = BlockId(*next);
                *next += 1;
                for row in &mut table.rows {
                    for cell in &mut row.cells {
                        renumber_blocks(&mut cell.blocks, next);
                    }
                }
            }
            Block::HorizontalRule | Block::PageBreak => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::model::Run;

    fn editor_with(html: &str) -> Editor {
        Editor::new(
            EditorOptions {
                initial_content: Some(html.to_string()),
                ..Default::default()
            },
            Box::new(()),
        )
    }

    fn first_id(editor: &Editor) -> BlockId {
        editor.document().blocks[0].id().unwrap()
    }

    #[test]
    fn construction_seeds_history_and_body() {
        let editor = Editor::new(EditorOptions::default(), Box::new(()));
        assert!(!editor.can_undo());
        assert!(!editor.can_redo());
        assert_eq!(editor.page_count(), 1);
        assert!(editor.document().is_empty_body());
    }

    #[test]
    fn text_before_caret_stays_within_the_run() {
        let mut editor = editor_with("<p>alpha</p>");
        let id = first_id(&editor);
        editor.set_caret(id, 3);
        assert_eq!(editor.text_before_caret(), "alp");

        // A chip between runs cuts the scan off.
        let block = editor.document.find_block_mut(id).unwrap();
        let inlines = block.inlines_mut().unwrap();
        inlines.push(Inline::Chip(Chip::variable("t", "f")));
        inlines.push(Inline::Run(Run::plain("tail")));
        editor.set_caret(id, 5 + 1 + 2);
        assert_eq!(editor.text_before_caret(), "ta");
        editor.set_caret(id, 6);
        assert_eq!(editor.text_before_caret(), "");
    }

    #[test]
    fn insert_text_advances_the_caret() {
        let mut editor = editor_with("<p>ab</p>");
        let id = first_id(&editor);
        editor.set_caret(id, 1);
        assert!(editor.insert_text("XY"));
        assert_eq!(editor.text(), "aXYb\n");
        assert_eq!(editor.caret().offset, 3);
    }

    #[test]
    fn insert_text_replaces_the_selection() {
        let mut editor = editor_with("<p>hello world</p>");
        let id = first_id(&editor);
        editor.set_selection(
            CursorPosition {
                block_id: id,
                offset: 5,
            },
            CursorPosition {
                block_id: id,
                offset: 11,
            },
        );
        assert!(editor.insert_text("!"));
        assert_eq!(editor.text(), "hello!\n");
    }

    #[test]
    fn cross_block_selection_deletion_splices_blocks() {
        let mut editor = editor_with("<p>first line</p><p>second line</p>");
        let start = editor.document().blocks[0].id().unwrap();
        let end = editor.document().blocks[1].id().unwrap();
        editor.set_selection(
            CursorPosition {
                block_id: start,
                offset: 5,
            },
            CursorPosition {
                block_id: end,
                offset: 6,
            },
        );
        assert!(editor.delete_backward());
        assert_eq!(editor.document().blocks.len(), 1);
        assert_eq!(editor.text(), "first line\n");
    }

    #[test]
    fn read_only_blocks_edits_but_not_reads() {
        let mut editor = Editor::new(
            EditorOptions {
                initial_content: Some("<p>locked</p>".to_string()),
                read_only: true,
                ..Default::default()
            },
            Box::new(()),
        );
        let id = first_id(&editor);
        editor.set_caret(id, 0);
        assert!(!editor.insert_text("x"));
        assert!(!editor.format(&FormatCommand::Bold));
        assert!(!editor.insert_table(2, 2));
        assert!(editor.enter_chrome_edit(ChromeZone::Header).is_none());
        assert_eq!(editor.text(), "locked\n");
    }

    #[test]
    fn insert_block_lands_after_the_caret_block() {
        let mut editor = editor_with("<p>one</p><p>two</p>");
        let id = first_id(&editor);
        editor.set_caret(id, 3);
        assert!(editor.insert_table(2, 3));
        assert!(matches!(editor.document().blocks[1], Block::Table(_)));
        assert_eq!(editor.document().blocks.len(), 3);
    }

    #[test]
    fn inserted_qr_component_keeps_its_payload() {
        let mut editor = editor_with("<p>x</p>");
        assert!(editor.insert_qr_code("https://example.org", 120.0));
        let qr = editor
            .document()
            .blocks
            .iter()
            .find_map(|b| match b {
                Block::Image(img) => img.qr.as_ref(),
                _ => None,
            })
            .unwrap();
        assert_eq!(qr.data, "https://example.org");
    }

    #[test]
    fn variable_chip_insertion_round_trips_through_serialize() {
        let mut editor = editor_with("<p>Dear </p>");
        let id = first_id(&editor);
        editor.set_caret(id, 5);
        assert!(editor.insert_variable("customers", "name"));
        let state = editor.serialize();
        assert_eq!(state.markers.len(), 1);
        assert_eq!(state.markers[0].value(), "{{customers.name}}");
    }

    #[test]
    fn renumbering_avoids_id_collisions() {
        let mut blocks = parse_html("<p>a</p><table><tr><td>b</td></tr></table>");
        let mut next = 10;
        renumber_blocks(&mut blocks, &mut next);
        assert_eq!(blocks[0].id(), Some(BlockId(10)));
        assert_eq!(blocks[1].id(), Some(BlockId(11)));
        let Block::Table(table) = &blocks[1] else {
            panic!()
        };
        assert_eq!(table.rows[0].cells[0].blocks[0].id(), Some(BlockId(12)));
        assert_eq!(next, 13);
    }

    #[test]
    fn geometry_changes_reclamp_margins() {
        let mut editor = editor_with("<p>x</p>");
        editor.set_margins(Margins::uniform(200.0));
        editor.set_page_size(PageSizeId::A5);
        let config = editor.config();
        assert!(config.margins.top + config.margins.bottom < config.page_height());
        assert!(config.margins.left + config.margins.right < config.page_width());
    }

    #[test]
    fn style_defaults_apply_only_where_nothing_inherits() {
        let mut editor = editor_with("<p></p>");
        editor.set_style_defaults(StyleDefaults {
            font_family: Some("Georgia".to_string()),
            font_size: Some(14.0),
            ..Default::default()
        });
        let id = first_id(&editor);
        editor.set_caret(id, 0);
        assert!(editor.insert_text("fresh"));
        let inlines = editor.document().blocks[0].inlines().unwrap();
        let Inline::Run(run) = &inlines[0] else {
            panic!()
        };
        assert_eq!(run.style.font_family.as_deref(), Some("Georgia"));

        // Further typing joins the existing run instead of re-applying.
        assert!(editor.insert_text("er"));
        let inlines = editor.document().blocks[0].inlines().unwrap();
        assert_eq!(inlines.len(), 1);
    }

    #[test]
    fn zoom_is_clamped_to_the_documented_range() {
        let mut editor = editor_with("<p>x</p>");
        assert_eq!(editor.set_zoom(10), 25);
        assert_eq!(editor.set_zoom(500), 200);
        assert_eq!(editor.set_zoom(150), 150);
        assert_eq!(editor.zoom(), 150);
    }

    #[test]
    fn clear_leaves_one_empty_paragraph() {
        let mut editor = editor_with("<p>a</p><p>b</p>");
        editor.clear();
        assert!(editor.document().is_empty_body());
        assert!(editor.can_undo());
    }

    // ---- host notification ------------------------------------------------

    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Recorder {
        changes: Vec<String>,
        stats: Vec<WordStats>,
        ready: usize,
    }

    struct RecordingEvents(Rc<RefCell<Recorder>>);

    impl EditorEvents for RecordingEvents {
        fn on_change(&mut self, html: &str) {
            self.0.borrow_mut().changes.push(html.to_string());
        }

        fn on_stats(&mut self, stats: &WordStats) {
            self.0.borrow_mut().stats.push(*stats);
        }

        fn on_ready(&mut self) {
            self.0.borrow_mut().ready += 1;
        }
    }

    #[test]
    fn ready_fires_once_and_mutations_notify() {
        let recorder = Rc::new(RefCell::new(Recorder::default()));
        let mut editor = Editor::new(
            EditorOptions {
                initial_content: Some("<p>seed</p>".to_string()),
                ..Default::default()
            },
            Box::new(RecordingEvents(Rc::clone(&recorder))),
        );
        {
            let seen = recorder.borrow();
            assert_eq!(seen.ready, 1);
            assert!(seen.changes.is_empty());
            assert_eq!(seen.stats.len(), 1);
        }
        let id = first_id(&editor);
        editor.set_caret(id, 4);
        assert!(editor.insert_text("ling"));
        let seen = recorder.borrow();
        assert_eq!(seen.ready, 1);
        assert_eq!(seen.changes.len(), 1);
        assert!(seen.changes[0].contains("seedling"));
        assert_eq!(seen.stats.last().unwrap().words, 1);
    }

    #[test]
    fn geometry_changes_notify_stats_without_a_content_change() {
        let recorder = Rc::new(RefCell::new(Recorder::default()));
        let mut editor = Editor::new(
            EditorOptions {
                initial_content: Some("<p>body</p>".to_string()),
                ..Default::default()
            },
            Box::new(RecordingEvents(Rc::clone(&recorder))),
        );
        editor.set_margins(Margins::uniform(48.0));
        let seen = recorder.borrow();
        assert!(seen.changes.is_empty());
        assert_eq!(seen.stats.len(), 2);
    }

    // ---- history ----------------------------------------------------------

    #[test]
    fn undo_redo_round_trips_body_and_chrome() {
        let mut editor = editor_with("<p>one</p>");
        editor.enter_chrome_edit(ChromeZone::Header).unwrap();
        assert!(editor.close_chrome_editor("<p>Page {{page}} of {{total}}</p>"));
        assert!(editor.chrome_for_page(ChromeZone::Header, 1).contains("Page 1 of 1"));

        assert!(editor.undo());
        assert_eq!(editor.chrome_for_page(ChromeZone::Header, 1), "");
        assert!(!editor.undo(), "the seed snapshot is the floor");

        assert!(editor.redo());
        assert!(editor.chrome_for_page(ChromeZone::Header, 1).contains("Page 1 of 1"));
        assert!(!editor.redo());
    }

    #[test]
    fn a_fresh_edit_truncates_the_redo_trail() {
        let mut editor = editor_with("<p>a</p>");
        editor.set_html("<p>b</p>");
        editor.set_html("<p>c</p>");
        assert!(editor.undo());
        assert_eq!(editor.text(), "b\n");
        editor.set_html("<p>d</p>");
        assert!(!editor.can_redo());
        assert!(editor.undo());
        assert_eq!(editor.text(), "b\n");
    }

    // ---- autocomplete through the facade ----------------------------------

    fn customers_schema() -> Vec<DatabaseTable> {
        vec![DatabaseTable {
            table_name: "customers".to_string(),
            display_name: "Customers".to_string(),
            fields: vec![
                DatabaseField {
                    name: "name".to_string(),
                    display_name: "Name".to_string(),
                },
                DatabaseField {
                    name: "email".to_string(),
                    display_name: "Email".to_string(),
                },
            ],
        }]
    }

    #[test]
    fn variable_autocomplete_walks_table_then_field_to_a_chip() {
        let mut editor = editor_with("<p></p>");
        editor.set_database_schema(customers_schema());
        let id = first_id(&editor);
        editor.set_caret(id, 0);

        assert!(editor.insert_text("Dear "));
        assert!(!editor.autocomplete_is_open());
        assert!(editor.insert_text("{{"));
        assert!(editor.autocomplete_is_open());
        assert!(matches!(
            editor.autocomplete_items()[0],
            SuggestionItem::Table { .. }
        ));

        // Confirming the table re-opens the popup in field phase.
        assert!(editor.autocomplete_confirm());
        assert!(editor.autocomplete_is_open());
        assert_eq!(editor.autocomplete_items().len(), 2);

        editor.autocomplete_next();
        assert!(editor.autocomplete_confirm());
        assert!(!editor.autocomplete_is_open());
        assert_eq!(editor.text(), "Dear customers.email\n");
        assert_eq!(editor.caret().offset, 6, "five chars plus one chip");

        let state = editor.serialize();
        assert_eq!(state.markers.len(), 1);
        assert_eq!(state.markers[0].value(), "{{customers.email}}");
    }

    #[test]
    fn quick_text_snippet_splices_into_the_current_line() {
        let mut editor = editor_with("<p></p>");
        editor.set_quick_texts(vec![QuickText {
            name: "sig".to_string(),
            content: "<p>Best regards, ACME</p>".to_string(),
        }]);
        let id = first_id(&editor);
        editor.set_caret(id, 0);

        assert!(editor.insert_text("@@si"));
        assert!(editor.autocomplete_is_open());
        assert!(editor.autocomplete_confirm());
        assert!(!editor.autocomplete_is_open());
        assert_eq!(editor.document().blocks.len(), 1);
        assert_eq!(editor.text(), "Best regards, ACME\n");
    }

    #[test]
    fn multi_block_snippet_lands_after_the_caret_block() {
        let mut editor = editor_with("<p>intro</p>");
        editor.set_quick_texts(vec![QuickText {
            name: "terms".to_string(),
            content: "<p>Clause one.</p><p>Clause two.</p>".to_string(),
        }]);
        let id = first_id(&editor);
        editor.set_caret(id, 5);

        assert!(editor.insert_text("@@terms"));
        assert!(editor.autocomplete_confirm());
        assert_eq!(editor.document().blocks.len(), 3);
        assert_eq!(editor.text(), "intro\nClause one.\nClause two.\n");
        let landing = editor.caret().block_id;
        assert_eq!(editor.document().blocks[2].id(), Some(landing));
    }

    #[test]
    fn no_results_confirm_is_inert_and_keeps_the_popup() {
        let mut editor = editor_with("<p></p>");
        let id = first_id(&editor);
        editor.set_caret(id, 0);
        assert!(editor.insert_text("{{"));
        assert!(editor.autocomplete_is_open());
        assert_eq!(editor.autocomplete_items(), [SuggestionItem::NoResults]);
        assert!(!editor.autocomplete_confirm());
        assert!(editor.autocomplete_is_open());
        assert_eq!(editor.text(), "{{\n");
    }

    #[test]
    fn focus_loss_remembers_the_selection_for_the_next_command() {
        let mut editor = editor_with("<p>make this bold</p>");
        let id = first_id(&editor);
        editor.set_selection(
            CursorPosition {
                block_id: id,
                offset: 10,
            },
            CursorPosition {
                block_id: id,
                offset: 14,
            },
        );
        editor.notify_focus_lost();
        assert!(editor.selection().is_none());

        assert!(editor.format(&FormatCommand::Bold));
        let inlines = editor.document().blocks[0].inlines().unwrap();
        let bolded: String = inlines
            .iter()
            .filter_map(|inline| match inline {
                Inline::Run(run) if run.style.bold => Some(run.text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(bolded, "bold");

        // The restored range is live again, so the next command stacks on it.
        assert!(editor.format(&FormatCommand::Italic));
        let inlines = editor.document().blocks[0].inlines().unwrap();
        assert!(inlines.iter().any(|inline| matches!(
            inline,
            Inline::Run(run) if run.text == "bold" && run.style.bold && run.style.italic
        )));
    }

    // ---- layout, import, export -------------------------------------------

    #[test]
    fn page_breaks_raise_the_page_count() {
        let mut editor = editor_with("<p>first page</p>");
        assert_eq!(editor.page_count(), 1);
        assert!(editor.insert_page_break());
        assert_eq!(editor.page_count(), 2);
        assert_eq!(editor.layout().spacers.len(), 1);
        assert_eq!(editor.stats().pages, 2);
    }

    #[test]
    fn import_replaces_content_and_pushes_history() {
        let mut editor = editor_with("<p>old</p>");
        let format = editor
            .import_bytes("notes.md", b"# Title\n\nBody text.")
            .unwrap();
        assert_eq!(format, SourceFormat::Markdown);
        assert!(matches!(editor.document().blocks[0], Block::Heading(_)));
        assert!(editor.text().contains("Body text."));
        assert_eq!(editor.document().metadata.title, "notes");

        assert!(editor.undo());
        assert_eq!(editor.text(), "old\n");
    }

    #[test]
    fn unreadable_import_leaves_the_document_alone() {
        let mut editor = editor_with("<p>keep me</p>");
        let err = editor.import_bytes("mystery.xyz", &[0x00, 0xff, 0x1b, 0x02]);
        assert!(err.is_err());
        assert_eq!(editor.text(), "keep me\n");
        assert!(!editor.can_undo());
    }

    struct OfflineRaster;

    impl crate::export::raster::Rasterizer for OfflineRaster {
        fn rasterize(
            &self,
            _html: &str,
            _width_px: u32,
            _height_px: u32,
            _kind: crate::export::raster::RasterKind,
        ) -> Result<image::RgbaImage, ExportError> {
            Err(ExportError::Raster("raster backend offline".to_string()))
        }
    }

    #[test]
    fn failed_export_clears_the_busy_flag() {
        use crate::export::ExportFormat;

        let mut editor = editor_with("<p>payload</p>");
        let pdf = ExportRequest::new(ExportFormat::Pdf);
        assert!(editor.export(&pdf, &OfflineRaster).is_err());
        assert!(!editor.is_exporting());

        // Text export never touches the rasterizer, so the same double works.
        let txt = ExportRequest::new(ExportFormat::Txt);
        let out = editor.export(&txt, &OfflineRaster).unwrap();
        assert_eq!(out.bytes().unwrap(), b"payload\n".as_slice());
    }
}
