use crate::document::config::PageConfig;
use crate::document::html::{blocks_to_html, parse_html};
use crate::document::model::{Block, Chip, ChipKind, Inline, Run};
use crate::document::serialize::ChromeContent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChromeZone {
    Header,
    Footer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChromeVariant {
    Default,
    FirstPage,
    EvenPage,
}

/// Which chrome variant applies on a given page. First-page beats even-page
/// beats default; a variant only participates when its flag is set.
pub fn resolve_variant(page_number: usize, config: &PageConfig) -> ChromeVariant {
    if config.first_page_different && page_number == 1 {
        ChromeVariant::FirstPage
    } else if config.even_odd_different && page_number % 2 == 0 {
        ChromeVariant::EvenPage
    } else {
        ChromeVariant::Default
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct VariantSet {
    default: String,
    first_page: String,
    even_page: String,
}

impl VariantSet {
    fn get(&self, variant: ChromeVariant) -> &str {
        match variant {
            ChromeVariant::Default => &self.default,
            ChromeVariant::FirstPage => &self.first_page,
            ChromeVariant::EvenPage => &self.even_page,
        }
    }

    fn set(&mut self, variant: ChromeVariant, html: String) {
        match variant {
            ChromeVariant::Default => self.default = html,
            ChromeVariant::FirstPage => self.first_page = html,
            ChromeVariant::EvenPage => self.even_page = html,
        }
    }
}

/// Header/footer storage and the edit-session state machine.
///
/// At rest both zones hold canonical markup with textual `{{page}}` and
/// `{{total}}` placeholders. While one zone is being edited the host surface
/// shows the chip form instead; leaving the session always converts back and
/// commits, so the placeholder form is the only one ever stored.
#[derive(Debug, Default)]
pub struct ChromeState {
    header: VariantSet,
    footer: VariantSet,
    editing: Option<ChromeZone>,
}

impl ChromeState {
    pub fn content(&self, zone: ChromeZone, variant: ChromeVariant) -> &str {
        self.zone(zone).get(variant)
    }

    pub fn set_content(&mut self, zone: ChromeZone, variant: ChromeVariant, html: String) {
        self.zone_mut(zone).set(variant, html);
    }

    /// Markup shown on the given page, placeholders still textual.
    pub fn resolve(&self, zone: ChromeZone, page_number: usize, config: &PageConfig) -> &str {
        self.zone(zone).get(resolve_variant(page_number, config))
    }

    /// Markup for one page with the pagination counters substituted in.
    pub fn resolved_for_page(
        &self,
        zone: ChromeZone,
        page_number: usize,
        page_total: usize,
        config: &PageConfig,
    ) -> String {
        substitute_counters(self.resolve(zone, page_number, config), page_number, page_total)
    }

    pub fn editing(&self) -> Option<ChromeZone> {
        self.editing
    }

    /// The variant an edit session reads and writes. The editing surface
    /// always shows the page-1 view, so the first-page override is the slot
    /// whenever it is enabled.
    pub fn edit_slot(config: &PageConfig) -> ChromeVariant {
        if config.first_page_different {
            ChromeVariant::FirstPage
        } else {
            ChromeVariant::Default
        }
    }

    /// Opens an edit session on a zone and returns the chip-form markup the
    /// surface should display. Only one zone edits at a time; the caller must
    /// commit any open session first.
    pub fn enter_edit(&mut self, zone: ChromeZone, config: &PageConfig) -> String {
        self.editing = Some(zone);
        let stored = self.zone(zone).get(Self::edit_slot(config));
        placeholders_to_chips(stored)
    }

    /// Closes the open session, converting the surface markup back to the
    /// placeholder form and storing it in the page-1 slot. Exit paths all
    /// funnel through here, so an open session can never lose its content.
    pub fn commit_edit(&mut self, surface_html: &str, config: &PageConfig) -> Option<ChromeZone> {
        let zone = self.editing.take()?;
        let committed = chips_to_placeholders(surface_html);
        self.zone_mut(zone).set(Self::edit_slot(config), committed);
        Some(zone)
    }

    pub fn snapshot(&self) -> ChromeContent {
        ChromeContent {
            header: self.header.default.clone(),
            footer: self.footer.default.clone(),
            first_page_header: self.header.first_page.clone(),
            first_page_footer: self.footer.first_page.clone(),
            even_page_header: self.header.even_page.clone(),
            even_page_footer: self.footer.even_page.clone(),
        }
    }

    pub fn restore(&mut self, content: &ChromeContent) {
        self.header.default = content.header.clone();
        self.footer.default = content.footer.clone();
        self.header.first_page = content.first_page_header.clone();
        self.footer.first_page = content.first_page_footer.clone();
        self.header.even_page = content.even_page_header.clone();
        self.footer.even_page = content.even_page_footer.clone();
    }

    fn zone(&self, zone: ChromeZone) -> &VariantSet {
        match zone {
            ChromeZone::Header => &self.header,
            ChromeZone::Footer => &self.footer,
        }
    }

    fn zone_mut(&mut self, zone: ChromeZone) -> &mut VariantSet {
        match zone {
            ChromeZone::Header => &mut self.header,
            ChromeZone::Footer => &mut self.footer,
        }
    }
}

pub fn substitute_counters(html: &str, page_number: usize, page_total: usize) -> String {
    html.replace("{{page}}", &page_number.to_string())
        .replace("{{total}}", &page_total.to_string())
}

/// Turns textual `{{page}}`/`{{total}}` placeholders into chip markup for an
/// edit session.
pub fn placeholders_to_chips(html: &str) -> String {
    let mut blocks = parse_html(html);
    transform_inlines(&mut blocks, &mut |inlines| {
        let mut replaced = Vec::with_capacity(inlines.len());
        for inline in inlines.drain(..) {
            match inline {
                Inline::Run(run) => replaced.extend(split_placeholder_run(run)),
                chip => replaced.push(chip),
            }
        }
        *inlines = replaced;
    });
    blocks_to_html(&blocks)
}

/// Inverse transform applied when a session closes: every chip becomes its
/// canonical placeholder text again.
pub fn chips_to_placeholders(html: &str) -> String {
    let mut blocks = parse_html(html);
    transform_inlines(&mut blocks, &mut |inlines| {
        for inline in inlines.iter_mut() {
            if let Inline::Chip(chip) = inline {
                *inline = Inline::Run(Run {
                    text: chip.placeholder(),
                    style: chip.style.clone(),
                });
            }
        }
        crate::editor::commands::merge_adjacent_runs(inlines);
    });
    blocks_to_html(&blocks)
}

fn split_placeholder_run(run: Run) -> Vec<Inline> {
    let mut out = Vec::new();
    let mut rest = run.text.as_str();
    loop {
        let page = rest.find("{{page}}");
        let total = rest.find("{{total}}");
        let (at, token, kind) = match (page, total) {
            (Some(p), Some(t)) if p <= t => (p, "{{page}}", ChipKind::PageNumber),
            (_, Some(t)) => (t, "{{total}}", ChipKind::PageTotal),
            (Some(p), None) => (p, "{{page}}", ChipKind::PageNumber),
            (None, None) => break,
        };
        if at > 0 {
            out.push(Inline::Run(Run {
                text: rest[..at].to_string(),
                style: run.style.clone(),
            }));
        }
        out.push(Inline::Chip(Chip {
            kind,
            style: run.style.clone(),
        }));
        rest = &rest[at + token.len()..];
    }
    if out.is_empty() {
        return vec![Inline::Run(run)];
    }
    if !rest.is_empty() {
        out.push(Inline::Run(Run {
            text: rest.to_string(),
            style: run.style,
        }));
    }
    out
}

fn transform_inlines<F: FnMut(&mut Vec<Inline>)>(blocks: &mut [Block], transform: &mut F) {
    for block in blocks.iter_mut() {
        match block {
            Block::Paragraph(_) | Block::Heading(_) => {
                if let Some(inlines) = block.inlines_mut() {
                    transform(inlines);
                }
            }
            Block::List(list) => {
                for item in &mut list.items {
                    transform(&mut item.inlines);
                }
            }
            Block::Table(table) => {
                for row in &mut table.rows {
                    for cell in &mut row.cells {
                        transform_inlines(&mut cell.blocks, transform);
                    }
                }
            }
            _ => {}
        }
    }
}
