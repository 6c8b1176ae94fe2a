use crate::document::model::{Block, Heading, ImageBlock, List, Paragraph, Table, TextWrap};

/// Supplies rendered block heights to the pagination walk.
///
/// The editor core never touches a real layout engine; hosts that can measure
/// actual rendered boxes plug one in here, and everything else (tests, server
/// side exports) uses [`HeuristicMeasurer`]. Returning `None` signals that a
/// height cannot be determined, which degrades layout to a single page.
pub trait BlockMeasurer {
    /// Height in px of `block` laid out at `width`, or `None` when the block
    /// cannot be measured.
    fn measure_block(&self, block: &Block, width: f32) -> Option<f32>;

    /// Number of rendered line boxes `block` produces at `width`. Feeds the
    /// line counter in the word statistics.
    fn measure_lines(&self, block: &Block, width: f32) -> usize;
}

/// Deterministic estimate of rendered heights: average glyph width as a
/// fraction of the font size, greedy wrapping, fixed line-height multiplier.
/// Coarse on purpose; it only has to be stable and monotonic.
#[derive(Debug, Clone)]
pub struct HeuristicMeasurer {
    pub base_font_size: f32,
    pub char_width_em: f32,
    pub default_line_height: f32,
}

impl Default for HeuristicMeasurer {
    fn default() -> Self {
        Self {
            base_font_size: 16.0,
            char_width_em: 0.5,
            default_line_height: 1.5,
        }
    }
}

const RULE_HEIGHT: f32 = 16.0;

impl HeuristicMeasurer {
    fn wrapped_lines(&self, char_count: usize, font_size: f32, width: f32) -> usize {
        let per_line = (width / (font_size * self.char_width_em)).floor().max(1.0) as usize;
        char_count.div_ceil(per_line).max(1)
    }

    fn paragraph_font_size(&self, paragraph: &Paragraph) -> f32 {
        paragraph
            .inlines
            .iter()
            .filter_map(|inline| match inline {
                crate::document::model::Inline::Run(run) => run.style.font_size,
                crate::document::model::Inline::Chip(chip) => chip.style.font_size,
            })
            .fold(self.base_font_size, f32::max)
    }

    fn heading_font_size(&self, level: u8) -> f32 {
        let scale = match level {
            1 => 2.0,
            2 => 1.5,
            3 => 1.17,
            4 => 1.0,
            5 => 0.83,
            _ => 0.67,
        };
        self.base_font_size * scale
    }

    fn paragraph_height(&self, paragraph: &Paragraph, width: f32) -> f32 {
        let avail = (width - paragraph.indent.left - paragraph.indent.right).max(1.0);
        let font_size = self.paragraph_font_size(paragraph);
        let chars = paragraph.text().chars().count();
        let lines = self.wrapped_lines(chars, font_size, avail);
        let line_mult = if paragraph.spacing.line > 0.0 {
            paragraph.spacing.line
        } else {
            self.default_line_height
        };
        lines as f32 * font_size * line_mult + paragraph.spacing.before + paragraph.spacing.after
    }

    fn heading_height(&self, heading: &Heading, width: f32) -> f32 {
        let font_size = self.heading_font_size(heading.level);
        let chars: usize = heading.inlines.iter().map(|i| i.char_len()).sum();
        let lines = self.wrapped_lines(chars, font_size, width);
        // Default heading margins collapse to roughly one extra font size.
        lines as f32 * font_size * self.default_line_height + font_size
    }

    fn table_height(&self, table: &Table, width: f32) -> f32 {
        let cols = table
            .rows
            .iter()
            .map(|r| r.cells.len())
            .max()
            .unwrap_or(1)
            .max(1);
        let mut height = 0.0;
        for row in &table.rows {
            let mut row_height = self.base_font_size * self.default_line_height;
            for (i, cell) in row.cells.iter().enumerate() {
                let fraction = table
                    .column_widths
                    .get(i)
                    .copied()
                    .unwrap_or(1.0 / cols as f32);
                let cell_width = (width * fraction - 2.0 * table.cell_padding).max(1.0);
                let content: f32 = cell
                    .blocks
                    .iter()
                    .filter_map(|b| self.block_height(b, cell_width))
                    .sum();
                row_height = row_height.max(content + 2.0 * table.cell_padding);
            }
            height += row_height + table.borders.inner_horizontal.width;
        }
        height + 2.0 * table.borders.outer.width
    }

    fn image_height(&self, image: &ImageBlock, width: f32) -> f32 {
        match image.wrap {
            // Out of flow; does not consume vertical space.
            TextWrap::Behind | TextWrap::InFront => 0.0,
            _ => {
                if image.width > width && image.width > 0.0 {
                    image.height * width / image.width
                } else {
                    image.height
                }
            }
        }
    }

    fn list_height(&self, list: &List, width: f32) -> f32 {
        let item_width = (width - 24.0).max(1.0);
        list.items
            .iter()
            .map(|item| {
                let chars: usize = item.inlines.iter().map(|i| i.char_len()).sum();
                let lines = self.wrapped_lines(chars, self.base_font_size, item_width);
                lines as f32 * self.base_font_size * self.default_line_height
            })
            .sum()
    }

    fn block_height(&self, block: &Block, width: f32) -> Option<f32> {
        let h = match block {
            Block::Paragraph(p) => self.paragraph_height(p, width),
            Block::Heading(h) => self.heading_height(h, width),
            Block::Table(t) => self.table_height(t, width),
            Block::Image(img) => self.image_height(img, width),
            Block::List(l) => self.list_height(l, width),
            Block::HorizontalRule => RULE_HEIGHT,
            Block::PageBreak => 0.0,
        };
        Some(h)
    }
}

impl BlockMeasurer for HeuristicMeasurer {
    fn measure_block(&self, block: &Block, width: f32) -> Option<f32> {
        self.block_height(block, width)
    }

    fn measure_lines(&self, block: &Block, width: f32) -> usize {
        match block {
            Block::Paragraph(p) => {
                let avail = (width - p.indent.left - p.indent.right).max(1.0);
                self.wrapped_lines(p.text().chars().count(), self.paragraph_font_size(p), avail)
            }
            Block::Heading(h) => {
                let chars: usize = h.inlines.iter().map(|i| i.char_len()).sum();
                self.wrapped_lines(chars, self.heading_font_size(h.level), width)
            }
            Block::List(l) => l
                .items
                .iter()
                .map(|item| {
                    let chars: usize = item.inlines.iter().map(|i| i.char_len()).sum();
                    self.wrapped_lines(chars, self.base_font_size, (width - 24.0).max(1.0))
                })
                .sum(),
            Block::Table(t) => t
                .rows
                .iter()
                .flat_map(|r| &r.cells)
                .flat_map(|c| &c.blocks)
                .map(|b| self.measure_lines(b, width))
                .sum(),
            Block::Image(_) | Block::HorizontalRule => 1,
            Block::PageBreak => 0,
        }
    }
}
