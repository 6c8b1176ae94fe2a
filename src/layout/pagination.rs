use serde::{Deserialize, Serialize};

use crate::document::config::PageConfig;
use crate::document::model::{Block, Document};
use crate::layout::measure::BlockMeasurer;

/// Vertical filler standing between the last block of one page and the first
/// block of the next. Spacers are derived, never stored in the document: the
/// layout is recomputed from scratch after every mutation, so there is no
/// stale spacer state to protect or repair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PageSpacer {
    /// Index of the block the spacer precedes.
    pub before_block: usize,
    pub height: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageLayout {
    pub page_count: usize,
    pub spacers: Vec<PageSpacer>,
}

impl PageLayout {
    pub fn single_page() -> Self {
        Self {
            page_count: 1,
            spacers: Vec::new(),
        }
    }
}

impl Default for PageLayout {
    fn default() -> Self {
        Self::single_page()
    }
}

/// Assigns blocks to pages by walking them in order and accumulating measured
/// heights against the page's content capacity.
///
/// A spacer is emitted immediately before the first block that no longer fits
/// the current page; its height bridges the leftover content area plus the
/// bottom margin, the inter-page gap and the next page's top margin, so the
/// following block lands exactly at the next content origin. Blocks taller
/// than a whole page are not split; they overflow visually and the
/// accumulator is reduced modulo the capacity so later blocks keep paginating
/// correctly. The walk is a pure function of the document and config:
/// repeating it on unchanged input yields an identical layout.
pub fn paginate(
    document: &Document,
    config: &PageConfig,
    measurer: &dyn BlockMeasurer,
) -> PageLayout {
    let content_height = config.content_height();
    let column_width = config.column_width();

    let mut heights = Vec::with_capacity(document.blocks.len());
    for block in &document.blocks {
        match measurer.measure_block(block, column_width) {
            Some(h) if h.is_finite() => heights.push(h.max(0.0)),
            _ => {
                log::warn!("block height unavailable, falling back to a single page");
                return PageLayout::single_page();
            }
        }
    }

    let total: f32 = heights.iter().sum();
    let has_breaks = document
        .blocks
        .iter()
        .any(|b| matches!(b, Block::PageBreak));
    if total <= content_height && !has_breaks {
        return PageLayout::single_page();
    }

    let break_height = |used: f32| {
        (content_height - used) + config.margins.bottom + config.page_gap + config.margins.top
    };

    let mut spacers = Vec::new();
    let mut used = 0.0f32;
    for (index, (block, &height)) in document.blocks.iter().zip(&heights).enumerate() {
        if matches!(block, Block::PageBreak) {
            // A break at the very top of a page does not create an empty page.
            if used > 0.0 {
                spacers.push(PageSpacer {
                    before_block: index,
                    height: break_height(used),
                });
                used = 0.0;
            }
            continue;
        }

        if used > 0.0 && used + height > content_height {
            spacers.push(PageSpacer {
                before_block: index,
                height: break_height(used),
            });
            used = 0.0;
        }

        used += height;
        if used > content_height {
            // Oversized block: keep the accumulator aligned with where the
            // overflow visually ends.
            used %= content_height;
        }
    }

    PageLayout {
        page_count: spacers.len() + 1,
        spacers,
    }
}
