use serde::{Deserialize, Serialize};

use crate::document::model::{Block, Document};
use crate::layout::measure::BlockMeasurer;
use crate::layout::pagination::PageLayout;

/// Live word statistics, recomputed after every content-affecting mutation
/// and pushed to the host through `EditorEvents::on_stats`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct WordStats {
    pub words: usize,
    pub characters: usize,
    pub characters_no_spaces: usize,
    pub paragraphs: usize,
    pub lines: usize,
    pub pages: usize,
}

pub fn compute_stats(
    document: &Document,
    layout: &PageLayout,
    measurer: &dyn BlockMeasurer,
    column_width: f32,
) -> WordStats {
    let mut words = 0;
    let mut characters = 0;
    let mut characters_no_spaces = 0;
    let mut paragraphs = 0;
    let mut lines = 0;

    for block in &document.blocks {
        let text = block.visible_text();
        words += text.split_whitespace().count();
        characters += text.chars().filter(|c| *c != '\n').count();
        characters_no_spaces += text.chars().filter(|c| !c.is_whitespace()).count();
        match block {
            Block::Paragraph(p) => {
                if !p.inlines.is_empty() {
                    paragraphs += 1;
                }
            }
            Block::Heading(_) => paragraphs += 1,
            Block::List(list) => paragraphs += list.items.len(),
            _ => {}
        }
        lines += measurer.measure_lines(block, column_width);
    }

    WordStats {
        words,
        characters,
        characters_no_spaces,
        paragraphs,
        lines,
        pages: layout.page_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::model::{BlockId, Chip, Inline, Paragraph};
    use crate::layout::measure::HeuristicMeasurer;

    #[test]
    fn counts_words_characters_and_paragraphs() {
        let doc = Document::with_blocks(vec![
            Block::Paragraph(Paragraph::with_text(BlockId(1), "Hello wide world")),
            Block::Paragraph(Paragraph::with_text(BlockId(2), "second line")),
            Block::Paragraph(Paragraph::default()),
        ]);
        let stats = compute_stats(
            &doc,
            &PageLayout::single_page(),
            &HeuristicMeasurer::default(),
            600.0,
        );
        assert_eq!(stats.words, 5);
        assert_eq!(stats.characters, 16 + 11);
        assert_eq!(stats.characters_no_spaces, 14 + 10);
        assert_eq!(stats.paragraphs, 2);
        assert_eq!(stats.pages, 1);
        assert!(stats.lines >= 2);
    }

    #[test]
    fn chip_labels_count_as_text() {
        let mut p = Paragraph::with_text(BlockId(1), "Dear ");
        p.inlines.push(Inline::Chip(Chip::variable("customers", "name")));
        let doc = Document::with_blocks(vec![Block::Paragraph(p)]);
        let stats = compute_stats(
            &doc,
            &PageLayout::single_page(),
            &HeuristicMeasurer::default(),
            600.0,
        );
        // "Dear" plus the chip label "customers.name".
        assert_eq!(stats.words, 2);
        assert_eq!(stats.characters, 5 + 14);
    }

    #[test]
    fn serializes_camel_case() {
        let stats = WordStats {
            characters_no_spaces: 3,
            ..Default::default()
        };
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"charactersNoSpaces\":3"));
    }
}
