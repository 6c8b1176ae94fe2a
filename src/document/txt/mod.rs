use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8, WINDOWS_1252};
use ropey::Rope;

use crate::document::model::{Block, BlockId, Paragraph};

/// Plain-text ingest: sniff the encoding, then wrap each line in a paragraph.
pub fn import_bytes(bytes: &[u8]) -> (Vec<Block>, String) {
    let (text, encoding_name) = decode_text(bytes);
    (import_str(&text), encoding_name)
}

pub fn import_str(text: &str) -> Vec<Block> {
    let rope = Rope::from_str(text);
    let mut blocks: Vec<Block> = rope
        .lines()
        .enumerate()
        .map(|(i, line)| {
            let line = line.to_string();
            let trimmed = line.trim_end_matches(['\n', '\r']);
            Block::Paragraph(Paragraph::with_text(BlockId(i as u64 + 1), trimmed))
        })
        .collect();
    // A trailing newline is a terminator, not an extra empty line.
    if blocks.len() > 1
        && blocks
            .last()
            .is_some_and(|b| b.visible_text().is_empty())
        && text.ends_with('\n')
    {
        blocks.pop();
    }
    blocks
}

pub fn decode_text(bytes: &[u8]) -> (String, String) {
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        let (text, _, _) = UTF_8.decode(&bytes[3..]);
        return (text.into_owned(), "UTF-8".to_string());
    }
    if bytes.starts_with(&[0xFF, 0xFE]) {
        let (text, _, _) = UTF_16LE.decode(&bytes[2..]);
        return (text.into_owned(), "UTF-16LE".to_string());
    }
    if bytes.starts_with(&[0xFE, 0xFF]) {
        let (text, _, _) = UTF_16BE.decode(&bytes[2..]);
        return (text.into_owned(), "UTF-16BE".to_string());
    }

    if let Ok(as_utf8) = std::str::from_utf8(bytes) {
        return (as_utf8.to_string(), "UTF-8".to_string());
    }

    // Fallback for legacy Windows text files.
    decode_with_encoding(bytes, WINDOWS_1252)
}

fn decode_with_encoding(bytes: &[u8], encoding: &'static Encoding) -> (String, String) {
    let (text, _, _) = encoding.decode(bytes);
    (text.into_owned(), encoding.name().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_become_paragraphs() {
        let blocks = import_str("first\nsecond\n");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].visible_text(), "first");
        assert_eq!(blocks[1].visible_text(), "second");
    }

    #[test]
    fn blank_lines_survive_in_the_middle() {
        let blocks = import_str("a\n\nb");
        assert_eq!(blocks.len(), 3);
        assert!(blocks[1].visible_text().is_empty());
    }

    #[test]
    fn utf8_bom_is_stripped() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice("hello".as_bytes());
        let (blocks, encoding) = import_bytes(&bytes);
        assert_eq!(encoding, "UTF-8");
        assert_eq!(blocks[0].visible_text(), "hello");
    }

    #[test]
    fn utf16le_decodes() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "hi".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let (blocks, encoding) = import_bytes(&bytes);
        assert_eq!(encoding, "UTF-16LE");
        assert_eq!(blocks[0].visible_text(), "hi");
    }

    #[test]
    fn invalid_utf8_falls_back_to_windows_1252() {
        // 0xE9 is é in Windows-1252 and invalid as standalone UTF-8.
        let (blocks, encoding) = import_bytes(&[b'c', b'a', b'f', 0xE9]);
        assert_eq!(encoding, "windows-1252");
        assert_eq!(blocks[0].visible_text(), "café");
    }
}
