//! Canonical HTML surface of the document model.
//!
//! The writer emits the markup the editing surface and the persistence layer
//! exchange; the parser reads that markup back, plus the looser HTML produced
//! by clipboards and format converters. Everything the writer emits the
//! parser understands, so documents survive a write/parse cycle unchanged.

mod parser;
pub mod writer;

pub use parser::parse_html;
pub use writer::{
    blocks_to_html, blocks_to_plain_text, document_to_html, escape_html, print_body_html,
    standalone_html, word_wrapper_html,
};
