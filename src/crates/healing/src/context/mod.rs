//! Conversation context management
//!
//! Size estimation and summarizing compression of message history.

pub mod compressor;
pub mod token_counter;

pub use compressor::{CompressionResult, ContextCompressor};
pub use token_counter::{TokenCount, TokenCounter};
