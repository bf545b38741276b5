//! Batch compute provider abstraction.
//!
//! This module provides a `BatchProvider` trait for the asynchronous bulk
//! completion API the gateway fronts, plus an OpenAI-compatible HTTP
//! implementation.

mod jsonl;
mod openai;
mod types;

pub use jsonl::{encode_input_lines, parse_input_lines, parse_output_lines};
pub use openai::OpenAiProvider;
pub use types::*;
