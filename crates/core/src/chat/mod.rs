//! Chat completion request/response shapes accepted and returned by the gateway.
//!
//! Only the fields the gateway itself needs are typed; everything else the
//! caller sends (sampling parameters, tools, response formats, ...) is kept
//! verbatim so it reaches the provider untouched and participates in the
//! request fingerprint.

mod types;

pub use types::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage};
