//! Line-delimited JSON encoding of batch input and output files.

use super::{BatchInputLine, BatchOutputLine, ProviderError};

/// Encode input lines as a JSONL payload, one object per line.
pub fn encode_input_lines(lines: &[BatchInputLine]) -> Result<Vec<u8>, ProviderError> {
    let mut payload = Vec::new();
    for line in lines {
        serde_json::to_writer(&mut payload, line)
            .map_err(|e| ProviderError::InvalidPayload(e.to_string()))?;
        payload.push(b'\n');
    }
    Ok(payload)
}

/// Parse a batch input file back into its lines. Blank lines are skipped.
pub fn parse_input_lines(content: &[u8]) -> Result<Vec<BatchInputLine>, ProviderError> {
    parse_lines(content, "input")
}

/// Parse a batch output file. Blank lines are skipped.
pub fn parse_output_lines(content: &[u8]) -> Result<Vec<BatchOutputLine>, ProviderError> {
    parse_lines(content, "output")
}

fn parse_lines<T: serde::de::DeserializeOwned>(
    content: &[u8],
    kind: &str,
) -> Result<Vec<T>, ProviderError> {
    content
        .split(|b| *b == b'\n')
        .enumerate()
        .filter(|(_, line)| !line.iter().all(u8::is_ascii_whitespace))
        .map(|(idx, line)| {
            serde_json::from_slice(line).map_err(|e| {
                ProviderError::InvalidPayload(format!("{} line {}: {}", kind, idx + 1, e))
            })
        })
        .collect()
}
