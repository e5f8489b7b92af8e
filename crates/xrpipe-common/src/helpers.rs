//! Small parsing helpers shared by the CLI and tests.

use crate::{Error, Result};

/// Parse a comma or whitespace separated list of GPU frame times in milliseconds.
///
/// Empty entries are skipped. Negative or non-finite values are rejected.
pub fn parse_frame_times(input: &str) -> Result<Vec<f32>> {
    let mut out = Vec::new();
    for token in input
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
    {
        let value: f32 = token
            .parse()
            .map_err(|e| Error::config(format!("invalid frame time '{token}': {e}")))?;
        if !value.is_finite() || value < 0.0 {
            return Err(Error::config(format!("frame time out of range: {token}")));
        }
        out.push(value);
    }
    Ok(out)
}
