//! Turns a submission into a standalone script file.
//!
//! Submissions often arrive wrapped in a markdown fence. The first
//! `` ```python `` ... `` ``` `` block wins; anything else is taken verbatim.

use std::path::Path;

use tracing::debug;

use crate::error::{ExecError, Result};

const OPEN_MARKER: &str = "```python";
const CLOSE_MARKER: &str = "```";

/// Extract the executable code from `raw`.
///
/// An opening marker without a matching closer is not a fence.
pub fn extract_code(raw: &str) -> &str {
    let Some(start) = raw.find(OPEN_MARKER) else {
        return raw;
    };
    let body_start = start + OPEN_MARKER.len();
    match raw[body_start..].find(CLOSE_MARKER) {
        Some(len) => raw[body_start..body_start + len].trim(),
        None => raw,
    }
}

/// Write the extracted code to `destination` as UTF-8, replacing any existing file.
pub async fn extract_and_write(raw: &str, destination: &Path) -> Result<()> {
    let code = extract_code(raw);
    debug!(
        path = %destination.display(),
        fenced = code.len() != raw.len(),
        code_len = code.len(),
        "Materializing script"
    );

    tokio::fs::write(destination, code)
        .await
        .map_err(|source| ExecError::Materialize {
            path: destination.to_path_buf(),
            source,
        })
}
