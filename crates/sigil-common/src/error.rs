//! Error formatting helpers

/// Format an error with its cause chain
///
/// Produces `outer Caused by: inner Caused by: root`, which keeps the full
/// context on a single log line.
pub fn format_error(error: &dyn std::error::Error) -> String {
    format_error_recursive(error, 0)
}

fn format_error_recursive(error: &dyn std::error::Error, depth: usize) -> String {
    const MAX_DEPTH: usize = 10;

    if depth >= MAX_DEPTH {
        return error.to_string();
    }

    let base = error.to_string();

    if let Some(source) = error.source() {
        format!(
            "{} Caused by: {}",
            base,
            format_error_recursive(source, depth + 1)
        )
    } else {
        base
    }
}
