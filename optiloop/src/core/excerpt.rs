//! Failure excerpt extraction from sandbox run output.

use std::sync::LazyLock;

use regex::Regex;

static FRAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*File\s+".+",\s+line\s+\d+"#).expect("frame regex should be valid")
});

const EXIT_MARKER: &str = "exited with code";

/// Extract the traceback block from run output.
///
/// Capture starts at the first frame line (`File "...", line N`) or the first
/// line mentioning `Traceback`/`SyntaxError`. It ends with the container's
/// `exited with code` line, which is kept so the model sees the exit status.
/// Reading stops at the first exit line even when nothing was captured yet.
/// Returns `None` when no marker precedes it.
pub fn traceback_excerpt(output: &str) -> Option<String> {
    let mut captured = String::new();
    let mut started = false;
    for line in output.split_inclusive('\n') {
        if !started
            && (FRAME_RE.is_match(line) || line.contains("Traceback") || line.contains("SyntaxError"))
        {
            started = true;
        }
        if started {
            captured.push_str(line);
        }
        if line.contains(EXIT_MARKER) {
            break;
        }
    }
    let trimmed = captured.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// `original_error` for a failed run phase: the traceback when one exists,
/// otherwise the full captured output.
pub fn run_failure_excerpt(output: &str) -> String {
    traceback_excerpt(output).unwrap_or_else(|| output.to_string())
}
