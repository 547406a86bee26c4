// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! POSIX command-line tokenizing and quoting for job construction.

/// Error tokenizing a job line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed job line: {0}")]
pub struct SplitError(String);

/// Strip a `#`-to-end-of-line comment.
pub fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

/// Tokenize one job line the way a POSIX shell would.
pub fn split(line: &str) -> Result<Vec<String>, SplitError> {
    shell_words::split(line).map_err(|_| SplitError(line.to_string()))
}

/// Join arguments into a single shell-safe string.
pub fn join<'a, I: IntoIterator<Item = &'a str>>(args: I) -> String {
    shell_words::join(args)
}

/// Compose a job command from the configured prefix and per-line arguments.
pub fn job_command(prefix: &str, args: &[String]) -> String {
    if args.is_empty() {
        return prefix.to_string();
    }
    let quoted = join(args.iter().map(String::as_str));
    if prefix.is_empty() {
        quoted
    } else {
        format!("{} {}", prefix, quoted)
    }
}

#[cfg(test)]
#[path = "cmdline_tests.rs"]
mod tests;
