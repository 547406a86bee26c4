// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    plain = { "echo hello", "echo hello" },
    trailing = { "echo hello # a comment", "echo hello " },
    whole_line = { "# nothing here", "" },
    no_comment = { "tar -czf out.tgz", "tar -czf out.tgz" },
)]
fn strip_comment_cuts_at_hash(line: &str, expected: &str) {
    assert_eq!(strip_comment(line), expected);
}

#[test]
fn split_honors_quoting() {
    let args = split("convert 'a file.png' out.jpg").unwrap();
    assert_eq!(args, vec!["convert", "a file.png", "out.jpg"]);
}

#[test]
fn split_rejects_unterminated_quote() {
    assert!(split("echo 'oops").is_err());
}

#[parameterized(
    simple = { "echo", &["1"], "echo 1" },
    quoted = { "echo", &["hello world"], "echo 'hello world'" },
    no_args = { "uptime", &[], "uptime" },
)]
fn job_command_appends_quoted_args(prefix: &str, args: &[&str], expected: &str) {
    let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    assert_eq!(job_command(prefix, &args), expected);
}

#[test]
fn job_command_with_empty_prefix_is_just_args() {
    let args = vec!["du".to_string(), "-sh".to_string()];
    assert_eq!(job_command("", &args), "du -sh");
}
