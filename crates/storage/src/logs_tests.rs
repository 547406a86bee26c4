// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    progress_overwrite = { "foo\rprogress\rbar\n", "bar\n" },
    crlf_line_ending = { "hello\r\n", "hello\n" },
    multiple_cr_before_newline = { "50%\r100%\r\r\n", "100%\n" },
    connection_closed = { "done\nConnection to 10.0.0.1 closed.\r\n", "done\n" },
    trailing_fragment = { "line\n\rspinner", "line\n" },
    plain_text = { "nothing special\n", "nothing special\n" },
    only_artifacts = { "\rspinner", "" },
)]
fn filter_strips_carriage_return_artifacts(input: &str, expected: &str) {
    assert_eq!(filter_output(input), expected);
}

#[test]
fn worker_log_status_line_format() {
    let dir = tempfile::tempdir().unwrap();
    let log = WorkerLog::new(dir.path().to_path_buf(), 3);

    log.status("10.0.0.1", "using existing worker");

    let content = std::fs::read_to_string(dir.path().join("3")).unwrap();
    let line = content.lines().next().unwrap();
    assert!(line.starts_with("# "));
    assert!(line.contains("[10.0.0.1] using existing worker"));
    // Timestamp shape: "# YYYY-MM-DD HH:MM:SS [..."
    assert_eq!(&line[6..7], "-");
    assert_eq!(&line[16..17], ":");
}

#[test]
fn worker_log_interleaves_output_and_statuses() {
    let dir = tempfile::tempdir().unwrap();
    let log = WorkerLog::new(dir.path().to_path_buf(), 1);

    log.status("10.0.0.1", "echo hello");
    log.output("hello\n");
    log.blank_line();
    log.status("10.0.0.1", "exit 0 # echo hello");

    let content = std::fs::read_to_string(log.path()).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[1], "hello");
    assert_eq!(lines[2], "");
}

#[test]
fn fully_filtered_output_still_touches_mtime() {
    let dir = tempfile::tempdir().unwrap();
    let log = WorkerLog::new(dir.path().to_path_buf(), 2);
    log.status("10.0.0.1", "started");

    let old = std::fs::metadata(log.path()).unwrap().modified().unwrap();
    let past = old - std::time::Duration::from_secs(60);
    let file = OpenOptions::new().append(true).open(log.path()).unwrap();
    file.set_modified(past).unwrap();

    log.output("\rspinner");

    let new = std::fs::metadata(log.path()).unwrap().modified().unwrap();
    assert!(new > past + std::time::Duration::from_secs(30));
    // And nothing was appended.
    let content = std::fs::read_to_string(log.path()).unwrap();
    assert_eq!(content.lines().count(), 1);
}

#[test]
fn overwrite_straddling_chunks_resolves_like_one_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let log = WorkerLog::new(dir.path().to_path_buf(), 4);

    // An 8K-read boundary can fall between two overwrites of the same
    // progress line; the stale text must still lose.
    log.output("progress: 10%\rprogress: 50%\r");
    log.output("progress: 100%\ndone\n");

    let content = std::fs::read_to_string(log.path()).unwrap();
    assert_eq!(content, "progress: 100%\ndone\n");
}

#[test]
fn crlf_straddling_chunks_collapses_to_one_newline() {
    let dir = tempfile::tempdir().unwrap();
    let log = WorkerLog::new(dir.path().to_path_buf(), 4);

    log.output("line\r");
    log.output("\nnext\n");

    let content = std::fs::read_to_string(log.path()).unwrap();
    assert_eq!(content, "line\nnext\n");
}

#[test]
fn unterminated_chunk_is_buffered_until_the_next_status_line() {
    let dir = tempfile::tempdir().unwrap();
    let log = WorkerLog::new(dir.path().to_path_buf(), 4);

    log.output("partial output with no newline");
    // Nothing is on disk yet; the line may still be overwritten.
    assert_eq!(
        std::fs::read_to_string(log.path()).unwrap_or_default(),
        ""
    );

    log.status("10.0.0.1", "exit 0 # echo");

    let content = std::fs::read_to_string(log.path()).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "partial output with no newline");
    assert!(lines[1].contains("exit 0 # echo"));
}

#[test]
fn dangling_overwrite_fragment_is_dropped_at_flush() {
    let dir = tempfile::tempdir().unwrap();
    let log = WorkerLog::new(dir.path().to_path_buf(), 4);

    log.output("done\n");
    log.output("\rspinner |\rspinner /");
    log.status("10.0.0.1", "terminated # spin");

    // The never-completed overwrite is discarded entirely; the status
    // line still starts its own line.
    let content = std::fs::read_to_string(log.path()).unwrap();
    assert!(content.starts_with("done\n# "));
    assert!(!content.contains("spinner"));
}

#[test]
fn shared_tail_spans_clones() {
    let dir = tempfile::tempdir().unwrap();
    let log = WorkerLog::new(dir.path().to_path_buf(), 4);
    let sink = log.clone();

    sink.output("10%\r");
    sink.output("100%\n");

    let content = std::fs::read_to_string(log.path()).unwrap();
    assert_eq!(content, "100%\n");
}

#[test]
fn oversized_tail_is_compacted_without_losing_the_overwrite() {
    let mut tail = "head\r".to_string();
    tail.push_str(&"x".repeat(TAIL_LIMIT));
    tail.push_str("\rcurrent");

    compact_tail(&mut tail);

    assert!(tail.len() < 64);
    // The first carriage return survives so the flush rules still see an
    // unfinished overwrite; the live text is intact.
    assert_eq!(tail, "head\rcurrent");
}

#[test]
fn small_tail_is_left_alone() {
    let mut tail = "a\rb\rc".to_string();
    compact_tail(&mut tail);
    assert_eq!(tail, "a\rb\rc");
}

#[test]
fn manager_log_appends_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log");
    let log = ManagerLog::new(path.clone());

    log.writeln("session 1 (pid 4242)");
    log.writeln("session 1: 3 jobs in 2 seconds (3 succeeded, 0 failed)");

    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.lines().count(), 2);
    assert!(content.starts_with("session 1 (pid 4242)\n"));
}
