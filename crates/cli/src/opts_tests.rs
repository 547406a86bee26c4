// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use clap::CommandFactory;
use serial_test::serial;

fn parse(args: &[&str]) -> (Cli, ArgMatches) {
    let matches = Cli::command()
        .try_get_matches_from(std::iter::once("cloudtask").chain(args.iter().copied()))
        .unwrap();
    let cli = <Cli as clap::FromArgMatches>::from_arg_matches(&matches).unwrap();
    (cli, matches)
}

#[test]
#[serial]
fn flags_override_defaults() {
    let (cli, matches) = parse(&[
        "--timeout=60",
        "--retries=2",
        "--strikes=3",
        "--split=4",
        "--user=admin",
        "--workers=10.0.0.1,10.0.0.2",
        "echo",
    ]);

    let mut conf = TaskConf::default();
    cli.apply(&mut conf, &matches, false).unwrap();

    assert_eq!(conf.timeout, 60);
    assert_eq!(conf.retries, 2);
    assert_eq!(conf.strikes, 3);
    assert_eq!(conf.split, 4);
    assert_eq!(conf.user, "admin");
    assert_eq!(conf.workers, vec!["10.0.0.1", "10.0.0.2"]);
    assert_eq!(cli.command, vec!["echo"]);
}

#[test]
#[serial]
fn env_var_fills_in_when_flag_is_absent() {
    std::env::set_var("CLOUDTASK_TIMEOUT", "120");
    let (cli, matches) = parse(&["echo"]);
    std::env::remove_var("CLOUDTASK_TIMEOUT");

    let mut conf = TaskConf::default();
    cli.apply(&mut conf, &matches, false).unwrap();
    assert_eq!(conf.timeout, 120);
}

#[test]
#[serial]
fn flag_beats_env_var() {
    std::env::set_var("CLOUDTASK_TIMEOUT", "120");
    let (cli, matches) = parse(&["--timeout=60", "echo"]);
    std::env::remove_var("CLOUDTASK_TIMEOUT");

    let mut conf = TaskConf::default();
    cli.apply(&mut conf, &matches, false).unwrap();
    assert_eq!(conf.timeout, 60);
}

#[test]
#[serial]
fn resume_overrides_take_only_command_line_values() {
    std::env::set_var("CLOUDTASK_TIMEOUT", "120");
    let (cli, matches) = parse(&["--retries=5"]);
    std::env::remove_var("CLOUDTASK_TIMEOUT");

    // Baseline from a persisted session config.
    let mut conf = TaskConf {
        timeout: 60,
        retries: 1,
        ..Default::default()
    };
    cli.apply(&mut conf, &matches, true).unwrap();

    // The env value must not clobber the persisted timeout; the explicit
    // flag must.
    assert_eq!(conf.timeout, 60);
    assert_eq!(conf.retries, 5);
}

#[test]
#[serial]
fn resume_conflicts_with_retry() {
    let result = Cli::command().try_get_matches_from(["cloudtask", "--resume=1", "--retry=2"]);
    assert!(result.is_err());
}

#[test]
#[serial]
fn split_below_one_is_rejected() {
    let (cli, matches) = parse(&["--split=0", "echo"]);
    let mut conf = TaskConf::default();
    assert!(cli.apply(&mut conf, &matches, false).is_err());
}

#[test]
#[serial]
fn backup_id_zero_is_rejected() {
    let (cli, matches) = parse(&["--backup-id=0", "echo"]);
    let mut conf = TaskConf::default();
    assert!(cli.apply(&mut conf, &matches, false).is_err());
}

#[test]
#[serial]
fn missing_overlay_directory_is_rejected() {
    let (cli, matches) = parse(&["--overlay=/definitely/not/here", "echo"]);
    let mut conf = TaskConf::default();
    assert!(cli.apply(&mut conf, &matches, false).is_err());
}

#[test]
fn workers_parse_from_inline_list() {
    assert_eq!(
        parse_workers("10.0.0.1,10.0.0.2 10.0.0.3").unwrap(),
        vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]
    );
}

#[test]
fn workers_parse_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("workers.txt");
    std::fs::write(&path, "10.0.0.1\n\n10.0.0.2\n").unwrap();

    assert_eq!(
        parse_workers(path.to_str().unwrap()).unwrap(),
        vec!["10.0.0.1", "10.0.0.2"]
    );
}
