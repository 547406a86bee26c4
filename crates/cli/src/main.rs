// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! cloudtask - execute shell jobs in parallel on a fleet of cloud workers.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod opts;
mod reporter;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, FromArgMatches};
use ct_adapters::provisioner::hub::HubProvisioner;
use ct_adapters::ssh::{SessionKey, SshConnector};
use ct_core::{cmdline, TaskConf};
use ct_engine::run_task;
use ct_storage::{ManagerLog, Session};
use opts::Cli;
use std::io::{BufRead, IsTerminal, Write};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();

    let matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches(&matches)?;

    let sessions_root = cli
        .sessions
        .clone()
        .unwrap_or_else(opts::default_sessions_root);

    // Resolve the session, config, and job list for the three modes.
    let (mut session, conf, jobs) = if let Some(id) = cli.resume {
        let session = Session::open(&sessions_root, id)?;
        if !cli.command.is_empty() {
            bail!("--resume is incompatible with a command");
        }
        let mut conf = session.load_conf()?;
        cli.apply(&mut conf, &matches, true)?;

        if session.jobs.pending.is_empty() {
            println!("session {} finished", session.id);
            return Ok(());
        }
        let jobs = session.jobs.pending.clone();
        ManagerLog::new(session.paths().log()).writeln(&format!(
            "session {}: resuming ({} pending, {} finished)",
            session.id,
            session.jobs.pending.len(),
            session.jobs.finished.len()
        ));
        (session, conf, jobs)
    } else if let Some(id) = cli.retry {
        let mut session = Session::open(&sessions_root, id)?;
        if !cli.command.is_empty() {
            bail!("--retry is incompatible with a command");
        }
        let mut conf = session.load_conf()?;
        cli.apply(&mut conf, &matches, true)?;

        session.jobs.update_retry_failed()?;
        if session.jobs.pending.is_empty() {
            // Nothing failed: retrying a green session is a no-op.
            println!("session {}: no failed jobs to retry", session.id);
            return Ok(());
        }
        let jobs = session.jobs.pending.clone();
        ManagerLog::new(session.paths().log()).writeln(&format!(
            "session {}: retrying {} failed jobs",
            session.id,
            session.jobs.pending.len()
        ));
        (session, conf, jobs)
    } else {
        let mut conf = TaskConf::default();
        cli.apply(&mut conf, &matches, false)?;

        let prefix = command_prefix(&cli.command)?;
        conf.command = Some(prefix.clone());

        let jobs = read_jobs(&prefix)?;
        if jobs.is_empty() {
            bail!("no jobs, nothing to do");
        }

        // Cap the width to the job count before validating the apikey
        // requirement.
        conf.split = conf.split.clamp(1, jobs.len().max(1) as u32);
        conf.validate()?;

        if !cli.force && std::io::stderr().is_terminal() {
            confirm(&conf, &jobs)?;
        }

        let session = Session::create(&sessions_root)?;
        session.save_conf(&conf)?;
        (session, conf, jobs)
    };

    conf.validate()?;

    // The ephemeral session identity; unlinked again on every exit path.
    let key = Arc::new(
        SessionKey::generate()
            .await
            .context("failed to generate session key")?,
    );
    let connector = Arc::new(SshConnector::new(Arc::clone(&key), conf.user.clone()));

    let provisioner = conf.hub_apikey.as_ref().map(|apikey| {
        Arc::new(match std::env::var("CLOUDTASK_HUB_URL") {
            Ok(url) => HubProvisioner::with_base_url(apikey.clone(), url),
            Err(_) => HubProvisioner::new(apikey.clone()),
        })
    });

    // SIGINT/SIGTERM become the one-shot cancellation signal; workers
    // observe it through the pool, never the raw signal.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::spawn(async move {
            tokio::select! {
                _ = sigint.recv() => {}
                _ = sigterm.recv() => {}
            }
            cancel.cancel();
        });
    }

    let outcome = run_task(
        &mut session,
        conf.clone(),
        jobs,
        connector,
        provisioner,
        cancel,
    )
    .await?;

    if let Err(e) = reporter::report(&session, &conf, &outcome).await {
        eprintln!("warning: report hook failed: {}", e);
    }

    key.remove_files();

    if outcome.ok() {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

/// Build the command prefix from trailing arguments.
///
/// A single argument that tokenizes into multiple words is taken as a
/// raw shell string; anything else is quoted word by word.
fn command_prefix(command: &[String]) -> Result<String> {
    if command.is_empty() {
        bail!("no command given; see --help");
    }
    if command.len() == 1 && cmdline::split(&command[0])?.len() > 1 {
        return Ok(command[0].clone());
    }
    Ok(cmdline::join(command.iter().map(String::as_str)))
}

/// Read jobs from stdin: one line of arguments per job, `#` comments and
/// blank lines skipped.
fn read_jobs(prefix: &str) -> Result<Vec<String>> {
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        bail!("no jobs on stdin; pipe one job per line");
    }

    let mut jobs = Vec::new();
    for line in stdin.lock().lines() {
        let line = line?;
        let line = cmdline::strip_comment(&line).trim().to_string();
        if line.is_empty() {
            continue;
        }
        let args = cmdline::split(&line)?;
        jobs.push(cmdline::job_command(prefix, &args));
    }
    Ok(jobs)
}

/// Interactive confirmation, answered on the controlling terminal.
fn confirm(conf: &TaskConf, jobs: &[String]) -> Result<()> {
    let prefix_len = conf.command.as_deref().map_or(0, str::len);
    let strip = |job: &str| job[prefix_len..].trim().to_string();
    let first = strip(&jobs[0]);
    let last = strip(&jobs[jobs.len() - 1]);
    let job_range = if first == last {
        first
    } else {
        format!("{} .. {}", first, last)
    };

    eprintln!(
        "About to launch {} cloud server{} to execute {} job{} ({}):",
        conf.split,
        if conf.split == 1 { "" } else { "s" },
        jobs.len(),
        if jobs.len() == 1 { "" } else { "s" },
        job_range
    );
    eprintln!("\n{}", conf.fmt());

    // Stdin carries the job list, so the answer comes from the terminal.
    let Ok(tty) = std::fs::File::open("/dev/tty") else {
        return Ok(());
    };
    let mut reader = std::io::BufReader::new(tty);
    loop {
        eprint!("Is this really what you want? [yes/no] ");
        let _ = std::io::stderr().flush();
        let mut answer = String::new();
        if reader.read_line(&mut answer)? == 0 {
            bail!("aborted");
        }
        let answer = answer.trim().to_lowercase();
        if answer.is_empty() {
            continue;
        }
        if answer == "yes" {
            return Ok(());
        }
        bail!("you didn't answer 'yes', aborting");
    }
}

fn setup_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
