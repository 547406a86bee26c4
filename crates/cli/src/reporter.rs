// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Post-run reporting hooks: `sh:<command>`, `py:<code>`, `mail:<addr>`.
//!
//! Hooks run as subprocesses with the run's summary in `CLOUDTASK_*`
//! environment variables. Hook failures are reported but never change
//! the run's exit status.

use anyhow::{bail, Context, Result};
use ct_core::TaskConf;
use ct_engine::RunOutcome;
use ct_storage::Session;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Ceiling on hook runtime.
const REPORT_TIMEOUT: Duration = Duration::from_secs(60);

/// A parsed reporting hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hook {
    /// Run a shell command.
    Sh(String),
    /// Run `python3 -c <code>`.
    Py(String),
    /// Pipe the summary through `sendmail` to these addresses.
    Mail(Vec<String>),
}

/// Parse a `<kind>:<expr>` hook spec.
pub fn parse(spec: &str) -> Result<Hook> {
    let Some((kind, expr)) = spec.split_once(':') else {
        bail!("can't parse reporting hook '{}'", spec);
    };
    let expr = expr.trim();
    if expr.is_empty() {
        bail!("empty expression in reporting hook '{}'", spec);
    }

    match kind.trim() {
        "sh" => Ok(Hook::Sh(expr.to_string())),
        "py" => Ok(Hook::Py(expr.to_string())),
        "mail" => Ok(Hook::Mail(
            expr.split_whitespace().map(str::to_string).collect(),
        )),
        other => bail!("unsupported reporting hook kind '{}'", other),
    }
}

/// Run the hook configured in `conf.report`, if any.
pub async fn report(session: &Session, conf: &TaskConf, outcome: &RunOutcome) -> Result<()> {
    let Some(spec) = &conf.report else {
        return Ok(());
    };
    let hook = parse(spec)?;

    let summary = format!(
        "session {}: {} jobs - {} succeeded, {} pending, {} timeouts, {} errors\n",
        session.id,
        outcome.total,
        outcome.succeeded,
        outcome.pending,
        outcome.timeouts,
        outcome.errors
    );

    let mut command = match &hook {
        Hook::Sh(expr) => {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(expr);
            cmd
        }
        Hook::Py(code) => {
            let mut cmd = Command::new("python3");
            cmd.arg("-c").arg(code);
            cmd
        }
        Hook::Mail(addresses) => {
            let mut cmd = Command::new("sendmail");
            cmd.args(addresses);
            cmd
        }
    };

    command
        .env("CLOUDTASK_SESSION_ID", session.id.to_string())
        .env("CLOUDTASK_SESSION_LOG", session.paths().log())
        .env(
            "CLOUDTASK_COMMAND",
            conf.command.clone().unwrap_or_default(),
        )
        .env("CLOUDTASK_TOTAL", outcome.total.to_string())
        .env("CLOUDTASK_SUCCEEDED", outcome.succeeded.to_string())
        .env("CLOUDTASK_PENDING", outcome.pending.to_string())
        .env("CLOUDTASK_TIMEOUTS", outcome.timeouts.to_string())
        .env("CLOUDTASK_ERRORS", outcome.errors.to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::null());

    let mut child = command.spawn().context("failed to spawn report hook")?;
    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(summary.as_bytes()).await;
    }

    let status = tokio::time::timeout(REPORT_TIMEOUT, child.wait())
        .await
        .context("report hook timed out")?
        .context("report hook failed")?;
    if !status.success() {
        bail!("report hook exited with {}", status);
    }
    Ok(())
}

#[cfg(test)]
#[path = "reporter_tests.rs"]
mod tests;
