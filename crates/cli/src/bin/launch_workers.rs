// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! cloudtask-launch-workers - launch a persistent pool of workers and
//! write their addresses to a file as they boot.
//!
//! Cloudtask launches and destroys workers automatically when needed, but
//! a hand-managed pool is sometimes preferable. Interrupting with ctrl-c
//! drains cleanly: instances not yet listed are destroyed, not leaked.

use anyhow::{bail, Context, Result};
use clap::Parser;
use ct_adapters::provisioner::hub::HubProvisioner;
use ct_adapters::{Instance, LaunchOptions, ProvisionError, Provisioner};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(
    name = "cloudtask-launch-workers",
    version,
    about = "Launch cloud workers and write their addresses to a file"
)]
struct Cli {
    /// Provisioner credential
    #[arg(long, env = "CLOUDTASK_HUB_APIKEY", hide_env_values = true)]
    hub_apikey: Option<String>,

    /// Backup to restore on launch
    #[arg(long, value_name = "ID")]
    backup_id: Option<u64>,

    /// Region for instance launch
    #[arg(long, default_value = "us-east-1")]
    region: String,

    /// Instance size
    #[arg(long, default_value = "m1.small")]
    size: String,

    /// Instance type
    #[arg(long = "type", default_value = "s3")]
    kind: String,

    /// Hub description label for the launched servers
    #[arg(long, default_value = "Cloudtask worker")]
    label: String,

    /// How many workers to launch
    howmany: u32,

    /// Path to write the address list to, or `-` for stdout
    output: String,
}

enum Output {
    Stdout,
    File(std::fs::File),
}

impl Output {
    fn write_address(&mut self, address: &str) -> Result<()> {
        match self {
            Output::Stdout => {
                println!("{}", address);
                std::io::stdout().flush()?;
            }
            Output::File(file) => {
                writeln!(file, "{}", address)?;
                file.flush()?;
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let Some(apikey) = cli.hub_apikey.clone() else {
        bail!("missing required hub API key");
    };
    if cli.howmany < 1 {
        bail!("illegal howmany value '{}'", cli.howmany);
    }

    let mut output = if cli.output == "-" {
        Output::Stdout
    } else {
        // Refuse to clobber an existing list.
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&cli.output)
            .with_context(|| format!("can't create '{}'", cli.output))?;
        Output::File(file)
    };

    let provisioner = Arc::new(match std::env::var("CLOUDTASK_HUB_URL") {
        Ok(url) => HubProvisioner::with_base_url(apikey, url),
        Err(_) => HubProvisioner::new(apikey),
    });

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("interrupted, draining pending launches");
                cancel.cancel();
            }
        });
    }

    let options = LaunchOptions {
        region: cli.region.clone(),
        size: cli.size.clone(),
        kind: cli.kind.clone(),
        label: cli.label.clone(),
        ami_id: None,
        snapshot_id: None,
        backup_id: cli.backup_id,
    };

    let (tx, mut rx) = mpsc::channel::<Instance>(cli.howmany as usize);
    let launch = {
        let provisioner = Arc::clone(&provisioner);
        let cancel = cancel.clone();
        tokio::spawn(async move { provisioner.launch(cli.howmany, &options, tx, &cancel).await })
    };

    let mut launched = 0u32;
    while let Some(instance) = rx.recv().await {
        output.write_address(&instance.address)?;
        launched += 1;
    }

    match launch.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(ProvisionError::Stopped)) => {
            eprintln!("stopped after {} of {} workers", launched, cli.howmany);
            std::process::exit(1);
        }
        Ok(Err(e)) => Err(e).context("launch failed"),
        Err(e) => Err(e).context("launch task failed"),
    }
}
