// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! cloudtask-destroy-workers - destroy listed workers and rewrite the
//! address list with the survivors.
//!
//! Exit codes: 0 all destroyed, 1 fatal error, 2 some survived.

use anyhow::{bail, Context, Result};
use clap::Parser;
use ct_adapters::provisioner::hub::HubProvisioner;
use ct_adapters::Provisioner;
use std::io::Read;

#[derive(Parser, Debug)]
#[command(
    name = "cloudtask-destroy-workers",
    version,
    about = "Destroy cloud workers listed in a file"
)]
struct Cli {
    /// Provisioner credential
    #[arg(long, env = "CLOUDTASK_HUB_APIKEY", hide_env_values = true)]
    hub_apikey: Option<String>,

    /// Path to the address list, or `-` for stdin
    input: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let Some(apikey) = cli.hub_apikey.clone() else {
        bail!("missing required hub API key");
    };

    let raw = if cli.input == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(&cli.input)
            .with_context(|| format!("can't read '{}'", cli.input))?
    };

    let addresses: Vec<String> = raw
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect();
    if addresses.is_empty() {
        println!("no workers to destroy");
        return Ok(());
    }

    let provisioner = match std::env::var("CLOUDTASK_HUB_URL") {
        Ok(url) => HubProvisioner::with_base_url(apikey, url),
        Err(_) => HubProvisioner::new(apikey),
    };

    let destroyed = provisioner
        .destroy(&addresses)
        .await
        .context("destroy failed")?;
    for instance in &destroyed {
        println!("destroyed {} ({})", instance.address, instance.instance_id);
    }
    if destroyed.is_empty() {
        bail!("couldn't destroy any workers");
    }

    let mut left: Vec<String> = addresses
        .into_iter()
        .filter(|addr| !destroyed.iter().any(|i| &i.address == addr))
        .collect();

    if left.is_empty() {
        if cli.input != "-" {
            std::fs::remove_file(&cli.input)?;
        }
        return Ok(());
    }

    left.sort();
    eprintln!("warning: can't destroy {}", left.join(" "));
    if cli.input != "-" {
        std::fs::write(&cli.input, format!("{}\n", left.join("\n")))?;
    }
    std::process::exit(2);
}
