//  Copyright 2024. The Meridian Project
//
//  Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
//  following conditions are met:
//
//  1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
//  disclaimer.
//
//  2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
//  following disclaimer in the documentation and/or other materials provided with the distribution.
//
//  3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
//  products derived from this software without specific prior written permission.
//
//  THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
//  INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
//  DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
//  SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
//  SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
//  WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
//  USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

mod bootstrap;
mod cli;
mod config;
mod herder;
mod ledger;
mod node;

use std::{fs, process};

use clap::Parser;
use log::*;
use meridian_common_types::{NodeKeypair, NodeSeed};
use rand::RngCore;
use tokio::runtime::{self, Runtime};
use tokio_util::sync::CancellationToken;

use crate::{
    bootstrap::spawn_services,
    cli::{Cli, Command},
    config::{ApplicationConfig, NodeConfig},
    node::MeridianNode,
};

const LOG_TARGET: &str = "meridian::node::app";

fn main() {
    if let Err(err) = main_inner() {
        eprintln!("{:?}", err);
        error!(target: LOG_TARGET, "Exiting: {:?}", err);
        process::exit(1);
    }
}

fn main_inner() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    if let Some(Command::Init) = cli.command {
        return init_node(&cli);
    }

    initialize_logging(&cli)?;
    let config = ApplicationConfig::load_from(&cli.config_path())?;
    println!(
        "Meridian node coming up on network \"{}\"",
        config.node.network_passphrase
    );
    let runtime = build_runtime()?;
    runtime.block_on(run_node(&cli, &config))?;
    Ok(())
}

/// Generates a node seed and writes a default configuration that trusts
/// only this node. Refuses to clobber an existing config.
fn init_node(cli: &Cli) -> Result<(), anyhow::Error> {
    let path = cli.config_path();
    if path.exists() {
        return Err(anyhow::anyhow!("{} already exists", path.display()));
    }
    let mut seed_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut seed_bytes);
    let seed = NodeSeed::new(seed_bytes);
    let node_id = NodeKeypair::from_seed(&seed).node_id();

    let config = NodeConfig {
        node_seed: seed.to_hex(),
        ..NodeConfig::default()
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, serde_json::to_vec_pretty(&config)?)?;
    println!("Wrote {}", path.display());
    println!("Node id: {}", node_id);
    Ok(())
}

fn initialize_logging(cli: &Cli) -> Result<(), anyhow::Error> {
    let path = cli.base_dir.join("log4rs.yml");
    if !path.exists() {
        fs::create_dir_all(&cli.base_dir)?;
        fs::write(&path, include_str!("../log4rs_sample.yml"))?;
    }
    log4rs::init_file(&path, Default::default())
        .map_err(|err| anyhow::anyhow!("Could not initialize logging: {}", err))?;
    Ok(())
}

async fn run_node(cli: &Cli, config: &ApplicationConfig) -> Result<(), anyhow::Error> {
    let cancel = CancellationToken::new();

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(target: LOG_TARGET, "Interrupt received, shutting down");
            signal_cancel.cancel();
        }
    });

    let services = spawn_services(config, &cli.base_dir, cancel.clone()).await?;
    info!(target: LOG_TARGET, "🟢 Meridian validator is up and tracking consensus");

    let node = MeridianNode::new(services);
    node.start(cancel).await
}

fn build_runtime() -> Result<Runtime, anyhow::Error> {
    let mut builder = runtime::Builder::new_multi_thread();
    builder
        .enable_all()
        .build()
        .map_err(|err| anyhow::anyhow!("Could not build tokio runtime: {}", err))
}
