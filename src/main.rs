// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! boatd - TLS file drop server.
//!
//! Accepts authenticated uploads into per-user repositories. Clients speak
//! a small line-oriented protocol over TLS; each SAVE publishes a versioned
//! file and repoints the `current.<filename>` alias.
//!
//! # Usage
//!
//! ```bash
//! # Start with the default config (/etc/boatd.json)
//! boatd
//!
//! # Custom config and verbose logging
//! boatd --config boatd.json --log-level debug
//!
//! # Produce a password record for the configuration file
//! boatd --hash-password hunter2
//! ```

use anyhow::Context;
use boatd::{BoatServer, ServerConfig};
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_CONFIG_PATH: &str = "/etc/boatd.json";

/// boatd - TLS file drop server with per-user versioned repositories
#[derive(Parser, Debug)]
#[command(name = "boatd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address override
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// TCP port override
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Hash a password into a record for the configuration file, then exit
    #[arg(long, value_name = "PASSWORD")]
    hash_password: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(password) = args.hash_password {
        let record = boatd::auth::generate_password_record(&password)
            .context("could not generate a password record")?;
        println!("{}", record);
        return Ok(());
    }

    let config_path = args
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    info!("loading config from {:?}", config_path);
    let mut config = ServerConfig::from_file(&config_path)
        .with_context(|| format!("could not load {}", config_path.display()))?;

    if let Some(bind) = args.bind {
        config.listen_address = bind;
    }
    if let Some(port) = args.port {
        config.listen_port = port;
    }

    let server = BoatServer::new(config.clone())?;

    info!("+----------------------------------------------------+");
    info!(
        "|       boat server v{}                           |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!(
        "|  Bind:  {:42} |",
        format!("{}:{}", config.listen_address, config.listen_port)
    );
    info!("|  Root:  {:42} |", config.repository_root.display());
    info!("|  Users: {:42} |", server.user_count());
    info!("+----------------------------------------------------+");

    // Handle shutdown signals
    let server_handle = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown signal received, stopping server...");
        server_handle.shutdown();
    });

    server.run().await?;

    info!("boat server stopped");
    Ok(())
}
