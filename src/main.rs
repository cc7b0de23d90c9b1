pub mod models {
    pub mod roborock;
}

pub mod cache;
pub mod client;
pub mod config;
pub mod local {
    pub mod connection;
    pub mod error;
    pub mod protocol;
}
pub mod secrets;
pub mod utils;
pub mod services {
    #[cfg(test)]
    pub mod fakes;
    pub mod lookup;
    pub mod mapping;
    pub mod refresh;
}

use crate::client::RoborockWebClient;
use crate::config::Config;
use crate::local::connection::{LocalClient, LocalOptions};
use crate::secrets::OpCli;
use crate::services::{lookup, refresh};
use log::{error, info};

pub fn run() -> Result<i32, String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (host={}, model={}, protocol={}, queue_timeout={}s, cache_files={})",
        cfg.host,
        cfg.model,
        cfg.local_protocol.map(|v| v.name()).unwrap_or("auto"),
        cfg.queue_timeout.as_secs(),
        cfg.cache_files
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":")
    );

    let options = LocalOptions {
        port: cfg.port,
        queue_timeout: cfg.queue_timeout,
        protocol: cfg.local_protocol,
    };

    // 2) Secrets, cloud refresh, device query, output
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    lookup::run_lookup(
        &cfg,
        &OpCli::new(),
        |email: &str| RoborockWebClient::new(email),
        |identity| LocalClient::new(identity, options),
        refresh::stdin_prompt,
        &mut out,
    )
}

fn check_no_arguments() -> Result<(), String> {
    let mut args = std::env::args_os();
    args.next(); // skip program name

    match args.next() {
        None => Ok(()),
        Some(arg) => match arg.to_str() {
            Some(s) => Err(format!("unrecognised argument: {}", s)),
            None => Err("argument contains invalid UTF-8".to_string()),
        },
    }
}

fn main() {
    if let Err(err) = check_no_arguments() {
        eprintln!("fatal: {}", err);
        std::process::exit(1);
    }

    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    info!(
        "roborock-rooms {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("fatal: {}", e);
            std::process::exit(1);
        }
    }
}
