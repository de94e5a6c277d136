//! `shellgate probe`

use anyhow::{bail, Result};
use clap::Args;
use shellgate_core::{Prober, UserFriendlyError, DEFAULT_SSH_PORT};
use std::time::Duration;

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Host name or IP address
    pub host: String,
    /// SSH port
    #[arg(short, long, default_value_t = DEFAULT_SSH_PORT)]
    pub port: u16,
    /// Timeout in seconds
    #[arg(short, long, default_value_t = 5)]
    pub timeout: u64,
}

pub async fn run(args: ProbeArgs) -> Result<()> {
    if args.timeout == 0 {
        bail!("--timeout must be at least 1 second");
    }

    let outcome = Prober::new(Duration::from_secs(args.timeout))
        .probe(&args.host, args.port)
        .await;

    match outcome.into_result(&args.host, args.port) {
        Ok(()) => {
            println!("{}:{} is reachable", args.host, args.port);
            Ok(())
        }
        Err(e) => {
            if let Some(hint) = e.suggestion() {
                eprintln!("hint: {}", hint);
            }
            bail!(e.user_message())
        }
    }
}
