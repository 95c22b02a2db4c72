//! Small demonstration binary: loads an upstream definition from a TOML file,
//! drives a run of simulated requests against it, and prints a trace of
//! which peer each request landed on and why. Not part of the library's
//! public contract; it exists to exercise `upstream_rr` end to end.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use upstream_rr::{Outcome, Pool, ReleaseOutcome, Selector, ServerSpec};

#[derive(Parser, Debug)]
#[command(name = "upstreamctl", about = "Drive simulated requests against an upstream pool")]
struct Args {
    /// Path to a TOML file with a top-level `[[server]]` array.
    #[arg(short, long)]
    config: String,

    /// Number of simulated requests to run.
    #[arg(short = 'n', long, default_value_t = 20)]
    requests: usize,

    /// Every Nth request simulates a connection failure instead of success
    /// (0 disables simulated failures).
    #[arg(short = 'f', long, default_value_t = 0)]
    fail_every: usize,

    /// Run against a shared-memory-style pool (spinlock locking) instead of
    /// the default process-local pool.
    #[arg(long)]
    shared: bool,
}

#[derive(Debug, Deserialize)]
struct Config {
    #[serde(rename = "server")]
    servers: Vec<ServerSpec>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let raw = std::fs::read_to_string(&args.config)
        .with_context(|| format!("reading config file {:?}", args.config))?;
    let config: Config = toml::from_str(&raw).context("parsing upstream config as TOML")?;

    let pool = Pool::build("demo", &config.servers, args.shared).context("building upstream pool")?;
    let selector = Selector::default();

    for n in 0..args.requests {
        let mut request = selector.init_request(Arc::clone(&pool))?;
        let simulate_failure = args.fail_every != 0 && (n + 1) % args.fail_every == 0;

        // A failure on the first attempt gets one retry against whatever
        // peer `get` hands back next; a real retry driver would keep going
        // until `remaining_tries` hits zero.
        loop {
            match selector.get(&mut request) {
                Outcome::Selected((addr, name)) => {
                    println!(
                        "request {n}: -> {name} ({addr}) [{}]",
                        if simulate_failure { "failed" } else { "ok" }
                    );
                    selector.release(
                        &mut request,
                        if simulate_failure {
                            ReleaseOutcome::Failed
                        } else {
                            ReleaseOutcome::Success
                        },
                    );
                    break;
                }
                Outcome::Busy => {
                    println!("request {n}: busy (remaining_tries={})", request.remaining_tries());
                    break;
                }
            }
        }
    }

    Ok(())
}
