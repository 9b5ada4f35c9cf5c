//! Watch command: arm a watch, optionally trigger it, report how it ended

use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use clap::Args;
use console::{style, Emoji};
use fdb_bridge::WatchState;
use fdb_host::HostValue;
use serde_json::json;

use super::session::Session;
use crate::OutputFormat;

static BELL: Emoji<'_, '_> = Emoji("🔔 ", "");

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Key to watch
    pub key: String,

    /// Write this value to the key after arming the watch
    #[arg(long)]
    pub set: Option<String>,

    /// Give up and cancel the watch after this many milliseconds
    #[arg(long, default_value_t = 5000)]
    pub timeout_ms: u64,

    /// Reject on cancellation instead of settling false
    #[arg(long)]
    pub strict: bool,
}

pub fn run(args: WatchArgs, session: &mut Session, format: OutputFormat) -> Result<()> {
    let key = HostValue::from(args.key.as_str());
    let ignore_standard_errors = !args.strict;
    let watch = session.transact(|_, tr| Ok(tr.watch(&key, ignore_standard_errors)?))?;
    log::info!("watch armed on {}", args.key);

    if let Some(value) = &args.set {
        session.transact(|_, tr| {
            tr.set(&key, &HostValue::from(value.as_str()))?;
            Ok(())
        })?;
        log::debug!("wrote {} to trigger the watch", args.key);
    }

    let started = Instant::now();
    let promise = HostValue::Promise(watch.promise().clone());
    let (settled, cancelled) =
        match session.await_value_for(promise.clone(), Duration::from_millis(args.timeout_ms))? {
            Some(value) => (value, false),
            None => {
                watch.cancel();
                (session.await_value(promise)?, true)
            }
        };
    let Some(changed) = settled.as_bool() else {
        bail!("watch settled with {}", settled.describe());
    };
    let elapsed = started.elapsed();

    match format {
        OutputFormat::Json => {
            let out = json!({
                "key": args.key,
                "changed": changed,
                "state": watch.state(),
                "cancelled": cancelled,
                "elapsed_ms": elapsed.as_millis() as u64,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            if changed {
                println!("{}{} changed after {:?}", BELL, style(&args.key).cyan(), elapsed);
            } else if cancelled {
                println!(
                    "{} no change within {}ms, watch cancelled",
                    style(&args.key).cyan(),
                    args.timeout_ms
                );
            } else {
                println!("{} watch ended without a change", style(&args.key).cyan());
            }
            if watch.state() != WatchState::Resolved {
                println!("{}", style(format!("state: {:?}", watch.state())).dim());
            }
        }
    }
    Ok(())
}
