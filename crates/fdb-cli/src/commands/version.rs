//! Version command: API, client and cluster versions plus bridge state

use anyhow::{anyhow, Result};
use clap::Args;
use console::style;
use fdb_bridge::decode_version;
use fdb_host::HostValue;
use fdb_native::network::selected_api_version;
use serde_json::json;

use super::session::Session;
use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Also list the storage addresses holding this key
    #[arg(long)]
    pub key: Option<String>,
}

pub fn run(args: VersionArgs, session: &mut Session, format: OutputFormat) -> Result<()> {
    let tr = session.transaction()?;
    let read = tr.get_read_version(&HostValue::Undefined)?;
    let read = session.await_value(read)?;
    let read_version = read
        .as_buffer()
        .ok_or_else(|| anyhow!("read version is not a buffer: {}", read.describe()))
        .and_then(|bytes| Ok(decode_version(bytes)?))?;

    let addresses: Vec<String> = match &args.key {
        Some(key) => {
            let found = tr.get_addresses_for_key(&HostValue::from(key.as_str()), &HostValue::Undefined)?;
            let found = session.await_value(found)?;
            found
                .as_array()
                .unwrap_or_default()
                .iter()
                .filter_map(|a| a.as_str().map(str::to_string))
                .collect()
        }
        None => Vec::new(),
    };

    let api_version = selected_api_version();
    let stats = session.stats();

    match format {
        OutputFormat::Json => {
            let out = json!({
                "api_version": api_version,
                "client_version": env!("CARGO_PKG_VERSION"),
                "read_version": read_version,
                "addresses": args.key.as_ref().map(|_| &addresses),
                "bridge": stats,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            let api = api_version.map_or_else(|| "unset".to_string(), |v| v.to_string());
            println!("{} {}", style("API version:").bold(), api);
            println!("{} {}", style("Client:").bold(), env!("CARGO_PKG_VERSION"));
            println!("{} {}", style("Read version:").bold(), read_version);
            if let Some(key) = &args.key {
                println!("{} {}", style(format!("Addresses for {}:", key)).bold(), addresses.join(", "));
            }
            println!(
                "{} outstanding={} referenced={}",
                style("Bridge:").bold(),
                stats.outstanding,
                stats.referenced
            );
        }
    }
    Ok(())
}
