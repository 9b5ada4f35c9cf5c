//! Key/value commands: get, set, clear and range

use anyhow::{bail, Result};
use clap::Args;
use console::style;
use fdb_bridge::binding::RangeArgs as RangeRequest;
use fdb_host::HostValue;
use serde_json::json;

use super::session::{printable, Session};
use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct GetArgs {
    /// Key to read
    pub key: String,

    /// Read without adding a read conflict
    #[arg(long)]
    pub snapshot: bool,
}

#[derive(Args, Debug)]
pub struct SetArgs {
    pub key: String,
    pub value: String,
}

#[derive(Args, Debug)]
pub struct ClearArgs {
    /// Key to clear, or start of the range with --end
    pub key: String,

    /// Clear every key in [KEY, END)
    #[arg(long)]
    pub end: Option<String>,
}

#[derive(Args, Debug)]
pub struct RangeArgs {
    pub begin: String,
    pub end: String,

    /// Maximum number of rows (0 for one batch)
    #[arg(long, default_value_t = 0)]
    pub limit: usize,

    /// Return rows in descending key order
    #[arg(long)]
    pub reverse: bool,
}

pub fn get(args: GetArgs, session: &mut Session, format: OutputFormat) -> Result<()> {
    let value = session.transact(|s, tr| {
        let read = tr.get(&HostValue::from(args.key.as_str()), args.snapshot, &HostValue::Undefined)?;
        s.await_value(read)
    })?;

    let bytes = match &value {
        HostValue::Null => None,
        other => match other.as_buffer() {
            Some(bytes) => Some(bytes.to_vec()),
            None => bail!("unexpected value {}", other.describe()),
        },
    };

    match format {
        OutputFormat::Json => {
            let out = json!({
                "key": args.key,
                "value": bytes.as_deref().map(printable),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => match bytes {
            Some(bytes) => println!("{} {}", style(&args.key).cyan(), printable(&bytes)),
            None => println!("{} {}", style(&args.key).cyan(), style("not found").dim()),
        },
    }
    Ok(())
}

pub fn set(args: SetArgs, session: &mut Session, format: OutputFormat) -> Result<()> {
    session.transact(|_, tr| {
        tr.set(
            &HostValue::from(args.key.as_str()),
            &HostValue::from(args.value.as_str()),
        )?;
        Ok(())
    })?;
    log::debug!("set {} ({} bytes)", args.key, args.value.len());

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&json!({ "key": args.key, "committed": true }))?);
        }
        OutputFormat::Text => println!("{} {}", style("committed").green(), args.key),
    }
    Ok(())
}

pub fn clear(args: ClearArgs, session: &mut Session, format: OutputFormat) -> Result<()> {
    session.transact(|_, tr| {
        let begin = HostValue::from(args.key.as_str());
        match &args.end {
            Some(end) => tr.clear_range(&begin, &HostValue::from(end.as_str()))?,
            None => tr.clear(&begin)?,
        }
        Ok(())
    })?;

    match format {
        OutputFormat::Json => {
            let out = json!({ "begin": args.key, "end": args.end, "committed": true });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => match &args.end {
            Some(end) => println!("{} [{}, {})", style("cleared").green(), args.key, end),
            None => println!("{} {}", style("cleared").green(), args.key),
        },
    }
    Ok(())
}

pub fn range(args: RangeArgs, session: &mut Session, format: OutputFormat) -> Result<()> {
    let mut request = RangeRequest::keys(
        HostValue::from(args.begin.as_str()),
        HostValue::from(args.end.as_str()),
    );
    request.limit = args.limit;
    request.reverse = args.reverse;

    let result = session.transact(|s, tr| {
        let read = tr.get_range(&request, &HostValue::Undefined)?;
        s.await_value(read)
    })?;
    let (rows, more) = rows_of(&result)?;

    match format {
        OutputFormat::Json => {
            let rows: Vec<_> = rows
                .iter()
                .map(|(k, v)| json!({ "key": printable(k), "value": printable(v) }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&json!({ "rows": rows, "more": more }))?);
        }
        OutputFormat::Text => {
            for (key, value) in &rows {
                println!("{} {}", style(printable(key)).cyan(), printable(value));
            }
            let mut summary = format!("{} rows", rows.len());
            if more {
                summary.push_str(", more available");
            }
            println!("{}", style(summary).dim());
        }
    }
    Ok(())
}

/// Unpack the `{results, more}` object a range read settles with.
fn rows_of(value: &HostValue) -> Result<(Vec<(Vec<u8>, Vec<u8>)>, bool)> {
    let Some(results) = value.get("results").and_then(HostValue::as_array) else {
        bail!("range result has no rows: {}", value.describe());
    };
    let more = value.get("more").and_then(HostValue::as_bool).unwrap_or(false);
    let mut rows = Vec::with_capacity(results.len());
    for pair in results {
        match pair.as_array() {
            Some([key, value]) => match (key.as_buffer(), value.as_buffer()) {
                (Some(k), Some(v)) => rows.push((k.to_vec(), v.to_vec())),
                _ => bail!("malformed row {}", pair.describe()),
            },
            _ => bail!("malformed row {}", pair.describe()),
        }
    }
    Ok((rows, more))
}
