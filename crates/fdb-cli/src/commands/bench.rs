//! Bench command: many concurrent reads delivered through callbacks

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use clap::Args;
use console::style;
use fdb_host::HostValue;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use super::session::Session;
use crate::OutputFormat;

const KEY_PREFIX: &str = "bench/";

#[derive(Args, Debug)]
pub struct BenchArgs {
    /// Number of keys to write and read back
    #[arg(long, default_value_t = 1000)]
    pub ops: usize,
}

#[derive(Debug, Serialize)]
struct BenchReport {
    ops: usize,
    errors: usize,
    write_ms: f64,
    read_ms: f64,
    reads_per_sec: f64,
}

impl BenchReport {
    fn new(ops: usize, errors: usize, write: Duration, read: Duration) -> Self {
        let read_secs = read.as_secs_f64();
        BenchReport {
            ops,
            errors,
            write_ms: write.as_secs_f64() * 1000.0,
            read_ms: read_secs * 1000.0,
            reads_per_sec: if read_secs > 0.0 { ops as f64 / read_secs } else { 0.0 },
        }
    }
}

fn bench_key(i: usize) -> String {
    format!("{}{:06}", KEY_PREFIX, i)
}

fn progress(ops: usize, format: OutputFormat) -> ProgressBar {
    if matches!(format, OutputFormat::Json) {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(ops as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner} reads [{bar:40}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar
}

pub fn run(args: BenchArgs, session: &mut Session, format: OutputFormat) -> Result<()> {
    if args.ops == 0 {
        bail!("--ops must be at least 1");
    }

    let started = Instant::now();
    session.transact(|_, tr| {
        for i in 0..args.ops {
            let key = bench_key(i);
            tr.set(&HostValue::from(key.as_str()), &HostValue::from(key.as_str()))?;
        }
        Ok(())
    })?;
    let write = started.elapsed();
    log::info!("wrote {} keys in {:?}", args.ops, write);

    let done = Rc::new(Cell::new(0usize));
    let errors = Rc::new(Cell::new(0usize));
    let bar = progress(args.ops, format);
    let callback = {
        let done = done.clone();
        let errors = errors.clone();
        let bar = bar.clone();
        HostValue::function("on_read", move |_, argv| {
            if argv.first().is_some_and(|err| !err.is_nullish()) {
                errors.set(errors.get() + 1);
            }
            done.set(done.get() + 1);
            bar.inc(1);
            Ok(HostValue::Undefined)
        })
    };

    let started = Instant::now();
    let tr = session.transaction()?;
    for i in 0..args.ops {
        let key = bench_key(i);
        tr.get(&HostValue::from(key.as_str()), true, &callback)?;
    }
    log::debug!("{} reads in flight", session.stats().outstanding);
    let finished = session.event_loop().run_until(|| done.get() >= args.ops)?;
    let read = started.elapsed();
    bar.finish_and_clear();
    if !finished {
        bail!("loop went idle after {} of {} reads", done.get(), args.ops);
    }

    let report = BenchReport::new(args.ops, errors.get(), write, read);
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            println!("{} {} ops", style("Bench:").bold(), report.ops);
            println!("  write  {:>10.2} ms", report.write_ms);
            println!("  read   {:>10.2} ms", report.read_ms);
            println!("  rate   {:>10.0} reads/s", report.reads_per_sec);
            if report.errors > 0 {
                println!("  {}", style(format!("{} reads failed", report.errors)).red());
            }
        }
    }
    Ok(())
}
