//! Session - the loop, bridge and database one command runs against

use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use fdb_bridge::binding::{open_database_sync, Database, Transaction};
use fdb_bridge::{Bridge, BridgeStats, Config};
use fdb_host::{EventLoop, HostValue, LoopExit, Promise};
use fdb_native::{ErrorCode, Network};
use thiserror::Error;

/// Error class store errors are delivered as.
const ERROR_CLASS: &str = "FDBError";

/// A promise that settled with a rejection.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct Rejected {
    pub message: String,
    pub code: Option<ErrorCode>,
}

impl Rejected {
    fn from_reason(reason: &HostValue) -> Self {
        match reason.as_error() {
            Some(error) => Rejected {
                message: error.to_string(),
                code: error.code,
            },
            None => Rejected {
                message: reason.describe(),
                code: None,
            },
        }
    }
}

pub struct Session {
    event_loop: EventLoop,
    bridge: Bridge,
    db: Rc<Database>,
    network: Option<Network>,
}

impl Session {
    pub fn open(config: &Config) -> Result<Session> {
        let network = Network::start(&config.network).context("failed to start network")?;
        let mut event_loop = EventLoop::new(config.host.clone());
        event_loop.env().register_error_class(ERROR_CLASS);
        let bridge = Bridge::init(&mut event_loop, config.bridge.clone());
        let db = open_database_sync(&bridge, event_loop.env(), &network)
            .context("failed to open database")?;
        log::info!("session open");
        Ok(Session {
            event_loop,
            bridge,
            db,
            network: Some(network),
        })
    }

    pub fn event_loop(&mut self) -> &mut EventLoop {
        &mut self.event_loop
    }

    pub fn transaction(&self) -> Result<Transaction> {
        Ok(self.db.create_transaction()?)
    }

    pub fn stats(&self) -> BridgeStats {
        self.bridge.stats()
    }

    fn promise_of(value: &HostValue) -> Result<Promise> {
        value
            .as_promise()
            .cloned()
            .ok_or_else(|| anyhow!("expected a promise, got {}", value.describe()))
    }

    fn outcome(promise: &Promise) -> Result<HostValue> {
        match promise.outcome() {
            Some(Ok(value)) => Ok(value),
            Some(Err(reason)) => Err(Rejected::from_reason(&reason).into()),
            None => bail!("operation still pending"),
        }
    }

    /// Run the loop until the promise `value` settles.
    pub fn await_value(&mut self, value: HostValue) -> Result<HostValue> {
        let promise = Self::promise_of(&value)?;
        promise.on_settled(self.event_loop.env(), |_, _| {});
        let settled = self.event_loop.run_until(|| !promise.is_pending())?;
        if !settled {
            bail!("event loop went idle before the operation completed");
        }
        Self::outcome(&promise)
    }

    /// Like [`await_value`](Self::await_value) but gives up after `timeout`,
    /// returning `None`.
    pub fn await_value_for(&mut self, value: HostValue, timeout: Duration) -> Result<Option<HostValue>> {
        let promise = Self::promise_of(&value)?;
        promise.on_settled(self.event_loop.env(), |_, _| {});
        let deadline = Instant::now() + timeout;
        while promise.is_pending() {
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let slice = (deadline - now).min(Duration::from_millis(20));
            if self.event_loop.run_for(slice)? == LoopExit::Idle && promise.is_pending() {
                bail!("event loop went idle before the operation completed");
            }
        }
        Self::outcome(&promise).map(Some)
    }

    /// Run `body` in a transaction and commit, retrying retryable store
    /// errors through `on_error`.
    pub fn transact<T, F>(&mut self, mut body: F) -> Result<T>
    where
        F: FnMut(&mut Session, &Transaction) -> Result<T>,
    {
        let tr = self.transaction()?;
        loop {
            let attempt = body(self, &tr).and_then(|value| {
                let commit = tr.commit(&HostValue::Undefined)?;
                self.await_value(commit)?;
                Ok(value)
            });
            let err = match attempt {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            let Some(code) = err.downcast_ref::<Rejected>().and_then(|r| r.code) else {
                return Err(err);
            };
            log::info!("transaction attempt failed with code {}, retrying", code);
            let retry = tr.on_error(code, &HostValue::Undefined)?;
            self.await_value(retry)?;
        }
    }

    /// Tear down the bridge and stop the network threads.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(network) = self.network.take() {
            self.db.close();
            let discarded = self.bridge.teardown();
            if discarded > 0 {
                log::debug!("{} operations abandoned at shutdown", discarded);
            }
            network.stop();
            log::info!("session closed");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Render bytes the way the store's tools print keys: printable ASCII as
/// is, everything else as `\xNN`.
pub fn printable(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if (0x20..0x7f).contains(&b) && b != b'\\' {
            out.push(b as char);
        } else {
            out.push_str(&format!("\\x{:02x}", b));
        }
    }
    out
}
