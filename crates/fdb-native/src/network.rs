//! API version selection and the network thread pool

use std::sync::{Arc, Mutex};
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tokio::runtime::{Builder, Handle, Runtime};

use crate::database::Database;
use crate::error::{codes, NativeError};
use crate::future::{self, Payload, Resolver, StoreFuture};
use crate::store::Store;

/// Newest API version this client speaks.
pub const MAX_API_VERSION: i32 = 710;
/// Oldest API version still accepted.
pub const MIN_API_VERSION: i32 = 500;

static SELECTED_API_VERSION: OnceCell<i32> = OnceCell::new();

/// Latch the API version for the whole process. Selecting the same version
/// again is fine; any other version fails.
pub fn select_api_version(version: i32) -> Result<(), NativeError> {
    if !(MIN_API_VERSION..=MAX_API_VERSION).contains(&version) {
        return Err(NativeError::new(codes::API_VERSION_NOT_SUPPORTED));
    }
    let selected = *SELECTED_API_VERSION.get_or_init(|| {
        log::debug!("selected API version {}", version);
        version
    });
    if selected != version {
        return Err(NativeError::new(codes::API_VERSION_ALREADY_SET));
    }
    Ok(())
}

pub fn selected_api_version() -> Option<i32> {
    SELECTED_API_VERSION.get().copied()
}

/// Network settings (`[network]` section)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Worker threads resolving futures.
    pub worker_threads: usize,
    /// Simulated round-trip added to every operation.
    pub latency_ms: u64,
    pub api_version: i32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            worker_threads: 2,
            latency_ms: 0,
            api_version: MAX_API_VERSION,
        }
    }
}

/// Where futures get resolved: the network runtime plus simulated latency.
#[derive(Clone, Debug)]
pub(crate) struct Executor {
    handle: Handle,
    latency: Duration,
}

impl Executor {
    pub(crate) fn deliver(&self, resolver: Resolver, outcome: future::Outcome) {
        self.deliver_after(resolver, outcome, Duration::ZERO);
    }

    pub(crate) fn deliver_after(
        &self,
        mut resolver: Resolver,
        outcome: future::Outcome,
        delay: Duration,
    ) {
        let delay = self.latency + delay;
        self.handle.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            resolver.resolve(outcome);
        });
    }
}

/// The running network: worker threads and the cluster they talk to.
pub struct Network {
    runtime: Runtime,
    executor: Executor,
    cluster: Arc<Mutex<Store>>,
}

impl Network {
    /// Select the configured API version and start the worker threads.
    pub fn start(config: &NetworkConfig) -> Result<Network, NativeError> {
        select_api_version(config.api_version)?;
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .thread_name("fdb-network")
            .enable_all()
            .build()
            .map_err(|e| {
                log::error!("failed to start network threads: {}", e);
                NativeError::new(codes::INTERNAL_ERROR)
            })?;
        let executor = Executor {
            handle: runtime.handle().clone(),
            latency: Duration::from_millis(config.latency_ms),
        };
        log::debug!(
            "network started with {} worker threads",
            config.worker_threads.max(1)
        );
        Ok(Network {
            runtime,
            executor,
            cluster: Arc::new(Mutex::new(Store::new())),
        })
    }

    /// Open the cluster's database. The future resolves on a worker thread.
    pub fn create_database(&self) -> StoreFuture {
        let (future, resolver) = future::pair();
        let db = Database::new(self.cluster.clone(), self.executor.clone());
        self.executor.deliver(resolver, Ok(Payload::Database(db)));
        future
    }

    pub fn handle(&self) -> &Handle {
        self.runtime.handle()
    }

    /// Stop the worker threads. Operations still in flight are dropped,
    /// which breaks their futures.
    pub fn stop(self) {
        log::debug!("stopping network");
        self.runtime.shutdown_timeout(Duration::from_secs(1));
    }
}
