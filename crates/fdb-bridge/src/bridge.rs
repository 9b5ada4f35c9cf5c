//! The bridge service
//!
//! A [`Bridge`] is created once per event loop. Operations issued on the
//! main thread register their future here; the future's ready callback,
//! running on whatever thread resolved it, only marks the completion as
//! fired and queues its id with the [`Dispatcher`]. The loop then wakes
//! the bridge's async source, which drains the queue and runs each
//! continuation on the main thread.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fdb_host::{Deferred, Env, EventLoop, HostValue, Promise};
use fdb_native::{NativeError, NativeFuture};
use serde::Serialize;

use crate::completion::{Completion, Continuation};
use crate::config::BridgeConfig;
use crate::delivery::Delivery;
use crate::dispatch::{CompletionId, Dispatcher};
use crate::error::BridgeError;
use crate::extract::{Extracted, Extractor};
use crate::scratch::{to_string_params, ScratchBuffer, StringParams};
use crate::watch::{Watch, WatchPolicy};

struct Pending {
    completion: Completion,
    /// Set by the ready callback. A fired future must not be cancelled.
    fired: Arc<AtomicBool>,
}

pub(crate) struct BridgeInner {
    config: BridgeConfig,
    dispatcher: Arc<Dispatcher>,
    pending: RefCell<HashMap<CompletionId, Pending>>,
    next_id: Cell<CompletionId>,
    scratch: ScratchBuffer,
}

impl BridgeInner {
    /// Run every queued completion. Stops early once a continuation has
    /// raised a fatal fault.
    fn drain(&self, env: &mut Env) -> usize {
        let mut delivered = 0;
        while !env.has_fault() {
            let Some(id) = self.dispatcher.pop() else {
                break;
            };
            let entry = self.pending.borrow_mut().remove(&id);
            match entry {
                Some(pending) => {
                    log::debug!("delivering completion {}", id);
                    pending.completion.run(env);
                    env.run_microtasks();
                    delivered += 1;
                }
                None => log::warn!("completion {} is no longer registered", id),
            }
        }
        delivered
    }

    /// Cancel a registered future whose ready callback has not fired yet.
    /// Returns whether a cancel was issued.
    pub(crate) fn cancel_unfired(&self, id: CompletionId) -> bool {
        let pending = self.pending.borrow();
        match pending.get(&id) {
            Some(entry) if !entry.fired.load(Ordering::SeqCst) => {
                log::debug!("cancelling completion {}", id);
                entry.completion.future().cancel();
                true
            }
            _ => false,
        }
    }
}

/// Snapshot of the bridge's bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    /// Registered and not yet delivered.
    pub outstanding: usize,
    /// Whether the bridge currently keeps the event loop alive.
    pub referenced: bool,
    pub pending: usize,
    pub closed: bool,
}

/// Handle to the bridge service. Cheap to clone; main thread only.
#[derive(Clone)]
pub struct Bridge {
    inner: Rc<BridgeInner>,
}

impl Bridge {
    /// Create the bridge and hook it into `event_loop`. The bridge does not
    /// keep the loop alive until the first operation is registered.
    pub fn init(event_loop: &mut EventLoop, config: BridgeConfig) -> Bridge {
        let inner = Rc::new_cyclic(|weak: &Weak<BridgeInner>| {
            let source = weak.clone();
            let wake = event_loop.register_async(move |env| {
                if let Some(inner) = source.upgrade() {
                    inner.drain(env);
                }
            });
            BridgeInner {
                scratch: ScratchBuffer::new(config.scratch_capacity),
                config,
                dispatcher: Arc::new(Dispatcher::new(wake)),
                pending: RefCell::new(HashMap::new()),
                next_id: Cell::new(0),
            }
        });
        log::debug!("bridge initialised");
        Bridge { inner }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub(crate) fn downgrade(&self) -> Weak<BridgeInner> {
        Rc::downgrade(&self.inner)
    }

    /// Register `future` so that `continuation` runs on the main thread once
    /// it resolves. On failure the future is destroyed before returning.
    pub(crate) fn register(
        &self,
        future: Box<dyn NativeFuture>,
        continuation: Continuation,
    ) -> Result<CompletionId, BridgeError> {
        let inner = &self.inner;
        inner.dispatcher.register()?;

        let id = inner.next_id.get();
        inner.next_id.set(id + 1);

        let fired = Arc::new(AtomicBool::new(false));
        let callback = {
            let fired = fired.clone();
            let dispatcher = inner.dispatcher.clone();
            Box::new(move || {
                fired.store(true, Ordering::SeqCst);
                dispatcher.submit(id);
            })
        };
        // A ready future fires the callback right here. The id then sits in
        // the queue until the next drain, by which time it is registered.
        if let Err(e) = future.set_callback(callback) {
            inner.dispatcher.unregister();
            log::debug!("could not register completion {}: {}", id, e);
            return Err(e.into());
        }

        inner.pending.borrow_mut().insert(
            id,
            Pending {
                completion: Completion::new(future, continuation),
                fired,
            },
        );
        log::debug!("registered completion {}", id);
        Ok(id)
    }

    /// Issue `future` and report its result through `delivery`. Returns the
    /// promise in promise mode.
    pub fn submit<F: NativeFuture>(
        &self,
        future: F,
        extractor: Extractor,
        delivery: Delivery,
    ) -> Result<Option<Promise>, BridgeError> {
        match delivery {
            Delivery::Promise => {
                let (deferred, promise) = Deferred::new();
                self.register(
                    Box::new(future),
                    Box::new(move |env, future| {
                        let settled = extractor.extract(env, future).into_settled(env);
                        deferred.settle(env, settled);
                        Ok(())
                    }),
                )?;
                Ok(Some(promise))
            }
            Delivery::Callback(callback) => {
                self.register(
                    Box::new(future),
                    Box::new(move |env, future| {
                        let args = extractor.extract(env, future).into_callback_args(env);
                        env.call_function(&callback, &args).map(drop)
                    }),
                )?;
                Ok(None)
            }
        }
    }

    /// [`submit`](Self::submit) returning the host value the issuing call
    /// evaluates to: the promise, or `undefined` in callback mode.
    pub fn deliver<F: NativeFuture>(
        &self,
        future: F,
        extractor: Extractor,
        delivery: Delivery,
    ) -> Result<HostValue, BridgeError> {
        Ok(match self.submit(future, extractor, delivery)? {
            Some(promise) => HostValue::Promise(promise),
            None => HostValue::Undefined,
        })
    }

    pub fn watch<F: NativeFuture>(&self, future: F, policy: WatchPolicy) -> Result<Watch, BridgeError> {
        Watch::arm(self, Box::new(future), policy)
    }

    /// Block the main thread until `future` resolves and extract it in place.
    /// For bootstrap only; nothing else may block the loop.
    pub fn block_on<F: NativeFuture>(
        &self,
        env: &mut Env,
        future: F,
        extractor: Extractor,
    ) -> Result<HostValue, BridgeError> {
        if self.inner.dispatcher.is_closed() {
            return Err(BridgeError::Closed);
        }
        future.block_until_ready();
        match extractor.extract(env, &future) {
            Extracted::Value(value) => Ok(value.unwrap_or(HostValue::Undefined)),
            Extracted::StoreError(code) => Err(NativeError::new(code).into()),
            Extracted::HostError(e) => Err(e.into()),
        }
    }

    /// Marshal a string or buffer argument through the shared scratch buffer.
    pub fn string_params<'a>(&'a self, value: &'a HostValue) -> Result<StringParams<'a>, BridgeError> {
        to_string_params(&self.inner.scratch, value)
    }

    pub fn scratch(&self) -> &ScratchBuffer {
        &self.inner.scratch
    }

    /// Shut the bridge down. Undelivered completions are discarded without
    /// running and their futures destroyed; later operations fail with
    /// [`BridgeError::Closed`]. Returns the number discarded.
    pub fn teardown(&self) -> usize {
        self.inner.dispatcher.abort();
        let discarded: Vec<Pending> = self
            .inner
            .pending
            .borrow_mut()
            .drain()
            .map(|(_, pending)| pending)
            .collect();
        if !discarded.is_empty() {
            log::warn!(
                "bridge teardown discarded {} undelivered completions",
                discarded.len()
            );
        }
        discarded.len()
    }

    pub fn stats(&self) -> BridgeStats {
        let dispatcher = &self.inner.dispatcher;
        BridgeStats {
            outstanding: dispatcher.outstanding(),
            referenced: dispatcher.is_referenced(),
            pending: self.inner.pending.borrow().len(),
            closed: dispatcher.is_closed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdb_host::{HostFault, PromiseState};
    use fdb_native::future::{self, ready};
    use fdb_native::{codes, Payload};
    use std::time::Duration;

    fn setup() -> (EventLoop, Bridge) {
        let mut event_loop = EventLoop::default();
        event_loop.env().register_error_class("FDBError");
        let bridge = Bridge::init(&mut event_loop, BridgeConfig::default());
        (event_loop, bridge)
    }

    fn recorder() -> (HostValue, Rc<RefCell<Vec<Vec<HostValue>>>>) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let sink = calls.clone();
        let callback = HostValue::function("callback", move |_, args| {
            sink.borrow_mut().push(args.to_vec());
            Ok(HostValue::Undefined)
        });
        (callback, calls)
    }

    #[test]
    fn test_promise_read_resolves_with_value() {
        let (mut event_loop, bridge) = setup();
        let (future, resolver) = future::pair();
        let promise = bridge
            .submit(future, Extractor::Value, Delivery::Promise)
            .unwrap()
            .unwrap();
        assert!(promise.is_pending());

        let worker = std::thread::spawn(move || {
            resolver.succeed(Payload::Value(Some(b"hello".to_vec())));
        });
        event_loop.run().unwrap();
        worker.join().unwrap();

        assert_eq!(promise.outcome(), Some(Ok(HostValue::buffer(*b"hello"))));
    }

    #[test]
    fn test_callback_receives_store_error_once() {
        let (mut event_loop, bridge) = setup();
        let (callback, calls) = recorder();
        let (future, resolver) = future::pair();
        let delivery = Delivery::from_arg(&callback).unwrap();
        let returned = bridge.deliver(future, Extractor::Value, delivery).unwrap();
        assert_eq!(returned, HostValue::Undefined);

        resolver.fail(codes::FUTURE_VERSION);
        event_loop.run().unwrap();

        let calls = calls.borrow();
        assert_eq!(calls.len(), 1);
        let err = calls[0][0].as_error().unwrap();
        assert_eq!(err.name, "FDBError");
        assert_eq!(err.code, Some(1009));
        assert_eq!(calls[0][1], HostValue::Undefined);
    }

    #[test]
    fn test_callback_success_leaves_error_slot_empty() {
        let (mut event_loop, bridge) = setup();
        let (callback, calls) = recorder();
        let delivery = Delivery::from_arg(&callback).unwrap();
        bridge
            .submit(ready(Ok(Payload::Key(b"k".to_vec()))), Extractor::Key, delivery)
            .unwrap();
        event_loop.run().unwrap();
        assert_eq!(
            calls.borrow()[0],
            vec![HostValue::Undefined, HostValue::buffer(*b"k")]
        );
    }

    #[test]
    fn test_keep_alive_follows_outstanding_work() {
        let (mut event_loop, bridge) = setup();
        assert!(!bridge.stats().referenced);
        assert_eq!(event_loop.keep_alive().count(), 0);

        let (first, first_resolver) = future::pair();
        let (second, second_resolver) = future::pair();
        bridge.submit(first, Extractor::Void, Delivery::Promise).unwrap();
        bridge.submit(second, Extractor::Void, Delivery::Promise).unwrap();
        assert_eq!(bridge.stats().outstanding, 2);
        assert_eq!(event_loop.keep_alive().count(), 1);

        first_resolver.succeed(Payload::Void);
        event_loop.run_once().unwrap();
        assert_eq!(bridge.stats().outstanding, 1);
        assert!(bridge.stats().referenced);

        second_resolver.succeed(Payload::Void);
        event_loop.run_once().unwrap();
        assert_eq!(
            bridge.stats(),
            BridgeStats {
                outstanding: 0,
                referenced: false,
                pending: 0,
                closed: false,
            }
        );
        assert_eq!(event_loop.keep_alive().count(), 0);
    }

    #[test]
    fn test_idle_bridge_does_not_block_loop() {
        let (mut event_loop, _bridge) = setup();
        assert_eq!(
            event_loop.run_for(Duration::from_secs(5)).unwrap(),
            fdb_host::LoopExit::Idle
        );
    }

    #[test]
    fn test_continuation_issuing_new_work_keeps_loop_alive() {
        let (mut event_loop, bridge) = setup();
        let follow_up = Rc::new(RefCell::new(None));
        let slot = follow_up.clone();
        let chained = bridge.clone();
        let first = HostValue::function("first", move |_, _| {
            let promise = chained
                .submit(
                    ready(Ok(Payload::Version(7))),
                    Extractor::Version,
                    Delivery::Promise,
                )
                .map_err(|e| HostValue::from(e.to_string().as_str()))?;
            *slot.borrow_mut() = promise;
            Ok(HostValue::Undefined)
        });
        let (future, resolver) = future::pair();
        bridge
            .submit(future, Extractor::Void, Delivery::from_arg(&first).unwrap())
            .unwrap();
        resolver.succeed(Payload::Void);
        event_loop.run().unwrap();

        let promise = follow_up.borrow().clone().unwrap();
        assert_eq!(
            promise.outcome(),
            Some(Ok(HostValue::buffer(vec![0, 0, 0, 0, 0, 0, 0, 7])))
        );
        assert_eq!(bridge.stats().outstanding, 0);
    }

    #[test]
    fn test_many_producer_threads() {
        let (mut event_loop, bridge) = setup();
        let mut promises = Vec::new();
        let mut batches: Vec<Vec<fdb_native::Resolver>> = (0..4).map(|_| Vec::new()).collect();
        for i in 0..32 {
            let (future, resolver) = future::pair();
            promises.push(
                bridge
                    .submit(future, Extractor::Version, Delivery::Promise)
                    .unwrap()
                    .unwrap(),
            );
            batches[i / 8].push(resolver);
        }
        let workers: Vec<_> = batches
            .into_iter()
            .enumerate()
            .map(|(b, batch)| {
                std::thread::spawn(move || {
                    for (i, resolver) in batch.into_iter().enumerate() {
                        resolver.succeed(Payload::Version((b * 8 + i) as i64));
                    }
                })
            })
            .collect();
        event_loop.run().unwrap();
        for worker in workers {
            worker.join().unwrap();
        }
        for (i, promise) in promises.iter().enumerate() {
            let expected = (i as i64).to_be_bytes().to_vec();
            assert_eq!(promise.outcome(), Some(Ok(HostValue::Buffer(expected))));
        }
    }

    #[test]
    fn test_throwing_callback_is_fatal() {
        let (mut event_loop, bridge) = setup();
        let thrower = HostValue::function("thrower", |_, _| Err(HostValue::from("boom")));
        bridge
            .submit(
                ready(Ok(Payload::Void)),
                Extractor::Void,
                Delivery::from_arg(&thrower).unwrap(),
            )
            .unwrap();
        assert!(matches!(
            event_loop.run(),
            Err(HostFault::UncaughtException(_))
        ));
    }

    #[test]
    fn test_unobserved_rejection_is_fatal() {
        let (mut event_loop, bridge) = setup();
        let _ = bridge
            .submit(ready(Err(codes::NOT_COMMITTED)), Extractor::Void, Delivery::Promise)
            .unwrap();
        assert!(matches!(
            event_loop.run(),
            Err(HostFault::UnhandledRejection(_))
        ));
    }

    #[test]
    fn test_registration_failure_destroys_future() {
        let (event_loop, bridge) = setup();
        let (future, resolver) = future::pair();
        future.set_callback(Box::new(|| {})).unwrap();
        let result = bridge.submit(future, Extractor::Void, Delivery::Promise);
        assert_eq!(
            result.unwrap_err(),
            BridgeError::Native(NativeError::new(codes::CLIENT_INVALID_OPERATION))
        );
        assert!(resolver.is_destroyed());
        assert_eq!(bridge.stats().outstanding, 0);
        assert_eq!(event_loop.keep_alive().count(), 0);
    }

    #[test]
    fn test_teardown_discards_without_running() {
        let (mut event_loop, bridge) = setup();
        let (callback, calls) = recorder();
        let (first, first_resolver) = future::pair();
        let (second, second_resolver) = future::pair();
        let promise = bridge
            .submit(first, Extractor::Void, Delivery::Promise)
            .unwrap()
            .unwrap();
        bridge
            .submit(second, Extractor::Void, Delivery::from_arg(&callback).unwrap())
            .unwrap();
        second_resolver.succeed(Payload::Void);

        assert_eq!(bridge.teardown(), 2);
        assert!(first_resolver.is_destroyed());
        assert_eq!(event_loop.keep_alive().count(), 0);

        event_loop.run().unwrap();
        assert!(calls.borrow().is_empty());
        assert_eq!(promise.state(), PromiseState::Pending);

        let (late, late_resolver) = future::pair();
        assert_eq!(
            bridge.submit(late, Extractor::Void, Delivery::Promise).unwrap_err(),
            BridgeError::Closed
        );
        assert!(late_resolver.is_destroyed());
        assert!(bridge.stats().closed);
    }

    #[test]
    fn test_block_on_extracts_in_place() {
        let (mut event_loop, bridge) = setup();
        let (future, resolver) = future::pair();
        let worker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            resolver.succeed(Payload::Version(42));
        });
        let value = bridge
            .block_on(event_loop.env(), future, Extractor::Version)
            .unwrap();
        worker.join().unwrap();
        assert_eq!(value, HostValue::buffer(42i64.to_be_bytes()));
        assert_eq!(bridge.stats().outstanding, 0);

        let err = bridge
            .block_on(event_loop.env(), ready(Err(codes::NETWORK_NOT_SETUP)), Extractor::Void)
            .unwrap_err();
        assert_eq!(err, BridgeError::Native(NativeError::new(codes::NETWORK_NOT_SETUP)));
    }
}
