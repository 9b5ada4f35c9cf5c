//! The host event loop
//!
//! One thread owns the [`EventLoop`] and is the only thread allowed to touch
//! host values. Other threads reach it through an [`AsyncHandle`]: `send()`
//! queues a wake-up and the registered main-thread callback runs on the next
//! turn. The loop keeps running while its [`KeepAlive`] count is non-zero
//! and returns once it drops to zero with nothing left to do.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::HostConfig;
use crate::env::Env;
use crate::error::HostFault;

type SourceFn = Box<dyn FnMut(&mut Env)>;

/// Reference count that keeps the loop alive.
#[derive(Clone, Debug, Default)]
pub struct KeepAlive {
    refs: Arc<AtomicUsize>,
}

impl KeepAlive {
    pub fn acquire(&self) {
        self.refs.fetch_add(1, Ordering::SeqCst);
    }

    pub fn release(&self) {
        let prev = self.refs.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "keep-alive released more often than acquired");
    }

    pub fn count(&self) -> usize {
        self.refs.load(Ordering::SeqCst)
    }
}

/// Thread-safe handle that wakes one registered loop source.
#[derive(Clone, Debug)]
pub struct AsyncHandle {
    id: usize,
    tx: Sender<usize>,
    keep_alive: KeepAlive,
}

impl AsyncHandle {
    /// Ask the loop to run this source's callback. Never blocks. Returns
    /// false once the loop is gone.
    pub fn send(&self) -> bool {
        self.tx.send(self.id).is_ok()
    }

    pub fn keep_alive(&self) -> &KeepAlive {
        &self.keep_alive
    }
}

/// Why [`EventLoop::run_for`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopExit {
    /// Nothing keeps the loop alive any more.
    Idle,
    /// The deadline passed while work was still outstanding.
    TimedOut,
}

pub struct EventLoop {
    env: Env,
    sources: Vec<Option<SourceFn>>,
    tx: Sender<usize>,
    rx: Receiver<usize>,
    keep_alive: KeepAlive,
}

impl EventLoop {
    pub fn new(config: HostConfig) -> Self {
        let (tx, rx) = mpsc::channel();
        EventLoop {
            env: Env::new(config),
            sources: Vec::new(),
            tx,
            rx,
            keep_alive: KeepAlive::default(),
        }
    }

    pub fn env(&mut self) -> &mut Env {
        &mut self.env
    }

    pub fn keep_alive(&self) -> &KeepAlive {
        &self.keep_alive
    }

    /// Register a main-thread callback that other threads can trigger.
    /// A fresh source does not keep the loop alive.
    pub fn register_async<F>(&mut self, callback: F) -> AsyncHandle
    where
        F: FnMut(&mut Env) + 'static,
    {
        let id = self.sources.len();
        self.sources.push(Some(Box::new(callback)));
        AsyncHandle {
            id,
            tx: self.tx.clone(),
            keep_alive: self.keep_alive.clone(),
        }
    }

    /// Unregister a source. Wake-ups already queued for it are dropped.
    pub fn close_async(&mut self, handle: &AsyncHandle) {
        if let Some(slot) = self.sources.get_mut(handle.id) {
            *slot = None;
        }
    }

    fn dispatch(&mut self, id: usize) -> Result<(), HostFault> {
        // Take the callback out so it can borrow the env mutably.
        let callback = self.sources.get_mut(id).and_then(Option::take);
        if let Some(mut callback) = callback {
            callback(&mut self.env);
            if let Some(slot) = self.sources.get_mut(id) {
                if slot.is_none() {
                    *slot = Some(callback);
                }
            }
        }
        self.env.run_microtasks();
        match self.env.take_fault() {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    /// Run one non-blocking turn: microtasks, then every queued wake-up.
    /// Returns the number of wake-ups processed.
    pub fn run_once(&mut self) -> Result<usize, HostFault> {
        self.env.run_microtasks();
        if let Some(fault) = self.env.take_fault() {
            return Err(fault);
        }
        let mut processed = 0;
        while let Ok(id) = self.rx.try_recv() {
            self.dispatch(id)?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Run until nothing keeps the loop alive.
    pub fn run(&mut self) -> Result<(), HostFault> {
        loop {
            self.run_once()?;
            if self.keep_alive.count() == 0 {
                return Ok(());
            }
            // The loop owns a sender, so recv only returns once a wake-up arrives.
            match self.rx.recv() {
                Ok(id) => self.dispatch(id)?,
                Err(_) => return Ok(()),
            }
        }
    }

    /// Run until `done` holds, checking after every turn. Returns false if
    /// the loop went idle first.
    pub fn run_until<F>(&mut self, mut done: F) -> Result<bool, HostFault>
    where
        F: FnMut() -> bool,
    {
        loop {
            self.run_once()?;
            if done() {
                return Ok(true);
            }
            if self.keep_alive.count() == 0 {
                return Ok(false);
            }
            match self.rx.recv() {
                Ok(id) => self.dispatch(id)?,
                Err(_) => return Ok(false),
            }
        }
    }

    /// Like [`run`](Self::run) but gives up after `timeout`.
    pub fn run_for(&mut self, timeout: Duration) -> Result<LoopExit, HostFault> {
        let deadline = Instant::now() + timeout;
        loop {
            self.run_once()?;
            if self.keep_alive.count() == 0 {
                return Ok(LoopExit::Idle);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(LoopExit::TimedOut);
            }
            match self.rx.recv_timeout(deadline - now) {
                Ok(id) => self.dispatch(id)?,
                Err(RecvTimeoutError::Timeout) => return Ok(LoopExit::TimedOut),
                Err(RecvTimeoutError::Disconnected) => return Ok(LoopExit::Idle),
            }
        }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        EventLoop::new(HostConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::HostValue;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::thread;

    #[test]
    fn test_idle_loop_exits_immediately() {
        let mut event_loop = EventLoop::default();
        let _handle = event_loop.register_async(|_| {});
        assert_eq!(event_loop.run_for(Duration::from_secs(5)), Ok(LoopExit::Idle));
    }

    #[test]
    fn test_wakeup_from_another_thread_runs_on_loop_thread() {
        let mut event_loop = EventLoop::default();
        let loop_thread = thread::current().id();
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        let handle = event_loop.register_async(move |_| {
            assert_eq!(thread::current().id(), loop_thread);
            counter.set(counter.get() + 1);
        });

        handle.keep_alive().acquire();
        let remote = handle.clone();
        let worker = thread::spawn(move || {
            assert!(remote.send());
        });
        worker.join().unwrap();

        assert_eq!(event_loop.run_once(), Ok(1));
        assert_eq!(hits.get(), 1);
        handle.keep_alive().release();
        assert_eq!(event_loop.run_for(Duration::from_secs(5)), Ok(LoopExit::Idle));
    }

    #[test]
    fn test_keep_alive_holds_loop_until_released() {
        let mut event_loop = EventLoop::default();
        let keep_alive = event_loop.keep_alive().clone();
        let handle = event_loop.register_async(move |_| {});
        let _ = handle;
        keep_alive.acquire();
        assert_eq!(
            event_loop.run_for(Duration::from_millis(20)),
            Ok(LoopExit::TimedOut)
        );
        keep_alive.release();
        assert_eq!(event_loop.run_for(Duration::from_secs(5)), Ok(LoopExit::Idle));
    }

    #[test]
    fn test_fatal_exception_stops_the_loop() {
        let mut event_loop = EventLoop::default();
        let handle = event_loop.register_async(|env| {
            env.fatal_exception(HostValue::from("boom"));
        });
        handle.send();
        assert!(matches!(
            event_loop.run(),
            Err(HostFault::UncaughtException(_))
        ));
    }

    #[test]
    fn test_closed_source_ignores_wakeups() {
        let mut event_loop = EventLoop::default();
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        let handle = event_loop.register_async(move |_| counter.set(counter.get() + 1));
        handle.send();
        event_loop.close_async(&handle);
        assert_eq!(event_loop.run_once(), Ok(1));
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn test_run_until_stops_while_still_referenced() {
        let mut event_loop = EventLoop::default();
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        let handle = event_loop.register_async(move |_| counter.set(counter.get() + 1));
        handle.keep_alive().acquire();

        let remote = handle.clone();
        let worker = thread::spawn(move || {
            remote.send();
            remote.send();
        });
        let seen = hits.clone();
        assert_eq!(event_loop.run_until(|| seen.get() >= 2), Ok(true));
        worker.join().unwrap();
        assert_eq!(handle.keep_alive().count(), 1);

        handle.keep_alive().release();
        assert_eq!(event_loop.run_until(|| false), Ok(false));
    }
}
