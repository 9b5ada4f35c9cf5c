//! Cross-thread completion dispatch
//!
//! Library threads call [`Dispatcher::submit`] when a future becomes ready;
//! the main thread drains the queue with [`Dispatcher::pop`]. The
//! dispatcher also owns the loop reference: it holds the event loop open
//! exactly while at least one registered completion has not been delivered.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use fdb_host::AsyncHandle;

use crate::error::BridgeError;

/// Identifies one registered completion.
pub type CompletionId = u64;

#[derive(Debug, Default)]
struct DispatchState {
    queue: VecDeque<CompletionId>,
    /// Registered and not yet popped.
    outstanding: usize,
    referenced: bool,
    closed: bool,
}

#[derive(Debug)]
pub struct Dispatcher {
    state: Mutex<DispatchState>,
    wake: AsyncHandle,
}

impl Dispatcher {
    /// A new dispatcher does not hold the loop open.
    pub fn new(wake: AsyncHandle) -> Self {
        Dispatcher {
            state: Mutex::new(DispatchState::default()),
            wake,
        }
    }

    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count a completion as outstanding. Main thread only.
    pub fn register(&self) -> Result<(), BridgeError> {
        let mut state = self.lock();
        if state.closed {
            return Err(BridgeError::Closed);
        }
        state.outstanding += 1;
        if state.outstanding == 1 && !state.referenced {
            self.wake.keep_alive().acquire();
            state.referenced = true;
        }
        Ok(())
    }

    /// Undo a [`register`](Self::register) whose completion never got a callback.
    pub fn unregister(&self) {
        let mut state = self.lock();
        Self::settle_one(&mut state, &self.wake);
    }

    fn settle_one(state: &mut DispatchState, wake: &AsyncHandle) {
        state.outstanding = state.outstanding.saturating_sub(1);
        if state.outstanding == 0 && state.referenced {
            wake.keep_alive().release();
            state.referenced = false;
        }
    }

    /// Queue a ready completion and wake the main thread. Safe from any
    /// thread and never blocks on the main thread. Returns false once the
    /// dispatcher is closed.
    pub fn submit(&self, id: CompletionId) -> bool {
        {
            let mut state = self.lock();
            if state.closed {
                return false;
            }
            state.queue.push_back(id);
        }
        if !self.wake.send() {
            log::warn!("event loop gone, completion {} will not be delivered", id);
            return false;
        }
        true
    }

    /// Take the next ready completion. The outstanding count drops before
    /// the caller runs its continuation, so a continuation that issues new
    /// work re-references the loop. Main thread only.
    pub fn pop(&self) -> Option<CompletionId> {
        let mut state = self.lock();
        let id = state.queue.pop_front()?;
        Self::settle_one(&mut state, &self.wake);
        Some(id)
    }

    /// Close the dispatcher: drop queued completions, release the loop and
    /// refuse further work. Returns the number of completions that were
    /// still outstanding.
    pub fn abort(&self) -> usize {
        let mut state = self.lock();
        let outstanding = state.outstanding;
        state.closed = true;
        state.queue.clear();
        state.outstanding = 0;
        if state.referenced {
            self.wake.keep_alive().release();
            state.referenced = false;
        }
        outstanding
    }

    pub fn outstanding(&self) -> usize {
        self.lock().outstanding
    }

    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_referenced(&self) -> bool {
        self.lock().referenced
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdb_host::EventLoop;
    use std::sync::Arc;

    fn dispatcher(event_loop: &mut EventLoop) -> Dispatcher {
        Dispatcher::new(event_loop.register_async(|_| {}))
    }

    #[test]
    fn test_reference_tracks_outstanding() {
        let mut event_loop = EventLoop::default();
        let dispatcher = dispatcher(&mut event_loop);
        assert!(!dispatcher.is_referenced());

        dispatcher.register().unwrap();
        dispatcher.register().unwrap();
        assert!(dispatcher.is_referenced());
        assert_eq!(event_loop.keep_alive().count(), 1);

        assert!(dispatcher.submit(1));
        assert_eq!(dispatcher.pop(), Some(1));
        assert!(dispatcher.is_referenced());

        dispatcher.submit(2);
        assert_eq!(dispatcher.pop(), Some(2));
        assert!(!dispatcher.is_referenced());
        assert_eq!(event_loop.keep_alive().count(), 0);
        assert_eq!(dispatcher.pop(), None);
    }

    #[test]
    fn test_unregister_releases_reference() {
        let mut event_loop = EventLoop::default();
        let dispatcher = dispatcher(&mut event_loop);
        dispatcher.register().unwrap();
        dispatcher.unregister();
        assert_eq!(dispatcher.outstanding(), 0);
        assert_eq!(event_loop.keep_alive().count(), 0);
    }

    #[test]
    fn test_submissions_from_many_threads_are_all_queued() {
        let mut event_loop = EventLoop::default();
        let dispatcher = Arc::new(dispatcher(&mut event_loop));
        for _ in 0..64 {
            dispatcher.register().unwrap();
        }
        let workers: Vec<_> = (0..4u64)
            .map(|t| {
                let dispatcher = dispatcher.clone();
                std::thread::spawn(move || {
                    for i in 0..16 {
                        assert!(dispatcher.submit(t * 16 + i));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        let mut seen: Vec<_> = std::iter::from_fn(|| dispatcher.pop()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..64).collect::<Vec<_>>());
        assert!(!dispatcher.is_referenced());
    }

    #[test]
    fn test_abort_refuses_new_work() {
        let mut event_loop = EventLoop::default();
        let dispatcher = dispatcher(&mut event_loop);
        dispatcher.register().unwrap();
        dispatcher.register().unwrap();
        dispatcher.submit(7);

        assert_eq!(dispatcher.abort(), 2);
        assert_eq!(dispatcher.queued(), 0);
        assert_eq!(event_loop.keep_alive().count(), 0);
        assert!(!dispatcher.submit(8));
        assert_eq!(dispatcher.register(), Err(BridgeError::Closed));
    }
}
