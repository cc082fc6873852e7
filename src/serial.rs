//! Per-object serial lane
//!
//! A host object whose native state mutates (key generation, cipher updates)
//! must never have two work items in flight. Each such object owns a
//! [`SerialLane`]: the first item goes straight to the dispatch queue, later
//! items wait in the lane until the running one finishes. The finished item's
//! delivery is scheduled before the next item is dispatched, so deliveries
//! reach the runtime in submission order.
//!
//! The lane also keeps an outstanding count: items submitted whose delivery
//! has not run yet. It is raised by `submit` and lowered by a delivery hook,
//! both on the runtime thread, so the runtime sees it change only at
//! submission and settlement.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::dispatch::DispatchQueue;
use crate::error::Result;
use crate::invoker::Completion;
use crate::value::NativeValue;

type LaneJob = Box<dyn FnOnce() -> Result<NativeValue> + Send>;

struct LaneItem {
    job: LaneJob,
    completion: Completion,
}

#[derive(Default)]
struct LaneState {
    /// An item is on the dispatch queue or running
    busy: bool,

    /// Items waiting behind the busy one
    pending: VecDeque<LaneItem>,

    /// Owner was reclaimed; new items are cancelled on arrival
    closed: bool,
}

/// Single-in-flight work lane bound to one host object
pub struct SerialLane {
    name: String,
    queue: Arc<DispatchQueue>,
    state: Arc<Mutex<LaneState>>,
    outstanding: Arc<AtomicUsize>,
}

/// Lock a mutex, recovering the data if a panicking holder poisoned it
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SerialLane {
    pub fn new(name: impl Into<String>, queue: Arc<DispatchQueue>) -> Self {
        Self {
            name: name.into(),
            queue,
            state: Arc::new(Mutex::new(LaneState::default())),
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue `job`; its outcome settles `completion`
    pub fn submit<F>(&self, mut completion: Completion, job: F)
    where
        F: FnOnce() -> Result<NativeValue> + Send + 'static,
    {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        let outstanding = Arc::clone(&self.outstanding);
        completion.on_delivery(move |_| {
            outstanding.fetch_sub(1, Ordering::AcqRel);
        });

        let item = LaneItem {
            job: Box::new(job),
            completion,
        };

        let mut state = lock_unpoisoned(&self.state);
        if state.closed {
            drop(state);
            item.completion.cancel();
            return;
        }
        if state.busy {
            tracing::trace!(
                lane = %self.name,
                operation = %item.completion.operation(),
                queued = state.pending.len() + 1,
                "Work item waiting in lane"
            );
            state.pending.push_back(item);
            return;
        }
        state.busy = true;
        drop(state);

        dispatch(Arc::clone(&self.queue), Arc::clone(&self.state), item);
    }

    /// Items submitted whose delivery has not run on the runtime thread yet
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Items in flight or waiting on the worker side
    pub fn pending(&self) -> usize {
        let state = lock_unpoisoned(&self.state);
        state.pending.len() + usize::from(state.busy)
    }

    pub fn is_busy(&self) -> bool {
        lock_unpoisoned(&self.state).busy
    }

    /// Cancel every item that has not been dispatched yet.
    ///
    /// The in-flight item, if any, runs to completion.
    pub fn cancel_pending(&self) -> usize {
        let drained: Vec<LaneItem> = lock_unpoisoned(&self.state).pending.drain(..).collect();
        let count = drained.len();
        for item in drained {
            item.completion.cancel();
        }
        if count > 0 {
            tracing::debug!(lane = %self.name, cancelled = count, "Cancelled queued work items");
        }
        count
    }

    /// Cancel waiting items and refuse new ones
    pub fn close(&self) -> usize {
        lock_unpoisoned(&self.state).closed = true;
        self.cancel_pending()
    }
}

fn dispatch(queue: Arc<DispatchQueue>, state: Arc<Mutex<LaneState>>, item: LaneItem) {
    let LaneItem { job, completion } = item;
    let operation = completion.operation().to_string();
    let next_queue = Arc::clone(&queue);

    queue.execute(operation, job, move |result| {
        // The delivery is scheduled and the lane released under one lock, so the
        // runtime never observes this result while the lane still reads busy.
        let next = {
            let mut guard = lock_unpoisoned(&state);
            completion.complete(result);
            let next = guard.pending.pop_front();
            if next.is_none() {
                guard.busy = false;
            }
            next
        };
        if let Some(item) = next {
            dispatch(next_queue, state, item);
        }
    });
}
