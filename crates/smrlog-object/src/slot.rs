use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use smrlog_types::LogPosition;

use crate::error::{ObjectError, ObjectResult};

enum SlotState {
    Pending,
    Ready(ObjectResult<Value>),
    Taken,
}

/// Single-resolution handle for the outcome of one appended write.
///
/// Resolved at most once, by whichever thread replays the entry; consumed at
/// most once, by the first waiter to take it.
pub struct ResultSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl ResultSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Pending),
            ready: Condvar::new(),
        }
    }

    /// Resolve the slot. Returns `false` if it was already resolved.
    fn resolve(&self, result: ObjectResult<Value>) -> bool {
        let mut state = self.state.lock().expect("slot lock poisoned");
        if !matches!(*state, SlotState::Pending) {
            return false;
        }
        *state = SlotState::Ready(result);
        self.ready.notify_all();
        true
    }

    fn is_pending(&self) -> bool {
        matches!(
            *self.state.lock().expect("slot lock poisoned"),
            SlotState::Pending
        )
    }

    /// Block until resolved or `timeout` elapses, without consuming.
    fn wait_resolved(&self, timeout: Duration) -> bool {
        let state = self.state.lock().expect("slot lock poisoned");
        let (state, _) = self
            .ready
            .wait_timeout_while(state, timeout, |s| matches!(s, SlotState::Pending))
            .expect("slot lock poisoned");
        !matches!(*state, SlotState::Pending)
    }

    /// Block until resolved or `timeout` elapses, then consume the result.
    fn wait_take(&self, position: LogPosition, timeout: Duration) -> ObjectResult<Value> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().expect("slot lock poisoned");
        loop {
            match std::mem::replace(&mut *state, SlotState::Taken) {
                SlotState::Ready(result) => return result,
                SlotState::Taken => return Err(ObjectError::ResultAlreadyConsumed { position }),
                SlotState::Pending => {
                    *state = SlotState::Pending;
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ObjectError::TimeoutWaitingForApply { position, timeout });
                    }
                    state = self
                        .ready
                        .wait_timeout(state, deadline - now)
                        .expect("slot lock poisoned")
                        .0;
                }
            }
        }
    }
}

/// Concurrent table of result slots keyed by log position.
#[derive(Default)]
pub struct PendingResults {
    slots: Mutex<HashMap<LogPosition, Arc<ResultSlot>>>,
}

impl PendingResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending slot for `position`.
    pub fn allocate(&self, position: LogPosition) {
        self.slots
            .lock()
            .expect("lock poisoned")
            .entry(position)
            .or_insert_with(|| Arc::new(ResultSlot::new()));
    }

    /// Resolve the slot at `position`, if one is registered and still pending.
    pub fn resolve(&self, position: LogPosition, result: ObjectResult<Value>) -> bool {
        let slot = self.slots.lock().expect("lock poisoned").get(&position).cloned();
        slot.is_some_and(|slot| slot.resolve(result))
    }

    /// Whether a slot at `position` exists and has not been resolved.
    pub fn is_pending(&self, position: LogPosition) -> bool {
        let slot = self.slots.lock().expect("lock poisoned").get(&position).cloned();
        slot.is_some_and(|slot| slot.is_pending())
    }

    /// Wait up to `timeout` for the slot at `position` to be resolved.
    /// Returns `true` once it is resolved, or if no slot is registered.
    pub fn wait(&self, position: LogPosition, timeout: Duration) -> bool {
        let slot = self.slots.lock().expect("lock poisoned").get(&position).cloned();
        slot.map_or(true, |slot| slot.wait_resolved(timeout))
    }

    /// Drop the slot at `position` without resolving it.
    pub fn discard(&self, position: LogPosition) {
        self.slots.lock().expect("lock poisoned").remove(&position);
    }

    /// Wait for the slot at `position` and consume its result.
    ///
    /// The first successful take removes the slot; later takes fail with
    /// [`ObjectError::ResultAlreadyConsumed`]. A timeout leaves the slot in
    /// place so a later sync can still resolve it.
    pub fn take(&self, position: LogPosition, timeout: Duration) -> ObjectResult<Value> {
        let slot = self
            .slots
            .lock()
            .expect("lock poisoned")
            .get(&position)
            .cloned()
            .ok_or(ObjectError::ResultAlreadyConsumed { position })?;

        let result = slot.wait_take(position, timeout);
        if !matches!(result, Err(ObjectError::TimeoutWaitingForApply { .. })) {
            let mut slots = self.slots.lock().expect("lock poisoned");
            if slots.get(&position).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
                slots.remove(&position);
            }
        }
        result
    }

    pub fn len(&self) -> usize {
        self.slots.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
