//! Single-slot suspension primitive driving all playback waits.
//!
//! The engine suspends in exactly three places: the per-literal pacing gap,
//! the `delay` directive, and the `async` directive's external completion.
//! All three go through this one slot, so cancellation and forced
//! resolution are implemented once. At most one wait is outstanding at any
//! moment.
//!
//! Time is logical, in milliseconds. The owner moves the clock with
//! [`Scheduler::fire_due`]; nothing here touches the wall clock.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;

use crate::primitives::Millis;

/// A settle-once completion cell, the single-threaded analogue of a promise.
///
/// A registered function returns a clone of one of these from an `async`
/// directive and settles it later, optionally with a value. Settling or
/// cancelling twice is a no-op, and a settle after a cancel is ignored, so a
/// host resolving a completion that a `skip()` or a new `write()` already
/// discarded does nothing.
#[derive(Clone, Default)]
pub struct Completion {
    inner: Rc<RefCell<CompletionState>>,
}

#[derive(Default)]
struct CompletionState {
    settled: bool,
    cancelled: bool,
    value: Option<Value>,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settles the completion, optionally carrying a value to inject.
    pub fn settle(&self, value: Option<Value>) {
        let mut state = self.inner.borrow_mut();
        if state.settled || state.cancelled {
            return;
        }
        state.settled = true;
        state.value = value;
    }

    /// Discards the completion; later settles are ignored.
    pub fn cancel(&self) {
        let mut state = self.inner.borrow_mut();
        if state.settled || state.cancelled {
            return;
        }
        state.cancelled = true;
    }

    pub fn is_settled(&self) -> bool {
        self.inner.borrow().settled
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.borrow().cancelled
    }

    pub(crate) fn take_value(&self) -> Option<Value> {
        self.inner.borrow_mut().value.take()
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.borrow();
        f.debug_struct("Completion")
            .field("settled", &state.settled)
            .field("cancelled", &state.cancelled)
            .finish()
    }
}

/// Which suspension point produced the outstanding wait.
///
/// `pause()` cancels pacing waits only; an in-flight directive wait keeps
/// running and its effect still applies once it resolves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// The fixed gap between two literal tokens.
    Pacing,
    /// A `delay` or `async` directive.
    Directive,
}

/// The outstanding wait itself.
#[derive(Debug)]
pub enum Wait {
    Timer { deadline: Millis },
    External(Completion),
}

/// A resolved wait handed back to the engine.
#[derive(Debug)]
pub struct Resolved {
    pub origin: Origin,
    /// Value carried by a settled external completion, if any.
    pub value: Option<Value>,
}

#[derive(Debug)]
struct Pending {
    wait: Wait,
    origin: Origin,
}

/// Single-slot scheduler owning the logical clock.
#[derive(Debug, Default)]
pub struct Scheduler {
    now: Millis,
    pending: Option<Pending>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current logical time in milliseconds.
    pub fn now(&self) -> Millis {
        self.now
    }

    pub fn is_suspended(&self) -> bool {
        self.pending.is_some()
    }

    /// Deadline of the pending timer wait, if that is what the slot holds.
    pub fn next_deadline(&self) -> Option<Millis> {
        match &self.pending {
            Some(Pending {
                wait: Wait::Timer { deadline },
                ..
            }) => Some(*deadline),
            _ => None,
        }
    }

    /// True while the slot holds an unsettled external completion.
    pub fn awaiting_external(&self) -> bool {
        matches!(
            &self.pending,
            Some(Pending {
                wait: Wait::External(_),
                ..
            })
        )
    }

    /// Schedules a timer wait `duration` ms from now. The slot must be free.
    pub fn schedule(&mut self, duration: Millis, origin: Origin) {
        debug_assert!(self.pending.is_none(), "suspension slot already occupied");
        self.pending = Some(Pending {
            wait: Wait::Timer {
                deadline: self.now + duration.max(0.0),
            },
            origin,
        });
    }

    /// Parks the slot on an externally settled completion.
    pub fn await_external(&mut self, completion: Completion, origin: Origin) {
        debug_assert!(self.pending.is_none(), "suspension slot already occupied");
        self.pending = Some(Pending {
            wait: Wait::External(completion),
            origin,
        });
    }

    /// Cancels a pending pacing wait; directive waits are left in flight.
    /// Returns whether anything was cancelled.
    pub fn cancel_pacing(&mut self) -> bool {
        match &self.pending {
            Some(p) if p.origin == Origin::Pacing => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    /// Discards whatever the slot holds. An external completion is
    /// cancelled so a late settle by the host is ignored.
    pub fn cancel_all(&mut self) {
        if let Some(Pending {
            wait: Wait::External(completion),
            ..
        }) = self.pending.take()
        {
            completion.cancel();
        }
    }

    /// Advances the clock up to `target`, resolving the pending timer if its
    /// deadline falls within reach. The clock stops at the deadline so the
    /// owner can run follow-up steps (which may schedule the next wait)
    /// before advancing further.
    pub fn fire_due(&mut self, target: Millis) -> Option<Resolved> {
        let due = match &self.pending {
            Some(Pending {
                wait: Wait::Timer { deadline },
                ..
            }) if *deadline <= target => Some(*deadline),
            _ => None,
        };
        match due {
            Some(deadline) => {
                self.now = self.now.max(deadline);
                let pending = self.pending.take().expect("checked above");
                Some(Resolved {
                    origin: pending.origin,
                    value: None,
                })
            }
            None => {
                self.now = self.now.max(target);
                None
            }
        }
    }

    /// Resolves the slot if it holds a settled external completion.
    pub fn poll_external(&mut self) -> Option<Resolved> {
        let (cancelled, settled) = match &self.pending {
            Some(Pending {
                wait: Wait::External(completion),
                ..
            }) => (completion.is_cancelled(), completion.is_settled()),
            _ => return None,
        };
        if cancelled {
            self.pending = None;
            return None;
        }
        if !settled {
            return None;
        }
        let pending = self.pending.take().expect("checked above");
        let Wait::External(completion) = pending.wait else {
            unreachable!("slot checked to be external");
        };
        Some(Resolved {
            origin: pending.origin,
            value: completion.take_value(),
        })
    }
}
