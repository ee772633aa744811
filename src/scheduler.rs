//! Event scheduler (C2).
//!
//! Holds a small fixed-capacity set of timed events keyed by a closed
//! `EventKind` enum. `advance` is the only operation on the hot path: it
//! subtracts elapsed cycles from every live event, fires anything whose
//! countdown reaches zero, and returns the soonest remaining deadline so
//! the CPU loop can bound its next execution slice.

const MAX_EVENTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    PpuPhase,
    TimerOverflow(u8),
}

#[derive(Debug, Clone, Copy)]
struct ScheduledEvent {
    kind: EventKind,
    countdown: i64,
}

pub struct Scheduler {
    slots: [Option<ScheduledEvent>; MAX_EVENTS],
}

impl Scheduler {
    pub fn new() -> Self {
        Self { slots: [None; MAX_EVENTS] }
    }

    pub fn reset(&mut self) {
        self.slots = [None; MAX_EVENTS];
    }

    /// Register (or reschedule, if already present) an event for `cycles` from now.
    pub fn register(&mut self, kind: EventKind, cycles: i64) {
        if let Some(slot) = self.slots.iter_mut().flatten().find(|e| e.kind == kind) {
            slot.countdown = cycles;
            return;
        }
        if let Some(free) = self.slots.iter_mut().find(|s| s.is_none()) {
            *free = Some(ScheduledEvent { kind, countdown: cycles });
        }
    }

    pub fn unregister(&mut self, kind: EventKind) {
        for slot in self.slots.iter_mut() {
            if slot.map(|e| e.kind == kind).unwrap_or(false) {
                *slot = None;
            }
        }
    }

    /// Smallest countdown across all live events, without mutating anything.
    /// Used to bound a HALT slice to the next deadline instead of stepping
    /// one cycle at a time.
    pub fn min_deadline(&self) -> Option<i64> {
        self.slots.iter().flatten().map(|e| e.countdown).min()
    }

    /// Subtract `elapsed` from every live event, draining any that fire into `fired`.
    /// Returns the smallest remaining countdown across all live events, if any.
    pub fn advance(&mut self, elapsed: i64, fired: &mut Vec<EventKind>) -> Option<i64> {
        let mut min_remaining = None;
        for slot in self.slots.iter_mut() {
            if let Some(event) = slot {
                event.countdown -= elapsed;
                if event.countdown <= 0 {
                    fired.push(event.kind);
                    *slot = None;
                } else {
                    min_remaining = Some(match min_remaining {
                        Some(m) if m < event.countdown => m,
                        _ => event.countdown,
                    });
                }
            }
        }
        min_remaining
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
