//! Transfer supervision timers.
//!
//! Three deadlines guard a session: *stalled* bounds how long a single data
//! transfer may sit without moving a byte, *no-transfer* bounds the gap
//! between transfers, and *idle* bounds overall inactivity. The engine arms
//! and re-arms them at the points required by the transfer lifecycle; the
//! stalled deadline additionally bounds every blocking data-channel call.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::Tunables;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TimerKind {
    Stalled,
    NoXfer,
    Idle,
}

#[derive(Debug)]
pub struct Timers {
    durations: [Option<Duration>; 3],
    deadlines: [Option<Instant>; 3],
}

impl Timers {
    pub fn new(tunables: &Tunables) -> Self {
        Self {
            durations: [tunables.stalled(), tunables.noxfer(), tunables.idle()],
            deadlines: [None; 3],
        }
    }

    /// Arms the timer if it is configured; re-arms it if already running.
    pub fn reset(&mut self, kind: TimerKind) {
        let idx = kind as usize;
        self.deadlines[idx] = self.durations[idx].map(|d| Instant::now() + d);
    }

    pub fn remove(&mut self, kind: TimerKind) {
        self.deadlines[kind as usize] = None;
    }

    /// Deadline of a running timer, for use in `select!`/`timeout_at`.
    pub fn deadline(&self, kind: TimerKind) -> Option<Instant> {
        self.deadlines[kind as usize]
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.deadlines[kind as usize].is_some()
    }

    pub fn expired(&self, kind: TimerKind) -> bool {
        match self.deadlines[kind as usize] {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }
}
