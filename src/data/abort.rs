//! Out-of-band abort plumbing.
//!
//! FTP clients announce `ABOR` by sending urgent data on the control
//! connection, which the kernel surfaces as `SIGURG`. The signal path does
//! exactly two things: a store of the abort bit and a wakeup of the
//! blocked transfer future. Teardown and reply emission happen on the
//! normal control flow.
//!
//! The slot holding the currently-transferring channel's flag is the one
//! process-wide global in the crate, forced by the signal interface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};

use tokio::sync::Notify;
use tracing::error;

/// Abort state shared between the signal listener and a transfer in
/// progress.
pub(crate) struct AbortFlag {
    aborted: AtomicBool,
    pub(crate) wake: Notify,
}

impl AbortFlag {
    fn new() -> Self {
        Self { aborted: AtomicBool::new(false), wake: Notify::new() }
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Relaxed)
    }

    pub(crate) fn set(&self) {
        self.aborted.store(true, Ordering::Relaxed);
        self.wake.notify_one();
    }
}

static ACTIVE: Mutex<Option<Arc<AbortFlag>>> = Mutex::new(None);
static LISTENER: Once = Once::new();

/// Installs a fresh abort flag for the transfer about to start and makes
/// sure the SIGURG listener is running. Must be called from async context.
pub(crate) fn arm() -> Arc<AbortFlag> {
    let flag = Arc::new(AbortFlag::new());

    *ACTIVE.lock().expect("abort slot poisoned") = Some(Arc::clone(&flag));

    #[cfg(unix)]
    LISTENER.call_once(|| {
        tokio::spawn(listen());
    });

    flag
}

/// Clears the slot; subsequent SIGURG deliveries are ignored.
pub(crate) fn disarm() {
    *ACTIVE.lock().expect("abort slot poisoned") = None;
}

#[cfg(unix)]
async fn listen() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut urg = match signal(SignalKind::from_raw(libc::SIGURG)) {
        Ok(stream) => stream,
        Err(err) => {
            error!("unable to install SIGURG handler: {}", err);
            return;
        }
    };

    while urg.recv().await.is_some() {
        // Signal path: flag store and wakeup only.
        if let Some(flag) = ACTIVE.lock().expect("abort slot poisoned").as_ref() {
            flag.set();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    // One sequential test: the slot is process-global, and interleaved
    // arm/disarm from parallel tests would race on it.
    #[tokio::test]
    async fn arm_observe_sigurg_then_disarm() {
        let flag = arm();
        assert!(!flag.is_aborted());

        // Give the listener task a chance to install the handler.
        tokio::time::sleep(Duration::from_millis(50)).await;

        unsafe {
            libc::raise(libc::SIGURG);
        }

        tokio::time::timeout(Duration::from_secs(5), flag.wake.notified())
            .await
            .expect("abort wakeup");
        assert!(flag.is_aborted());

        disarm();
        assert!(ACTIVE.lock().unwrap().is_none());

        // The handle we still hold keeps working after disarm.
        let stale = arm();
        disarm();
        stale.set();
        assert!(stale.is_aborted());
    }
}
