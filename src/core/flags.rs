//! Process-wide control flags shared by the cell's tasks.
//!
//! - AliveFlag: latched false on fault or shutdown, never reset
//! - Pause: toggled by the pause line, honoured between steps
//! - Abort: requested by the reset line, consumed by the executor

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

/// Latching liveness flag.
///
/// Starts true. The first call to [`AliveFlag::latch`] sets it false and
/// wakes every task waiting in [`AliveFlag::halted`]; later calls are no-ops.
#[derive(Debug)]
pub struct AliveFlag {
    alive: AtomicBool,
    changed: watch::Sender<bool>,
}

impl Default for AliveFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl AliveFlag {
    pub fn new() -> Self {
        let (changed, _) = watch::channel(true);
        Self {
            alive: AtomicBool::new(true),
            changed,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Set the flag false. Returns true only for the call that latched it.
    pub fn latch(&self) -> bool {
        let latched = self
            .alive
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if latched {
            self.changed.send_replace(false);
        }
        latched
    }

    /// Resolves once the flag has been latched
    pub async fn halted(&self) {
        let mut rx = self.changed.subscribe();
        // The sender lives as long as `self`, so this only returns on latch
        let _ = rx.wait_for(|alive| !*alive).await;
    }
}

/// Flags shared between the interlock, fault and executor tasks
#[derive(Debug, Default)]
pub struct ControlFlags {
    alive: AliveFlag,
    paused: AtomicBool,
    abort: AtomicBool,
}

impl ControlFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alive(&self) -> &AliveFlag {
        &self.alive
    }

    pub fn is_alive(&self) -> bool {
        self.alive.is_alive()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Set the pause flag, returning the previous value
    pub fn set_paused(&self, paused: bool) -> bool {
        self.paused.swap(paused, Ordering::SeqCst)
    }

    pub fn request_abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn abort_requested(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Consume a pending abort request
    pub fn take_abort(&self) -> bool {
        self.abort.swap(false, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_latch_once() {
        let flag = AliveFlag::new();
        assert!(flag.is_alive());

        assert!(flag.latch());
        assert!(!flag.is_alive());

        // Second latch is a no-op
        assert!(!flag.latch());
        assert!(!flag.is_alive());
    }

    #[tokio::test]
    async fn test_halted_wakes_waiter() {
        let flags = Arc::new(ControlFlags::new());
        let waiter = {
            let flags = flags.clone();
            tokio::spawn(async move { flags.alive().halted().await })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        flags.alive().latch();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_halted_after_latch_returns_immediately() {
        let flag = AliveFlag::new();
        flag.latch();
        tokio::time::timeout(Duration::from_millis(10), flag.halted())
            .await
            .unwrap();
    }

    #[test]
    fn test_abort_is_consumed() {
        let flags = ControlFlags::new();
        assert!(!flags.take_abort());

        flags.request_abort();
        assert!(flags.abort_requested());
        assert!(flags.take_abort());
        assert!(!flags.take_abort());
    }

    #[test]
    fn test_pause_swap() {
        let flags = ControlFlags::new();
        assert!(!flags.set_paused(true));
        assert!(flags.is_paused());
        assert!(flags.set_paused(false));
        assert!(!flags.is_paused());
    }
}
