//! Global cancellation controller.
//!
//! Wraps a swappable root [`CancellationToken`]. `quit` cancels the current
//! token and stays sticky; starting a fresh device scan calls `reset`, which
//! installs a new token only if the old one was cancelled. That asymmetry
//! (quit holds until the next scan start) mirrors the boundary contract.

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

pub struct CancelController {
    root: Mutex<CancellationToken>,
}

impl CancelController {
    pub fn new() -> Self {
        Self {
            root: Mutex::new(CancellationToken::new()),
        }
    }

    /// True once `quit` has been called and no scan restart happened since.
    pub fn is_quit(&self) -> bool {
        self.root.lock().unwrap().is_cancelled()
    }

    /// Child token for a task that must stop on global quit. Tasks pair this
    /// with `select!` so in-flight adapter calls complete and are discarded.
    pub fn child(&self) -> CancellationToken {
        self.root.lock().unwrap().child_token()
    }

    /// Set the quit flag and cancel every outstanding child token.
    pub fn quit(&self) {
        self.root.lock().unwrap().cancel();
    }

    /// Clear a previous quit. Tasks spawned before the reset keep their
    /// already-cancelled tokens and wind down on their own.
    pub fn reset(&self) {
        let mut root = self.root.lock().unwrap();
        if root.is_cancelled() {
            *root = CancellationToken::new();
        }
    }
}

impl Default for CancelController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quit_is_sticky_until_reset() {
        let cancel = CancelController::new();
        assert!(!cancel.is_quit());

        let child = cancel.child();
        cancel.quit();
        assert!(cancel.is_quit());
        assert!(child.is_cancelled());

        cancel.reset();
        assert!(!cancel.is_quit());
        // the old child stays cancelled
        assert!(child.is_cancelled());
    }

    #[test]
    fn reset_without_quit_is_a_no_op() {
        let cancel = CancelController::new();
        let child = cancel.child();
        cancel.reset();
        cancel.quit();
        assert!(child.is_cancelled());
    }
}
