//! The scan/poll queue pattern, instantiated once per stream (device scan,
//! service scan, characteristic scan, notification data, connection status).
//!
//! Producers are async tasks; consumers poll from a foreign, possibly
//! single-threaded caller. A mutex plus condvar (rather than an async
//! channel) lets `poll(block = true)` suspend that caller's thread directly,
//! and lets a queue be reset and reused across repeated scans, which a
//! closed channel cannot do.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::cancel::CancelController;
use crate::types::ScanPoll;

struct QueueState<T> {
    items: VecDeque<T>,
    finished: bool,
}

pub struct PollQueue<T> {
    state: Mutex<QueueState<T>>,
    signal: Condvar,
    cancel: Arc<CancelController>,
}

impl<T> PollQueue<T> {
    pub fn new(cancel: Arc<CancelController>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                finished: false,
            }),
            signal: Condvar::new(),
            cancel,
        }
    }

    /// Append an item and wake one waiter. Suppressed after quit: an
    /// in-flight producer must not push into a queue past cancellation.
    pub fn push(&self, item: T) {
        if self.cancel.is_quit() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        state.items.push_back(item);
        self.signal.notify_one();
    }

    /// Dequeue the next item, or report the stream state.
    ///
    /// A wake caused by global cancellation returns `Finished` regardless of
    /// the actual completion state.
    pub fn poll(&self, block: bool) -> ScanPoll<T> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(item) = state.items.pop_front() {
                return ScanPoll::Available(item);
            }
            if state.finished {
                return ScanPoll::Finished;
            }
            if self.cancel.is_quit() {
                return ScanPoll::Finished;
            }
            if !block {
                return ScanPoll::Processing;
            }
            state = self.signal.wait(state).unwrap();
            if self.cancel.is_quit() {
                return ScanPoll::Finished;
            }
        }
    }

    /// Producer is done (exhausted or failed); wake everyone.
    pub fn mark_finished(&self) {
        let mut state = self.state.lock().unwrap();
        state.finished = true;
        self.signal.notify_all();
    }

    /// Called at every scan start so the queue is reusable.
    pub fn reset_finished(&self) {
        self.state.lock().unwrap().finished = false;
    }

    /// Wake all blocked pollers without enqueuing; used by quit, after the
    /// quit flag is already set.
    pub fn cancel_wake(&self) {
        let _state = self.state.lock().unwrap();
        self.signal.notify_all();
    }

    /// Drop all pending items; used by quit.
    pub fn clear(&self) {
        self.state.lock().unwrap().items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn queue() -> (Arc<CancelController>, PollQueue<u32>) {
        let cancel = Arc::new(CancelController::new());
        let q = PollQueue::new(cancel.clone());
        (cancel, q)
    }

    #[test]
    fn fifo_order_is_preserved() {
        let (_cancel, q) = queue();
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.poll(false), ScanPoll::Available(1));
        assert_eq!(q.poll(false), ScanPoll::Available(2));
        assert_eq!(q.poll(false), ScanPoll::Available(3));
    }

    #[test]
    fn non_blocking_poll_returns_processing_immediately() {
        let (_cancel, q) = queue();
        assert_eq!(q.poll(false), ScanPoll::Processing);
    }

    #[test]
    fn finished_is_terminal_after_drain() {
        let (_cancel, q) = queue();
        q.push(7);
        q.mark_finished();
        assert_eq!(q.poll(false), ScanPoll::Available(7));
        assert_eq!(q.poll(false), ScanPoll::Finished);
        assert_eq!(q.poll(true), ScanPoll::Finished);
        assert_eq!(q.poll(false), ScanPoll::Finished);
    }

    #[test]
    fn reset_makes_queue_reusable() {
        let (_cancel, q) = queue();
        q.mark_finished();
        assert_eq!(q.poll(false), ScanPoll::Finished);
        q.reset_finished();
        assert_eq!(q.poll(false), ScanPoll::Processing);
        q.push(4);
        assert_eq!(q.poll(false), ScanPoll::Available(4));
    }

    #[test]
    fn push_is_suppressed_after_quit() {
        let (cancel, q) = queue();
        cancel.quit();
        q.push(1);
        assert_eq!(q.poll(true), ScanPoll::Finished);
        assert_eq!(q.poll(false), ScanPoll::Finished);
    }

    #[test]
    fn quit_wakes_a_blocked_poller() {
        let (cancel, q) = queue();
        let q = Arc::new(q);

        let poller = {
            let q = q.clone();
            thread::spawn(move || q.poll(true))
        };

        thread::sleep(Duration::from_millis(50));
        cancel.quit();
        q.cancel_wake();

        let result = poller.join().unwrap();
        assert_eq!(result, ScanPoll::Finished);
    }

    #[test]
    fn blocking_poll_receives_pushed_item() {
        let (_cancel, q) = queue();
        let q = Arc::new(q);

        let poller = {
            let q = q.clone();
            thread::spawn(move || q.poll(true))
        };

        thread::sleep(Duration::from_millis(50));
        q.push(9);
        assert_eq!(poller.join().unwrap(), ScanPoll::Available(9));
    }
}
