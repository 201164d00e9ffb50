//! Dependency Tracking Frames
//!
//! While a value provider or a tracker runs, every context read it performs
//! must be attributed to it. We keep a thread-local stack of frames: running a
//! computation pushes a frame, each tracked read appends a [`Read`] to the top
//! frame, and finishing the computation pops the frame and hands back the
//! collected reads.
//!
//! Nesting falls out naturally: a provider that reads another computed value
//! pushes a second frame, so the inner reads belong to the inner computation
//! and the outer one only records the read of the computed key itself.
//!
//! The stack also answers two questions for the computation guards: is a
//! given subscriber already running on this thread (a cycle), and how deep is
//! the nesting.

use std::cell::RefCell;

use super::read::Read;
use super::SubscriberId;

thread_local! {
    static FRAMES: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

struct Frame {
    subscriber: SubscriberId,
    reads: Vec<Read>,
}

/// Guard for one tracking frame.
///
/// Dropping the guard without calling [`Tracking::finish`] still pops the
/// frame, which keeps the stack balanced when a computation unwinds.
pub(crate) struct Tracking {
    subscriber: SubscriberId,
    finished: bool,
}

impl Tracking {
    /// Push a frame for `subscriber`.
    pub(crate) fn enter(subscriber: SubscriberId) -> Self {
        FRAMES.with(|frames| {
            frames.borrow_mut().push(Frame {
                subscriber,
                reads: Vec::new(),
            });
        });

        Self {
            subscriber,
            finished: false,
        }
    }

    /// Check if any frame is open on this thread.
    pub(crate) fn is_active() -> bool {
        FRAMES.with(|frames| !frames.borrow().is_empty())
    }

    /// The subscriber of the innermost frame.
    #[cfg(test)]
    pub(crate) fn current_subscriber() -> Option<SubscriberId> {
        FRAMES.with(|frames| frames.borrow().last().map(|frame| frame.subscriber))
    }

    /// Number of open frames.
    pub(crate) fn depth() -> usize {
        FRAMES.with(|frames| frames.borrow().len())
    }

    /// Whether `subscriber` has a frame open on this thread.
    pub(crate) fn is_running(subscriber: SubscriberId) -> bool {
        FRAMES.with(|frames| {
            frames
                .borrow()
                .iter()
                .any(|frame| frame.subscriber == subscriber)
        })
    }

    /// Attribute a read to the innermost frame. No-op outside any frame.
    pub(crate) fn record(read: Read) {
        FRAMES.with(|frames| {
            if let Some(frame) = frames.borrow_mut().last_mut() {
                if !frame.reads.iter().any(|existing| existing.duplicates(&read)) {
                    frame.reads.push(read);
                }
            }
        });
    }

    /// Pop the frame and return the reads it collected.
    pub(crate) fn finish(mut self) -> Vec<Read> {
        self.finished = true;
        self.pop()
    }

    fn pop(&self) -> Vec<Read> {
        FRAMES.with(|frames| {
            let popped = frames.borrow_mut().pop();
            match popped {
                Some(frame) => {
                    debug_assert_eq!(
                        frame.subscriber, self.subscriber,
                        "tracking frame mismatch: expected {:?}, got {:?}",
                        self.subscriber, frame.subscriber
                    );
                    frame.reads
                }
                None => Vec::new(),
            }
        })
    }
}

impl Drop for Tracking {
    fn drop(&mut self) {
        if !self.finished {
            self.pop();
        }
    }
}
