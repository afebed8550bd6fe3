//! Single-slot coalescing notifier.
//!
//! A [`SaturatingNotifier`] turns any number of wake-up signals that arrive
//! before consumption into exactly one delivered notification. This is what
//! prevents a burst of push webhooks from queueing up a backlog of builds:
//! a trigger that arrives while a build is running causes exactly one
//! subsequent build, never K of them.
//!
//! The slot holds one of three states:
//!
//! - `Empty`: nobody is waiting, nothing is pending
//! - `Waiting`: a single consumer is registered and will be woken by the
//!   next [`SaturatingNotifier::notify`]
//! - `Pending`: a signal arrived with no consumer; the next subscriber is
//!   woken immediately
//!
//! The slot supports at most one waiter. Subscribing while a waiter is
//! already registered is a programming error and panics rather than
//! silently queueing or overwriting.
//!
//! All access happens on the reactor thread; the handle is `Clone` but not
//! `Send`, which makes the single-threaded access discipline a compile-time
//! guarantee.

use std::cell::RefCell;
use std::rc::Rc;

use tokio::sync::oneshot;
use tracing::trace;

/// A zero-payload event token. Its existence, not its content, carries
/// the information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification;

/// The coalescing slot.
enum Slot {
    /// No waiter registered, no signal pending.
    Empty,
    /// A consumer is registered; `notify` wakes it through the sender.
    Waiting(oneshot::Sender<Notification>),
    /// A signal arrived with nobody waiting. Further signals are absorbed.
    Pending,
}

/// Single-slot event coalescer.
///
/// Cloning produces another handle to the same slot.
#[derive(Clone)]
pub struct SaturatingNotifier {
    slot: Rc<RefCell<Slot>>,
}

impl Default for SaturatingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SaturatingNotifier {
    /// Creates a notifier with an empty slot.
    pub fn new() -> Self {
        SaturatingNotifier {
            slot: Rc::new(RefCell::new(Slot::Empty)),
        }
    }

    /// Signals the notifier.
    ///
    /// If a consumer is waiting, it is woken immediately and the slot is
    /// cleared. Otherwise the slot becomes `Pending`; calling `notify`
    /// again while already pending has no additional effect.
    pub fn notify(&self) {
        let mut slot = self.slot.borrow_mut();
        match std::mem::replace(&mut *slot, Slot::Empty) {
            Slot::Waiting(tx) => {
                trace!("notify: delivering to waiter");
                // The receiver is only dropped when the subscriber future
                // is cancelled; the signal is then intentionally lost with
                // the future.
                let _ = tx.send(Notification);
            }
            Slot::Empty => {
                trace!("notify: no waiter, slot now pending");
                *slot = Slot::Pending;
            }
            Slot::Pending => {
                trace!("notify: already pending, absorbed");
                *slot = Slot::Pending;
            }
        }
    }

    /// Waits for the next notification.
    ///
    /// If a signal is already pending it is consumed and the future
    /// resolves immediately. Otherwise the caller becomes the registered
    /// waiter until the next [`notify`](Self::notify).
    ///
    /// # Panics
    ///
    /// Panics if a waiter is already registered: the slot coalesces
    /// signals, it does not queue consumers.
    pub async fn subscribed(&self) -> Notification {
        let rx = {
            let mut slot = self.slot.borrow_mut();
            match std::mem::replace(&mut *slot, Slot::Empty) {
                Slot::Pending => {
                    trace!("subscribe: pending signal consumed immediately");
                    return Notification;
                }
                Slot::Empty => {
                    let (tx, rx) = oneshot::channel();
                    *slot = Slot::Waiting(tx);
                    rx
                }
                Slot::Waiting(_) => {
                    panic!("SaturatingNotifier: a consumer is already subscribed");
                }
            }
        };

        match rx.await {
            Ok(notification) => notification,
            // The sender is dropped only when the whole notifier is
            // dropped while we wait; pend forever rather than fabricate
            // a notification.
            Err(_) => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reactor() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn notify_then_subscribe_delivers_immediately() {
        let rt = reactor();
        let local = tokio::task::LocalSet::new();
        local.block_on(&rt, async {
            let notifier = SaturatingNotifier::new();
            notifier.notify();
            // Resolves without yielding to the scheduler.
            let n = notifier.subscribed().await;
            assert_eq!(n, Notification);
        });
    }

    #[test]
    fn many_notifies_coalesce_to_one_delivery() {
        let rt = reactor();
        let local = tokio::task::LocalSet::new();
        local.block_on(&rt, async {
            let notifier = SaturatingNotifier::new();
            for _ in 0..100 {
                notifier.notify();
            }
            notifier.subscribed().await;

            // The slot is drained: a second subscribe must block until a
            // fresh notify arrives.
            let waiter = tokio::task::spawn_local({
                let notifier = notifier.clone();
                async move { notifier.subscribed().await }
            });
            tokio::task::yield_now().await;
            assert!(!waiter.is_finished(), "no signal should be buffered");

            notifier.notify();
            waiter.await.unwrap();
        });
    }

    #[test]
    fn subscribe_then_notify_wakes_waiter() {
        let rt = reactor();
        let local = tokio::task::LocalSet::new();
        local.block_on(&rt, async {
            let notifier = SaturatingNotifier::new();
            let waiter = tokio::task::spawn_local({
                let notifier = notifier.clone();
                async move { notifier.subscribed().await }
            });
            // Let the waiter register itself.
            tokio::task::yield_now().await;
            notifier.notify();
            waiter.await.unwrap();
        });
    }

    #[test]
    fn slot_is_reusable_across_cycles() {
        let rt = reactor();
        let local = tokio::task::LocalSet::new();
        local.block_on(&rt, async {
            let notifier = SaturatingNotifier::new();
            for _ in 0..3 {
                notifier.notify();
                notifier.subscribed().await;
            }
        });
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            // K notifies with nobody waiting deliver exactly one
            // notification to the next subscriber, never K.
            #[test]
            fn k_notifies_deliver_exactly_one(k in 1usize..32) {
                let rt = reactor();
                let local = tokio::task::LocalSet::new();
                local.block_on(&rt, async move {
                    let notifier = SaturatingNotifier::new();
                    for _ in 0..k {
                        notifier.notify();
                    }
                    notifier.subscribed().await;

                    let waiter = tokio::task::spawn_local({
                        let notifier = notifier.clone();
                        async move { notifier.subscribed().await }
                    });
                    tokio::task::yield_now().await;
                    assert!(
                        !waiter.is_finished(),
                        "slot must be drained after one delivery"
                    );
                    notifier.notify();
                    waiter.await.unwrap();
                });
            }
        }
    }

    #[test]
    #[should_panic(expected = "already subscribed")]
    fn double_subscribe_panics() {
        let rt = reactor();
        let local = tokio::task::LocalSet::new();
        local.block_on(&rt, async {
            let notifier = SaturatingNotifier::new();
            let _first = tokio::task::spawn_local({
                let notifier = notifier.clone();
                async move { notifier.subscribed().await }
            });
            tokio::task::yield_now().await;
            // Second subscription while the first is outstanding.
            notifier.subscribed().await;
        });
    }
}
