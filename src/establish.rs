//! Completion handle of an outbound handshake.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::session::SessionContext;
use crate::Error;

type Outcome = Result<Arc<SessionContext>, Error>;

#[derive(Default)]
struct Shared {
    slot: Mutex<Slot>,
    cond: Condvar,
}

#[derive(Default)]
struct Slot {
    outcome: Option<Outcome>,
    wakers: Vec<Waker>,
}

/// Resolves once the handshake started by [`Connector::connect`](crate::Connector::connect)
/// completes or fails.
///
/// Can be polled as a future, waited on from a thread, or checked without
/// blocking. Cloning yields another handle to the same outcome.
#[derive(Clone)]
pub struct Establishment {
    shared: Arc<Shared>,
}

/// The connection side of an [`Establishment`].
///
/// Dropping it unresolved resolves the establishment with
/// [`Error::ConnectionClosed`].
pub(crate) struct Completion {
    shared: Option<Arc<Shared>>,
}

pub(crate) fn pair() -> (Completion, Establishment) {
    let shared = Arc::new(Shared::default());
    (
        Completion {
            shared: Some(shared.clone()),
        },
        Establishment { shared },
    )
}

impl Completion {
    pub fn complete(mut self, outcome: Outcome) {
        if let Some(shared) = self.shared.take() {
            resolve(&shared, outcome);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            resolve(&shared, Err(Error::ConnectionClosed));
        }
    }
}

fn resolve(shared: &Shared, outcome: Outcome) {
    let wakers = {
        let mut slot = shared.slot.lock();
        if slot.outcome.is_some() {
            return;
        }
        slot.outcome = Some(outcome);
        std::mem::take(&mut slot.wakers)
    };
    shared.cond.notify_all();
    for waker in wakers {
        waker.wake();
    }
}

impl Establishment {
    /// The outcome, if the handshake already completed.
    pub fn try_result(&self) -> Option<Outcome> {
        self.shared.slot.lock().outcome.clone()
    }

    pub fn is_complete(&self) -> bool {
        self.shared.slot.lock().outcome.is_some()
    }

    /// Block the current thread until the handshake completes.
    pub fn wait(&self) -> Outcome {
        let mut slot = self.shared.slot.lock();
        loop {
            if let Some(outcome) = &slot.outcome {
                return outcome.clone();
            }
            self.shared.cond.wait(&mut slot);
        }
    }

    /// Block for at most `timeout`. `None` if the handshake is still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Outcome> {
        let mut slot = self.shared.slot.lock();
        if slot.outcome.is_none() {
            self.shared.cond.wait_for(&mut slot, timeout);
        }
        slot.outcome.clone()
    }
}

impl Future for Establishment {
    type Output = Outcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.shared.slot.lock();
        if let Some(outcome) = &slot.outcome {
            return Poll::Ready(outcome.clone());
        }
        if !slot.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            slot.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl std::fmt::Debug for Establishment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Establishment")
            .field("complete", &self.is_complete())
            .finish()
    }
}
