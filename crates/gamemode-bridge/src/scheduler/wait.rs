//! Suspension futures handed out to handler bodies.

use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use super::Shared;
use super::timer::TimerKey;
use crate::error::WaitError;
use crate::registry::{WaitId, WaitOutcome};

/// A parked wait: resolves with the response payload, or with a
/// [`WaitError`] when the owning actor is invalidated or the session closes.
///
/// Dropping it before completion releases its token and timer.
#[must_use = "a wait does nothing unless awaited"]
pub struct Wait {
    shared: Rc<Shared>,
    id: WaitId,
    timer: Option<TimerKey>,
    done: bool,
}

impl Wait {
    pub(crate) fn new(shared: Rc<Shared>, id: WaitId, timer: Option<TimerKey>) -> Self {
        Self {
            shared,
            id,
            timer,
            done: false,
        }
    }

    pub fn id(&self) -> WaitId {
        self.id
    }
}

impl Future for Wait {
    type Output = WaitOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.done {
            return Poll::Ready(Err(WaitError::SessionClosed));
        }

        let poll = self.shared.registry.borrow_mut().poll_wait(self.id, cx);
        if poll.is_ready() {
            self.done = true;
            if let Some(key) = self.timer.take() {
                self.shared.timers.borrow_mut().remove(&key);
            }
        }
        poll
    }
}

impl Drop for Wait {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Ok(mut registry) = self.shared.registry.try_borrow_mut() {
            registry.cancel(self.id);
        }
        if let Some(key) = self.timer.take()
            && let Ok(mut timers) = self.shared.timers.try_borrow_mut()
        {
            timers.remove(&key);
        }
    }
}

/// Timer wait. Resolves on the first Tick at or after its deadline.
#[must_use = "a delay does nothing unless awaited"]
pub struct Delay {
    inner: Wait,
}

impl Delay {
    pub(crate) fn new(inner: Wait) -> Self {
        Self { inner }
    }
}

impl Future for Delay {
    type Output = Result<(), WaitError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx).map(|outcome| outcome.map(|_| ()))
    }
}
