//! Actor/correlation registry.
//!
//! Maps correlation tokens and actor handles to parked continuations so a
//! later event (a prompt answer, a native's return value, a disconnect) is
//! routed back to the exact wait expecting it.
//!
//! Each wait moves through two states: `Pending` (holding the waker of the
//! task parked on it) and `Ready` (holding the outcome until the task polls
//! it). Completion happens at most once; whatever arrives after that is a
//! no-op. Tokens are consumed by the first completion, whichever path it
//! comes from (response, invalidation, shutdown).

use std::collections::{HashMap, HashSet};
use std::task::{Context, Poll, Waker};

use crate::bridge::protocol::{ActorId, CorrelationToken};
use crate::error::WaitError;

pub type WaitOutcome = Result<serde_json::Value, WaitError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaitId(u64);

impl std::fmt::Display for WaitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "wait-{}", self.0)
    }
}

enum WaitState {
    Pending(Option<Waker>),
    Ready(WaitOutcome),
}

struct PendingWait {
    token: Option<CorrelationToken>,
    actor: Option<ActorId>,
    state: WaitState,
}

#[derive(Default)]
pub struct Registry {
    next_wait: u64,
    next_token: u64,
    waits: HashMap<WaitId, PendingWait>,
    by_token: HashMap<CorrelationToken, WaitId>,
    by_actor: HashMap<ActorId, Vec<WaitId>>,
    invalidated: HashSet<ActorId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh token. Tokens are never reused within a session.
    pub fn mint_token(&mut self) -> CorrelationToken {
        self.next_token += 1;
        CorrelationToken::new(self.next_token)
    }

    /// Park a wait keyed by `token` and/or owned by `actor`.
    ///
    /// A wait owned by an already invalidated actor is born resolved with
    /// `ActorInvalidated`.
    pub fn register_wait(
        &mut self,
        token: Option<CorrelationToken>,
        actor: Option<ActorId>,
    ) -> WaitId {
        self.next_wait += 1;
        let id = WaitId(self.next_wait);

        if let Some(actor) = actor
            && self.invalidated.contains(&actor)
        {
            tracing::debug!(%id, %actor, "Wait registered on invalidated actor");
            self.waits.insert(
                id,
                PendingWait {
                    token: None,
                    actor: None,
                    state: WaitState::Ready(Err(WaitError::ActorInvalidated(actor))),
                },
            );
            return id;
        }

        if let Some(token) = token
            && let Some(previous) = self.by_token.insert(token, id)
        {
            tracing::warn!(%token, %previous, %id, "Correlation token re-registered, previous wait detached");
            if let Some(wait) = self.waits.get_mut(&previous) {
                wait.token = None;
            }
        }
        if let Some(actor) = actor {
            self.by_actor.entry(actor).or_default().push(id);
        }

        self.waits.insert(
            id,
            PendingWait {
                token,
                actor,
                state: WaitState::Pending(None),
            },
        );
        id
    }

    /// Deliver a response. Unknown or already consumed tokens are a no-op.
    pub fn resolve(&mut self, token: CorrelationToken, payload: serde_json::Value) -> bool {
        let Some(id) = self.by_token.get(&token).copied() else {
            return false;
        };
        self.complete(id, Ok(payload))
    }

    /// Complete a wait directly (timers, shutdown). Returns `false` when the
    /// wait is unknown or already completed.
    pub fn complete(&mut self, id: WaitId, outcome: WaitOutcome) -> bool {
        let Some(wait) = self.waits.get_mut(&id) else {
            return false;
        };
        let WaitState::Pending(waker) = &mut wait.state else {
            return false;
        };

        let waker = waker.take();
        let token = wait.token.take();
        let actor = wait.actor.take();
        wait.state = WaitState::Ready(outcome);
        self.unindex(id, token, actor);

        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    /// Resume every wait owned by `actor` with `ActorInvalidated` and purge
    /// the handle. Idempotent: a second call resumes nothing.
    pub fn invalidate(&mut self, actor: ActorId) -> usize {
        self.invalidated.insert(actor);
        let ids = self.by_actor.remove(&actor).unwrap_or_default();

        let mut resumed = 0;
        for id in ids {
            if self.complete(id, Err(WaitError::ActorInvalidated(actor))) {
                resumed += 1;
            }
        }
        resumed
    }

    /// Mark a handle live again. Returns `true` if it had been invalidated.
    pub fn revive(&mut self, actor: ActorId) -> bool {
        self.invalidated.remove(&actor)
    }

    pub fn is_invalidated(&self, actor: ActorId) -> bool {
        self.invalidated.contains(&actor)
    }

    /// Take the outcome if the wait has completed, otherwise remember the waker.
    pub fn poll_wait(&mut self, id: WaitId, cx: &mut Context<'_>) -> Poll<WaitOutcome> {
        let Some(wait) = self.waits.get_mut(&id) else {
            return Poll::Ready(Err(WaitError::SessionClosed));
        };

        if let WaitState::Pending(waker) = &mut wait.state {
            if !waker.as_ref().is_some_and(|w| w.will_wake(cx.waker())) {
                *waker = Some(cx.waker().clone());
            }
            return Poll::Pending;
        }

        match self.waits.remove(&id).map(|wait| wait.state) {
            Some(WaitState::Ready(outcome)) => Poll::Ready(outcome),
            _ => Poll::Ready(Err(WaitError::SessionClosed)),
        }
    }

    /// Forget a wait whose future was dropped before completion.
    pub fn cancel(&mut self, id: WaitId) {
        if let Some(wait) = self.waits.remove(&id) {
            self.unindex(id, wait.token, wait.actor);
        }
    }

    /// Complete every pending wait. Actor-owned waits resume with
    /// `ActorInvalidated`, the rest with `unowned`.
    pub fn close_all(&mut self, unowned: WaitError) -> usize {
        let mut pending: Vec<(WaitId, Option<ActorId>)> = self
            .waits
            .iter()
            .filter(|(_, wait)| matches!(wait.state, WaitState::Pending(_)))
            .map(|(id, wait)| (*id, wait.actor))
            .collect();
        pending.sort_by_key(|(id, _)| *id);

        let mut resumed = 0;
        for (id, actor) in pending {
            let outcome = match actor {
                Some(actor) => {
                    self.invalidated.insert(actor);
                    Err(WaitError::ActorInvalidated(actor))
                }
                None => Err(unowned),
            };
            if self.complete(id, outcome) {
                resumed += 1;
            }
        }
        resumed
    }

    /// Number of waits still parked (completed-but-unpolled excluded).
    pub fn pending_count(&self) -> usize {
        self.waits
            .values()
            .filter(|wait| matches!(wait.state, WaitState::Pending(_)))
            .count()
    }

    pub fn pending_for(&self, actor: ActorId) -> usize {
        self.by_actor.get(&actor).map(Vec::len).unwrap_or(0)
    }

    fn unindex(&mut self, id: WaitId, token: Option<CorrelationToken>, actor: Option<ActorId>) {
        if let Some(token) = token
            && self.by_token.get(&token) == Some(&id)
        {
            self.by_token.remove(&token);
        }
        if let Some(actor) = actor
            && let Some(ids) = self.by_actor.get_mut(&actor)
        {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.by_actor.remove(&actor);
            }
        }
    }
}
