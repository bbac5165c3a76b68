//! Handle given to every handler body.

use std::rc::Rc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::bridge::protocol::{ActorId, CorrelationToken, OutboundAction};
use crate::error::{SendError, WaitError};
use crate::scheduler::{Delay, Shared, Wait};

/// Access to the server from inside a handler.
///
/// Cheap to clone. A handle is bound to the actor the triggering event was
/// about (if any): waits created through it are owned by that actor and are
/// resumed with [`WaitError::ActorInvalidated`] when the actor disconnects.
#[derive(Clone)]
pub struct Server {
    shared: Rc<Shared>,
    owner: Option<ActorId>,
}

impl Server {
    pub(crate) fn new(shared: Rc<Shared>, owner: Option<ActorId>) -> Self {
        Self { shared, owner }
    }

    pub fn owner(&self) -> Option<ActorId> {
        self.owner
    }

    /// Same session, waits owned by `actor` instead.
    pub fn for_actor(&self, actor: ActorId) -> Server {
        Self::new(Rc::clone(&self.shared), Some(actor))
    }

    /// Time of the frame currently being processed.
    pub fn now(&self) -> Instant {
        self.shared.now()
    }

    /// Queue an outbound action. Fails only once the session has ended.
    pub fn send(&self, action: OutboundAction) -> Result<(), SendError> {
        self.shared.send(action)
    }

    /// Fire-and-forget native invocation.
    pub fn invoke_native(&self, name: &str, args: Vec<Value>) -> Result<(), SendError> {
        self.send(OutboundAction::native(name, args))
    }

    /// Invoke a native and suspend until the server returns its value.
    pub async fn call_native(&self, name: &str, args: Vec<Value>) -> Result<Value, WaitError> {
        let token = self.mint_token();
        let wait = self.wait_response(token);
        let action = OutboundAction::InvokeNative {
            name: name.to_string(),
            args,
            reply_token: Some(token),
        };
        if self.send(action).is_err() {
            return Err(WaitError::SessionClosed);
        }
        wait.await
    }

    /// Write a line to the server console.
    pub fn print(&self, message: impl Into<String>) -> Result<(), SendError> {
        self.invoke_native("print", vec![Value::String(message.into())])
    }

    /// Suspend for at least `duration`. Resumes on the first Tick at or past
    /// the deadline, so resolution is the server's tick interval.
    pub fn delay(&self, duration: Duration) -> Delay {
        self.shared.delay(duration, self.owner)
    }

    /// Fresh correlation token, never reused within the session.
    pub fn mint_token(&self) -> CorrelationToken {
        self.shared.mint_token()
    }

    /// Park until a `Response` carrying `token` arrives.
    ///
    /// Register the wait before sending the request that carries the token.
    pub fn wait_response(&self, token: CorrelationToken) -> Wait {
        self.shared.wait(Some(token), self.owner)
    }

    pub fn wait_response_for(&self, token: CorrelationToken, actor: ActorId) -> Wait {
        self.shared.wait(Some(token), Some(actor))
    }

    /// Resolves once `actor` has been invalidated (or the session closes).
    pub async fn until_invalidated(&self, actor: ActorId) {
        let _ = self.shared.wait(None, Some(actor)).await;
    }

    pub fn is_invalidated(&self, actor: ActorId) -> bool {
        self.shared.registry.borrow().is_invalidated(actor)
    }

    /// Ask the session to shut down once the current frame is processed.
    pub fn shut_down(&self) {
        tracing::debug!("Shutdown requested by game mode");
        self.shared.request_shutdown();
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").field("owner", &self.owner).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use serde_json::json;
    use tokio::sync::mpsc;

    use crate::bridge::protocol::EventKind;
    use crate::scheduler::{Scheduler, TaskLabel};

    #[test]
    fn call_native_sends_token_and_returns_response() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = Scheduler::with_clock(tx, Instant::now());
        let server = scheduler.server(None);

        scheduler.spawn(
            TaskLabel::new(EventKind::Initialized, None),
            async move {
                let pos = server.call_native("GetPlayerPos", vec![json!(0)]).await?;
                server.print(pos.to_string())?;
                Ok(())
            }
            .boxed_local(),
        );
        scheduler.run_until_stalled();

        let Ok(OutboundAction::InvokeNative {
            name,
            args,
            reply_token: Some(token),
        }) = rx.try_recv()
        else {
            panic!("expected a correlated native call");
        };
        assert_eq!(name, "GetPlayerPos");
        assert_eq!(args, vec![json!(0)]);

        assert!(scheduler.resolve(token, json!([1.0, 2.0, 3.0])));
        scheduler.run_until_stalled();
        assert_eq!(
            rx.try_recv().ok(),
            Some(OutboundAction::native("print", vec![json!("[1.0,2.0,3.0]")]))
        );
    }

    #[test]
    fn send_after_session_end_fails() {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::with_clock(tx, Instant::now());
        drop(rx);
        assert_eq!(scheduler.server(None).print("hello"), Err(SendError));
    }

    #[test]
    fn for_actor_rebinds_ownership() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::with_clock(tx, Instant::now());
        let server = scheduler.server(None);
        assert_eq!(server.owner(), None);
        assert_eq!(
            server.for_actor(ActorId::new(4)).owner(),
            Some(ActorId::new(4))
        );
    }

    #[test]
    fn shut_down_sets_the_flag() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::with_clock(tx, Instant::now());
        assert!(!scheduler.shutdown_requested());
        scheduler.server(None).shut_down();
        assert!(scheduler.shutdown_requested());
    }

    #[test]
    fn until_invalidated_resolves_on_disconnect() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = Scheduler::with_clock(tx, Instant::now());
        let server = scheduler.server(None);
        let player = ActorId::new(2);

        scheduler.spawn(
            TaskLabel::new(EventKind::PlayerConnected, Some(player)),
            async move {
                server.until_invalidated(player).await;
                server.print("gone")?;
                Ok(())
            }
            .boxed_local(),
        );
        scheduler.run_until_stalled();
        assert!(rx.try_recv().is_err());

        scheduler.invalidate(player);
        scheduler.run_until_stalled();
        assert_eq!(
            rx.try_recv().ok(),
            Some(OutboundAction::native("print", vec![json!("gone")]))
        );
    }
}
