//! Cooperative continuation scheduler.
//!
//! Handler bodies run as tasks on a single-threaded executor owned by the
//! session. Nothing here is `Send`: the session, the registry and every
//! handler future live on one thread, and a task only runs while the session
//! is between frames. A frame is dispatched, then [`Scheduler::run_until_stalled`]
//! polls every woken task until none can make progress, then the next frame is
//! read.
//!
//! Wakers only push the task id onto a FIFO ready queue, so resumption order
//! is the order in which waits completed.

mod timer;
mod wait;

pub use timer::{TimerKey, TimerQueue};
pub use wait::{Delay, Wait};

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, Wake, Waker};
use std::time::{Duration, Instant};

use futures::future::LocalBoxFuture;
use tokio::sync::{Notify, mpsc};

use crate::error::{HandlerResult, SendError, WaitError};
use crate::bridge::protocol::{ActorId, CorrelationToken, EventKind, OutboundAction};
use crate::registry::Registry;
use crate::server::Server;

/// State shared between the scheduler and every [`Server`] handle.
pub(crate) struct Shared {
    pub(crate) registry: RefCell<Registry>,
    pub(crate) timers: RefCell<TimerQueue>,
    clock: Cell<Instant>,
    outbound: mpsc::UnboundedSender<OutboundAction>,
    shutdown_requested: Cell<bool>,
}

impl Shared {
    pub(crate) fn now(&self) -> Instant {
        self.clock.get()
    }

    pub(crate) fn send(&self, action: OutboundAction) -> Result<(), SendError> {
        self.outbound.send(action).map_err(|_| SendError)
    }

    pub(crate) fn request_shutdown(&self) {
        self.shutdown_requested.set(true);
    }

    pub(crate) fn mint_token(&self) -> CorrelationToken {
        self.registry.borrow_mut().mint_token()
    }

    pub(crate) fn wait(
        self: &Rc<Self>,
        token: Option<CorrelationToken>,
        actor: Option<ActorId>,
    ) -> Wait {
        let id = self.registry.borrow_mut().register_wait(token, actor);
        Wait::new(Rc::clone(self), id, None)
    }

    pub(crate) fn delay(self: &Rc<Self>, duration: Duration, actor: Option<ActorId>) -> Delay {
        let deadline = self.now() + duration;
        let id = self.registry.borrow_mut().register_wait(None, actor);
        let key = self.timers.borrow_mut().insert(deadline, id);
        Delay::new(Wait::new(Rc::clone(self), id, Some(key)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// What a task was spawned for. Shows up in failure logs.
#[derive(Debug, Clone)]
pub struct TaskLabel {
    pub kind: EventKind,
    pub actor: Option<ActorId>,
    pub detail: Option<String>,
}

impl TaskLabel {
    pub fn new(kind: EventKind, actor: Option<ActorId>) -> Self {
        Self {
            kind,
            actor,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// FIFO of woken tasks plus a notifier so the session can select on it.
#[derive(Default)]
pub struct ReadyQueue {
    queue: Mutex<VecDeque<TaskId>>,
    notify: Notify,
}

impl ReadyQueue {
    fn push(&self, id: TaskId) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(id);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<TaskId> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Resolves once a task has been woken since the last call.
    pub fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.notify.notified()
    }
}

struct TaskWaker {
    id: TaskId,
    ready: Arc<ReadyQueue>,
    queued: AtomicBool,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if !self.queued.swap(true, Ordering::AcqRel) {
            self.ready.push(self.id);
        }
    }
}

struct Task {
    future: LocalBoxFuture<'static, HandlerResult>,
    waker: Arc<TaskWaker>,
    label: TaskLabel,
}

pub struct Scheduler {
    shared: Rc<Shared>,
    ready: Arc<ReadyQueue>,
    tasks: HashMap<TaskId, Task>,
    next_task: u64,
}

impl Scheduler {
    pub fn new(outbound: mpsc::UnboundedSender<OutboundAction>) -> Self {
        Self::with_clock(outbound, tokio::time::Instant::now().into_std())
    }

    pub fn with_clock(outbound: mpsc::UnboundedSender<OutboundAction>, now: Instant) -> Self {
        Self {
            shared: Rc::new(Shared {
                registry: RefCell::new(Registry::new()),
                timers: RefCell::new(TimerQueue::new()),
                clock: Cell::new(now),
                outbound,
                shutdown_requested: Cell::new(false),
            }),
            ready: Arc::new(ReadyQueue::default()),
            tasks: HashMap::new(),
            next_task: 0,
        }
    }

    /// Handle for a handler body, bound to `owner`.
    pub fn server(&self, owner: Option<ActorId>) -> Server {
        Server::new(Rc::clone(&self.shared), owner)
    }

    pub fn ready_queue(&self) -> Arc<ReadyQueue> {
        Arc::clone(&self.ready)
    }

    /// Advance the frame clock. Never moves backwards.
    pub fn set_clock(&self, now: Instant) {
        if now > self.shared.clock.get() {
            self.shared.clock.set(now);
        }
    }

    pub fn now(&self) -> Instant {
        self.shared.now()
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shared.shutdown_requested.get()
    }

    pub fn request_shutdown(&self) {
        self.shared.request_shutdown();
    }

    pub fn spawn(
        &mut self,
        label: TaskLabel,
        future: LocalBoxFuture<'static, HandlerResult>,
    ) -> TaskId {
        self.next_task += 1;
        let id = TaskId(self.next_task);
        let waker = Arc::new(TaskWaker {
            id,
            ready: Arc::clone(&self.ready),
            queued: AtomicBool::new(false),
        });
        waker.wake_by_ref();
        self.tasks.insert(
            id,
            Task {
                future,
                waker,
                label,
            },
        );
        id
    }

    /// Poll woken tasks in FIFO order until the ready queue is empty.
    /// Returns the number of polls performed.
    pub fn run_until_stalled(&mut self) -> usize {
        let mut polls = 0;
        while let Some(id) = self.ready.pop() {
            let Some(task) = self.tasks.get_mut(&id) else {
                continue;
            };
            task.waker.queued.store(false, Ordering::Release);
            let waker = Waker::from(Arc::clone(&task.waker));
            let mut cx = Context::from_waker(&waker);
            let future = &mut task.future;

            polls += 1;
            let result = panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)));
            let outcome = match result {
                Ok(Poll::Pending) => continue,
                Ok(Poll::Ready(outcome)) => Ok(outcome),
                Err(payload) => Err(payload),
            };

            let Some(task) = self.tasks.remove(&id) else {
                continue;
            };
            let label = &task.label;
            match outcome {
                Ok(Ok(())) => {
                    tracing::trace!(task = %id, kind = %label.kind, "Handler completed");
                }
                Ok(Err(error)) => {
                    tracing::error!(
                        task = %id,
                        kind = %label.kind,
                        actor = ?label.actor,
                        detail = ?label.detail,
                        error = %format!("{error:#}"),
                        "Handler failed"
                    );
                }
                Err(payload) => {
                    tracing::error!(
                        task = %id,
                        kind = %label.kind,
                        actor = ?label.actor,
                        detail = ?label.detail,
                        panic = %panic_message(payload.as_ref()),
                        "Handler panicked"
                    );
                }
            }
        }
        polls
    }

    /// Complete every timer due at the current clock. Called on Tick, before
    /// tick handlers are spawned.
    pub fn fire_timers(&self) -> usize {
        let due = self.shared.timers.borrow_mut().pop_due(self.now());
        let mut registry = self.shared.registry.borrow_mut();
        due.into_iter()
            .filter(|id| registry.complete(*id, Ok(serde_json::Value::Null)))
            .count()
    }

    pub fn resolve(&self, token: CorrelationToken, payload: serde_json::Value) -> bool {
        self.shared.registry.borrow_mut().resolve(token, payload)
    }

    pub fn invalidate(&self, actor: ActorId) -> usize {
        self.shared.registry.borrow_mut().invalidate(actor)
    }

    pub fn revive(&self, actor: ActorId) -> bool {
        self.shared.registry.borrow_mut().revive(actor)
    }

    /// Resume every pending wait because the game mode exited. The session
    /// itself stays open.
    pub fn invalidate_all(&self) -> usize {
        self.shared
            .registry
            .borrow_mut()
            .close_all(WaitError::GameModeExited)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn pending_waits(&self) -> usize {
        self.shared.registry.borrow().pending_count()
    }

    pub fn pending_timers(&self) -> usize {
        self.shared.timers.borrow().len()
    }

    /// Resume all waits with a non-value outcome, let handlers observe it,
    /// then drop whatever is still suspended.
    pub fn shutdown(&mut self) -> usize {
        let resumed = self
            .shared
            .registry
            .borrow_mut()
            .close_all(WaitError::SessionClosed);
        self.run_until_stalled();

        if !self.tasks.is_empty() {
            tracing::warn!(
                remaining = self.tasks.len(),
                "Dropping handlers still suspended at shutdown"
            );
            let tasks = std::mem::take(&mut self.tasks);
            drop(tasks);
        }
        resumed
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use serde_json::json;

    fn scheduler() -> (Scheduler, mpsc::UnboundedReceiver<OutboundAction>, Instant) {
        let (tx, rx) = mpsc::unbounded_channel();
        let now = Instant::now();
        (Scheduler::with_clock(tx, now), rx, now)
    }

    fn label() -> TaskLabel {
        TaskLabel::new(EventKind::Tick, None)
    }

    fn prints(rx: &mut mpsc::UnboundedReceiver<OutboundAction>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(action) = rx.try_recv() {
            if let OutboundAction::InvokeNative { name, args, .. } = action
                && name == "print"
            {
                out.push(args[0].as_str().unwrap_or_default().to_string());
            }
        }
        out
    }

    #[test]
    fn spawned_task_runs_to_its_first_suspension() {
        let (mut scheduler, mut rx, now) = scheduler();
        let server = scheduler.server(None);

        scheduler.spawn(
            label(),
            async move {
                server.print("before")?;
                server.delay(Duration::from_millis(10)).await?;
                server.print("after")?;
                Ok(())
            }
            .boxed_local(),
        );

        scheduler.run_until_stalled();
        assert_eq!(prints(&mut rx), vec!["before"]);
        assert_eq!(scheduler.task_count(), 1);

        scheduler.set_clock(now + Duration::from_millis(5));
        assert_eq!(scheduler.fire_timers(), 0);
        scheduler.run_until_stalled();
        assert!(prints(&mut rx).is_empty());

        scheduler.set_clock(now + Duration::from_millis(10));
        assert_eq!(scheduler.fire_timers(), 1);
        scheduler.run_until_stalled();
        assert_eq!(prints(&mut rx), vec!["after"]);
        assert_eq!(scheduler.task_count(), 0);
        assert_eq!(scheduler.pending_timers(), 0);
    }

    #[test]
    fn timers_resume_in_deadline_order() {
        let (mut scheduler, mut rx, now) = scheduler();

        for (name, ms) in [("slow", 30u64), ("fast", 10), ("medium", 20)] {
            let server = scheduler.server(None);
            scheduler.spawn(
                label(),
                async move {
                    server.delay(Duration::from_millis(ms)).await?;
                    server.print(name)?;
                    Ok(())
                }
                .boxed_local(),
            );
        }
        scheduler.run_until_stalled();

        scheduler.set_clock(now + Duration::from_millis(50));
        assert_eq!(scheduler.fire_timers(), 3);
        scheduler.run_until_stalled();
        assert_eq!(prints(&mut rx), vec!["fast", "medium", "slow"]);
    }

    #[test]
    fn response_resumes_the_waiting_task() {
        let (mut scheduler, mut rx, _) = scheduler();
        let server = scheduler.server(None);
        let token = server.mint_token();

        scheduler.spawn(
            label(),
            async move {
                let answer = server.wait_response(token).await?;
                server.print(answer.to_string())?;
                Ok(())
            }
            .boxed_local(),
        );
        scheduler.run_until_stalled();
        assert_eq!(scheduler.pending_waits(), 1);

        assert!(scheduler.resolve(token, json!(42)));
        assert!(!scheduler.resolve(token, json!(43)));
        scheduler.run_until_stalled();
        assert_eq!(prints(&mut rx), vec!["42"]);
    }

    #[test]
    fn invalidation_resumes_owned_delay_with_error() {
        let (mut scheduler, mut rx, _) = scheduler();
        let player = ActorId::new(7);
        let server = scheduler.server(Some(player));

        scheduler.spawn(
            TaskLabel::new(EventKind::Callback, Some(player)),
            async move {
                match server.delay(Duration::from_secs(60)).await {
                    Err(WaitError::ActorInvalidated(actor)) => {
                        server.print(format!("{actor} left"))?;
                    }
                    other => server.print(format!("unexpected {other:?}"))?,
                }
                Ok(())
            }
            .boxed_local(),
        );
        scheduler.run_until_stalled();

        assert_eq!(scheduler.invalidate(player), 1);
        scheduler.run_until_stalled();
        assert_eq!(prints(&mut rx), vec!["7 left"]);
        assert_eq!(scheduler.pending_timers(), 0);
    }

    #[test]
    fn failing_and_panicking_tasks_do_not_stop_others() {
        let (mut scheduler, mut rx, _) = scheduler();

        scheduler.spawn(
            label(),
            async { Err(anyhow::anyhow!("boom")) }.boxed_local(),
        );
        scheduler.spawn(
            label(),
            async {
                if true {
                    panic!("handler panic");
                }
                Ok(())
            }
            .boxed_local(),
        );
        let server = scheduler.server(None);
        scheduler.spawn(
            label(),
            async move {
                server.print("survivor")?;
                Ok(())
            }
            .boxed_local(),
        );

        assert_eq!(scheduler.run_until_stalled(), 3);
        assert_eq!(prints(&mut rx), vec!["survivor"]);
        assert_eq!(scheduler.task_count(), 0);
    }

    #[test]
    fn shutdown_resumes_waits_then_drops_stragglers() {
        let (mut scheduler, mut rx, _) = scheduler();
        let server = scheduler.server(None);
        let token = server.mint_token();

        scheduler.spawn(
            label(),
            async move {
                if let Err(err) = server.wait_response(token).await {
                    server.print(err.to_string())?;
                }
                // Parks again after shutdown; the scheduler drops it.
                let _ = server.delay(Duration::from_secs(1)).await;
                server.print("unreachable")?;
                Ok(())
            }
            .boxed_local(),
        );
        scheduler.run_until_stalled();

        assert_eq!(scheduler.shutdown(), 1);
        assert_eq!(prints(&mut rx), vec!["session closed"]);
        assert_eq!(scheduler.task_count(), 0);
        assert_eq!(scheduler.pending_waits(), 0);
        assert_eq!(scheduler.pending_timers(), 0);
    }

    #[test]
    fn clock_never_moves_backwards() {
        let (scheduler, _rx, now) = scheduler();
        scheduler.set_clock(now + Duration::from_millis(5));
        scheduler.set_clock(now);
        assert_eq!(scheduler.now(), now + Duration::from_millis(5));
    }

    #[tokio::test]
    async fn wake_notifies_the_ready_queue() {
        let (mut scheduler, _rx, _) = scheduler();
        let ready = scheduler.ready_queue();
        scheduler.spawn(label(), async { Ok(()) }.boxed_local());

        assert!(!ready.is_empty());
        ready.notified().await;
        scheduler.run_until_stalled();
        assert!(ready.is_empty());
    }
}
