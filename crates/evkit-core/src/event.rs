//! Events and their lifecycle
//!
//! An [`Event`] is a cheap-to-clone handle to one occurrence of an event
//! type. It carries:
//! - the typed payload (the [`EventType`] value it was built from)
//! - context fields (a JSON object propagated along causal chains)
//! - the lifecycle status, reason, parent link and delivery log
//! - the completion channel settled when the event finishes
//!
//! Status moves from RUNNING to exactly one of FINISHED, STOPPED or ABORTED
//! and never changes afterwards. An event may be published once.

use chrono::{DateTime, Utc};
use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex, RwLock};
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::bus::{event_bus, EventBus};
use crate::error::{BusError, EventError};
use crate::event_type::{self, EventType, EventTypeKey};
use crate::types::ListenerHandle;

/// Lifecycle status of an event
///
/// RUNNING is all-false; every terminal status has `finished` set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventStatus {
    /// The event reached a terminal state.
    pub finished: bool,
    /// The event was aborted.
    pub aborted: bool,
    /// The event was stopped early without failure.
    pub stopped: bool,
}

impl EventStatus {
    /// Initial status.
    pub const RUNNING: EventStatus = EventStatus {
        finished: false,
        aborted: false,
        stopped: false,
    };
    /// Every listener ran.
    pub const FINISHED: EventStatus = EventStatus {
        finished: true,
        aborted: false,
        stopped: false,
    };
    /// A listener ended the chain early without failure.
    pub const STOPPED: EventStatus = EventStatus {
        finished: true,
        aborted: false,
        stopped: true,
    };
    /// A listener aborted the event, or a listener failed.
    pub const ABORTED: EventStatus = EventStatus {
        finished: true,
        aborted: true,
        stopped: false,
    };

    /// Whether the event is still running
    pub fn is_running(&self) -> bool {
        !self.finished
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match (self.finished, self.aborted, self.stopped) {
            (false, _, _) => "running",
            (true, true, _) => "aborted",
            (true, false, true) => "stopped",
            (true, false, false) => "finished",
        };
        write!(f, "{}", label)
    }
}

/// Settled value of an [`EventFuture`].
pub type EventOutcome = Result<Event, EventError>;

struct EventState {
    status: EventStatus,
    reason: Option<String>,
    parent: Option<Weak<EventInner>>,
    depth: u32,
    deliveries: Vec<ListenerHandle>,
    fields: Map<String, Value>,
    bus: Option<EventBus>,
    completion: Option<oneshot::Sender<EventOutcome>>,
    receiver: Option<oneshot::Receiver<EventOutcome>>,
    finished_at: Option<DateTime<Utc>>,
}

struct EventInner {
    id: Uuid,
    type_key: EventTypeKey,
    type_name: &'static str,
    created_at: DateTime<Utc>,
    state: Mutex<EventState>,
    data: RwLock<Box<dyn Any + Send + Sync>>,
}

/// Handle to a single event occurrence
///
/// Clones share the same underlying event.
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    /// Create a RUNNING event carrying `data`
    pub fn new<T: EventType>(data: T) -> Self {
        let (completion, receiver) = oneshot::channel();
        Self {
            inner: Arc::new(EventInner {
                id: Uuid::new_v4(),
                type_key: T::key(),
                type_name: T::type_name(),
                created_at: Utc::now(),
                state: Mutex::new(EventState {
                    status: EventStatus::RUNNING,
                    reason: None,
                    parent: None,
                    depth: 0,
                    deliveries: Vec::new(),
                    fields: Map::new(),
                    bus: None,
                    completion: Some(completion),
                    receiver: Some(receiver),
                    finished_at: None,
                }),
                data: RwLock::new(Box::new(data)),
            }),
        }
    }

    /// Unique event id
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// First eight characters of the id, for logs
    pub fn short_id(&self) -> String {
        self.inner.id.to_string()[..8].to_string()
    }

    /// Key of the event's type
    pub fn type_key(&self) -> EventTypeKey {
        self.inner.type_key
    }

    /// Name of the event's type
    pub fn type_name(&self) -> &'static str {
        self.inner.type_name
    }

    /// Creation timestamp
    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// When the event reached a terminal status
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().finished_at
    }

    /// Whether both handles refer to the same event
    pub fn ptr_eq(&self, other: &Event) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // -------------------------------------------------------------------------
    // Payload
    // -------------------------------------------------------------------------

    /// Whether the payload is exactly a `T`
    pub fn is<T: EventType>(&self) -> bool {
        self.inner.type_key == T::key()
    }

    /// Whether the event's type is `T` or a subtype of `T`
    pub fn is_a<T: EventType>(&self) -> bool {
        event_type::is_subtype_of(self.inner.type_key, T::key())
    }

    /// Read the payload as `T`
    ///
    /// Succeeds when the payload is a `T`, or when it embeds a `T` through
    /// its ancestors' [`EventType::as_parent`] views.
    pub fn data<T: EventType>(&self) -> Option<MappedRwLockReadGuard<'_, T>> {
        let key = self.inner.type_key;
        let guard = self.inner.data.read();
        RwLockReadGuard::try_map(guard, |data| view::<T>(key, &**data)).ok()
    }

    /// Mutably access the payload as `T`
    pub fn data_mut<T: EventType>(&self) -> Option<MappedRwLockWriteGuard<'_, T>> {
        let key = self.inner.type_key;
        let guard = self.inner.data.write();
        RwLockWriteGuard::try_map(guard, |data| view_mut::<T>(key, &mut **data)).ok()
    }

    // -------------------------------------------------------------------------
    // Context fields
    // -------------------------------------------------------------------------

    /// Set a context field, returning the previous value
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.inner.state.lock().fields.insert(key.into(), value.into())
    }

    /// Builder form of [`Event::set`]
    pub fn with_field(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Get a context field
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.state.lock().fields.get(key).cloned()
    }

    /// Remove a context field
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.state.lock().fields.remove(key)
    }

    /// Bulk-assign context fields, overwriting existing keys
    pub fn assign(&self, fields: Map<String, Value>) {
        self.inner.state.lock().fields.extend(fields);
    }

    /// Snapshot of all context fields
    pub fn fields(&self) -> Map<String, Value> {
        self.inner.state.lock().fields.clone()
    }

    // -------------------------------------------------------------------------
    // Causal chain
    // -------------------------------------------------------------------------

    /// Link the event that caused this one
    ///
    /// The link is non-owning. Depth becomes `parent.depth() + 1`. Ignored
    /// once the event was handed to a bus or finished.
    pub fn set_parent(&self, parent: &Event) {
        if self.ptr_eq(parent) {
            tracing::warn!("Ignoring self-parent link on {}", self);
            return;
        }
        let depth = parent.depth() + 1;
        let mut state = self.inner.state.lock();
        if state.status.finished || state.receiver.is_none() {
            tracing::warn!(
                "Ignoring parent link {} -> {}: already dispatched",
                self,
                parent
            );
            return;
        }
        state.parent = Some(Arc::downgrade(&parent.inner));
        state.depth = depth;
    }

    /// Builder form of [`Event::set_parent`]
    pub fn with_parent(self, parent: &Event) -> Self {
        self.set_parent(parent);
        self
    }

    /// Link `parent` and copy its context fields into this event
    pub fn inherit(&self, parent: &Event) {
        self.set_parent(parent);
        self.assign(parent.fields());
    }

    /// The causing event, if linked and still alive
    pub fn parent(&self) -> Option<Event> {
        let state = self.inner.state.lock();
        state
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Event { inner })
    }

    /// Distance from the root of the causal chain
    pub fn depth(&self) -> u32 {
        self.inner.state.lock().depth
    }

    // -------------------------------------------------------------------------
    // Bus binding
    // -------------------------------------------------------------------------

    /// Bind the bus `publish()` hands this event to
    pub fn bind(&self, bus: &EventBus) {
        self.inner.state.lock().bus = Some(bus.clone());
    }

    /// Builder form of [`Event::bind`]
    pub fn on_bus(self, bus: &EventBus) -> Self {
        self.bind(bus);
        self
    }

    /// The bound bus, or the global bus when unbound
    pub fn bus(&self) -> EventBus {
        let bound = self.inner.state.lock().bus.clone();
        bound.unwrap_or_else(|| event_bus().clone())
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Current status
    pub fn status(&self) -> EventStatus {
        self.inner.state.lock().status
    }

    /// Whether the event reached a terminal status
    pub fn is_finished(&self) -> bool {
        self.inner.state.lock().status.finished
    }

    /// Reason given to `stop` or `abort`
    pub fn reason(&self) -> Option<String> {
        self.inner.state.lock().reason.clone()
    }

    /// Listeners invoked so far, in invocation order
    pub fn deliveries(&self) -> Vec<ListenerHandle> {
        self.inner.state.lock().deliveries.clone()
    }

    /// Number of listeners invoked so far
    pub fn delivery_count(&self) -> usize {
        self.inner.state.lock().deliveries.len()
    }

    /// Publish on the bound bus
    ///
    /// Fails with [`BusError::AlreadyProcessed`] when the event is finished
    /// or was already handed to a bus.
    pub fn publish(&self) -> Result<EventFuture, BusError> {
        self.bus().publish(self)
    }

    /// Abort: terminal failure, later listeners do not run
    ///
    /// Returns `false` when the event was already finished.
    pub fn abort(&self, reason: impl Into<String>) -> bool {
        self.terminate(EventStatus::ABORTED, reason.into())
    }

    /// Stop: terminal success, later listeners do not run
    ///
    /// Returns `false` when the event was already finished.
    pub fn stop(&self, reason: impl Into<String>) -> bool {
        self.terminate(EventStatus::STOPPED, reason.into())
    }

    /// Finish the event and settle its future
    ///
    /// Moves a RUNNING event to FINISHED; a stopped or aborted event keeps
    /// its status. The future is settled on the first call only. Returns
    /// whether this call changed the status.
    pub fn finish(&self) -> bool {
        let (transitioned, completion, outcome) = {
            let mut state = self.inner.state.lock();
            let transitioned = !state.status.finished;
            if transitioned {
                state.status = EventStatus::FINISHED;
                state.finished_at = Some(Utc::now());
            }
            let outcome = if state.status.aborted {
                Err(EventError::Aborted {
                    reason: state.reason.clone().unwrap_or_default(),
                })
            } else {
                Ok(self.clone())
            };
            // An undispatched event holds its own receiver; drop it so the
            // outcome is not parked inside the event.
            state.receiver.take();
            (transitioned, state.completion.take(), outcome)
        };

        if let Some(completion) = completion {
            // The publisher may have dropped its future.
            completion.send(outcome).ok();
        }
        transitioned
    }

    fn terminate(&self, status: EventStatus, reason: String) -> bool {
        let mut state = self.inner.state.lock();
        if state.status.finished {
            tracing::warn!(
                "Ignoring transition of {} to {}: already {}",
                self,
                status,
                state.status
            );
            return false;
        }
        state.status = status;
        state.reason = Some(reason);
        state.finished_at = Some(Utc::now());
        true
    }

    /// Claim the single dispatch of this event
    pub(crate) fn begin_dispatch(&self) -> Result<EventFuture, BusError> {
        let mut state = self.inner.state.lock();
        if state.status.finished {
            return Err(self.already_processed());
        }
        match state.receiver.take() {
            Some(receiver) => Ok(EventFuture::new(receiver)),
            None => Err(self.already_processed()),
        }
    }

    /// Append to the delivery log before the listener runs
    pub(crate) fn delivered(&self, listener: &ListenerHandle) {
        self.inner.state.lock().deliveries.push(listener.clone());
    }

    fn already_processed(&self) -> BusError {
        BusError::AlreadyProcessed {
            event_type: self.inner.type_name.to_string(),
            event_id: self.short_id(),
        }
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.inner.type_name, self.short_id())
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Event")
            .field("id", &self.inner.id)
            .field("type", &self.inner.type_name)
            .field("status", &state.status)
            .field("reason", &state.reason)
            .field("depth", &state.depth)
            .field("deliveries", &state.deliveries.len())
            .finish()
    }
}

fn view<'a, T: EventType>(
    mut key: EventTypeKey,
    mut current: &'a (dyn Any + 'static),
) -> Option<&'a T> {
    loop {
        if let Some(data) = current.downcast_ref::<T>() {
            return Some(data);
        }
        let (upcast, _) = event_type::upcasts(key)?;
        current = upcast(current)?;
        key = event_type::parent_of(key)?;
    }
}

fn view_mut<'a, T: EventType>(
    mut key: EventTypeKey,
    mut current: &'a mut (dyn Any + 'static),
) -> Option<&'a mut T> {
    loop {
        if current.is::<T>() {
            return current.downcast_mut::<T>();
        }
        let (_, upcast_mut) = event_type::upcasts(key)?;
        current = upcast_mut(current)?;
        key = event_type::parent_of(key)?;
    }
}

/// Completion of a published event
///
/// Resolves to the event when it finished or was stopped, and to
/// [`EventError::Aborted`] when it was aborted. Usable as a `Future`, with a
/// blocking [`wait`](EventFuture::wait), or polled with
/// [`try_result`](EventFuture::try_result).
pub struct EventFuture {
    receiver: oneshot::Receiver<EventOutcome>,
    settled: Option<EventOutcome>,
}

impl EventFuture {
    fn new(receiver: oneshot::Receiver<EventOutcome>) -> Self {
        Self {
            receiver,
            settled: None,
        }
    }

    /// Non-blocking poll; `None` while the event has not finished
    pub fn try_result(&mut self) -> Option<EventOutcome> {
        if self.settled.is_none() {
            match self.receiver.try_recv() {
                Ok(outcome) => self.settled = Some(outcome),
                Err(oneshot::error::TryRecvError::Empty) => return None,
                Err(oneshot::error::TryRecvError::Closed) => {
                    self.settled = Some(Err(EventError::Abandoned))
                }
            }
        }
        self.settled.clone()
    }

    /// Block until the event finishes
    ///
    /// Dispatch is synchronous, so the outcome is normally available as soon
    /// as `publish()` returns. Must not be called from within an async
    /// runtime when the outcome is still pending.
    pub fn wait(mut self) -> EventOutcome {
        if let Some(outcome) = self.try_result() {
            return outcome;
        }
        self.receiver
            .blocking_recv()
            .unwrap_or(Err(EventError::Abandoned))
    }
}

impl Future for EventFuture {
    type Output = EventOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(outcome) = self.settled.clone() {
            return Poll::Ready(outcome);
        }
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(EventError::Abandoned)))
    }
}

impl std::fmt::Debug for EventFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventFuture")
            .field("settled", &self.settled.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Default)]
    struct Session {
        user: String,
    }
    crate::event_type!(Session);

    #[derive(Debug, Default)]
    struct Login {
        base: Session,
        attempts: u32,
    }
    crate::event_type!(Login => Session, base);

    #[derive(Debug, Default)]
    struct Logout;
    crate::event_type!(Logout => Session);

    #[test]
    fn test_new_event_defaults() {
        let event = Event::new(Session::default());
        assert_eq!(event.status(), EventStatus::RUNNING);
        assert!(event.status().is_running());
        assert_eq!(event.depth(), 0);
        assert_eq!(event.delivery_count(), 0);
        assert!(event.reason().is_none());
        assert!(event.parent().is_none());
        assert!(event.finished_at().is_none());
        assert_eq!(event.type_name(), "Session");
    }

    #[test]
    fn test_status_flags() {
        assert_eq!(
            (EventStatus::STOPPED.finished, EventStatus::STOPPED.aborted, EventStatus::STOPPED.stopped),
            (true, false, true)
        );
        assert_eq!(
            (EventStatus::ABORTED.finished, EventStatus::ABORTED.aborted, EventStatus::ABORTED.stopped),
            (true, true, false)
        );
        assert_eq!(EventStatus::FINISHED.to_string(), "finished");
        assert_eq!(EventStatus::RUNNING.to_string(), "running");
    }

    #[test]
    fn test_stop_is_terminal() {
        let event = Event::new(Session::default());
        assert!(event.stop("done"));
        assert!(!event.abort("too late"));
        assert_eq!(event.status(), EventStatus::STOPPED);
        assert_eq!(event.reason().as_deref(), Some("done"));
        assert!(event.finished_at().is_some());
    }

    #[test]
    fn test_finish_is_idempotent() {
        let event = Event::new(Session::default());
        let mut future = event.begin_dispatch().expect("first dispatch");

        assert!(event.finish());
        assert!(!event.finish());
        assert_eq!(event.status(), EventStatus::FINISHED);

        let outcome = future.try_result().expect("settled");
        assert!(outcome.expect("resolved").ptr_eq(&event));
        // The settled outcome is cached rather than reported as abandoned.
        assert!(future.try_result().expect("still settled").is_ok());
    }

    #[test]
    fn test_finish_keeps_stop_status() {
        let event = Event::new(Session::default());
        event.stop("early");
        assert!(!event.finish());
        assert_eq!(event.status(), EventStatus::STOPPED);
    }

    #[test]
    fn test_abort_rejects_future() {
        let event = Event::new(Session::default());
        let future = event.begin_dispatch().expect("dispatch");
        event.abort("invalid credentials");
        event.finish();

        assert_eq!(
            future.wait().unwrap_err(),
            EventError::Aborted {
                reason: "invalid credentials".to_string()
            }
        );
    }

    #[test]
    fn test_dispatch_claimed_once() {
        let event = Event::new(Session::default());
        assert!(event.begin_dispatch().is_ok());
        assert!(matches!(
            event.begin_dispatch(),
            Err(BusError::AlreadyProcessed { .. })
        ));

        let finished = Event::new(Session::default());
        finished.finish();
        assert!(finished.begin_dispatch().is_err());
    }

    #[test]
    fn test_parent_sets_depth() {
        let root = Event::new(Session::default());
        let child = Event::new(Login::default()).with_parent(&root);
        let grandchild = Event::new(Logout).with_parent(&child);

        assert_eq!(root.depth(), 0);
        assert_eq!(child.depth(), 1);
        assert_eq!(grandchild.depth(), 2);
        assert!(grandchild.parent().expect("linked").ptr_eq(&child));
    }

    #[test]
    fn test_parent_link_is_non_owning() {
        let child = Event::new(Logout);
        {
            let parent = Event::new(Session::default());
            child.set_parent(&parent);
            assert!(child.parent().is_some());
        }
        assert!(child.parent().is_none());
        assert_eq!(child.depth(), 1);
    }

    #[test]
    fn test_self_parent_ignored() {
        let event = Event::new(Logout);
        event.set_parent(&event.clone());
        assert_eq!(event.depth(), 0);
        assert!(event.parent().is_none());
    }

    #[test]
    fn test_parent_link_frozen_after_dispatch() {
        let root = Event::new(Session::default());
        let child = Event::new(Login::default()).with_parent(&root);
        let _future = child.begin_dispatch().expect("dispatch");

        let late = Event::new(Logout).with_parent(&child);
        child.set_parent(&late);
        assert_eq!(child.depth(), 1);
        assert!(child.parent().expect("linked").ptr_eq(&root));

        child.finish();
        child.set_parent(&late);
        assert_eq!(child.depth(), 1);
    }

    #[test]
    fn test_inherit_copies_fields() {
        let parent = Event::new(Session::default())
            .with_field("request_id", "r-42")
            .with_field("tenant", 7);
        let child = Event::new(Logout).with_field("tenant", 1);
        child.inherit(&parent);

        assert_eq!(child.depth(), 1);
        assert_eq!(child.get("request_id"), Some(json!("r-42")));
        assert_eq!(child.get("tenant"), Some(json!(7)));
    }

    #[test]
    fn test_field_access() {
        let event = Event::new(Logout);
        assert_eq!(event.set("k", true), None);
        assert_eq!(event.set("k", false), Some(json!(true)));
        assert_eq!(event.remove("k"), Some(json!(false)));
        assert!(event.get("k").is_none());
        assert!(event.fields().is_empty());
    }

    #[test]
    fn test_payload_views() {
        let event = Event::new(Login {
            base: Session {
                user: "ada".to_string(),
            },
            attempts: 1,
        });

        assert!(event.is::<Login>());
        assert!(!event.is::<Session>());
        assert!(event.is_a::<Session>());
        assert!(event.is_a::<event_type::RootEvent>());
        assert!(!event.is_a::<Logout>());

        assert_eq!(event.data::<Login>().map(|d| d.attempts), Some(1));
        assert_eq!(
            event.data::<Session>().map(|d| d.user.clone()).as_deref(),
            Some("ada")
        );

        if let Some(mut session) = event.data_mut::<Session>() {
            session.user = "grace".to_string();
        }
        assert_eq!(
            event.data::<Login>().map(|d| d.base.user.clone()).as_deref(),
            Some("grace")
        );
    }

    #[test]
    fn test_payload_without_parent_view() {
        let event = Event::new(Logout);
        assert!(event.is_a::<Session>());
        assert!(event.data::<Session>().is_none());
        assert!(event.data::<Logout>().is_some());
    }

    #[tokio::test]
    async fn test_future_awaits_outcome() {
        let event = Event::new(Session::default());
        let future = event.begin_dispatch().expect("dispatch");
        event.finish();

        let resolved = future.await.expect("resolved");
        assert_eq!(resolved.status(), EventStatus::FINISHED);
    }

    #[test]
    fn test_future_abandoned_when_event_dropped() {
        let event = Event::new(Session::default());
        let mut future = event.begin_dispatch().expect("dispatch");
        drop(event);
        assert!(matches!(
            future.try_result(),
            Some(Err(EventError::Abandoned))
        ));
    }
}
