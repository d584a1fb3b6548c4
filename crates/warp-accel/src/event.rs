//! Completion events
//!
//! An [`Event`] is the completion token of one queued device command. It
//! starts `Queued` and moves exactly once to `Complete` or `Failed`; the
//! terminal state never changes afterwards. Events are cheap to clone and are
//! used for two things only: waiting, and as entries of a later command's wait
//! list.

use crate::error::DeviceError;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{trace, warn};

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// Execution status of a queued command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventStatus {
    /// Submitted, not yet finished
    Queued,
    /// Finished successfully
    Complete,
    /// Finished with an error
    Failed(DeviceError),
}

impl EventStatus {
    /// Whether this is a terminal state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EventStatus::Queued)
    }
}

type Continuation = Box<dyn FnOnce() + Send>;

struct EventInner {
    id: u64,
    status: Mutex<EventStatus>,
    signal: Condvar,
    // Locked only while `status` is held
    continuations: Mutex<Vec<Continuation>>,
}

/// Completion token for a queued command
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    /// Create a new event in the `Queued` state
    pub(crate) fn queued() -> Self {
        let id = NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            inner: Arc::new(EventInner {
                id,
                status: Mutex::new(EventStatus::Queued),
                signal: Condvar::new(),
                continuations: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create an event that is already complete
    pub fn completed() -> Self {
        let event = Self::queued();
        event.complete();
        event
    }

    /// Unique event id
    #[inline]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Current status
    pub fn status(&self) -> EventStatus {
        self.inner.status.lock().clone()
    }

    /// Whether the command has finished, successfully or not
    pub fn is_signaled(&self) -> bool {
        self.inner.status.lock().is_terminal()
    }

    /// Block until the command finishes
    ///
    /// # Errors
    /// The device error the command failed with
    pub fn wait(&self) -> Result<(), DeviceError> {
        let mut status = self.inner.status.lock();
        while !status.is_terminal() {
            self.inner.signal.wait(&mut status);
        }
        match &*status {
            EventStatus::Failed(err) => Err(err.clone()),
            _ => Ok(()),
        }
    }

    /// Block until the command finishes or `timeout` elapses
    ///
    /// Returns `None` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), DeviceError>> {
        let mut status = self.inner.status.lock();
        if !status.is_terminal() {
            let _ = self.inner.signal.wait_while_for(&mut status, |s| !s.is_terminal(), timeout);
        }
        match &*status {
            EventStatus::Queued => None,
            EventStatus::Complete => Some(Ok(())),
            EventStatus::Failed(err) => Some(Err(err.clone())),
        }
    }

    /// Run `f` once the event reaches a terminal state
    ///
    /// Runs `f` on the calling thread if the event is already terminal,
    /// otherwise on the thread that signals it.
    pub(crate) fn on_terminal(&self, f: impl FnOnce() + Send + 'static) {
        let status = self.inner.status.lock();
        if status.is_terminal() {
            drop(status);
            f();
            return;
        }
        self.inner.continuations.lock().push(Box::new(f));
    }

    pub(crate) fn complete(&self) {
        if let Err(current) = self.finish(EventStatus::Complete) {
            warn!("Event {} already {:?}, ignoring completion", self.inner.id, current);
        }
    }

    pub(crate) fn fail(&self, err: DeviceError) {
        if let Err(current) = self.finish(EventStatus::Failed(err.clone())) {
            warn!("Event {} already {:?}, ignoring failure: {}", self.inner.id, current, err);
        }
    }

    /// Complete the event unless it is already terminal
    pub(crate) fn try_complete(&self) -> bool {
        self.finish(EventStatus::Complete).is_ok()
    }

    /// Fail the event unless it is already terminal
    pub(crate) fn try_fail(&self, err: DeviceError) -> bool {
        self.finish(EventStatus::Failed(err)).is_ok()
    }

    /// Move to `terminal`, returning the current status if already terminal
    fn finish(&self, terminal: EventStatus) -> Result<(), EventStatus> {
        let mut status = self.inner.status.lock();
        if status.is_terminal() {
            return Err(status.clone());
        }
        trace!("Event {} -> {:?}", self.inner.id, terminal);
        *status = terminal;
        let continuations = std::mem::take(&mut *self.inner.continuations.lock());
        drop(status);

        self.inner.signal.notify_all();
        for continuation in continuations {
            continuation();
        }
        Ok(())
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Event {}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.inner.id)
            .field("status", &*self.inner.status.lock())
            .finish()
    }
}

/// Wait for every event in `events`
///
/// All events are waited on even if an earlier one failed; the first failure
/// in list order is returned.
pub fn wait_for_events(events: &[Event]) -> Result<(), DeviceError> {
    let mut first_err = None;
    for event in events {
        if let Err(err) = event.wait()
            && first_err.is_none()
        {
            first_err = Some(err);
        }
    }
    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Host-controlled event
///
/// Lets the host gate device commands: a command whose wait list contains
/// `user.event()` does not start until the host calls [`UserEvent::complete`].
#[derive(Debug)]
pub struct UserEvent {
    event: Event,
}

impl UserEvent {
    /// Create a new pending user event
    pub fn new() -> Self {
        Self { event: Event::queued() }
    }

    /// Token to place in wait lists
    pub fn event(&self) -> Event {
        self.event.clone()
    }

    /// Signal success
    pub fn complete(self) {
        self.event.complete();
    }

    /// Signal failure; dependents fail with `DependencyFailed`
    pub fn fail(self, reason: impl Into<String>) {
        self.event.fail(DeviceError::ExecutionFailed(reason.into()));
    }
}

impl Default for UserEvent {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_new_event_is_queued() {
        let event = Event::queued();
        assert_eq!(event.status(), EventStatus::Queued);
        assert!(!event.is_signaled());
    }

    #[test]
    fn test_completed_event() {
        let event = Event::completed();
        assert!(event.is_signaled());
        assert!(event.wait().is_ok());
    }

    #[test]
    fn test_terminal_state_is_permanent() {
        let event = Event::queued();
        event.complete();
        event.fail(DeviceError::QueueShutdown);
        assert_eq!(event.status(), EventStatus::Complete);

        let event = Event::queued();
        event.fail(DeviceError::QueueShutdown);
        event.complete();
        assert_eq!(event.status(), EventStatus::Failed(DeviceError::QueueShutdown));
        assert_eq!(event.wait(), Err(DeviceError::QueueShutdown));
    }

    #[test]
    fn test_wait_across_threads() {
        let event = Event::queued();
        let signaller = event.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            signaller.complete();
        });

        assert!(event.wait().is_ok());
        assert!(event.is_signaled());
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_timeout() {
        let event = Event::queued();
        assert!(event.wait_timeout(Duration::from_millis(5)).is_none());
        event.complete();
        assert_eq!(event.wait_timeout(Duration::from_millis(5)), Some(Ok(())));
    }

    #[test]
    fn test_wait_for_events_reports_first_failure() {
        let ok = Event::completed();
        let bad = Event::queued();
        bad.fail(DeviceError::ExecutionFailed("first".into()));
        let worse = Event::queued();
        worse.fail(DeviceError::ExecutionFailed("second".into()));

        let err = wait_for_events(&[ok, bad, worse]).unwrap_err();
        assert_eq!(err, DeviceError::ExecutionFailed("first".into()));
        assert!(wait_for_events(&[]).is_ok());
    }

    #[test]
    fn test_user_event() {
        let user = UserEvent::new();
        let token = user.event();
        assert!(!token.is_signaled());
        user.complete();
        assert!(token.wait().is_ok());
    }

    #[test]
    fn test_continuations_run_once_on_signal() {
        use std::sync::atomic::AtomicUsize;

        let event = Event::queued();
        let runs = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let runs = Arc::clone(&runs);
            event.on_terminal(move || {
                runs.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        event.fail(DeviceError::QueueShutdown);
        event.complete();
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        // Already terminal: runs immediately
        let late = Arc::clone(&runs);
        event.on_terminal(move || {
            late.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_try_signal_is_silent_on_terminal() {
        let event = Event::queued();
        assert!(event.try_complete());
        assert!(!event.try_complete());
        assert!(!event.try_fail(DeviceError::QueueShutdown));
        assert_eq!(event.status(), EventStatus::Complete);
    }

    #[test]
    fn test_event_identity() {
        let a = Event::queued();
        let b = a.clone();
        let c = Event::queued();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a.id(), c.id());
    }
}
