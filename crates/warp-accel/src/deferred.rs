//! Deferred results of queued commands
//!
//! A [`Deferred`] pairs the completion [`Event`] of a queued command with the
//! value that command will produce. The value can only be obtained through
//! [`Deferred::wait`] (or [`Deferred::try_take`] once the event is signaled),
//! so host code cannot observe a result the device has not finished writing.

use crate::event::{Event, EventStatus};
use crate::Result;
use std::fmt;

type Resolve<T> = Box<dyn FnOnce() -> Result<T> + Send>;

/// Result of a queued command, available once its event is signaled
#[must_use = "dropping a Deferred discards the result; wait on it or keep its event"]
pub struct Deferred<T> {
    event: Event,
    resolve: Resolve<T>,
}

impl<T> Deferred<T> {
    /// Pair `event` with the closure that produces the value after completion
    pub(crate) fn new(event: Event, resolve: impl FnOnce() -> Result<T> + Send + 'static) -> Self {
        Self {
            event,
            resolve: Box::new(resolve),
        }
    }

    /// Completion token of the command
    #[inline]
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Whether the command has finished
    pub fn is_ready(&self) -> bool {
        self.event.is_signaled()
    }

    /// Block until the command finishes and return its value
    ///
    /// # Errors
    /// The device error the command failed with
    pub fn wait(self) -> Result<T> {
        self.event.wait()?;
        (self.resolve)()
    }

    /// Take the value if the command has already finished
    ///
    /// Returns `Err(self)` while the command is still queued.
    pub fn try_take(self) -> std::result::Result<Result<T>, Self> {
        match self.event.status() {
            EventStatus::Queued => Err(self),
            EventStatus::Complete => Ok((self.resolve)()),
            EventStatus::Failed(err) => Ok(Err(err.into())),
        }
    }

    /// Transform the eventual value
    pub fn map<U, F>(self, f: F) -> Deferred<U>
    where
        T: 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let resolve = self.resolve;
        Deferred::new(self.event, move || resolve().map(f))
    }

    /// Transform the eventual value with a fallible step
    pub fn and_then<U, F>(self, f: F) -> Deferred<U>
    where
        T: 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        let resolve = self.resolve;
        Deferred::new(self.event, move || resolve().and_then(f))
    }
}

impl Deferred<()> {
    /// Deferred unit result completing with `event`
    pub(crate) fn unit(event: Event) -> Self {
        Self::new(event, || Ok(()))
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred").field("event", &self.event).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DeviceError, Error};

    #[test]
    fn test_wait_returns_value() {
        let deferred = Deferred::new(Event::completed(), || Ok(42));
        assert!(deferred.is_ready());
        assert_eq!(deferred.wait().unwrap(), 42);
    }

    #[test]
    fn test_value_not_resolved_before_completion() {
        let event = Event::queued();
        let deferred = Deferred::new(event.clone(), || Ok("done"));

        let deferred = deferred.try_take().unwrap_err();
        assert!(!deferred.is_ready());

        event.complete();
        assert_eq!(deferred.try_take().unwrap().unwrap(), "done");
    }

    #[test]
    fn test_failed_event_skips_resolve() {
        let event = Event::queued();
        event.fail(DeviceError::ExecutionFailed("boom".into()));
        let deferred: Deferred<u32> = Deferred::new(event, || panic!("must not resolve"));
        let err = deferred.wait().unwrap_err();
        assert!(matches!(err, Error::Device(DeviceError::ExecutionFailed(_))));
    }

    #[test]
    fn test_map() {
        let deferred = Deferred::new(Event::completed(), || Ok(vec![1, 2, 3])).map(|v| v.len());
        assert_eq!(deferred.wait().unwrap(), 3);
    }

    #[test]
    fn test_and_then_propagates_error() {
        let deferred = Deferred::new(Event::completed(), || Ok(3usize))
            .and_then(|n| Err::<usize, _>(Error::dimension_mismatch(4, n)));
        assert!(matches!(
            deferred.wait(),
            Err(Error::DimensionMismatch { expected: 4, actual: 3 })
        ));
    }

    #[test]
    fn test_unit() {
        let event = Event::queued();
        let deferred = Deferred::unit(event.clone());
        assert_eq!(deferred.event(), &event);
        event.complete();
        deferred.wait().unwrap();
    }
}
