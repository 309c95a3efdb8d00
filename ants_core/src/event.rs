//! Minimal synchronous publish/subscribe.
//!
//! An [`Event`] is an ordered list of subscriber callbacks. Firing an event
//! calls every subscriber in subscription order with a mutable reference to
//! the owner (`T`) and to a shared payload (`P`), so later subscribers see
//! whatever earlier ones wrote into the payload.

use std::fmt;

use crate::{Error, Result};

/// Handle returned by [`Event::connect`], used to disconnect a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback<T, P> = Box<dyn FnMut(&mut T, &mut P) -> Result<()>>;

/// A named event slot holding its subscribers.
pub struct Event<T, P> {
    subscribers: Vec<(SubscriptionId, Callback<T, P>)>,
    next_id: u64,
}

impl<T, P> Default for Event<T, P> {
    fn default() -> Self {
        Self {
            subscribers: Vec::new(),
            next_id: 0,
        }
    }
}

impl<T, P> fmt::Debug for Event<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl<T, P> Event<T, P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a subscriber. The same closure logic may be connected more
    /// than once; each connection gets its own id and is called separately.
    pub fn connect<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&mut T, &mut P) -> Result<()> + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    /// Removes the subscriber with the given id.
    ///
    /// Returns `Error::SubscriberNotFound` if it is not connected. A
    /// subscriber cannot disconnect itself from the event currently firing.
    pub fn disconnect(&mut self, id: SubscriptionId) -> Result<()> {
        let index = self
            .subscribers
            .iter()
            .position(|(sub, _)| *sub == id)
            .ok_or(Error::SubscriberNotFound(id.0))?;
        self.subscribers.remove(index);
        Ok(())
    }

    /// Removes every subscriber.
    pub fn disconnect_all(&mut self) {
        self.subscribers.clear();
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Fires an event that is not stored inside `target`.
    ///
    /// Stops at the first subscriber error and returns it.
    pub fn fire(&mut self, target: &mut T, payload: &mut P) -> Result<()> {
        for (_, callback) in self.subscribers.iter_mut() {
            callback(target, payload)?;
        }
        Ok(())
    }
}

/// Fires an event that lives inside `target` itself.
///
/// The subscriber list is detached for the duration of the call so that
/// subscribers can mutate `target` freely. Subscribers connected to the same
/// event while it fires are kept and run from the next firing onwards; a
/// nested firing of the same event does not reach the detached subscribers.
pub fn fire_within<T, P>(
    target: &mut T,
    slot: fn(&mut T) -> &mut Event<T, P>,
    payload: &mut P,
) -> Result<()> {
    let mut detached = std::mem::take(&mut slot(target).subscribers);

    let mut result = Ok(());
    for (_, callback) in detached.iter_mut() {
        result = callback(target, payload);
        if result.is_err() {
            break;
        }
    }

    let event = slot(target);
    let connected_meanwhile = std::mem::replace(&mut event.subscribers, detached);
    event.subscribers.extend(connected_meanwhile);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        calls: Vec<&'static str>,
        event: Event<Counter, u32>,
    }

    #[test]
    fn subscribers_run_in_connection_order() {
        let mut event: Event<Vec<&'static str>, ()> = Event::new();
        event.connect(|log, _| {
            log.push("first");
            Ok(())
        });
        event.connect(|log, _| {
            log.push("second");
            Ok(())
        });

        let mut log = Vec::new();
        event.fire(&mut log, &mut ()).unwrap();
        assert_eq!(log, vec!["first", "second"]);
    }

    #[test]
    fn payload_is_shared_between_subscribers() {
        let mut event: Event<(), u32> = Event::new();
        event.connect(|_, value| {
            *value += 1;
            Ok(())
        });
        event.connect(|_, value| {
            *value *= 10;
            Ok(())
        });

        let mut payload = 1;
        event.fire(&mut (), &mut payload).unwrap();
        assert_eq!(payload, 20);
    }

    #[test]
    fn duplicate_connections_are_called_twice() {
        let mut event: Event<u32, ()> = Event::new();
        for _ in 0..2 {
            event.connect(|count, _| {
                *count += 1;
                Ok(())
            });
        }
        let mut count = 0;
        event.fire(&mut count, &mut ()).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn disconnect_removes_only_that_subscriber() {
        let mut event: Event<u32, ()> = Event::new();
        let first = event.connect(|count, _| {
            *count += 1;
            Ok(())
        });
        event.connect(|count, _| {
            *count += 100;
            Ok(())
        });

        event.disconnect(first).unwrap();
        let mut count = 0;
        event.fire(&mut count, &mut ()).unwrap();
        assert_eq!(count, 100);

        assert!(matches!(
            event.disconnect(first),
            Err(Error::SubscriberNotFound(_))
        ));
    }

    #[test]
    fn disconnect_all_clears_subscribers() {
        let mut event: Event<u32, ()> = Event::new();
        event.connect(|_, _| Ok(()));
        event.connect(|_, _| Ok(()));
        event.disconnect_all();
        assert!(event.is_empty());
    }

    #[test]
    fn error_aborts_remaining_subscribers() {
        let mut event: Event<u32, ()> = Event::new();
        event.connect(|_, _| Err(Error::InvalidParams("boom".into())));
        event.connect(|count, _| {
            *count += 1;
            Ok(())
        });
        let mut count = 0;
        assert!(event.fire(&mut count, &mut ()).is_err());
        assert_eq!(count, 0);
    }

    #[test]
    fn fire_within_lets_subscribers_mutate_owner() {
        let mut counter = Counter::default();
        counter.event.connect(|owner, value| {
            owner.calls.push("handled");
            *value += 1;
            // Connecting during a firing is kept for next time.
            owner.event.connect(|owner, _| {
                owner.calls.push("late");
                Ok(())
            });
            Ok(())
        });

        let mut payload = 0;
        fire_within(&mut counter, |c| &mut c.event, &mut payload).unwrap();
        assert_eq!(payload, 1);
        assert_eq!(counter.calls, vec!["handled"]);
        assert_eq!(counter.event.len(), 2);

        fire_within(&mut counter, |c| &mut c.event, &mut payload).unwrap();
        assert_eq!(counter.calls, vec!["handled", "handled", "late"]);
    }

    #[test]
    fn nested_fire_of_same_event_does_not_recurse() {
        let mut counter = Counter::default();
        counter.event.connect(|owner, value| {
            *value += 1;
            let mut inner = 0;
            fire_within(owner, |c| &mut c.event, &mut inner)?;
            owner.calls.push("outer");
            Ok(())
        });

        let mut payload = 0;
        fire_within(&mut counter, |c| &mut c.event, &mut payload).unwrap();
        assert_eq!(payload, 1);
        assert_eq!(counter.calls, vec!["outer"]);
        assert_eq!(counter.event.len(), 1);
    }
}
