//! In-process publish/subscribe.
//!
//! Subscribers register per [`EventKind`] and receive the payload by mutable
//! reference, so cancellable events can be vetoed before the publisher looks
//! at them again. Publishing is synchronous and never fails: handler errors and
//! panics are logged and delivery moves on to the next subscriber.

mod events;

pub use events::{
    AccountAddTag, AccountRemoveTag, AudioEvent, Cancellable, ClientConnect, ClientDisconnect,
    ClientRequestVoice, EventKind, EventPayload, MicrophoneMute, MicrophoneUnmute,
    PlayerEnterVoiceProximity, StateChange, VoiceSessionEnded, VoiceSessionStarted,
};

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwap;
use tracing::error;

use crate::error::ServerError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

type ErasedHandler = Box<dyn Fn(&mut dyn Any) -> Result<(), BoxError> + Send + Sync>;

type HandlerTable = HashMap<EventKind, Vec<Arc<HandlerHolder>>>;

/// A subscription slot. The handler can be attached exactly once.
pub struct HandlerHolder {
    kind: EventKind,
    handler: OnceLock<ErasedHandler>,
    missing_reported: AtomicBool,
}

impl HandlerHolder {
    fn new(kind: EventKind) -> Self {
        Self {
            kind,
            handler: OnceLock::new(),
            missing_reported: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Attaches the callback for this subscription.
    ///
    /// # Errors
    /// Returns [`ServerError::HandlerAlreadySet`] on a second call (the first handler
    /// stays), or [`ServerError::HandlerKindMismatch`] when `T` is not the kind
    /// this holder was registered for.
    pub fn set_handler<T, F>(&self, handler: F) -> Result<(), ServerError>
    where
        T: EventPayload,
        F: Fn(&mut T) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        if T::KIND != self.kind {
            return Err(ServerError::HandlerKindMismatch {
                expected: self.kind,
                got: T::KIND,
            });
        }

        let erased: ErasedHandler = Box::new(move |payload: &mut dyn Any| {
            match payload.downcast_mut::<T>() {
                Some(event) => handler(event),
                None => Err(format!("payload is not a {:?}", T::KIND).into()),
            }
        });

        self.handler
            .set(erased)
            .map_err(|_| ServerError::HandlerAlreadySet(self.kind))
    }

    #[must_use]
    pub fn has_handler(&self) -> bool {
        self.handler.get().is_some()
    }

    /// Whether a publish already ran into this holder without a handler.
    #[must_use]
    pub fn missing_reported(&self) -> bool {
        self.missing_reported.load(Ordering::Relaxed)
    }

    fn invoke(&self, payload: &mut dyn Any) {
        let Some(handler) = self.handler.get() else {
            if !self.missing_reported.swap(true, Ordering::Relaxed) {
                error!("Subscriber for {:?} has no handler attached", self.kind);
            }
            return;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| handler(payload))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Handler for {:?} failed: {}", self.kind, e),
            Err(_) => error!("Handler for {:?} panicked", self.kind),
        }
    }
}

/// Publish/subscribe hub. Reads are a single atomic load; subscribing copies the table.
#[derive(Default)]
pub struct EventBus {
    handlers: ArcSwap<HandlerTable>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber for events of type `T`.
    pub fn on<T: EventPayload>(&self) -> Arc<HandlerHolder> {
        self.subscribe(T::KIND)
    }

    pub fn subscribe(&self, kind: EventKind) -> Arc<HandlerHolder> {
        let holder = Arc::new(HandlerHolder::new(kind));
        self.handlers.rcu(|table| {
            let mut table = HandlerTable::clone(table);
            table.entry(kind).or_default().push(holder.clone());
            table
        });
        holder
    }

    /// Removes `holder`. Unknown holders are ignored.
    pub fn unsubscribe(&self, holder: &Arc<HandlerHolder>) {
        let kind = holder.kind;
        let known = self
            .handlers
            .load()
            .get(&kind)
            .is_some_and(|list| list.iter().any(|h| Arc::ptr_eq(h, holder)));
        if !known {
            return;
        }

        self.handlers.rcu(|table| {
            let mut table = HandlerTable::clone(table);
            if let Some(list) = table.get_mut(&kind) {
                list.retain(|h| !Arc::ptr_eq(h, holder));
                if list.is_empty() {
                    table.remove(&kind);
                }
            }
            table
        });
    }

    #[must_use]
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.handlers.load().get(&kind).map_or(0, Vec::len)
    }

    /// Delivers `payload` to every subscriber of its kind and hands it back.
    pub fn publish<T: EventPayload>(&self, mut payload: T) -> T {
        self.deliver(T::KIND, &mut payload);
        payload
    }

    /// Same as [`EventBus::publish`] for an already wrapped event.
    pub fn publish_event(&self, mut event: AudioEvent) -> AudioEvent {
        let kind = event.kind();
        self.deliver(kind, event.payload_mut());
        event
    }

    fn deliver(&self, kind: EventKind, payload: &mut dyn Any) {
        let table = self.handlers.load();
        let Some(subscribers) = table.get(&kind) else {
            return;
        };
        for holder in subscribers {
            holder.invoke(payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[test]
    fn subscribers_only_see_their_kind() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        bus.on::<ClientConnect>()
            .set_handler(move |event: &mut ClientConnect| {
                sink.lock().unwrap().push(event.client);
                Ok(())
            })
            .unwrap();

        let alice = Uuid::new_v4();
        bus.publish(ClientConnect { client: alice });
        bus.publish(ClientDisconnect { client: alice });

        assert_eq!(*seen.lock().unwrap(), vec![alice]);
    }

    #[test]
    fn failing_subscriber_does_not_stop_delivery() {
        let bus = EventBus::new();
        let reached = Arc::new(AtomicBool::new(false));

        bus.on::<MicrophoneMute>()
            .set_handler(|_: &mut MicrophoneMute| Err("listener broke".into()))
            .unwrap();
        bus.on::<MicrophoneMute>()
            .set_handler(|_: &mut MicrophoneMute| panic!("listener exploded"))
            .unwrap();
        let flag = reached.clone();
        bus.on::<MicrophoneMute>()
            .set_handler(move |_: &mut MicrophoneMute| {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        bus.publish(MicrophoneMute { client: Uuid::new_v4() });
        assert!(reached.load(Ordering::SeqCst));
    }

    #[test]
    fn publisher_sees_the_veto() {
        let bus = EventBus::new();
        bus.on::<ClientRequestVoice>()
            .set_handler(|event: &mut ClientRequestVoice| {
                event.set_cancelled(true);
                Ok(())
            })
            .unwrap();

        let result = bus.publish(ClientRequestVoice::new(Uuid::new_v4()));
        assert!(result.is_cancelled());

        let mut wrapped = bus.publish_event(ClientRequestVoice::new(Uuid::new_v4()).into_event());
        assert!(wrapped.as_cancellable().is_some_and(|c| c.is_cancelled()));
    }

    #[test]
    fn missing_handler_is_flagged_once_and_delivery_continues() {
        let bus = EventBus::new();
        let empty = bus.on::<ClientConnect>();
        let count = Arc::new(Mutex::new(0));
        let counter = count.clone();
        bus.on::<ClientConnect>()
            .set_handler(move |_: &mut ClientConnect| {
                *counter.lock().unwrap() += 1;
                Ok(())
            })
            .unwrap();

        assert!(!empty.missing_reported());
        bus.publish(ClientConnect { client: Uuid::new_v4() });
        bus.publish(ClientConnect { client: Uuid::new_v4() });

        assert!(empty.missing_reported());
        assert_eq!(*count.lock().unwrap(), 2);
    }

    #[test]
    fn handler_can_only_be_set_once() {
        let bus = EventBus::new();
        let holder = bus.on::<ClientConnect>();
        let hits = Arc::new(Mutex::new(Vec::new()));

        let first = hits.clone();
        holder
            .set_handler(move |_: &mut ClientConnect| {
                first.lock().unwrap().push("first");
                Ok(())
            })
            .unwrap();
        let second = hits.clone();
        let err = holder
            .set_handler(move |_: &mut ClientConnect| {
                second.lock().unwrap().push("second");
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, ServerError::HandlerAlreadySet(EventKind::ClientConnect)));

        bus.publish(ClientConnect { client: Uuid::new_v4() });
        assert_eq!(*hits.lock().unwrap(), vec!["first"]);
    }

    #[test]
    fn wrong_payload_type_is_rejected() {
        let bus = EventBus::new();
        let holder = bus.on::<ClientConnect>();
        let err = holder
            .set_handler(|_: &mut ClientDisconnect| Ok(()))
            .unwrap_err();
        assert!(matches!(err, ServerError::HandlerKindMismatch { .. }));
        assert!(!holder.has_handler());
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let holder = bus.on::<ClientConnect>();
        bus.on::<ClientConnect>();
        assert_eq!(bus.subscriber_count(EventKind::ClientConnect), 2);

        bus.unsubscribe(&holder);
        bus.unsubscribe(&holder);
        assert_eq!(bus.subscriber_count(EventKind::ClientConnect), 1);
        assert_eq!(bus.subscriber_count(EventKind::StateChange), 0);
    }
}
