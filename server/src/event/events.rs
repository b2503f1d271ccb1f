use std::any::Any;

use uuid::Uuid;

use crate::account::Tag;
use crate::player::ProximityCause;
use crate::state::State;
use crate::voice::ShutdownReason;

/// Events whose delivery can be vetoed by a subscriber.
pub trait Cancellable {
    fn is_cancelled(&self) -> bool;
    fn set_cancelled(&mut self, cancelled: bool);
}

/// A concrete event payload that can be published on the bus.
pub trait EventPayload: Any + Send + Sized {
    const KIND: EventKind;

    fn into_event(self) -> AudioEvent;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub old: State,
    pub new: State,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConnect {
    pub client: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientDisconnect {
    pub client: Uuid,
}

/// Asked before a client gets its voice capability unlocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequestVoice {
    pub client: Uuid,
    pub cancelled: bool,
}

impl ClientRequestVoice {
    #[must_use]
    pub fn new(client: Uuid) -> Self {
        Self { client, cancelled: false }
    }
}

impl Cancellable for ClientRequestVoice {
    fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    fn set_cancelled(&mut self, cancelled: bool) {
        self.cancelled = cancelled;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountAddTag {
    pub tag: Tag,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRemoveTag {
    pub tag: Tag,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceSessionStarted {
    pub host: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceSessionEnded {
    pub reason: ShutdownReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MicrophoneMute {
    pub client: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MicrophoneUnmute {
    pub client: Uuid,
}

/// A listener came into voice range of a speaker. Each direction of a pair
/// fires on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerEnterVoiceProximity {
    pub speaker: Uuid,
    pub listener: Uuid,
    pub cause: ProximityCause,
}

macro_rules! audio_events {
    ($($name:ident),* $(,)?) => {
        /// Discriminant of an [`AudioEvent`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum EventKind {
            $($name,)*
        }

        /// Every event the bus can carry, one variant per payload type.
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum AudioEvent {
            $($name($name),)*
        }

        impl AudioEvent {
            #[must_use]
            pub fn kind(&self) -> EventKind {
                match self {
                    $(Self::$name(_) => EventKind::$name,)*
                }
            }

            pub(crate) fn payload_mut(&mut self) -> &mut dyn Any {
                match self {
                    $(Self::$name(payload) => payload,)*
                }
            }
        }

        $(
            impl EventPayload for $name {
                const KIND: EventKind = EventKind::$name;

                fn into_event(self) -> AudioEvent {
                    AudioEvent::$name(self)
                }
            }
        )*
    };
}

audio_events! {
    StateChange,
    ClientConnect,
    ClientDisconnect,
    ClientRequestVoice,
    AccountAddTag,
    AccountRemoveTag,
    VoiceSessionStarted,
    VoiceSessionEnded,
    MicrophoneMute,
    MicrophoneUnmute,
    PlayerEnterVoiceProximity,
}

impl AudioEvent {
    /// The cancel flag of this event, if it has one.
    pub fn as_cancellable(&mut self) -> Option<&mut dyn Cancellable> {
        match self {
            Self::ClientRequestVoice(event) => Some(event),
            _ => None,
        }
    }
}
