use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tracing::debug;
use uuid::Uuid;

use crate::event::{EventBus, PlayerEnterVoiceProximity};
use crate::networking::NetworkingService;
use crate::player::{ProximityCause, ProximitySource};

/// Remembers which voice clients were in range of each other on the last
/// refresh and reports the pairs that are new.
pub struct ProximityTracker {
    source: Arc<dyn ProximitySource>,
    // (speaker, listener)
    linked: Mutex<HashSet<(Uuid, Uuid)>>,
}

impl ProximityTracker {
    #[must_use]
    pub fn new(source: Arc<dyn ProximitySource>) -> Self {
        Self {
            source,
            linked: Mutex::new(HashSet::new()),
        }
    }

    /// Re-reads voice ranges for every unlocked client and publishes a
    /// [`PlayerEnterVoiceProximity`] for each pair that was not linked before.
    /// Returns how many were published.
    pub fn refresh(&self, networking: &NetworkingService, bus: &EventBus) -> usize {
        let voiced: HashSet<Uuid> = networking
            .clients()
            .iter()
            .filter(|client| client.is_voice_unlocked())
            .map(|client| client.uuid())
            .collect();

        let mut current = HashMap::new();
        for speaker in &voiced {
            for (listener, cause) in self.source.listeners_of(*speaker) {
                if listener != *speaker && voiced.contains(&listener) {
                    current.insert((*speaker, listener), cause);
                }
            }
        }

        let entered: Vec<((Uuid, Uuid), ProximityCause)> = match self.linked.lock() {
            Ok(mut linked) => {
                let entered = current
                    .iter()
                    .filter(|(pair, _)| !linked.contains(*pair))
                    .map(|(pair, cause)| (*pair, *cause))
                    .collect();
                *linked = current.into_keys().collect();
                entered
            }
            Err(_) => return 0,
        };

        for ((speaker, listener), cause) in &entered {
            debug!("[{}] Now in voice range of {} ({:?})", listener, speaker, cause);
            bus.publish(PlayerEnterVoiceProximity {
                speaker: *speaker,
                listener: *listener,
                cause: *cause,
            });
        }
        entered.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientRegistry;
    use crate::networking::{ChannelClientSink, DirectNetworking};
    use crate::player::PlayerAdapter;

    struct Named(Uuid);

    impl PlayerAdapter for Named {
        fn uuid(&self) -> Uuid {
            self.0
        }
        fn name(&self) -> &str {
            "named"
        }
        fn send_message(&self, _message: &str) {}
        fn kick(&self, _reason: &str) {}
    }

    #[derive(Default)]
    struct Ranges(Mutex<HashMap<Uuid, Vec<(Uuid, ProximityCause)>>>);

    impl ProximitySource for Ranges {
        fn listeners_of(&self, speaker: Uuid) -> Vec<(Uuid, ProximityCause)> {
            self.0.lock().unwrap().get(&speaker).cloned().unwrap_or_default()
        }
    }

    #[test]
    fn only_new_pairs_between_voice_clients_are_reported() {
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(ClientRegistry::new(bus.clone()));
        let (sink, _rx) = ChannelClientSink::new();
        let networking = NetworkingService::Direct(Arc::new(DirectNetworking::new(registry, Arc::new(sink))));

        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        for id in [a, b, c] {
            networking.register(Arc::new(Named(id)));
        }
        for id in [a, b] {
            networking.get_client(id).unwrap().set_voice_unlocked(true);
        }

        let ranges = Arc::new(Ranges::default());
        ranges.0.lock().unwrap().insert(
            a,
            vec![(b, ProximityCause::Distance), (c, ProximityCause::Distance), (a, ProximityCause::Shout)],
        );
        let tracker = ProximityTracker::new(ranges.clone());

        // c has no voice, a cannot hear itself
        assert_eq!(tracker.refresh(&networking, &bus), 1);
        assert_eq!(tracker.refresh(&networking, &bus), 0);

        ranges.0.lock().unwrap().insert(b, vec![(a, ProximityCause::Shout)]);
        assert_eq!(tracker.refresh(&networking, &bus), 1);

        // leaving range and coming back is a new entry
        ranges.0.lock().unwrap().remove(&a);
        assert_eq!(tracker.refresh(&networking, &bus), 0);
        ranges.0.lock().unwrap().insert(a, vec![(b, ProximityCause::Distance)]);
        assert_eq!(tracker.refresh(&networking, &bus), 1);
    }
}
