use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};
use voicelink_protocol::{Packet, VoiceEvent};

use crate::account::{RestClient, RestEndpoint};
use crate::client::ClientConnection;
use crate::context::Context;
use crate::error::ServerError;
use crate::event::{Cancellable, ClientRequestVoice};
use crate::scheduler::TaskHandle;
use crate::state::State;
use crate::voice::{AuthorityConnector, AuthorityLink, ProximityTracker, ShutdownReason, VoiceSession};

const SLOTS_FULL_MESSAGE: &str =
    "Voice chat couldn't be enabled because this server is using all of its voice slots. Please notify a staff member and try again later.";

const SESSION_ENDED_REASON: &str = "The voice chat session ended";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    LoggingIn,
    Connected,
    ShuttingDown,
    Terminated,
    LoginFailed,
}

/// Called once when a connected driver has finished shutting down.
pub type TerminationHook = Box<dyn FnOnce(&VoiceDriver, ShutdownReason) + Send>;

/// Drives one session with the voice authority: login, heartbeats, per-client
/// events and teardown.
pub struct VoiceDriver {
    ctx: Context,
    session: VoiceSession,
    rest: Arc<dyn RestClient>,
    state: Mutex<DriverState>,
    outbound: Mutex<Option<UnboundedSender<VoiceEvent>>>,
    heartbeat: Mutex<Option<TaskHandle>>,
    proximity: Option<ProximityTracker>,
    proximity_refresh: Mutex<Option<TaskHandle>>,
    // serializes the capacity check with setting the unlock flag
    unlock_guard: Mutex<()>,
    // held for the whole teardown so later callers wait for it
    teardown: tokio::sync::Mutex<()>,
    on_terminated: Mutex<Option<TerminationHook>>,
}

impl VoiceDriver {
    /// Logs into the authority and, on success, starts heartbeating and
    /// announcing clients.
    ///
    /// # Errors
    /// Returns the connector's error after moving to [`DriverState::LoginFailed`].
    /// Nothing is scheduled in that case.
    pub async fn start(
        ctx: Context,
        session: VoiceSession,
        connector: &dyn AuthorityConnector,
        rest: Arc<dyn RestClient>,
        proximity: Option<ProximityTracker>,
        on_terminated: TerminationHook,
    ) -> Result<Arc<Self>, ServerError> {
        let driver = Arc::new(Self {
            ctx,
            session,
            rest,
            state: Mutex::new(DriverState::LoggingIn),
            outbound: Mutex::new(None),
            heartbeat: Mutex::new(None),
            proximity,
            proximity_refresh: Mutex::new(None),
            unlock_guard: Mutex::new(()),
            teardown: tokio::sync::Mutex::new(()),
            on_terminated: Mutex::new(Some(on_terminated)),
        });

        let host = driver.session.host().to_string();
        driver.ctx.state.set_state(State::LOGGING_IN);
        info!("[{}] Logging into voice server", host);

        match connector.open(&host, driver.session.password()).await {
            Ok(link) => {
                driver.enter_connected(link);
                Ok(driver)
            }
            Err(e) => {
                error!("[{}] Voice server login failed: {}", host, e);
                driver.set_state(DriverState::LoginFailed);
                driver.ctx.state.set_state(State::LOGIN_FAILED);
                Err(e)
            }
        }
    }

    fn enter_connected(self: &Arc<Self>, link: AuthorityLink) {
        let AuthorityLink { outbound, failure } = link;
        if let Ok(mut slot) = self.outbound.lock() {
            *slot = Some(outbound);
        }
        self.set_state(DriverState::Connected);
        self.ctx.state.set_state(State::CONNECTED);

        // verify the login right away
        self.push(VoiceEvent::heartbeat());
        let interval = self.ctx.settings.voice.heartbeat_interval();
        let weak = Arc::downgrade(self);
        let heartbeat = self.ctx.tasks.schedule_repeating(
            interval,
            interval,
            Box::new(move || {
                if let Some(driver) = weak.upgrade() {
                    driver.push(VoiceEvent::heartbeat());
                }
            }),
        );
        if let Ok(mut slot) = self.heartbeat.lock() {
            *slot = Some(heartbeat);
        }

        if self.proximity.is_some() {
            let interval = self.ctx.settings.voice.proximity_interval();
            let weak = Arc::downgrade(self);
            let refresh = self.ctx.tasks.schedule_repeating(
                interval,
                interval,
                Box::new(move || {
                    if let Some(driver) = weak.upgrade() {
                        driver.refresh_proximity();
                    }
                }),
            );
            if let Ok(mut slot) = self.proximity_refresh.lock() {
                *slot = Some(refresh);
            }
        }

        let networking = &self.ctx.networking;
        let weak = Arc::downgrade(self);
        let joined = networking.subscribe_to_connections(Arc::new(move |client| {
            if let Some(driver) = weak.upgrade() {
                driver.handle_client_connection(client);
            }
        }));
        let weak = Arc::downgrade(self);
        let left = networking.subscribe_to_disconnections(Arc::new(move |client| {
            if let Some(driver) = weak.upgrade() {
                driver.push(VoiceEvent::remove_player(client.stream_key()));
            }
        }));
        self.session.track_subscription(joined);
        self.session.track_subscription(left);

        // might be a restart, bring the authority up to date
        for client in networking.clients() {
            let _announce = client.announce_guard();
            // a client removed meanwhile must not be announced after its removal
            if networking.get_client(client.uuid()).is_some() {
                self.handle_client_connection(&client);
            }
        }

        let weak = Arc::downgrade(self);
        self.ctx.tasks.run_async(Box::pin(async move {
            let Ok(cause) = failure.await else {
                return;
            };
            if let Some(driver) = weak.upgrade() {
                warn!("[{}] Voice link lost: {}", driver.session.host(), cause);
                driver.shutdown(ShutdownReason::LinkFailure).await;
            }
        }));

        info!("[{}] Logged into voice server", self.session.host());
    }

    fn handle_client_connection(self: &Arc<Self>, client: &Arc<ClientConnection>) {
        if self.state() != DriverState::Connected {
            return;
        }

        self.push(VoiceEvent::add_player(
            client.name(),
            &client.uuid().to_string(),
            client.stream_key(),
        ));

        if client.is_voice_unlocked() {
            return;
        }
        if !self.session.has_free_slot(self.ctx.networking.registry()) {
            client.player().send_message(SLOTS_FULL_MESSAGE);
            return;
        }

        let driver = Arc::clone(self);
        let client = Arc::clone(client);
        self.ctx.tasks.run_async(Box::pin(async move {
            let request = driver.ctx.bus.publish(ClientRequestVoice::new(client.uuid()));
            if request.is_cancelled() {
                debug!("[{}] Voice request cancelled by a listener", client.uuid());
                return;
            }
            driver.unlock(&client);
        }));
    }

    fn unlock(&self, client: &ClientConnection) {
        let Ok(_guard) = self.unlock_guard.lock() else {
            return;
        };
        if self.state() != DriverState::Connected || client.is_voice_unlocked() {
            return;
        }

        let networking = &self.ctx.networking;
        let uuid = client.uuid();
        if networking.get_client(uuid).is_none() {
            debug!("[{}] Left before voice could be unlocked", uuid);
            return;
        }
        if !self.session.has_free_slot(networking.registry()) {
            client.player().send_message(SLOTS_FULL_MESSAGE);
            return;
        }

        client.set_voice_unlocked(true);
        let packet = Packet::ClientUnlockVoiceChat {
            stream_key: client.stream_key().to_string(),
            host: self.session.host().to_string(),
            block_radius: self.session.block_radius(),
        };
        if let Err(e) = networking.send(uuid, packet) {
            warn!("[{}] Failed to unlock voice chat: {}", uuid, e);
            client.set_voice_unlocked(false);
        }
    }

    /// Tears the session down. Only the first call on a connected driver has
    /// any effect; later calls return once that teardown has finished.
    pub async fn shutdown(&self, reason: ShutdownReason) {
        let _teardown = self.teardown.lock().await;
        {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if *state != DriverState::Connected {
                return;
            }
            *state = DriverState::ShuttingDown;
        }
        info!("[{}] Shutting down voice session ({:?})", self.session.host(), reason);
        self.ctx.state.set_state(State::SHUTTING_DOWN);

        for slot in [&self.heartbeat, &self.proximity_refresh] {
            let task = slot.lock().ok().and_then(|mut slot| slot.take());
            if let Some(task) = task {
                task.cancel();
            }
        }

        let networking = &self.ctx.networking;
        // dropping the sender afterwards closes the link
        let outbound = self.outbound.lock().ok().and_then(|mut slot| slot.take());
        if let Some(outbound) = outbound {
            for client in networking.clients() {
                let _ = outbound.send(VoiceEvent::remove_player(client.stream_key()));
            }
            let _ = outbound.send(VoiceEvent::logout());
        }

        match self.rest.call(RestEndpoint::EndVoiceSession).await {
            Ok(response) => {
                if let Some(e) = response.errors.first() {
                    warn!("Failed to end voice session: {}", e.message);
                }
            }
            Err(e) => warn!("Failed to end voice session: {}", e),
        }

        for id in self.session.take_subscriptions() {
            networking.unsubscribe(id);
        }

        for client in networking.clients() {
            if client.is_voice_unlocked() {
                if let Err(e) = networking.kick(client.uuid(), SESSION_ENDED_REASON) {
                    warn!("[{}] Failed to kick voice client: {}", client.uuid(), e);
                }
            }
        }

        self.set_state(DriverState::Terminated);
        self.ctx.state.set_state(State::IDLE);

        let hook = self.on_terminated.lock().ok().and_then(|mut slot| slot.take());
        if let Some(hook) = hook {
            hook(self, reason);
        }
    }

    /// Publishes voice range entries since the last refresh. Does nothing
    /// without a proximity source or outside a connected session.
    pub fn refresh_proximity(&self) -> usize {
        match &self.proximity {
            Some(tracker) if self.state() == DriverState::Connected => {
                tracker.refresh(&self.ctx.networking, &self.ctx.bus)
            }
            _ => 0,
        }
    }

    fn push(&self, event: VoiceEvent) {
        let Ok(outbound) = self.outbound.lock() else {
            return;
        };
        if let Some(outbound) = outbound.as_ref() {
            if outbound.send(event).is_err() {
                debug!("[{}] Voice link is gone, event dropped", self.session.host());
            }
        }
    }

    fn set_state(&self, new: DriverState) {
        if let Ok(mut state) = self.state.lock() {
            *state = new;
        }
    }

    #[must_use]
    pub fn state(&self) -> DriverState {
        self.state
            .lock()
            .map_or(DriverState::Terminated, |state| *state)
    }

    #[must_use]
    pub fn session(&self) -> &VoiceSession {
        &self.session
    }
}
