//! Account synchronisation with the remote authority, and the voice session
//! handshake that hangs off it.

mod model;
mod rest;

pub use model::{AccountState, Addon, AddonCategory, ClientSettings, Tag, VoiceSessionGrant};
pub use rest::{ErrorCode, HttpRestClient, RestClient, RestEndpoint, RestError, RestResponse};

use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use tracing::{debug, error, info, warn};

use crate::config::Role;
use crate::context::Context;
use crate::error::ServerError;
use crate::event::{AccountAddTag, AccountRemoveTag};
use crate::scheduler::{BoxFuture, TaskHandle};
use crate::voice::{ShutdownReason, VoiceService};

/// What to do with the answer to a voice session request.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Handshake {
    Granted(VoiceSessionGrant),
    /// End whatever the authority still holds and try again later.
    Transient(String),
    /// The account may not use voice chat.
    Denied,
    Failed(String),
}

fn classify(response: &RestResponse) -> Handshake {
    if let Some(error) = response.first_error() {
        return match error.code {
            ErrorCode::NoRtc => Handshake::Transient("no voice server can take this session".to_string()),
            ErrorCode::AlreadyActive => Handshake::Transient("a previous voice session is still active".to_string()),
            ErrorCode::NoPermissions => Handshake::Denied,
            ErrorCode::Unknown if error.message.to_lowercase().contains("path $") => {
                Handshake::Transient(format!("malformed session claim: {}", error.message))
            }
            ErrorCode::Unknown => Handshake::Failed(error.message.clone()),
        };
    }

    match response.decode::<VoiceSessionGrant>() {
        Ok(grant) => Handshake::Granted(grant),
        Err(e) => Handshake::Transient(format!("malformed session grant: {}", e)),
    }
}

fn handshake_task(service: Arc<AccountService>) -> BoxFuture {
    Box::pin(async move { service.start_voice_handshake().await })
}

fn initialize_task(service: Arc<AccountService>) -> BoxFuture {
    Box::pin(async move { service.initialize().await })
}

fn reconcile_task(service: Arc<AccountService>) -> BoxFuture {
    Box::pin(async move {
        if let Err(e) = service.reconcile().await {
            warn!("Periodic account sync failed: {}", e);
        }
    })
}

/// Keeps the local view of the account in line with the authority and runs
/// the voice session when the account has voice chat.
pub struct AccountService {
    ctx: Context,
    rest: Arc<dyn RestClient>,
    voice: Arc<VoiceService>,
    account: ArcSwap<AccountState>,
    tags: Mutex<HashSet<Tag>>,
    pending_handshake: Mutex<Option<TaskHandle>>,
    synchronizer: Mutex<Option<TaskHandle>>,
    me: Weak<AccountService>,
}

impl AccountService {
    #[must_use]
    pub fn new(ctx: Context, rest: Arc<dyn RestClient>, voice: Arc<VoiceService>) -> Arc<Self> {
        let service = Arc::new_cyclic(|me| Self {
            ctx,
            rest,
            voice,
            account: ArcSwap::from_pointee(AccountState::default()),
            tags: Mutex::new(HashSet::new()),
            pending_handshake: Mutex::new(None),
            synchronizer: Mutex::new(None),
            me: me.clone(),
        });

        let me = service.me.clone();
        service.voice.on_shutdown(Arc::new(move |reason| {
            if let Some(service) = me.upgrade() {
                service.voice_stopped(reason);
            }
        }));
        service
    }

    fn is_node(&self) -> bool {
        self.ctx.settings.role == Role::Node
    }

    /// Boots the account. Fresh accounts get a grace period so remote
    /// provisioning can settle first.
    pub async fn start(&self) {
        if self.is_node() {
            debug!("Node role, account work is done by the proxy");
            return;
        }

        if self.ctx.settings.account.is_new_account {
            let delay = self.ctx.settings.voice.fresh_account_delay();
            info!("Delaying account initialization by {:?} for a fresh installation", delay);
            if let Some(me) = self.me.upgrade() {
                self.ctx.tasks.schedule_delayed(delay, initialize_task(me));
            }
        } else {
            self.initialize().await;
        }
    }

    pub async fn initialize(&self) {
        info!("Initializing account details");
        if let Err(e) = self.sync_account().await {
            error!("Failed to sync account: {}", e);
        }
        self.start_synchronizer();
    }

    /// Re-fetches the account every `account.sync_interval_secs` until shutdown.
    fn start_synchronizer(&self) {
        if self.is_node() {
            return;
        }
        let Ok(mut slot) = self.synchronizer.lock() else {
            return;
        };
        if slot.as_ref().is_some_and(|handle| !handle.is_cancelled()) {
            return;
        }

        let interval = self.ctx.settings.account.sync_interval();
        let me = self.me.clone();
        let tasks = self.ctx.tasks.clone();
        *slot = Some(self.ctx.tasks.schedule_repeating(
            interval,
            interval,
            Box::new(move || {
                if let Some(service) = me.upgrade() {
                    tasks.run_async(reconcile_task(service));
                }
            }),
        ));
    }

    /// Stops voice, refetches the account, re-derives tags and restarts voice
    /// when the account has the voice add-on.
    ///
    /// # Errors
    /// Returns the REST or decoding error; tags and account stay untouched then.
    pub async fn sync_account(&self) -> Result<(), ServerError> {
        if self.is_node() {
            return Ok(());
        }

        self.cancel_pending_handshake();
        self.voice.shutdown().await;
        // a teardown that was already running may have scheduled a restart
        self.cancel_pending_handshake();

        let state = self.fetch_account().await?;
        let has_voice = state.has_addon(AddonCategory::Voice);
        self.apply_account(state);
        info!("Account synced (voice chat: {})", has_voice);

        if has_voice {
            self.start_voice_handshake().await;
        }
        Ok(())
    }

    /// Refreshes the snapshot and tags without touching a healthy session.
    /// Voice is only stopped or restarted when the voice add-on itself changed.
    ///
    /// # Errors
    /// Returns the REST or decoding error; tags and account stay untouched then.
    pub async fn reconcile(&self) -> Result<(), ServerError> {
        if self.is_node() {
            return Ok(());
        }

        let state = self.fetch_account().await?;
        let before = self.account().addon(AddonCategory::Voice).cloned();
        let after = state.addon(AddonCategory::Voice).cloned();
        self.apply_account(state);

        if before == after {
            debug!("Account unchanged");
            return Ok(());
        }
        match after {
            Some(addon) => {
                info!("Voice add-on changed ({} slots), restarting voice chat", addon.limit);
                self.cancel_pending_handshake();
                self.start_voice_handshake().await;
            }
            None => {
                info!("Voice add-on removed, stopping voice chat");
                self.cancel_pending_handshake();
                self.voice.shutdown().await;
                self.remove_tag(Tag::Voicechat);
            }
        }
        Ok(())
    }

    async fn fetch_account(&self) -> Result<AccountState, ServerError> {
        let response = self.rest.call(RestEndpoint::GetAccountState).await?;
        if let Some(e) = response.first_error() {
            return Err(ServerError::Remote(format!("{:?}: {}", e.code, e.message)));
        }
        response.decode()
    }

    /// Stores `state` and converges the derived tags on it.
    fn apply_account(&self, state: AccountState) {
        let mut derived = HashSet::new();
        if state.settings.banned {
            derived.insert(Tag::Banned);
        }
        if state.claimed {
            derived.insert(Tag::Claimed);
        }

        let (removed, added) = match self.tags.lock() {
            Ok(mut tags) => {
                let removed: Vec<Tag> = tags
                    .difference(&derived)
                    .filter(|tag| **tag != Tag::Voicechat)
                    .copied()
                    .collect();
                let added: Vec<Tag> = derived.difference(&tags).copied().collect();
                for tag in &removed {
                    tags.remove(tag);
                }
                tags.extend(added.iter().copied());
                (removed, added)
            }
            Err(_) => (Vec::new(), Vec::new()),
        };
        for tag in removed {
            self.ctx.bus.publish(AccountRemoveTag { tag });
        }
        for tag in added {
            self.ctx.bus.publish(AccountAddTag { tag });
        }

        self.account.store(Arc::new(state));
    }

    /// Requests a voice session and connects to the granted voice server.
    pub async fn start_voice_handshake(&self) {
        if self.is_node() {
            return;
        }
        info!("Voice chat is enabled for this account, requesting a session");

        let response = match self.rest.call(RestEndpoint::StartVoiceSession).await {
            Ok(response) => response,
            Err(e) => {
                error!("Failed to request a voice session: {}", e);
                return;
            }
        };

        match classify(&response) {
            Handshake::Granted(grant) => {
                let slots = self
                    .account()
                    .addon(AddonCategory::Voice)
                    .map_or(0, |addon| addon.limit);
                match self.voice.connect(&grant.server, &grant.password, slots).await {
                    Ok(()) => {
                        self.cancel_pending_handshake();
                        self.add_tag(Tag::Voicechat);
                    }
                    Err(e) => {
                        let delay = self.ctx.settings.voice.restart_delay();
                        warn!("Failed to log into the voice server ({}), retrying in {:?}", e, delay);
                        self.remove_tag(Tag::Voicechat);
                        self.schedule_handshake(delay);
                    }
                }
            }
            Handshake::Transient(reason) => {
                self.end_remote_session().await;
                let delay = self.ctx.settings.voice.handshake_retry_delay();
                warn!("Could not start voice chat: {}. Trying again in {:?}", reason, delay);
                self.schedule_handshake(delay);
            }
            Handshake::Denied => {
                warn!("This account has no permission for voice chat, not retrying");
                self.remove_tag(Tag::Voicechat);
            }
            Handshake::Failed(message) => {
                error!("Failed to initialize voice chat: {}", message);
            }
        }
    }

    /// Stops voice and any pending handshake.
    pub async fn shutdown(&self) {
        if self.is_node() {
            return;
        }
        let synchronizer = self.synchronizer.lock().ok().and_then(|mut slot| slot.take());
        if let Some(synchronizer) = synchronizer {
            synchronizer.cancel();
        }
        self.cancel_pending_handshake();
        self.voice.shutdown().await;
    }

    fn voice_stopped(&self, reason: ShutdownReason) {
        self.remove_tag(Tag::Voicechat);
        if reason == ShutdownReason::LinkFailure {
            let delay = self.ctx.settings.voice.restart_delay();
            warn!("Voice chat had to shut down, restarting in {:?}", delay);
            self.schedule_handshake(delay);
        }
    }

    async fn end_remote_session(&self) {
        match self.rest.call(RestEndpoint::EndVoiceSession).await {
            Ok(response) => {
                if let Some(e) = response.first_error() {
                    debug!("End voice session answered {:?}: {}", e.code, e.message);
                }
            }
            Err(e) => warn!("Failed to end voice session: {}", e),
        }
    }

    fn schedule_handshake(&self, delay: Duration) {
        let Some(me) = self.me.upgrade() else {
            return;
        };
        let handle = self.ctx.tasks.schedule_delayed(delay, handshake_task(me));
        let previous = self
            .pending_handshake
            .lock()
            .ok()
            .and_then(|mut slot| slot.replace(handle));
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    fn cancel_pending_handshake(&self) {
        let pending = self.pending_handshake.lock().ok().and_then(|mut slot| slot.take());
        if let Some(pending) = pending {
            pending.cancel();
        }
    }

    fn add_tag(&self, tag: Tag) {
        let inserted = self.tags.lock().is_ok_and(|mut tags| tags.insert(tag));
        if inserted {
            self.ctx.bus.publish(AccountAddTag { tag });
        }
    }

    fn remove_tag(&self, tag: Tag) {
        let removed = self.tags.lock().is_ok_and(|mut tags| tags.remove(&tag));
        if removed {
            self.ctx.bus.publish(AccountRemoveTag { tag });
        }
    }

    #[must_use]
    pub fn has_tag(&self, tag: Tag) -> bool {
        self.tags.lock().is_ok_and(|tags| tags.contains(&tag))
    }

    #[must_use]
    pub fn tags(&self) -> HashSet<Tag> {
        self.tags.lock().map(|tags| tags.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn account(&self) -> Arc<AccountState> {
        self.account.load_full()
    }

    /// Base URL of the web client, as configured on the account.
    #[must_use]
    pub fn base_url(&self) -> String {
        self.account.load().settings.client_url.clone()
    }

    #[must_use]
    pub fn voice(&self) -> &Arc<VoiceService> {
        &self.voice
    }
}
