//! Voice authority session management.

mod driver;
mod link;
mod proximity;
mod session;

pub use driver::{DriverState, TerminationHook, VoiceDriver};
pub use link::{AuthorityConnector, AuthorityLink, TcpAuthorityConnector};
pub use proximity::ProximityTracker;
pub use session::VoiceSession;

use std::sync::{Arc, RwLock, Weak};

use arc_swap::ArcSwapOption;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::account::RestClient;
use crate::context::Context;
use crate::error::ServerError;
use crate::event::{VoiceSessionEnded, VoiceSessionStarted};
use crate::player::ProximitySource;

/// Why a connected voice session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Someone asked for it (reload, account resync, process shutdown).
    Requested,
    /// The link to the authority broke.
    LinkFailure,
}

pub type ShutdownHook = Arc<dyn Fn(ShutdownReason) + Send + Sync>;

/// Owns at most one [`VoiceDriver`] at a time.
pub struct VoiceService {
    ctx: Context,
    connector: Arc<dyn AuthorityConnector>,
    rest: Arc<dyn RestClient>,
    driver: ArcSwapOption<VoiceDriver>,
    // serializes connect and shutdown
    lifecycle: Mutex<()>,
    hooks: RwLock<Vec<ShutdownHook>>,
    proximity: RwLock<Option<Arc<dyn ProximitySource>>>,
    me: Weak<VoiceService>,
}

impl VoiceService {
    #[must_use]
    pub fn new(ctx: Context, connector: Arc<dyn AuthorityConnector>, rest: Arc<dyn RestClient>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            ctx,
            connector,
            rest,
            driver: ArcSwapOption::empty(),
            lifecycle: Mutex::new(()),
            hooks: RwLock::new(Vec::new()),
            proximity: RwLock::new(None),
            me: me.clone(),
        })
    }

    /// Starts a session at `host`, replacing any running one.
    ///
    /// # Errors
    /// Returns the login error; no shutdown hooks fire in that case. Returns
    /// [`ServerError::LinkClosed`] if the link dropped before the session was
    /// installed.
    pub async fn connect(&self, host: &str, password: &str, allowed_slots: usize) -> Result<(), ServerError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.stop_installed().await;

        let session = VoiceSession::new(host, password, allowed_slots, self.ctx.settings.voice.block_radius);
        let me = self.me.clone();
        let on_terminated: TerminationHook = Box::new(move |driver, reason| {
            if let Some(service) = me.upgrade() {
                service.driver_terminated(driver, reason);
            }
        });

        let proximity = self
            .proximity
            .read()
            .ok()
            .and_then(|source| source.clone())
            .map(ProximityTracker::new);
        let driver = VoiceDriver::start(
            self.ctx.clone(),
            session,
            self.connector.as_ref(),
            self.rest.clone(),
            proximity,
            on_terminated,
        )
        .await?;

        self.driver.store(Some(driver.clone()));
        // the link may already have died while we were logging in
        if driver.state() != DriverState::Connected {
            self.uninstall(&driver);
            return Err(ServerError::LinkClosed);
        }
        info!("[{}] Voice session started with {} slots", host, allowed_slots);
        self.ctx.bus.publish(VoiceSessionStarted {
            host: host.to_string(),
        });
        Ok(())
    }

    /// Stops the running session, if any. Waits for a teardown that is
    /// already in progress.
    pub async fn shutdown(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.stop_installed().await;
    }

    async fn stop_installed(&self) {
        let driver = self.driver.load_full();
        if let Some(driver) = driver {
            driver.shutdown(ShutdownReason::Requested).await;
            self.uninstall(&driver);
        }
    }

    /// Clears the slot if it still holds `driver`.
    fn uninstall(&self, driver: &Arc<VoiceDriver>) {
        let current = self.driver.load_full();
        if current.as_ref().is_some_and(|installed| Arc::ptr_eq(installed, driver)) {
            self.driver.compare_and_swap(&current, None);
        }
    }

    fn driver_terminated(&self, driver: &VoiceDriver, reason: ShutdownReason) {
        let current = self.driver.load_full();
        let installed = current
            .as_ref()
            .is_some_and(|installed| std::ptr::eq(Arc::as_ptr(installed), driver));
        if !installed {
            debug!("[{}] Driver that was never installed terminated", driver.session().host());
            return;
        }
        self.driver.compare_and_swap(&current, None);
        self.ctx.bus.publish(VoiceSessionEnded { reason });

        let hooks: Vec<ShutdownHook> = self
            .hooks
            .read()
            .map(|hooks| hooks.clone())
            .unwrap_or_default();
        for hook in hooks {
            hook(reason);
        }
    }

    /// Lets sessions started from now on report voice range changes.
    pub fn set_proximity_source(&self, source: Arc<dyn ProximitySource>) {
        if let Ok(mut slot) = self.proximity.write() {
            *slot = Some(source);
        }
    }

    /// Registers `hook` to run every time a session ends.
    pub fn on_shutdown(&self, hook: ShutdownHook) {
        if let Ok(mut hooks) = self.hooks.write() {
            hooks.push(hook);
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.driver
            .load()
            .as_ref()
            .is_some_and(|driver| driver.state() == DriverState::Connected)
    }

    #[must_use]
    pub fn driver(&self) -> Option<Arc<VoiceDriver>> {
        self.driver.load_full()
    }

    #[must_use]
    pub fn used_slots(&self) -> usize {
        self.ctx.networking.registry().unlocked_count()
    }

    #[must_use]
    pub fn allowed_slots(&self) -> usize {
        self.driver
            .load()
            .as_ref()
            .map_or(0, |driver| driver.session().allowed_slots())
    }
}
