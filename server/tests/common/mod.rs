#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::oneshot;
use uuid::Uuid;
use voicelink_protocol::{Packet, VoiceEvent};
use voicelink_server::account::{AccountService, RestClient, RestEndpoint, RestResponse};
use voicelink_server::config::Settings;
use voicelink_server::context::Context;
use voicelink_server::error::ServerError;
use voicelink_server::networking::ChannelClientSink;
use voicelink_server::player::{PlayerAdapter, ProximityCause, ProximitySource};
use voicelink_server::scheduler::TokioTaskProvider;
use voicelink_server::voice::{AuthorityConnector, AuthorityLink, VoiceService};

pub const VOICE_HOST: &str = "voice-1.example.net:7000";
pub const VOICE_PASSWORD: &str = "hunter2";

/// REST authority answering from per-endpoint scripts.
#[derive(Default)]
pub struct ScriptedRest {
    queued: Mutex<HashMap<RestEndpoint, VecDeque<RestResponse>>>,
    fallback: Mutex<HashMap<RestEndpoint, RestResponse>>,
    calls: Mutex<Vec<RestEndpoint>>,
    latency: Mutex<HashMap<RestEndpoint, Duration>>,
}

impl ScriptedRest {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answers the next call to `endpoint` with `response`.
    pub fn then(&self, endpoint: RestEndpoint, response: RestResponse) {
        self.queued
            .lock()
            .unwrap()
            .entry(endpoint)
            .or_default()
            .push_back(response);
    }

    /// Answer once the queue for `endpoint` is empty.
    pub fn always(&self, endpoint: RestEndpoint, response: RestResponse) {
        self.fallback.lock().unwrap().insert(endpoint, response);
    }

    /// Makes every call to `endpoint` take `latency` before answering.
    pub fn slow(&self, endpoint: RestEndpoint, latency: Duration) {
        self.latency.lock().unwrap().insert(endpoint, latency);
    }

    pub fn calls(&self) -> Vec<RestEndpoint> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, endpoint: RestEndpoint) -> usize {
        self.calls().iter().filter(|e| **e == endpoint).count()
    }
}

#[async_trait]
impl RestClient for ScriptedRest {
    async fn call(&self, endpoint: RestEndpoint) -> Result<RestResponse, ServerError> {
        self.calls.lock().unwrap().push(endpoint);
        let latency = self.latency.lock().unwrap().get(&endpoint).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let queued = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&endpoint)
            .and_then(VecDeque::pop_front);
        if let Some(response) = queued {
            return Ok(response);
        }
        let fallback = self.fallback.lock().unwrap().get(&endpoint).cloned();
        Ok(fallback.unwrap_or_else(|| RestResponse::ok(Value::Null)))
    }
}

/// One accepted login, as seen from the authority side.
pub struct AuthoritySession {
    pub events: UnboundedReceiver<VoiceEvent>,
    fail: Option<oneshot::Sender<ServerError>>,
}

impl AuthoritySession {
    /// Reports the link as broken to the driver.
    pub fn break_link(&mut self, cause: ServerError) {
        if let Some(fail) = self.fail.take() {
            let _ = fail.send(cause);
        }
    }
}

/// In-memory voice authority.
#[derive(Default)]
pub struct FakeAuthority {
    reject: Mutex<bool>,
    logins: Mutex<Vec<(String, String)>>,
    sessions: Mutex<VecDeque<AuthoritySession>>,
}

impl FakeAuthority {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reject_logins(&self, reject: bool) {
        *self.reject.lock().unwrap() = reject;
    }

    pub fn logins(&self) -> Vec<(String, String)> {
        self.logins.lock().unwrap().clone()
    }

    pub fn take_session(&self) -> AuthoritySession {
        self.sessions
            .lock()
            .unwrap()
            .pop_front()
            .expect("no session was opened")
    }
}

#[async_trait]
impl AuthorityConnector for FakeAuthority {
    async fn open(&self, host: &str, password: &str) -> Result<AuthorityLink, ServerError> {
        self.logins
            .lock()
            .unwrap()
            .push((host.to_string(), password.to_string()));
        if *self.reject.lock().unwrap() {
            return Err(ServerError::LoginRejected("bad password".to_string()));
        }

        let (outbound, events) = mpsc::unbounded_channel();
        let (fail, failure) = oneshot::channel();
        self.sessions
            .lock()
            .unwrap()
            .push_back(AuthoritySession { events, fail: Some(fail) });
        Ok(AuthorityLink { outbound, failure })
    }
}

pub struct TestPlayer {
    uuid: Uuid,
    name: String,
    pub messages: Mutex<Vec<String>>,
    pub kicks: Mutex<Vec<String>>,
}

impl TestPlayer {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            uuid: Uuid::new_v4(),
            name: name.to_string(),
            messages: Mutex::new(Vec::new()),
            kicks: Mutex::new(Vec::new()),
        })
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn kicks(&self) -> Vec<String> {
        self.kicks.lock().unwrap().clone()
    }
}

impl PlayerAdapter for TestPlayer {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn send_message(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }

    fn kick(&self, reason: &str) {
        self.kicks.lock().unwrap().push(reason.to_string());
    }
}

/// Host ranges set by hand: speaker to the listeners that hear them.
#[derive(Default)]
pub struct FixedRanges {
    ranges: Mutex<HashMap<Uuid, Vec<(Uuid, ProximityCause)>>>,
}

impl FixedRanges {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn hears(&self, speaker: Uuid, listener: Uuid, cause: ProximityCause) {
        self.ranges
            .lock()
            .unwrap()
            .entry(speaker)
            .or_default()
            .push((listener, cause));
    }

    pub fn clear(&self) {
        self.ranges.lock().unwrap().clear();
    }
}

impl ProximitySource for FixedRanges {
    fn listeners_of(&self, speaker: Uuid) -> Vec<(Uuid, ProximityCause)> {
        self.ranges.lock().unwrap().get(&speaker).cloned().unwrap_or_default()
    }
}

pub fn account_json(voice_slots: Option<usize>, claimed: bool, banned: bool) -> RestResponse {
    let addons = match voice_slots {
        Some(limit) => json!([{ "category": "VOICE", "limit": limit }]),
        None => json!([]),
    };
    RestResponse::ok(json!({
        "settings": { "clientUrl": "https://client.example.net/", "banned": banned },
        "claimed": claimed,
        "addons": addons,
    }))
}

pub fn grant() -> RestResponse {
    RestResponse::ok(json!({ "server": VOICE_HOST, "password": VOICE_PASSWORD }))
}

pub struct Harness {
    pub ctx: Context,
    pub rest: Arc<ScriptedRest>,
    pub authority: Arc<FakeAuthority>,
    pub voice: Arc<VoiceService>,
    pub accounts: Arc<AccountService>,
    pub delivered: UnboundedReceiver<(Uuid, Packet)>,
}

impl Harness {
    pub fn new(settings: Settings) -> Self {
        let (sink, delivered) = ChannelClientSink::new();
        let ctx = Context::direct(settings, Arc::new(TokioTaskProvider::current()), Arc::new(sink));
        let rest = ScriptedRest::new();
        let authority = FakeAuthority::new();
        let voice = VoiceService::new(ctx.clone(), authority.clone(), rest.clone());
        let accounts = AccountService::new(ctx.clone(), rest.clone(), voice.clone());
        Self {
            ctx,
            rest,
            authority,
            voice,
            accounts,
            delivered,
        }
    }

    /// Standalone settings with an account that has `slots` voice slots.
    pub fn with_voice(slots: usize) -> Self {
        let harness = Self::new(Settings::default());
        harness.rest.always(RestEndpoint::GetAccountState, account_json(Some(slots), true, false));
        harness.rest.always(RestEndpoint::StartVoiceSession, grant());
        harness
    }

    /// Every packet delivered to clients so far.
    pub fn drain_delivered(&mut self) -> Vec<(Uuid, Packet)> {
        let mut packets = Vec::new();
        while let Ok(packet) = self.delivered.try_recv() {
            packets.push(packet);
        }
        packets
    }
}

pub fn drain_events(session: &mut AuthoritySession) -> Vec<VoiceEvent> {
    let mut events = Vec::new();
    while let Ok(event) = session.events.try_recv() {
        events.push(event);
    }
    events
}
