use serde::{Deserialize, Serialize};

/// Snapshot of the account as the authority sees it. Replaced wholesale on every sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountState {
    pub settings: ClientSettings,
    pub claimed: bool,
    pub addons: Vec<Addon>,
}

impl AccountState {
    #[must_use]
    pub fn addon(&self, category: AddonCategory) -> Option<&Addon> {
        self.addons.iter().find(|addon| addon.category == category)
    }

    #[must_use]
    pub fn has_addon(&self, category: AddonCategory) -> bool {
        self.addon(category).is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    pub client_url: String,
    pub banned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Addon {
    pub category: AddonCategory,
    /// Capacity granted by the add-on, e.g. voice slots.
    #[serde(default)]
    pub limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AddonCategory {
    Voice,
    #[serde(other)]
    Unknown,
}

/// Derived account flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Banned,
    Claimed,
    /// A voice session is live. Tracks handshakes rather than the snapshot.
    Voicechat,
}

/// Payload of a successful voice session request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VoiceSessionGrant {
    pub server: String,
    pub password: String,
}
