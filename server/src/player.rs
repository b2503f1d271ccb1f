use uuid::Uuid;

/// A player as seen by the host game server.
pub trait PlayerAdapter: Send + Sync {
    fn uuid(&self) -> Uuid;

    fn name(&self) -> &str;

    /// Shows a chat message to the player.
    fn send_message(&self, message: &str);

    /// Tells the host the player's voice connection was dropped, with a
    /// reason it can show or log.
    fn kick(&self, reason: &str);
}

/// Why a listener came into voice range of a speaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProximityCause {
    /// They are close enough to each other.
    Distance,
    /// The speaker's range grew, e.g. by shouting.
    Shout,
}

/// Location queries answered by the host.
pub trait ProximitySource: Send + Sync {
    /// Players that can currently hear `speaker`.
    fn listeners_of(&self, speaker: Uuid) -> Vec<(Uuid, ProximityCause)>;
}
