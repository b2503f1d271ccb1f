//! Line protocol spoken with the voice authority.
//!
//! Every event is a single line: the event type, optionally followed by
//! `~key=value` pairs, e.g. `REMOVE_PLAYER~streamKey=3fa9c1`.

use std::fmt;

use crate::error::ProtocolError;

const ARG_SEPARATOR: char = '~';
const KEY_VALUE_SEPARATOR: char = '=';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoiceEventType {
    Heartbeat,
    AddPlayer,
    RemovePlayer,
    Logout,
}

impl VoiceEventType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Heartbeat => "HEARTBEAT",
            Self::AddPlayer => "ADD_PLAYER",
            Self::RemovePlayer => "REMOVE_PLAYER",
            Self::Logout => "LOGOUT",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        match name {
            "HEARTBEAT" => Some(Self::Heartbeat),
            "ADD_PLAYER" => Some(Self::AddPlayer),
            "REMOVE_PLAYER" => Some(Self::RemovePlayer),
            "LOGOUT" => Some(Self::Logout),
            _ => None,
        }
    }
}

/// A single control event with its arguments in insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceEvent {
    pub kind: VoiceEventType,
    pub args: Vec<(String, String)>,
}

impl VoiceEvent {
    #[must_use]
    pub fn new(kind: VoiceEventType) -> Self {
        Self { kind, args: Vec::new() }
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn heartbeat() -> Self {
        Self::new(VoiceEventType::Heartbeat)
    }

    #[must_use]
    pub fn add_player(player_name: &str, player_uuid: &str, stream_key: &str) -> Self {
        Self::new(VoiceEventType::AddPlayer)
            .with("playerName", player_name)
            .with("playerUuid", player_uuid)
            .with("streamKey", stream_key)
    }

    #[must_use]
    pub fn remove_player(stream_key: &str) -> Self {
        Self::new(VoiceEventType::RemovePlayer).with("streamKey", stream_key)
    }

    #[must_use]
    pub fn logout() -> Self {
        Self::new(VoiceEventType::Logout)
    }

    /// First value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Parses one event line (without the trailing newline).
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidVoiceEvent`] for unknown event types or
    /// arguments missing a `=`.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let invalid = || ProtocolError::InvalidVoiceEvent(line.to_string());
        let mut parts = line.trim_end_matches(['\r', '\n']).split(ARG_SEPARATOR);

        let kind = parts
            .next()
            .and_then(VoiceEventType::parse)
            .ok_or_else(invalid)?;

        let mut event = Self::new(kind);
        for part in parts {
            let (key, value) = part.split_once(KEY_VALUE_SEPARATOR).ok_or_else(invalid)?;
            event.args.push((key.to_string(), value.to_string()));
        }
        Ok(event)
    }
}

impl fmt::Display for VoiceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.as_str())?;
        for (key, value) in &self.args {
            write!(f, "{}{}{}{}", ARG_SEPARATOR, key, KEY_VALUE_SEPARATOR, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_player_line_format() {
        let event = VoiceEvent::add_player(
            "Alice",
            "5f1e4b3a-8c2d-4e7f-9a6b-1c2d3e4f5a6b",
            "k3y",
        );
        assert_eq!(
            event.to_string(),
            "ADD_PLAYER~playerName=Alice~playerUuid=5f1e4b3a-8c2d-4e7f-9a6b-1c2d3e4f5a6b~streamKey=k3y"
        );
    }

    #[test]
    fn bare_events_have_no_separator() {
        assert_eq!(VoiceEvent::heartbeat().to_string(), "HEARTBEAT");
        assert_eq!(VoiceEvent::logout().to_string(), "LOGOUT");
    }

    #[test]
    fn parse_reads_arguments_back() {
        let event = VoiceEvent::parse("REMOVE_PLAYER~streamKey=abc=def\n").expect("parse");
        assert_eq!(event.kind, VoiceEventType::RemovePlayer);
        assert_eq!(event.get("streamKey"), Some("abc=def"));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(VoiceEvent::parse("JUMP").is_err());
        assert!(VoiceEvent::parse("ADD_PLAYER~playerName").is_err());
    }
}
