use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Discord snowflake ID. Sent over the wire as a decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Snowflake(pub u64);

impl FromStr for Snowflake {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Snowflake)
    }
}

impl TryFrom<String> for Snowflake {
    type Error = std::num::ParseIntError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Snowflake> for String {
    fn from(id: Snowflake) -> Self {
        id.0.to_string()
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Presence value as reported by the platform.
///
/// Anything the gateway sends that we don't recognise lands in `Other`
/// instead of failing the whole payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawStatus {
    Online,
    Idle,
    Dnd,
    Offline,
    Invisible,
    #[serde(other)]
    Other,
}

/// Canonical presence state shown on the badge.
///
/// `Offline` doubles as "unknown": a user we have never observed and a user
/// confirmed offline look the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PresenceState {
    Online,
    Idle,
    DoNotDisturb,
    #[default]
    Offline,
}

impl PresenceState {
    pub fn message(self) -> &'static str {
        match self {
            Self::Online => "Online",
            Self::Idle => "Idle",
            Self::DoNotDisturb => "Do Not Disturb",
            Self::Offline => "Offline",
        }
    }

    pub fn color(self) -> BadgeColor {
        match self {
            Self::Online => BadgeColor::BrightGreen,
            Self::Idle => BadgeColor::Yellow,
            Self::DoNotDisturb => BadgeColor::Red,
            Self::Offline => BadgeColor::Gray,
        }
    }

    fn from_message(message: &str) -> Option<Self> {
        [Self::Online, Self::Idle, Self::DoNotDisturb, Self::Offline]
            .into_iter()
            .find(|state| state.message() == message)
    }
}

impl From<RawStatus> for PresenceState {
    fn from(raw: RawStatus) -> Self {
        match raw {
            RawStatus::Online => Self::Online,
            RawStatus::Idle => Self::Idle,
            RawStatus::Dnd => Self::DoNotDisturb,
            RawStatus::Offline | RawStatus::Invisible | RawStatus::Other => Self::Offline,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BadgeColor {
    BrightGreen,
    Yellow,
    Red,
    Gray,
}

impl BadgeColor {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BrightGreen => "brightgreen",
            Self::Yellow => "yellow",
            Self::Red => "red",
            Self::Gray => "gray",
        }
    }
}

/// The single persisted status record.
///
/// Color is never stored independently of the state: the only constructor
/// derives it, and deserialization rejects a record where the two disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "StoredRecord", into = "StoredRecord")]
pub struct StatusRecord {
    state: PresenceState,
}

impl StatusRecord {
    pub fn new(state: PresenceState) -> Self {
        Self { state }
    }

    /// Apply the mapping rule to a raw platform observation.
    pub fn from_raw(raw: RawStatus) -> Self {
        Self::new(raw.into())
    }

    pub fn state(&self) -> PresenceState {
        self.state
    }

    pub fn color(&self) -> BadgeColor {
        self.state.color()
    }

    pub fn message(&self) -> &'static str {
        self.state.message()
    }
}

/// On-disk shape: `{"status": "Do Not Disturb", "color": "red"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    status: String,
    color: BadgeColor,
}

impl From<StatusRecord> for StoredRecord {
    fn from(record: StatusRecord) -> Self {
        Self {
            status: record.message().to_string(),
            color: record.color(),
        }
    }
}

impl TryFrom<StoredRecord> for StatusRecord {
    type Error = String;

    fn try_from(stored: StoredRecord) -> Result<Self, Self::Error> {
        let state = PresenceState::from_message(&stored.status)
            .ok_or_else(|| format!("unknown status '{}'", stored.status))?;
        if state.color() != stored.color {
            return Err(format!(
                "color '{}' does not match status '{}'",
                stored.color.as_str(),
                stored.status
            ));
        }
        Ok(Self { state })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_rule_covers_known_values() {
        let cases = [
            (RawStatus::Online, PresenceState::Online, BadgeColor::BrightGreen),
            (RawStatus::Idle, PresenceState::Idle, BadgeColor::Yellow),
            (RawStatus::Dnd, PresenceState::DoNotDisturb, BadgeColor::Red),
            (RawStatus::Offline, PresenceState::Offline, BadgeColor::Gray),
        ];
        for (raw, state, color) in cases {
            let record = StatusRecord::from_raw(raw);
            assert_eq!(record.state(), state);
            assert_eq!(record.color(), color);
        }
    }

    #[test]
    fn unrecognised_values_map_to_offline() {
        let raw: RawStatus = serde_json::from_str("\"streaming\"").unwrap();
        assert_eq!(raw, RawStatus::Other);
        assert_eq!(StatusRecord::from_raw(raw).color(), BadgeColor::Gray);
        assert_eq!(
            StatusRecord::from_raw(RawStatus::Invisible).state(),
            PresenceState::Offline
        );
    }

    #[test]
    fn default_record_is_offline_gray() {
        let record = StatusRecord::default();
        assert_eq!(record.message(), "Offline");
        assert_eq!(record.color().as_str(), "gray");
    }

    #[test]
    fn stored_shape() {
        let record = StatusRecord::new(PresenceState::DoNotDisturb);
        let json = serde_json::to_value(record).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "Do Not Disturb", "color": "red" }));

        let back: StatusRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn mismatched_color_is_rejected() {
        let result = serde_json::from_str::<StatusRecord>(r#"{"status":"Online","color":"gray"}"#);
        assert!(result.is_err());

        let result = serde_json::from_str::<StatusRecord>(r#"{"status":"Away","color":"gray"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn snowflake_parses_from_string() {
        let id: Snowflake = serde_json::from_str("\"80351110224678912\"").unwrap();
        assert_eq!(id, Snowflake(80351110224678912));
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"80351110224678912\"");
        assert!(serde_json::from_str::<Snowflake>("\"abc\"").is_err());
    }
}
