//! Endpoint identity, status and public attributes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Display name used when an endpoint never set one
pub const ANONYMOUS_DISPLAY_NAME: &str = "Anonymous";

/// Unique identifier of one connected client session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(String);

impl EndpointId {
    /// Generate a fresh random id (UUID v4)
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EndpointId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Matchmaking status of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    /// Connected, not looking for a partner
    #[default]
    Idle,
    /// In the waiting pool
    Searching,
    /// Paired, no handshake traffic yet
    Matched,
    /// Paired and exchanging signaling messages
    Chatting,
}

/// Public attributes attached to an endpoint
///
/// Supplied by the profile collaborator or the client itself; the core treats
/// every field as an opaque string and never validates them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lobby: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub interests: Vec<String>,
}

impl EndpointAttributes {
    /// Overlay search preferences onto these attributes
    ///
    /// Only the fields present in `prefs` are overwritten.
    pub fn apply_preferences(&mut self, prefs: &MatchPreferences) {
        if let Some(lobby) = &prefs.lobby {
            self.lobby = Some(lobby.clone());
        }
        if let Some(country) = &prefs.country {
            self.country = Some(country.clone());
        }
        if let Some(gender) = &prefs.gender {
            self.gender = Some(gender.clone());
        }
        if let Some(interests) = &prefs.interests {
            self.interests = interests.clone();
        }
    }
}

/// Preferences sent with find-partner
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MatchPreferences {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lobby: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interests: Option<Vec<String>>,
}

impl MatchPreferences {
    pub fn in_lobby(lobby: impl Into<String>) -> Self {
        Self {
            lobby: Some(lobby.into()),
            ..Default::default()
        }
    }
}

/// Immutable snapshot of a partner's public attributes, sent with `matched`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerSummary {
    pub id: EndpointId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lobby: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interests: Vec<String>,
}

impl PartnerSummary {
    pub fn snapshot(id: &EndpointId, attributes: &EndpointAttributes) -> Self {
        Self {
            id: id.clone(),
            display_name: attributes
                .display_name
                .clone()
                .unwrap_or_else(|| ANONYMOUS_DISPLAY_NAME.to_string()),
            country: attributes.country.clone(),
            gender: attributes.gender.clone(),
            lobby: attributes.lobby.clone(),
            interests: attributes.interests.clone(),
        }
    }
}
