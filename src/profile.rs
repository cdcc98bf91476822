//! Kind-0 profile metadata and its recovering parser.

use nostr_core::encode_npub;
use nostr_sdk::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Kind-0 profile content. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nip05: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lud16: Option<String>,
}

impl Profile {
    /// Parse profile JSON, substituting an empty profile when it is malformed.
    pub fn parse(content: &str) -> Self {
        match serde_json::from_str(content) {
            Ok(profile) => profile,
            Err(e) => {
                warn!("Bad profile json: {e}");
                Self::default()
            }
        }
    }

    /// `display_name`, falling back to `name`. Empty strings count as missing.
    pub fn display(&self) -> Option<&str> {
        non_empty(&self.display_name).or_else(|| non_empty(&self.name))
    }
}

pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// A metadata event with its parsed profile.
#[derive(Debug, Clone)]
pub struct ProfileEvent {
    pub event: Event,
    pub profile: Profile,
    pub npub: String,
}

impl ProfileEvent {
    pub fn from_event(event: Event) -> Self {
        let profile = Profile::parse(&event.content);
        let npub = encode_npub(&event.pubkey).unwrap_or_else(|_| event.pubkey.to_hex());
        Self {
            event,
            profile,
            npub,
        }
    }

    pub fn pubkey(&self) -> PublicKey {
        self.event.pubkey
    }
}
