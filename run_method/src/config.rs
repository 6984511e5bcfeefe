//! Client settings that can be loaded from JSON.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::ProofCheckPolicy;

/// Settings of an [`ApiClient`](crate::client::ApiClient).
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// How much of each response to verify.
    pub policy: ProofCheckPolicy,
    /// Timeout applied to queries whose context has no deadline.
    pub timeout_ms: Option<u64>,
}

impl ClientConfig {
    /// Parses a config from JSON. Missing fields take their default.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// [`Self::timeout_ms`] as a [`Duration`].
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}
