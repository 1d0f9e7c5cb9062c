//! 🎬 *[two HTTP backends walk into a struct. both want timeouts. they agree to share.]*
//!
//! 📦 **Common Backend Configs**: the shared knobs of every HTTP-speaking store.
//!
//! 🧠 Knowledge graph:
//! - Embedded (flattened) in `FirestoreSourceConfig` and `GatewayTargetConfig`.
//! - Feeds `build_http_client`, which both backends call in their constructors.
//! - Per-request timeouts live here; the retry executor decides what happens after one
//!   fires. There is no whole-collection timeout, on purpose: a migration takes as long as
//!   it takes.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CommonHttpConfig {
    /// 🔌 How long to wait for a TCP/TLS handshake.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// ⏱️ How long one request may take end to end. Bulk writes are chunky; be generous.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

// -- 30s, because a 100-document bulk upsert against a throttled store is not instant
fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for CommonHttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// 🔧 One `reqwest::Client` per backend, reused for every request (connection pooling is
/// the whole point of a client).
pub(crate) fn build_http_client(config: &CommonHttpConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
        .context("💀 The HTTP client refused to be born. Probably a TLS backend problem on this machine. Either way, no store can be reached without it.")
}
