//! Configuration for the OpenTrade engine and its stores.
//!
//! The tree mirrors the engine's collaborators: chain anchoring, settlement
//! defaults, revocation webhooks, storage backend, access control, rewards.
//! Everything is serde-loadable; hosts merge their partial config over
//! [`EngineConfig::default`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// External ledger parameters used when anchoring is enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Network identifier (e.g. "base", "sepolia").
    pub network: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            network: "base".to_string(),
            rpc_url: None,
        }
    }
}

/// Settlement defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Token the escrow settles in; recorded on settlement records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_address: Option<String>,
}

/// How access withdrawals are delivered to the outside world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationMode {
    /// Revocations succeed locally without any outbound call.
    #[default]
    None,
    /// POST a signed payload to the configured endpoint.
    Webhook,
}

/// Revocation webhook settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevocationConfig {
    pub mode: RevocationMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_secret: Option<String>,
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self {
            mode: RevocationMode::None,
            endpoint: None,
            api_key: None,
            signing_secret: None,
            timeout_ms: 8_000,
            max_attempts: 3,
            retry_delay_ms: 60_000,
        }
    }
}

/// Which persistence backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    File,
    #[default]
    Sqlite,
}

/// Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Root directory for the file backend (and the default db location).
    pub dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
    /// Copy a non-empty file store into a fresh database on first open.
    pub migrate_from_file: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            dir: PathBuf::from("./opentrade-state"),
            db_path: None,
            migrate_from_file: true,
        }
    }
}

/// Access control mode for engine operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// No access checks.
    #[default]
    Open,
    /// Only actors on the allowlist may call write operations.
    Allowlist,
}

/// Access control settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessConfig {
    pub mode: AccessMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_actors: Vec<String>,
    /// Reject write operations without an actor id.
    #[serde(default)]
    pub require_actor: bool,
    /// Enforce that the acting party matches the entity's own party fields.
    #[serde(default)]
    pub require_actor_match: bool,
}

/// Reward grant settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardsConfig {
    pub enabled: bool,
    /// Hex-encoded 32-byte ed25519 seed used to sign issued claims.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_signing_key: Option<String>,
    /// Default claim deadline when the caller does not supply one.
    pub default_deadline_mins: u32,
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            claim_signing_key: None,
            default_deadline_mins: 10,
        }
    }
}

/// Background sweep cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    pub interval_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

/// Root configuration for one engine instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub chain: ChainConfig,
    pub settlement: SettlementConfig,
    pub revocation: RevocationConfig,
    pub store: StoreConfig,
    pub access: AccessConfig,
    pub rewards: RewardsConfig,
    pub poller: PollerConfig,
}
