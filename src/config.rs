// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is read from the environment once at startup and injected
//! into the constructed components. Nothing reads the environment after that.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `VAULT_ADDR` | Vault server address | `http://127.0.0.1:8200` |
//! | `VAULT_TOKEN` | Vault token | Required |
//! | `VAULT_TRANSIT_MOUNT` | Transit mount path | `cdms-kms` |
//! | `VAULT_KEK_NAME` | Master KEK name | `master-kek` |
//! | `VAULT_KEK_ROTATE_PERIOD` | KEK auto-rotation period | `2160h` |
//! | `STORAGE_BACKEND` | `local` or `s3` | `local` |
//! | `FILES_PATH` | Local blob directory | `./files` |
//! | `S3_ENDPOINT` | S3-compatible endpoint | Required for `s3` |
//! | `S3_REGION` | Signing region | `us-east-1` |
//! | `S3_BUCKET` | Bucket name | `cdms-files` |
//! | `S3_ACCESS_KEY` | Access key id | Required for `s3` |
//! | `S3_SECRET_KEY` | Secret access key | Required for `s3` |
//! | `DATA_DIR` | Upload journal and audit log root | `./data` |
//! | `ORG_REGISTRY_PATH` | Organisation registry JSON file | built-in two-org network |
//! | `STAGE_TIMEOUT_SECS` | Deadline for each external call | `30` |
//! | `ORPHAN_TTL_SECS` | Age before a provisional upload is reaped | `900` |
//! | `REAPER_INTERVAL_SECS` | Orphan reaper sweep interval | `60` |
//! | `REWRAP_ON_START` | Run a rewrap sweep at startup | `false` |
//! | `SWEEP_ORG` / `SWEEP_ACTOR` | Identity used by background ledger calls | `A` / `admin` |
//! | `LOG_FORMAT` | `json` or `pretty` | `pretty` |
//! | `RUST_LOG` | Log filter | `info` |

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const VAULT_ADDR_ENV: &str = "VAULT_ADDR";
pub const VAULT_TOKEN_ENV: &str = "VAULT_TOKEN";
pub const VAULT_TRANSIT_MOUNT_ENV: &str = "VAULT_TRANSIT_MOUNT";
pub const VAULT_KEK_NAME_ENV: &str = "VAULT_KEK_NAME";
pub const VAULT_KEK_ROTATE_PERIOD_ENV: &str = "VAULT_KEK_ROTATE_PERIOD";
pub const STORAGE_BACKEND_ENV: &str = "STORAGE_BACKEND";
pub const FILES_PATH_ENV: &str = "FILES_PATH";
pub const S3_ENDPOINT_ENV: &str = "S3_ENDPOINT";
pub const S3_REGION_ENV: &str = "S3_REGION";
pub const S3_BUCKET_ENV: &str = "S3_BUCKET";
pub const S3_ACCESS_KEY_ENV: &str = "S3_ACCESS_KEY";
pub const S3_SECRET_KEY_ENV: &str = "S3_SECRET_KEY";
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const ORG_REGISTRY_PATH_ENV: &str = "ORG_REGISTRY_PATH";
pub const STAGE_TIMEOUT_SECS_ENV: &str = "STAGE_TIMEOUT_SECS";
pub const ORPHAN_TTL_SECS_ENV: &str = "ORPHAN_TTL_SECS";
pub const REAPER_INTERVAL_SECS_ENV: &str = "REAPER_INTERVAL_SECS";
pub const REWRAP_ON_START_ENV: &str = "REWRAP_ON_START";
pub const SWEEP_ORG_ENV: &str = "SWEEP_ORG";
pub const SWEEP_ACTOR_ENV: &str = "SWEEP_ACTOR";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

const DEFAULT_VAULT_ADDR: &str = "http://127.0.0.1:8200";
pub const DEFAULT_TRANSIT_MOUNT: &str = "cdms-kms";
pub const DEFAULT_KEK_NAME: &str = "master-kek";
const DEFAULT_ROTATE_PERIOD: &str = "2160h";
const DEFAULT_FILES_PATH: &str = "./files";
const DEFAULT_S3_REGION: &str = "us-east-1";
const DEFAULT_S3_BUCKET: &str = "cdms-files";
const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_ORPHAN_TTL_SECS: u64 = 900;
const DEFAULT_REAPER_INTERVAL_SECS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration missing: {0}")]
    Missing(String),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: String, reason: String },
}

/// KMS connection settings.
#[derive(Clone)]
pub struct KmsConfig {
    pub addr: String,
    pub token: String,
    pub mount: String,
    pub key_name: String,
    pub rotation_period: String,
    pub request_timeout: Duration,
}

impl fmt::Debug for KmsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KmsConfig")
            .field("addr", &self.addr)
            .field("mount", &self.mount)
            .field("key_name", &self.key_name)
            .field("rotation_period", &self.rotation_period)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

/// S3-compatible bucket settings. Path-style addressing is always used.
#[derive(Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub request_timeout: Duration,
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key", &self.access_key)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum StorageConfig {
    Local { dir: PathBuf },
    S3(S3Config),
}

/// Background task settings.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    pub orphan_ttl: Duration,
    pub reaper_interval: Duration,
    pub rewrap_on_start: bool,
    /// Organisation whose ledger gateway background tasks use.
    pub sweep_org: String,
    pub sweep_actor: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub kms: KmsConfig,
    pub storage: StorageConfig,
    pub data_dir: PathBuf,
    pub org_registry_path: Option<PathBuf>,
    pub stage_timeout: Duration,
    pub maintenance: MaintenanceConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let stage_timeout = Duration::from_secs(env_u64(
            STAGE_TIMEOUT_SECS_ENV,
            DEFAULT_STAGE_TIMEOUT_SECS,
        )?);

        let kms = KmsConfig {
            addr: env_or_default(VAULT_ADDR_ENV, DEFAULT_VAULT_ADDR),
            token: env_required(VAULT_TOKEN_ENV)?,
            mount: env_or_default(VAULT_TRANSIT_MOUNT_ENV, DEFAULT_TRANSIT_MOUNT),
            key_name: env_or_default(VAULT_KEK_NAME_ENV, DEFAULT_KEK_NAME),
            rotation_period: env_or_default(VAULT_KEK_ROTATE_PERIOD_ENV, DEFAULT_ROTATE_PERIOD),
            request_timeout: stage_timeout,
        };

        let storage = match env_or_default(STORAGE_BACKEND_ENV, "local")
            .to_ascii_lowercase()
            .as_str()
        {
            "local" => StorageConfig::Local {
                dir: PathBuf::from(env_or_default(FILES_PATH_ENV, DEFAULT_FILES_PATH)),
            },
            "s3" => StorageConfig::S3(S3Config {
                endpoint: env_required(S3_ENDPOINT_ENV)?,
                region: env_or_default(S3_REGION_ENV, DEFAULT_S3_REGION),
                bucket: env_or_default(S3_BUCKET_ENV, DEFAULT_S3_BUCKET),
                access_key: env_required(S3_ACCESS_KEY_ENV)?,
                secret_key: env_required(S3_SECRET_KEY_ENV)?,
                request_timeout: stage_timeout,
            }),
            other => {
                return Err(ConfigError::Invalid {
                    name: STORAGE_BACKEND_ENV.to_string(),
                    reason: format!("expected 'local' or 's3', got '{other}'"),
                })
            }
        };

        let maintenance = MaintenanceConfig {
            orphan_ttl: Duration::from_secs(env_u64(ORPHAN_TTL_SECS_ENV, DEFAULT_ORPHAN_TTL_SECS)?),
            reaper_interval: Duration::from_secs(env_u64(
                REAPER_INTERVAL_SECS_ENV,
                DEFAULT_REAPER_INTERVAL_SECS,
            )?),
            rewrap_on_start: env_bool(REWRAP_ON_START_ENV)?,
            sweep_org: env_or_default(SWEEP_ORG_ENV, "A"),
            sweep_actor: env_or_default(SWEEP_ACTOR_ENV, "admin"),
        };

        Ok(Self {
            kms,
            storage,
            data_dir: PathBuf::from(env_or_default(DATA_DIR_ENV, DEFAULT_DATA_DIR)),
            org_registry_path: env_optional(ORG_REGISTRY_PATH_ENV).map(PathBuf::from),
            stage_timeout,
            maintenance,
        })
    }
}

pub fn env_required(name: &str) -> Result<String, ConfigError> {
    env_optional(name).ok_or_else(|| ConfigError::Missing(name.to_string()))
}

pub fn env_optional(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) => {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed)
            }
        }
        Err(_) => None,
    }
}

pub fn env_or_default(name: &str, default: &str) -> String {
    env_optional(name).unwrap_or_else(|| default.to_string())
}

fn env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match env_optional(name) {
        Some(raw) => parse_u64(name, &raw),
        None => Ok(default),
    }
}

fn env_bool(name: &str) -> Result<bool, ConfigError> {
    match env_optional(name) {
        Some(raw) => parse_bool(name, &raw),
        None => Ok(false),
    }
}

fn parse_u64(name: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.parse().map_err(|e| ConfigError::Invalid {
        name: name.to_string(),
        reason: format!("{raw:?}: {e}"),
    })
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name: name.to_string(),
            reason: format!("{raw:?} is not a boolean"),
        }),
    }
}
