// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Organisation registry.
//!
//! Maps an organisation identifier (or one of its aliases) to its ledger
//! connection profile and gateway. Adding an organisation is a registry
//! entry, not a code change.
//!
//! ## File Format
//!
//! ```json
//! {
//!   "organizations": [
//!     {
//!       "id": "Org1",
//!       "aliases": ["A", "DistrictPoliceA"],
//!       "msp_id": "Org1MSP",
//!       "display_name": "DistrictPoliceA",
//!       "affiliation": "org1.department1",
//!       "admin_identity": "AdminOrg1",
//!       "gateway_url": "http://localhost:8801",
//!       "api_key_env": "ORG1_GATEWAY_API_KEY"
//!     }
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::gateway::{HttpLedgerGateway, LedgerGateway};
use super::LedgerError;
use crate::config::env_optional;

pub const DEFAULT_CHANNEL: &str = "mychannel";
pub const DEFAULT_CHAINCODE: &str = "cdmscontract";

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

fn default_chaincode() -> String {
    DEFAULT_CHAINCODE.to_string()
}

/// Connection parameters and credential namespace for one organisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgProfile {
    pub id: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub msp_id: String,
    /// Organisation attribute written on records and enrolments.
    pub display_name: String,
    /// CA affiliation for enrolled users.
    pub affiliation: String,
    /// Wallet label of the organisation's admin.
    pub admin_identity: String,
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default = "default_chaincode")]
    pub chaincode: String,
    pub gateway_url: String,
    /// Environment variable holding the gateway API key, if any.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl OrgProfile {
    fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.id.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    organizations: Vec<OrgProfile>,
}

/// A resolved organisation: its profile and the gateway to reach it.
#[derive(Clone)]
pub struct OrgConnection {
    pub profile: OrgProfile,
    pub gateway: Arc<dyn LedgerGateway>,
}

impl std::fmt::Debug for OrgConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrgConnection")
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct OrgRegistry {
    connections: Vec<OrgConnection>,
    /// Lowercased id or alias → index into `connections`.
    index: HashMap<String, usize>,
}

impl OrgRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an organisation behind an existing gateway.
    pub fn register(
        &mut self,
        profile: OrgProfile,
        gateway: Arc<dyn LedgerGateway>,
    ) -> Result<(), LedgerError> {
        let position = self.connections.len();
        for name in profile.names() {
            let key = name.to_lowercase();
            if self.index.contains_key(&key) {
                return Err(LedgerError::Registry(format!(
                    "organization name '{name}' registered twice"
                )));
            }
        }
        for name in profile.names() {
            self.index.insert(name.to_lowercase(), position);
        }
        self.connections.push(OrgConnection { profile, gateway });
        Ok(())
    }

    /// Build HTTP gateways for each profile.
    pub fn from_profiles(profiles: Vec<OrgProfile>, timeout: Duration) -> Result<Self, LedgerError> {
        let mut registry = Self::new();
        for profile in profiles {
            let api_key = profile.api_key_env.as_deref().and_then(env_optional);
            let gateway = HttpLedgerGateway::new(
                &profile.gateway_url,
                profile.channel.clone(),
                profile.chaincode.clone(),
                profile.msp_id.clone(),
                api_key,
                timeout,
            )?;
            registry.register(profile, Arc::new(gateway))?;
        }
        Ok(registry)
    }

    pub fn load(path: &Path, timeout: Duration) -> Result<Self, LedgerError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| LedgerError::Registry(format!("{}: {e}", path.display())))?;
        let file: RegistryFile = serde_json::from_str(&raw)
            .map_err(|e| LedgerError::Registry(format!("{}: {e}", path.display())))?;
        if file.organizations.is_empty() {
            return Err(LedgerError::Registry(format!(
                "{}: no organizations defined",
                path.display()
            )));
        }
        Self::from_profiles(file.organizations, timeout)
    }

    /// Every profile shares one in-process gateway. Local runs and tests.
    pub fn with_shared_gateway(
        profiles: Vec<OrgProfile>,
        gateway: Arc<dyn LedgerGateway>,
    ) -> Result<Self, LedgerError> {
        let mut registry = Self::new();
        for profile in profiles {
            registry.register(profile, gateway.clone())?;
        }
        Ok(registry)
    }

    pub fn resolve(&self, org: &str) -> Result<&OrgConnection, LedgerError> {
        self.index
            .get(&org.trim().to_lowercase())
            .and_then(|&i| self.connections.get(i))
            .ok_or_else(|| LedgerError::UnknownOrganization(org.to_string()))
    }

    pub fn profiles(&self) -> impl Iterator<Item = &OrgProfile> {
        self.connections.iter().map(|c| &c.profile)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

/// The two-organisation network the record contract ships with.
pub fn default_profiles() -> Vec<OrgProfile> {
    vec![
        OrgProfile {
            id: "Org1".to_string(),
            aliases: vec!["A".to_string(), "DistrictPoliceA".to_string()],
            msp_id: "Org1MSP".to_string(),
            display_name: "DistrictPoliceA".to_string(),
            affiliation: "org1.department1".to_string(),
            admin_identity: "AdminOrg1".to_string(),
            channel: default_channel(),
            chaincode: default_chaincode(),
            gateway_url: "http://localhost:8801".to_string(),
            api_key_env: Some("ORG1_GATEWAY_API_KEY".to_string()),
        },
        OrgProfile {
            id: "Org2".to_string(),
            aliases: vec!["B".to_string(), "DistrictPoliceB".to_string()],
            msp_id: "Org2MSP".to_string(),
            display_name: "DistrictPoliceB".to_string(),
            affiliation: "org2.department1".to_string(),
            admin_identity: "AdminOrg2".to_string(),
            channel: default_channel(),
            chaincode: default_chaincode(),
            gateway_url: "http://localhost:8802".to_string(),
            api_key_env: Some("ORG2_GATEWAY_API_KEY".to_string()),
        },
    ]
}
