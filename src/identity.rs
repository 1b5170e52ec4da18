// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Roles and ledger identities.
//!
//! Every enrolment is an (organisation, role) pair resolved through one
//! lookup table. Organisation-specific values (MSP, affiliation, admin
//! wallet label, organisation attribute) come from the registry profile.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ledger::OrgProfile;

/// Actor name that selects the organisation's admin identity.
pub const ADMIN_ACTOR: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    DistrictPolice,
    ForensicsOfficer,
    Investigator,
    Admin,
}

/// Per-role enrolment parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleSpec {
    pub role: Role,
    /// Value of the `role` certificate attribute.
    pub attribute: &'static str,
    /// CA identity type.
    pub ca_type: &'static str,
    /// Whether the certificate carries an `email` attribute.
    pub carries_email: bool,
}

const ROLE_TABLE: [RoleSpec; 4] = [
    RoleSpec {
        role: Role::DistrictPolice,
        attribute: "district_police",
        ca_type: "client",
        carries_email: true,
    },
    RoleSpec {
        role: Role::ForensicsOfficer,
        attribute: "forensics_officer",
        ca_type: "client",
        carries_email: true,
    },
    RoleSpec {
        role: Role::Investigator,
        attribute: "investigator",
        ca_type: "client",
        carries_email: true,
    },
    RoleSpec {
        role: Role::Admin,
        attribute: "admin",
        ca_type: "admin",
        carries_email: false,
    },
];

impl Role {
    pub fn spec(&self) -> &'static RoleSpec {
        match self {
            Role::DistrictPolice => &ROLE_TABLE[0],
            Role::ForensicsOfficer => &ROLE_TABLE[1],
            Role::Investigator => &ROLE_TABLE[2],
            Role::Admin => &ROLE_TABLE[3],
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.spec().attribute
    }

    /// Parse role from its attribute value (case-insensitive).
    pub fn from_str(s: &str) -> Option<Role> {
        let wanted = s.trim().to_lowercase();
        ROLE_TABLE
            .iter()
            .find(|spec| spec.attribute == wanted)
            .map(|spec| spec.role)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("role {0} requires an email address")]
    MissingEmail(Role),

    #[error("role {0} requires a username")]
    MissingUsername(Role),
}

/// A certificate attribute requested at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attribute {
    pub name: String,
    pub value: String,
    pub ecert: bool,
}

impl Attribute {
    fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            ecert: true,
        }
    }
}

/// Everything a CA registration + wallet import needs for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrollmentRequest {
    pub enrollment_id: String,
    pub ca_type: String,
    pub affiliation: String,
    pub msp_id: String,
    pub attributes: Vec<Attribute>,
    /// Label under which the identity is stored and later used on the ledger.
    pub wallet_label: String,
}

/// Build the enrolment for a user of `role` in the organisation `profile`.
///
/// Admin enrolments use the organisation's admin identity; every other role
/// needs a username (enrolment id) and an email (wallet label).
pub fn enrollment_request(
    profile: &OrgProfile,
    role: Role,
    username: Option<&str>,
    email: Option<&str>,
) -> Result<EnrollmentRequest, IdentityError> {
    let spec = role.spec();
    let mut attributes = vec![
        Attribute::new("role", spec.attribute),
        Attribute::new("organization", &profile.display_name),
    ];

    let (enrollment_id, wallet_label) = if role == Role::Admin {
        (profile.admin_identity.clone(), profile.admin_identity.clone())
    } else {
        let username = username
            .filter(|u| !u.trim().is_empty())
            .ok_or(IdentityError::MissingUsername(role))?;
        let email = email
            .filter(|e| !e.trim().is_empty())
            .ok_or(IdentityError::MissingEmail(role))?;
        if spec.carries_email {
            attributes.push(Attribute::new("email", email));
        }
        (username.to_string(), wallet_label_for_email(email))
    };

    Ok(EnrollmentRequest {
        enrollment_id,
        ca_type: spec.ca_type.to_string(),
        affiliation: profile.affiliation.clone(),
        msp_id: profile.msp_id.clone(),
        attributes,
        wallet_label,
    })
}

/// `Officer.Jane@Org1.gov` → `officer_jane_org1_gov`
pub fn wallet_label_for_email(email: &str) -> String {
    email
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == '@' || c == '.' { '_' } else { c })
        .collect()
}

/// Ledger identity an actor transacts as within `profile`'s organisation.
///
/// `admin` (or the admin wallet label itself) maps to the organisation's
/// admin identity; anything else is treated as an email address.
pub fn ledger_identity(actor: &str, profile: &OrgProfile) -> String {
    let actor = actor.trim();
    if actor.eq_ignore_ascii_case(ADMIN_ACTOR) || actor == profile.admin_identity {
        profile.admin_identity.clone()
    } else {
        wallet_label_for_email(actor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::default_profiles;

    #[test]
    fn from_str_parses_correctly() {
        assert_eq!(Role::from_str("forensics_officer"), Some(Role::ForensicsOfficer));
        assert_eq!(Role::from_str("INVESTIGATOR"), Some(Role::Investigator));
        assert_eq!(Role::from_str("admin"), Some(Role::Admin));
        assert_eq!(Role::from_str("client"), None);
        assert_eq!(Role::DistrictPolice.to_string(), "district_police");
    }

    #[test]
    fn officer_enrollment_for_org1() {
        let org1 = &default_profiles()[0];
        let request = enrollment_request(
            org1,
            Role::ForensicsOfficer,
            Some("forensicsA"),
            Some("Jane.Doe@org1.example.com"),
        )
        .unwrap();

        assert_eq!(request.enrollment_id, "forensicsA");
        assert_eq!(request.ca_type, "client");
        assert_eq!(request.affiliation, "org1.department1");
        assert_eq!(request.msp_id, "Org1MSP");
        assert_eq!(request.wallet_label, "jane_doe_org1_example_com");
        assert_eq!(
            request.attributes,
            vec![
                Attribute::new("role", "forensics_officer"),
                Attribute::new("organization", "DistrictPoliceA"),
                Attribute::new("email", "Jane.Doe@org1.example.com"),
            ]
        );
    }

    #[test]
    fn admin_enrollment_uses_org_admin() {
        let org2 = &default_profiles()[1];
        let request = enrollment_request(org2, Role::Admin, None, None).unwrap();
        assert_eq!(request.enrollment_id, "AdminOrg2");
        assert_eq!(request.wallet_label, "AdminOrg2");
        assert_eq!(request.ca_type, "admin");
        assert!(request.attributes.iter().all(|a| a.name != "email"));
    }

    #[test]
    fn non_admin_needs_email_and_username() {
        let org1 = &default_profiles()[0];
        assert_eq!(
            enrollment_request(org1, Role::Investigator, Some("inv"), None).unwrap_err(),
            IdentityError::MissingEmail(Role::Investigator)
        );
        assert_eq!(
            enrollment_request(org1, Role::Investigator, Some(" "), Some("a@b.c")).unwrap_err(),
            IdentityError::MissingUsername(Role::Investigator)
        );
    }

    #[test]
    fn ledger_identity_for_actors() {
        let org1 = &default_profiles()[0];
        assert_eq!(ledger_identity("admin", org1), "AdminOrg1");
        assert_eq!(ledger_identity("AdminOrg1", org1), "AdminOrg1");
        assert_eq!(
            ledger_identity("officer@org1.example.com", org1),
            "officer_org1_example_com"
        );
    }
}
