//! Permission domain model.
//!
//! A permission is the atomic authorization unit, identified globally by
//! the triple `service:entity:action` (e.g. `billing:invoice:create`).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BastionError;

/// Component value that matches anything when wildcard resolution is
/// enabled.
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub id: Uuid,
    pub service: String,
    pub entity: String,
    pub action: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Permission {
    pub fn key(&self) -> PermissionKey {
        PermissionKey {
            service: self.service.clone(),
            entity: self.entity.clone(),
            action: self.action.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePermission {
    pub service: String,
    pub entity: String,
    pub action: String,
    pub description: String,
}

/// The triple is the permission's identity, so only the description can
/// change after creation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdatePermission {
    pub description: Option<String>,
}

/// The `(service, entity, action)` identity of a permission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PermissionKey {
    pub service: String,
    pub entity: String,
    pub action: String,
}

impl PermissionKey {
    /// Build a key, validating each component.
    ///
    /// Components must be non-empty and consist of lowercase ASCII
    /// letters, digits, `_`, `-` or `.`, or be exactly `*`.
    pub fn new(
        service: impl Into<String>,
        entity: impl Into<String>,
        action: impl Into<String>,
    ) -> Result<Self, BastionError> {
        let key = Self {
            service: service.into(),
            entity: entity.into(),
            action: action.into(),
        };
        for (name, value) in [
            ("service", &key.service),
            ("entity", &key.entity),
            ("action", &key.action),
        ] {
            validate_component(name, value)?;
        }
        Ok(key)
    }

    /// True if any component is the wildcard.
    pub fn has_wildcard(&self) -> bool {
        self.service == WILDCARD || self.entity == WILDCARD || self.action == WILDCARD
    }

    /// Wildcard-aware comparison: a `*` component on `self` matches any
    /// value in `requested`. A wildcard in `requested` only matches a
    /// literal `*`.
    pub fn matches(&self, requested: &PermissionKey) -> bool {
        fn component(granted: &str, wanted: &str) -> bool {
            granted == WILDCARD || granted == wanted
        }
        component(&self.service, &requested.service)
            && component(&self.entity, &requested.entity)
            && component(&self.action, &requested.action)
    }
}

fn validate_component(name: &str, value: &str) -> Result<(), BastionError> {
    if value == WILDCARD {
        return Ok(());
    }
    if value.is_empty() {
        return Err(BastionError::validation(format!(
            "permission {name} must not be empty"
        )));
    }
    let valid = value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '.'));
    if !valid {
        return Err(BastionError::validation(format!(
            "permission {name} '{value}' contains invalid characters"
        )));
    }
    Ok(())
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.service, self.entity, self.action)
    }
}

impl FromStr for PermissionKey {
    type Err = BastionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(service), Some(entity), Some(action), None) => {
                Self::new(service, entity, action)
            }
            _ => Err(BastionError::validation(format!(
                "permission key '{s}' must have the form service:entity:action"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let key: PermissionKey = "billing:invoice:create".parse().unwrap();
        assert_eq!(key.service, "billing");
        assert_eq!(key.entity, "invoice");
        assert_eq!(key.action, "create");
        assert_eq!(key.to_string(), "billing:invoice:create");
    }

    #[test]
    fn parse_rejects_wrong_arity() {
        assert!("billing:invoice".parse::<PermissionKey>().is_err());
        assert!("a:b:c:d".parse::<PermissionKey>().is_err());
        assert!("".parse::<PermissionKey>().is_err());
    }

    #[test]
    fn rejects_empty_and_uppercase_components() {
        assert!(PermissionKey::new("billing", "", "read").is_err());
        assert!(PermissionKey::new("Billing", "invoice", "read").is_err());
        assert!(PermissionKey::new("billing", "invoice", "re ad").is_err());
    }

    #[test]
    fn exact_keys_match_only_themselves() {
        let granted = PermissionKey::new("billing", "invoice", "read").unwrap();
        let same = PermissionKey::new("billing", "invoice", "read").unwrap();
        let other = PermissionKey::new("billing", "invoice", "delete").unwrap();
        assert!(granted.matches(&same));
        assert!(!granted.matches(&other));
    }

    #[test]
    fn wildcard_component_matches_any_value() {
        let granted = PermissionKey::new("billing", "*", "*").unwrap();
        assert!(granted.has_wildcard());
        assert!(granted.matches(&PermissionKey::new("billing", "invoice", "read").unwrap()));
        assert!(granted.matches(&PermissionKey::new("billing", "refund", "create").unwrap()));
        assert!(!granted.matches(&PermissionKey::new("crm", "invoice", "read").unwrap()));
    }

    #[test]
    fn requested_wildcard_does_not_expand() {
        let granted = PermissionKey::new("billing", "invoice", "read").unwrap();
        let requested = PermissionKey::new("billing", "*", "read").unwrap();
        assert!(!granted.matches(&requested));
    }
}
