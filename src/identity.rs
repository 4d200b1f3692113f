use std::collections::HashSet;

use serde::Deserialize;

use crate::model::Principal;

/// What the identity provider hands over after a successful sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthenticatedUser {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

/// Externally maintained list of privileged principals, by email or id.
#[derive(Debug, Clone, Default)]
pub struct AdminAllowList {
    emails: HashSet<String>,
    ids: HashSet<String>,
}

impl AdminAllowList {
    /// Comma-separated; entries containing `@` match emails case-insensitively,
    /// anything else matches principal ids exactly.
    pub fn parse(list: &str) -> Self {
        let mut allow = Self::default();
        for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if item.contains('@') {
                allow.emails.insert(item.to_lowercase());
            } else {
                allow.ids.insert(item.to_string());
            }
        }
        allow
    }

    pub fn len(&self) -> usize {
        self.emails.len() + self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_privileged(&self, user: &AuthenticatedUser) -> bool {
        if self.ids.contains(&user.id) {
            return true;
        }
        user.email
            .as_deref()
            .is_some_and(|e| self.emails.contains(&e.to_lowercase()))
    }

    /// Build the session principal with privilege fixed at this moment.
    pub fn resolve(&self, user: AuthenticatedUser) -> Principal {
        let is_privileged = self.is_privileged(&user);
        Principal {
            id: user.id,
            display_name: user.display_name,
            email: user.email,
            phone_number: user.phone_number,
            is_privileged,
        }
    }
}
