// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! User registry: read-only lookup from username to account record.
//!
//! Populated once from the configuration before connections are accepted
//! and shared immutably across all connection tasks.

use crate::config::UserConfig;
use std::collections::HashMap;
use std::sync::Arc;

/// A configured account.
#[derive(Debug)]
pub struct User {
    /// Unique login name.
    pub username: String,

    /// Salted password record, `salt || lowercase-hex digest`.
    pub password_record: String,

    /// Repository directory name under the repository root.
    pub repository: String,

    /// When false, SAVE refuses to replace an existing `current.<filename>`.
    pub versioning_enabled: bool,
}

/// All configured users, indexed by username.
#[derive(Debug, Default)]
pub struct UserRegistry {
    users: HashMap<String, Arc<User>>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from validated configuration entries.
    pub fn from_config(users: &[UserConfig]) -> Self {
        let mut registry = Self::new();
        for user in users {
            registry.insert(User {
                username: user.username.clone(),
                password_record: user.password_record.clone(),
                repository: user.repository.clone(),
                versioning_enabled: user.versioning_enabled,
            });
        }
        registry
    }

    pub fn insert(&mut self, user: User) {
        self.users.insert(user.username.clone(), Arc::new(user));
    }

    /// Look up a user by name.
    pub fn lookup(&self, username: &str) -> Option<Arc<User>> {
        self.users.get(username).cloned()
    }

    pub fn users(&self) -> impl Iterator<Item = &Arc<User>> {
        self.users.values()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
