//! Staff user registry and bearer-token authentication.
//!
//! Lives entirely in the server; the engine knows nothing about users. The
//! default admin is created by an explicit idempotent bootstrap at startup,
//! never as a login side effect.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use staysync_core::token::generate_token;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Admin,
    Staff,
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub role: UserRole,
    pub is_active: bool,
}

#[derive(Default)]
struct Registry {
    users: Vec<User>,
    tokens: HashMap<String, i64>,
    next_id: i64,
}

#[derive(Default)]
pub struct AuthRegistry {
    inner: Mutex<Registry>,
}

pub fn hash_password(password: &str) -> String {
    let digest = Sha256::digest(password.as_bytes());
    format!("{digest:x}")
}

impl AuthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Ensure the default admin exists. Safe to run on every startup.
    pub fn bootstrap_admin(&self, email: &str, password: &str) {
        let mut registry = self.lock();
        if registry.users.iter().any(|user| user.email == email) {
            return;
        }
        registry.next_id += 1;
        let user = User {
            id: registry.next_id,
            email: email.to_string(),
            password_hash: hash_password(password),
            role: UserRole::Admin,
            is_active: true,
        };
        registry.users.push(user);
    }

    /// Create a staff account. Returns `None` when the email is taken.
    pub fn create_user(&self, email: &str, password: &str, role: UserRole) -> Option<User> {
        let mut registry = self.lock();
        if registry.users.iter().any(|user| user.email == email) {
            return None;
        }
        registry.next_id += 1;
        let user = User {
            id: registry.next_id,
            email: email.to_string(),
            password_hash: hash_password(password),
            role,
            is_active: true,
        };
        registry.users.push(user.clone());
        Some(user)
    }

    /// Verify credentials and mint a bearer token for the session.
    pub fn login(&self, email: &str, password: &str) -> Option<String> {
        let mut registry = self.lock();
        let user = registry
            .users
            .iter()
            .find(|user| user.email == email && user.is_active)?;
        if user.password_hash != hash_password(password) {
            return None;
        }
        let user_id = user.id;
        let token = generate_token();
        registry.tokens.insert(token.clone(), user_id);
        Some(token)
    }

    /// The active user holding `token`, if any.
    pub fn user_for_token(&self, token: &str) -> Option<User> {
        let registry = self.lock();
        let user_id = *registry.tokens.get(token)?;
        registry
            .users
            .iter()
            .find(|user| user.id == user_id && user.is_active)
            .cloned()
    }
}
