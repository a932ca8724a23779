use crate::config::SecurityConfig;
use crate::error::AppError;
use crate::model::{User, UserView};
use crate::store::Store;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use uuid::Uuid;

/// Lockout bucket for the shared admin password. Usernames cannot contain `#`.
pub const ADMIN_KEY: &str = "#admin";

/// Names tracked by the lockout guard at once.
const MAX_TRACKED_NAMES: usize = 1024;

/// Argon2id hash as a PHC string (`$argon2id$v=19$...`).
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
        .map_err(|e| AppError::Storage(format!("password salt: {e}")))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AppError::Storage(format!("password hash: {e}")))
}

/// False for a wrong password and for anything that is not a PHC string.
pub fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Who is signed in to this daemon.
#[derive(Debug, Clone)]
pub enum Session {
    Student(User),
    Admin,
}

impl Session {
    pub fn to_json(&self) -> Value {
        match self {
            Session::Student(user) => json!({
                "role": "student",
                "user": UserView::from(user),
            }),
            Session::Admin => json!({ "role": "admin" }),
        }
    }
}

#[derive(Debug)]
struct Attempts {
    failures: u32,
    locked_until: Option<Instant>,
    last_failure: Instant,
}

impl Attempts {
    /// Still relevant at `now`: locked, or failed within the last `window`.
    fn is_live(&self, now: Instant, window: Duration) -> bool {
        match self.locked_until {
            Some(until) => until > now,
            None => now.duration_since(self.last_failure) < window,
        }
    }
}

/// Counts consecutive sign-in failures per username and locks the name out
/// once the limit is reached. Failures older than the lockout window are
/// forgotten, and at most `MAX_TRACKED_NAMES` names are tracked.
#[derive(Debug)]
pub struct LoginGuard {
    max_failures: u32,
    lockout: Duration,
    attempts: HashMap<String, Attempts>,
}

impl LoginGuard {
    pub fn new(cfg: &SecurityConfig) -> Self {
        Self {
            max_failures: cfg.max_failed_logins,
            lockout: Duration::from_secs(cfg.lockout_secs),
            attempts: HashMap::new(),
        }
    }

    pub fn check(&mut self, key: &str, now: Instant) -> Result<(), AppError> {
        let Some(entry) = self.attempts.get(key) else {
            return Ok(());
        };
        match entry.locked_until {
            Some(until) if until > now => {
                let left = until.duration_since(now);
                let secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
                Err(AppError::LockedOut {
                    retry_after_secs: secs,
                })
            }
            Some(_) => {
                self.attempts.remove(key);
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub fn record_failure(&mut self, key: &str, now: Instant) {
        if self.max_failures == 0 {
            return;
        }
        self.prune(now);
        if !self.attempts.contains_key(key) && self.attempts.len() >= MAX_TRACKED_NAMES {
            self.evict_oldest();
        }
        let entry = self.attempts.entry(key.to_string()).or_insert(Attempts {
            failures: 0,
            locked_until: None,
            last_failure: now,
        });
        entry.failures += 1;
        entry.last_failure = now;
        if entry.failures >= self.max_failures {
            entry.failures = 0;
            entry.locked_until = Some(now + self.lockout);
            warn!(username = %key, lockout_secs = self.lockout.as_secs(), "sign-in locked");
        }
    }

    pub fn record_success(&mut self, key: &str) {
        self.attempts.remove(key);
    }

    fn prune(&mut self, now: Instant) {
        let window = self.lockout;
        self.attempts.retain(|_, a| a.is_live(now, window));
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .attempts
            .iter()
            .min_by_key(|(_, a)| (a.locked_until.is_some(), a.last_failure))
            .map(|(k, _)| k.clone());
        if let Some(key) = oldest {
            self.attempts.remove(&key);
        }
    }
}

/// Student sign-in. Unknown usernames and wrong passwords are reported the
/// same way.
pub async fn login(
    store: &Store,
    guard: &mut LoginGuard,
    username: &str,
    password: &str,
    now: Instant,
) -> Result<User, AppError> {
    guard.check(username, now)?;
    let found = if super::accounts::is_valid_username(username) {
        store.get::<User>(username).await?
    } else {
        None
    };
    match found {
        Some(stored) if verify_password(password, &stored.record.password_hash) => {
            guard.record_success(username);
            info!(username = %username, "student signed in");
            Ok(stored.record)
        }
        _ => {
            guard.record_failure(username, now);
            warn!(username = %username, "student sign-in failed");
            Err(AppError::InvalidCredentials)
        }
    }
}

pub fn admin_login(
    configured: Option<&str>,
    guard: &mut LoginGuard,
    password: &str,
    now: Instant,
) -> Result<(), AppError> {
    let Some(expected) = configured else {
        return Err(AppError::Forbidden(
            "admin sign-in is disabled; set admin_password".to_string(),
        ));
    };
    guard.check(ADMIN_KEY, now)?;
    let matched: bool = expected.as_bytes().ct_eq(password.as_bytes()).into();
    if matched {
        guard.record_success(ADMIN_KEY);
        info!("admin signed in");
        Ok(())
    } else {
        guard.record_failure(ADMIN_KEY, now);
        warn!("admin sign-in failed");
        Err(AppError::InvalidCredentials)
    }
}
