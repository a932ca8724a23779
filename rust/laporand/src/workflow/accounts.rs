//! Student identity records. The username is the storage key, so renaming
//! a user means deleting the old record and inserting a new one. That rekey
//! is two separate writes; a failure between them loses the record.

use super::auth::hash_password;
use crate::error::AppError;
use crate::model::{User, UserView};
use crate::store::Store;
use serde::Deserialize;
use tracing::{error, info, warn};

const MAX_USERNAME_LEN: usize = 64;

pub fn is_valid_username(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_USERNAME_LEN
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn validate_username(s: &str) -> Result<(), AppError> {
    if is_valid_username(s) {
        Ok(())
    } else {
        Err(AppError::validation(format!(
            "username must be 1-{MAX_USERNAME_LEN} characters of letters, digits, '_' or '-'"
        )))
    }
}

fn required(field: &str, value: &str) -> Result<String, AppError> {
    let v = value.trim();
    if v.is_empty() {
        return Err(AppError::validation(format!("{field} is required")));
    }
    Ok(v.to_string())
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub name: String,
    #[serde(rename = "class")]
    pub class_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub student_id: Option<String>,
}

/// Fields to overwrite. Absent fields are kept; a blank password keeps the
/// existing one; a blank phone or student id clears it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UserPatch {
    pub password: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "class")]
    pub class_name: Option<String>,
    pub phone: Option<String>,
    pub student_id: Option<String>,
}

fn apply_patch(mut user: User, patch: UserPatch) -> Result<User, AppError> {
    if let Some(name) = patch.name {
        user.name = required("name", &name)?;
    }
    if let Some(class) = patch.class_name {
        user.class_name = required("class", &class)?;
    }
    if let Some(pw) = patch.password.filter(|p| !p.is_empty()) {
        user.password_hash = hash_password(&pw)?;
    }
    if patch.phone.is_some() {
        user.phone = optional(patch.phone);
    }
    if patch.student_id.is_some() {
        user.student_id = optional(patch.student_id);
    }
    Ok(user)
}

pub async fn list_users(store: &Store) -> Result<Vec<UserView>, AppError> {
    Ok(store
        .list::<User>()
        .await?
        .iter()
        .map(|s| UserView::from(&s.record))
        .collect())
}

pub async fn create_user(store: &Store, new: NewUser) -> Result<UserView, AppError> {
    validate_username(&new.username)?;
    if new.password.is_empty() {
        return Err(AppError::validation("password is required"));
    }
    let user = User {
        name: required("name", &new.name)?,
        class_name: required("class", &new.class_name)?,
        password_hash: hash_password(&new.password)?,
        phone: optional(new.phone),
        student_id: optional(new.student_id),
        username: new.username,
    };
    store.add(&user).await?;
    info!(username = %user.username, "user created");
    Ok(UserView::from(&user))
}

async fn load(store: &Store, username: &str) -> Result<User, AppError> {
    store
        .get::<User>(username)
        .await?
        .map(|s| s.record)
        .ok_or_else(|| AppError::NotFound(format!("user {username} not found")))
}

pub async fn get_user(store: &Store, username: &str) -> Result<User, AppError> {
    load(store, username).await
}

pub async fn update_user(store: &Store, username: &str, patch: UserPatch) -> Result<User, AppError> {
    let user = apply_patch(load(store, username).await?, patch)?;
    store.put(username, &user).await?;
    info!(username = %username, "user updated");
    Ok(user)
}

/// Moves `old` to `new`, applying `patch` on the way. Renaming to the same
/// name is a plain update.
pub async fn rename_user(
    store: &Store,
    old: &str,
    new: &str,
    patch: UserPatch,
) -> Result<User, AppError> {
    validate_username(new)?;
    if old == new {
        return update_user(store, old, patch).await;
    }
    if store.get::<User>(new).await?.is_some() {
        return Err(AppError::DuplicateKey(format!("{new} already exists in users")));
    }
    let mut user = apply_patch(load(store, old).await?, patch)?;
    user.username = new.to_string();

    store.delete::<User>(old).await?;
    warn!(from = %old, to = %new, "rekey: old record removed, inserting new key");
    if let Err(e) = store.add(&user).await {
        error!(from = %old, to = %new, error = %e, "rekey failed after delete; record lost");
        return Err(e.into());
    }
    info!(from = %old, to = %new, "user renamed");
    Ok(user)
}

/// Removes only the identity record; reports keep their submitter username.
pub async fn delete_user(store: &Store, username: &str) -> Result<bool, AppError> {
    if store.get::<User>(username).await?.is_none() {
        return Ok(false);
    }
    store.delete::<User>(username).await?;
    info!(username = %username, "user deleted");
    Ok(true)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub new_password: String,
    #[serde(default)]
    pub confirm_password: String,
    pub phone: Option<String>,
}

/// Self-service edit. Returns the refreshed record for the session.
pub async fn update_profile(
    store: &Store,
    username: &str,
    update: ProfileUpdate,
) -> Result<User, AppError> {
    if update.new_password != update.confirm_password {
        return Err(AppError::validation("passwords do not match"));
    }
    let patch = UserPatch {
        password: Some(update.new_password),
        phone: update.phone,
        ..UserPatch::default()
    };
    update_user(store, username, patch).await
}
