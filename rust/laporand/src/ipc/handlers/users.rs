use crate::ipc::helpers::{parse_params, reply, require_admin, require_student, required_str, store, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::UserView;
use crate::workflow::accounts::{self, NewUser, ProfileUpdate, UserPatch};
use crate::workflow::auth::Session;
use serde_json::{json, Value};

fn patch_param(params: &Value) -> Result<UserPatch, HandlerErr> {
    match params.get("patch") {
        None | Some(Value::Null) => Ok(UserPatch::default()),
        Some(v) => parse_params(v),
    }
}

async fn list(state: &mut AppState) -> Result<Value, HandlerErr> {
    require_admin(state)?;
    let store = store(state)?;
    Ok(json!({ "users": accounts::list_users(&store).await? }))
}

async fn create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    require_admin(state)?;
    let new: NewUser = parse_params(&req.params)?;
    let store = store(state)?;
    Ok(json!({ "user": accounts::create_user(&store, new).await? }))
}

async fn update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    require_admin(state)?;
    let username = required_str(&req.params, "username")?;
    let patch = patch_param(&req.params)?;
    let store = store(state)?;
    let user = accounts::update_user(&store, &username, patch).await?;
    Ok(json!({ "user": UserView::from(&user) }))
}

async fn rename(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    require_admin(state)?;
    let username = required_str(&req.params, "username")?;
    let new_username = required_str(&req.params, "newUsername")?;
    let patch = patch_param(&req.params)?;
    let store = store(state)?;
    let user = accounts::rename_user(&store, &username, &new_username, patch).await?;
    Ok(json!({ "user": UserView::from(&user) }))
}

async fn delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    require_admin(state)?;
    let username = required_str(&req.params, "username")?;
    let store = store(state)?;
    let deleted = accounts::delete_user(&store, &username).await?;
    Ok(json!({ "deleted": deleted }))
}

/// Reloads the signed-in student's record and refreshes the session copy.
async fn profile_get(state: &mut AppState) -> Result<Value, HandlerErr> {
    let me = require_student(state)?;
    let store = store(state)?;
    let user = accounts::get_user(&store, &me.username).await?;
    let view = UserView::from(&user);
    state.session = Some(Session::Student(user));
    Ok(json!({ "user": view }))
}

async fn profile_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let me = require_student(state)?;
    let update: ProfileUpdate = parse_params(&req.params)?;
    let store = store(state)?;
    let user = accounts::update_profile(&store, &me.username, update).await?;
    let view = UserView::from(&user);
    state.session = Some(Session::Student(user));
    Ok(json!({ "user": view }))
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let resp = match req.method.as_str() {
        "users.list" => list(state).await,
        "users.create" => create(state, req).await,
        "users.update" => update(state, req).await,
        "users.rename" => rename(state, req).await,
        "users.delete" => delete(state, req).await,
        "profile.get" => profile_get(state).await,
        "profile.update" => profile_update(state, req).await,
        _ => return None,
    };
    Some(reply(&req.id, resp))
}
