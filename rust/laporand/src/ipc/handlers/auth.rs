use crate::ipc::helpers::{reply, require_session, required_str, store, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::UserView;
use crate::workflow::auth::{self, Session};
use serde_json::{json, Value};
use std::time::Instant;
use tracing::info;

async fn login(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let username = required_str(&req.params, "username")?;
    let password = required_str(&req.params, "password")?;
    let store = store(state)?;
    let user = auth::login(
        &store,
        &mut state.login_guard,
        &username,
        &password,
        Instant::now(),
    )
    .await?;
    let view = UserView::from(&user);
    state.cancel_subscriptions();
    state.session = Some(Session::Student(user));
    Ok(json!({ "role": "student", "user": view }))
}

fn admin_login(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let password = required_str(&req.params, "password")?;
    auth::admin_login(
        state.config.admin_password.as_deref(),
        &mut state.login_guard,
        &password,
        Instant::now(),
    )?;
    state.session = Some(Session::Admin);
    Ok(json!({ "role": "admin" }))
}

fn logout(state: &mut AppState) -> Result<Value, HandlerErr> {
    require_session(state)?;
    state.cancel_subscriptions();
    state.session = None;
    info!("signed out");
    Ok(json!({ "ok": true }))
}

fn session_get(state: &AppState) -> Value {
    json!({ "session": state.session.as_ref().map(Session::to_json) })
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "auth.login" => Some(reply(&req.id, login(state, req).await)),
        "auth.adminLogin" => Some(reply(&req.id, admin_login(state, req))),
        "auth.logout" => Some(reply(&req.id, logout(state))),
        "session.get" => Some(reply(&req.id, Ok(session_get(state)))),
        _ => None,
    }
}
