use crate::error::AppError;
use crate::ipc::helpers::{reply, require_admin, store, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::workflow::triage;
use serde_json::Value;

async fn stats_get(state: &mut AppState) -> Result<Value, HandlerErr> {
    require_admin(state)?;
    let store = store(state)?;
    let stats = triage::dashboard(&store).await?;
    serde_json::to_value(stats).map_err(|e| AppError::Storage(e.to_string()).into())
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "stats.get" => Some(reply(&req.id, stats_get(state).await)),
        _ => None,
    }
}
