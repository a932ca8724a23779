use crate::config::BackendKind;
use crate::error::AppError;
use crate::ipc::helpers::{reply, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    reply(
        &req.id,
        Ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "backend": state.config.backend.as_str(),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "storeOpen": state.store.is_some(),
            "storeError": state.store_error,
        })),
    )
}

fn workspace_select(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let path = PathBuf::from(required_str(&req.params, "path")?);
    if state.config.backend != BackendKind::Local {
        return Err(AppError::Unsupported(
            "workspace.select only applies to the local backend".to_string(),
        )
        .into());
    }
    state
        .open_store(Some(path.clone()))
        .map_err(AppError::from)?;
    // Identities belong to the store they were read from.
    state.session = None;
    info!(workspace = %path.display(), "workspace selected");
    Ok(json!({ "workspacePath": path.to_string_lossy() }))
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(reply(&req.id, workspace_select(state, req))),
        _ => None,
    }
}
