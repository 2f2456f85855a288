//! Storage browsing and asset deletion.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;

use refrax_core::storage::ObjectEntry;
use refrax_model::fingerprint::PUBLIC_PREFIX;

use crate::errors::{AppError, AppResult};
use crate::infra::app_state::AppState;

#[derive(Debug, Serialize)]
pub struct TreeNode {
    name: String,
    path: String,
    is_dir: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    children: Vec<TreeNode>,
}

/// `GET /storage/`: nested tree of every original.
pub async fn list_storage(State(state): State<AppState>) -> AppResult<Json<Vec<TreeNode>>> {
    let entries = state.storage.list(PUBLIC_PREFIX).await?;
    Ok(Json(build_tree(&entries)))
}

#[derive(Debug, Serialize)]
struct AssetMetadata {
    path: String,
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
}

/// `GET /storage/<path>/metadata`.
pub async fn asset_metadata(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> AppResult<Response> {
    let Some(asset_path) = path.strip_suffix("/metadata") else {
        return Err(AppError::not_found("no such storage endpoint"));
    };

    let key = format!("{PUBLIC_PREFIX}{asset_path}");
    let meta = state
        .storage
        .head_meta(&key)
        .await?
        .ok_or_else(|| AppError::not_found(format!("asset {asset_path}")))?;

    Ok(Json(AssetMetadata {
        path: asset_path.to_string(),
        size: meta.size,
        last_modified: meta.last_modified,
        content_type: meta.content_type,
    })
    .into_response())
}

/// `DELETE /storage/<path>`: full cascade (jobs, caches, original).
pub async fn delete_asset(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> AppResult<Response> {
    let report = state.deleter.delete_asset(&path).await?;
    Ok(Json(report).into_response())
}

/// `DELETE /invalidate/<path>`: derived artifacts only; the original
/// survives.
pub async fn invalidate(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> AppResult<Response> {
    let report = state.pipeline.invalidator().invalidate(&path).await;
    Ok(Json(report).into_response())
}

fn build_tree(entries: &[ObjectEntry]) -> Vec<TreeNode> {
    #[derive(Default)]
    struct Dir {
        files: BTreeMap<String, u64>,
        dirs: BTreeMap<String, Dir>,
    }

    let mut root = Dir::default();
    for entry in entries {
        let Some(relative) = entry.key.strip_prefix(PUBLIC_PREFIX) else {
            continue;
        };
        let mut cursor = &mut root;
        let segments: Vec<&str> = relative.split('/').collect();
        for (i, segment) in segments.iter().enumerate() {
            if i + 1 == segments.len() {
                cursor.files.insert((*segment).to_string(), entry.size);
            } else {
                cursor = cursor.dirs.entry((*segment).to_string()).or_default();
            }
        }
    }

    fn render(dir: &Dir, prefix: &str) -> Vec<TreeNode> {
        let mut nodes = Vec::new();
        for (name, child) in &dir.dirs {
            let path = format!("{prefix}{name}");
            nodes.push(TreeNode {
                name: name.clone(),
                children: render(child, &format!("{path}/")),
                path,
                is_dir: true,
                size: None,
            });
        }
        for (name, size) in &dir.files {
            nodes.push(TreeNode {
                name: name.clone(),
                path: format!("{prefix}{name}"),
                is_dir: false,
                size: Some(*size),
                children: Vec::new(),
            });
        }
        nodes
    }

    render(&root, "")
}
