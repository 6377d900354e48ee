//! Content package resolution.
//!
//! Displayable payloads may reference a content package instead of carrying
//! inline HTML. Before such a payload goes out to a view, the package
//! manifest is fetched and merged into it: relative `main` and `icon` URIs
//! are rewritten against the package base URL, and descriptive fields
//! (title, info, version, ...) are imported. The merge functions are pure;
//! a failed merge leaves the fields imported so far in place, mirroring the
//! collaborator contract of forwarding as much as possible.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::task::JoinSet;
use tracing::warn;
use url::Url;

use viewgate_core::error::GatewayError;
use viewgate_core::outcome::ValueAggregation;

use crate::traits::ContentSource;

/// Resolve a URI from a manifest: absolute URIs pass through, relative ones
/// resolve against the package base URL.
fn absolutize(raw: &str, base_url: &str, field: &str) -> Result<String, GatewayError> {
    match Url::parse(raw) {
        Ok(_) => Ok(raw.to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => Ok(format!("{base_url}{raw}")),
        Err(_) => Err(GatewayError::Validation(format!(
            "The [{field}] field contains no valid URI."
        ))),
    }
}

// ─── Merge rules ──────────────────────────────────────────────────

/// Merge a package manifest into an assistance step. `main`, `mimeType`,
/// `lastUpdate` and `version` land in the step's content body; `title` (as
/// `title.current`), `info`, `endorsement`, `arid` and `warnings` land on the
/// step itself. Warning icons are rewritten along with appended ones.
pub fn merge_assistance_manifest(
    step: &mut Value,
    manifest: &Value,
    base_url: &str,
) -> Result<(), GatewayError> {
    let Some(root) = step.as_object_mut() else {
        return Ok(());
    };

    if let Some(content) = root.get_mut("content").and_then(Value::as_object_mut) {
        if let Some(main) = manifest.get("main").and_then(Value::as_str) {
            let resolved = absolutize(main, base_url, "main")?;
            content.insert("main".into(), Value::String(resolved));
            if let Some(mime) = manifest.get("mimeType") {
                content.insert("mimeType".into(), mime.clone());
            }
        }
        for field in ["lastUpdate", "version"] {
            if let Some(value) = manifest.get(field) {
                content.insert(field.into(), value.clone());
            }
        }
    }

    if let Some(title) = manifest.get("title").and_then(Value::as_str) {
        let container = root.entry("title").or_insert_with(|| json!({}));
        if let Some(container) = container.as_object_mut() {
            container.insert("current".into(), Value::String(title.to_string()));
        }
    }

    for field in ["info", "endorsement", "arid"] {
        if let Some(value) = manifest.get(field) {
            root.insert(field.into(), value.clone());
        }
    }

    if let Some(new_warnings) = manifest.get("warnings").and_then(Value::as_array) {
        let entry = root.entry("warnings").or_insert_with(|| json!([]));
        if let Some(warnings) = entry.as_array_mut() {
            warnings.extend(new_warnings.iter().cloned());
            for warning in warnings.iter_mut() {
                let icon = warning.get("icon").and_then(Value::as_str).map(String::from);
                if let Some(icon) = icon {
                    warning["icon"] = Value::String(absolutize(&icon, base_url, "icon")?);
                }
            }
        }
    }
    Ok(())
}

/// Merge a package manifest into a learning-object chapter. The chapter body
/// receives `main` (rewritten), `mimeType`, `info` and `title` (both
/// defaulting to an empty string), `lastUpdate` and `version`; the manifest
/// title additionally becomes the chapter caption.
pub fn merge_chapter_manifest(
    chapter: &mut Value,
    manifest: &Value,
    base_url: &str,
) -> Result<(), GatewayError> {
    let Some(root) = chapter.as_object_mut() else {
        return Ok(());
    };

    if let Some(body) = root.get_mut("body").and_then(Value::as_object_mut) {
        if let Some(main) = manifest.get("main").and_then(Value::as_str) {
            let resolved = absolutize(main, base_url, "main")?;
            body.insert("main".into(), Value::String(resolved));
        }
        body.insert(
            "mimeType".into(),
            manifest.get("mimeType").cloned().unwrap_or(Value::Null),
        );
        body.insert(
            "info".into(),
            manifest.get("info").cloned().unwrap_or_else(|| json!("")),
        );
        body.insert(
            "title".into(),
            manifest.get("title").cloned().unwrap_or_else(|| json!("")),
        );
        for field in ["lastUpdate", "version"] {
            if let Some(value) = manifest.get(field) {
                body.insert(field.into(), value.clone());
            }
        }
    }

    if let Some(title) = manifest.get("title") {
        root.insert("caption".into(), title.clone());
    }
    Ok(())
}

/// Merge a package manifest into a popup. The manifest title is appended to
/// the popup title; `main` is rewritten into the content body; every other
/// manifest field is copied into the content body verbatim.
pub fn merge_popup_manifest(
    popup: &mut Value,
    manifest: &Value,
    base_url: &str,
) -> Result<(), GatewayError> {
    let Some(fields) = manifest.as_object() else {
        return Ok(());
    };
    let Some(root) = popup.as_object_mut() else {
        return Ok(());
    };

    for (field, value) in fields {
        match field.as_str() {
            "title" => {
                let existing = root
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let appended = value.as_str().unwrap_or_default();
                root.insert("title".into(), Value::String(format!("{existing}: {appended}")));
            }
            "main" => {
                if let Some(main) = value.as_str() {
                    let resolved = absolutize(main, base_url, "main")?;
                    if let Some(content) = root.get_mut("content").and_then(Value::as_object_mut) {
                        content.insert("main".into(), Value::String(resolved));
                    }
                }
            }
            other => {
                if let Some(content) = root.get_mut("content").and_then(Value::as_object_mut) {
                    content.insert(other.to_string(), value.clone());
                }
            }
        }
    }
    Ok(())
}

// ─── Resolution ───────────────────────────────────────────────────

/// Resolve the package reference of an assistance step. A manifest fetch
/// failure propagates as the operation's cause; a merge failure only skips
/// the remaining fields.
pub async fn resolve_assistance(
    source: &dyn ContentSource,
    mut step: Value,
    package_id: &str,
) -> Result<Value, GatewayError> {
    let manifest = source.manifest(package_id).await.inspect_err(|error| {
        warn!(package = package_id, %error, "content manifest fetch failed");
    })?;
    let base_url = source.base_url(package_id);
    if let Err(error) = merge_assistance_manifest(&mut step, &manifest, &base_url) {
        warn!(package = package_id, %error, "content manifest import failed");
    }
    Ok(step)
}

/// Resolve the package reference of a popup.
pub async fn resolve_popup(
    source: &dyn ContentSource,
    mut popup: Value,
    package_id: &str,
) -> Result<Value, GatewayError> {
    let manifest = source.manifest(package_id).await.inspect_err(|error| {
        warn!(package = package_id, %error, "content manifest fetch failed");
    })?;
    let base_url = source.base_url(package_id);
    if let Err(error) = merge_popup_manifest(&mut popup, &manifest, &base_url) {
        warn!(package = package_id, %error, "content manifest import failed");
    }
    Ok(popup)
}

/// Resolve every package-backed chapter of a learning object. Manifests are
/// fetched concurrently and collected with [`ValueAggregation`]; a chapter
/// whose fetch failed is forwarded unmerged.
pub async fn resolve_learning_object(
    source: Arc<dyn ContentSource>,
    mut learning_object: Value,
) -> Result<Value, GatewayError> {
    let package_ids: Vec<String> = learning_object
        .get("chapters")
        .and_then(Value::as_array)
        .map(|chapters| {
            chapters
                .iter()
                .filter_map(|chapter| chapter_package_id(chapter))
                .collect()
        })
        .unwrap_or_default();
    if package_ids.is_empty() {
        return Ok(learning_object);
    }

    let mut aggregation: ValueAggregation<String, Value> =
        ValueAggregation::new(package_ids.iter().cloned());
    let mut fetches = JoinSet::new();
    for package_id in package_ids {
        let source = Arc::clone(&source);
        fetches.spawn(async move {
            let manifest = source.manifest(&package_id).await;
            (package_id, manifest)
        });
    }
    let mut manifests = None;
    while let Some(joined) = fetches.join_next().await {
        if let Ok((package_id, result)) = joined {
            if let Some(map) = aggregation.complete(&package_id, result) {
                manifests = Some(map);
            }
        }
    }
    let Some(manifests) = manifests else {
        return Err(GatewayError::operation("Operation failed by unknown reason."));
    };

    if let Some(chapters) = learning_object
        .get_mut("chapters")
        .and_then(Value::as_array_mut)
    {
        for chapter in chapters {
            let Some(package_id) = chapter_package_id(chapter) else {
                continue;
            };
            match manifests.get(&package_id) {
                Some(Ok(manifest)) => {
                    let base_url = source.base_url(&package_id);
                    if let Err(error) = merge_chapter_manifest(chapter, manifest, &base_url) {
                        warn!(package = %package_id, %error, "content manifest import failed");
                    }
                }
                Some(Err(error)) => {
                    warn!(package = %package_id, %error, "content manifest fetch failed");
                }
                None => {}
            }
        }
    }
    Ok(learning_object)
}

fn chapter_package_id(chapter: &Value) -> Option<String> {
    let body = chapter.get("body")?;
    if body.get("type").and_then(Value::as_str) == Some("package") {
        body.get("packageId").and_then(Value::as_str).map(String::from)
    } else {
        None
    }
}

// ─── Tests ────────────────────────────────────────────────────────
