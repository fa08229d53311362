//! Status-page monitor targets kept as one JSON array file.
use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::{
    core::error::{GatewayError, GatewayResult},
    utils::json_file::{self, LoadOutcome},
};

/// How the status page probes a target. Unknown kinds are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MonitorType {
    Get,
    PostJson,
    Other(String),
}

impl From<String> for MonitorType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "GET" => MonitorType::Get,
            "POST_JSON" => MonitorType::PostJson,
            _ => MonitorType::Other(value),
        }
    }
}

impl From<MonitorType> for String {
    fn from(value: MonitorType) -> Self {
        value.to_string()
    }
}

impl fmt::Display for MonitorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorType::Get => f.write_str("GET"),
            MonitorType::PostJson => f.write_str("POST_JSON"),
            MonitorType::Other(other) => f.write_str(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoredEndpoint {
    pub name: String,
    pub test_url: String,
    #[serde(rename = "type")]
    pub kind: MonitorType,
    #[serde(default)]
    pub request_body: String,
    #[serde(default)]
    pub hidden: bool,
}

/// Body of the add and edit admin calls. `requestBody` may arrive as a JSON
/// string or as inline JSON, which is stored serialized.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorUpsert {
    pub name: Option<String>,
    pub test_url: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub request_body: Option<Value>,
}

impl MonitorUpsert {
    fn request_body_text(&self) -> String {
        match &self.request_body {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

fn validate_body(kind: &MonitorType, body: &str) -> GatewayResult<()> {
    if *kind == MonitorType::PostJson
        && !body.is_empty()
        && serde_json::from_str::<Value>(body).is_err()
    {
        return Err(GatewayError::Validation(
            "requestBody must be valid JSON for POST_JSON type.".to_string(),
        ));
    }
    Ok(())
}

fn not_found() -> GatewayError {
    GatewayError::NotFound("Status endpoint not found.".to_string())
}

#[derive(Debug)]
pub struct MonitorRegistry {
    path: PathBuf,
    entries: Mutex<Vec<MonitoredEndpoint>>,
}

impl MonitorRegistry {
    /// Load the monitor list, creating the file (and parents) when missing.
    /// Unreadable files degrade to an empty list.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match json_file::load_json_array::<MonitoredEndpoint>(&path).await {
            LoadOutcome::Loaded(entries) => {
                tracing::info!(path = %path.display(), count = entries.len(), "Loaded monitored endpoints");
                entries
            }
            LoadOutcome::Created => {
                tracing::info!(path = %path.display(), "Created empty monitored endpoint list");
                Vec::new()
            }
            LoadOutcome::Degraded(reason) => {
                tracing::warn!(
                    path = %path.display(),
                    %reason,
                    "Monitored endpoint list unusable, continuing with an empty list"
                );
                Vec::new()
            }
        };
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    /// Entries that are not hidden.
    pub async fn list(&self) -> Vec<MonitoredEndpoint> {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|e| !e.hidden)
            .cloned()
            .collect()
    }

    pub async fn list_all(&self) -> Vec<MonitoredEndpoint> {
        self.entries.lock().await.clone()
    }

    pub async fn add(&self, input: MonitorUpsert) -> GatewayResult<MonitoredEndpoint> {
        let (Some(name), Some(test_url), Some(kind)) = (
            non_empty(&input.name),
            non_empty(&input.test_url),
            non_empty(&input.kind),
        ) else {
            return Err(GatewayError::Validation(
                "Name, testUrl, and type are required.".to_string(),
            ));
        };

        let kind = MonitorType::from(kind.to_string());
        let request_body = input.request_body_text();
        validate_body(&kind, &request_body)?;

        let mut entries = self.entries.lock().await;
        if entries.iter().any(|e| e.name == name) {
            return Err(GatewayError::Conflict(
                "Endpoint with this name already exists.".to_string(),
            ));
        }

        let endpoint = MonitoredEndpoint {
            name: name.to_string(),
            test_url: test_url.to_string(),
            kind,
            request_body,
            hidden: false,
        };
        entries.push(endpoint.clone());
        self.persist(&entries).await;

        tracing::info!(name = %endpoint.name, "Added monitored endpoint");
        crate::metrics::increment_registry_mutation("add_monitor");
        Ok(endpoint)
    }

    /// Merge `input` over the entry named `name`. `requestBody` is always
    /// replaced, defaulting to empty.
    pub async fn edit(&self, name: &str, input: MonitorUpsert) -> GatewayResult<MonitoredEndpoint> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(not_found)?;

        let kind = non_empty(&input.kind)
            .map(|k| MonitorType::from(k.to_string()))
            .unwrap_or_else(|| entry.kind.clone());
        let request_body = input.request_body_text();
        validate_body(&kind, &request_body)?;

        if let Some(test_url) = non_empty(&input.test_url) {
            entry.test_url = test_url.to_string();
        }
        entry.kind = kind;
        entry.request_body = request_body;
        let updated = entry.clone();
        self.persist(&entries).await;

        tracing::info!(name, "Updated monitored endpoint");
        crate::metrics::increment_registry_mutation("edit_monitor");
        Ok(updated)
    }

    pub async fn toggle_visibility(&self, name: &str) -> GatewayResult<bool> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(not_found)?;
        entry.hidden = !entry.hidden;
        let hidden = entry.hidden;
        self.persist(&entries).await;

        tracing::info!(name, hidden, "Toggled monitored endpoint visibility");
        crate::metrics::increment_registry_mutation("toggle_monitor");
        Ok(hidden)
    }

    pub async fn delete(&self, name: &str) -> GatewayResult<()> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| e.name != name);
        if entries.len() == before {
            return Err(not_found());
        }
        self.persist(&entries).await;

        tracing::info!(name, "Deleted monitored endpoint");
        crate::metrics::increment_registry_mutation("delete_monitor");
        Ok(())
    }

    async fn persist(&self, entries: &[MonitoredEndpoint]) {
        if let Err(e) = json_file::write_json_pretty(&self.path, entries).await {
            tracing::error!(path = %self.path.display(), error = %e, "Failed to save monitored endpoints");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    async fn open(dir: &TempDir) -> MonitorRegistry {
        MonitorRegistry::load(dir.path().join("data/monitored.json")).await
    }

    fn upsert(name: &str, kind: &str, body: Option<Value>) -> MonitorUpsert {
        MonitorUpsert {
            name: Some(name.to_string()),
            test_url: Some("https://example.com/health".to_string()),
            kind: Some(kind.to_string()),
            request_body: body,
        }
    }

    #[test]
    fn test_monitor_type_strings() {
        let parsed: MonitorType = serde_json::from_value(json!("POST_JSON")).unwrap();
        assert_eq!(parsed, MonitorType::PostJson);
        let other: MonitorType = serde_json::from_value(json!("HEAD")).unwrap();
        assert_eq!(serde_json::to_value(&other).unwrap(), json!("HEAD"));
    }

    #[tokio::test]
    async fn test_add_rejects_duplicates_and_missing_fields() {
        let dir = TempDir::new().unwrap();
        let registry = open(&dir).await;

        registry.add(upsert("api", "GET", None)).await.unwrap();
        let dup = registry.add(upsert("api", "GET", None)).await.unwrap_err();
        assert!(matches!(dup, GatewayError::Conflict(_)));

        let missing = registry
            .add(MonitorUpsert {
                test_url: None,
                ..upsert("other", "GET", None)
            })
            .await
            .unwrap_err();
        assert!(matches!(missing, GatewayError::Validation(_)));
    }

    #[tokio::test]
    async fn test_request_body_validated_only_for_post_json() {
        let dir = TempDir::new().unwrap();
        let registry = open(&dir).await;

        let bad = registry
            .add(upsert("post", "POST_JSON", Some(json!("{oops"))))
            .await
            .unwrap_err();
        assert!(matches!(bad, GatewayError::Validation(_)));

        registry
            .add(upsert("get", "GET", Some(json!("{oops"))))
            .await
            .unwrap();

        let inline = registry
            .add(upsert("inline", "POST_JSON", Some(json!({"ping": true}))))
            .await
            .unwrap();
        assert_eq!(inline.request_body, r#"{"ping":true}"#);
    }

    #[tokio::test]
    async fn test_edit_merges_and_overwrites_body() {
        let dir = TempDir::new().unwrap();
        let registry = open(&dir).await;
        registry
            .add(upsert("api", "POST_JSON", Some(json!("{\"a\":1}"))))
            .await
            .unwrap();

        let edited = registry
            .edit(
                "api",
                MonitorUpsert {
                    test_url: Some("https://example.com/v2".to_string()),
                    ..MonitorUpsert::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.test_url, "https://example.com/v2");
        assert_eq!(edited.kind, MonitorType::PostJson);
        assert_eq!(edited.request_body, "");

        // Validation uses the stored type when none is supplied.
        let bad = registry
            .edit(
                "api",
                MonitorUpsert {
                    request_body: Some(json!("nope")),
                    ..MonitorUpsert::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(bad, GatewayError::Validation(_)));

        let missing = registry
            .edit("ghost", MonitorUpsert::default())
            .await
            .unwrap_err();
        assert!(matches!(missing, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_visibility_filters_public_list_and_persists() {
        let dir = TempDir::new().unwrap();
        {
            let registry = open(&dir).await;
            registry.add(upsert("a", "GET", None)).await.unwrap();
            registry.add(upsert("b", "GET", None)).await.unwrap();
            assert!(registry.toggle_visibility("a").await.unwrap());

            assert_eq!(registry.list().await.len(), 1);
            assert_eq!(registry.list_all().await.len(), 2);
        }

        let reopened = open(&dir).await;
        assert_eq!(reopened.list().await[0].name, "b");
        reopened.delete("a").await.unwrap();
        assert!(matches!(
            reopened.delete("a").await.unwrap_err(),
            GatewayError::NotFound(_)
        ));
    }
}
