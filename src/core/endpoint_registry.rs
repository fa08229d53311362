//! File-backed registry of dynamic endpoints.
//!
//! Every endpoint is a pair of files in the routes directory named by its
//! slug: `<slug>.json` holds the public definition and `<slug>.handler` the
//! handler source served at `/api/<slug>`. Mutations only touch the files;
//! the live route table is built once at boot, so callers must tell users to
//! restart after a change.
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;

use crate::{
    core::error::{GatewayError, GatewayResult},
    utils::json_file,
};

pub const DEFINITION_EXTENSION: &str = "json";
pub const HANDLER_EXTENSION: &str = "handler";

/// Slugs that would shadow a built-in route under `/api/`.
pub const RESERVED_SLUGS: &[&str] = &[
    "admin",
    "get-new-api-key",
    "list-endpoints",
    "server-metrics",
    "status-monitoring",
];

/// Handler written for freshly created endpoints.
pub const STUB_HANDLER: &str = r#"{
  "type": "static",
  "status": 501,
  "body": {
    "success": false,
    "message": "Endpoint not implemented yet."
  }
}
"#;

static SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s_]+").expect("valid regex"));
static DISALLOWED: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9-]").expect("valid regex"));
static REPEATED_HYPHENS: Lazy<Regex> = Lazy::new(|| Regex::new(r"-{2,}").expect("valid regex"));

/// Normalize free-form input to a slug matching `[a-z0-9-]+`.
///
/// Whitespace and underscores become hyphens, other characters outside the
/// alphabet are dropped, hyphen runs collapse and edge hyphens are trimmed.
/// Returns `None` when nothing usable remains.
pub fn normalize_slug(input: &str) -> Option<String> {
    let lowered = input.trim().to_lowercase();
    let hyphenated = SEPARATORS.replace_all(&lowered, "-");
    let filtered = DISALLOWED.replace_all(&hyphenated, "");
    let collapsed = REPEATED_HYPHENS.replace_all(&filtered, "-");
    let slug = collapsed.trim_matches('-');
    (!slug.is_empty()).then(|| slug.to_string())
}

pub fn is_reserved(slug: &str) -> bool {
    RESERVED_SLUGS.contains(&slug)
}

fn default_response() -> Value {
    json!({ "success": true })
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Public documentation for one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointDefinition {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub parameters: Vec<Value>,
    #[serde(default)]
    pub curl: String,
    #[serde(default = "default_response")]
    pub response: Value,
    #[serde(default, skip_serializing_if = "is_false")]
    pub hidden: bool,
}

/// Admin input for creating an endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewEndpoint {
    pub name: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub method: Option<String>,
    pub path: Option<String>,
    pub curl: Option<String>,
    pub response: Option<Value>,
    pub parameters: Option<Vec<Value>>,
}

fn required(field: Option<String>) -> Option<String> {
    field.filter(|v| !v.trim().is_empty())
}

impl NewEndpoint {
    /// Split into the slug input and the definition to persist.
    fn into_definition(self) -> GatewayResult<(String, EndpointDefinition)> {
        let (Some(name), Some(title), Some(method), Some(path)) = (
            required(self.name),
            required(self.title),
            required(self.method),
            required(self.path),
        ) else {
            return Err(GatewayError::Validation(
                "Fields name, title, method, path are required.".to_string(),
            ));
        };

        let definition = EndpointDefinition {
            title,
            description: self.description.unwrap_or_default(),
            method: method.to_uppercase(),
            path,
            parameters: self.parameters.unwrap_or_default(),
            curl: self.curl.unwrap_or_default(),
            response: self.response.unwrap_or_else(default_response),
            hidden: false,
        };
        Ok((name, definition))
    }
}

/// One row of [`EndpointRegistry::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointListing {
    pub name: String,
    pub hidden: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A handler source discovered at boot.
#[derive(Debug, Clone)]
pub struct HandlerSource {
    pub slug: String,
    pub path: PathBuf,
    pub source: String,
}

#[derive(Debug)]
pub struct EndpointRegistry {
    routes_dir: PathBuf,
    // Serializes check-then-write sequences across admin requests.
    write_lock: Mutex<()>,
}

impl EndpointRegistry {
    /// Open the registry, creating the routes directory if needed.
    pub async fn open(routes_dir: impl Into<PathBuf>) -> GatewayResult<Self> {
        let routes_dir = routes_dir.into();
        tokio::fs::create_dir_all(&routes_dir)
            .await
            .map_err(|e| GatewayError::persistence("Failed to create routes directory.", e))?;
        Ok(Self {
            routes_dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn routes_dir(&self) -> &Path {
        &self.routes_dir
    }

    fn definition_path(&self, slug: &str) -> PathBuf {
        self.routes_dir.join(format!("{slug}.{DEFINITION_EXTENSION}"))
    }

    fn handler_path(&self, slug: &str) -> PathBuf {
        self.routes_dir.join(format!("{slug}.{HANDLER_EXTENSION}"))
    }

    fn slug_from_param(raw: &str) -> GatewayResult<String> {
        normalize_slug(raw)
            .ok_or_else(|| GatewayError::Validation("Invalid endpoint name.".to_string()))
    }

    /// Enumerate definitions sorted by slug. Unparseable files are reported
    /// with an error marker instead of failing the listing.
    pub async fn list(&self) -> GatewayResult<Vec<EndpointListing>> {
        let mut entries = tokio::fs::read_dir(&self.routes_dir)
            .await
            .map_err(|e| GatewayError::persistence("Failed to read endpoints directory.", e))?;

        let mut listings = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| GatewayError::persistence("Failed to read endpoints directory.", e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DEFINITION_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let parsed = tokio::fs::read(&path)
                .await
                .ok()
                .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok());
            let listing = match parsed {
                Some(config) => EndpointListing {
                    name: name.to_string(),
                    hidden: config.get("hidden").and_then(Value::as_bool) == Some(true),
                    error: None,
                },
                None => {
                    tracing::warn!(path = %path.display(), "Endpoint definition is not valid JSON");
                    EndpointListing {
                        name: name.to_string(),
                        hidden: false,
                        error: Some("Invalid JSON".to_string()),
                    }
                }
            };
            listings.push(listing);
        }

        listings.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listings)
    }

    /// Flip the `hidden` flag of a definition and return the new state.
    pub async fn toggle_visibility(&self, raw_slug: &str) -> GatewayResult<bool> {
        let slug = Self::slug_from_param(raw_slug)?;
        let path = self.definition_path(&slug);
        let _guard = self.write_lock.lock().await;

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(GatewayError::NotFound(
                    "Endpoint configuration file not found.".to_string(),
                ));
            }
            Err(e) => return Err(GatewayError::persistence("Failed to read endpoint file.", e)),
        };
        let mut config: Value = serde_json::from_slice(&bytes)
            .map_err(|e| GatewayError::serialization("Failed to parse endpoint file.", e))?;
        let Some(object) = config.as_object_mut() else {
            return Err(GatewayError::Validation(
                "Endpoint definition is not a JSON object.".to_string(),
            ));
        };

        let hidden = !object.get("hidden").and_then(Value::as_bool).unwrap_or(false);
        object.insert("hidden".to_string(), Value::Bool(hidden));

        json_file::write_json_pretty(&path, &config)
            .await
            .map_err(|e| GatewayError::persistence("Failed to modify endpoint file.", e))?;

        tracing::info!(slug, hidden, "Toggled endpoint visibility");
        crate::metrics::increment_registry_mutation("toggle_endpoint");
        Ok(hidden)
    }

    /// Create the definition and stub handler for a new endpoint. Returns the
    /// normalized slug.
    pub async fn create(&self, input: NewEndpoint) -> GatewayResult<String> {
        let (name, definition) = input.into_definition()?;
        let slug = normalize_slug(&name)
            .ok_or_else(|| GatewayError::Validation("Invalid endpoint name.".to_string()))?;
        if is_reserved(&slug) {
            return Err(GatewayError::Conflict(format!(
                "'{slug}' is reserved by a built-in route."
            )));
        }

        let definition_path = self.definition_path(&slug);
        let handler_path = self.handler_path(&slug);
        let _guard = self.write_lock.lock().await;

        if json_file::exists(&definition_path).await || json_file::exists(&handler_path).await {
            return Err(GatewayError::Conflict(
                "Endpoint with this name already exists.".to_string(),
            ));
        }

        json_file::write_json_pretty(&definition_path, &definition)
            .await
            .map_err(|e| GatewayError::persistence("Failed to write endpoint files.", e))?;
        if let Err(e) = json_file::write_atomic(&handler_path, STUB_HANDLER.as_bytes()).await {
            // Leave no half-created pair behind.
            let _ = tokio::fs::remove_file(&definition_path).await;
            return Err(GatewayError::persistence("Failed to write endpoint files.", e));
        }

        tracing::info!(slug, "Created endpoint");
        crate::metrics::increment_registry_mutation("create_endpoint");
        Ok(slug)
    }

    /// Remove both files of an endpoint. Returns the normalized slug.
    pub async fn delete(&self, raw_slug: &str) -> GatewayResult<String> {
        let slug = Self::slug_from_param(raw_slug)?;
        let definition_path = self.definition_path(&slug);
        let handler_path = self.handler_path(&slug);
        let _guard = self.write_lock.lock().await;

        let has_definition = json_file::exists(&definition_path).await;
        let has_handler = json_file::exists(&handler_path).await;
        if !has_definition && !has_handler {
            return Err(GatewayError::NotFound("Endpoint not found.".to_string()));
        }

        let mut removed = Vec::new();
        for (present, path) in [(has_definition, &definition_path), (has_handler, &handler_path)] {
            if !present {
                continue;
            }
            if let Err(e) = tokio::fs::remove_file(path).await {
                if !removed.is_empty() {
                    tracing::error!(
                        slug,
                        removed = ?removed,
                        surviving = %path.display(),
                        error = %e,
                        "Endpoint only partially deleted"
                    );
                }
                return Err(GatewayError::persistence("Failed to delete endpoint files.", e));
            }
            removed.push(path.display().to_string());
        }

        tracing::info!(slug, "Deleted endpoint");
        crate::metrics::increment_registry_mutation("delete_endpoint");
        Ok(slug)
    }

    pub async fn get_script(&self, raw_slug: &str) -> GatewayResult<String> {
        let slug = Self::slug_from_param(raw_slug)?;
        match tokio::fs::read_to_string(self.handler_path(&slug)).await {
            Ok(script) => Ok(script),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(GatewayError::NotFound("Script file not found.".to_string()))
            }
            Err(e) => Err(GatewayError::persistence("Failed to read script file.", e)),
        }
    }

    /// Overwrite an existing handler source. Returns the normalized slug.
    pub async fn save_script(&self, raw_slug: &str, script: &str) -> GatewayResult<String> {
        let slug = Self::slug_from_param(raw_slug)?;
        let path = self.handler_path(&slug);
        let _guard = self.write_lock.lock().await;

        if !json_file::exists(&path).await {
            return Err(GatewayError::NotFound("Script file not found.".to_string()));
        }
        json_file::write_atomic(&path, script.as_bytes())
            .await
            .map_err(|e| GatewayError::persistence("Failed to save script file.", e))?;

        tracing::info!(slug, bytes = script.len(), "Saved endpoint handler");
        crate::metrics::increment_registry_mutation("save_script");
        Ok(slug)
    }

    pub async fn get_config(&self, raw_slug: &str) -> GatewayResult<Value> {
        let slug = Self::slug_from_param(raw_slug)?;
        let bytes = match tokio::fs::read(self.definition_path(&slug)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(GatewayError::NotFound(
                    "JSON config file not found.".to_string(),
                ));
            }
            Err(e) => {
                return Err(GatewayError::persistence(
                    "Failed to read or parse JSON file.",
                    e,
                ));
            }
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| GatewayError::serialization("Failed to read or parse JSON file.", e))
    }

    /// Replace a definition with `content`. The content is parsed first; on
    /// any failure the file on disk is left untouched.
    pub async fn save_config(&self, raw_slug: &str, content: &str) -> GatewayResult<String> {
        let slug = Self::slug_from_param(raw_slug)?;
        let parsed: Value = serde_json::from_str(content)
            .map_err(|_| GatewayError::Validation("Invalid JSON format.".to_string()))?;

        let path = self.definition_path(&slug);
        let _guard = self.write_lock.lock().await;
        if !json_file::exists(&path).await {
            return Err(GatewayError::NotFound("JSON file not found.".to_string()));
        }
        json_file::write_json_pretty(&path, &parsed)
            .await
            .map_err(|e| GatewayError::persistence("Failed to save JSON file.", e))?;

        tracing::info!(slug, "Saved endpoint definition");
        crate::metrics::increment_registry_mutation("save_config");
        Ok(slug)
    }

    /// Read every handler source in the routes directory, sorted by slug.
    /// Unreadable files are logged and skipped.
    pub async fn handler_sources(&self) -> GatewayResult<Vec<HandlerSource>> {
        let mut entries = tokio::fs::read_dir(&self.routes_dir)
            .await
            .map_err(|e| GatewayError::persistence("Could not read routes directory.", e))?;

        let mut sources = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Stopped scanning routes directory");
                    break;
                }
            };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(HANDLER_EXTENSION) {
                continue;
            }
            let Some(slug) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            match tokio::fs::read_to_string(&path).await {
                Ok(source) => sources.push(HandlerSource { slug, path, source }),
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Failed to read handler source");
                }
            }
        }

        sources.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(sources)
    }
}
