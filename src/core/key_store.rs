//! Identity-keyed API key store.
//!
//! Records live in memory behind a single async mutex and are mirrored to a
//! JSON array that is rewritten in full after every mutation. The mutex is
//! held across the check-then-insert of [`KeyStore::lookup_or_create`] and
//! across the rewrite, so concurrent callers can neither mint two keys for one
//! identity nor interleave partial tables on disk.
//!
//! Privileged keys (master and status page) come from configuration and are
//! never written to the table.
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use rand::{Rng, distr::Alphanumeric};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    config::ApiKeyConfig,
    core::error::{GatewayError, GatewayResult},
    utils::json_file::{self, LoadOutcome},
};

/// One issued key. Field names match the on-disk format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyRecord {
    pub api_key: String,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "ipAddress")]
    pub identity: String,
    pub last_used: DateTime<Utc>,
    #[serde(default)]
    pub usage_count: u64,
}

/// Result of [`KeyStore::lookup_or_create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedKey {
    pub record: ApiKeyRecord,
    /// `false` when an existing record was returned.
    pub created: bool,
}

/// A caller that passed authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedCaller {
    pub api_key: String,
    pub privileged: bool,
}

/// Keys configured out of band that bypass quota and ownership checks.
#[derive(Debug, Clone)]
pub struct PrivilegedKeys {
    master: String,
    status_page: Option<String>,
}

impl PrivilegedKeys {
    pub fn new(master: impl Into<String>, status_page: Option<String>) -> Self {
        Self {
            master: master.into(),
            status_page: status_page.filter(|k| !k.is_empty()),
        }
    }

    pub fn is_master(&self, key: &str) -> bool {
        key == self.master
    }

    pub fn contains(&self, key: &str) -> bool {
        self.is_master(key) || self.status_page.as_deref() == Some(key)
    }
}

/// Produces `prefix` followed by characters drawn uniformly from `[A-Za-z0-9]`.
///
/// Uses the thread-local RNG; keys are bearer tokens, not derived secrets.
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    prefix: String,
    random_length: usize,
}

impl KeyGenerator {
    pub fn new(prefix: impl Into<String>, random_length: usize) -> Self {
        Self {
            prefix: prefix.into(),
            random_length,
        }
    }

    pub fn from_config(config: &ApiKeyConfig) -> Self {
        Self::new(config.prefix.clone(), config.random_length)
    }

    pub fn generate(&self) -> String {
        let suffix: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(self.random_length)
            .map(char::from)
            .collect();
        format!("{}{suffix}", self.prefix)
    }
}

#[derive(Debug, Default)]
struct KeyTable {
    records: Vec<ApiKeyRecord>,
    by_key: HashMap<String, usize>,
    by_identity: HashMap<String, usize>,
}

impl KeyTable {
    fn from_records(records: Vec<ApiKeyRecord>) -> Self {
        let mut table = Self::default();
        for record in records {
            if table.by_key.contains_key(&record.api_key) {
                tracing::warn!("Skipping duplicate API key record in store");
                continue;
            }
            table.insert(record);
        }
        table
    }

    fn insert(&mut self, record: ApiKeyRecord) {
        let index = self.records.len();
        self.by_key.insert(record.api_key.clone(), index);
        // First record wins if a legacy file holds several keys for one identity.
        self.by_identity
            .entry(record.identity.clone())
            .or_insert(index);
        self.records.push(record);
    }

    fn by_identity(&self, identity: &str) -> Option<&ApiKeyRecord> {
        self.by_identity.get(identity).map(|&i| &self.records[i])
    }

    fn by_key_mut(&mut self, key: &str) -> Option<&mut ApiKeyRecord> {
        let index = *self.by_key.get(key)?;
        self.records.get_mut(index)
    }
}

/// Store of issued keys backed by a JSON array file.
#[derive(Debug)]
pub struct KeyStore {
    path: PathBuf,
    table: Mutex<KeyTable>,
    generator: KeyGenerator,
    privileged: PrivilegedKeys,
}

impl KeyStore {
    /// Load the store from `path`. A missing file is created empty; an
    /// unreadable or corrupt one is logged and the store starts empty.
    pub async fn load(
        path: impl Into<PathBuf>,
        generator: KeyGenerator,
        privileged: PrivilegedKeys,
    ) -> Self {
        let path = path.into();
        let records = match json_file::load_json_array::<ApiKeyRecord>(&path).await {
            LoadOutcome::Loaded(records) => {
                tracing::info!(path = %path.display(), count = records.len(), "Loaded API keys");
                records
            }
            LoadOutcome::Created => {
                tracing::info!(path = %path.display(), "Created empty API key store");
                Vec::new()
            }
            LoadOutcome::Degraded(reason) => {
                tracing::warn!(
                    path = %path.display(),
                    %reason,
                    "API key store unusable, continuing with an empty table"
                );
                Vec::new()
            }
        };

        Self {
            path,
            table: Mutex::new(KeyTable::from_records(records)),
            generator,
            privileged,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return the key already issued to `identity`, or mint and persist one.
    pub async fn lookup_or_create(&self, identity: &str) -> IssuedKey {
        let mut table = self.table.lock().await;

        if let Some(existing) = table.by_identity(identity) {
            return IssuedKey {
                record: existing.clone(),
                created: false,
            };
        }

        let api_key = loop {
            let candidate = self.generator.generate();
            if !table.by_key.contains_key(&candidate) && !self.privileged.contains(&candidate) {
                break candidate;
            }
        };

        let now = Utc::now();
        let record = ApiKeyRecord {
            api_key,
            created_at: now,
            identity: identity.to_string(),
            last_used: now,
            usage_count: 0,
        };
        table.insert(record.clone());
        self.persist(&table).await;

        tracing::info!(identity, "Issued new API key");
        crate::metrics::increment_api_keys_issued();

        IssuedKey {
            record,
            created: true,
        }
    }

    /// Bump `usageCount` and `lastUsed` for `key`. Returns `false` when the
    /// key is not in the table.
    pub async fn record_usage(&self, key: &str) -> bool {
        let mut table = self.table.lock().await;
        let Some(record) = table.by_key_mut(key) else {
            return false;
        };
        record.usage_count += 1;
        record.last_used = Utc::now();
        self.persist(&table).await;
        true
    }

    pub fn is_privileged(&self, key: &str) -> bool {
        self.privileged.contains(key)
    }

    pub fn is_master(&self, key: &str) -> bool {
        self.privileged.is_master(key)
    }

    /// Authenticate a presented credential, recording usage for stored keys.
    pub async fn authenticate(&self, presented: Option<&str>) -> GatewayResult<AuthenticatedCaller> {
        let Some(key) = presented.filter(|k| !k.is_empty()) else {
            return Err(GatewayError::Unauthenticated(
                "Authentication failed: API Key is missing.".to_string(),
            ));
        };

        let privileged = self.is_privileged(key);
        if self.record_usage(key).await || privileged {
            return Ok(AuthenticatedCaller {
                api_key: key.to_string(),
                privileged,
            });
        }

        Err(GatewayError::Forbidden(
            "Authentication failed: Invalid API Key.".to_string(),
        ))
    }

    pub async fn get(&self, key: &str) -> Option<ApiKeyRecord> {
        let table = self.table.lock().await;
        table.by_key.get(key).map(|&i| table.records[i].clone())
    }

    pub async fn len(&self) -> usize {
        self.table.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    // Write failures leave the in-memory table authoritative until the next
    // successful rewrite.
    async fn persist(&self, table: &KeyTable) {
        if let Err(e) = json_file::write_json_pretty(&self.path, &table.records).await {
            tracing::error!(path = %self.path.display(), error = %e, "Failed to save API keys");
        }
    }
}
