//! Credential store interface and an in-memory implementation.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::context::CredentialRecord;
use crate::error::CredentialStoreError;

/// External service that resolves a raw API key to its owner record.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Resolve `raw_key`. `Ok(None)` means the key is unknown.
    async fn get_api_key(
        &self,
        raw_key: &str,
    ) -> Result<Option<CredentialRecord>, CredentialStoreError>;

    /// Whether the store is reachable and serving.
    async fn health_check(&self) -> bool;
}

/// SHA-256 hex digest of a raw API key. Credential records are indexed by
/// this value so raw keys are never persisted.
pub fn hash_api_key(raw_key: &str) -> String {
    hex::encode(Sha256::digest(raw_key.as_bytes()))
}

/// Credential store backed by a fixed set of records.
///
/// Records are indexed by their `hashed_key`.
#[derive(Debug, Default, Clone)]
pub struct StaticCredentialStore {
    records: HashMap<String, CredentialRecord>,
}

impl StaticCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from records that all carry a `hashed_key`.
    pub fn from_records(
        records: impl IntoIterator<Item = CredentialRecord>,
    ) -> Result<Self, CredentialStoreError> {
        let mut store = Self::new();
        for record in records {
            let hashed = record.hashed_key.clone().ok_or_else(|| {
                CredentialStoreError::Malformed(format!(
                    "record {} has no hashedKey",
                    record.id
                ))
            })?;
            store.records.insert(hashed.to_ascii_lowercase(), record);
        }
        Ok(store)
    }

    /// Parse a JSON array of credential records.
    pub fn from_json(json: &str) -> Result<Self, CredentialStoreError> {
        let records: Vec<CredentialRecord> = serde_json::from_str(json)
            .map_err(|e| CredentialStoreError::Malformed(e.to_string()))?;
        Self::from_records(records)
    }

    /// Register `record` under the hash of `raw_key`.
    pub fn insert(&mut self, raw_key: &str, mut record: CredentialRecord) {
        let hashed = hash_api_key(raw_key);
        record.hashed_key = Some(hashed.clone());
        self.records.insert(hashed, record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CredentialStore for StaticCredentialStore {
    async fn get_api_key(
        &self,
        raw_key: &str,
    ) -> Result<Option<CredentialRecord>, CredentialStoreError> {
        Ok(self.records.get(&hash_api_key(raw_key)).cloned())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "mcp_live_0123456789abcdef0123456789abcdef";

    fn record(id: &str) -> CredentialRecord {
        CredentialRecord {
            id: id.to_string(),
            tenant_id: "acme".to_string(),
            scopes: vec![],
            rate_limit: None,
            metadata: None,
            hashed_key: None,
        }
    }

    #[test]
    fn test_hash_is_sha256_hex() {
        assert_eq!(
            hash_api_key("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_lookup_by_raw_key() {
        let mut store = StaticCredentialStore::new();
        store.insert(KEY, record("key-1"));

        let found = store.get_api_key(KEY).await.unwrap().unwrap();
        assert_eq!(found.id, "key-1");
        assert_eq!(found.hashed_key.as_deref(), Some(hash_api_key(KEY).as_str()));
        assert!(store.get_api_key("unknown-key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_from_json() {
        let json = format!(
            r#"[{{"id":"key-2","tenantId":"globex","scopes":["admin"],"hashedKey":"{}"}}]"#,
            hash_api_key(KEY).to_uppercase()
        );
        let store = StaticCredentialStore::from_json(&json).unwrap();
        assert_eq!(store.len(), 1);
        let found = store.get_api_key(KEY).await.unwrap().unwrap();
        assert_eq!(found.tenant_id, "globex");
    }

    #[test]
    fn test_from_records_requires_hash() {
        let err = StaticCredentialStore::from_records(vec![record("key-3")]).unwrap_err();
        assert!(matches!(err, CredentialStoreError::Malformed(_)));
    }
}
