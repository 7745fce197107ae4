//! Store interface — CRUD for the four credentialed entities, with
//! transparent encryption of secrets at the adapter boundary.
//!
//! The request pipeline depends only on the [`Store`] trait, never on a
//! concrete backend. [`sqlite`] ships the one adapter this crate provides;
//! any store satisfying the trait (embedded, SQL, document) works.

pub mod sqlite;

use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::DbType;

/// Open the store backend named by `db_type`. Only `sqlite` has a shipped
/// adapter; any other recognized backend fails fast here rather than at
/// config-parse time, so admin tooling targeting those backends can still
/// express the intent without the proxy itself pretending to support it.
pub fn open(db_type: DbType, dsn: &str, encryption_key: String) -> Result<Box<dyn Store>> {
    match db_type {
        DbType::Sqlite => {
            let store = sqlite::SqliteStore::open(Path::new(dsn), encryption_key)
                .context("failed to open sqlite store")?;
            Ok(Box::new(store))
        }
        DbType::Postgres => bail!("unsupported backend: postgres has no shipped store adapter"),
        DbType::Mssql => bail!("unsupported backend: mssql has no shipped store adapter"),
        DbType::Mongodb => bail!("unsupported backend: mongodb has no shipped store adapter"),
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("storage error: {0}")]
    Storage(String),
}

/// Credentials to one provider account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub endpoint: String,
    /// Plaintext when held in memory; encrypted at rest by the adapter.
    pub api_key: String,
    pub model: String,
    pub deployment_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One model exposed by a [`Connection`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderModel {
    pub id: String,
    pub connection_id: String,
    pub name: String,
    pub remote_model: String,
    pub deployment_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The credential a client presents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualKey {
    pub id: String,
    pub name: String,
    /// Plaintext when held in memory; encrypted at rest by the adapter.
    pub key: String,
    pub key_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The authorization + rate-limit edge between a virtual key and a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualKeyAssignment {
    pub id: String,
    pub virtual_key_id: String,
    pub provider_model_id: String,
    pub model_alias: String,
    pub rate_limit_tps: f64,
    pub rate_limit_tokens: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The capability set the request pipeline (and the administrative CLI,
/// out of scope here) consumes. Any backend satisfying this trait works.
#[async_trait]
pub trait Store: Send + Sync {
    async fn save_connection(&self, c: &Connection) -> Result<(), StoreError>;
    async fn get_connection(&self, id: &str) -> Result<Connection, StoreError>;
    async fn list_connections(&self) -> Result<Vec<Connection>, StoreError>;
    async fn delete_connection(&self, id: &str) -> Result<(), StoreError>;

    async fn save_provider_model(&self, m: &ProviderModel) -> Result<(), StoreError>;
    async fn get_provider_model(&self, id: &str) -> Result<ProviderModel, StoreError>;
    async fn list_provider_models(
        &self,
        connection_id: Option<&str>,
    ) -> Result<Vec<ProviderModel>, StoreError>;
    async fn delete_provider_model(&self, id: &str) -> Result<(), StoreError>;

    async fn save_virtual_key(&self, k: &VirtualKey) -> Result<(), StoreError>;
    async fn get_virtual_key(&self, id: &str) -> Result<VirtualKey, StoreError>;
    /// Lookup by the plaintext token a client presents: hashes it and
    /// queries by `key_hash`.
    async fn get_virtual_key_by_plaintext(&self, plaintext: &str) -> Result<VirtualKey, StoreError>;
    async fn list_virtual_keys(&self) -> Result<Vec<VirtualKey>, StoreError>;
    async fn delete_virtual_key(&self, id: &str) -> Result<(), StoreError>;

    async fn save_assignment(&self, a: &VirtualKeyAssignment) -> Result<(), StoreError>;
    async fn get_assignment(
        &self,
        virtual_key_id: &str,
        model_alias: &str,
    ) -> Result<VirtualKeyAssignment, StoreError>;
    async fn list_assignments(
        &self,
        virtual_key_id: &str,
    ) -> Result<Vec<VirtualKeyAssignment>, StoreError>;
    async fn delete_assignment(&self, id: &str) -> Result<(), StoreError>;
}
