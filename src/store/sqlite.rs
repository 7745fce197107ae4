//! SQLite-backed [`Store`] — one file, WAL mode, encryption applied at the
//! read/write boundary so callers always see plaintext.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection as SqliteConnection};
use std::path::Path;
use std::sync::Mutex;

use crate::crypto;

use super::{
    Connection, ProviderModel, Store, StoreError, VirtualKey, VirtualKeyAssignment,
};

pub struct SqliteStore {
    db: Mutex<SqliteConnection>,
    encryption_key: String,
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn map_sqlite(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Storage(other.to_string()),
    }
}

impl SqliteStore {
    pub fn open(db_path: &Path, encryption_key: String) -> Result<Self, StoreError> {
        let db = SqliteConnection::open(db_path).map_err(map_sqlite)?;

        db.pragma_update(None, "journal_mode", "WAL")
            .map_err(map_sqlite)?;
        db.pragma_update(None, "foreign_keys", "ON")
            .map_err(map_sqlite)?;

        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS connections (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                provider TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                api_key TEXT NOT NULL,
                model TEXT NOT NULL,
                deployment_name TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS provider_models (
                id TEXT PRIMARY KEY,
                connection_id TEXT NOT NULL,
                name TEXT NOT NULL,
                remote_model TEXT NOT NULL,
                deployment_name TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (connection_id) REFERENCES connections(id)
            );

            CREATE TABLE IF NOT EXISTS virtual_keys (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                key TEXT NOT NULL,
                key_hash TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS virtual_key_assignments (
                id TEXT PRIMARY KEY,
                virtual_key_id TEXT NOT NULL,
                provider_model_id TEXT NOT NULL,
                model_alias TEXT NOT NULL,
                rate_limit_tps REAL NOT NULL,
                rate_limit_tokens INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (virtual_key_id) REFERENCES virtual_keys(id),
                FOREIGN KEY (provider_model_id) REFERENCES provider_models(id)
            );

            CREATE INDEX IF NOT EXISTS idx_virtual_keys_hash ON virtual_keys(key_hash);
            CREATE INDEX IF NOT EXISTS idx_assignments_key_alias
                ON virtual_key_assignments(virtual_key_id, model_alias);
            CREATE INDEX IF NOT EXISTS idx_provider_models_connection
                ON provider_models(connection_id);
            ",
        )
        .map_err(map_sqlite)?;

        Ok(Self {
            db: Mutex::new(db),
            encryption_key,
        })
    }

    fn encrypt(&self, plaintext: &str) -> String {
        crypto::encrypt(plaintext.as_bytes(), &self.encryption_key)
    }

    /// Decrypt `ciphertext`. On failure (e.g. a plaintext legacy row, or a key
    /// rotation in progress) the value is returned unchanged rather than
    /// surfaced as an error — callers never see a hard failure from this step.
    fn decrypt(&self, ciphertext: &str) -> String {
        crypto::decrypt(ciphertext, &self.encryption_key)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_else(|| ciphertext.to_string())
    }
}

#[async_trait::async_trait]
impl Store for SqliteStore {
    async fn save_connection(&self, c: &Connection) -> Result<(), StoreError> {
        let db = self.db.lock().unwrap();
        let encrypted_key = self.encrypt(&c.api_key);
        db.execute(
            "INSERT INTO connections
                (id, name, provider, endpoint, api_key, model, deployment_name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                provider = excluded.provider,
                endpoint = excluded.endpoint,
                api_key = excluded.api_key,
                model = excluded.model,
                deployment_name = excluded.deployment_name,
                updated_at = excluded.updated_at",
            params![
                c.id,
                c.name,
                c.provider,
                c.endpoint,
                encrypted_key,
                c.model,
                c.deployment_name,
                c.created_at.to_rfc3339(),
                c.updated_at.to_rfc3339(),
            ],
        )
        .map_err(map_sqlite)?;
        Ok(())
    }

    async fn get_connection(&self, id: &str) -> Result<Connection, StoreError> {
        let db = self.db.lock().unwrap();
        let row = db
            .query_row(
                "SELECT id, name, provider, endpoint, api_key, model, deployment_name, created_at, updated_at
                 FROM connections WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                    ))
                },
            )
            .map_err(map_sqlite)?;
        Ok(Connection {
            id: row.0,
            name: row.1,
            provider: row.2,
            endpoint: row.3,
            api_key: self.decrypt(&row.4),
            model: row.5,
            deployment_name: row.6,
            created_at: parse_ts(&row.7),
            updated_at: parse_ts(&row.8),
        })
    }

    async fn list_connections(&self) -> Result<Vec<Connection>, StoreError> {
        let db = self.db.lock().unwrap();
        let mut stmt = db
            .prepare(
                "SELECT id, name, provider, endpoint, api_key, model, deployment_name, created_at, updated_at
                 FROM connections",
            )
            .map_err(map_sqlite)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                ))
            })
            .map_err(map_sqlite)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sqlite)?;
        Ok(rows
            .into_iter()
            .map(|r| Connection {
                id: r.0,
                name: r.1,
                provider: r.2,
                endpoint: r.3,
                api_key: self.decrypt(&r.4),
                model: r.5,
                deployment_name: r.6,
                created_at: parse_ts(&r.7),
                updated_at: parse_ts(&r.8),
            })
            .collect())
    }

    async fn delete_connection(&self, id: &str) -> Result<(), StoreError> {
        let db = self.db.lock().unwrap();
        db.execute("DELETE FROM connections WHERE id = ?1", params![id])
            .map_err(map_sqlite)?;
        Ok(())
    }

    async fn save_provider_model(&self, m: &ProviderModel) -> Result<(), StoreError> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO provider_models
                (id, connection_id, name, remote_model, deployment_name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                connection_id = excluded.connection_id,
                name = excluded.name,
                remote_model = excluded.remote_model,
                deployment_name = excluded.deployment_name,
                updated_at = excluded.updated_at",
            params![
                m.id,
                m.connection_id,
                m.name,
                m.remote_model,
                m.deployment_name,
                m.created_at.to_rfc3339(),
                m.updated_at.to_rfc3339(),
            ],
        )
        .map_err(map_sqlite)?;
        Ok(())
    }

    async fn get_provider_model(&self, id: &str) -> Result<ProviderModel, StoreError> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, connection_id, name, remote_model, deployment_name, created_at, updated_at
             FROM provider_models WHERE id = ?1",
            params![id],
            |row| {
                Ok(ProviderModel {
                    id: row.get(0)?,
                    connection_id: row.get(1)?,
                    name: row.get(2)?,
                    remote_model: row.get(3)?,
                    deployment_name: row.get(4)?,
                    created_at: parse_ts(&row.get::<_, String>(5)?),
                    updated_at: parse_ts(&row.get::<_, String>(6)?),
                })
            },
        )
        .map_err(map_sqlite)
    }

    async fn list_provider_models(
        &self,
        connection_id: Option<&str>,
    ) -> Result<Vec<ProviderModel>, StoreError> {
        let db = self.db.lock().unwrap();
        let build = |row: &rusqlite::Row| {
            Ok(ProviderModel {
                id: row.get(0)?,
                connection_id: row.get(1)?,
                name: row.get(2)?,
                remote_model: row.get(3)?,
                deployment_name: row.get(4)?,
                created_at: parse_ts(&row.get::<_, String>(5)?),
                updated_at: parse_ts(&row.get::<_, String>(6)?),
            })
        };
        let models = match connection_id {
            Some(cid) => {
                let mut stmt = db
                    .prepare(
                        "SELECT id, connection_id, name, remote_model, deployment_name, created_at, updated_at
                         FROM provider_models WHERE connection_id = ?1",
                    )
                    .map_err(map_sqlite)?;
                stmt.query_map(params![cid], build)
                    .map_err(map_sqlite)?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(map_sqlite)?
            }
            None => {
                let mut stmt = db
                    .prepare(
                        "SELECT id, connection_id, name, remote_model, deployment_name, created_at, updated_at
                         FROM provider_models",
                    )
                    .map_err(map_sqlite)?;
                stmt.query_map([], build)
                    .map_err(map_sqlite)?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(map_sqlite)?
            }
        };
        Ok(models)
    }

    async fn delete_provider_model(&self, id: &str) -> Result<(), StoreError> {
        let db = self.db.lock().unwrap();
        db.execute("DELETE FROM provider_models WHERE id = ?1", params![id])
            .map_err(map_sqlite)?;
        Ok(())
    }

    async fn save_virtual_key(&self, k: &VirtualKey) -> Result<(), StoreError> {
        let db = self.db.lock().unwrap();
        let encrypted = self.encrypt(&k.key);
        let hash = crypto::hash_key(&k.key);
        db.execute(
            "INSERT INTO virtual_keys (id, name, key, key_hash, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                key = excluded.key,
                key_hash = excluded.key_hash,
                updated_at = excluded.updated_at",
            params![
                k.id,
                k.name,
                encrypted,
                hash,
                k.created_at.to_rfc3339(),
                k.updated_at.to_rfc3339(),
            ],
        )
        .map_err(map_sqlite)?;
        Ok(())
    }

    async fn get_virtual_key(&self, id: &str) -> Result<VirtualKey, StoreError> {
        let db = self.db.lock().unwrap();
        let row = db
            .query_row(
                "SELECT id, name, key, key_hash, created_at, updated_at
                 FROM virtual_keys WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .map_err(map_sqlite)?;
        Ok(VirtualKey {
            id: row.0,
            name: row.1,
            key: self.decrypt(&row.2),
            key_hash: row.3,
            created_at: parse_ts(&row.4),
            updated_at: parse_ts(&row.5),
        })
    }

    async fn get_virtual_key_by_plaintext(&self, plaintext: &str) -> Result<VirtualKey, StoreError> {
        let hash = crypto::hash_key(plaintext);
        let db = self.db.lock().unwrap();
        let row = db
            .query_row(
                "SELECT id, name, key, key_hash, created_at, updated_at
                 FROM virtual_keys WHERE key_hash = ?1",
                params![hash],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .map_err(map_sqlite)?;
        Ok(VirtualKey {
            id: row.0,
            name: row.1,
            key: self.decrypt(&row.2),
            key_hash: row.3,
            created_at: parse_ts(&row.4),
            updated_at: parse_ts(&row.5),
        })
    }

    async fn list_virtual_keys(&self) -> Result<Vec<VirtualKey>, StoreError> {
        let db = self.db.lock().unwrap();
        let mut stmt = db
            .prepare("SELECT id, name, key, key_hash, created_at, updated_at FROM virtual_keys")
            .map_err(map_sqlite)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .map_err(map_sqlite)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sqlite)?;
        Ok(rows
            .into_iter()
            .map(|r| VirtualKey {
                id: r.0,
                name: r.1,
                key: self.decrypt(&r.2),
                key_hash: r.3,
                created_at: parse_ts(&r.4),
                updated_at: parse_ts(&r.5),
            })
            .collect())
    }

    async fn delete_virtual_key(&self, id: &str) -> Result<(), StoreError> {
        let db = self.db.lock().unwrap();
        db.execute("DELETE FROM virtual_keys WHERE id = ?1", params![id])
            .map_err(map_sqlite)?;
        Ok(())
    }

    async fn save_assignment(&self, a: &VirtualKeyAssignment) -> Result<(), StoreError> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO virtual_key_assignments
                (id, virtual_key_id, provider_model_id, model_alias, rate_limit_tps, rate_limit_tokens, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                virtual_key_id = excluded.virtual_key_id,
                provider_model_id = excluded.provider_model_id,
                model_alias = excluded.model_alias,
                rate_limit_tps = excluded.rate_limit_tps,
                rate_limit_tokens = excluded.rate_limit_tokens,
                updated_at = excluded.updated_at",
            params![
                a.id,
                a.virtual_key_id,
                a.provider_model_id,
                a.model_alias,
                a.rate_limit_tps,
                a.rate_limit_tokens,
                a.created_at.to_rfc3339(),
                a.updated_at.to_rfc3339(),
            ],
        )
        .map_err(map_sqlite)?;
        Ok(())
    }

    async fn get_assignment(
        &self,
        virtual_key_id: &str,
        model_alias: &str,
    ) -> Result<VirtualKeyAssignment, StoreError> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, virtual_key_id, provider_model_id, model_alias, rate_limit_tps, rate_limit_tokens, created_at, updated_at
             FROM virtual_key_assignments WHERE virtual_key_id = ?1 AND model_alias = ?2",
            params![virtual_key_id, model_alias],
            |row| {
                Ok(VirtualKeyAssignment {
                    id: row.get(0)?,
                    virtual_key_id: row.get(1)?,
                    provider_model_id: row.get(2)?,
                    model_alias: row.get(3)?,
                    rate_limit_tps: row.get(4)?,
                    rate_limit_tokens: row.get(5)?,
                    created_at: parse_ts(&row.get::<_, String>(6)?),
                    updated_at: parse_ts(&row.get::<_, String>(7)?),
                })
            },
        )
        .map_err(map_sqlite)
    }

    async fn list_assignments(
        &self,
        virtual_key_id: &str,
    ) -> Result<Vec<VirtualKeyAssignment>, StoreError> {
        let db = self.db.lock().unwrap();
        let mut stmt = db
            .prepare(
                "SELECT id, virtual_key_id, provider_model_id, model_alias, rate_limit_tps, rate_limit_tokens, created_at, updated_at
                 FROM virtual_key_assignments WHERE virtual_key_id = ?1",
            )
            .map_err(map_sqlite)?;
        let rows = stmt
            .query_map(params![virtual_key_id], |row| {
                Ok(VirtualKeyAssignment {
                    id: row.get(0)?,
                    virtual_key_id: row.get(1)?,
                    provider_model_id: row.get(2)?,
                    model_alias: row.get(3)?,
                    rate_limit_tps: row.get(4)?,
                    rate_limit_tokens: row.get(5)?,
                    created_at: parse_ts(&row.get::<_, String>(6)?),
                    updated_at: parse_ts(&row.get::<_, String>(7)?),
                })
            })
            .map_err(map_sqlite)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sqlite)?;
        Ok(rows)
    }

    async fn delete_assignment(&self, id: &str) -> Result<(), StoreError> {
        let db = self.db.lock().unwrap();
        db.execute(
            "DELETE FROM virtual_key_assignments WHERE id = ?1",
            params![id],
        )
        .map_err(map_sqlite)?;
        Ok(())
    }
}
