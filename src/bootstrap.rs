//! Idempotent master-seed bootstrap — turns `MASTER_CONN_*`/`MASTER_VKEY_*`
//! env vars into a Connection, ProviderModel, VirtualKey, and assignment on
//! first run. Existing entities (matched by name / plaintext key) are left
//! untouched and logged silently; only entities actually created are logged.

use chrono::Utc;
use uuid::Uuid;

use crate::config::MasterSeedConfig;
use crate::crypto;
use crate::store::{Connection, ProviderModel, Store, StoreError, VirtualKey, VirtualKeyAssignment};

pub async fn seed(store: &dyn Store, seed: &MasterSeedConfig) -> Result<(), StoreError> {
    let connection = match find_connection_by_name(store, &seed.conn_name).await? {
        Some(c) => c,
        None => {
            let now = Utc::now();
            let c = Connection {
                id: Uuid::new_v4().to_string(),
                name: seed.conn_name.clone(),
                provider: seed.conn_provider.clone(),
                endpoint: seed.conn_endpoint.clone(),
                api_key: seed.conn_api_key.clone(),
                model: seed.conn_model.clone(),
                deployment_name: None,
                created_at: now,
                updated_at: now,
            };
            store.save_connection(&c).await?;
            tracing::info!(connection = %c.name, provider = %c.provider, "bootstrap: connection created");
            c
        }
    };

    let model = match find_model_by_name(store, &connection.id, &seed.conn_model).await? {
        Some(m) => m,
        None => {
            let now = Utc::now();
            let m = ProviderModel {
                id: Uuid::new_v4().to_string(),
                connection_id: connection.id.clone(),
                name: seed.conn_model.clone(),
                remote_model: seed.conn_model.clone(),
                deployment_name: None,
                created_at: now,
                updated_at: now,
            };
            store.save_provider_model(&m).await?;
            tracing::info!(model = %m.name, "bootstrap: provider model created");
            m
        }
    };

    let virtual_key = match store.get_virtual_key_by_plaintext(&seed.vkey_key).await {
        Ok(vk) => vk,
        Err(StoreError::NotFound) => {
            let now = Utc::now();
            let vk = VirtualKey {
                id: Uuid::new_v4().to_string(),
                name: seed.vkey_name.clone(),
                key: seed.vkey_key.clone(),
                key_hash: crypto::hash_key(&seed.vkey_key),
                created_at: now,
                updated_at: now,
            };
            store.save_virtual_key(&vk).await?;
            tracing::info!(virtual_key = %vk.name, "bootstrap: virtual key created");
            vk
        }
        Err(e) => return Err(e),
    };

    match store
        .get_assignment(&virtual_key.id, &model.name)
        .await
    {
        Ok(_) => {}
        Err(StoreError::NotFound) => {
            let now = Utc::now();
            let assignment = VirtualKeyAssignment {
                id: Uuid::new_v4().to_string(),
                virtual_key_id: virtual_key.id.clone(),
                provider_model_id: model.id.clone(),
                model_alias: model.name.clone(),
                rate_limit_tps: seed.vkey_tps,
                rate_limit_tokens: seed.vkey_tokens,
                created_at: now,
                updated_at: now,
            };
            store.save_assignment(&assignment).await?;
            tracing::info!(
                virtual_key = %virtual_key.name,
                alias = %model.name,
                "bootstrap: assignment created"
            );
        }
        Err(e) => return Err(e),
    }

    Ok(())
}

async fn find_connection_by_name(
    store: &dyn Store,
    name: &str,
) -> Result<Option<Connection>, StoreError> {
    let connections = store.list_connections().await?;
    Ok(connections.into_iter().find(|c| c.name == name))
}

async fn find_model_by_name(
    store: &dyn Store,
    connection_id: &str,
    name: &str,
) -> Result<Option<ProviderModel>, StoreError> {
    let models = store.list_provider_models(Some(connection_id)).await?;
    Ok(models.into_iter().find(|m| m.name == name))
}
