//! Find-or-create of resource configs and caches, with their uses

use super::identity::{
    ResourceCacheDescriptor, ResourceConfigDescriptor, UsedBaseResourceType, UsedConfigOrigin,
    UsedResourceCache, UsedResourceConfig,
};
use super::user::ResourceUser;
use crate::db::{retry_find_or_create, Store};
use crate::error::{HangarError, HangarResult};
use crate::resource::types::{
    canonical_json, hash_json, MetadataField, Params, Source, Version, VersionedResourceTypes,
};
use async_trait::async_trait;
use sqlx::SqliteConnection;

/// Resolves and records resource caches
#[async_trait]
pub trait ResourceCacheFactory: Send + Sync {
    /// Resolve the cache for fetching `version` of a `type_name` resource
    /// and record a use of it (and of every parent cache) by `user`
    async fn find_or_create_resource_cache(
        &self,
        user: ResourceUser,
        type_name: &str,
        version: &Version,
        source: &Source,
        params: &Params,
        types: &VersionedResourceTypes,
    ) -> HangarResult<UsedResourceCache>;

    async fn resource_cache_metadata(
        &self,
        cache: &UsedResourceCache,
    ) -> HangarResult<Vec<MetadataField>>;

    async fn update_resource_cache_metadata(
        &self,
        cache: &UsedResourceCache,
        metadata: &[MetadataField],
    ) -> HangarResult<()>;
}

/// Resolves and records resource configs
#[async_trait]
pub trait ResourceConfigFactory: Send + Sync {
    async fn find_or_create_resource_config(
        &self,
        user: ResourceUser,
        type_name: &str,
        source: &Source,
        types: &VersionedResourceTypes,
    ) -> HangarResult<UsedResourceConfig>;
}

/// Store-backed factory for both configs and caches
#[derive(Debug, Clone)]
pub struct DbResourceCacheFactory {
    store: Store,
}

impl DbResourceCacheFactory {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    async fn try_find_or_create_cache(
        &self,
        user: ResourceUser,
        descriptor: &ResourceCacheDescriptor,
    ) -> HangarResult<UsedResourceCache> {
        let mut tx = self.store.pool().begin().await?;
        let config = resolve_config(&mut tx, &descriptor.config, user).await?;
        let cache =
            find_or_create_cache_row(&mut tx, config, &descriptor.version, &descriptor.params)
                .await?;
        insert_cache_use(&mut tx, cache.id, user).await?;
        tx.commit().await?;
        Ok(cache)
    }

    async fn try_find_or_create_config(
        &self,
        user: ResourceUser,
        descriptor: &ResourceConfigDescriptor,
    ) -> HangarResult<UsedResourceConfig> {
        let mut tx = self.store.pool().begin().await?;
        let config = resolve_config(&mut tx, descriptor, user).await?;
        insert_config_use(&mut tx, config.id, user).await?;
        tx.commit().await?;
        Ok(config)
    }
}

#[async_trait]
impl ResourceCacheFactory for DbResourceCacheFactory {
    async fn find_or_create_resource_cache(
        &self,
        user: ResourceUser,
        type_name: &str,
        version: &Version,
        source: &Source,
        params: &Params,
        types: &VersionedResourceTypes,
    ) -> HangarResult<UsedResourceCache> {
        let descriptor = ResourceCacheDescriptor::resolve(
            type_name,
            version.clone(),
            source.clone(),
            params.clone(),
            types,
        )?;
        retry_find_or_create("resource cache", || {
            self.try_find_or_create_cache(user, &descriptor)
        })
        .await
    }

    async fn resource_cache_metadata(
        &self,
        cache: &UsedResourceCache,
    ) -> HangarResult<Vec<MetadataField>> {
        let metadata: Option<Option<String>> =
            sqlx::query_scalar("SELECT metadata FROM resource_caches WHERE id = ?")
                .bind(cache.id)
                .fetch_optional(self.store.pool())
                .await?;

        match metadata.flatten() {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    async fn update_resource_cache_metadata(
        &self,
        cache: &UsedResourceCache,
        metadata: &[MetadataField],
    ) -> HangarResult<()> {
        sqlx::query("UPDATE resource_caches SET metadata = ? WHERE id = ?")
            .bind(serde_json::to_string(metadata)?)
            .bind(cache.id)
            .execute(self.store.pool())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ResourceConfigFactory for DbResourceCacheFactory {
    async fn find_or_create_resource_config(
        &self,
        user: ResourceUser,
        type_name: &str,
        source: &Source,
        types: &VersionedResourceTypes,
    ) -> HangarResult<UsedResourceConfig> {
        let descriptor = ResourceConfigDescriptor::resolve(type_name, source.clone(), types)?;
        retry_find_or_create("resource config", || {
            self.try_find_or_create_config(user, &descriptor)
        })
        .await
    }
}

impl Store {
    /// Register a base type name (idempotent)
    pub async fn find_or_create_base_resource_type(
        &self,
        name: &str,
    ) -> HangarResult<UsedBaseResourceType> {
        let (id, name): (i64, String) = sqlx::query_as(
            "INSERT INTO base_resource_types (name) VALUES (?) \
             ON CONFLICT (name) DO UPDATE SET name = excluded.name RETURNING id, name",
        )
        .bind(name)
        .fetch_one(self.pool())
        .await?;
        Ok(UsedBaseResourceType { id, name })
    }
}

/// Walk the chain from its base type outward, creating what is missing.
/// Every parent cache gets a use by `user`.
async fn resolve_config(
    conn: &mut SqliteConnection,
    descriptor: &ResourceConfigDescriptor,
    user: ResourceUser,
) -> HangarResult<UsedResourceConfig> {
    let base_name = descriptor.base_type_name();
    let base: Option<(i64, String)> =
        sqlx::query_as("SELECT id, name FROM base_resource_types WHERE name = ?")
            .bind(base_name)
            .fetch_optional(&mut *conn)
            .await?;
    let (id, name) = base.ok_or_else(|| HangarError::BaseResourceTypeNotFound(base_name.to_string()))?;

    let mut origin = UsedConfigOrigin::BaseType(UsedBaseResourceType { id, name });
    for parent in descriptor.parent_chain().into_iter().rev() {
        let config = find_or_create_config_row(conn, origin, &parent.config.source).await?;
        let cache = find_or_create_cache_row(conn, config, &parent.version, &parent.params).await?;
        insert_cache_use(conn, cache.id, user).await?;
        origin = UsedConfigOrigin::Cache(Box::new(cache));
    }

    find_or_create_config_row(conn, origin, &descriptor.source).await
}

async fn find_or_create_config_row(
    conn: &mut SqliteConnection,
    origin: UsedConfigOrigin,
    source: &Source,
) -> HangarResult<UsedResourceConfig> {
    let source_hash = hash_json(source)?;
    let (base_id, cache_id) = match &origin {
        UsedConfigOrigin::BaseType(base) => (Some(base.id), None),
        UsedConfigOrigin::Cache(cache) => (None, Some(cache.id)),
    };

    let existing: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM resource_configs \
         WHERE base_resource_type_id IS ?1 AND resource_cache_id IS ?2 AND source_hash = ?3",
    )
    .bind(base_id)
    .bind(cache_id)
    .bind(&source_hash)
    .fetch_optional(&mut *conn)
    .await?;

    let id = match existing {
        Some(id) => id,
        None => {
            sqlx::query_scalar(
                "INSERT INTO resource_configs (base_resource_type_id, resource_cache_id, source_hash) \
                 VALUES (?, ?, ?) RETURNING id",
            )
            .bind(base_id)
            .bind(cache_id)
            .bind(&source_hash)
            .fetch_one(&mut *conn)
            .await?
        }
    };

    Ok(UsedResourceConfig {
        id,
        origin,
        source_hash,
    })
}

async fn find_or_create_cache_row(
    conn: &mut SqliteConnection,
    config: UsedResourceConfig,
    version: &Version,
    params: &Params,
) -> HangarResult<UsedResourceCache> {
    let version_json = canonical_json(version)?;
    let params_hash = hash_json(params)?;

    let existing: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM resource_caches \
         WHERE resource_config_id = ? AND version = ? AND params_hash = ?",
    )
    .bind(config.id)
    .bind(&version_json)
    .bind(&params_hash)
    .fetch_optional(&mut *conn)
    .await?;

    let id = match existing {
        Some(id) => id,
        None => {
            sqlx::query_scalar(
                "INSERT INTO resource_caches (resource_config_id, version, params_hash) \
                 VALUES (?, ?, ?) RETURNING id",
            )
            .bind(config.id)
            .bind(&version_json)
            .bind(&params_hash)
            .fetch_one(&mut *conn)
            .await?
        }
    };

    Ok(UsedResourceCache {
        id,
        resource_config: config,
        version: version.clone(),
        params_hash,
    })
}

async fn insert_cache_use(
    conn: &mut SqliteConnection,
    cache_id: i64,
    user: ResourceUser,
) -> HangarResult<()> {
    let (build_id, resource_id, resource_type_id) = user.columns();
    sqlx::query(
        "INSERT INTO resource_cache_uses (resource_cache_id, build_id, resource_id, resource_type_id) \
         VALUES (?, ?, ?, ?) ON CONFLICT DO NOTHING",
    )
    .bind(cache_id)
    .bind(build_id)
    .bind(resource_id)
    .bind(resource_type_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_config_use(
    conn: &mut SqliteConnection,
    config_id: i64,
    user: ResourceUser,
) -> HangarResult<()> {
    let (build_id, resource_id, resource_type_id) = user.columns();
    sqlx::query(
        "INSERT INTO resource_config_uses (resource_config_id, build_id, resource_id, resource_type_id) \
         VALUES (?, ?, ?, ?) ON CONFLICT DO NOTHING",
    )
    .bind(config_id)
    .bind(build_id)
    .bind(resource_id)
    .bind(resource_type_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
