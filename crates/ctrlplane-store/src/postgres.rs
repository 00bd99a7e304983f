//! PostgreSQL storage implementation
//!
//! Aggregates are stored as JSONB `data` columns next to the columns their
//! queries filter on. Target replacement runs in one transaction and locks
//! the affected rows with `FOR UPDATE NOWAIT`; a held lock surfaces as
//! [`StoreError::LockContention`].

use crate::error::{StoreError, StoreResult};
use crate::traits::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ctrlplane_types::{
    ApprovalRecord, Deployment, DeploymentId, DeploymentVariable, DeploymentVersion, Environment,
    EnvironmentId, Job, JobAgent, JobAgentId, JobId, Policy, PolicyId, Release, ReleaseId,
    ReleaseTarget, ReleaseTargetId, ReleaseTargetKey, Resource, ResourceId, ResourceVariable,
    System, SystemId, VariableRelease, VariableReleaseId, VariableSet, VersionId, VersionRelease,
    WorkspaceId,
};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};
use std::collections::{BTreeSet, HashSet};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const LOCK_NOT_AVAILABLE: &str = "55P03";
const UNIQUE_VIOLATION: &str = "23505";

const TARGET_COLUMNS: &str =
    "id, resource_id, environment_id, deployment_id, desired_release_id, created_at";

/// PostgreSQL-backed storage
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

#[derive(Debug, Clone, Copy)]
enum TargetScope {
    Resource(ResourceId),
    Deployment(DeploymentId),
    Environment(EnvironmentId),
}

impl TargetScope {
    fn column(&self) -> &'static str {
        match self {
            TargetScope::Resource(_) => "resource_id",
            TargetScope::Deployment(_) => "deployment_id",
            TargetScope::Environment(_) => "environment_id",
        }
    }

    fn subject(&self) -> Uuid {
        match self {
            TargetScope::Resource(id) => *id.as_uuid(),
            TargetScope::Deployment(id) => *id.as_uuid(),
            TargetScope::Environment(id) => *id.as_uuid(),
        }
    }

    fn contains(&self, key: &ReleaseTargetKey) -> bool {
        match self {
            TargetScope::Resource(id) => &key.resource_id == id,
            TargetScope::Deployment(id) => &key.deployment_id == id,
            TargetScope::Environment(id) => &key.environment_id == id,
        }
    }
}

impl PostgresStore {
    /// Connect to PostgreSQL and initialize schema
    pub async fn new(
        url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(connect_timeout_secs))
            .connect(url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.initialize_schema().await?;
        info!(max_connections, "PostgreSQL store ready");
        Ok(store)
    }

    async fn initialize_schema(&self) -> StoreResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS resources (
                id UUID PRIMARY KEY,
                workspace_id UUID NOT NULL,
                identifier TEXT NOT NULL,
                deleted_at TIMESTAMPTZ,
                data JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                UNIQUE (workspace_id, identifier)
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS systems (
                id UUID PRIMARY KEY,
                workspace_id UUID NOT NULL,
                data JSONB NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS environments (
                id UUID PRIMARY KEY,
                system_id UUID NOT NULL,
                data JSONB NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS environments_system_id ON environments(system_id);"#,
            r#"
            CREATE TABLE IF NOT EXISTS deployments (
                id UUID PRIMARY KEY,
                system_id UUID NOT NULL,
                data JSONB NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS deployments_system_id ON deployments(system_id);"#,
            r#"
            CREATE TABLE IF NOT EXISTS job_agents (
                id UUID PRIMARY KEY,
                data JSONB NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS deployment_versions (
                id UUID PRIMARY KEY,
                deployment_id UUID NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL
            );
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS deployment_versions_deployment
                ON deployment_versions(deployment_id, created_at DESC);
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS resource_variables (
                resource_id UUID NOT NULL,
                key TEXT NOT NULL,
                data JSONB NOT NULL,
                PRIMARY KEY (resource_id, key)
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS deployment_variables (
                deployment_id UUID NOT NULL,
                key TEXT NOT NULL,
                data JSONB NOT NULL,
                PRIMARY KEY (deployment_id, key)
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS variable_sets (
                id UUID PRIMARY KEY,
                system_id UUID NOT NULL,
                position INTEGER NOT NULL,
                data JSONB NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS policies (
                id UUID PRIMARY KEY,
                workspace_id UUID NOT NULL,
                data JSONB NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS policy_targets (
                policy_id UUID NOT NULL,
                release_target_id UUID NOT NULL,
                PRIMARY KEY (policy_id, release_target_id)
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS approvals (
                id UUID PRIMARY KEY,
                version_id UUID NOT NULL,
                environment_id UUID NOT NULL,
                user_id TEXT NOT NULL,
                data JSONB NOT NULL,
                UNIQUE (version_id, environment_id, user_id)
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS release_targets (
                id UUID PRIMARY KEY,
                resource_id UUID NOT NULL,
                environment_id UUID NOT NULL,
                deployment_id UUID NOT NULL,
                desired_release_id UUID,
                created_at TIMESTAMPTZ NOT NULL,
                UNIQUE (resource_id, environment_id, deployment_id)
            );
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS release_targets_deployment
                ON release_targets(deployment_id);
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS release_targets_environment
                ON release_targets(environment_id);
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS version_releases (
                sequence BIGSERIAL PRIMARY KEY,
                id UUID NOT NULL UNIQUE,
                release_target_id UUID NOT NULL,
                data JSONB NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS variable_releases (
                sequence BIGSERIAL PRIMARY KEY,
                id UUID NOT NULL UNIQUE,
                release_target_id UUID NOT NULL,
                data JSONB NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS releases (
                sequence BIGSERIAL PRIMARY KEY,
                id UUID NOT NULL UNIQUE,
                release_target_id UUID NOT NULL,
                data JSONB NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                sequence BIGSERIAL PRIMARY KEY,
                id UUID NOT NULL UNIQUE,
                release_target_id UUID NOT NULL,
                resource_id UUID NOT NULL,
                environment_id UUID NOT NULL,
                deployment_id UUID NOT NULL,
                version_id UUID NOT NULL,
                status TEXT NOT NULL,
                completed_at TIMESTAMPTZ,
                data JSONB NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS jobs_target ON jobs(release_target_id);"#,
            r#"CREATE INDEX IF NOT EXISTS jobs_status ON jobs(status);"#,
        ];

        for stmt in statements {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        }

        Ok(())
    }

    fn to_json<T: serde::Serialize>(value: &T) -> StoreResult<Value> {
        serde_json::to_value(value)
            .map_err(|e| StoreError::InvalidData(format!("json serialize error: {}", e)))
    }

    fn from_json<T: serde::de::DeserializeOwned>(value: Value) -> StoreResult<T> {
        serde_json::from_value(value)
            .map_err(|e| StoreError::InvalidData(format!("json deserialize error: {}", e)))
    }

    fn decode<T: serde::de::DeserializeOwned>(row: &PgRow) -> StoreResult<T> {
        let data: Value = row.try_get("data").map_err(map_sqlx_error)?;
        Self::from_json(data)
    }

    fn decode_all<T: serde::de::DeserializeOwned>(rows: Vec<PgRow>) -> StoreResult<Vec<T>> {
        rows.iter().map(Self::decode).collect()
    }

    fn decode_target(row: &PgRow) -> StoreResult<ReleaseTarget> {
        let get_uuid =
            |column: &str| -> StoreResult<Uuid> { row.try_get(column).map_err(map_sqlx_error) };
        let desired: Option<Uuid> = row
            .try_get("desired_release_id")
            .map_err(map_sqlx_error)?;
        let created_at: DateTime<Utc> = row.try_get("created_at").map_err(map_sqlx_error)?;

        Ok(ReleaseTarget {
            id: ReleaseTargetId::from_uuid(get_uuid("id")?),
            resource_id: ResourceId::from_uuid(get_uuid("resource_id")?),
            environment_id: EnvironmentId::from_uuid(get_uuid("environment_id")?),
            deployment_id: DeploymentId::from_uuid(get_uuid("deployment_id")?),
            created_at,
            desired_release_id: desired.map(ReleaseId::from_uuid),
        })
    }

    async fn fetch_data<T: serde::de::DeserializeOwned>(
        &self,
        sql: &str,
        id: Uuid,
    ) -> StoreResult<Option<T>> {
        let row = sqlx::query(sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref().map(Self::decode).transpose()
    }

    async fn fetch_all_data<T: serde::de::DeserializeOwned>(
        &self,
        sql: &str,
        id: Uuid,
    ) -> StoreResult<Vec<T>> {
        let rows = sqlx::query(sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Self::decode_all(rows)
    }

    async fn fetch_targets(&self, sql: &str, id: Uuid) -> StoreResult<Vec<ReleaseTarget>> {
        let rows = sqlx::query(sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        rows.iter().map(Self::decode_target).collect()
    }

    async fn replace_targets(
        &self,
        scope: TargetScope,
        desired: Vec<ReleaseTargetKey>,
    ) -> StoreResult<TargetDiff> {
        if let Some(stray) = desired.iter().find(|key| !scope.contains(key)) {
            return Err(StoreError::InvalidData(format!(
                "target {} is outside the replaced scope",
                stray
            )));
        }

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let select = format!(
            "SELECT {} FROM release_targets WHERE {} = $1 FOR UPDATE NOWAIT",
            TARGET_COLUMNS,
            scope.column()
        );
        let rows = sqlx::query(&select)
            .bind(scope.subject())
            .fetch_all(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        let current: Vec<ReleaseTarget> = rows
            .iter()
            .map(Self::decode_target)
            .collect::<StoreResult<_>>()?;

        let desired: BTreeSet<ReleaseTargetKey> = desired.into_iter().collect();
        let current_keys: HashSet<ReleaseTargetKey> = current.iter().map(|t| t.key()).collect();

        let mut diff = TargetDiff::default();
        for target in current {
            if desired.contains(&target.key()) {
                diff.unchanged.push(target);
            } else {
                diff.removed.push(target);
            }
        }

        if !diff.removed.is_empty() {
            let removed: Vec<Uuid> = diff.removed.iter().map(|t| *t.id.as_uuid()).collect();
            sqlx::query("DELETE FROM release_targets WHERE id = ANY($1)")
                .bind(&removed)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            sqlx::query("DELETE FROM policy_targets WHERE release_target_id = ANY($1)")
                .bind(&removed)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }

        for key in desired.into_iter().filter(|k| !current_keys.contains(k)) {
            let target = ReleaseTarget::new(key);
            let inserted = sqlx::query(
                r#"
                INSERT INTO release_targets
                    (id, resource_id, environment_id, deployment_id, created_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (resource_id, environment_id, deployment_id) DO NOTHING
                "#,
            )
            .bind(target.id.as_uuid())
            .bind(target.resource_id.as_uuid())
            .bind(target.environment_id.as_uuid())
            .bind(target.deployment_id.as_uuid())
            .bind(target.created_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

            if inserted.rows_affected() > 0 {
                diff.inserted.push(target);
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(diff)
    }
}

/// Map driver errors onto storage errors, keeping lock and uniqueness
/// failures distinguishable
fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some(LOCK_NOT_AVAILABLE) => {
                debug!(message = db.message(), "Row lock not available");
                StoreError::LockContention(db.message().to_string())
            }
            Some(UNIQUE_VIOLATION) => StoreError::Conflict(db.message().to_string()),
            _ => StoreError::Query(err.to_string()),
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Connection(err.to_string())
        }
        _ => StoreError::Query(err.to_string()),
    }
}

#[async_trait]
impl ResourceStore for PostgresStore {
    async fn get_resource(&self, id: &ResourceId) -> StoreResult<Option<Resource>> {
        self.fetch_data("SELECT data FROM resources WHERE id = $1", *id.as_uuid())
            .await
    }

    async fn list_active_resources(
        &self,
        workspace_id: &WorkspaceId,
    ) -> StoreResult<Vec<Resource>> {
        self.fetch_all_data(
            "SELECT data FROM resources \
             WHERE workspace_id = $1 AND deleted_at IS NULL ORDER BY identifier",
            *workspace_id.as_uuid(),
        )
        .await
    }

    async fn upsert_resource(&self, resource: Resource) -> StoreResult<()> {
        let data = Self::to_json(&resource)?;

        sqlx::query(
            r#"
            INSERT INTO resources (id, workspace_id, identifier, deleted_at, data, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                identifier = EXCLUDED.identifier,
                deleted_at = EXCLUDED.deleted_at,
                data = EXCLUDED.data,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(resource.id.as_uuid())
        .bind(resource.workspace_id.as_uuid())
        .bind(&resource.identifier)
        .bind(resource.deleted_at)
        .bind(data)
        .bind(resource.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }
}

#[async_trait]
impl SystemStore for PostgresStore {
    async fn get_system(&self, id: &SystemId) -> StoreResult<Option<System>> {
        self.fetch_data("SELECT data FROM systems WHERE id = $1", *id.as_uuid())
            .await
    }

    async fn list_systems(&self, workspace_id: &WorkspaceId) -> StoreResult<Vec<System>> {
        self.fetch_all_data(
            "SELECT data FROM systems WHERE workspace_id = $1",
            *workspace_id.as_uuid(),
        )
        .await
    }

    async fn upsert_system(&self, system: System) -> StoreResult<()> {
        let data = Self::to_json(&system)?;
        sqlx::query(
            r#"
            INSERT INTO systems (id, workspace_id, data) VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data
            "#,
        )
        .bind(system.id.as_uuid())
        .bind(system.workspace_id.as_uuid())
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_environment(&self, id: &EnvironmentId) -> StoreResult<Option<Environment>> {
        self.fetch_data("SELECT data FROM environments WHERE id = $1", *id.as_uuid())
            .await
    }

    async fn list_environments(&self, system_id: &SystemId) -> StoreResult<Vec<Environment>> {
        self.fetch_all_data(
            "SELECT data FROM environments WHERE system_id = $1",
            *system_id.as_uuid(),
        )
        .await
    }

    async fn upsert_environment(&self, environment: Environment) -> StoreResult<()> {
        let data = Self::to_json(&environment)?;
        sqlx::query(
            r#"
            INSERT INTO environments (id, system_id, data) VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data
            "#,
        )
        .bind(environment.id.as_uuid())
        .bind(environment.system_id.as_uuid())
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_deployment(&self, id: &DeploymentId) -> StoreResult<Option<Deployment>> {
        self.fetch_data("SELECT data FROM deployments WHERE id = $1", *id.as_uuid())
            .await
    }

    async fn list_deployments(&self, system_id: &SystemId) -> StoreResult<Vec<Deployment>> {
        self.fetch_all_data(
            "SELECT data FROM deployments WHERE system_id = $1",
            *system_id.as_uuid(),
        )
        .await
    }

    async fn upsert_deployment(&self, deployment: Deployment) -> StoreResult<()> {
        let data = Self::to_json(&deployment)?;
        sqlx::query(
            r#"
            INSERT INTO deployments (id, system_id, data) VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data
            "#,
        )
        .bind(deployment.id.as_uuid())
        .bind(deployment.system_id.as_uuid())
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_job_agent(&self, id: &JobAgentId) -> StoreResult<Option<JobAgent>> {
        self.fetch_data("SELECT data FROM job_agents WHERE id = $1", *id.as_uuid())
            .await
    }

    async fn upsert_job_agent(&self, agent: JobAgent) -> StoreResult<()> {
        let data = Self::to_json(&agent)?;
        sqlx::query(
            r#"
            INSERT INTO job_agents (id, data) VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data
            "#,
        )
        .bind(agent.id.as_uuid())
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl VersionStore for PostgresStore {
    async fn get_version(&self, id: &VersionId) -> StoreResult<Option<DeploymentVersion>> {
        self.fetch_data(
            "SELECT data FROM deployment_versions WHERE id = $1",
            *id.as_uuid(),
        )
        .await
    }

    async fn upsert_version(&self, version: DeploymentVersion) -> StoreResult<()> {
        let data = Self::to_json(&version)?;
        sqlx::query(
            r#"
            INSERT INTO deployment_versions (id, deployment_id, status, created_at, data)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                data = EXCLUDED.data
            "#,
        )
        .bind(version.id.as_uuid())
        .bind(version.deployment_id.as_uuid())
        .bind(version.status.to_string())
        .bind(version.created_at)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn list_ready_versions(
        &self,
        deployment_id: &DeploymentId,
        limit: usize,
    ) -> StoreResult<Vec<DeploymentVersion>> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM deployment_versions
            WHERE deployment_id = $1 AND status = 'ready'
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(deployment_id.as_uuid())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Self::decode_all(rows)
    }
}

#[async_trait]
impl VariableStore for PostgresStore {
    async fn list_resource_variables(
        &self,
        resource_id: &ResourceId,
    ) -> StoreResult<Vec<ResourceVariable>> {
        self.fetch_all_data(
            "SELECT data FROM resource_variables WHERE resource_id = $1 ORDER BY key",
            *resource_id.as_uuid(),
        )
        .await
    }

    async fn upsert_resource_variable(&self, variable: ResourceVariable) -> StoreResult<()> {
        let data = Self::to_json(&variable)?;
        sqlx::query(
            r#"
            INSERT INTO resource_variables (resource_id, key, data) VALUES ($1, $2, $3)
            ON CONFLICT (resource_id, key) DO UPDATE SET data = EXCLUDED.data
            "#,
        )
        .bind(variable.resource_id.as_uuid())
        .bind(&variable.key)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn list_deployment_variables(
        &self,
        deployment_id: &DeploymentId,
    ) -> StoreResult<Vec<DeploymentVariable>> {
        self.fetch_all_data(
            "SELECT data FROM deployment_variables WHERE deployment_id = $1 ORDER BY key",
            *deployment_id.as_uuid(),
        )
        .await
    }

    async fn upsert_deployment_variable(&self, variable: DeploymentVariable) -> StoreResult<()> {
        let data = Self::to_json(&variable)?;
        sqlx::query(
            r#"
            INSERT INTO deployment_variables (deployment_id, key, data) VALUES ($1, $2, $3)
            ON CONFLICT (deployment_id, key) DO UPDATE SET data = EXCLUDED.data
            "#,
        )
        .bind(variable.deployment_id.as_uuid())
        .bind(&variable.key)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn list_variable_sets(&self, system_id: &SystemId) -> StoreResult<Vec<VariableSet>> {
        self.fetch_all_data(
            "SELECT data FROM variable_sets WHERE system_id = $1 ORDER BY position",
            *system_id.as_uuid(),
        )
        .await
    }

    async fn upsert_variable_set(&self, set: VariableSet) -> StoreResult<()> {
        let data = Self::to_json(&set)?;
        sqlx::query(
            r#"
            INSERT INTO variable_sets (id, system_id, position, data) VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET position = EXCLUDED.position, data = EXCLUDED.data
            "#,
        )
        .bind(set.id.as_uuid())
        .bind(set.system_id.as_uuid())
        .bind(set.position)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl PolicyStore for PostgresStore {
    async fn get_policy(&self, id: &PolicyId) -> StoreResult<Option<Policy>> {
        self.fetch_data("SELECT data FROM policies WHERE id = $1", *id.as_uuid())
            .await
    }

    async fn list_policies(&self, workspace_id: &WorkspaceId) -> StoreResult<Vec<Policy>> {
        self.fetch_all_data(
            "SELECT data FROM policies WHERE workspace_id = $1",
            *workspace_id.as_uuid(),
        )
        .await
    }

    async fn upsert_policy(&self, policy: Policy) -> StoreResult<()> {
        let data = Self::to_json(&policy)?;
        sqlx::query(
            r#"
            INSERT INTO policies (id, workspace_id, data) VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data
            "#,
        )
        .bind(policy.id.as_uuid())
        .bind(policy.workspace_id.as_uuid())
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn list_policy_targets(&self, policy_id: &PolicyId) -> StoreResult<Vec<ReleaseTargetId>> {
        let rows = sqlx::query(
            "SELECT release_target_id FROM policy_targets \
             WHERE policy_id = $1 ORDER BY release_target_id",
        )
        .bind(policy_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|row| {
                let id: Uuid = row.try_get("release_target_id").map_err(map_sqlx_error)?;
                Ok(ReleaseTargetId::from_uuid(id))
            })
            .collect()
    }

    async fn replace_policy_targets(
        &self,
        policy_id: &PolicyId,
        targets: Vec<ReleaseTargetId>,
    ) -> StoreResult<PolicyTargetDiff> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let rows = sqlx::query(
            "SELECT release_target_id FROM policy_targets WHERE policy_id = $1 FOR UPDATE",
        )
        .bind(policy_id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        let current: BTreeSet<ReleaseTargetId> = rows
            .iter()
            .map(|row| {
                row.try_get::<Uuid, _>("release_target_id")
                    .map(ReleaseTargetId::from_uuid)
                    .map_err(map_sqlx_error)
            })
            .collect::<StoreResult<_>>()?;
        let desired: BTreeSet<ReleaseTargetId> = targets.into_iter().collect();

        let diff = PolicyTargetDiff {
            added: desired.difference(&current).copied().collect(),
            removed: current.difference(&desired).copied().collect(),
            unchanged: current.intersection(&desired).copied().collect(),
        };

        if !diff.removed.is_empty() {
            let removed: Vec<Uuid> = diff.removed.iter().map(|id| *id.as_uuid()).collect();
            sqlx::query(
                "DELETE FROM policy_targets WHERE policy_id = $1 AND release_target_id = ANY($2)",
            )
            .bind(policy_id.as_uuid())
            .bind(&removed)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }
        if !diff.added.is_empty() {
            let added: Vec<Uuid> = diff.added.iter().map(|id| *id.as_uuid()).collect();
            sqlx::query(
                r#"
                INSERT INTO policy_targets (policy_id, release_target_id)
                SELECT $1, target_id FROM UNNEST($2::uuid[]) AS target_id
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(policy_id.as_uuid())
            .bind(&added)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(diff)
    }
}

#[async_trait]
impl ApprovalStore for PostgresStore {
    async fn record_approval(&self, record: ApprovalRecord) -> StoreResult<()> {
        let data = Self::to_json(&record)?;
        sqlx::query(
            r#"
            INSERT INTO approvals (id, version_id, environment_id, user_id, data)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.version_id.as_uuid())
        .bind(record.environment_id.as_uuid())
        .bind(&record.user_id)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn list_approvals(
        &self,
        environment_id: &EnvironmentId,
        version_ids: &[VersionId],
    ) -> StoreResult<Vec<ApprovalRecord>> {
        let versions: Vec<Uuid> = version_ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query(
            "SELECT data FROM approvals WHERE environment_id = $1 AND version_id = ANY($2)",
        )
        .bind(environment_id.as_uuid())
        .bind(&versions)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Self::decode_all(rows)
    }
}

#[async_trait]
impl ReleaseTargetStore for PostgresStore {
    async fn get_release_target(&self, id: &ReleaseTargetId) -> StoreResult<Option<ReleaseTarget>> {
        let sql = format!("SELECT {} FROM release_targets WHERE id = $1", TARGET_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref().map(Self::decode_target).transpose()
    }

    async fn find_release_target(
        &self,
        key: &ReleaseTargetKey,
    ) -> StoreResult<Option<ReleaseTarget>> {
        let sql = format!(
            "SELECT {} FROM release_targets \
             WHERE resource_id = $1 AND environment_id = $2 AND deployment_id = $3",
            TARGET_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(key.resource_id.as_uuid())
            .bind(key.environment_id.as_uuid())
            .bind(key.deployment_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref().map(Self::decode_target).transpose()
    }

    async fn list_targets_for_resource(
        &self,
        resource_id: &ResourceId,
    ) -> StoreResult<Vec<ReleaseTarget>> {
        let sql = format!("SELECT {} FROM release_targets WHERE resource_id = $1", TARGET_COLUMNS);
        self.fetch_targets(&sql, *resource_id.as_uuid()).await
    }

    async fn list_targets_for_deployment(
        &self,
        deployment_id: &DeploymentId,
    ) -> StoreResult<Vec<ReleaseTarget>> {
        let sql = format!(
            "SELECT {} FROM release_targets WHERE deployment_id = $1",
            TARGET_COLUMNS
        );
        self.fetch_targets(&sql, *deployment_id.as_uuid()).await
    }

    async fn list_targets_for_environment(
        &self,
        environment_id: &EnvironmentId,
    ) -> StoreResult<Vec<ReleaseTarget>> {
        let sql = format!(
            "SELECT {} FROM release_targets WHERE environment_id = $1",
            TARGET_COLUMNS
        );
        self.fetch_targets(&sql, *environment_id.as_uuid()).await
    }

    async fn list_targets_for_pair(
        &self,
        environment_id: &EnvironmentId,
        deployment_id: &DeploymentId,
    ) -> StoreResult<Vec<ReleaseTarget>> {
        let sql = format!(
            "SELECT {} FROM release_targets WHERE environment_id = $1 AND deployment_id = $2",
            TARGET_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(environment_id.as_uuid())
            .bind(deployment_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        rows.iter().map(Self::decode_target).collect()
    }

    async fn list_targets_for_workspace(
        &self,
        workspace_id: &WorkspaceId,
    ) -> StoreResult<Vec<ReleaseTarget>> {
        let rows = sqlx::query(
            r#"
            SELECT t.id, t.resource_id, t.environment_id, t.deployment_id,
                   t.desired_release_id, t.created_at
            FROM release_targets t
            JOIN resources r ON r.id = t.resource_id
            WHERE r.workspace_id = $1
            "#,
        )
        .bind(workspace_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.iter().map(Self::decode_target).collect()
    }

    async fn replace_targets_for_resource(
        &self,
        resource_id: &ResourceId,
        desired: Vec<ReleaseTargetKey>,
    ) -> StoreResult<TargetDiff> {
        self.replace_targets(TargetScope::Resource(*resource_id), desired)
            .await
    }

    async fn replace_targets_for_deployment(
        &self,
        deployment_id: &DeploymentId,
        desired: Vec<ReleaseTargetKey>,
    ) -> StoreResult<TargetDiff> {
        self.replace_targets(TargetScope::Deployment(*deployment_id), desired)
            .await
    }

    async fn replace_targets_for_environment(
        &self,
        environment_id: &EnvironmentId,
        desired: Vec<ReleaseTargetKey>,
    ) -> StoreResult<TargetDiff> {
        self.replace_targets(TargetScope::Environment(*environment_id), desired)
            .await
    }

    async fn set_desired_release(
        &self,
        target_id: &ReleaseTargetId,
        release_id: &ReleaseId,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE release_targets SET desired_release_id = $2
            WHERE id = $1 AND desired_release_id IS DISTINCT FROM $2
            "#,
        )
        .bind(target_id.as_uuid())
        .bind(release_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        match self.get_release_target(target_id).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(target_id.to_string())),
        }
    }
}

#[async_trait]
impl ReleaseStore for PostgresStore {
    async fn latest_version_release(
        &self,
        target_id: &ReleaseTargetId,
    ) -> StoreResult<Option<VersionRelease>> {
        self.fetch_data(
            "SELECT data FROM version_releases \
             WHERE release_target_id = $1 ORDER BY sequence DESC LIMIT 1",
            *target_id.as_uuid(),
        )
        .await
    }

    async fn insert_version_release(&self, release: VersionRelease) -> StoreResult<()> {
        let data = Self::to_json(&release)?;
        sqlx::query(
            "INSERT INTO version_releases (id, release_target_id, data) VALUES ($1, $2, $3)",
        )
            .bind(release.id.as_uuid())
            .bind(release.release_target_id.as_uuid())
            .bind(data)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn latest_variable_release(
        &self,
        target_id: &ReleaseTargetId,
    ) -> StoreResult<Option<VariableRelease>> {
        self.fetch_data(
            "SELECT data FROM variable_releases \
             WHERE release_target_id = $1 ORDER BY sequence DESC LIMIT 1",
            *target_id.as_uuid(),
        )
        .await
    }

    async fn insert_variable_release(&self, release: VariableRelease) -> StoreResult<()> {
        let data = Self::to_json(&release)?;
        sqlx::query(
            "INSERT INTO variable_releases (id, release_target_id, data) VALUES ($1, $2, $3)",
        )
            .bind(release.id.as_uuid())
            .bind(release.release_target_id.as_uuid())
            .bind(data)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_release(&self, id: &ReleaseId) -> StoreResult<Option<Release>> {
        self.fetch_data("SELECT data FROM releases WHERE id = $1", *id.as_uuid())
            .await
    }

    async fn latest_release(&self, target_id: &ReleaseTargetId) -> StoreResult<Option<Release>> {
        self.fetch_data(
            "SELECT data FROM releases WHERE release_target_id = $1 ORDER BY sequence DESC LIMIT 1",
            *target_id.as_uuid(),
        )
        .await
    }

    async fn insert_release(&self, release: Release) -> StoreResult<()> {
        let data = Self::to_json(&release)?;
        sqlx::query("INSERT INTO releases (id, release_target_id, data) VALUES ($1, $2, $3)")
            .bind(release.id.as_uuid())
            .bind(release.release_target_id.as_uuid())
            .bind(data)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_variable_release(
        &self,
        id: &VariableReleaseId,
    ) -> StoreResult<Option<VariableRelease>> {
        self.fetch_data(
            "SELECT data FROM variable_releases WHERE id = $1",
            *id.as_uuid(),
        )
        .await
    }
}

#[async_trait]
impl JobStore for PostgresStore {
    async fn get_job(&self, id: &JobId) -> StoreResult<Option<Job>> {
        self.fetch_data("SELECT data FROM jobs WHERE id = $1", *id.as_uuid())
            .await
    }

    async fn insert_job(&self, job: Job) -> StoreResult<()> {
        let data = Self::to_json(&job)?;
        sqlx::query(
            r#"
            INSERT INTO jobs (id, release_target_id, resource_id, environment_id, deployment_id,
                              version_id, status, completed_at, data)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.release_target_id.as_uuid())
        .bind(job.resource_id.as_uuid())
        .bind(job.environment_id.as_uuid())
        .bind(job.deployment_id.as_uuid())
        .bind(job.version_id.as_uuid())
        .bind(job.status.as_str())
        .bind(job.completed_at)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn update_job(&self, job: Job) -> StoreResult<()> {
        let data = Self::to_json(&job)?;
        let result = sqlx::query(
            "UPDATE jobs SET status = $2, completed_at = $3, data = $4 WHERE id = $1",
        )
        .bind(job.id.as_uuid())
        .bind(job.status.as_str())
        .bind(job.completed_at)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(job.id.to_string()));
        }
        Ok(())
    }

    async fn list_jobs_for_target(&self, target_id: &ReleaseTargetId) -> StoreResult<Vec<Job>> {
        self.fetch_all_data(
            "SELECT data FROM jobs WHERE release_target_id = $1 ORDER BY sequence DESC",
            *target_id.as_uuid(),
        )
        .await
    }

    async fn list_in_progress_jobs_for_deployment(
        &self,
        deployment_id: &DeploymentId,
    ) -> StoreResult<Vec<Job>> {
        self.fetch_all_data(
            "SELECT data FROM jobs WHERE deployment_id = $1 AND status = 'in_progress'",
            *deployment_id.as_uuid(),
        )
        .await
    }

    async fn list_in_progress_jobs_for_resource(
        &self,
        resource_id: &ResourceId,
    ) -> StoreResult<Vec<Job>> {
        self.fetch_all_data(
            "SELECT data FROM jobs WHERE resource_id = $1 AND status = 'in_progress'",
            *resource_id.as_uuid(),
        )
        .await
    }

    async fn list_non_terminal_jobs(
        &self,
        environment_id: &EnvironmentId,
        deployment_id: &DeploymentId,
    ) -> StoreResult<Vec<Job>> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM jobs
            WHERE environment_id = $1 AND deployment_id = $2
              AND status IN ('pending', 'in_progress', 'action_required')
            "#,
        )
        .bind(environment_id.as_uuid())
        .bind(deployment_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Self::decode_all(rows)
    }

    async fn last_successful_job(
        &self,
        resource_id: &ResourceId,
        version_id: &VersionId,
    ) -> StoreResult<Option<Job>> {
        let row = sqlx::query(
            r#"
            SELECT data FROM jobs
            WHERE resource_id = $1 AND version_id = $2 AND status = 'successful'
            ORDER BY completed_at DESC NULLS LAST
            LIMIT 1
            "#,
        )
        .bind(resource_id.as_uuid())
        .bind(version_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.as_ref().map(Self::decode).transpose()
    }
}

impl Store for PostgresStore {}
