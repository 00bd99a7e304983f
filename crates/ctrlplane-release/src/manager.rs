//! Release manager
//!
//! Turns a chosen version and the resolved variables of a target into
//! immutable release rows, writing a new row only when the content differs
//! from the latest one. Callers hold the target's mutex.

use crate::cipher::VariableCipher;
use crate::error::{ReleaseError, Result};
use crate::variables::{self, VariableSources};
use chrono::Utc;
use ctrlplane_store::Store;
use ctrlplane_types::{
    DeploymentVersion, Release, ReleaseId, ReleaseTarget, ReleaseTargetId, ResolvedVariable,
    VariableRelease, VariableReleaseId, VariableValue, VersionId, VersionRelease,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Default bound on candidate versions considered per evaluation
pub const DEFAULT_CANDIDATE_LIMIT: usize = 500;

/// Outcome of an `ensure_*` call
#[derive(Debug, Clone, PartialEq)]
pub struct Ensured<T> {
    /// Whether a new row was written
    pub created: bool,
    pub release: T,
}

impl<T> Ensured<T> {
    fn created(release: T) -> Self {
        Self {
            created: true,
            release,
        }
    }

    fn existing(release: T) -> Self {
        Self {
            created: false,
            release,
        }
    }
}

/// Writes and reads immutable releases for release targets
#[derive(Clone)]
pub struct ReleaseManager {
    store: Arc<dyn Store>,
    cipher: Option<VariableCipher>,
    candidate_limit: usize,
}

impl std::fmt::Debug for ReleaseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseManager")
            .field("encrypts", &self.cipher.is_some())
            .field("candidate_limit", &self.candidate_limit)
            .finish()
    }
}

impl ReleaseManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            cipher: None,
            candidate_limit: DEFAULT_CANDIDATE_LIMIT,
        }
    }

    pub fn with_cipher(mut self, cipher: VariableCipher) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn with_candidate_limit(mut self, limit: usize) -> Self {
        self.candidate_limit = limit.max(1);
        self
    }

    /// Resolve the deployment's variables for a target
    pub async fn resolve_variables(&self, target: &ReleaseTarget) -> Result<Vec<ResolvedVariable>> {
        let resource = self
            .store
            .get_resource(&target.resource_id)
            .await?
            .ok_or_else(|| ReleaseError::NotFound(target.resource_id.to_string()))?;
        let deployment = self
            .store
            .get_deployment(&target.deployment_id)
            .await?
            .ok_or_else(|| ReleaseError::NotFound(target.deployment_id.to_string()))?;

        let resource_variables = self.store.list_resource_variables(&resource.id).await?;
        let deployment_variables = self.store.list_deployment_variables(&deployment.id).await?;
        let variable_sets = self.store.list_variable_sets(&deployment.system_id).await?;

        Ok(variables::resolve_variables(&VariableSources {
            resource: &resource,
            resource_variables: &resource_variables,
            deployment_variables: &deployment_variables,
            variable_sets: &variable_sets,
        }))
    }

    /// Ready versions of the target's deployment, newest first
    pub async fn candidate_versions(
        &self,
        target: &ReleaseTarget,
    ) -> Result<Vec<DeploymentVersion>> {
        Ok(self
            .store
            .list_ready_versions(&target.deployment_id, self.candidate_limit)
            .await?)
    }

    pub async fn ensure_version_release(
        &self,
        target: &ReleaseTarget,
        version_id: VersionId,
    ) -> Result<Ensured<VersionRelease>> {
        if let Some(latest) = self.store.latest_version_release(&target.id).await? {
            if latest.version_id == version_id {
                return Ok(Ensured::existing(latest));
            }
        }

        let release = VersionRelease::new(target.id, version_id);
        self.store.insert_version_release(release.clone()).await?;
        debug!(target_id = %target.id, version_id = %version_id, "Version release created");
        Ok(Ensured::created(release))
    }

    /// Store the variables unless they equal the latest variable release
    ///
    /// Equality is decided on the plaintext digest, so re-encrypting the same
    /// secret does not produce a new row.
    pub async fn ensure_variable_release(
        &self,
        target: &ReleaseTarget,
        variables: Vec<ResolvedVariable>,
    ) -> Result<Ensured<VariableRelease>> {
        let (values, digest) = self.seal(variables)?;

        if let Some(latest) = self.store.latest_variable_release(&target.id).await? {
            if latest.digest == digest {
                return Ok(Ensured::existing(latest));
            }
        }

        let release = VariableRelease {
            id: VariableReleaseId::generate(),
            release_target_id: target.id,
            values,
            digest,
            created_at: Utc::now(),
        };
        self.store.insert_variable_release(release.clone()).await?;
        debug!(target_id = %target.id, digest = %release.digest, "Variable release created");
        Ok(Ensured::created(release))
    }

    /// Pair the version and variable releases into a release
    pub async fn ensure_release(
        &self,
        target: &ReleaseTarget,
        version_id: VersionId,
        variables: Vec<ResolvedVariable>,
    ) -> Result<Ensured<Release>> {
        let version_release = self.ensure_version_release(target, version_id).await?.release;
        let variable_release = self.ensure_variable_release(target, variables).await?.release;

        if let Some(latest) = self.store.latest_release(&target.id).await? {
            if latest.version_release_id == version_release.id
                && latest.variable_release_id == variable_release.id
            {
                return Ok(Ensured::existing(latest));
            }
        }

        let release = Release::new(&version_release, &variable_release);
        self.store.insert_release(release.clone()).await?;
        debug!(target_id = %target.id, release_id = %release.id, "Release created");
        Ok(Ensured::created(release))
    }

    /// Point the target at a release; returns whether the pointer changed
    pub async fn set_desired_release(
        &self,
        target_id: &ReleaseTargetId,
        release_id: &ReleaseId,
    ) -> Result<bool> {
        Ok(self.store.set_desired_release(target_id, release_id).await?)
    }

    /// Decrypted key/value pairs of a stored variable release
    pub fn reveal(&self, release: &VariableRelease) -> Result<Vec<(String, Value)>> {
        release
            .values
            .iter()
            .map(|v| {
                let value = variables::reveal(&v.value, &v.key, self.cipher.as_ref())?;
                Ok((v.key.clone(), value))
            })
            .collect()
    }

    /// Encrypt sensitive plaintext and compute the plaintext digest
    fn seal(&self, resolved: Vec<ResolvedVariable>) -> Result<(Vec<ResolvedVariable>, String)> {
        let mut plaintext = Vec::with_capacity(resolved.len());
        let mut sealed = Vec::with_capacity(resolved.len());

        for variable in resolved {
            let clear = variables::reveal(&variable.value, &variable.key, self.cipher.as_ref())?;
            let value = match (&self.cipher, variable.sensitive) {
                (Some(cipher), true) => VariableValue::Encrypted(cipher.encrypt(&clear)?),
                (None, true) => {
                    warn!(key = %variable.key, "Sensitive variable stored without encryption key");
                    VariableValue::Plain(clear.clone())
                }
                (_, false) => VariableValue::Plain(clear.clone()),
            };
            plaintext.push((variable.key.clone(), clear));
            sealed.push(ResolvedVariable {
                key: variable.key,
                value,
                sensitive: variable.sensitive,
            });
        }

        sealed.sort_by(|a, b| a.key.cmp(&b.key));
        Ok((sealed, variables::digest(&plaintext)))
    }
}
