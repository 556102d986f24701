// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The seam between the BackupBucket state machine and whatever creates the
//! bucket at the infrastructure provider.

use crate::components::{deploy_and_wait, destroy_and_wait, ExtensionComponent, WaitTimeouts};
use crate::constants::names;
use crate::error::Result;
use crate::kubernetes::{typed, ClusterClient};
use crate::types::{BackupBucket, ExtensionKind, SecretReference};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use kube::ResourceExt;
#[cfg(test)]
use mockall::automock;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// What the provider reported back for a reconciled bucket.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BucketStatus {
    pub provider_status: Option<Value>,
    /// Credentials the provider generated for the bucket, copied into the garden
    pub generated_secret_ref: Option<SecretReference>,
}

/// Creates and deletes the actual bucket.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn reconcile(&self, bucket: &BackupBucket, credentials: &Secret) -> Result<BucketStatus>;

    async fn delete(&self, bucket: &BackupBucket, credentials: &Secret) -> Result<()>;
}

/// Delegates to the provider extension through an
/// `extensions.gardener.cloud/v1alpha1` BackupBucket in the seed.
pub struct ExtensionActuator {
    garden: Arc<dyn ClusterClient>,
    seed: Arc<dyn ClusterClient>,
    timeouts: WaitTimeouts,
}

impl ExtensionActuator {
    pub fn new(garden: Arc<dyn ClusterClient>, seed: Arc<dyn ClusterClient>) -> Self {
        Self {
            garden,
            seed,
            timeouts: WaitTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: WaitTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    fn extension(&self, bucket: &BackupBucket) -> ExtensionComponent {
        ExtensionComponent::new(
            self.seed.clone(),
            ExtensionKind::BackupBucket,
            None,
            &bucket.name_any(),
            &bucket.spec.provider.provider_type,
        )
        .with_field("region", json!(bucket.spec.provider.region))
        .with_field("providerConfig", json!(bucket.spec.provider_config))
        .with_field(
            "secretRef",
            json!({"name": seed_secret_name(bucket), "namespace": names::GARDEN_NAMESPACE}),
        )
        .with_timeouts(self.timeouts)
    }

    async fn copy_secret(client: &dyn ClusterClient, source: &Secret, namespace: &str, name: &str) -> Result<()> {
        let copy = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: source.data.clone(),
            type_: source.type_.clone(),
            ..Default::default()
        };
        typed::create_or_update(client, &copy, |live| {
            let mut merged = live.clone();
            merged.data = copy.data.clone();
            merged.type_ = copy.type_.clone();
            merged
        })
        .await?;
        Ok(())
    }

    /// Copy the credentials the extension generated into the garden.
    async fn sync_generated_secret(&self, bucket: &BackupBucket, status: &Value) -> Result<Option<SecretReference>> {
        let Some(reference) = status
            .get("generatedSecretRef")
            .and_then(|r| serde_json::from_value::<SecretReference>(r.clone()).ok())
        else {
            return Ok(None);
        };
        let generated = typed::get_required::<Secret>(self.seed.as_ref(), Some(&reference.namespace), &reference.name).await?;
        let name = generated_secret_name(bucket);
        Self::copy_secret(self.garden.as_ref(), &generated, names::GARDEN_NAMESPACE, &name).await?;
        Ok(Some(SecretReference {
            name,
            namespace: names::GARDEN_NAMESPACE.to_string(),
        }))
    }
}

/// Name of the credentials copy in the seed.
pub fn seed_secret_name(bucket: &BackupBucket) -> String {
    format!("bucket-{}", bucket.name_any())
}

pub fn generated_secret_name(bucket: &BackupBucket) -> String {
    format!("generated-bucket-{}", bucket.name_any())
}

#[async_trait]
impl Actuator for ExtensionActuator {
    #[instrument(skip(self, bucket, credentials), fields(bucket = %bucket.name_any()))]
    async fn reconcile(&self, bucket: &BackupBucket, credentials: &Secret) -> Result<BucketStatus> {
        Self::copy_secret(self.seed.as_ref(), credentials, names::GARDEN_NAMESPACE, &seed_secret_name(bucket)).await?;
        let extension = self.extension(bucket);
        deploy_and_wait(&extension).await?;

        let status = extension
            .get()
            .await?
            .map(|obj| obj.data["status"].clone())
            .unwrap_or(Value::Null);
        let generated_secret_ref = self.sync_generated_secret(bucket, &status).await?;
        debug!("Provider reported the bucket as ready");
        Ok(BucketStatus {
            provider_status: status.get("providerStatus").cloned(),
            generated_secret_ref,
        })
    }

    #[instrument(skip(self, bucket, _credentials), fields(bucket = %bucket.name_any()))]
    async fn delete(&self, bucket: &BackupBucket, _credentials: &Secret) -> Result<()> {
        destroy_and_wait(&self.extension(bucket)).await?;
        typed::delete::<Secret>(self.garden.as_ref(), Some(names::GARDEN_NAMESPACE), &generated_secret_name(bucket)).await?;
        typed::delete::<Secret>(self.seed.as_ref(), Some(names::GARDEN_NAMESPACE), &seed_secret_name(bucket)).await?;
        info!("Bucket deleted by the provider extension");
        Ok(())
    }
}
