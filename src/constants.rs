// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// Finalizers owned by this system
pub mod finalizers {
    /// Finalizer on Gardener's own objects (Seeds, Shoots, BackupBuckets)
    pub const GARDENER: &str = "gardener";
    /// Finalizer on Secrets referenced by other objects
    pub const REFERENCE_PROTECTION: &str = "gardener.cloud/reference-protection";
    /// Finalizer of the ManagedResource reconciler for the default class
    pub const MANAGED_RESOURCE: &str = "resources.gardener.cloud/gardener";

    /// The class-specific ManagedResource finalizer
    pub fn managed_resource(class: &str) -> String {
        if class.is_empty() {
            MANAGED_RESOURCE.to_string()
        } else {
            format!("{}-{}", MANAGED_RESOURCE, class)
        }
    }
}

/// Annotations on ManagedResources and the objects they manage
pub mod annotations {
    /// Skip the ManagedResource entirely
    pub const IGNORE: &str = "resources.gardener.cloud/ignore";
    /// `ignore` releases the object from management
    pub const MODE: &str = "resources.gardener.cloud/mode";
    pub const MODE_IGNORE: &str = "ignore";
    /// `<cluster-id>:<namespace>/<name>` of the managing ManagedResource
    pub const ORIGIN: &str = "resources.gardener.cloud/origin";
    pub const DESCRIPTION: &str = "resources.gardener.cloud/description";
    pub const DESCRIPTION_VALUE: &str =
        "DO NOT EDIT - This resource is managed by gardener-resource-manager.\nAny modifications are discarded and the resource is returned to the original state.";
    pub const KEEP_OBJECT: &str = "resources.gardener.cloud/keep-object";
    pub const DELETE_ON_INVALID_UPDATE: &str = "resources.gardener.cloud/delete-on-invalid-update";
    pub const PRESERVE_REPLICAS: &str = "resources.gardener.cloud/preserve-replicas";
    pub const PRESERVE_RESOURCES: &str = "resources.gardener.cloud/preserve-resources";
    /// Timestamp requesting an immediate reconciliation of a Gardener object
    pub const OPERATION: &str = "gardener.cloud/operation";
}

/// Labels used across the system
pub mod labels {
    pub const MANAGED_BY: &str = "resources.gardener.cloud/managed-by";
    pub const GARBAGE_COLLECTABLE: &str = "resources.gardener.cloud/garbage-collectable-reference";
    pub const ROLE: &str = "gardener.cloud/role";
    pub const ROLE_GARDEN: &str = "garden";
    pub const ROLE_INTERNAL_DOMAIN: &str = "internal-domain";
    pub const ROLE_GLOBAL_MONITORING: &str = "global-monitoring";
    pub const ROLE_SEED_SYSTEM_COMPONENT: &str = "seed-system-component";
    pub const ROLE_CONTROLLER_INSTALLATION: &str = "controller-installation";
    pub const ROLE_SHOOT: &str = "shoot";
    pub const SHOOT_NAME: &str = "shoot.gardener.cloud/name";
    pub const SHOOT_PROJECT: &str = "shoot.gardener.cloud/project";
}

/// Labels of secrets owned by the SecretsManager
pub mod secret_labels {
    pub const MANAGED_BY: &str = "managed-by";
    pub const MANAGED_BY_VALUE: &str = "secrets-manager";
    pub const MANAGER_IDENTITY: &str = "manager-identity";
    pub const NAME: &str = "name";
    pub const CHECKSUM_OF_CONFIG: &str = "checksum-of-config";
    pub const CHECKSUM_OF_SIGNING_CA: &str = "checksum-of-signing-ca";
    pub const LAST_ROTATION_INITIATION_TIME: &str = "last-rotation-initiation-time";
    pub const ISSUED_AT_TIME: &str = "issued-at-time";
    pub const VALID_UNTIL_TIME: &str = "valid-until-time";
    pub const PERSIST: &str = "persist";
    pub const BUNDLE_FOR: &str = "bundle-for";
}

/// Well-known namespaces and names
pub mod names {
    pub const GARDEN_NAMESPACE: &str = "garden";
    pub const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";
    pub const SEED_LEASE_NAMESPACE: &str = "gardener-system-seed-lease";
    pub const CLUSTER_IDENTITY: &str = "cluster-identity";
    pub const RESOURCE_MANAGER: &str = "gardener-resource-manager";
    pub const CA_SEED: &str = "ca-seed";
    pub const SECRETS_MANAGER_IDENTITY_SEED: &str = "gardenlet";
    pub const DEFAULT_NAMESPACE: &str = "default";
}

/// Group names of the Gardener APIs
pub mod groups {
    pub const CORE: &str = "core.gardener.cloud";
    pub const RESOURCES: &str = "resources.gardener.cloud";
    pub const EXTENSIONS: &str = "extensions.gardener.cloud";
    pub const OPERATIONS: &str = "operations.gardener.cloud";
    pub const SEED_MANAGEMENT: &str = "seedmanagement.gardener.cloud";
}

/// The operator name used for field management and events
pub const OPERATOR_NAME: &str = "gardener-core";

/// CRD polling configuration
pub mod crd {
    /// Initial polling interval in seconds when waiting for CRDs
    pub const POLL_INTERVAL_SECS: u64 = 10;
    /// Maximum polling interval in seconds (exponential backoff cap)
    pub const POLL_MAX_INTERVAL_SECS: u64 = 60;
}
