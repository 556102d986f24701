// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Custom resources of the Gardener APIs.

pub mod backup;
pub mod common;
pub mod controller;
pub mod extensions;
pub mod garden;
pub mod managedresource;
pub mod seed;
pub mod shoot;

pub use backup::{BackupBucket, BackupBucketSpec, BackupBucketStatus, BackupEntry, BackupEntrySpec};
pub use common::{
    condition_types, get_condition, set_condition, Condition, ConditionStatus, LastError,
    LastOperation, LastOperationState, LastOperationType, LocalObjectReference, Provider,
    SecretReference,
};
pub use controller::{
    ControllerInstallation, ControllerInstallationSpec, ControllerInstallationStatus,
    ControllerRegistration, ControllerRegistrationSpec,
};
pub use extensions::{ExtensionKind, ExtensionStatus};
pub use garden::{Bastion, CloudProfile, ManagedSeed, Project, SecretBinding, ShootState};
pub use managedresource::{
    GroupKind, ManagedResource, ManagedResourceSpec, ManagedResourceStatus, ObjectReference,
};
pub use seed::{Seed, SeedSpec, SeedStatus};
pub use shoot::{Shoot, ShootSpec, ShootStatus};
