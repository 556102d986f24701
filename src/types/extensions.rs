// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Extension resources (`extensions.gardener.cloud/v1alpha1`).
//!
//! These are reconciled by provider extensions outside of this crate, so they are
//! handled as dynamic objects with a typed view of the status only.

use super::common::{LastError, LastOperation, LastOperationState};
use crate::constants::groups;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const EXTENSIONS_VERSION: &str = "v1alpha1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExtensionKind {
    Infrastructure,
    ControlPlane,
    Worker,
    DnsRecord,
    Extension,
    BackupBucket,
    BackupEntry,
}

impl ExtensionKind {
    pub fn kind(&self) -> &'static str {
        match self {
            ExtensionKind::Infrastructure => "Infrastructure",
            ExtensionKind::ControlPlane => "ControlPlane",
            ExtensionKind::Worker => "Worker",
            ExtensionKind::DnsRecord => "DNSRecord",
            ExtensionKind::Extension => "Extension",
            ExtensionKind::BackupBucket => "BackupBucket",
            ExtensionKind::BackupEntry => "BackupEntry",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            ExtensionKind::Infrastructure => "infrastructures",
            ExtensionKind::ControlPlane => "controlplanes",
            ExtensionKind::Worker => "workers",
            ExtensionKind::DnsRecord => "dnsrecords",
            ExtensionKind::Extension => "extensions",
            ExtensionKind::BackupBucket => "backupbuckets",
            ExtensionKind::BackupEntry => "backupentries",
        }
    }

    pub fn namespaced(&self) -> bool {
        !matches!(self, ExtensionKind::BackupBucket | ExtensionKind::BackupEntry)
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(groups::EXTENSIONS, EXTENSIONS_VERSION, self.kind())
    }

    pub fn api_resource(&self) -> ApiResource {
        ApiResource::from_gvk_with_plural(&self.gvk(), self.plural())
    }
}

impl fmt::Display for ExtensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// The status fields every extension resource shares.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionStatus {
    #[serde(default)]
    pub last_operation: Option<LastOperation>,
    #[serde(default)]
    pub last_error: Option<LastError>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

impl ExtensionStatus {
    pub fn from_object(obj: &DynamicObject) -> Self {
        obj.data
            .get("status")
            .and_then(|s| serde_json::from_value(s.clone()).ok())
            .unwrap_or_default()
    }

    /// Succeeded for the current generation of the object.
    pub fn is_ready(&self, generation: Option<i64>) -> bool {
        let observed = match (self.observed_generation, generation) {
            (Some(observed), Some(generation)) => observed >= generation,
            _ => true,
        };
        observed
            && self
                .last_operation
                .as_ref()
                .is_some_and(|op| op.state == LastOperationState::Succeeded)
    }
}
