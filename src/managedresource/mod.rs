// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! ManagedResources: declarative sets of objects kept applied in a target cluster.
//!
//! The payload of a ManagedResource lives in Secrets next to it. The
//! [`ManagedResourceReconciler`] decodes it, applies every object in a fixed
//! kind order, releases objects switched to ignore mode and prunes what is no
//! longer part of the payload. The [`HealthReconciler`] reports the health of
//! what was applied.

pub mod care;
pub mod decode;
pub mod health;
pub mod index;
pub mod merge;
pub mod reconciler;

pub use care::HealthReconciler;
pub use decode::{decode_secrets, DecodedPayload, DesiredObject};
pub use index::{kind_priority, Equivalences, ObjectIndex};
pub use reconciler::{condition_reasons, ManagedResourceReconciler};
