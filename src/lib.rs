// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
pub mod types;
pub mod error;
pub mod config;
pub mod constants;
pub mod telemetry;
pub mod retry;
pub mod events;
pub mod flow;
pub mod kubernetes;
pub mod secrets;
pub mod managedresource;
pub mod authorizer;
pub mod components;
pub mod seed;
pub mod shoot;
pub mod backupbucket;
pub mod controllerinstallation;
pub mod reconcilers;

#[cfg(test)]
pub mod test_utils;
