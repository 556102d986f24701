// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Generation, rotation and garbage collection of secrets.
//!
//! Every logical secret is materialized as an immutable Secret whose name is
//! derived from the configuration checksum and the last rotation initiation
//! time. Changing either produces a new physical secret; the logical name
//! stays the same.

pub mod config;
pub mod manager;

pub use config::{
    BasicAuthConfig, BytesConfig, CertType, CertificateConfig, EtcdEncryptionKeyConfig,
    RsaKeyConfig, SecretConfig, StaticTokenConfig, StaticTokenEntry,
};
pub use manager::{
    secret_name, GenerateOptions, RotationStrategy, SecretClass, SecretsManager, SigningMode,
};
