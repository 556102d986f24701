// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Graph based authorization of requests made by seeds.
//!
//! A seed may only access garden objects that are related to it, e.g. the
//! Secrets referenced by Shoots scheduled onto it. The relationships are kept
//! in a [`Graph`] fed by informers, see [`maintain`].

pub mod decision;
pub mod graph;
pub mod maintain;

pub use decision::{Attributes, Decision, SeedAuthorizer, UserInfo};
pub use graph::{Graph, Vertex, VertexType};
pub use maintain::{maintain, Relationships};
