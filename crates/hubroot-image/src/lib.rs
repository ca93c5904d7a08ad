//! # hubroot-image
//!
//! Turns an image reference into an assembled root directory.
//!
//! Handles:
//! - **Reference**: parsing `name[:tag]` into a namespaced repository and tag.
//! - **Registry**: token issuance, manifest retrieval, and blob streaming.
//! - **Layers**: gzip-compressed tar extraction in manifest order.
//! - **Hashing**: SHA-256 verification of downloaded blobs.
//! - **Rootfs**: seeding `/dev` once every layer is in place.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod auth;
pub mod hash;
pub mod layer;
pub mod manifest;
pub mod reference;
pub mod registry;
pub mod rootfs;
