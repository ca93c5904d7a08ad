//! # hubroot-core
//!
//! Low-level Linux isolation primitives for hubroot.
//!
//! This crate provides safe wrappers over:
//! - **Filesystem**: `chroot(2)` into an assembled root and `/dev` seeding.
//! - **Namespaces**: PID namespace creation for the launched child.
//! - **Privilege**: effective-UID checks used to fail early.
//!
//! All system calls go through `nix`; failures surface as
//! `HubrootError::Isolation` or `HubrootError::Filesystem`.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod filesystem;
pub mod namespace;
pub mod privilege;
