//! Filesystem preparation and root switching.
//!
//! `devices` populates `/dev` inside the assembled root; `chroot`
//! confines the calling process to it.

pub mod chroot;
pub mod devices;
