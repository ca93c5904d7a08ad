//! Linux namespace management for the launched child.
//!
//! Only the PID namespace is used: networking, IPC, and hostname are
//! shared with the host.

pub mod pid;
