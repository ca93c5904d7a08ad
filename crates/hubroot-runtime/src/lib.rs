//! Run orchestration for hubroot.
//!
//! [`pipeline::Pipeline`] drives one image from reference to exit code,
//! [`process::Launcher`] spawns the command inside the assembled root, and
//! [`supervisor`] keeps the caller outside that root so it can clean up.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod pipeline;
pub mod process;
pub mod supervisor;
