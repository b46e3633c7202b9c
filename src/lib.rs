//! kbundle-mcp library — exposes all internal modules so integration tests
//! in tests/ can import them. This is a CLI tool; the lib target exists
//! solely to give the test suite access to internal types.
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::too_many_lines,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod acquire;
pub mod catalogue;
pub mod config;
pub mod error;
pub mod explorer;
pub mod format;
pub mod kubectl_exec;
pub mod lifecycle;
pub mod logging;
pub mod model;
pub mod rpc;
pub mod sandbox;
pub mod supervisor;
