//! Integration tests for the bridge node
//!
//! - Configuration files as the node loads them
//! - Status JSON as served by `/api/status`

mod config_files;
mod status_json;
