//! venv-sandbox-mcp library
//!
//! Runs untrusted Python in a throwaway virtual environment per request:
//! - Request validation and the execution pipeline (`orchestrator`)
//! - Environment, dependency and process backends (`backend`)
//! - Fence extraction and script materialization (`materialize`)
//! - MCP server implementation using rmcp (`mcp`)

pub mod backend;
pub mod config;
pub mod error;
pub mod materialize;
pub mod mcp;
pub mod orchestrator;
pub mod outcome;
