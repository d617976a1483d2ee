//! Data Transfer Objects for the HTTP API
//!
//! Lightweight representations of domain entities shared by the server,
//! the client and the CLI.

pub mod pipeline;
pub mod run;
