//! Keel Core
//!
//! Core types and abstractions for the Keel deployment orchestrator.
//!
//! This crate contains:
//! - Domain types: pipeline runs, step descriptors and results, environment bindings
//! - Error taxonomy shared by the loader, engine and server
//! - Template rendering for step parameters
//! - DTOs: Data transfer objects for the HTTP API

pub mod domain;
pub mod dto;
pub mod error;
pub mod template;

pub use error::{ErrorKind, KeelError, Result};
