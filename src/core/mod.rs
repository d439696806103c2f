//! core
//!
//! Core domain types, configuration, and path routing.
//!
//! # Modules
//!
//! - [`types`] - Strong types: TemplateName, BranchName, Oid
//! - [`config`] - Configuration schema and loading
//! - [`paths`] - Centralized path routing for service storage
//! - [`ops`] - Process-level locking
//!
//! # Design Principles
//!
//! - Strong typing prevents invalid states at compile time
//! - Schemas are strict and self-describing

pub mod config;
pub mod ops;
pub mod paths;
pub mod types;
