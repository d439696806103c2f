//! hl7conv - Template-driven conversion service for pipe-delimited clinical messages
//!
//! hl7conv converts HL7 v2 style messages into JSON documents using
//! user-editable templates. Templates live in a git repository that is
//! fronted by a cache, edited over HTTP, and also reachable by ordinary git
//! clients over smart HTTP. Conversions run on a pool of worker threads.
//!
//! # Architecture
//!
//! The codebase is layered:
//!
//! - [`cli`] - Command-line interface (`serve`, `config`, `completion`)
//! - [`service`] - HTTP routes, authentication, error mapping
//! - [`coordinator`] - Owns all state; applies every mutation with its invalidation
//! - [`pool`] - Worker threads, dispatch, broadcast and supervision
//! - [`convert`] - Message parsing and the template engine run by workers
//! - [`git`] - Template repository and wire protocol passthrough
//! - [`cache`] - Read/write-through cache over a directory of text files
//! - [`core`] - Domain types, configuration, paths and locking
//!
//! # Consistency Invariants
//!
//! 1. Every template mutation made through the service is followed by a
//!    broadcast to the workers
//! 2. Mutations that bypass the cache (checkout, reset, wire pushes) clear it
//!    wholesale
//! 3. A job submitted to the pool resolves exactly once
//! 4. One service process per template repository

pub mod cache;
pub mod cli;
pub mod convert;
pub mod coordinator;
pub mod core;
pub mod git;
pub mod pool;
pub mod service;
