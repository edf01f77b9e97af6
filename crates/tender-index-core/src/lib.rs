//! # tender-index core
//!
//! Storage-agnostic logic for the tender document pipeline: data models,
//! page-aware chunking, the plan matrix and entitlement policy, document
//! resolution, and the retrieval/brief algorithms.
//!
//! This crate has no tokio, sqlx, or filesystem dependencies. The
//! application crate supplies SQLite-backed implementations of the
//! [`store`] traits; [`store::memory`] provides an in-process one for
//! tests.

pub mod chunk;
pub mod embedding;
pub mod gate;
pub mod models;
pub mod plan;
pub mod resolver;
pub mod retrieval;
pub mod store;
