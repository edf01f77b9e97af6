//! # Tender Index
//!
//! Per-document indexing, grounded Q&A and usage-metered access for
//! tender files.
//!
//! A file uploaded to a tender is resolved to a content-derived document
//! hash, indexed once in the background (extract, chunk, embed and an
//! optional precomputed brief), and then answered from: questions and
//! briefs only ever read that one document's chunks. Every generation
//! request passes through an entitlement gate that meters it against the
//! org's plan in a single atomic ledger step.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────┐   ┌────────────────────────┐
//! │  Upload   │──▶│ Resolver │──▶│ Pipeline               │
//! │ transport │   │ docHash  │   │ Extract→Chunk→Embed→Sum │
//! └───────────┘   └──────────┘   └───────────┬────────────┘
//!                                            ▼
//!                 ┌──────────┐         ┌──────────┐
//!  CLI / HTTP ───▶│   Gate   │────────▶│  Engine  │
//!                 │  ledger  │         │ ask/brief│
//!                 └──────────┘         └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] / [`migrate`] | SQLite pool and schema |
//! | [`sqlite_store`] | SQLite implementation of the core store traits |
//! | [`storage`] | Filesystem blob storage |
//! | [`extract`] | Per-page text extraction (PDF, DOCX, HTML, text) |
//! | [`embedding`] / [`llm`] | Embedding and chat completion providers |
//! | [`pipeline`] | Background indexing runs |
//! | [`progress`] | Progress projection and watch poller |
//! | [`engine`] | Grounded ask and brief |
//! | [`gate`] | Entitlement gate service |
//! | [`server`] | HTTP API |
//! | [`services`] | Wiring of all of the above |

pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod extract;
pub mod gate;
pub mod llm;
pub mod migrate;
pub mod pipeline;
pub mod progress;
pub mod server;
pub mod services;
pub mod sqlite_store;
pub mod storage;
pub mod upload;
