//! CRM Lifecycle API Library
//!
//! This library provides the lead funnel, task and opportunity lifecycles of
//! the CRM together with the contact audit trail, the persistence adapters
//! (Postgres and in-memory) and the HTTP handlers.
//!
//! # Modules
//!
//! - `api`: API definitions.
//! - `core`: Core business logic.
//! - `data`: Data access layer.
//! - `audit`: Contact timeline (append, list, narrow edit/delete).
//! - `config`: Configuration management.
//! - `db`: Database connection and pool management.
//! - `directory`: Companies, contacts and campaigns.
//! - `email`: Email templates, rendering and the mail transport seam.
//! - `errors`: HTTP error handling types.
//! - `handlers`: HTTP request handlers.
//! - `import`: CSV / spreadsheet reader for lead imports.
//! - `leads`: Lead funnel and lead-to-opportunity conversion.
//! - `lifecycle`: Transition policy and lifecycle errors.
//! - `memory_store`: In-memory store used by tests.
//! - `models`: Core data models.
//! - `opportunities`: Opportunity pipeline and statistics.
//! - `pg_store`: Postgres store.
//! - `routes`: Router assembly and middleware.
//! - `settings`: Settings and lookup values.
//! - `store`: Persistence port.
//! - `tasks`: Task lifecycle and follow-ups.

pub mod api;
pub mod core;
pub mod data;

pub mod audit;
pub mod config;
pub mod db;
pub mod directory;
pub mod email;
pub mod errors;
pub mod handlers;
pub mod import;
pub mod leads;
pub mod lifecycle;
pub mod memory_store;
pub mod models;
pub mod opportunities;
pub mod pg_store;
pub mod routes;
pub mod settings;
pub mod store;
pub mod tasks;
