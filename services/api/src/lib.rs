//! services/api/src/lib.rs
//!
//! The companion API service: adapters for the core ports plus the axum web layer.

pub mod adapters;
pub mod config;
pub mod error;
pub mod web;
