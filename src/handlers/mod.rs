//! HTTP handlers for the filestore routes and health probes.

pub mod filestore_handlers;
pub mod health_handlers;
