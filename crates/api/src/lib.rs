//! HTTP surface for the catalog and reservation services.

pub mod app;
pub mod context;
pub mod middleware;
