//! wmstats library exports

pub mod aggregate;
pub mod cache;
pub mod cli;
pub mod config;
pub mod decode;
pub mod error;
pub mod fetch;
pub mod filters;
pub mod models;
pub mod presentation;
pub mod routes;
pub mod state;
pub mod stats;
pub mod tasks;
