//! Shipyard Library
//!
//! Core modules for the shipyard deployment pipeline.

pub mod app;
pub mod bus;
pub mod cache;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod gateway;
pub mod logs;
pub mod models;
pub mod router;
pub mod server;
pub mod storage;
pub mod utils;
pub mod workers;
