#![forbid(unsafe_code)]

pub mod app;
pub mod backend;
pub mod config;
pub mod driver;
pub mod errors;
pub mod models;
pub mod notify;
pub mod persistence;
pub mod rpc;
pub mod supervisor;
pub mod sync;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
