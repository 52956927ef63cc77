//! Domain models shared by the supervisor, the sync pipeline, and the RPC layer.

pub mod account;
pub mod auth;
pub mod event;
pub mod payload;
pub mod policy;
