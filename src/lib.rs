//! CM Onboard: workflow engine that onboards agents and customers into CM.

pub mod activity;
pub mod classifier;
pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod orchestrator;
pub mod record;
pub mod request_builder;
pub mod store;
pub mod translation;
