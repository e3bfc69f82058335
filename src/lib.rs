pub mod api;
pub mod bloom;
pub mod bundle;
pub mod cli;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod model;
pub mod repo_cache;
pub mod rpc;
pub mod store;
