pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod mcp;
pub mod models;
pub mod molecule;
pub mod workspace;
