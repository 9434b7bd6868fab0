pub mod app;
pub mod config;
pub mod dataverse;
pub mod error;
pub mod export;
pub mod extract;
pub mod identifier;
pub mod merge;
pub mod output;
pub mod schema;
pub mod sheet;
