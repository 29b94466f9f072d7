#![forbid(unsafe_code)]

pub mod app;
pub mod catalog;
pub mod cli;
pub mod extract;
pub mod formats;
pub mod json_store;
pub mod logging;
pub mod progress;
pub mod provision;
pub mod scrape;
pub mod store_config;
