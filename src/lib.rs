//! Library crate for http-scan-rs exposing the scanning engine.
pub mod config;
pub mod input;
pub mod logging;
pub mod output;
pub mod scanner;
pub mod types;
pub mod worker;
