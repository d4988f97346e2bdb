//! Event models and configuration shared by the seqline engine and CLI.

pub mod config;
pub mod models;
