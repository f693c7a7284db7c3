pub mod api;
pub mod clients;
pub mod config;
pub mod consumer;
pub mod error;
pub mod ingress;
pub mod models;
pub mod utils;
pub mod worker;
