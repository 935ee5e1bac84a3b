// src/lib.rs
pub mod api;
pub mod banner;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod events;
pub mod executor;
pub mod matrix;
pub mod models;
pub mod report;
pub mod runner;
pub mod store;
