//! Core translation service module

pub mod config;
pub mod engine;
pub mod errors;
pub mod models;
pub mod registry;
pub mod service;
