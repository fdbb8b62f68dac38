//! Core domain: records, the streaming engine and the indicator formulas.

pub mod quote;
pub mod error;
pub mod cache;
pub mod mutation;
pub mod provider;
pub mod hub;
pub mod aggregator;
pub mod buffer;
pub mod indicator;
pub mod indicator_helpers;
pub mod registry;
pub mod engine_config;
