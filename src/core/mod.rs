pub mod account;
pub mod bucket;
pub mod config;
pub mod error;
pub mod event;
pub mod fixed;
pub mod token;
