pub mod config;
pub mod monitor;
pub mod notifications;
pub mod version;
pub mod web;
