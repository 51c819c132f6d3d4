pub mod config;
pub mod crawler;
pub mod durations;
pub mod error;
pub mod filter;
pub mod heartbeat;
pub mod hunter;
pub mod laendleimmo_crawler;
pub mod logging;
pub mod message;
pub mod models;
pub mod notifier;
pub mod processor;
pub mod storage;
pub mod utils;
