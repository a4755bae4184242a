pub mod banner;
pub mod config;
pub mod consts;
pub mod engine;
pub mod error;
pub mod events;
pub mod history;
pub mod spinner;
pub mod strategy;
pub mod task;
