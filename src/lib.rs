pub mod carrier;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod gate;
pub mod progress;
pub mod storage;
pub mod web;
