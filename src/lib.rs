// src/lib.rs

pub mod app;
pub mod checksum;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod model;
pub mod payload;
pub mod registry;
pub mod remote;
pub mod report;
pub mod retry;
pub mod storage;
pub mod summary;
