// src/lib.rs

//! Mirror fleet monitor library

pub mod connection;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
