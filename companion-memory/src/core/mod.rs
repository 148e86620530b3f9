pub mod chunking;
pub mod compression;
pub mod config;
pub mod memory_flow;
pub mod memory_store;
pub mod progress;
pub mod retry;
pub mod sentiment;
pub mod storage;
pub mod summarizer;
pub mod vector;
