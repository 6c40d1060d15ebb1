// Counter configuration cache
pub mod config_store;

// Sampling and scheduling
pub mod collection_engine;
pub mod scheduler;

// Result buffering and sink dispatch
pub mod batcher;

// Wiring
pub mod system;
