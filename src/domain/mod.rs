// Counter identity, configuration and samples
pub mod counter;

// Port interfaces
pub mod ports;

// Domain-specific error types
pub mod errors;
