pub mod clock;
pub mod elasticsearch;
pub mod file_sink;
pub mod observability;
pub mod search_sink;
pub mod sysinfo_source;
