// Library root: exposes internal modules for integration tests in `tests/`.
// Production entry point remains `src/main.rs`.

pub mod cache;
pub mod config;
pub mod feed;
pub mod fetch;
pub mod metrics;
pub mod product;
pub mod scheduler;
pub mod server;
