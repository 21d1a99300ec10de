// src/lib.rs
pub mod acceptor;
pub mod config;
pub mod death_ring;
pub mod error;
pub mod http;
pub mod logging;
pub mod parser;
pub mod request;
pub mod scheduler;
pub mod server;
pub mod slot;
pub mod syscalls;
pub mod url_map;
pub mod worker;

// Re-exports for users
pub use config::Config;
pub use error::{SkuaError, SkuaResult};
pub use http::{Method, Status};
pub use server::Server;
pub use url_map::UrlMap;
