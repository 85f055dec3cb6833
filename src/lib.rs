pub mod cert;
pub mod cli;
pub mod codec;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod exec;
pub mod export;
pub mod host;
pub mod port;
pub mod service;

pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
