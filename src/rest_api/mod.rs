//! Health and metrics REST surface, toggled by the `rest-api` feature.

mod dto;
mod server;

pub use server::run_server;
