pub mod server;

pub use server::{start_server, validate_server_config};
