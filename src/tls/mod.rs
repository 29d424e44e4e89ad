pub mod config;

pub use self::config::build_client_config;
