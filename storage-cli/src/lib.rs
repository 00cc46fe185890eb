//! Building blocks of the `storage` command line client: connection
//! configuration, backend selection by scheme and the subcommands.

pub mod commands;
pub mod config;
pub mod factory;

pub use config::{resolve_url, ConnectionConfig, URL_ENV};
pub use factory::Backend;
