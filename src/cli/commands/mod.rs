//! CLI command implementations

pub mod capa;
pub mod cr;
pub mod dev;
pub mod filter;
pub mod init;
pub mod personnel;
