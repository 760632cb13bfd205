//! qtrack: CAPA and change request tracking
//!
//! Corrective and preventive action records and change requests move through
//! fixed lifecycles, link to their originating deviation or CAPA, and are
//! listed through an allow-listed, parameterized query builder over SQLite.

pub mod cli;
pub mod core;
pub mod entities;
