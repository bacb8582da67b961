//! cdport core library
//!
//! Component descriptor resolution, component archives and transport
//! containers, and recursive replication of components between OCI
//! registries.

pub mod archive;
pub mod blob;
pub mod cache;
pub mod config;
pub mod copier;
pub mod descriptor;
pub mod digest;
pub mod error;
pub mod oci;
pub mod overwrites;
pub mod resolver;
pub mod signing;

pub use error::{Error, ErrorKind, Result};
