//! Model-type asset catalogue.
//!
//! Server side: the registry maps catalogue keys to designs, the resolver
//! turns a design's uploads into reachable URLs, and the asset service
//! handles uploads and deletes. Client side: the [`viewer`] module negotiates
//! a decoder and composes resolved models into a scene.

pub mod api;
pub mod assets;
pub mod config;
pub mod convert;
pub mod db;
pub mod error;
pub mod registry;
pub mod resolver;
pub mod storage;
pub mod viewer;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
