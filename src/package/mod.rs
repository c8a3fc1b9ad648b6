//! Package installation engine.
//!
//! Logical package names ("php", "lib32gcc") are looked up in layered YAML
//! catalogs for the running platform and dispatched to a backend chain:
//!
//! - apt or dnf/yum wrapped by [`extended::Extended`], which expands aliases
//!   and runs the catalog's installation steps around the native call
//! - the Windows backend, which downloads installers and registers services
//! - the self-contained backend, used as a fallback on Debian-family
//!   releases the apt catalogs do not cover
//!
//! [`engine::Engine`] picks the chain; everything below it talks through the
//! [`manager::PackageManager`] trait.

pub mod backend;
pub mod catalog;
pub mod command;
pub mod context;
pub mod descriptor;
pub mod download;
pub mod engine;
pub mod env_path;
pub mod error;
pub mod extended;
pub mod fallback;
pub mod manager;
pub mod ownership;
pub mod plan;
pub mod services;
pub mod substitute;
pub mod wait;

pub use engine::Engine;
pub use error::PackageError;
