//! `esm_cdn`: resolve, build, cache, and serve browser-compatible standards
//! modules for registry packages (spec §1).
//!
//! Component lettering follows the build pipeline: request parsing (A),
//! registry access (B), metadata resolution (C), artifact addressing (D),
//! the cache protocol (E), the bundler driver (F), the external rewriter (G),
//! declaration handling (H), and the single-writer coordinator (I) that ties
//! them together.

#[macro_use]
extern crate serde_derive;

pub mod bundler;
pub mod cache;
pub mod coordinator;
pub mod declarations;
pub mod ident;
pub mod meta;
pub mod package;
pub mod registry;
pub mod rewrite;
pub mod util;

pub use coordinator::{BuildOutput, Coordinator};
pub use ident::{BuildIdentifier, BuildRequest, Target};
pub use package::{parse_request_path, PackageDescriptor};
pub use util::config::EsmConfig;
pub use util::errors::{Error, ErrorKind, Res};
