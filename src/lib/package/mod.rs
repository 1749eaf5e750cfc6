//! Package identity and ordering (spec §4.A, component A).
//!
//! Generalizes `elba`'s package-identity types (`Name`, `PackageId`,
//! `Summary`) from a server-side module-resolution system's "group/name"
//! convention to a registry CDN's request-path grammar: scoped names, git
//! shorthand, content-mirror identities, submodule probing, and dependency
//! pin ordering.

pub mod descriptor;
pub mod name;
pub mod pins;
pub mod request;
pub mod version;

pub use self::descriptor::PackageDescriptor;
pub use self::name::Name;
pub use self::pins::DependencyPinSet;
pub use self::request::{parse_request_path, Query};
pub use self::version::PackageVersion;
