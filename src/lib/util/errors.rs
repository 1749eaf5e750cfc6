//! The error taxonomy for the build pipeline (spec §7).
//!
//! Every fallible operation in this crate returns `Res<T>` (`Result<T, Error>`,
//! an alias over `failure::Error`), with the concrete cause attached via
//! `.context(ErrorKind::...)` at the point where it's first classified.

use failure::Fail;

pub type Error = failure::Error;
pub type Res<T> = Result<T, Error>;

/// The kinds of errors the core build pipeline can raise (spec §7).
///
/// All kinds except `Rewrite` abort the build, skip the cache commit, and
/// tear down the scratch directory. `Rewrite` is logged and the build still
/// commits, since the diagnostic module itself is a valid artifact.
#[derive(Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "invalid package descriptor: {}", _0)]
    InvalidDescriptor(String),

    #[fail(display = "not found: {}", _0)]
    NotFound(String),

    #[fail(display = "network error: {}", _0)]
    NetworkError(String),

    #[fail(display = "install failed: {}", _0)]
    InstallError(String),

    #[fail(display = "could not resolve entry points: {}", _0)]
    ResolveError(String),

    #[fail(display = "bundler error: {}", _0)]
    BundleError(String),

    #[fail(display = "could not resolve external import `{}`", _0)]
    RewriteError(String),

    #[fail(display = "store error: {}", _0)]
    StoreError(String),

    #[fail(display = "declaration copy failed: {}", _0)]
    DeclarationError(String),
}

impl ErrorKind {
    /// Whether this kind of error is non-fatal to the build (spec §7: only
    /// `RewriteError` still allows the build to commit).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ErrorKind::RewriteError(_))
    }
}
