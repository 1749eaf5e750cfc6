//! Component H: Declaration Tree Handler (spec §4.H).
//!
//! Grounded on `elba::retrieve::cache::Source::unpack`'s `copy_dir`-based
//! directory materialization, generalized to the declaration-entry search
//! order and public-URL recording spec §4.H needs.

use std::path::{Path, PathBuf};

use registry::RegistryPackage;
use util::errors::{ErrorKind, Res};

/// Opaque to the core (spec §6 "Declaration copier contract"): copies the
/// declaration tree rooted at `relative_entry`'s directory into wherever the
/// deployment serves declarations from, returning its public URL.
pub trait DeclarationCopier {
    fn copy_declarations(&self, node_modules_dir: &Path, relative_entry: &str) -> Res<String>;
}

/// Default impl: copies the entry's containing directory verbatim under
/// `public_root/<package>@<version>/` and returns a `public_domain`-relative
/// URL to the entry file itself.
pub struct FsDeclarationCopier {
    public_root: PathBuf,
    public_domain: String,
}

impl FsDeclarationCopier {
    pub fn new(public_root: PathBuf, public_domain: String) -> Self {
        FsDeclarationCopier {
            public_root,
            public_domain,
        }
    }
}

impl DeclarationCopier for FsDeclarationCopier {
    fn copy_declarations(&self, node_modules_dir: &Path, relative_entry: &str) -> Res<String> {
        let source_file = node_modules_dir.join(relative_entry);
        let source_dir = source_file.parent().ok_or_else(|| {
            ErrorKind::DeclarationError(format!("entry `{}` has no parent directory", relative_entry))
        })?;

        let dest_dir = self.public_root.join(relative_entry).parent().map(Path::to_path_buf).ok_or_else(|| {
            ErrorKind::DeclarationError(format!("could not derive destination for `{}`", relative_entry))
        })?;

        ::std::fs::create_dir_all(&dest_dir)
            .map_err(|e| ErrorKind::DeclarationError(format!("creating {}: {}", dest_dir.display(), e)))?;

        copy_dir::copy_dir(source_dir, &dest_dir)
            .map_err(|e| ErrorKind::DeclarationError(format!("copying {}: {}", source_dir.display(), e)))?;

        Ok(format!("https://{}/{}", self.public_domain, relative_entry))
    }
}

const CANDIDATE_SUFFIXES: &[&str] = &["/index.d.ts", ".d.ts"];

/// Locate the best declaration entry path for `package`, relative to its own
/// `node_modules` directory, following the spec §4.H search order. Returns
/// `None` if nothing matches; callers should treat that as "no declarations
/// for this build", not an error.
pub fn find_declaration_entry(
    node_modules_dir: &Path,
    package_name: &str,
    package: &RegistryPackage,
    submodule: Option<&str>,
) -> Option<String> {
    if let Some(sub) = submodule {
        let types_name = format!("@types/{}", unscoped(package_name));
        let pkg_dir = node_modules_dir.join(package_name);
        let types_dir = node_modules_dir.join(&types_name);
        for (prefix, base) in &[(package_name, &pkg_dir), (types_name.as_str(), &types_dir)] {
            for suffix in CANDIDATE_SUFFIXES {
                let candidate = format!("{}{}", sub, suffix);
                if base.join(&candidate).is_file() {
                    return Some(format!("{}/{}", prefix, candidate));
                }
            }
        }
        return None;
    }

    if let Some(declared) = package.types.as_ref().or(package.typings.as_ref()) {
        let pkg_dir = node_modules_dir.join(package_name);
        if pkg_dir.join(declared).is_file() {
            return Some(format!("{}/{}", package_name, declared));
        }
    }

    let conventional = node_modules_dir.join(package_name).join("index.d.ts");
    if conventional.is_file() {
        return Some(format!("{}/index.d.ts", package_name));
    }

    let types_name = format!("@types/{}", unscoped(package_name));
    let types_dir = node_modules_dir.join(&types_name);
    let types_entry = package.types.as_ref().or(package.typings.as_ref()).cloned().unwrap_or_else(|| "index.d.ts".to_string());
    if types_dir.join(&types_entry).is_file() {
        return Some(format!("{}/{}", types_name, types_entry));
    }

    None
}

fn unscoped(name: &str) -> &str {
    match name.find('/') {
        Some(idx) if name.starts_with('@') => &name[idx + 1..],
        _ => name,
    }
}
