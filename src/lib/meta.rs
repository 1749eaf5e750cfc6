//! Component C: Metadata Resolver (spec §4.C).
//!
//! Grounded on `elba::retrieve::cache::Cache::checkout_source`'s
//! manifest-then-dependencies-then-`Source` shape, generalized to the
//! nine-step deterministic algorithm spec §4.C actually needs: seed from
//! registry metadata, probe a `@types/<name>` sibling, promote `main` to
//! `module` under a handful of conditions, install, then classify whichever
//! entry file ends up as the package's import path.

use failure::ResultExt;
use indexmap::IndexSet;
use slog::Logger;
use std::fs;
use std::path::{Path, PathBuf};

use package::descriptor::PackageDescriptor;
use package::name::Name;
use package::version::PackageVersion;
use registry::{RegistryClient, RegistryPackage};
use util::errors::{ErrorKind, Res};
use util::text;

/// Candidate suffixes tried, in order, when resolving a `main`/`module`
/// field (which may name a directory, an extensionless stem, or a file) to
/// an actual file on disk.
const ENTRY_SUFFIXES: &[&str] = &["", ".js", ".mjs", ".cjs", "/index.js", "/index.mjs", "/index.cjs"];

/// Superset of registry metadata plus the build-time derived fields spec §3
/// lists (`entryMain`, `entryModule`, `declarationEntry`, `exportNames`,
/// `hasDefault`, `declarationsUrl`). This is the cache payload (spec §4.E).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolvedMeta {
    pub package: RegistryPackage,
    pub entry_main: String,
    /// Standards-module entry path, or empty if the package has none.
    pub entry_module: String,
    /// Declaration file path, or empty. Filled in by component H.
    pub declaration_entry: String,
    pub export_names: IndexSet<String>,
    pub has_default: bool,
    /// Public URL of the emitted declaration tree, or empty. Filled in by
    /// component H.
    pub declarations_url: String,
}

impl ResolvedMeta {
    fn seed(package: RegistryPackage) -> Self {
        ResolvedMeta {
            package,
            entry_main: String::new(),
            entry_module: String::new(),
            declaration_entry: String::new(),
            export_names: IndexSet::new(),
            has_default: false,
            declarations_url: String::new(),
        }
    }
}

/// Run the component C algorithm: fetch metadata, probe for a declarations
/// sibling, install the closure into `scratch_dir`, then classify the
/// resulting entry file(s). Steps are numbered to match spec §4.C.
pub fn resolve_meta(
    scratch_dir: &Path,
    descriptor: &PackageDescriptor,
    registry: &dyn RegistryClient,
    logger: &Logger,
) -> Res<ResolvedMeta> {
    // 1. Fetch registry metadata, seed ResolvedMeta.
    let (mut p, _) = registry.get_package_info(descriptor.name.as_str(), &descriptor.version.to_string())?;

    let mut install_list = vec![descriptor.clone()];

    // 2. Probe a `@types/<name>` sibling when the package ships no
    // declaration field of its own and isn't already scoped.
    if p.types.is_none() && p.typings.is_none() && !descriptor.name.is_scoped() {
        let types_name = format!("@types/{}", descriptor.name.unscoped());
        match registry.get_package_info(&types_name, "latest") {
            Ok((types_pkg, _)) if types_pkg.declares_any_entry() => {
                slog::debug!(logger, "adding @types sibling to install list"; "package" => &types_name);
                install_list.push(PackageDescriptor::new(
                    Name::new(types_name)?,
                    PackageVersion::exact(types_pkg.version.clone()),
                    None,
                ));
            }
            Ok(_) => {}
            Err(e) => {
                if !is_not_found(&e) {
                    return Err(e);
                }
            }
        }
    }

    // 3. `type == "module"` with no `module` entry: promote `main`.
    if p.r#type.as_deref() == Some("module") && p.module.is_none() {
        p.module = p.main.clone();
    }

    // 4. No `module` yet, but a modern export map's top-level `import`
    // branch names one.
    if p.module.is_none() {
        if let Some(import_branch) = p.exports.as_ref().and_then(|e| e.get("import")) {
            if let Some(s) = import_branch.as_str() {
                p.module = Some(s.to_string());
            }
        }
    }

    // 5. A submodule request overrides the top-level entries entirely.
    if let Some(sub) = &descriptor.submodule {
        p.module = None;
        p.types = None;
        p.typings = None;
        p.main = Some(sub.clone());
    }

    // 6. Install the resolved closure into the scratch tree.
    registry.install_closure(scratch_dir, &install_list)?;

    let pkg_dir = scratch_dir.join("node_modules").join(descriptor.name.as_str());

    // 7. Submodule overlay: prefer the subpackage's own package.json; fall
    // back to sniffing the submodule file itself.
    if let Some(sub) = descriptor.submodule.clone() {
        let sub_pkg_json = pkg_dir.join(&sub).join("package.json");
        if sub_pkg_json.is_file() {
            overlay_submodule_package_json(&mut p, &sub, &sub_pkg_json)?;
        } else if let Some(path) = resolve_entry_file(&pkg_dir, &sub) {
            let source =
                fs::read_to_string(&path).context(ErrorKind::ResolveError(format!("reading {}", path.display())))?;
            if text::scan_module(&source).is_standards_module {
                p.module = Some(sub);
            }
        }
    }

    let mut meta = ResolvedMeta::seed(p.clone());
    meta.entry_main = p.main.clone().unwrap_or_default();

    // 8. If `module` is set, classify it; a server-module-shaped file there
    // means the field was mislabeled, so fall back to `main` (step 9).
    let mut classified = false;
    if let Some(module_path) = p.module.clone() {
        match resolve_entry_file(&pkg_dir, &module_path) {
            Some(path) => {
                let source = fs::read_to_string(&path)
                    .context(ErrorKind::ResolveError(format!("reading {}", path.display())))?;
                let shape = text::scan_module(&source);
                if shape.is_standards_module {
                    meta.entry_module = module_path;
                    meta.export_names = shape.export_names;
                    meta.has_default = shape.has_default;
                    classified = true;
                } else {
                    slog::warn!(logger, "module field was mislabeled, falling back to main";
                        "package" => descriptor.name.as_str(), "module" => &module_path);
                }
            }
            None => {
                slog::warn!(logger, "module entry not found on disk";
                    "package" => descriptor.name.as_str(), "module" => &module_path);
            }
        }
    }

    // 9. No standards-module entry survived: classify the server-module
    // import path instead.
    if !classified {
        if let Some(path) = resolve_entry_file(&pkg_dir, &meta.entry_main) {
            let source =
                fs::read_to_string(&path).context(ErrorKind::ResolveError(format!("reading {}", path.display())))?;
            let shape = text::scan_module(&source);
            meta.export_names = shape.export_names;
            meta.has_default = shape.has_default;
        } else {
            return Err(ErrorKind::ResolveError(format!(
                "no entry file found for {}",
                descriptor
            ))
            .into());
        }
    }

    Ok(meta)
}

fn overlay_submodule_package_json(p: &mut RegistryPackage, sub: &str, path: &Path) -> Res<()> {
    let raw =
        fs::read_to_string(path).context(ErrorKind::ResolveError(format!("reading {}", path.display())))?;
    let sub_pkg: RegistryPackage =
        serde_json::from_str(&raw).context(ErrorKind::ResolveError(format!("parsing {}", path.display())))?;

    if let Some(m) = &sub_pkg.main {
        p.main = Some(format!("{}/{}", sub, m));
    }
    if let Some(m) = &sub_pkg.module {
        p.module = Some(format!("{}/{}", sub, m));
    }
    if let Some(t) = &sub_pkg.types {
        p.types = Some(format!("{}/{}", sub, t));
    }
    if let Some(t) = &sub_pkg.typings {
        p.typings = Some(format!("{}/{}", sub, t));
    }
    if sub_pkg.r#type.as_deref() == Some("module") && p.module.is_none() && p.main.is_some() {
        p.module = p.main.clone();
    }

    Ok(())
}

/// Resolve a `main`/`module`-style relative path to an actual file under
/// `pkg_dir`, trying directory-index and extension fallbacks in order.
/// Exposed for the bundler driver, which needs the same resolution to find
/// the file backing a package's canonical entry (spec §4.F).
pub fn resolve_entry_file(pkg_dir: &Path, rel: &str) -> Option<PathBuf> {
    let rel = rel.trim_start_matches("./");
    for suffix in ENTRY_SUFFIXES {
        let candidate = pkg_dir.join(format!("{}{}", rel, suffix));
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

fn is_not_found(e: &failure::Error) -> bool {
    matches!(e.downcast_ref::<ErrorKind>(), Some(ErrorKind::NotFound(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use package::name::Name;
    use registry::GitRef;
    use semver::Version;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::fs;

    struct FakeRegistry {
        packages: HashMap<String, RegistryPackage>,
        installs: RefCell<Vec<Vec<PackageDescriptor>>>,
        root: PathBuf,
    }

    impl FakeRegistry {
        fn new(root: PathBuf) -> Self {
            FakeRegistry {
                packages: HashMap::new(),
                installs: RefCell::new(Vec::new()),
                root,
            }
        }

        fn with_package(mut self, name: &str, pkg: RegistryPackage) -> Self {
            self.packages.insert(name.to_string(), pkg);
            self
        }

        fn write_file(&self, rel: &str, contents: &str) {
            let path = self.root.join("node_modules").join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, contents).unwrap();
        }
    }

    fn pkg(name: &str, version: &str) -> RegistryPackage {
        RegistryPackage {
            name: name.to_string(),
            version: Version::parse(version).unwrap(),
            main: None,
            module: None,
            r#type: None,
            types: None,
            typings: None,
            exports: None,
            dependencies: Default::default(),
            peer_dependencies: Default::default(),
        }
    }

    impl RegistryClient for FakeRegistry {
        fn get_package_info(&self, name: &str, _version: &str) -> Res<(RegistryPackage, Option<String>)> {
            self.packages
                .get(name)
                .cloned()
                .map(|p| (p, None))
                .ok_or_else(|| ErrorKind::NotFound(name.to_string()).into())
        }

        fn install_closure(&self, _dir: &Path, specs: &[PackageDescriptor]) -> Res<()> {
            self.installs.borrow_mut().push(specs.to_vec());
            Ok(())
        }

        fn list_repo_refs(&self, _git_url: &str) -> Res<Vec<GitRef>> {
            Ok(Vec::new())
        }
    }

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = ::std::env::temp_dir().join(format!("esm-cdn-meta-test-{}", tag));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn falls_back_to_main_as_server_module() {
        let dir = scratch_dir("server-module");
        let mut main_pkg = pkg("left-pad", "1.3.0");
        main_pkg.main = Some("index.js".to_string());
        let registry = FakeRegistry::new(dir.clone()).with_package("left-pad", main_pkg);
        registry.write_file("left-pad/index.js", "module.exports = function leftPad() {};\n");

        let descriptor = PackageDescriptor::new(
            Name::new("left-pad").unwrap(),
            PackageVersion::exact(Version::parse("1.3.0").unwrap()),
            None,
        );

        let meta = resolve_meta(&dir, &descriptor, &registry, &test_logger()).unwrap();
        assert_eq!(meta.entry_main, "index.js");
        assert!(meta.entry_module.is_empty());
        assert!(meta.has_default);
    }

    #[test]
    fn promotes_main_to_module_when_type_is_module() {
        let dir = scratch_dir("type-module");
        let mut main_pkg = pkg("nanoid", "3.3.4");
        main_pkg.main = Some("index.js".to_string());
        main_pkg.r#type = Some("module".to_string());
        let registry = FakeRegistry::new(dir.clone()).with_package("nanoid", main_pkg);
        registry.write_file("nanoid/index.js", "export function nanoid() {}\nexport default nanoid;\n");

        let descriptor = PackageDescriptor::new(
            Name::new("nanoid").unwrap(),
            PackageVersion::exact(Version::parse("3.3.4").unwrap()),
            None,
        );

        let meta = resolve_meta(&dir, &descriptor, &registry, &test_logger()).unwrap();
        assert_eq!(meta.entry_module, "index.js");
        assert!(meta.export_names.contains("nanoid"));
        assert!(meta.has_default);
    }

    #[test]
    fn clears_mislabeled_module_field_and_falls_back() {
        let dir = scratch_dir("mislabeled");
        let mut main_pkg = pkg("confused", "1.0.0");
        main_pkg.main = Some("index.js".to_string());
        main_pkg.module = Some("index.mjs".to_string());
        let registry = FakeRegistry::new(dir.clone()).with_package("confused", main_pkg);
        registry.write_file("confused/index.js", "module.exports = { foo: 1 };\n");
        // `module` field points at a file that is actually CJS: mislabeled.
        registry.write_file("confused/index.mjs", "module.exports = { foo: 1 };\n");

        let descriptor = PackageDescriptor::new(
            Name::new("confused").unwrap(),
            PackageVersion::exact(Version::parse("1.0.0").unwrap()),
            None,
        );

        let meta = resolve_meta(&dir, &descriptor, &registry, &test_logger()).unwrap();
        assert!(meta.entry_module.is_empty());
        assert!(meta.export_names.contains("foo"));
    }

    #[test]
    fn skips_types_sibling_probe_for_scoped_packages() {
        let dir = scratch_dir("scoped");
        let mut main_pkg = pkg("@babel/core", "7.0.0");
        main_pkg.main = Some("index.js".to_string());
        let registry = FakeRegistry::new(dir.clone()).with_package("@babel/core", main_pkg);
        registry.write_file("@babel/core/index.js", "module.exports = {};\n");

        let descriptor = PackageDescriptor::new(
            Name::new("@babel/core").unwrap(),
            PackageVersion::exact(Version::parse("7.0.0").unwrap()),
            None,
        );

        let meta = resolve_meta(&dir, &descriptor, &registry, &test_logger()).unwrap();
        assert_eq!(registry.installs.borrow().len(), 1);
        assert_eq!(registry.installs.borrow()[0].len(), 1);
        assert_eq!(meta.entry_main, "index.js");
    }
}
