//! Component E: Cache Protocol (spec §4.E, §6 "Cache key-value schema" /
//! "Blob layout").
//!
//! Grounded on `elba::retrieve::cache::Cache`'s content-addressed `src`/
//! `build` directory split: a metadata store keyed by build identifier, a
//! separate blob store for the artifact bytes, and a check-before-trust
//! discipline at the boundary between them.

use failure::ResultExt;
use slog::Logger;
use std::fs;
use std::path::{Path, PathBuf};

use ident::BuildIdentifier;
use meta::ResolvedMeta;
use util::errors::{ErrorKind, Res};

/// Content-addressed artifact storage: `<id>.js` (mandatory) and `<id>.css`
/// (optional), written atomically (spec §6 "Blob layout").
pub trait BlobStore {
    fn exists(&self, key: &str) -> Res<bool>;
    fn read(&self, key: &str) -> Res<Vec<u8>>;
    fn write(&self, key: &str, contents: &[u8]) -> Res<()>;
}

/// The key-value cache keyed by build identifier (spec §4.E, §6 "Cache
/// key-value schema"). `esmeta_json` is the UTF-8 JSON of `ResolvedMeta`;
/// `css` is `0` or `1`.
pub trait MetaStore {
    fn lookup_raw(&self, id: &str) -> Res<Option<(String, u8)>>;
    fn delete(&self, id: &str) -> Res<()>;
    fn commit(&self, id: &str, esmeta_json: &str, css: u8) -> Res<()>;
}

/// Look up `id`, reconciling the stored flags against blob-store reality
/// before returning a hit (spec §4.E self-healing consistency):
///
///   * a cache entry that fails to decode is evicted and treated as a miss;
///   * a stale `css` flag (blob wiped out-of-band) is downgraded to `false`
///     rather than failing the whole lookup;
///   * a missing mandatory `.js` blob evicts the entry and is a plain miss.
pub fn lookup(
    meta_store: &dyn MetaStore,
    blob_store: &dyn BlobStore,
    id: &BuildIdentifier,
    logger: &Logger,
) -> Res<Option<(ResolvedMeta, bool)>> {
    let key = id.to_string();

    let (raw, css_flag) = match meta_store.lookup_raw(&key)? {
        Some(v) => v,
        None => return Ok(None),
    };

    let meta: ResolvedMeta = match serde_json::from_str(&raw) {
        Ok(m) => m,
        Err(e) => {
            slog::warn!(logger, "cache entry failed to decode, evicting"; "id" => &key, "error" => e.to_string());
            meta_store.delete(&key)?;
            return Ok(None);
        }
    };

    let mut has_css = css_flag != 0;
    if has_css && !blob_store.exists(&id.css_path())? {
        slog::warn!(logger, "css flag stale against blob store, reconciling"; "id" => &key);
        has_css = false;
    }

    if !blob_store.exists(&id.js_path())? {
        slog::warn!(logger, "mandatory js blob missing, evicting cache entry"; "id" => &key);
        meta_store.delete(&key)?;
        return Ok(None);
    }

    Ok(Some((meta, has_css)))
}

/// Persist a freshly-built artifact's cache entry. Callers must have already
/// written the corresponding blob(s) (spec §5 ordering guarantee ii: blob
/// writes happen-before the cache commit).
pub fn commit(meta_store: &dyn MetaStore, id: &BuildIdentifier, meta: &ResolvedMeta, has_css: bool) -> Res<()> {
    let raw = serde_json::to_string(meta).context(ErrorKind::StoreError("encoding cache entry".to_string()))?;
    meta_store.commit(&id.to_string(), &raw, if has_css { 1 } else { 0 })
}

/// On-disk `MetaStore`: one JSON file per identifier, nested the same way
/// the identifier itself nests (`v<SCHEMA>/<name>@<version>/...`).
pub struct FsMetaStore {
    root: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    esmeta: String,
    css: u8,
}

impl FsMetaStore {
    pub fn new(root: PathBuf) -> Res<Self> {
        fs::create_dir_all(&root).context(ErrorKind::StoreError(format!("creating {}", root.display())))?;
        Ok(FsMetaStore { root })
    }

    fn entry_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.meta.json", id))
    }
}

impl MetaStore for FsMetaStore {
    fn lookup_raw(&self, id: &str) -> Res<Option<(String, u8)>> {
        let path = self.entry_path(id);
        if !path.is_file() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path).context(ErrorKind::StoreError(format!("reading {}", path.display())))?;
        let entry: CacheEntry =
            serde_json::from_str(&raw).context(ErrorKind::StoreError(format!("parsing {}", path.display())))?;
        Ok(Some((entry.esmeta, entry.css)))
    }

    fn delete(&self, id: &str) -> Res<()> {
        let path = self.entry_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ::std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ErrorKind::StoreError(format!("deleting {}: {}", path.display(), e)).into()),
        }
    }

    fn commit(&self, id: &str, esmeta_json: &str, css: u8) -> Res<()> {
        let path = self.entry_path(id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context(ErrorKind::StoreError(format!("creating {}", parent.display())))?;
        }
        let raw = serde_json::to_string(&CacheEntry {
            esmeta: esmeta_json.to_string(),
            css,
        })
        .context(ErrorKind::StoreError("encoding cache entry".to_string()))?;
        write_atomically(&path, raw.as_bytes())
    }
}

/// On-disk `BlobStore` rooted at `<root>/builds`.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: PathBuf) -> Res<Self> {
        let builds = root.join("builds");
        fs::create_dir_all(&builds).context(ErrorKind::StoreError(format!("creating {}", builds.display())))?;
        Ok(FsBlobStore { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join("builds").join(key)
    }
}

impl BlobStore for FsBlobStore {
    fn exists(&self, key: &str) -> Res<bool> {
        Ok(self.path_for(key).is_file())
    }

    fn read(&self, key: &str) -> Res<Vec<u8>> {
        let path = self.path_for(key);
        fs::read(&path).context(ErrorKind::StoreError(format!("reading {}", path.display()))).map_err(Into::into)
    }

    fn write(&self, key: &str, contents: &[u8]) -> Res<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context(ErrorKind::StoreError(format!("creating {}", parent.display())))?;
        }
        write_atomically(&path, contents)
    }
}

/// Full write to a sibling temp file, then rename (spec §6: "full write then
/// rename is acceptable").
fn write_atomically(path: &Path, contents: &[u8]) -> Res<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents).context(ErrorKind::StoreError(format!("writing {}", tmp.display())))?;
    fs::rename(&tmp, path).context(ErrorKind::StoreError(format!("renaming into {}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ident::Target;
    use package::descriptor::PackageDescriptor;
    use package::name::Name;
    use package::pins::DependencyPinSet;
    use package::version::PackageVersion;
    use registry::RegistryPackage;
    use semver::Version;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct InMemoryMetaStore {
        entries: RefCell<HashMap<String, (String, u8)>>,
    }

    impl InMemoryMetaStore {
        fn new() -> Self {
            InMemoryMetaStore {
                entries: RefCell::new(HashMap::new()),
            }
        }
    }

    impl MetaStore for InMemoryMetaStore {
        fn lookup_raw(&self, id: &str) -> Res<Option<(String, u8)>> {
            Ok(self.entries.borrow().get(id).cloned())
        }

        fn delete(&self, id: &str) -> Res<()> {
            self.entries.borrow_mut().remove(id);
            Ok(())
        }

        fn commit(&self, id: &str, esmeta_json: &str, css: u8) -> Res<()> {
            self.entries
                .borrow_mut()
                .insert(id.to_string(), (esmeta_json.to_string(), css));
            Ok(())
        }
    }

    struct InMemoryBlobStore {
        blobs: RefCell<HashMap<String, Vec<u8>>>,
    }

    impl InMemoryBlobStore {
        fn new() -> Self {
            InMemoryBlobStore {
                blobs: RefCell::new(HashMap::new()),
            }
        }
    }

    impl BlobStore for InMemoryBlobStore {
        fn exists(&self, key: &str) -> Res<bool> {
            Ok(self.blobs.borrow().contains_key(key))
        }

        fn read(&self, key: &str) -> Res<Vec<u8>> {
            self.blobs
                .borrow()
                .get(key)
                .cloned()
                .ok_or_else(|| ErrorKind::StoreError(format!("no such blob: {}", key)).into())
        }

        fn write(&self, key: &str, contents: &[u8]) -> Res<()> {
            self.blobs.borrow_mut().insert(key.to_string(), contents.to_vec());
            Ok(())
        }
    }

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn id() -> BuildIdentifier {
        BuildIdentifier {
            schema: 100,
            descriptor: PackageDescriptor::new(
                Name::new("react").unwrap(),
                PackageVersion::exact(Version::parse("17.0.2").unwrap()),
                None,
            ),
            pins: DependencyPinSet::default(),
            target: Target::EngineNext,
            dev: false,
        }
    }

    fn sample_meta() -> ResolvedMeta {
        serde_json::from_value(serde_json::json!({
            "package": {
                "name": "react",
                "version": "17.0.2",
                "main": "index.js",
                "module": null,
                "type": null,
                "types": null,
                "typings": null,
                "exports": null,
                "dependencies": {},
                "peerDependencies": {}
            },
            "entry_main": "index.js",
            "entry_module": "",
            "declaration_entry": "",
            "export_names": [],
            "has_default": true,
            "declarations_url": ""
        }))
        .unwrap()
    }

    #[test]
    fn miss_when_no_entry() {
        let meta_store = InMemoryMetaStore::new();
        let blob_store = InMemoryBlobStore::new();
        let hit = lookup(&meta_store, &blob_store, &id(), &test_logger()).unwrap();
        assert!(hit.is_none());
    }

    #[test]
    fn round_trips_a_commit() {
        let meta_store = InMemoryMetaStore::new();
        let blob_store = InMemoryBlobStore::new();
        let identifier = id();
        blob_store.write(&identifier.js_path(), b"export {}").unwrap();
        commit(&meta_store, &identifier, &sample_meta(), false).unwrap();

        let (meta, has_css) = lookup(&meta_store, &blob_store, &identifier, &test_logger())
            .unwrap()
            .unwrap();
        assert!(!has_css);
        assert_eq!(meta.entry_main, "index.js");
    }

    #[test]
    fn evicts_entry_when_js_blob_missing() {
        let meta_store = InMemoryMetaStore::new();
        let blob_store = InMemoryBlobStore::new();
        let identifier = id();
        commit(&meta_store, &identifier, &sample_meta(), false).unwrap();

        let hit = lookup(&meta_store, &blob_store, &identifier, &test_logger()).unwrap();
        assert!(hit.is_none());
        assert!(meta_store.lookup_raw(&identifier.to_string()).unwrap().is_none());
    }

    #[test]
    fn reconciles_stale_css_flag_without_failing_lookup() {
        let meta_store = InMemoryMetaStore::new();
        let blob_store = InMemoryBlobStore::new();
        let identifier = id();
        blob_store.write(&identifier.js_path(), b"export {}").unwrap();
        commit(&meta_store, &identifier, &sample_meta(), true).unwrap();

        let (_, has_css) = lookup(&meta_store, &blob_store, &identifier, &test_logger())
            .unwrap()
            .unwrap();
        assert!(!has_css);
    }

    #[test]
    fn evicts_entry_that_fails_to_decode() {
        let meta_store = InMemoryMetaStore::new();
        let blob_store = InMemoryBlobStore::new();
        let identifier = id();
        blob_store.write(&identifier.js_path(), b"export {}").unwrap();
        meta_store.commit(&identifier.to_string(), "not json", 0).unwrap();

        let hit = lookup(&meta_store, &blob_store, &identifier, &test_logger()).unwrap();
        assert!(hit.is_none());
        assert!(meta_store.lookup_raw(&identifier.to_string()).unwrap().is_none());
    }
}
