//! Component I: Build Coordinator (spec §4.I, §5).
//!
//! Grounded on `elba::retrieve::cache::Cache` as the single owner of the
//! scratch/build directory lifecycle, generalized to a process-wide
//! single-writer gate around the whole pipeline (spec §5: "the coordinator
//! admits exactly one concurrent build at a time via a process-wide
//! exclusive gate").

use slog::Logger;
use std::path::PathBuf;
use std::sync::Mutex;

use bundler::{platform_defines, synthesize_entry, BundlePlan, JsBundler};
use cache::{self, BlobStore, MetaStore};
use declarations::{find_declaration_entry, DeclarationCopier};
use ident::BuildIdentifier;
use meta::{self, ResolvedMeta};
use registry::RegistryClient;
use rewrite::{self, RewriteContext};
use util::config::EsmConfig;
use util::errors::{ErrorKind, Res};
use util::scratch::ScratchDir;

/// `(buildId, meta, hasCss)` (spec §4.I).
pub struct BuildOutput {
    pub build_id: String,
    pub meta: ResolvedMeta,
    pub has_css: bool,
}

/// Ties components B through H together behind the single-writer gate spec
/// §5 requires. Holds the shared mutable state (stores, registry, declaration
/// copier); everything else is confined to a build's own scratch directory.
pub struct Coordinator<R, M, B, D, J> {
    registry: R,
    meta_store: M,
    blob_store: B,
    declaration_copier: D,
    bundler: J,
    config: EsmConfig,
    logger: Logger,
    scratch_root: PathBuf,
    gate: Mutex<()>,
}

impl<R, M, B, D, J> Coordinator<R, M, B, D, J>
where
    R: RegistryClient,
    M: MetaStore,
    B: BlobStore,
    D: DeclarationCopier,
    J: JsBundler,
{
    pub fn new(
        registry: R,
        meta_store: M,
        blob_store: B,
        declaration_copier: D,
        bundler: J,
        config: EsmConfig,
        logger: Logger,
        scratch_root: PathBuf,
    ) -> Self {
        Coordinator {
            registry,
            meta_store,
            blob_store,
            declaration_copier,
            bundler,
            config,
            logger,
            scratch_root,
            gate: Mutex::new(()),
        }
    }

    /// Run one build end to end: cache lookup, then (on miss) install,
    /// resolve, bundle, rewrite, and commit. Spec §5 ordering guarantees are
    /// honored by simple sequencing, since the gate serializes every build.
    pub fn build(&self, id: &BuildIdentifier) -> Res<BuildOutput> {
        let _guard = self
            .gate
            .lock()
            .map_err(|_| ErrorKind::StoreError("build gate poisoned".to_string()))?;

        if let Some((meta, has_css)) = cache::lookup(&self.meta_store, &self.blob_store, id, &self.logger)? {
            slog::info!(self.logger, "cache hit"; "id" => id.to_string());
            return Ok(BuildOutput {
                build_id: id.to_string(),
                meta,
                has_css,
            });
        }

        slog::info!(self.logger, "cache miss, building"; "id" => id.to_string());
        let scratch = ScratchDir::create(&self.scratch_root, &id.to_string())?;

        let mut built_meta = meta::resolve_meta(scratch.path(), &id.descriptor, &self.registry, &self.logger)?;

        let pkg_dir = scratch.node_modules().join(id.descriptor.name.as_str());

        if let Some(entry) = find_declaration_entry(
            &scratch.node_modules(),
            id.descriptor.name.as_str(),
            &built_meta.package,
            id.descriptor.submodule.as_ref().map(String::as_str),
        ) {
            match self.declaration_copier.copy_declarations(&scratch.node_modules(), &entry) {
                Ok(url) => {
                    built_meta.declaration_entry = entry;
                    built_meta.declarations_url = url;
                }
                Err(e) => slog::warn!(self.logger, "declaration copy failed, continuing without it";
                    "id" => id.to_string(), "error" => e.to_string()),
            }
        }

        let import_path = match &id.descriptor.submodule {
            Some(sub) => format!("{}/{}", id.descriptor.name, sub),
            None => id.descriptor.name.to_string(),
        };
        let self_specifier = import_path.clone();

        let canonical_rel = if !built_meta.entry_module.is_empty() {
            &built_meta.entry_module
        } else {
            &built_meta.entry_main
        };
        let self_entry_path = meta::resolve_entry_file(&pkg_dir, canonical_rel).ok_or_else(|| {
            ErrorKind::BundleError(format!("entry file for {} vanished after resolution", import_path))
        })?;

        let env = EsmConfig::node_env(id.dev);
        let artifact_url = format!("https://{}/{}", self.config.public_domain, id.js_path());
        let artifact_dir_url = artifact_url.rsplitn(2, '/').nth(1).unwrap_or(&artifact_url).to_string();
        let defines = platform_defines(&artifact_url, &artifact_dir_url, env);

        let entry_source = synthesize_entry(&built_meta, &self_specifier);
        let plan = BundlePlan {
            resolve_root: pkg_dir.clone(),
            self_specifier,
            self_entry_path,
            minify: !id.dev,
            defines,
        };

        let bundle = self.bundler.bundle(&entry_source, &plan)?;
        for diagnostic in &bundle.diagnostics {
            slog::warn!(self.logger, "bundle diagnostic"; "message" => &diagnostic.message);
        }

        let rewrite_ctx = RewriteContext {
            schema: id.schema,
            target: id.target,
            dev: id.dev,
            env,
            pins: &id.pins,
            package: &built_meta.package,
            scratch_root: scratch.path(),
            registry: &self.registry,
            config: &self.config,
        };

        let (rewritten, rewrite_diagnostics) = rewrite::rewrite_externals(&bundle.code, &bundle.externals, &rewrite_ctx);
        for diagnostic in &rewrite_diagnostics {
            slog::warn!(self.logger, "rewrite diagnostic"; "message" => &diagnostic.message);
        }

        let with_polyfills = rewrite::inject_polyfills(&rewritten, id.schema, id.dev, env);
        let banner = rewrite::build_banner(id.descriptor.name.as_str(), &id.descriptor.version.to_string(), id.target, env);
        let final_code = format!("{}{}", banner, with_polyfills);

        self.blob_store.write(&id.js_path(), final_code.as_bytes())?;
        let has_css = false;

        cache::commit(&self.meta_store, id, &built_meta, has_css)?;

        Ok(BuildOutput {
            build_id: id.to_string(),
            meta: built_meta,
            has_css,
        })
    }
}
