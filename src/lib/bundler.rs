//! Component F: Bundler Driver (spec §4.F).
//!
//! "The embedded bundler" is modeled as a `JsBundler` trait — `BundlePlan`
//! in, `BundleResult` out — grounded on the `BundlePlan`/`BundleOptions`/
//! `BundleResult`/`Diagnostic` shape from `other_examples`'
//! `zenith-bundler::lib`, adapted to this crate's synchronous style and to
//! one concrete implementation, `WalkBundler`, that resolves the module
//! graph by textual specifier scanning (`util::text`) rather than driving a
//! real JS engine. `JsBundler` is swappable: a production deployment could
//! substitute a real bundler binding behind the same trait.

use indexmap::IndexSet;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

use meta::ResolvedMeta;
use util::errors::{ErrorKind, Res};
use util::text;

/// Platform-global compile-time substitutions the bundler applies before
/// handing output to the rewriter (spec §4.F "Bundler-level defines").
/// Longest key first, so `process.env.NODE_ENV` is substituted before the
/// bare `process` define clobbers part of it.
pub fn platform_defines(artifact_url: &str, artifact_dir_url: &str, node_env: &str) -> Vec<(String, String)> {
    let mut defines = vec![
        ("__filename".to_string(), quote(artifact_url)),
        ("__dirname".to_string(), quote(artifact_dir_url)),
        ("process.env.NODE_ENV".to_string(), quote(node_env)),
        ("process".to_string(), "__process$".to_string()),
        ("Buffer".to_string(), "__Buffer$".to_string()),
        ("setImmediate".to_string(), "__setImmediate$".to_string()),
        ("clearImmediate".to_string(), "clearTimeout".to_string()),
        ("require.resolve".to_string(), "__rResolve$".to_string()),
        ("global.process".to_string(), "__process$".to_string()),
        ("global.Buffer".to_string(), "__Buffer$".to_string()),
        ("global.setImmediate".to_string(), "__setImmediate$".to_string()),
        ("global.clearImmediate".to_string(), "clearTimeout".to_string()),
        ("global".to_string(), "__global$".to_string()),
    ];
    defines.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    defines
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Describes WHAT and HOW to bundle (spec §4.F).
#[derive(Clone, Debug)]
pub struct BundlePlan {
    /// Directory relative file resolution is rooted at (the package's own
    /// directory under `node_modules`).
    pub resolve_root: PathBuf,
    /// The specifier the interceptor plugin must treat as non-external:
    /// `name` or `name/submodule` (spec §4.F "let `p` be the imported path...
    /// equals the self import").
    pub self_specifier: String,
    /// The resolved file backing `self_specifier`.
    pub self_entry_path: PathBuf,
    pub minify: bool,
    pub defines: Vec<(String, String)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Warning,
    Info,
}

#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
}

/// The sealed output of a successful bundle (spec §4.F/§4.G): the emitted
/// standards-module source, the externals set the rewriter will resolve,
/// and any non-fatal diagnostics.
#[derive(Clone, Debug)]
pub struct BundleResult {
    pub code: String,
    pub externals: IndexSet<String>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Synthesize the entry source that re-exports from the package's canonical
/// import path (spec §4.F, before "Calls an embedded bundler with...").
pub fn synthesize_entry(meta: &ResolvedMeta, import_path: &str) -> String {
    if !meta.entry_module.is_empty() {
        let mut lines = Vec::new();
        if !meta.export_names.is_empty() {
            let names = meta.export_names.iter().cloned().collect::<Vec<_>>().join(", ");
            lines.push(format!("export {{ {} }} from \"{}\";", names, import_path));
        }
        if meta.has_default {
            lines.push(format!("export {{ default }} from \"{}\";", import_path));
        }
        if lines.is_empty() {
            // A standards-module entry with nothing to re-export is still a
            // valid (empty) artifact.
            lines.push(format!("import \"{}\";", import_path));
        }
        lines.join("\n")
    } else if meta.export_names.is_empty() {
        format!("export {{ default }} from \"{}\";", import_path)
    } else {
        let mut names: Vec<String> = meta.export_names.iter().cloned().collect();
        names.push("default".to_string());
        format!("export {{ {} }} from \"{}\";", names.join(", "), import_path)
    }
}

/// Component F's embedded bundler, abstracted so a real bundler binding can
/// be substituted behind the same contract.
pub trait JsBundler {
    fn bundle(&self, entry_source: &str, plan: &BundlePlan) -> Res<BundleResult>;
}

const FILE_SUFFIXES: &[&str] = &["", ".js", ".mjs", ".cjs", "/index.js", "/index.mjs", "/index.cjs"];

/// A lightweight bundler that walks the module graph via `util::text`
/// specifier scanning, inlining internal modules by textual concatenation
/// and diverting every other specifier into the externals set behind the
/// sentinel scheme (spec §4.F interceptor plugin).
pub struct WalkBundler;

impl WalkBundler {
    pub fn new() -> Self {
        WalkBundler
    }

    fn resolve_internal(&self, dir: &Path, specifier: &str) -> Option<PathBuf> {
        let joined = dir.join(specifier);
        for suffix in FILE_SUFFIXES {
            let candidate_str = format!("{}{}", joined.to_string_lossy(), suffix);
            let candidate = PathBuf::from(candidate_str);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    /// Depth-first walk: each internal file is inlined once (by path), its
    /// own imports are classified in turn, and every resolved specifier is
    /// rewritten in-place — sentinel URL for externals, left untouched
    /// otherwise since inlining is by concatenation, not a real module graph.
    fn walk(
        &self,
        source: &str,
        current_dir: &Path,
        plan: &BundlePlan,
        visited: &mut IndexSet<PathBuf>,
        externals: &mut IndexSet<String>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Res<String> {
        let mut rewritten = source.to_string();

        for specifier in text::scan_import_specifiers(source) {
            if specifier == plan.self_specifier || is_relative_or_absolute(&specifier) {
                let resolved = if specifier == plan.self_specifier {
                    Some(plan.self_entry_path.clone())
                } else {
                    self.resolve_internal(current_dir, &specifier)
                };

                match resolved {
                    Some(path) if !visited.contains(&path) => {
                        visited.insert(path.clone());
                        let inner_source = fs::read_to_string(&path).context_read(&path)?;
                        let inner_dir = path.parent().unwrap_or(current_dir).to_path_buf();
                        let inner_code =
                            self.walk(&inner_source, &inner_dir, plan, visited, externals, diagnostics)?;
                        rewritten = format!("{}\n{}", inner_code, rewritten);
                    }
                    Some(_) => {
                        // already inlined elsewhere in the graph; nothing to do.
                    }
                    None => {
                        diagnostics.push(Diagnostic {
                            level: DiagnosticLevel::Warning,
                            message: format!("could not resolve internal import `{}`", specifier),
                        });
                    }
                }
            } else {
                externals.insert(specifier.clone());
                let sentinel = format!("esm_sh_external://{}", specifier);
                rewritten = rewritten.replacen(&format!("\"{}\"", specifier), &format!("\"{}\"", sentinel), 1);
                rewritten = rewritten.replacen(&format!("'{}'", specifier), &format!("'{}'", sentinel), 1);
            }
        }

        Ok(rewritten)
    }
}

trait ReadContext<T> {
    fn context_read(self, path: &Path) -> Res<T>;
}

impl ReadContext<String> for ::std::io::Result<String> {
    fn context_read(self, path: &Path) -> Res<String> {
        use failure::ResultExt;
        self.context(ErrorKind::BundleError(format!("reading {}", path.display())))
            .map_err(Into::into)
    }
}

fn is_relative_or_absolute(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../") || Path::new(specifier).is_absolute()
}

impl JsBundler for WalkBundler {
    fn bundle(&self, entry_source: &str, plan: &BundlePlan) -> Res<BundleResult> {
        let mut visited = IndexSet::new();
        let mut externals = IndexSet::new();
        let mut diagnostics = Vec::new();

        visited.insert(plan.self_entry_path.clone());
        let mut code = self.walk(
            entry_source,
            &plan.resolve_root,
            plan,
            &mut visited,
            &mut externals,
            &mut diagnostics,
        )?;

        for (key, value) in &plan.defines {
            code = substitute_define(&code, key, value);
        }

        if plan.minify {
            code = minify(&code);
        }

        Ok(BundleResult {
            code,
            externals,
            diagnostics,
        })
    }
}

fn substitute_define(code: &str, key: &str, value: &str) -> String {
    let pattern = format!(r"\b{}\b", regex::escape(key));
    match Regex::new(&pattern) {
        Ok(re) => re.replace_all(code, value.replace('$', "$$").as_str()).into_owned(),
        Err(_) => code.to_string(),
    }
}

/// A conservative textual minification: collapse blank lines and trim
/// trailing whitespace. No AST-level compaction, since there is no real
/// parser backing this bundler.
fn minify(code: &str) -> String {
    code.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexSet as ISet;

    fn meta_with(export_names: &[&str], has_default: bool, entry_module: &str) -> ResolvedMeta {
        use registry::RegistryPackage;
        use semver::Version;

        let mut names = ISet::new();
        for n in export_names {
            names.insert(n.to_string());
        }

        ResolvedMeta {
            package: RegistryPackage {
                name: "pkg".to_string(),
                version: Version::parse("1.0.0").unwrap(),
                main: Some("index.js".to_string()),
                module: None,
                r#type: None,
                types: None,
                typings: None,
                exports: None,
                dependencies: Default::default(),
                peer_dependencies: Default::default(),
            },
            entry_main: "index.js".to_string(),
            entry_module: entry_module.to_string(),
            declaration_entry: String::new(),
            export_names: names,
            has_default,
            declarations_url: String::new(),
        }
    }

    #[test]
    fn synthesizes_standards_module_reexport() {
        let meta = meta_with(&["foo", "bar"], true, "index.mjs");
        let entry = synthesize_entry(&meta, "pkg");
        assert!(entry.contains("export { foo, bar } from \"pkg\";"));
        assert!(entry.contains("export { default } from \"pkg\";"));
    }

    #[test]
    fn synthesizes_server_module_combined_statement() {
        let meta = meta_with(&["foo"], true, "");
        let entry = synthesize_entry(&meta, "pkg");
        assert_eq!(entry, "export { foo, default } from \"pkg\";");
    }

    #[test]
    fn synthesizes_default_only_server_module() {
        let meta = meta_with(&[], true, "");
        let entry = synthesize_entry(&meta, "pkg");
        assert_eq!(entry, "export { default } from \"pkg\";");
    }

    #[test]
    fn externals_are_sentinel_rewritten_and_collected() {
        let dir = ::std::env::temp_dir().join("esm-cdn-bundler-test");
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("index.js"), "import left from \"left-pad\";\nexport { left };\n").unwrap();

        let plan = BundlePlan {
            resolve_root: dir.clone(),
            self_specifier: "left-pad-consumer".to_string(),
            self_entry_path: dir.join("index.js"),
            minify: false,
            defines: Vec::new(),
        };

        let bundler = WalkBundler::new();
        let result = bundler
            .bundle("export { default } from \"left-pad-consumer\";", &plan)
            .unwrap();

        assert!(result.externals.contains("left-pad"));
        assert!(result.code.contains("esm_sh_external://left-pad"));
    }

    #[test]
    fn defines_are_substituted_at_word_boundaries() {
        let code = "if (process.env.NODE_ENV === \"production\") { use(process); }";
        let defines = platform_defines("https://esm.sh/x.js", "https://esm.sh/", "production");
        let mut out = code.to_string();
        for (k, v) in &defines {
            out = substitute_define(&out, k, v);
        }
        assert!(out.contains("__process$"));
        assert!(!out.contains("process.env.NODE_ENV"));
    }

    #[test]
    fn minify_drops_blank_lines() {
        let code = "a\n\n  \nb\n";
        assert_eq!(minify(code), "a\nb");
    }
}
