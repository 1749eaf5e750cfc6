//! Lightweight, regex-based scanning of JavaScript sources.
//!
//! This crate never needs a full ECMAScript parse: the metadata resolver
//! only needs to know whether a file is authored with `import`/`export`
//! syntax or with `require`/`module.exports`, and what names it re-exports
//! (spec §4.C steps 7-9); the bundler only needs to find import/require
//! specifier strings to drive its resolve plugin (spec §4.F). One scanning
//! strategy serves both, the way `cjs-module-lexer`-style tooling gets away
//! with a token scan instead of a full parse for the same questions.

use indexmap::IndexSet;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref RE_EXPORT_BRACE: Regex = Regex::new(r"export\s*\{([^}]*)\}").unwrap();
    static ref RE_EXPORT_DEFAULT: Regex = Regex::new(r"export\s+default\b").unwrap();
    static ref RE_EXPORT_DECL: Regex =
        Regex::new(r"export\s+(?:const|let|var|function\*?|class)\s+([A-Za-z_$][\w$]*)").unwrap();
    static ref RE_IMPORT_OR_EXPORT_STMT: Regex =
        Regex::new(r"(?m)^\s*(?:import\s|export\s)").unwrap();
    static ref RE_MODULE_EXPORTS_OBJECT: Regex =
        Regex::new(r"module\.exports\s*=\s*\{([^}]*)\}").unwrap();
    static ref RE_MODULE_EXPORTS_ANY: Regex = Regex::new(r"module\.exports\s*=").unwrap();
    static ref RE_NAMED_EXPORTS_PROP: Regex =
        Regex::new(r"(?:module\.)?exports\.([A-Za-z_$][\w$]*)\s*=").unwrap();
    static ref RE_REQUIRE_CALL: Regex = Regex::new(r#"require\(\s*["']([^"']+)["']\s*\)"#).unwrap();
    static ref RE_IMPORT_SPECIFIER: Regex =
        Regex::new(r#"(?:import|export)\s[^;]*?\bfrom\s+["']([^"']+)["']"#).unwrap();
    static ref RE_BARE_IMPORT: Regex = Regex::new(r#"import\s+["']([^"']+)["']"#).unwrap();
}

/// The result of scanning a source file to determine its export shape
/// (spec §4.C steps 7-9).
#[derive(Debug, Clone, Default)]
pub struct ModuleShape {
    /// `true` if the file is authored with `import`/`export` syntax.
    pub is_standards_module: bool,
    /// Ordered, de-duplicated named exports. Never contains `"default"` or
    /// the literal `"import"` artifact (spec §4.C, "Export collection").
    pub export_names: IndexSet<String>,
    pub has_default: bool,
}

/// Scan `source` and classify it as a standards-module or a server-module,
/// collecting its re-exportable names either way.
pub fn scan_module(source: &str) -> ModuleShape {
    if RE_IMPORT_OR_EXPORT_STMT.is_match(source) {
        scan_standards_module(source)
    } else {
        scan_server_module(source)
    }
}

fn scan_standards_module(source: &str) -> ModuleShape {
    let mut names = IndexSet::new();
    let mut has_default = RE_EXPORT_DEFAULT.is_match(source);

    for cap in RE_EXPORT_BRACE.captures_iter(source) {
        for item in cap[1].split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            let exported = item
                .split(" as ")
                .last()
                .unwrap_or(item)
                .trim()
                .trim_start_matches("type ")
                .trim();
            if exported == "default" {
                has_default = true;
            } else if exported == "import" {
                // artifact of modern export-map inspection; dropped per spec.
            } else if !exported.is_empty() {
                names.insert(exported.to_string());
            }
        }
    }

    for cap in RE_EXPORT_DECL.captures_iter(source) {
        names.insert(cap[1].to_string());
    }

    names.shift_remove("import");
    names.shift_remove("default");

    ModuleShape {
        is_standards_module: true,
        export_names: names,
        has_default,
    }
}

fn scan_server_module(source: &str) -> ModuleShape {
    let mut names = IndexSet::new();
    let mut has_default = false;

    if let Some(cap) = RE_MODULE_EXPORTS_OBJECT.captures(source) {
        for item in cap[1].split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            let key = item.split(':').next().unwrap_or(item).trim();
            let key = key.trim_matches(|c| c == '\'' || c == '"');
            if !key.is_empty() {
                names.insert(key.to_string());
            }
        }
    } else if RE_MODULE_EXPORTS_ANY.is_match(source) {
        has_default = true;
    }

    for cap in RE_NAMED_EXPORTS_PROP.captures_iter(source) {
        names.insert(cap[1].to_string());
    }

    if !names.is_empty() {
        has_default = true;
    }

    ModuleShape {
        is_standards_module: false,
        export_names: names,
        has_default,
    }
}

/// Collect every `import`/`export ... from`/bare `import` specifier string
/// appearing in `source`, in first-seen order. Used by the bundler to walk
/// the module graph (spec §4.F) and by the rewriter's require-detection
/// sibling scan.
pub fn scan_import_specifiers(source: &str) -> Vec<String> {
    let mut seen = IndexSet::new();
    for cap in RE_IMPORT_SPECIFIER.captures_iter(source) {
        seen.insert(cap[1].to_string());
    }
    for cap in RE_BARE_IMPORT.captures_iter(source) {
        seen.insert(cap[1].to_string());
    }
    seen.into_iter().collect()
}

/// Collect every `require("...")` call-site specifier, in first-seen order.
pub fn scan_require_specifiers(source: &str) -> Vec<String> {
    let mut seen = IndexSet::new();
    for cap in RE_REQUIRE_CALL.captures_iter(source) {
        seen.insert(cap[1].to_string());
    }
    seen.into_iter().collect()
}
