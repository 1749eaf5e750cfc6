//! CLI entry point: run one build from a request path and print the
//! resulting artifact URL (spec §2 "front-end", simplified to a one-shot
//! driver since the HTTP front-end itself is an external collaborator).

extern crate clap;
extern crate esm_cdn;
extern crate slog;
extern crate slog_async;
extern crate slog_term;

use clap::{App, Arg};
use slog::Drain;
use std::path::PathBuf;
use std::process;

use esm_cdn::bundler::WalkBundler;
use esm_cdn::cache::{FsBlobStore, FsMetaStore};
use esm_cdn::declarations::FsDeclarationCopier;
use esm_cdn::package;
use esm_cdn::registry::http::HttpRegistryClient;
use esm_cdn::{BuildRequest, Coordinator, EsmConfig};

fn build_logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(drain, slog::o!())
}

fn main() {
    let matches = App::new("esm-cdn")
        .about("Build a browser-compatible standards-module bundle for a registry package")
        .arg(
            Arg::with_name("path")
                .help("Request path, e.g. /react@17.0.2?target=baseline-2020")
                .required(true),
        )
        .arg(
            Arg::with_name("registry")
                .long("registry")
                .takes_value(true)
                .default_value("https://registry.npmjs.org"),
        )
        .arg(
            Arg::with_name("storage-dir")
                .long("storage-dir")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("public-domain")
                .long("public-domain")
                .takes_value(true)
                .default_value("esm.sh"),
        )
        .arg(Arg::with_name("config").long("config").takes_value(true))
        .get_matches();

    let logger = build_logger();

    let mut config: EsmConfig = match matches.value_of("config") {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(raw) => match raw.parse() {
                Ok(c) => c,
                Err(e) => fail(&logger, "invalid config file", &e),
            },
            Err(e) => {
                slog::error!(logger, "failed to read config file"; "path" => path, "error" => e.to_string());
                process::exit(1);
            }
        },
        None => EsmConfig::default(),
    };

    if let Some(domain) = matches.value_of("public-domain") {
        config.public_domain = domain.to_string();
    }
    if let Some(dir) = matches.value_of("storage-dir") {
        config.storage_dir = PathBuf::from(dir);
    }

    let store_dir = config.storage_dir.join("store");
    let registry_url = matches.value_of("registry").unwrap().to_string();

    // Request parsing (component A) needs a registry handle before the
    // build proper starts, and `Coordinator` takes ownership of its own;
    // a second lightweight client (no state beyond the store path and a
    // shared content-addressed store directory on disk) avoids awkwardly
    // threading a borrow back out of the coordinator.
    let request_registry = HttpRegistryClient::new(registry_url.clone(), store_dir.clone(), logger.clone());
    let registry = HttpRegistryClient::new(registry_url, store_dir, logger.clone());

    let meta_store = match FsMetaStore::new(config.storage_dir.clone()) {
        Ok(s) => s,
        Err(e) => fail(&logger, "could not open metadata store", &e),
    };
    let blob_store = match FsBlobStore::new(config.storage_dir.clone()) {
        Ok(s) => s,
        Err(e) => fail(&logger, "could not open blob store", &e),
    };
    let declaration_copier =
        FsDeclarationCopier::new(config.storage_dir.join("declarations"), config.public_domain.clone());
    let scratch_root = config.storage_dir.join("scratch");

    let coordinator = Coordinator::new(
        registry,
        meta_store,
        blob_store,
        declaration_copier,
        WalkBundler::new(),
        config.clone(),
        logger.clone(),
        scratch_root,
    );

    let path = matches.value_of("path").unwrap();
    let (descriptor, query) = match package::parse_request_path(path, &request_registry, &config) {
        Ok(v) => v,
        Err(e) => fail(&logger, "could not parse request path", &e),
    };

    let request = match BuildRequest::from_query(descriptor, &query, &request_registry) {
        Ok(r) => r,
        Err(e) => fail(&logger, "could not resolve build request", &e),
    };

    let identifier = request.identifier(config.schema);

    match coordinator.build(&identifier) {
        Ok(output) => {
            println!("/{}", output.build_id);
            if output.has_css {
                println!("/{}", identifier.css_path());
            }
        }
        Err(e) => fail(&logger, "build failed", &e),
    }
}

fn fail(logger: &slog::Logger, context: &str, err: &esm_cdn::Error) -> ! {
    slog::error!(logger, "{}", context; "error" => err.to_string());
    process::exit(1);
}
