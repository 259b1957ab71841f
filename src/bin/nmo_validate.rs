//! Thin CLI wrapper around the public load API: loads a file, prints a
//! summary, and exits with the codes in §6.5. Contains no parsing logic of
//! its own.

use nmo::load::{self, CHECK_DEPENDENCIES, CHECK_DUPLICATES, VALIDATE};
use nmo::session::PluginStatus;
use nmo::{Context, ContextOptions, Session};
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    nmo::log::init_subscriber(nmo::log::Level::INFO);

    let mut args = std::env::args_os().skip(1);
    let Some(path) = args.next() else {
        eprintln!("usage: nmo-validate <path.nmo>");
        return ExitCode::FAILURE;
    };
    let path = PathBuf::from(path);

    let context = Context::new(ContextOptions::default());
    let mut session = Session::new(&context);
    let flags = VALIDATE | CHECK_DUPLICATES | CHECK_DEPENDENCIES;

    if let Err(err) = load::load_file(&mut session, &path, flags) {
        nmo::log::error!(error = %err, "load failed");
        return ExitCode::FAILURE;
    }

    println!("objects:  {}", session.get_object_repository().count());
    println!("warnings: {}", session.warnings().len());
    for warning in session.warnings() {
        println!("  - {warning}");
    }

    let diagnostics = session.get_plugin_diagnostics();
    println!("plugin dependencies: {}", diagnostics.len());
    for diagnostic in diagnostics {
        let status = match diagnostic.status {
            PluginStatus::Ok => "ok",
            PluginStatus::Missing => "missing",
            PluginStatus::VersionTooOld => "version too old",
        };
        println!(
            "  - {} (required version {}): {status}",
            diagnostic.category, diagnostic.required_version
        );
    }

    ExitCode::SUCCESS
}
