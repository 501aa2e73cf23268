//! Root logger construction, in the manner of `flux::logging` -- a single
//! structured logger built once and handed down by clone, except here the
//! default is built entirely in code (no TOML, no file, no env lookup).

use slog::{o, Drain};
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

/// Builds the crate's default root logger: a terminal drain at `info`
/// level on stderr. Library consumers that want different behaviour
/// construct their own `slog::Logger` and pass it to `facade::configure`.
pub fn default_logger() -> slog::Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(Severity::Info);
    builder.destination(Destination::Stderr);

    match builder.build() {
        Ok(drain) => slog::Logger::root(drain.fuse(), o!("crate" => "duplexnet")),
        Err(_) => slog::Logger::root(slog::Discard, o!()),
    }
}
