//! hydrograde: daily reconciliation of hydrant static-pressure tests and hydraulic-grade surfaces.
//! Released under the MIT or Apache-2.0 licenses, at your option.
#[macro_use]
extern crate serde_derive;

use clap::Parser;
use tracing_subscriber::filter::LevelFilter;

mod app;
mod config;
mod error;
mod export;
mod interpolate;
mod points;
mod reconcile;
mod term;
mod updates;
mod utils;

fn level_filter(verbosity: log::LevelFilter) -> LevelFilter {
    match verbosity {
        log::LevelFilter::Off => LevelFilter::OFF,
        log::LevelFilter::Error => LevelFilter::ERROR,
        log::LevelFilter::Warn => LevelFilter::WARN,
        log::LevelFilter::Info => LevelFilter::INFO,
        log::LevelFilter::Debug => LevelFilter::DEBUG,
        log::LevelFilter::Trace => LevelFilter::TRACE,
    }
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = app::Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(level_filter(cli.verbose.log_level_filter()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    app::actual(cli)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_maps_across() {
        assert_eq!(level_filter(log::LevelFilter::Warn), LevelFilter::WARN);
        assert_eq!(level_filter(log::LevelFilter::Off), LevelFilter::OFF);
        let cli = app::Cli::try_parse_from(["hydrograde", "-v", "example"]).unwrap();
        assert_eq!(level_filter(cli.verbose.log_level_filter()), LevelFilter::DEBUG);
    }
}
