//! The main app logic: argument structs and most top-level functions

use chrono::{Local, NaiveDate};
use clap::{AppSettings, ArgEnum, Parser, Subcommand, ValueHint};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use color_eyre::eyre::{eyre, Context, Result};
use itertools::Itertools;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::{Config, EXAMPLE_CONFIG};
use crate::export::{self, EXPORT_PREFIX};
use crate::interpolate::{
    InterpolationRequest, Interpolator, RasterOutputs, CLIPPED_RASTER_PREFIX, FULL_RASTER_PREFIX,
};
use crate::points::{self, LAYER_EXTENSION};
use crate::reconcile::{self, DuplicateResolution, ReconcileSummary};
use crate::term;
use crate::updates;

#[derive(Parser, Debug)]
#[clap(version, about)]
#[clap(global_setting(AppSettings::PropagateVersion))]
#[clap(global_setting(AppSettings::UseLongFormatForHelpSubcommand))]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    #[clap(subcommand)]
    pub command: CliCommands,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum CliCommands {
    Run(CliRun),
    /// Print an example configuration (TOML format)
    Example,
    Layers(CliLayers),
    Outputs(CliOutputs),
}

/// Reconcile today's pressure updates, export the test points and interpolate the surface.
#[derive(Parser, Debug, PartialEq)]
#[clap(
    after_help = "Without a configuration file, everything is looked for in the current directory under its usual name. See `hydrograde example`."
)]
pub struct CliRun {
    /// Date stamped on the outputs, as YYYY-MM-DD (default: today)
    #[clap(long)]
    pub date: Option<NaiveDate>,

    /// Which reading wins when a hydrant was tested more than once (overrides the configuration)
    #[clap(long, arg_enum)]
    pub duplicate_resolution: Option<CliResolution>,

    /// Stop after exporting the points
    #[clap(long)]
    pub skip_interpolation: bool,

    /// The configuration file
    #[clap(parse(from_os_str), value_hint = ValueHint::FilePath)]
    pub configfile: Option<PathBuf>,
}

#[derive(ArgEnum, Debug, PartialEq, Eq, Clone, Copy)]
pub enum CliResolution {
    /// The reading with the oldest stop date
    Earliest,
    /// The reading with the newest stop date
    Latest,
}

impl From<CliResolution> for DuplicateResolution {
    fn from(r: CliResolution) -> Self {
        match r {
            CliResolution::Earliest => Self::Earliest,
            CliResolution::Latest => Self::Latest,
        }
    }
}

/// List the layers in the configured point store.
#[derive(Parser, Debug, PartialEq)]
pub struct CliLayers {
    /// The configuration file
    #[clap(parse(from_os_str), value_hint = ValueHint::FilePath)]
    pub configfile: Option<PathBuf>,
}

/// List dated point exports and rasters left by earlier runs.
#[derive(Parser, Debug, PartialEq)]
#[clap(
    after_help = "Output tables are printed to standard output. If that's a terminal, they'll be pretty-printed with elastic tabstops. If that's a pipe or file, they'll be tab-separated."
)]
pub struct CliOutputs {
    /// The configuration file
    #[clap(parse(from_os_str), value_hint = ValueHint::FilePath)]
    pub configfile: Option<PathBuf>,
}

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    /// The master layer's own `crs` member, if it had one.
    pub layer_crs: Option<Value>,
    pub summary: ReconcileSummary,
    pub export: PathBuf,
    pub rasters: Option<RasterOutputs>,
}

/// The whole daily job, start to finish. Any failure stops it where it is;
/// files already written are left alone.
pub fn run_job(
    cfg: &Config,
    run_date: NaiveDate,
    interpolator: Option<&dyn Interpolator>,
) -> Result<JobReport> {
    let layer = points::open_layer(&cfg.point_store, &cfg.point_layer, &cfg.point_fields)
        .context("Could not load the test points; stopping.")?;
    info!("{} test points in layer {}", layer.points.len(), layer.name);
    match &layer.crs {
        Some(crs) => {
            info!("Layer {} declares CRS {}", layer.name, crs);
            if export::crs_epsg(crs) != Some(cfg.epsg) {
                warn!(
                    "Layer {} is not in EPSG:{}; the export will be labelled EPSG:{} regardless",
                    layer.name, cfg.epsg, cfg.epsg
                );
            }
        }
        None => debug!("Layer {} declares no CRS", layer.name),
    }

    let table = updates::read_update_file(&cfg.update_table, &cfg.update_schema)
        .context("Could not load the pressure updates; stopping.")?;

    let reconciled = reconcile::reconcile(layer.points, &table.records, cfg.duplicate_resolution);

    let export = export::export_points(
        &cfg.output_dir,
        run_date,
        &reconciled.points,
        &cfg.point_fields,
        cfg.epsg,
    )
    .context("Could not export the reconciled points; stopping.")?;

    let rasters = match interpolator {
        Some(service) => {
            let request = InterpolationRequest {
                points: export.clone(),
                field: cfg.point_fields.hydro_grade.clone(),
                model_template: cfg.model_template.clone(),
                boundary: cfg.boundary.clone(),
                epsg: cfg.epsg,
                outputs: RasterOutputs::dated(&cfg.raster_store, run_date, &cfg.raster_extension),
            };
            Some(
                service
                    .interpolate(&request)
                    .context("Could not interpolate the pressure surface; stopping.")?,
            )
        }
        None => None,
    };

    Ok(JobReport {
        layer_crs: layer.crs,
        summary: reconciled.summary,
        export,
        rasters,
    })
}

/// Performs the `run` subcommand.
pub fn run(args: CliRun) -> Result<()> {
    let mut cfg = Config::load(args.configfile.as_deref()).context("Could not read the configuration.")?;
    if let Some(r) = args.duplicate_resolution {
        cfg.duplicate_resolution = r.into();
    }
    let run_date = args.date.unwrap_or_else(|| Local::now().date_naive());
    info!("Running for {} in {}", run_date, cfg.workspace.display());

    let interpolator: Option<&dyn Interpolator> = if args.skip_interpolation {
        None
    } else {
        match &cfg.interpolator {
            Some(cmd) => Some(cmd as &dyn Interpolator),
            None => {
                warn!("No interpolator configured; the surface will not be updated");
                None
            }
        }
    };

    let report = run_job(&cfg, run_date, interpolator)?;
    eprintln!("{}", report.summary);
    eprintln!("Points: {}", report.export.display());
    if let Some(r) = &report.rasters {
        eprintln!("Surface: {}\nClipped: {}", r.full_extent.display(), r.clipped.display());
    }
    eprintln!("Done!");
    Ok(())
}

/// Performs the `layers` subcommand.
pub fn do_layers(args: CliLayers) -> Result<()> {
    let cfg = Config::load(args.configfile.as_deref()).context("Could not read the configuration.")?;
    let names = points::list_layers(&cfg.point_store)
        .with_context(|| format!("Could not list layers in {}", cfg.point_store.display()))?;
    for name in names {
        let marker = if name == cfg.point_layer { "*" } else { " " };
        println!("{} {}", marker, name);
    }
    Ok(())
}

/// An earlier run's output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputEntry {
    pub kind: &'static str,
    pub date: NaiveDate,
    pub path: PathBuf,
}

/// Finds dated exports in `output_dir` and rasters in `raster_store`,
/// oldest first.
pub fn find_outputs(cfg: &Config) -> Result<Vec<OutputEntry>> {
    let searches = [
        ("points", &cfg.output_dir, EXPORT_PREFIX, format!("*.{}", LAYER_EXTENSION)),
        ("surface", &cfg.raster_store, FULL_RASTER_PREFIX, String::from("*")),
        ("clipped", &cfg.raster_store, CLIPPED_RASTER_PREFIX, String::from("*")),
    ];

    let mut found = Vec::new();
    for (kind, dir, prefix, tail) in searches {
        let pattern = dir.join(format!("{}{}", prefix, tail));
        let pattern = pattern
            .to_str()
            .ok_or_else(|| eyre!("Path is not valid UTF-8: {}", dir.display()))?;
        for path in glob::glob(pattern)?.filter_map(std::result::Result::ok) {
            if let Some(date) = stamp_date(&path, prefix) {
                found.push(OutputEntry { kind, date, path });
            }
        }
    }
    Ok(found
        .into_iter()
        .sorted_by(|a, b| a.date.cmp(&b.date).then(a.kind.cmp(b.kind)))
        .collect())
}

fn stamp_date(path: &Path, prefix: &str) -> Option<NaiveDate> {
    let name = path.file_name()?.to_str()?;
    let stamp: String = name.strip_prefix(prefix)?.chars().take(8).collect();
    NaiveDate::parse_from_str(&stamp, "%m%d%Y").ok()
}

/// Performs the `outputs` subcommand.
pub fn do_outputs(args: CliOutputs) -> Result<()> {
    let cfg = Config::load(args.configfile.as_deref()).context("Could not read the configuration.")?;
    let rows: Vec<String> = find_outputs(&cfg)?
        .iter()
        .map(|o| format!("{}\t{}\t{}", o.date, o.kind, o.path.display()))
        .collect();
    println!("{}", term::render_table("Date\tKind\tPath", &rows, term::stdout_is_tty())?);
    Ok(())
}

/// Does the top-level command.
pub fn actual(m: Cli) -> Result<()> {
    use CliCommands::*;
    match m.command {
        Run(sm) => run(sm)?,
        Example => println!("{}", EXAMPLE_CONFIG),
        Layers(sm) => do_layers(sm)?,
        Outputs(sm) => do_outputs(sm)?,
    }
    Ok(())
}
