//! Handing the exported points to the kriging service.
//!
//! We don't krige anything ourselves. Whatever does it gets the points file,
//! the name of the field to interpolate, an opaque model template and a
//! boundary polygon, and must leave two rasters behind: one over the full
//! extent and one clipped to the boundary.

use chrono::NaiveDate;
use std::fs::create_dir_all;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use crate::error::{JobError, Result};
use crate::utils::date_stamp;

pub const FULL_RASTER_PREFIX: &str = "LeakSurface_";
pub const CLIPPED_RASTER_PREFIX: &str = "ClippedSurface_";

/// The two rasters a run produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterOutputs {
    pub full_extent: PathBuf,
    pub clipped: PathBuf,
}

impl RasterOutputs {
    /// `LeakSurface_<MMDDYYYY>` and `ClippedSurface_<MMDDYYYY>` in `store`.
    /// An empty extension leaves the names bare, as raster catalogues expect.
    pub fn dated(store: &Path, run_date: NaiveDate, extension: &str) -> Self {
        let stamp = date_stamp(run_date);
        let name = |prefix: &str| {
            let p = store.join(format!("{}{}", prefix, stamp));
            if extension.is_empty() {
                p
            } else {
                p.with_extension(extension)
            }
        };
        Self {
            full_extent: name(FULL_RASTER_PREFIX),
            clipped: name(CLIPPED_RASTER_PREFIX),
        }
    }
}

/// Everything the service needs for one surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpolationRequest {
    pub points: PathBuf,
    pub field: String,
    pub model_template: PathBuf,
    pub boundary: PathBuf,
    pub epsg: u32,
    pub outputs: RasterOutputs,
}

/// Something that can turn a point layer into a surface.
pub trait Interpolator {
    fn interpolate(&self, request: &InterpolationRequest) -> Result<RasterOutputs>;
}

/// Runs an external geoprocessing program once and waits for it.
///
/// Arguments may contain `{points}`, `{field}`, `{model}`, `{boundary}`,
/// `{raster}`, `{clipped}` and `{epsg}`, which are filled in per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInterpolator {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandInterpolator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// The argument list with placeholders filled in.
    pub fn arguments(&self, request: &InterpolationRequest) -> Vec<String> {
        let subs = [
            ("{points}", request.points.display().to_string()),
            ("{field}", request.field.clone()),
            ("{model}", request.model_template.display().to_string()),
            ("{boundary}", request.boundary.display().to_string()),
            ("{raster}", request.outputs.full_extent.display().to_string()),
            ("{clipped}", request.outputs.clipped.display().to_string()),
            ("{epsg}", request.epsg.to_string()),
        ];
        self.args
            .iter()
            .map(|arg| {
                subs.iter()
                    .fold(arg.clone(), |acc, (key, value)| acc.replace(key, value))
            })
            .collect()
    }
}

impl Interpolator for CommandInterpolator {
    fn interpolate(&self, request: &InterpolationRequest) -> Result<RasterOutputs> {
        check_inputs(request)?;
        for out in [&request.outputs.full_extent, &request.outputs.clipped] {
            if let Some(parent) = out.parent() {
                create_dir_all(parent)?;
            }
        }

        let args = self.arguments(request);
        info!("Interpolating {} with {}", request.field, self.program);
        debug!("{} {:?}", self.program, args);

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| JobError::Interpolation(format!("could not start {}: {}", self.program, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!("{}", stdout.trim_end());
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(JobError::Interpolation(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        check_outputs(&request.outputs)?;
        info!(
            "Surfaces written to {} and {}",
            request.outputs.full_extent.display(),
            request.outputs.clipped.display()
        );
        Ok(request.outputs.clone())
    }
}

/// The template and boundary are ours to provide; a missing one is our
/// failure, not the service's.
pub fn check_inputs(request: &InterpolationRequest) -> Result<()> {
    if !request.points.is_file() {
        return Err(JobError::unavailable("exported points", &request.points));
    }
    if !request.model_template.exists() {
        return Err(JobError::unavailable("kriging model template", &request.model_template));
    }
    if !request.boundary.exists() {
        return Err(JobError::unavailable("boundary polygon", &request.boundary));
    }
    Ok(())
}

fn check_outputs(outputs: &RasterOutputs) -> Result<()> {
    for raster in [&outputs.full_extent, &outputs.clipped] {
        if !raster.exists() {
            return Err(JobError::Interpolation(format!(
                "service finished but {} was not written",
                raster.display()
            )));
        }
    }
    Ok(())
}
