//! Loading the job configuration.
//!
//! The configuration is a flat TOML file with a few sub-tables. Every key
//! is optional; anything left out falls back to the layout the job has
//! always run against. Relative paths are taken relative to `workspace`,
//! and a relative `workspace` relative to the configuration file.

use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use toml_edit::{Document, TableLike};
use tracing::warn;

use crate::error::{JobError, Result};
use crate::interpolate::CommandInterpolator;
use crate::points::LayerFields;
use crate::reconcile::DuplicateResolution;
use crate::updates::{UpdateColumns, UpdateSchema};

/// A commented configuration with every default spelled out.
pub const EXAMPLE_CONFIG: &str = include_str!("../example_config.toml");

const TOP_LEVEL_KEYS: [&str; 16] = [
    "workspace",
    "update_table",
    "delimiter",
    "label_offset",
    "point_store",
    "point_layer",
    "boundary",
    "model_template",
    "output_dir",
    "raster_store",
    "raster_extension",
    "epsg",
    "duplicate_resolution",
    "update_columns",
    "point_fields",
    "interpolator",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub workspace: PathBuf,
    pub update_table: PathBuf,
    pub update_schema: UpdateSchema,
    pub point_store: PathBuf,
    pub point_layer: String,
    pub point_fields: LayerFields,
    pub boundary: PathBuf,
    pub model_template: PathBuf,
    pub output_dir: PathBuf,
    pub raster_store: PathBuf,
    pub raster_extension: String,
    /// Spatial reference stamped on the export. Tagging only; nothing is reprojected.
    pub epsg: u32,
    pub duplicate_resolution: DuplicateResolution,
    /// `None` means no interpolation service is set up.
    pub interpolator: Option<CommandInterpolator>,
}

impl Default for Config {
    fn default() -> Self {
        Self::with_workspace(PathBuf::from("."))
    }
}

impl Config {
    /// The standard layout under `workspace`.
    pub fn with_workspace(workspace: PathBuf) -> Self {
        Self {
            update_table: workspace.join("TasksExport.csv"),
            update_schema: UpdateSchema::default(),
            point_store: workspace.join("StaticPressureData.gdb"),
            point_layer: String::from("PZ1838A_PressureTestPnts"),
            point_fields: LayerFields::default(),
            boundary: workspace.join("DMA1838A.geojson"),
            model_template: workspace.join("OrdinaryKrigingModel_1838A.xml"),
            output_dir: workspace.clone(),
            raster_store: workspace.join("StaticPressureData.gdb"),
            raster_extension: String::from("tif"),
            epsg: 2274,
            duplicate_resolution: DuplicateResolution::default(),
            interpolator: None,
            workspace,
        }
    }

    /// Loads the file at `cfgpath`, or the defaults if there isn't one.
    pub fn load(cfgpath: Option<&Path>) -> Result<Self> {
        match cfgpath {
            Some(p) => {
                let base = p.parent().unwrap_or_else(|| Path::new("."));
                Self::from_document(&get_cfg_doc_from_path(p)?, base)
            }
            None => Ok(Self::default()),
        }
    }

    /// Builds a configuration from a parsed document.
    /// `base` is where a relative `workspace` is resolved from.
    pub fn from_document(doc: &Document, base: &Path) -> Result<Self> {
        let root: &dyn TableLike = doc.as_table();

        for (key, _) in root.iter() {
            if !TOP_LEVEL_KEYS.contains(&key) {
                warn!("Ignoring unknown configuration key '{}'", key);
            }
        }

        let workspace = match get_str(root, "workspace")? {
            Some(w) => base.join(w),
            None => base.to_path_buf(),
        };
        let mut cfg = Self::with_workspace(workspace);
        let ws = cfg.workspace.clone();
        let path = |p: String| ws.join(p);

        if let Some(v) = get_str(root, "update_table")? {
            cfg.update_table = path(v);
        }
        if let Some(v) = get_str(root, "point_store")? {
            cfg.point_store = path(v);
        }
        if let Some(v) = get_str(root, "point_layer")? {
            cfg.point_layer = v;
        }
        if let Some(v) = get_str(root, "boundary")? {
            cfg.boundary = path(v);
        }
        if let Some(v) = get_str(root, "model_template")? {
            cfg.model_template = path(v);
        }
        if let Some(v) = get_str(root, "output_dir")? {
            cfg.output_dir = path(v);
        }
        if let Some(v) = get_str(root, "raster_store")? {
            cfg.raster_store = path(v);
        }
        if let Some(v) = get_str(root, "raster_extension")? {
            cfg.raster_extension = v.trim_start_matches('.').to_string();
        }
        if let Some(v) = get_int(root, "epsg")? {
            cfg.epsg = u32::try_from(v)
                .map_err(|_| JobError::Config(format!("epsg must be a positive code, not {}", v)))?;
        }
        if let Some(v) = get_int(root, "label_offset")? {
            cfg.update_schema.label_offset = usize::try_from(v)
                .map_err(|_| JobError::Config(format!("label_offset cannot be {}", v)))?;
        }
        if let Some(v) = get_str(root, "delimiter")? {
            cfg.update_schema.delimiter = parse_delimiter(&v)?;
        }
        if let Some(v) = get_str(root, "duplicate_resolution")? {
            cfg.duplicate_resolution = v.parse().map_err(JobError::Config)?;
        }

        if let Some(cols) = get_section(root, "update_columns")? {
            read_update_columns(cols, &mut cfg.update_schema.columns)?;
        }
        if let Some(fields) = get_section(root, "point_fields")? {
            read_point_fields(fields, &mut cfg.point_fields)?;
        }
        if let Some(interp) = get_section(root, "interpolator")? {
            cfg.interpolator = read_interpolator(interp)?;
        }

        Ok(cfg)
    }
}

/// Does what it says on the tin (or at least, the function signature).
pub fn get_cfg_doc_from_path(cfgpath: &Path) -> Result<Document> {
    let text = read_to_string(cfgpath).map_err(|_| JobError::unavailable("configuration file", cfgpath))?;
    text.parse::<Document>()
        .map_err(|e| JobError::Config(format!("{}: {}", cfgpath.display(), e)))
}

fn read_update_columns(table: &dyn TableLike, cols: &mut UpdateColumns) -> Result<()> {
    if let Some(v) = get_str(table, "asset")? {
        cols.asset = v;
    }
    if let Some(v) = get_str(table, "pressure")? {
        cols.pressure = v;
    }
    if let Some(v) = get_str(table, "stop_date")? {
        cols.stop_date = v;
    }
    Ok(())
}

fn read_point_fields(table: &dyn TableLike, fields: &mut LayerFields) -> Result<()> {
    let slots: [(&str, &mut String); 5] = [
        ("facility_id", &mut fields.facility_id),
        ("elevation", &mut fields.elevation),
        ("static_pressure", &mut fields.static_pressure),
        ("hydro_grade", &mut fields.hydro_grade),
        ("date_collected", &mut fields.date_collected),
    ];
    for (key, slot) in slots {
        if let Some(v) = get_str(table, key)? {
            *slot = v;
        }
    }
    Ok(())
}

fn read_interpolator(table: &dyn TableLike) -> Result<Option<CommandInterpolator>> {
    let program = match get_str(table, "program")? {
        Some(p) if !p.trim().is_empty() => p,
        _ => return Ok(None),
    };
    let args = match table.get("args") {
        None => Vec::new(),
        Some(item) => item
            .as_array()
            .ok_or_else(|| JobError::Config(String::from("interpolator.args must be an array of strings")))?
            .iter()
            .map(|v| {
                v.as_str().map(String::from).ok_or_else(|| {
                    JobError::Config(String::from("interpolator.args must be an array of strings"))
                })
            })
            .collect::<Result<Vec<String>>>()?,
    };
    Ok(Some(CommandInterpolator::new(program, args)))
}

fn parse_delimiter(v: &str) -> Result<u8> {
    match v {
        "\\t" | "tab" => Ok(b'\t'),
        _ if v.len() == 1 && v.is_ascii() => Ok(v.as_bytes()[0]),
        _ => Err(JobError::Config(format!(
            "delimiter must be a single ASCII character, not '{}'",
            v
        ))),
    }
}

fn get_str(table: &dyn TableLike, key: &str) -> Result<Option<String>> {
    match table.get(key) {
        None => Ok(None),
        Some(item) => item
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| JobError::Config(format!("'{}' must be a string", key))),
    }
}

fn get_int(table: &dyn TableLike, key: &str) -> Result<Option<i64>> {
    match table.get(key) {
        None => Ok(None),
        Some(item) => item
            .as_integer()
            .map(Some)
            .ok_or_else(|| JobError::Config(format!("'{}' must be an integer", key))),
    }
}

fn get_section<'a>(table: &'a dyn TableLike, key: &str) -> Result<Option<&'a dyn TableLike>> {
    match table.get(key) {
        None => Ok(None),
        Some(item) => item
            .as_table_like()
            .map(Some)
            .ok_or_else(|| JobError::Config(format!("'{}' must be a table", key))),
    }
}
