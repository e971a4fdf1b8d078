//! Writing reconciled test points back out as a dated GeoJSON file.
use chrono::NaiveDate;
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::Result;
use crate::points::{LayerFields, TestPoint, LAYER_EXTENSION};
use crate::utils::{date_stamp, format_timestamp};

/// Exported files are named `<prefix><MMDDYYYY>.geojson`.
pub const EXPORT_PREFIX: &str = "UpdatedStaticPressureTests_";

/// Where today's export goes.
pub fn export_path(output_dir: &Path, run_date: NaiveDate) -> PathBuf {
    output_dir.join(format!("{}{}.{}", EXPORT_PREFIX, date_stamp(run_date), LAYER_EXTENSION))
}

/// Named CRS member, in the form GIS readers accept.
pub fn crs_member(epsg: u32) -> Value {
    json!({
        "type": "name",
        "properties": { "name": format!("urn:ogc:def:crs:EPSG::{}", epsg) }
    })
}

/// The EPSG code in a named CRS member, whether written as a URN or as `EPSG:<code>`.
pub fn crs_epsg(crs: &Value) -> Option<u32> {
    let name = crs.get("properties")?.get("name")?.as_str()?;
    let (authority, code) = name.rsplit_once(':')?;
    if !authority.to_ascii_uppercase().contains("EPSG") {
        return None;
    }
    code.trim().parse().ok()
}

/// Writes the points to `<output_dir>/UpdatedStaticPressureTests_<MMDDYYYY>.geojson`,
/// replacing any earlier export from the same day.
pub fn export_points(
    output_dir: &Path,
    run_date: NaiveDate,
    points: &[TestPoint],
    fields: &LayerFields,
    epsg: u32,
) -> Result<PathBuf> {
    create_dir_all(output_dir)?;
    let path = export_path(output_dir, run_date);
    if path.exists() {
        info!("Replacing earlier export {}", path.display());
    }
    let mut wtr = BufWriter::new(File::create(&path)?);
    write_points(&mut wtr, points, fields, epsg)?;
    wtr.flush()?;
    info!("Wrote {} test points to {}", points.len(), path.display());
    Ok(path)
}

/// Serialises the points as a GeoJSON `FeatureCollection`.
///
/// Each feature keeps its original properties in order; the reconciled
/// fields are written over them, and the collection date becomes text.
pub fn write_points<W: Write>(
    writer: W,
    points: &[TestPoint],
    fields: &LayerFields,
    epsg: u32,
) -> Result<()> {
    let features: Vec<Value> = points.iter().map(|p| to_feature(p, fields)).collect();
    let doc = json!({
        "type": "FeatureCollection",
        "crs": crs_member(epsg),
        "features": features,
    });
    serde_json::to_writer_pretty(writer, &doc)?;
    Ok(())
}

fn to_feature(point: &TestPoint, fields: &LayerFields) -> Value {
    let mut props = point.attributes.clone();
    props.insert(fields.facility_id.clone(), json!(point.facility_id));
    props.insert(fields.elevation.clone(), json!(point.elevation));
    props.insert(fields.static_pressure.clone(), json!(point.static_pressure));
    props.insert(fields.hydro_grade.clone(), json!(point.hydro_grade));
    props.insert(
        fields.date_collected.clone(),
        json!(point.date_collected.as_ref().map(format_timestamp)),
    );
    let properties: Map<String, Value> = props.into_iter().collect();

    let mut feature = Map::new();
    feature.insert(String::from("type"), json!("Feature"));
    if let Some(id) = &point.feature_id {
        feature.insert(String::from("id"), id.clone());
    }
    feature.insert(
        String::from("geometry"),
        json!({ "type": "Point", "coordinates": point.geometry.coordinates() }),
    );
    feature.insert(String::from("properties"), Value::Object(properties));
    Value::Object(feature)
}
