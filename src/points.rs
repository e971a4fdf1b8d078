//! The master hydrant test-point layer.
//!
//! A point store is a directory; each layer in it is a GeoJSON
//! `FeatureCollection` named `<layer>.geojson`. Loading standardises the
//! numeric and date fields the reconciliation needs and keeps every other
//! attribute untouched, in source order, so it can be written back out.

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{JobError, Result};
use crate::utils::{parse_timestamp, timestamp_from_epoch_millis};

/// Layer files carry this extension inside a point store.
pub const LAYER_EXTENSION: &str = "geojson";

/// Attribute names of the master layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerFields {
    pub facility_id: String,
    pub elevation: String,
    pub static_pressure: String,
    pub hydro_grade: String,
    pub date_collected: String,
}

impl Default for LayerFields {
    fn default() -> Self {
        Self {
            facility_id: String::from("FACILITYID"),
            elevation: String::from("Elevation"),
            static_pressure: String::from("StaticPressure"),
            hydro_grade: String::from("HydroGrade"),
            date_collected: String::from("DateCollected"),
        }
    }
}

/// A projected point. `z` is carried through if the source has one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
}

impl Point {
    pub fn coordinates(&self) -> Vec<f64> {
        match self.z {
            Some(z) => vec![self.x, self.y, z],
            None => vec![self.x, self.y],
        }
    }
}

/// One hydrant test site.
#[derive(Debug, Clone, PartialEq)]
pub struct TestPoint {
    pub facility_id: String,
    pub geometry: Point,
    pub elevation: Option<f64>,
    pub static_pressure: Option<f64>,
    pub hydro_grade: Option<f64>,
    pub date_collected: Option<NaiveDateTime>,
    /// The feature's `id` member, if it had one.
    pub feature_id: Option<Value>,
    /// All properties as loaded, including the ones mirrored above.
    pub attributes: IndexMap<String, Value>,
}

/// A loaded layer.
#[derive(Debug, Clone, PartialEq)]
pub struct TestPointSet {
    pub name: String,
    pub crs: Option<Value>,
    pub points: Vec<TestPoint>,
}

#[derive(Debug, Deserialize)]
struct RawCollection {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    crs: Option<Value>,
    #[serde(default)]
    features: Vec<RawFeature>,
}

#[derive(Debug, Deserialize)]
struct RawFeature {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    geometry: Option<RawGeometry>,
    #[serde(default)]
    properties: Option<IndexMap<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct RawGeometry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    coordinates: Value,
}

/// Opens `<store>/<layer>.geojson`.
pub fn open_layer(store: &Path, layer: &str, fields: &LayerFields) -> Result<TestPointSet> {
    if !store.is_dir() {
        return Err(JobError::unavailable("point store", store));
    }
    let path = store.join(format!("{}.{}", layer, LAYER_EXTENSION));
    let file = File::open(&path)
        .map_err(|_| JobError::unavailable(format!("layer '{}'", layer), &path))?;
    info!("Loading test points from {}", path.display());
    read_points(BufReader::new(file), layer, fields)
}

/// Names of the layers available in a point store, sorted.
pub fn list_layers(store: &Path) -> Result<Vec<String>> {
    if !store.is_dir() {
        return Err(JobError::unavailable("point store", store));
    }
    let pattern = store.join(format!("*.{}", LAYER_EXTENSION));
    let pattern = pattern
        .to_str()
        .ok_or_else(|| JobError::Config(format!("non-UTF-8 store path {}", store.display())))?;
    let mut names: Vec<String> = glob::glob(pattern)
        .map_err(|e| JobError::Config(e.to_string()))?
        .filter_map(std::result::Result::ok)
        .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(String::from))
        .collect();
    names.sort();
    Ok(names)
}

/// Read a GeoJSON `FeatureCollection` of test points from a stream.
pub fn read_points<R: Read>(reader: R, name: &str, fields: &LayerFields) -> Result<TestPointSet> {
    let raw: RawCollection = serde_json::from_reader(reader)
        .map_err(|e| JobError::data_format(name, format!("not a readable GeoJSON document: {}", e)))?;
    if raw.kind != "FeatureCollection" {
        return Err(JobError::data_format(
            name,
            format!("expected a FeatureCollection, found '{}'", raw.kind),
        ));
    }

    check_schema(&raw.features, name, fields)?;

    let mut seen: HashSet<String> = HashSet::with_capacity(raw.features.len());
    let mut points = Vec::with_capacity(raw.features.len());

    for (idx, feature) in raw.features.into_iter().enumerate() {
        let row = idx + 1;
        let point = to_test_point(feature, row, name, fields)?;
        if !seen.insert(point.facility_id.clone()) {
            return Err(JobError::data_format(
                name,
                format!("feature {}: duplicate {} '{}'", row, fields.facility_id, point.facility_id),
            ));
        }
        points.push(point);
    }

    debug!("{} test points read from layer {}", points.len(), name);

    Ok(TestPointSet {
        name: name.to_string(),
        crs: raw.crs,
        points,
    })
}

/// Every field we read must appear somewhere in the layer.
/// The join key gets its own error since it's what the whole job hangs off.
fn check_schema(features: &[RawFeature], name: &str, fields: &LayerFields) -> Result<()> {
    if features.is_empty() {
        return Ok(());
    }
    let present: HashSet<&str> = features
        .iter()
        .filter_map(|f| f.properties.as_ref())
        .flat_map(|p| p.keys().map(String::as_str))
        .collect();

    if !present.contains(fields.facility_id.as_str()) {
        return Err(JobError::JoinKey {
            side: format!("point layer '{}'", name),
            field: fields.facility_id.clone(),
        });
    }
    for wanted in [
        &fields.elevation,
        &fields.static_pressure,
        &fields.hydro_grade,
        &fields.date_collected,
    ] {
        if !present.contains(wanted.as_str()) {
            return Err(JobError::data_format(
                name,
                format!("layer has no '{}' field", wanted),
            ));
        }
    }
    Ok(())
}

fn to_test_point(
    feature: RawFeature,
    row: usize,
    name: &str,
    fields: &LayerFields,
) -> Result<TestPoint> {
    let attributes = feature.properties.unwrap_or_default();

    let facility_id = match attributes.get(&fields.facility_id) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        other => {
            return Err(JobError::data_format(
                name,
                format!(
                    "feature {}: {} must be text, found {}",
                    row,
                    fields.facility_id,
                    other.map_or("nothing", describe)
                ),
            ))
        }
    };

    let geometry = match feature.geometry {
        Some(g) => to_point(&g).ok_or_else(|| {
            JobError::data_format(
                name,
                format!("feature {} ({}): expected Point geometry, found {}", row, facility_id, g.kind),
            )
        })?,
        None => {
            return Err(JobError::data_format(
                name,
                format!("feature {} ({}): no geometry", row, facility_id),
            ))
        }
    };

    let number = |field: &str| -> Result<Option<f64>> {
        number_field(attributes.get(field)).map_err(|found| {
            JobError::data_format(
                name,
                format!("feature {} ({}): {} is not a number: {}", row, facility_id, field, found),
            )
        })
    };
    let elevation = number(&fields.elevation)?;
    let static_pressure = number(&fields.static_pressure)?;
    let hydro_grade = number(&fields.hydro_grade)?;

    let date_collected = date_field(attributes.get(&fields.date_collected)).map_err(|found| {
        JobError::data_format(
            name,
            format!(
                "feature {} ({}): {} is not a date: {}",
                row, facility_id, fields.date_collected, found
            ),
        )
    })?;

    Ok(TestPoint {
        facility_id,
        geometry,
        elevation,
        static_pressure,
        hydro_grade,
        date_collected,
        feature_id: feature.id,
        attributes,
    })
}

fn to_point(geometry: &RawGeometry) -> Option<Point> {
    if geometry.kind != "Point" {
        return None;
    }
    let coords: Vec<f64> = geometry
        .coordinates
        .as_array()?
        .iter()
        .map(Value::as_f64)
        .collect::<Option<_>>()?;
    match coords.as_slice() {
        [x, y] => Some(Point { x: *x, y: *y, z: None }),
        [x, y, z, ..] => Some(Point { x: *x, y: *y, z: Some(*z) }),
        _ => None,
    }
}

/// Nulls, absences, blank strings and non-finite text like `"NaN"` are all "no value".
fn number_field(value: Option<&Value>) -> std::result::Result<Option<f64>, String> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64().filter(|v| v.is_finite())),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(|v| Some(v).filter(|v| v.is_finite()))
            .map_err(|_| format!("'{}'", s)),
        Some(other) => Err(describe(other).to_string()),
    }
}

fn date_field(value: Option<&Value>) -> std::result::Result<Option<NaiveDateTime>, String> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => parse_timestamp(s).map(Some).ok_or_else(|| format!("'{}'", s)),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(timestamp_from_epoch_millis)
            .map(Some)
            .ok_or_else(|| n.to_string()),
        Some(other) => Err(describe(other).to_string()),
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "text",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn layer(features: Value) -> String {
        json!({
            "type": "FeatureCollection",
            "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::2274" } },
            "features": features
        })
        .to_string()
    }

    fn feature(id: Value, elevation: Value, pressure: Value, grade: Value, date: Value) -> Value {
        json!({
            "type": "Feature",
            "geometry": { "type": "Point", "coordinates": [1_700_000.5, 650_000.25] },
            "properties": {
                "OBJECTID": 1,
                "FACILITYID": id,
                "Elevation": elevation,
                "StaticPressure": pressure,
                "HydroGrade": grade,
                "DateCollected": date,
                "Zone": "1838A"
            }
        })
    }

    #[test]
    fn test_reads_points_and_keeps_attribute_order() {
        let doc = layer(json!([
            feature(json!("HYD-1"), json!(100.0), json!(40.0), json!(192.4), json!("2023-06-01")),
            feature(json!(2044), json!("55.5"), Value::Null, Value::Null, Value::Null),
        ]));
        let set = read_points(doc.as_bytes(), "PressureTestPnts", &LayerFields::default()).unwrap();

        assert_eq!(set.name, "PressureTestPnts");
        assert!(set.crs.is_some());
        assert_eq!(set.points.len(), 2);

        let first = &set.points[0];
        assert_eq!(first.facility_id, "HYD-1");
        assert_eq!(first.geometry, Point { x: 1_700_000.5, y: 650_000.25, z: None });
        assert_eq!(first.elevation, Some(100.0));
        assert_eq!(first.static_pressure, Some(40.0));
        assert_eq!(first.hydro_grade, Some(192.4));
        assert_eq!(
            first.date_collected.map(|d| d.to_string()),
            Some(String::from("2023-06-01 00:00:00"))
        );
        let keys: Vec<&str> = first.attributes.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            ["OBJECTID", "FACILITYID", "Elevation", "StaticPressure", "HydroGrade", "DateCollected", "Zone"]
        );

        let second = &set.points[1];
        assert_eq!(second.facility_id, "2044");
        assert_eq!(second.elevation, Some(55.5));
        assert_eq!(second.static_pressure, None);
        assert_eq!(second.date_collected, None);
    }

    #[test]
    fn test_non_finite_numbers_are_null() {
        let doc = layer(json!([feature(
            json!("HYD-1"),
            json!("inf"),
            json!("NaN"),
            json!(" nan "),
            Value::Null
        )]));
        let set = read_points(doc.as_bytes(), "pts", &LayerFields::default()).unwrap();
        let p = &set.points[0];
        assert_eq!(p.elevation, None);
        assert_eq!(p.static_pressure, None);
        assert_eq!(p.hydro_grade, None);

        let kept = crate::reconcile::reconcile(set.points, &[], Default::default());
        assert!(kept.points.is_empty());
    }

    #[test]
    fn test_dotted_layer_names_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let doc = layer(json!([feature(
            json!("HYD-1"),
            json!(1.0),
            Value::Null,
            Value::Null,
            Value::Null
        )]));
        std::fs::write(dir.path().join("PZ1838A.v2.geojson"), doc).unwrap();

        let names = list_layers(dir.path()).unwrap();
        assert_eq!(names, ["PZ1838A.v2"]);
        let set = open_layer(dir.path(), &names[0], &LayerFields::default()).unwrap();
        assert_eq!(set.name, "PZ1838A.v2");
        assert_eq!(set.points.len(), 1);
    }

    #[test]
    fn test_epoch_millis_dates() {
        let doc = layer(json!([feature(
            json!("HYD-1"),
            json!(1.0),
            Value::Null,
            Value::Null,
            json!(1_704_412_800_000_i64)
        )]));
        let set = read_points(doc.as_bytes(), "pts", &LayerFields::default()).unwrap();
        assert_eq!(
            set.points[0].date_collected.map(|d| d.to_string()),
            Some(String::from("2024-01-05 00:00:00"))
        );
    }

    #[test]
    fn test_missing_join_field_is_join_key_error() {
        let doc = layer(json!([{
            "type": "Feature",
            "geometry": { "type": "Point", "coordinates": [0.0, 0.0] },
            "properties": { "Elevation": 1.0, "StaticPressure": null, "HydroGrade": null, "DateCollected": null }
        }]));
        let err = read_points(doc.as_bytes(), "pts", &LayerFields::default()).unwrap_err();
        assert!(matches!(err, JobError::JoinKey { ref field, .. } if field == "FACILITYID"));
    }

    #[test]
    fn test_missing_other_field_is_data_format_error() {
        let doc = layer(json!([{
            "type": "Feature",
            "geometry": { "type": "Point", "coordinates": [0.0, 0.0] },
            "properties": { "FACILITYID": "A", "StaticPressure": null, "HydroGrade": null, "DateCollected": null }
        }]));
        let err = read_points(doc.as_bytes(), "pts", &LayerFields::default()).unwrap_err();
        assert!(matches!(err, JobError::DataFormat { .. }));
        assert!(err.to_string().contains("Elevation"));
    }

    #[test]
    fn test_rejects_bad_rows() {
        let fields = LayerFields::default();

        let dup = layer(json!([
            feature(json!("A"), json!(1.0), Value::Null, Value::Null, Value::Null),
            feature(json!("A"), json!(2.0), Value::Null, Value::Null, Value::Null),
        ]));
        let err = read_points(dup.as_bytes(), "pts", &fields).unwrap_err();
        assert!(err.to_string().contains("duplicate FACILITYID 'A'"));

        let bad_date = layer(json!([feature(json!("A"), json!(1.0), Value::Null, Value::Null, json!("someday"))]));
        assert!(matches!(
            read_points(bad_date.as_bytes(), "pts", &fields),
            Err(JobError::DataFormat { .. })
        ));

        let polygon = json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "geometry": { "type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [0.0, 0.0]]] },
                "properties": { "FACILITYID": "A", "Elevation": 1.0, "StaticPressure": null, "HydroGrade": null, "DateCollected": null }
            }]
        })
        .to_string();
        let err = read_points(polygon.as_bytes(), "pts", &fields).unwrap_err();
        assert!(err.to_string().contains("expected Point geometry"));

        let not_fc = json!({ "type": "Feature" }).to_string();
        assert!(matches!(
            read_points(not_fc.as_bytes(), "pts", &fields),
            Err(JobError::DataFormat { .. })
        ));
    }

    #[test]
    fn test_store_and_layer_availability() {
        let dir = tempfile::tempdir().unwrap();
        let fields = LayerFields::default();

        let missing_store = dir.path().join("nope.gdb");
        assert!(matches!(
            open_layer(&missing_store, "pts", &fields),
            Err(JobError::SourceUnavailable { .. })
        ));
        assert!(matches!(
            open_layer(dir.path(), "pts", &fields),
            Err(JobError::SourceUnavailable { .. })
        ));

        let doc = layer(json!([feature(json!("A"), json!(1.0), Value::Null, Value::Null, Value::Null)]));
        std::fs::write(dir.path().join("pts.geojson"), doc).unwrap();
        std::fs::write(dir.path().join("boundary.geojson"), "{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();

        let set = open_layer(dir.path(), "pts", &fields).unwrap();
        assert_eq!(set.points.len(), 1);
        assert_eq!(list_layers(dir.path()).unwrap(), ["boundary", "pts"]);
    }
}
