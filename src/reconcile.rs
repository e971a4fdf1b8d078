//! Reconciling field updates onto the master test points.
//!
//! Step-by-step:
//! 1. inner-join the updates onto the points by facility identifier
//! 2. recompute pressure, hydraulic grade and collection date on each joined row
//! 3. collapse duplicate rows per facility, by date, per [`DuplicateResolution`]
//! 4. overwrite the matching points with the surviving rows' non-null values
//! 5. drop points that still have no hydraulic grade

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use crate::points::TestPoint;
use crate::updates::UpdateRecord;

/// Feet of water head per psi. A physical constant, not a tuning knob.
pub const PRESSURE_HEAD_FACTOR: f64 = 2.31;

/// Hydraulic grade: elevation plus static pressure expressed as head.
pub fn hydraulic_grade(elevation: f64, static_pressure: f64) -> f64 {
    elevation + PRESSURE_HEAD_FACTOR * static_pressure
}

/// Which update wins when one facility was tested more than once.
///
/// Rows are sorted by stop date, ascending, then the first or last row
/// per facility is kept. Ties keep their table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateResolution {
    /// Oldest reading wins. This is what the daily job has always done.
    #[default]
    Earliest,
    /// Newest reading wins.
    Latest,
}

impl FromStr for DuplicateResolution {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "earliest" => Ok(Self::Earliest),
            "latest" => Ok(Self::Latest),
            other => Err(format!(
                "unknown duplicate resolution '{}', expected 'earliest' or 'latest'",
                other
            )),
        }
    }
}

impl fmt::Display for DuplicateResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Earliest => write!(f, "earliest"),
            Self::Latest => write!(f, "latest"),
        }
    }
}

/// A point/update pair after step 2.
#[derive(Debug, Clone, PartialEq)]
struct JoinedRow<'a> {
    facility_id: &'a str,
    static_pressure: f64,
    /// `None` when the point has no elevation to add the head to.
    hydro_grade: Option<f64>,
    date_collected: NaiveDateTime,
}

/// Counts for the run log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileSummary {
    pub points_in: usize,
    pub updates_in: usize,
    pub unmatched_updates: usize,
    pub joined_rows: usize,
    pub duplicates_collapsed: usize,
    pub points_updated: usize,
    pub incomplete_dropped: usize,
    pub points_out: usize,
}

impl fmt::Display for ReconcileSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} points in, {} updates ({} unmatched, {} duplicates collapsed), {} points updated, {} dropped without a hydraulic grade, {} points out",
            self.points_in,
            self.updates_in,
            self.unmatched_updates,
            self.duplicates_collapsed,
            self.points_updated,
            self.incomplete_dropped,
            self.points_out
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub points: Vec<TestPoint>,
    pub summary: ReconcileSummary,
}

/// Applies `updates` to `points`.
///
/// The result is a subset of `points` in their original order. A point is
/// only changed if an update matched it, and then only in pressure,
/// hydraulic grade and collection date. Updates for facilities not in
/// `points` are ignored.
pub fn reconcile(
    points: Vec<TestPoint>,
    updates: &[UpdateRecord],
    resolution: DuplicateResolution,
) -> Reconciliation {
    let mut summary = ReconcileSummary {
        points_in: points.len(),
        updates_in: updates.len(),
        ..ReconcileSummary::default()
    };

    let elevations: HashMap<&str, Option<f64>> = points
        .iter()
        .map(|p| (p.facility_id.as_str(), p.elevation))
        .collect();

    // 1 & 2
    let mut joined: Vec<JoinedRow> = Vec::with_capacity(updates.len());
    for update in updates {
        match elevations.get(update.facility_id.as_str()) {
            Some(elevation) => joined.push(JoinedRow {
                facility_id: &update.facility_id,
                static_pressure: update.static_pressure,
                hydro_grade: elevation.map(|e| hydraulic_grade(e, update.static_pressure)),
                date_collected: update.stop_date,
            }),
            None => {
                debug!("no test point for update on '{}'", update.facility_id);
                summary.unmatched_updates += 1;
            }
        }
    }
    summary.joined_rows = joined.len();

    // 3
    let winners = resolve_duplicates(joined, resolution);
    summary.duplicates_collapsed = summary.joined_rows - winners.len();

    // 4 & 5
    let mut out = Vec::with_capacity(points.len());
    for mut point in points {
        if let Some(row) = winners.get(point.facility_id.as_str()) {
            apply(&mut point, row);
            summary.points_updated += 1;
        }
        if point.hydro_grade.is_some() {
            out.push(point);
        } else {
            debug!("dropping '{}': no hydraulic grade", point.facility_id);
            summary.incomplete_dropped += 1;
        }
    }
    summary.points_out = out.len();

    info!("Reconciled ({} wins): {}", resolution, summary);

    Reconciliation {
        points: out,
        summary,
    }
}

/// One row per facility. The sort is stable, so same-date rows stay in
/// table order and the first (or last) of them wins.
fn resolve_duplicates(
    mut joined: Vec<JoinedRow<'_>>,
    resolution: DuplicateResolution,
) -> IndexMap<&str, JoinedRow<'_>> {
    joined.sort_by_key(|row| row.date_collected);

    let mut winners: IndexMap<&str, JoinedRow> = IndexMap::with_capacity(joined.len());
    for row in joined {
        match resolution {
            DuplicateResolution::Earliest => {
                winners.entry(row.facility_id).or_insert(row);
            }
            DuplicateResolution::Latest => {
                winners.insert(row.facility_id, row);
            }
        }
    }
    winners
}

/// Only non-null values overwrite.
fn apply(point: &mut TestPoint, row: &JoinedRow) {
    point.static_pressure = Some(row.static_pressure);
    if let Some(grade) = row.hydro_grade {
        point.hydro_grade = Some(grade);
    }
    point.date_collected = Some(row.date_collected);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::points::Point;
    use chrono::NaiveDate;

    fn date(s: &str) -> NaiveDateTime {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn point(id: &str, elevation: Option<f64>, pressure: Option<f64>, grade: Option<f64>) -> TestPoint {
        let mut attributes = IndexMap::new();
        attributes.insert(String::from("FACILITYID"), serde_json::json!(id));
        attributes.insert(String::from("Zone"), serde_json::json!("1838A"));
        TestPoint {
            facility_id: id.to_string(),
            geometry: Point { x: 1.0, y: 2.0, z: None },
            elevation,
            static_pressure: pressure,
            hydro_grade: grade,
            date_collected: None,
            feature_id: None,
            attributes,
        }
    }

    fn update(id: &str, pressure: f64, stop: &str) -> UpdateRecord {
        UpdateRecord {
            facility_id: id.to_string(),
            static_pressure: pressure,
            stop_date: date(stop),
        }
    }

    fn ids(points: &[TestPoint]) -> Vec<&str> {
        points.iter().map(|p| p.facility_id.as_str()).collect()
    }

    #[test]
    fn test_earliest_update_wins_by_default() {
        let points = vec![point("H1", Some(100.0), None, None)];
        let updates = vec![update("H1", 45.0, "2024-01-10"), update("H1", 40.0, "2024-01-05")];

        let r = reconcile(points, &updates, DuplicateResolution::default());
        assert_eq!(r.points.len(), 1);
        let h1 = &r.points[0];
        assert_eq!(h1.static_pressure, Some(40.0));
        assert!((h1.hydro_grade.unwrap() - 192.4).abs() < 1e-9);
        assert_eq!(h1.date_collected, Some(date("2024-01-05")));
        assert_eq!(r.summary.duplicates_collapsed, 1);
        assert_eq!(r.summary.points_updated, 1);
    }

    #[test]
    fn test_latest_update_wins_when_asked() {
        let points = vec![point("H1", Some(100.0), None, None)];
        let updates = vec![update("H1", 40.0, "2024-01-05"), update("H1", 45.0, "2024-01-10")];

        let r = reconcile(points, &updates, DuplicateResolution::Latest);
        let h1 = &r.points[0];
        assert_eq!(h1.static_pressure, Some(45.0));
        assert!((h1.hydro_grade.unwrap() - (100.0 + 2.31 * 45.0)).abs() < 1e-9);
        assert_eq!(h1.date_collected, Some(date("2024-01-10")));
    }

    #[test]
    fn test_same_date_ties_keep_table_order() {
        let points = vec![point("H1", Some(0.0), None, None)];
        let updates = vec![update("H1", 10.0, "2024-01-05"), update("H1", 20.0, "2024-01-05")];

        let first = reconcile(points.clone(), &updates, DuplicateResolution::Earliest);
        assert_eq!(first.points[0].static_pressure, Some(10.0));
        let last = reconcile(points, &updates, DuplicateResolution::Latest);
        assert_eq!(last.points[0].static_pressure, Some(20.0));
    }

    #[test]
    fn test_no_updates_only_filters_null_grades() {
        let points = vec![
            point("H1", Some(100.0), Some(40.0), Some(192.4)),
            point("H2", Some(50.0), None, None),
            point("H3", None, Some(10.0), Some(33.1)),
        ];
        let r = reconcile(points.clone(), &[], DuplicateResolution::Earliest);
        let expected: Vec<TestPoint> = points.into_iter().filter(|p| p.hydro_grade.is_some()).collect();
        assert_eq!(r.points, expected);
        assert_eq!(r.summary.incomplete_dropped, 1);
        assert_eq!(r.summary.points_updated, 0);
    }

    #[test]
    fn test_unmatched_point_without_grade_is_dropped() {
        let points = vec![point("H1", Some(100.0), None, None), point("H2", Some(50.0), None, None)];
        let updates = vec![update("H1", 40.0, "2024-01-05")];
        let r = reconcile(points, &updates, DuplicateResolution::Earliest);
        assert_eq!(ids(&r.points), ["H1"]);
    }

    #[test]
    fn test_unmatched_updates_are_ignored() {
        let points = vec![point("H1", Some(100.0), Some(30.0), Some(169.3))];
        let updates = vec![update("OUTSIDE-9", 70.0, "2024-01-05")];
        let r = reconcile(points.clone(), &updates, DuplicateResolution::Earliest);
        assert_eq!(r.points, points);
        assert_eq!(r.summary.unmatched_updates, 1);
        assert_eq!(r.summary.joined_rows, 0);
    }

    #[test]
    fn test_result_ids_come_from_the_points() {
        let points = vec![
            point("B", Some(1.0), None, Some(5.0)),
            point("A", Some(2.0), None, None),
            point("C", Some(3.0), None, None),
        ];
        let updates = vec![
            update("C", 1.0, "2024-03-01"),
            update("Z", 1.0, "2024-03-01"),
            update("A", 2.0, "2024-02-01"),
        ];
        let r = reconcile(points, &updates, DuplicateResolution::Earliest);
        assert_eq!(ids(&r.points), ["B", "A", "C"]);
    }

    #[test]
    fn test_other_attributes_survive() {
        let points = vec![point("H1", Some(100.0), None, None)];
        let before = points[0].attributes.clone();
        let r = reconcile(points, &[update("H1", 40.0, "2024-01-05")], DuplicateResolution::Earliest);
        assert_eq!(r.points[0].attributes, before);
        assert_eq!(r.points[0].geometry, Point { x: 1.0, y: 2.0, z: None });
    }

    #[test]
    fn test_missing_elevation_keeps_old_grade() {
        let points = vec![
            point("H1", None, Some(30.0), Some(170.0)),
            point("H2", None, None, None),
        ];
        let updates = vec![update("H1", 40.0, "2024-01-05"), update("H2", 40.0, "2024-01-05")];
        let r = reconcile(points, &updates, DuplicateResolution::Earliest);
        assert_eq!(ids(&r.points), ["H1"]);
        assert_eq!(r.points[0].static_pressure, Some(40.0));
        assert_eq!(r.points[0].hydro_grade, Some(170.0));
        assert_eq!(r.summary.points_updated, 2);
        assert_eq!(r.summary.incomplete_dropped, 1);
    }

    #[test]
    fn test_idempotent_once_applied() {
        let points = vec![point("H1", Some(100.0), None, None), point("H2", Some(50.0), Some(20.0), Some(96.2))];
        let updates = vec![update("H1", 40.0, "2024-01-05"), update("H1", 45.0, "2024-01-10")];
        let once = reconcile(points, &updates, DuplicateResolution::Earliest);
        let twice = reconcile(once.points.clone(), &[], DuplicateResolution::Earliest);
        assert_eq!(twice.points, once.points);
    }

    #[test]
    fn test_resolution_parsing() {
        assert_eq!("Latest".parse::<DuplicateResolution>(), Ok(DuplicateResolution::Latest));
        assert_eq!(" earliest ".parse::<DuplicateResolution>(), Ok(DuplicateResolution::Earliest));
        assert!("newest".parse::<DuplicateResolution>().is_err());
        assert_eq!(DuplicateResolution::Latest.to_string(), "latest");
    }
}
