//! Column role detection for tabular sources.
//!
//! Proposes which columns hold a record's identity, name and location from
//! the header row and a small sample of data rows. The result is advisory:
//! it is shown to an administrator for confirmation and never persisted
//! as-is. Missing roles are `None`, never an error.
//!
//! Matching is case-insensitive and order-sensitive. Each role is matched
//! independently: the first header, left to right, that satisfies a role's
//! predicate takes that role. One header may fill several roles.

use serde::Serialize;

use crate::geometry::looks_like_wkt;

/// Rows of the sample the detector looks at (the header row excluded)
pub const SAMPLE_ROWS: usize = 99;

const GEOMETRY_CONTAINS: &[&str] = &["geometry", "geom", "wkt", "shape", "the_geom"];
const IDENTITY_SUFFIXES: &[&str] = &["id", "objectid", "fid", "gid"];
const NAME_CONTAINS: &[&str] = &["name", "title", "label", "description"];
const LATITUDE_EQUALS: &[&str] = &["lat", "latitude", "y"];
const LONGITUDE_EQUALS: &[&str] = &["lon", "lng", "long", "longitude", "x"];
const LONGITUDE_SUFFIXES: &[&str] = &["lng", "lon"];

/// Proposed column for each role, plus every available column in order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldProposal {
    pub identity: Option<String>,
    pub name: Option<String>,
    pub geometry: Option<String>,
    pub latitude: Option<String>,
    pub longitude: Option<String>,
    pub columns: Vec<String>,
}

/// Propose a field mapping for a sheet.
pub fn detect_fields(headers: &[String], rows: &[Vec<String>]) -> FieldProposal {
    let mut proposal = FieldProposal {
        columns: headers.to_vec(),
        ..Default::default()
    };

    for header in headers {
        let lower = header.trim().to_lowercase();

        if proposal.geometry.is_none() && is_geometry(&lower) {
            proposal.geometry = Some(header.clone());
        }
        if proposal.identity.is_none() && is_identity(&lower) {
            proposal.identity = Some(header.clone());
        }
        if proposal.name.is_none() && is_name(&lower) {
            proposal.name = Some(header.clone());
        }
        if proposal.latitude.is_none() && is_latitude(&lower) {
            proposal.latitude = Some(header.clone());
        }
        if proposal.longitude.is_none() && is_longitude(&lower) {
            proposal.longitude = Some(header.clone());
        }
    }

    if proposal.geometry.is_none() && proposal.latitude.is_none() && proposal.longitude.is_none() {
        proposal.geometry = sniff_geometry_column(headers, rows);
    }

    if proposal.identity.is_none() {
        proposal.identity = headers.first().cloned();
    }
    if proposal.name.is_none() && headers.len() >= 2 {
        proposal.name = Some(headers[1].clone());
    }

    proposal
}

fn is_geometry(h: &str) -> bool {
    GEOMETRY_CONTAINS.iter().any(|k| h.contains(k))
}

fn is_identity(h: &str) -> bool {
    IDENTITY_SUFFIXES.iter().any(|k| h.ends_with(k))
}

fn is_name(h: &str) -> bool {
    NAME_CONTAINS.iter().any(|k| h.contains(k))
}

fn is_latitude(h: &str) -> bool {
    LATITUDE_EQUALS.contains(&h) || h.ends_with("lat")
}

fn is_longitude(h: &str) -> bool {
    LONGITUDE_EQUALS.contains(&h) || LONGITUDE_SUFFIXES.iter().any(|k| h.ends_with(k))
}

/// First column whose first non-empty sampled value is WKT.
fn sniff_geometry_column(headers: &[String], rows: &[Vec<String>]) -> Option<String> {
    headers.iter().enumerate().find_map(|(col, header)| {
        let first = rows
            .iter()
            .take(SAMPLE_ROWS)
            .filter_map(|row| row.get(col))
            .map(|v| v.trim())
            .find(|v| !v.is_empty())?;
        looks_like_wkt(first).then(|| header.clone())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_detects_parcel_layout() {
        let headers = strings(&["OBJECTID", "PARCEL_NAME", "LATITUDE", "LONGITUDE", "NOTES"]);
        let proposal = detect_fields(&headers, &[]);

        assert_eq!(proposal.identity.as_deref(), Some("OBJECTID"));
        assert_eq!(proposal.name.as_deref(), Some("PARCEL_NAME"));
        assert_eq!(proposal.latitude.as_deref(), Some("LATITUDE"));
        assert_eq!(proposal.longitude.as_deref(), Some("LONGITUDE"));
        assert_eq!(proposal.geometry, None);
        assert_eq!(proposal.columns, headers);
    }

    #[test]
    fn test_falls_back_to_position_and_shape() {
        let headers = strings(&["col1", "col2", "shape"]);
        let rows = vec![strings(&["1", "Main St", "POLYGON((0 0,1 0,1 1,0 1,0 0))"])];
        let proposal = detect_fields(&headers, &rows);

        assert_eq!(proposal.geometry.as_deref(), Some("shape"));
        assert_eq!(proposal.identity.as_deref(), Some("col1"));
        assert_eq!(proposal.name.as_deref(), Some("col2"));
    }

    #[test]
    fn test_sniffs_wkt_content() {
        let headers = strings(&["code", "street", "boundary", "outline"]);
        let rows = vec![
            strings(&["A1", "", "", ""]),
            strings(&["A2", "Elm St", "  linestring (0 0, 1 1)", "POLYGON((0 0,1 0,1 1,0 0))"]),
        ];
        let proposal = detect_fields(&headers, &rows);

        assert_eq!(proposal.geometry.as_deref(), Some("boundary"));
    }

    #[test]
    fn test_sniffing_skipped_when_lat_lng_found() {
        let headers = strings(&["id", "lat", "lng", "boundary"]);
        let rows = vec![strings(&["1", "10", "20", "POINT (20 10)"])];
        let proposal = detect_fields(&headers, &rows);

        assert_eq!(proposal.latitude.as_deref(), Some("lat"));
        assert_eq!(proposal.longitude.as_deref(), Some("lng"));
        assert_eq!(proposal.geometry, None);
    }

    #[test]
    fn test_first_name_match_wins() {
        let headers = strings(&["gid", "site_title", "description", "y", "x"]);
        let proposal = detect_fields(&headers, &[]);

        assert_eq!(proposal.identity.as_deref(), Some("gid"));
        assert_eq!(proposal.name.as_deref(), Some("site_title"));
        assert_eq!(proposal.latitude.as_deref(), Some("y"));
        assert_eq!(proposal.longitude.as_deref(), Some("x"));
    }

    #[test]
    fn test_suffix_matches() {
        let headers = strings(&["site_fid", "label", "gps_lat", "gps_lon", "the_geom"]);
        let proposal = detect_fields(&headers, &[]);

        assert_eq!(proposal.identity.as_deref(), Some("site_fid"));
        assert_eq!(proposal.name.as_deref(), Some("label"));
        assert_eq!(proposal.latitude.as_deref(), Some("gps_lat"));
        assert_eq!(proposal.longitude.as_deref(), Some("gps_lon"));
        assert_eq!(proposal.geometry.as_deref(), Some("the_geom"));
    }

    #[test]
    fn test_header_can_fill_several_roles() {
        let headers = strings(&["OWNER", "GEOM_ID"]);
        let proposal = detect_fields(&headers, &[]);

        assert_eq!(proposal.geometry.as_deref(), Some("GEOM_ID"));
        assert_eq!(proposal.identity.as_deref(), Some("GEOM_ID"));
        // No name keyword, so the second column
        assert_eq!(proposal.name.as_deref(), Some("GEOM_ID"));
    }

    #[test]
    fn test_site_name_id_is_identity_and_name() {
        let headers = strings(&["SITE_NAME_ID", "NOTES"]);
        let proposal = detect_fields(&headers, &[]);

        assert_eq!(proposal.identity.as_deref(), Some("SITE_NAME_ID"));
        assert_eq!(proposal.name.as_deref(), Some("SITE_NAME_ID"));
    }

    #[test]
    fn test_single_column_has_no_name() {
        let proposal = detect_fields(&strings(&["value"]), &[strings(&["42"])]);
        assert_eq!(proposal.identity.as_deref(), Some("value"));
        assert_eq!(proposal.name, None);
    }

    #[test]
    fn test_empty_sheet() {
        assert_eq!(detect_fields(&[], &[]), FieldProposal::default());
    }
}
