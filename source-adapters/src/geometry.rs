//! Geometry normalization.
//!
//! Records expose geometry as GeoJSON. Backends store it either as a
//! well-known-text string in one column or as a latitude/longitude column
//! pair; the confirmed [`FieldMappings`] say which.

use geosource::source_config::FieldMappings;
use geosource::SourceError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A GeoJSON geometry. Positions are `[longitude, latitude]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point([f64; 2]),
    LineString(Vec<[f64; 2]>),
    Polygon(Vec<Vec<[f64; 2]>>),
}

impl Geometry {
    /// Point from a latitude/longitude pair. `None` when out of range.
    pub fn from_lat_lng(lat: f64, lng: f64) -> Option<Self> {
        let valid = lat.is_finite()
            && lng.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lng);
        valid.then_some(Geometry::Point([lng, lat]))
    }

    /// Parse POINT, LINESTRING and POLYGON well-known text.
    ///
    /// Only the 2D shapes records use are accepted; a Z/M ordinate is
    /// ignored. Anything else (including `EMPTY`) yields `None`.
    pub fn from_wkt(text: &str) -> Option<Self> {
        let text = text.trim();
        let open = text.find('(')?;
        let kind = text[..open].trim().to_ascii_uppercase();
        let kind = kind
            .strip_suffix(" Z")
            .or_else(|| kind.strip_suffix(" M"))
            .or_else(|| kind.strip_suffix(" ZM"))
            .unwrap_or(kind.as_str())
            .trim();
        let body = strip_parens(&text[open..])?;

        match kind {
            "POINT" => parse_position(body).map(Geometry::Point),
            "LINESTRING" => {
                let line = parse_positions(body)?;
                (line.len() >= 2).then_some(Geometry::LineString(line))
            }
            "POLYGON" => {
                let rings = split_groups(body)?
                    .into_iter()
                    .map(|ring| {
                        let ring = parse_positions(ring)?;
                        (ring.len() >= 4).then_some(ring)
                    })
                    .collect::<Option<Vec<_>>>()?;
                (!rings.is_empty()).then_some(Geometry::Polygon(rings))
            }
            _ => None,
        }
    }

    pub fn to_wkt(&self) -> String {
        fn coords(line: &[[f64; 2]]) -> String {
            line.iter()
                .map(|[x, y]| format!("{} {}", x, y))
                .collect::<Vec<_>>()
                .join(", ")
        }

        match self {
            Geometry::Point([x, y]) => format!("POINT ({} {})", x, y),
            Geometry::LineString(line) => format!("LINESTRING ({})", coords(line)),
            Geometry::Polygon(rings) => format!(
                "POLYGON ({})",
                rings
                    .iter()
                    .map(|r| format!("({})", coords(r)))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

/// True when a cell value looks like WKT for one of the supported shapes.
pub fn looks_like_wkt(value: &str) -> bool {
    let upper = value.trim_start().to_ascii_uppercase();
    ["POINT", "POLYGON", "LINESTRING"]
        .iter()
        .any(|prefix| upper.starts_with(prefix))
}

/// Derive a record's geometry from its attributes.
///
/// The geometry column wins when it holds parseable WKT (or a GeoJSON
/// object); otherwise the latitude/longitude pair is used.
pub fn resolve(attributes: &Map<String, Value>, mappings: &FieldMappings) -> Option<Geometry> {
    if let Some(column) = &mappings.geometry_field {
        let parsed = match attributes.get(column) {
            Some(Value::String(s)) => Geometry::from_wkt(s),
            Some(v @ Value::Object(_)) => serde_json::from_value(v.clone()).ok(),
            _ => None,
        };
        if parsed.is_some() {
            return parsed;
        }
    }

    let (lat_col, lng_col) = mappings.lat_field.as_ref().zip(mappings.lng_field.as_ref())?;
    let lat = attributes.get(lat_col).and_then(number)?;
    let lng = attributes.get(lng_col).and_then(number)?;
    Geometry::from_lat_lng(lat, lng)
}

/// Store `geometry` into the mapped column(s) of `attributes`.
pub fn write_back(
    attributes: &mut Map<String, Value>,
    geometry: &Geometry,
    mappings: &FieldMappings,
) -> Result<(), SourceError> {
    if let Some(column) = &mappings.geometry_field {
        attributes.insert(column.clone(), Value::String(geometry.to_wkt()));
        return Ok(());
    }

    match (&mappings.lat_field, &mappings.lng_field, geometry) {
        (Some(lat), Some(lng), Geometry::Point([x, y])) => {
            attributes.insert(lat.clone(), Value::from(*y));
            attributes.insert(lng.clone(), Value::from(*x));
            Ok(())
        }
        (Some(_), Some(_), _) => Err(SourceError::validation(
            "Only point geometry can be stored in latitude/longitude columns",
        )),
        _ => Err(SourceError::validation("This source has no geometry column")),
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn strip_parens(s: &str) -> Option<&str> {
    s.trim().strip_prefix('(')?.strip_suffix(')').map(str::trim)
}

fn parse_position(s: &str) -> Option<[f64; 2]> {
    let mut parts = s.split_whitespace();
    let x = parts.next()?.parse::<f64>().ok()?;
    let y = parts.next()?.parse::<f64>().ok()?;
    (x.is_finite() && y.is_finite()).then_some([x, y])
}

fn parse_positions(s: &str) -> Option<Vec<[f64; 2]>> {
    s.split(',').map(parse_position).collect()
}

/// Split `(a), (b)` into `["a", "b"]`.
fn split_groups(s: &str) -> Option<Vec<&str>> {
    let mut groups = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;

    for (i, c) in s.char_indices() {
        match c {
            '(' => {
                if depth == 0 {
                    start = i + 1;
                }
                depth += 1;
            }
            ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    groups.push(s[start..i].trim());
                }
            }
            ',' if depth == 0 => {}
            c if depth == 0 && !c.is_whitespace() => return None,
            _ => {}
        }
    }

    (depth == 0).then_some(groups)
}
