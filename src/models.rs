//! Core data models used throughout the sync pipeline.
//!
//! A catalog line becomes a [`CatalogRecord`]; sinks that persist the
//! normalized form build a [`SceneDocument`] from it.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Mission name stamped on every scene document.
pub const SATELLITE_NAME: &str = "landsat-8";

/// CRS identifier carried on every footprint polygon.
pub const FOOTPRINT_CRS: &str = "urn:ogc:def:crs:EPSG:8.9:4326";

/// Cloud coverage assumed when the catalog does not report one.
pub const DEFAULT_CLOUD_COVERAGE: f64 = 100.0;

/// Document keys owned by [`SceneDocument`]; catalog fields never override them.
pub const RESERVED_FIELDS: [&str; 6] = [
    "scene_id",
    "satellite_name",
    "cloud_coverage",
    "date",
    "thumbnail",
    "data_geometry",
];

/// A single catalog cell after numeric coercion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    /// Header column with no value on this row.
    Null,
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Null => Ok(()),
        }
    }
}

/// One catalog row: field names in header order mapped to coerced values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogRecord {
    fields: Vec<(String, FieldValue)>,
}

impl CatalogRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, replacing an existing value in place or appending.
    pub fn set(&mut self, name: impl Into<String>, value: FieldValue) {
        let name = name.into();
        match self.fields.iter_mut().find(|(k, _)| *k == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_str)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(FieldValue::as_f64)
    }

    /// The catalog identifier, used as the persistence key by every sink.
    ///
    /// Purely numeric ids were coerced to numbers by the parser; they are
    /// rendered back to text here.
    pub fn scene_id(&self) -> Option<String> {
        match self.get("sceneID")? {
            FieldValue::Text(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            FieldValue::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for CatalogRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for CatalogRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RecordVisitor;

        impl<'de> Visitor<'de> for RecordVisitor {
            type Value = CatalogRecord;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object of catalog fields")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut record = CatalogRecord::new();
                while let Some((k, v)) = access.next_entry::<String, FieldValue>()? {
                    record.set(k, v);
                }
                Ok(record)
            }
        }

        deserializer.deserialize_map(RecordVisitor)
    }
}

impl FromIterator<(String, FieldValue)> for CatalogRecord {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        let mut record = CatalogRecord::new();
        for (k, v) in iter {
            record.set(k, v);
        }
        record
    }
}

/// The `crs` member of a GeoJSON-style geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crs {
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: CrsProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrsProperties {
    pub name: String,
}

/// Scene footprint: one closed five-point ring of `[lon, lat]` pairs.
///
/// A corner missing from the catalog row serializes as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(rename = "type")]
    pub kind: String,
    pub crs: Crs,
    pub coordinates: Vec<Vec<[Option<f64>; 2]>>,
}

impl Geometry {
    /// Build the footprint from the four corner columns, in the order
    /// upper-right, upper-left, lower-left, lower-right, upper-right.
    pub fn from_corners(record: &CatalogRecord) -> Self {
        let corner = |lon: &str, lat: &str| [record.get_f64(lon), record.get_f64(lat)];
        let upper_right = corner("upperRightCornerLongitude", "upperRightCornerLatitude");
        let ring = vec![
            upper_right,
            corner("upperLeftCornerLongitude", "upperLeftCornerLatitude"),
            corner("lowerLeftCornerLongitude", "lowerLeftCornerLatitude"),
            corner("lowerRightCornerLongitude", "lowerRightCornerLatitude"),
            upper_right,
        ];

        Self {
            kind: "Polygon".to_string(),
            crs: Crs {
                kind: "name".to_string(),
                properties: CrsProperties {
                    name: FOOTPRINT_CRS.to_string(),
                },
            },
            coordinates: vec![ring],
        }
    }

    pub fn ring(&self) -> &[[Option<f64>; 2]] {
        self.coordinates.first().map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Normalized scene persisted by the object-storage, search-index and
/// filesystem sinks.
///
/// Serializes fixed fields first, then every catalog field whose name is not
/// reserved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneDocument {
    pub scene_id: String,
    pub satellite_name: String,
    pub cloud_coverage: f64,
    pub date: Option<String>,
    pub thumbnail: Option<String>,
    pub data_geometry: Option<Geometry>,
    #[serde(flatten)]
    pub fields: CatalogRecord,
}

impl SceneDocument {
    /// Normalize a catalog record. Returns `None` when it has no `sceneID`.
    pub fn from_record(record: &CatalogRecord) -> Option<Self> {
        let scene_id = record.scene_id()?;

        // A sink-local enrichment wins over the catalog's browse URL.
        let thumbnail = record
            .get_str("thumbnail")
            .or_else(|| record.get_str("browseURL"))
            .map(str::to_string);

        let fields = record
            .iter()
            .filter(|(k, _)| !RESERVED_FIELDS.contains(k))
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();

        Some(Self {
            scene_id,
            satellite_name: SATELLITE_NAME.to_string(),
            cloud_coverage: record
                .get_f64("cloudCoverFull")
                .unwrap_or(DEFAULT_CLOUD_COVERAGE),
            date: record.get("acquisitionDate").map(|v| v.to_string()),
            thumbnail,
            data_geometry: Some(Geometry::from_corners(record)),
            fields,
        })
    }

    /// The degraded form used when the index rejects the footprint.
    pub fn without_geometry(mut self) -> Self {
        self.data_geometry = None;
        self
    }
}

/// One unit of work for the dispatch pool: a filtered-in record and the
/// destination hint every sink receives alongside it.
#[derive(Debug, Clone)]
pub struct DispatchTask {
    pub scene_id: String,
    pub acquisition_date: NaiveDate,
    pub destination: String,
    pub record: Arc<CatalogRecord>,
}
