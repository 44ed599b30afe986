//! Collection metadata and records.

use crate::geometry::{self, CRS84};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A non-geometry column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    /// Backend type name, e.g. `int4` or `text`.
    pub data_type: String,
    pub nullable: bool,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// The geometry column of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeometryProperty {
    pub name: String,
    /// SRID declared for the column, if the backend knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub srid: Option<i32>,
}

impl GeometryProperty {
    pub fn new(name: impl Into<String>, srid: Option<i32>) -> Self {
        Self {
            name: name.into(),
            srid,
        }
    }

    /// `EPSG:n` identifier of the column's CRS.
    pub fn crs(&self) -> Option<String> {
        self.srid.map(geometry::srs_name)
    }
}

/// Structure of one collection as reported by a backend session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    /// Name under which the collection is reported. Physical table name at
    /// the backend, composite name once passed through a renaming view.
    pub name: String,
    pub properties: Vec<PropertyDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<GeometryProperty>,
    /// Columns of the primary key, in key order. Empty when there is none.
    #[serde(default)]
    pub primary_key: Vec<String>,
}

impl CollectionSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
            geometry: None,
            primary_key: Vec::new(),
        }
    }

    pub fn with_property(mut self, property: PropertyDef) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_geometry(mut self, name: impl Into<String>, srid: Option<i32>) -> Self {
        self.geometry = Some(GeometryProperty::new(name, srid));
        self
    }

    pub fn with_primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Same structure under another name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Whether `name` can be used in a filter or sort: any property, or the
    /// geometry column.
    pub fn has_property(&self, name: &str) -> bool {
        self.property(name).is_some() || self.geometry.as_ref().is_some_and(|g| g.name == name)
    }

    pub fn info(&self) -> CollectionInfo {
        let (item_type, crs) = match &self.geometry {
            Some(geometry) => {
                let mut crs = vec![CRS84.to_string()];
                if let Some(srid) = geometry.srid.filter(|srid| *srid != geometry::WGS84_SRID) {
                    crs.push(geometry::crs_uri(srid));
                }
                (ItemType::Feature, crs)
            }
            None => (ItemType::Record, Vec::new()),
        };
        CollectionInfo {
            id: self.name.clone(),
            title: self.name.clone(),
            item_type,
            crs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Feature,
    Record,
}

/// Listing entry for a published collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub id: String,
    pub title: String,
    pub item_type: ItemType,
    pub crs: Vec<String>,
}

/// One row of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    /// Published name of the collection the record was read from.
    pub collection: String,
    pub properties: Map<String, Value>,
    /// GeoJSON geometry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Value>,
}

impl Record {
    pub fn new(id: impl Into<String>, collection: impl Into<String>, properties: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            collection: collection.into(),
            properties,
            geometry: None,
        }
    }

    pub fn with_geometry(mut self, geometry: Value) -> Self {
        self.geometry = Some(geometry);
        self
    }
}
