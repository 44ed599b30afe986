//! Built-in sample dataset, served from memory without a database.
//!
//! Two schemas each hold a `locations` table of points: `public` with 16
//! records and `secondary` with 3. [`schemas_config`] publishes `public`
//! unprefixed and `secondary` under the `alt` alias.

use crate::memory::MemoryBackend;
use serde_json::{Map, json};
use tessera_core::{CollectionSchema, PropertyDef, Record, SchemaRule, SchemasConfig};

pub const PUBLIC_LOCATIONS: i64 = 16;
pub const SECONDARY_LOCATIONS: i64 = 3;

fn locations_schema() -> CollectionSchema {
    CollectionSchema::new("locations")
        .with_property(PropertyDef::new("id", "int4").not_null())
        .with_property(PropertyDef::new("name", "text"))
        .with_property(PropertyDef::new("population", "int4"))
        .with_geometry("geom", Some(4326))
        .with_primary_key(["id"])
}

fn locations(count: i64) -> Vec<Record> {
    (1..=count)
        .map(|id| {
            let mut properties = Map::new();
            properties.insert("id".to_string(), json!(id));
            properties.insert("name".to_string(), json!(format!("location {}", id)));
            properties.insert("population".to_string(), json!(id * 1000));
            Record::new(id.to_string(), "locations", properties)
                .with_geometry(json!({"type": "Point", "coordinates": [id as f64, id as f64]}))
        })
        .collect()
}

impl MemoryBackend {
    /// A backend preloaded with the sample dataset.
    pub fn sample() -> Self {
        let backend = Self::new();
        backend.create_collection("public", locations_schema(), locations(PUBLIC_LOCATIONS));
        backend.create_collection("secondary", locations_schema(), locations(SECONDARY_LOCATIONS));
        backend
    }
}

/// Naming rules for the sample dataset.
pub fn schemas_config() -> SchemasConfig {
    SchemasConfig {
        include: vec![
            SchemaRule::all(),
            SchemaRule::new("public").unprefixed(),
            SchemaRule::new("secondary").with_alias("alt"),
        ],
        ..Default::default()
    }
}
