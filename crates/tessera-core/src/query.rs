//! The read request passed to a collection repository.

use crate::geometry::BoundingBox;
use serde::{Deserialize, Serialize};

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortBy {
    pub property: String,
    pub ascending: bool,
}

impl SortBy {
    pub fn asc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            ascending: true,
        }
    }

    pub fn desc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            ascending: false,
        }
    }

    /// Parse a `sortby` list such as `name,-population,+id`.
    /// A leading `-` sorts descending; blank entries are ignored.
    pub fn parse_list(spec: &str) -> Vec<SortBy> {
        spec.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| match item.strip_prefix('-') {
                Some(name) => SortBy::desc(name.trim()),
                None => SortBy::asc(item.trim_start_matches('+').trim()),
            })
            .collect()
    }
}

/// Immutable description of a read against one collection.
///
/// Variants are derived with the `with_*` methods, which leave the original
/// untouched:
///
/// ```
/// use tessera_core::CollectionQuery;
///
/// let page = CollectionQuery::new("locations").with_limit(Some(10));
/// let all = page.with_limit(None);
/// assert_eq!(page.limit, Some(10));
/// assert_eq!(all.limit, None);
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CollectionQuery {
    /// Published (composite) collection name.
    pub collection_id: String,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    /// Filter text in the filter grammar.
    pub filter: Option<String>,
    pub sort_by: Vec<SortBy>,
    pub bbox: Option<BoundingBox>,
    /// CRS identifier the geometries are returned in.
    pub target_crs: Option<String>,
}

impl CollectionQuery {
    pub fn new(collection_id: impl Into<String>) -> Self {
        Self {
            collection_id: collection_id.into(),
            ..Default::default()
        }
    }

    pub fn with_collection(&self, collection_id: impl Into<String>) -> Self {
        Self {
            collection_id: collection_id.into(),
            ..self.clone()
        }
    }

    pub fn with_offset(&self, offset: Option<u64>) -> Self {
        Self {
            offset,
            ..self.clone()
        }
    }

    pub fn with_limit(&self, limit: Option<u64>) -> Self {
        Self {
            limit,
            ..self.clone()
        }
    }

    pub fn with_filter(&self, filter: Option<String>) -> Self {
        Self {
            filter,
            ..self.clone()
        }
    }

    pub fn with_sort_by(&self, sort_by: Vec<SortBy>) -> Self {
        Self {
            sort_by,
            ..self.clone()
        }
    }

    pub fn with_bbox(&self, bbox: Option<BoundingBox>) -> Self {
        Self {
            bbox,
            ..self.clone()
        }
    }

    pub fn with_target_crs(&self, target_crs: Option<String>) -> Self {
        Self {
            target_crs,
            ..self.clone()
        }
    }

    /// Whether a page window is requested.
    pub fn is_paged(&self) -> bool {
        self.limit.is_some() || self.offset.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sort_list() {
        assert_eq!(
            SortBy::parse_list("name, -population,+id,,"),
            vec![
                SortBy::asc("name"),
                SortBy::desc("population"),
                SortBy::asc("id")
            ]
        );
        assert!(SortBy::parse_list("").is_empty());
    }

    #[test]
    fn derivations_leave_original_untouched() {
        let base = CollectionQuery::new("locations")
            .with_limit(Some(2))
            .with_offset(Some(4))
            .with_filter(Some("name = 'Lille'".to_string()));
        let total = base.with_limit(None).with_offset(None);

        assert_eq!(base.limit, Some(2));
        assert_eq!(base.offset, Some(4));
        assert!(base.is_paged());
        assert!(!total.is_paged());
        assert_eq!(total.filter, base.filter);
        assert_eq!(total.collection_id, "locations");
    }
}
