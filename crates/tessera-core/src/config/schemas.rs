//! Schema discovery and table-name prefixing settings.
//!
//! By default every table of every non-system schema is published, prefixed
//! with its schema name and a `:` delimiter, so `locations` in `public` becomes
//! `public:locations`. Schemas are re-discovered every `refresh.interval`.
//!
//! ```yaml
//! schemas:
//!   delimiter: ":"
//!   refresh:
//!     enabled: true
//!     interval: 5s
//!   include:
//!     - schema: "*"
//!     - schema: public
//!       prefix_tables: false      # publish public's tables without a prefix
//!     - schema: "ville_Villeneuve-d'Ascq"
//!       alias: villeneuve         # villeneuve:locations
//!   exclude:
//!     - staging
//! ```
//!
//! At most one schema may be published unprefixed, and the `*` wildcard never
//! can. Both are checked by [`SchemasConfig::validate`].

use super::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Pattern matching every schema.
pub const ALL_SCHEMAS_WILDCARD: &str = "*";

/// How schemas are discovered, filtered and mapped to collection prefixes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemasConfig {
    /// Separator between the prefix and the table name. Must not be empty.
    #[serde(default = "default_delimiter")]
    pub delimiter: String,

    #[serde(default)]
    pub refresh: RefreshConfig,

    /// Ordered include rules. A schema is visible when at least one matches.
    #[serde(default = "default_include")]
    pub include: Vec<SchemaRule>,

    /// Schema patterns hidden regardless of `include`.
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Default for SchemasConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            refresh: RefreshConfig::default(),
            include: default_include(),
            exclude: Vec::new(),
        }
    }
}

/// One include rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRule {
    /// Exact schema name, `*`, or a glob such as `ville_*`.
    pub schema: String,

    /// Whether table names get the schema (or alias) prefix.
    #[serde(default = "default_true", alias = "prefix-tables")]
    pub prefix_tables: bool,

    /// Published in place of the schema name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl SchemaRule {
    /// A prefixed rule for `schema` without alias.
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            prefix_tables: true,
            alias: None,
        }
    }

    /// The default rule: every schema, prefixed by its own name.
    pub fn all() -> Self {
        Self::new(ALL_SCHEMAS_WILDCARD)
    }

    pub fn unprefixed(mut self) -> Self {
        self.prefix_tables = false;
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn is_wildcard(&self) -> bool {
        self.schema == ALL_SCHEMAS_WILDCARD
    }

    /// Patterns other than the bare wildcard that still contain `*`.
    pub fn is_glob(&self) -> bool {
        !self.is_wildcard() && self.schema.contains('*')
    }
}

/// Schema re-discovery settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// When false, schemas are listed on every request.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Time-to-live of the discovered schema list.
    #[serde(default = "default_interval", with = "humantime_duration")]
    pub interval: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_interval(),
        }
    }
}

impl RefreshConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn every(interval: Duration) -> Self {
        Self {
            enabled: true,
            interval,
        }
    }
}

impl SchemasConfig {
    /// Check the naming rules. Violations are fatal at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.delimiter.is_empty() {
            return Err(ConfigError::EmptyDelimiter);
        }

        let mut patterns = BTreeSet::new();
        let mut aliases = BTreeSet::new();
        let mut unprefixed = Vec::new();

        for rule in &self.include {
            if rule.schema.trim().is_empty() {
                return Err(ConfigError::InvalidRule {
                    schema: rule.schema.clone(),
                    reason: "schema pattern must not be empty".to_string(),
                });
            }
            if !patterns.insert(rule.schema.as_str()) {
                return Err(ConfigError::InvalidRule {
                    schema: rule.schema.clone(),
                    reason: "schema is configured more than once".to_string(),
                });
            }
            if rule.is_wildcard() && !rule.prefix_tables {
                return Err(ConfigError::WildcardUnprefixed);
            }
            if rule.is_glob() && !rule.prefix_tables {
                return Err(ConfigError::InvalidRule {
                    schema: rule.schema.clone(),
                    reason: "a schema pattern can't have prefix_tables=false".to_string(),
                });
            }
            if let Some(alias) = &rule.alias {
                if rule.is_wildcard() || rule.is_glob() {
                    return Err(ConfigError::InvalidRule {
                        schema: rule.schema.clone(),
                        reason: "a schema pattern can't have an alias".to_string(),
                    });
                }
                if alias.is_empty() || alias.contains(&self.delimiter) {
                    return Err(ConfigError::InvalidRule {
                        schema: rule.schema.clone(),
                        reason: format!(
                            "alias '{}' must be non-empty and must not contain the delimiter '{}'",
                            alias, self.delimiter
                        ),
                    });
                }
                if !aliases.insert(alias.as_str()) {
                    return Err(ConfigError::DuplicateAlias(alias.clone()));
                }
            }
            if !rule.prefix_tables {
                unprefixed.push(rule.schema.clone());
            }
        }

        if unprefixed.len() > 1 {
            unprefixed.sort();
            return Err(ConfigError::MultipleUnprefixed(unprefixed));
        }

        for pattern in &self.exclude {
            if pattern.trim().is_empty() {
                return Err(ConfigError::Config(
                    "exclude patterns must not be empty".to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn default_delimiter() -> String {
    ":".to_string()
}

fn default_include() -> Vec<SchemaRule> {
    vec![SchemaRule::all()]
}

fn default_true() -> bool {
    true
}

fn default_interval() -> Duration {
    Duration::from_secs(5)
}

/// (De)serializes a [`Duration`] as a humantime string such as `5s`.
mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim())
            .map_err(|e| D::Error::custom(format!("invalid refresh interval '{}': {}", raw, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(include: Vec<SchemaRule>) -> SchemasConfig {
        SchemasConfig {
            include,
            ..Default::default()
        }
    }

    #[test]
    fn defaults_publish_everything_prefixed() {
        let config = SchemasConfig::default();
        assert_eq!(config.delimiter, ":");
        assert!(config.refresh.enabled);
        assert_eq!(config.refresh.interval, Duration::from_secs(5));
        assert_eq!(config.include, vec![SchemaRule::all()]);
        assert!(config.exclude.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn rejects_unprefixed_wildcard() {
        let err = config(vec![SchemaRule::all().unprefixed()])
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::WildcardUnprefixed));
        assert!(err.to_string().contains("'*'"));
    }

    #[test]
    fn rejects_two_unprefixed_schemas() {
        let err = config(vec![
            SchemaRule::all(),
            SchemaRule::new("zeta").unprefixed(),
            SchemaRule::new("alpha").unprefixed(),
        ])
        .validate()
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Multiple schemas configured with prefix_tables=false: alpha,zeta"
        );
    }

    #[test]
    fn accepts_one_unprefixed_schema() {
        config(vec![SchemaRule::all(), SchemaRule::new("public").unprefixed()])
            .validate()
            .unwrap();
    }

    #[test]
    fn rejects_unprefixed_glob() {
        let err = config(vec![SchemaRule::new("ville_*").unprefixed()])
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRule { .. }));
    }

    #[test]
    fn rejects_alias_containing_delimiter() {
        let err = config(vec![SchemaRule::new("secondary").with_alias("a:b")])
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("delimiter"));
    }

    #[test]
    fn rejects_shared_alias() {
        let err = config(vec![
            SchemaRule::new("one").with_alias("same"),
            SchemaRule::new("two").with_alias("same"),
        ])
        .validate()
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateAlias(alias) if alias == "same"));
    }

    #[test]
    fn rejects_empty_delimiter() {
        let config = SchemasConfig {
            delimiter: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::EmptyDelimiter
        ));
    }

    #[test]
    fn parses_kebab_case_and_intervals() {
        let yaml = r#"
delimiter: "__"
refresh:
  enabled: false
  interval: 1m 30s
include:
  - schema: public
    prefix-tables: false
  - schema: secondary
    alias: alt
exclude: [staging]
"#;
        let config: SchemasConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.delimiter, "__");
        assert!(!config.refresh.enabled);
        assert_eq!(config.refresh.interval, Duration::from_secs(90));
        assert!(!config.include[0].prefix_tables);
        assert_eq!(config.include[1].alias.as_deref(), Some("alt"));
        assert_eq!(config.exclude, vec!["staging".to_string()]);
    }

    #[test]
    fn malformed_interval_is_a_parse_error() {
        let yaml = "refresh:\n  interval: soon\n";
        let err = serde_yaml::from_str::<SchemasConfig>(yaml).unwrap_err();
        assert!(err.to_string().contains("invalid refresh interval"));
    }
}
