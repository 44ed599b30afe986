//! Mapping between PostgreSQL schemas and published collection prefixes.
//!
//! A collection is published as `<prefix><delimiter><table>`, where the prefix
//! is the schema's alias or the schema name itself, except for the one schema
//! that may be configured unprefixed. [`NamingScheme::extract_prefix`] and
//! [`NamingScheme::unalias`] invert the mapping.

use crate::config::schemas::ALL_SCHEMAS_WILDCARD;
use crate::config::{ConfigError, SchemaRule, SchemasConfig};
use regex::Regex;

/// Schemas that are never published, whatever the include rules say.
/// Every `pg_*` schema is reserved by PostgreSQL and excluded as well.
pub const SYSTEM_SCHEMAS: &[&str] = &["information_schema", "topology", "tiger"];

/// Validated, ready-to-query form of a [`SchemasConfig`].
#[derive(Debug, Clone)]
pub struct NamingScheme {
    delimiter: String,
    rules: Vec<CompiledRule>,
    exclude: Vec<Pattern>,
    unprefixed: Option<String>,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: SchemaRule,
    pattern: Pattern,
}

#[derive(Debug, Clone)]
enum Pattern {
    Any,
    Exact(String),
    Glob(Regex),
}

impl Pattern {
    fn compile(pattern: &str) -> Result<Self, ConfigError> {
        if pattern == ALL_SCHEMAS_WILDCARD {
            return Ok(Pattern::Any);
        }
        if !pattern.contains('*') {
            return Ok(Pattern::Exact(pattern.to_string()));
        }
        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        Regex::new(&format!("^{}$", body))
            .map(Pattern::Glob)
            .map_err(|e| ConfigError::InvalidRule {
                schema: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    fn matches(&self, schema: &str) -> bool {
        match self {
            Pattern::Any => true,
            Pattern::Exact(name) => name == schema,
            Pattern::Glob(re) => re.is_match(schema),
        }
    }
}

impl NamingScheme {
    /// Validate `config` and compile its patterns.
    pub fn new(config: &SchemasConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let rules = config
            .include
            .iter()
            .map(|rule| {
                Ok(CompiledRule {
                    rule: rule.clone(),
                    pattern: Pattern::compile(&rule.schema)?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        let exclude = config
            .exclude
            .iter()
            .map(|p| Pattern::compile(p))
            .collect::<Result<Vec<_>, _>>()?;
        let unprefixed = config
            .include
            .iter()
            .find(|rule| !rule.prefix_tables)
            .map(|rule| rule.schema.clone());

        Ok(Self {
            delimiter: config.delimiter.clone(),
            rules,
            exclude,
            unprefixed,
        })
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    /// The schema published without prefix, if any.
    pub fn unprefixed_schema(&self) -> Option<&str> {
        self.unprefixed.as_deref()
    }

    /// Configured include rules, in order.
    pub fn rules(&self) -> impl Iterator<Item = &SchemaRule> {
        self.rules.iter().map(|c| &c.rule)
    }

    /// Whether `schema` is published. Exclusions win over includes.
    pub fn include_schema(&self, schema: &str) -> bool {
        !self.exclude_schema(schema) && self.rules.iter().any(|c| c.pattern.matches(schema))
    }

    fn exclude_schema(&self, schema: &str) -> bool {
        is_system_schema(schema) || self.exclude.iter().any(|p| p.matches(schema))
    }

    /// The rule governing `schema`: exact match, then glob, then `*`.
    fn rule_for(&self, schema: &str) -> Option<&SchemaRule> {
        let exact = self
            .rules
            .iter()
            .find(|c| matches!(&c.pattern, Pattern::Exact(name) if name == schema));
        let glob = || {
            self.rules
                .iter()
                .find(|c| matches!(&c.pattern, Pattern::Glob(re) if re.is_match(schema)))
        };
        let wildcard = || self.rules.iter().find(|c| matches!(c.pattern, Pattern::Any));
        exact.or_else(glob).or_else(wildcard).map(|c| &c.rule)
    }

    /// Alias of a prefixed schema.
    pub fn alias(&self, schema: &str) -> Option<&str> {
        self.rule_for(schema)
            .filter(|rule| rule.prefix_tables)
            .and_then(|rule| rule.alias.as_deref())
    }

    fn should_prefix(&self, schema: &str) -> bool {
        self.rule_for(schema).is_none_or(|rule| rule.prefix_tables)
    }

    /// Prefix, delimiter included, prepended to the tables of `schema`.
    /// Empty for the unprefixed schema.
    pub fn prefix(&self, schema: &str) -> String {
        if let Some(alias) = self.alias(schema) {
            return format!("{}{}", alias, self.delimiter);
        }
        if self.should_prefix(schema) {
            format!("{}{}", schema, self.delimiter)
        } else {
            String::new()
        }
    }

    /// Text before the first delimiter, or empty when the name has none
    /// (or starts with it).
    pub fn extract_prefix<'a>(&self, composite_name: &'a str) -> &'a str {
        match composite_name.find(&self.delimiter) {
            Some(index) if index > 0 => &composite_name[..index],
            _ => "",
        }
    }

    /// Physical schema for a prefix that is either an alias or a schema name.
    ///
    /// An empty prefix resolves to the unprefixed schema; asking for it when
    /// none is configured is a configuration error.
    pub fn unalias(&self, prefix: &str) -> Result<String, ConfigError> {
        if prefix.is_empty() {
            return self
                .unprefixed
                .clone()
                .ok_or(ConfigError::NoUnprefixedSchema);
        }
        let aliased = self
            .rules
            .iter()
            .find(|c| c.rule.alias.as_deref() == Some(prefix))
            .map(|c| c.rule.schema.clone());
        Ok(aliased.unwrap_or_else(|| prefix.to_string()))
    }

    /// Whether names published for `schema` decode back to it. A schema whose
    /// own name contains the delimiter can't be used as a prefix.
    pub fn is_invertible(&self, schema: &str) -> bool {
        !self.should_prefix(schema)
            || self.alias(schema).is_some()
            || !schema.contains(&self.delimiter)
    }
}

/// PostgreSQL-internal schemas, plus the PostGIS topology/tiger schemas.
pub fn is_system_schema(schema: &str) -> bool {
    schema.starts_with("pg_") || SYSTEM_SCHEMAS.contains(&schema)
}
