//! `tessera check` command implementation.
//!
//! Loads and validates the configuration without touching the database, then
//! prints how schemas will be named.

use anyhow::Result;
use std::path::Path;
use tessera_core::{ConfigError, NamingScheme, TesseraConfig};

/// One line per naming rule, in configuration order.
pub fn describe_rules(naming: &NamingScheme) -> Vec<String> {
    naming
        .rules()
        .map(|rule| {
            let published = if !rule.prefix_tables {
                "<table>".to_string()
            } else if let Some(alias) = &rule.alias {
                format!("{}{}<table>", alias, naming.delimiter())
            } else if rule.is_wildcard() || rule.is_glob() {
                format!("<schema>{}<table>", naming.delimiter())
            } else {
                format!("{}{}<table>", rule.schema, naming.delimiter())
            };
            format!("{:<24} -> {}", rule.schema, published)
        })
        .collect()
}

pub fn run(config_path: &Path, loaded: Result<TesseraConfig, ConfigError>) -> Result<()> {
    println!("Checking {}...", config_path.display());

    let config = super::load(config_path, loaded)?;
    let naming = NamingScheme::new(&config.schemas).inspect_err(|e| {
        tracing::error!(path = %config_path.display(), error = %e, "Invalid naming rules");
    })?;
    tracing::debug!(
        path = %config_path.display(),
        rules = naming.rules().count(),
        refresh = config.schemas.refresh.enabled,
        "Configuration loaded"
    );

    println!();
    println!("  delimiter: {:?}", naming.delimiter());
    if config.schemas.refresh.enabled {
        println!(
            "  refresh:   every {}",
            humantime::format_duration(config.schemas.refresh.interval)
        );
    } else {
        println!("  refresh:   disabled (schemas listed on every request)");
    }
    if !config.schemas.exclude.is_empty() {
        println!("  exclude:   {}", config.schemas.exclude.join(", "));
    }
    println!();
    println!("  Naming rules:");
    for line in describe_rules(&naming) {
        println!("    {}", line);
    }
    println!();
    println!("Configuration OK");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn describes_each_rule() {
        let file = write_config(
            r#"
schemas:
  include:
    - schema: "*"
    - schema: public
      prefix_tables: false
    - schema: secondary
      alias: alt
"#,
        );
        let config = TesseraConfig::from_file(file.path()).unwrap();
        let naming = NamingScheme::new(&config.schemas).unwrap();
        let lines = describe_rules(&naming);

        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("-> <schema>:<table>"));
        assert!(lines[1].starts_with("public") && lines[1].ends_with("-> <table>"));
        assert!(lines[2].ends_with("-> alt:<table>"));
    }

    #[test]
    fn invalid_configuration_fails() {
        let file = write_config(
            r#"
schemas:
  include:
    - schema: a
      prefix_tables: false
    - schema: b
      prefix_tables: false
"#,
        );
        let loaded = TesseraConfig::from_file(file.path());
        assert!(run(file.path(), loaded).is_err());
    }
}
