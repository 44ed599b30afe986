//! Catalog queries: schemas, tables and table structure.

use crate::sql::{Relation, RelationKind};
use sqlx::{PgPool, Row};
use tessera_core::{CollectionSchema, PropertyDef};

/// Every schema of the database, system schemas included.
pub async fn list_schemas(pool: &PgPool) -> anyhow::Result<Vec<String>> {
    let rows = sqlx::query("select nspname::text as nspname from pg_catalog.pg_namespace order by nspname")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(|r| r.get::<String, _>("nspname"))
        .collect())
}

pub async fn schema_exists(pool: &PgPool, schema: &str) -> anyhow::Result<bool> {
    let (exists,): (bool,) = sqlx::query_as(
        "select exists(select 1 from pg_catalog.pg_namespace where nspname = $1)",
    )
    .bind(schema)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

/// Tables and views of `schema`, sorted by name.
pub async fn list_tables(pool: &PgPool, schema: &str) -> anyhow::Result<Vec<String>> {
    let rows = sqlx::query(
        r#"
        select table_name::text as table_name
        from information_schema.tables
        where table_schema = $1
          and table_type in ('BASE TABLE', 'VIEW')
        order by table_name
        "#,
    )
    .bind(schema)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|r| r.get::<String, _>("table_name"))
        .collect())
}

/// Structure and kind of `schema.table`, `None` when neither a table nor a
/// view of that name exists.
///
/// information_schema columns are domain types; they are cast to `text`
/// before decoding.
///
/// The first `geometry` column becomes the geometry property; its SRID comes
/// from PostGIS's `geometry_columns`.
pub async fn describe_table(
    pool: &PgPool,
    schema: &str,
    table: &str,
) -> anyhow::Result<Option<Relation>> {
    let table_type: Option<String> = sqlx::query_scalar(
        r#"
        select table_type::text
        from information_schema.tables
        where table_schema = $1 and table_name = $2
          and table_type in ('BASE TABLE', 'VIEW')
        "#,
    )
    .bind(schema)
    .bind(table)
    .fetch_optional(pool)
    .await?;
    let kind = match table_type.as_deref() {
        Some("VIEW") => RelationKind::View,
        Some(_) => RelationKind::Table,
        None => return Ok(None),
    };

    let col_rows = sqlx::query(
        r#"
        select column_name::text as column_name, udt_name::text as udt_name, is_nullable::text as is_nullable
        from information_schema.columns
        where table_schema = $1 and table_name = $2
        order by ordinal_position
        "#,
    )
    .bind(schema)
    .bind(table)
    .fetch_all(pool)
    .await?;

    if col_rows.is_empty() {
        return Ok(None);
    }

    let mut collection = CollectionSchema::new(table);
    let mut geometry_column = None;
    for c in col_rows {
        let column_name: String = c.get("column_name");
        let udt_name: String = c.get("udt_name");
        let is_nullable: String = c.get("is_nullable");

        if udt_name == "geometry" {
            if geometry_column.is_none() {
                geometry_column = Some(column_name);
            }
            continue;
        }
        collection.properties.push(PropertyDef {
            name: column_name,
            data_type: udt_name,
            nullable: is_nullable == "YES",
        });
    }

    // Primary key columns
    let pk_rows = sqlx::query(
        r#"
        select kcu.column_name::text as column_name
        from information_schema.table_constraints tc
        join information_schema.key_column_usage kcu
          on tc.constraint_name = kcu.constraint_name
         and tc.table_schema = kcu.table_schema
        where tc.constraint_type = 'PRIMARY KEY'
          and tc.table_schema = $1
          and tc.table_name = $2
        order by kcu.ordinal_position
        "#,
    )
    .bind(schema)
    .bind(table)
    .fetch_all(pool)
    .await?;
    collection.primary_key = pk_rows
        .into_iter()
        .map(|r| r.get::<String, _>("column_name"))
        .collect();

    if let Some(column) = geometry_column {
        let srid: Option<i32> = sqlx::query_scalar(
            r#"
            select srid
            from geometry_columns
            where f_table_schema = $1 and f_table_name = $2 and f_geometry_column = $3
            "#,
        )
        .bind(schema)
        .bind(table)
        .bind(&column)
        .fetch_optional(pool)
        .await?
        .filter(|srid: &i32| *srid > 0);
        collection = collection.with_geometry(column, srid);
    }

    Ok(Some(Relation {
        schema: collection,
        kind,
    }))
}
