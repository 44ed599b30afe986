//! Integration tests against a live PostgreSQL/PostGIS database.
//!
//! These tests require a running Postgres instance with the PostGIS extension.
//! Set TESSERA_TEST_DATABASE_URL to connect.
//!
//! Run with: cargo test --package tessera-adapter-pg --test postgres -- --ignored --test-threads=1

use futures::TryStreamExt;
use sqlx::PgPool;
use std::sync::Arc;
use tessera_adapter_pg::PgConnectionSource;
use tessera_core::{CollectionQuery, RefreshConfig, SchemaRule, SchemasConfig, SortBy};
use tessera_runtime::{CollectionRepository, FederatedStore, FederationError};

const SCHEMA: &str = "tessera_it";

async fn pool() -> PgPool {
    let url = std::env::var("TESSERA_TEST_DATABASE_URL")
        .expect("TESSERA_TEST_DATABASE_URL must be set");
    PgPool::connect(&url).await.expect("connect")
}

async fn seed(pool: &PgPool) {
    for statement in [
        "CREATE EXTENSION IF NOT EXISTS postgis",
        "DROP SCHEMA IF EXISTS tessera_it CASCADE",
        "CREATE SCHEMA tessera_it",
        "CREATE TABLE tessera_it.places (
            id integer PRIMARY KEY,
            name text NOT NULL,
            population integer,
            geom geometry(Point, 4326)
        )",
        "INSERT INTO tessera_it.places
         SELECT i, 'place ' || i, i * 1000, ST_SetSRID(ST_MakePoint(i, i), 4326)
         FROM generate_series(1, 12) AS i",
        "CREATE VIEW tessera_it.busy_places AS
         SELECT name, population, geom FROM tessera_it.places WHERE population > 6000",
    ] {
        sqlx::query(statement).execute(pool).await.expect(statement);
    }
}

fn repository(pool: PgPool) -> CollectionRepository {
    let schemas = SchemasConfig {
        refresh: RefreshConfig::disabled(),
        include: vec![SchemaRule::new(SCHEMA).with_alias("it")],
        ..Default::default()
    };
    let source = Arc::new(PgConnectionSource::from_pool(pool));
    let store = FederatedStore::new(source, &schemas).unwrap();
    CollectionRepository::new(Arc::new(store))
}

#[tokio::test]
#[ignore]
async fn test_reads_a_schema_table() {
    let pool = pool().await;
    seed(&pool).await;
    let repository = repository(pool);

    let ids: Vec<String> = repository
        .list_collections()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(ids, vec!["it:busy_places", "it:places"]);

    let schema = repository.describe_collection("it:places").await.unwrap().unwrap();
    assert_eq!(schema.primary_key, vec!["id"]);
    assert_eq!(schema.geometry.as_ref().and_then(|g| g.srid), Some(4326));

    let query = CollectionQuery::new("it:places")
        .with_filter(Some("population > 5000".to_string()))
        .with_sort_by(SortBy::parse_list("-population"))
        .with_limit(Some(3));
    let result = repository.query(&query).await.unwrap().unwrap();
    assert_eq!(result.number_matched, 7);
    assert_eq!(result.number_returned, 3);
    let records: Vec<_> = result.features.try_collect().await.unwrap();
    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["12", "11", "10"]);
    assert_eq!(records[0].collection, "it:places");
    assert!(records[0].properties.get("geom").is_none());
    assert_eq!(records[0].geometry.as_ref().unwrap()["type"], "Point");
}

#[tokio::test]
#[ignore]
async fn test_picks_up_altered_tables() {
    let pool = pool().await;
    seed(&pool).await;
    let repository = repository(pool.clone());
    repository.describe_collection("it:places").await.unwrap();

    sqlx::query("ALTER TABLE tessera_it.places ADD COLUMN area double precision")
        .execute(&pool)
        .await
        .unwrap();

    let query = CollectionQuery::new("it:places").with_filter(Some("area IS NULL".to_string()));
    let result = repository.query(&query).await.unwrap().unwrap();
    assert_eq!(result.number_matched, 12);

    sqlx::query("DROP TABLE tessera_it.places CASCADE")
        .execute(&pool)
        .await
        .unwrap();
    assert!(repository.query(&query).await.unwrap().is_none());
}

#[tokio::test]
#[ignore]
async fn test_missing_schema_is_not_found() {
    let source = PgConnectionSource::from_pool(pool().await);
    let err = tessera_runtime::ConnectionSource::connect(&source, "tessera_absent")
        .await
        .err()
        .unwrap();
    assert!(matches!(err, FederationError::NamespaceNotFound(_)));
}

#[tokio::test]
#[ignore]
async fn test_reads_views_without_a_key() {
    let pool = pool().await;
    seed(&pool).await;
    let repository = repository(pool);

    let query = CollectionQuery::new("it:busy_places").with_sort_by(SortBy::parse_list("population"));
    let result = repository.query(&query).await.unwrap().unwrap();
    assert_eq!(result.number_matched, 6);
    let records: Vec<_> = result.features.try_collect().await.unwrap();
    assert_eq!(records.len(), 6);
    assert_eq!(records[0].properties["name"], "place 7");
    assert_eq!(records[0].id.len(), 32);

    let natural = repository
        .query(&CollectionQuery::new("it:busy_places").with_limit(Some(2)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(natural.number_returned, 2);

    let record = repository
        .get_record("it:busy_places", &records[0].id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.properties["name"], "place 7");
}

#[tokio::test]
#[ignore]
async fn test_unconvertible_literals_are_invalid_input() {
    let pool = pool().await;
    seed(&pool).await;
    let repository = repository(pool);

    let query = CollectionQuery::new("it:places").with_filter(Some("population = 'abc'".to_string()));
    let err = repository.query(&query).await.err().unwrap();
    assert!(matches!(err, FederationError::InvalidInput(_)), "{err:?}");

    // the session survives the mistake
    let ok = CollectionQuery::new("it:places").with_filter(Some("population = 1000".to_string()));
    assert_eq!(repository.query(&ok).await.unwrap().unwrap().number_matched, 1);
}
