//! Translation of backend queries to parameterized PostgreSQL statements.

use sqlx::Arguments;
use sqlx::postgres::PgArguments;
use tessera_core::CollectionSchema;
use tessera_core::geometry::epsg_code;
use tessera_filter::{Filter, Literal};
use tessera_runtime::{BackendQuery, FederationError, SortKey};

/// Alias of the queried table in every statement.
const TABLE_ALIAS: &str = "t";

fn args_add<T>(args: &mut PgArguments, v: T) -> anyhow::Result<()>
where
    T: Send + Sync + 'static,
    for<'q> T: sqlx::Encode<'q, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    args.add(v).map_err(|e| anyhow::anyhow!(e))
}

/// A statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Bool(bool),
    Int(i64),
    Srid(i32),
    Float(f64),
    Text(String),
    TextArray(Vec<String>),
}

/// SQL text plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub binds: Vec<BindValue>,
}

impl Statement {
    pub fn arguments(&self) -> anyhow::Result<PgArguments> {
        let mut args = PgArguments::default();
        for bind in &self.binds {
            match bind {
                BindValue::Bool(v) => args_add(&mut args, *v)?,
                BindValue::Int(v) => args_add(&mut args, *v)?,
                BindValue::Srid(v) => args_add(&mut args, *v)?,
                BindValue::Float(v) => args_add(&mut args, *v)?,
                BindValue::Text(v) => args_add(&mut args, v.clone())?,
                BindValue::TextArray(v) => args_add(&mut args, v.clone())?,
            }
        }
        Ok(args)
    }
}

/// What a collection is in the catalog. Views have no physical row id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelationKind {
    #[default]
    Table,
    View,
}

/// A table or view with its structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub schema: CollectionSchema,
    pub kind: RelationKind,
}

impl Relation {
    pub fn table(schema: CollectionSchema) -> Self {
        Self {
            schema,
            kind: RelationKind::Table,
        }
    }

    pub fn view(schema: CollectionSchema) -> Self {
        Self {
            schema,
            kind: RelationKind::View,
        }
    }
}

/// Double-quote an identifier. Any name PostgreSQL accepts is allowed.
pub fn quote_ident(ident: &str) -> anyhow::Result<String> {
    if ident.is_empty() {
        return Err(anyhow::anyhow!("empty identifier"));
    }
    if ident.contains('\0') {
        return Err(anyhow::anyhow!("identifier contains a NUL character"));
    }
    Ok(format!("\"{}\"", ident.replace('"', "\"\"")))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Caller mistakes are raised as `InvalidInput` so they are not retried.
fn invalid(message: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(FederationError::InvalidInput(message.into()))
}

/// SQLSTATEs raised when a literal of the caller's filter doesn't fit the
/// column: the whole data exception class (bad number or date text, out of
/// range values) plus type mismatches found while planning.
pub fn is_caller_error(sqlstate: &str) -> bool {
    sqlstate.starts_with("22") || matches!(sqlstate, "42804" | "42846" | "42883" | "42P18")
}

/// Text cast applied to bound strings compared against these column types.
fn cast_for_pg_type(data_type: &str) -> Option<&'static str> {
    match data_type {
        "numeric" | "float4" | "float8" | "int2" | "int4" | "int8" => Some("numeric"),
        "date" => Some("date"),
        "timestamptz" => Some("timestamptz"),
        "timestamp" => Some("timestamp"),
        "time" => Some("time"),
        "bool" => Some("boolean"),
        _ => None,
    }
}

fn is_numeric(data_type: &str) -> bool {
    matches!(
        data_type,
        "int2" | "int4" | "int8" | "float4" | "float8" | "numeric"
    )
}

fn is_textual(data_type: &str) -> bool {
    matches!(data_type, "text" | "varchar" | "bpchar" | "name" | "citext")
}

struct Builder<'a> {
    relation: &'a Relation,
    schema: &'a CollectionSchema,
    binds: Vec<BindValue>,
}

impl<'a> Builder<'a> {
    fn new(relation: &'a Relation) -> Self {
        Self {
            relation,
            schema: &relation.schema,
            binds: Vec::new(),
        }
    }

    fn bind(&mut self, value: BindValue) -> String {
        self.binds.push(value);
        format!("${}", self.binds.len())
    }

    fn column(&self, name: &str) -> anyhow::Result<String> {
        Ok(format!("{}.{}", TABLE_ALIAS, quote_ident(name)?))
    }

    fn data_type(&self, property: &str) -> anyhow::Result<&'a str> {
        if let Some(def) = self.schema.property(property) {
            return Ok(def.data_type.as_str());
        }
        match &self.schema.geometry {
            Some(g) if g.name == property => Ok("geometry"),
            _ => Err(invalid(format!(
                "Unknown property '{}' in collection '{}'",
                property, self.schema.name
            ))),
        }
    }

    /// `<column> <op> <operand>` with the column and literal brought to a
    /// comparable type.
    fn operands(&mut self, property: &str, value: &Literal) -> anyhow::Result<(String, String)> {
        let data_type = self.data_type(property)?;
        let column = self.column(property)?;
        let pair = match value {
            Literal::Null => (column, "NULL".to_string()),
            Literal::Integer(n) if is_numeric(data_type) => (column, self.bind(BindValue::Int(*n))),
            Literal::Float(f) if is_numeric(data_type) => (column, self.bind(BindValue::Float(*f))),
            Literal::Bool(b) if data_type == "bool" => (column, self.bind(BindValue::Bool(*b))),
            Literal::Text(s) if is_textual(data_type) => (column, self.bind(BindValue::Text(s.clone()))),
            Literal::Text(s) => match cast_for_pg_type(data_type) {
                Some(cast) => {
                    let placeholder = self.bind(BindValue::Text(s.clone()));
                    (column, format!("{}::{}", placeholder, cast))
                }
                None => (
                    format!("{}::text", column),
                    self.bind(BindValue::Text(s.clone())),
                ),
            },
            other => (
                format!("{}::text", column),
                self.bind(BindValue::Text(literal_text(other))),
            ),
        };
        Ok(pair)
    }

    fn id_expr(&self) -> anyhow::Result<String> {
        id_expr(self.relation)
    }

    fn predicate(&mut self, filter: &Filter) -> anyhow::Result<String> {
        let sql = match filter {
            Filter::Include => "TRUE".to_string(),
            Filter::Exclude => "FALSE".to_string(),
            Filter::And(parts) => self.join(parts, " AND ", "TRUE")?,
            Filter::Or(parts) => self.join(parts, " OR ", "FALSE")?,
            Filter::Not(inner) => format!("NOT ({})", self.predicate(inner)?),
            Filter::Compare {
                property,
                op,
                value,
            } => {
                let (lhs, rhs) = self.operands(property, value)?;
                format!("{} {} {}", lhs, op.as_sql(), rhs)
            }
            Filter::Like {
                property,
                pattern,
                case_insensitive,
                negated,
            } => {
                self.data_type(property)?;
                let column = self.column(property)?;
                let placeholder = self.bind(BindValue::Text(pattern.clone()));
                format!(
                    "{}::text {}{} {}",
                    column,
                    if *negated { "NOT " } else { "" },
                    if *case_insensitive { "ILIKE" } else { "LIKE" },
                    placeholder
                )
            }
            Filter::In {
                property,
                values,
                negated,
            } => {
                if values.is_empty() {
                    self.data_type(property)?;
                    return Ok(if *negated { "TRUE" } else { "FALSE" }.to_string());
                }
                let mut pairs = Vec::with_capacity(values.len());
                for value in values {
                    pairs.push(self.operands(property, value)?);
                }
                let not = if *negated { "NOT " } else { "" };
                if pairs.iter().all(|(column, _)| *column == pairs[0].0) {
                    let items: Vec<&str> = pairs.iter().map(|(_, operand)| operand.as_str()).collect();
                    format!("{} {}IN ({})", pairs[0].0, not, items.join(", "))
                } else {
                    // Mixed literal types cast the column differently per value.
                    let terms: Vec<String> = pairs
                        .iter()
                        .map(|(column, operand)| format!("{} = {}", column, operand))
                        .collect();
                    format!("{}({})", not, terms.join(" OR "))
                }
            }
            Filter::Between {
                property,
                low,
                high,
                negated,
            } => {
                let (low_column, low) = self.operands(property, low)?;
                let (high_column, high) = self.operands(property, high)?;
                let not = if *negated { "NOT " } else { "" };
                if low_column == high_column {
                    format!("{} {}BETWEEN {} AND {}", low_column, not, low, high)
                } else {
                    format!(
                        "{}({} >= {} AND {} <= {})",
                        not, low_column, low, high_column, high
                    )
                }
            }
            Filter::IsNull { property, negated } => {
                self.data_type(property)?;
                format!(
                    "{} IS {}NULL",
                    self.column(property)?,
                    if *negated { "NOT " } else { "" }
                )
            }
            Filter::Ids(ids) => {
                let id = self.id_expr()?;
                let placeholder = self.bind(BindValue::TextArray(ids.clone()));
                format!("{} = ANY({})", id, placeholder)
            }
            Filter::Bbox { property, bbox } => {
                let geometry = match &self.schema.geometry {
                    Some(g) if g.name == *property => g.clone(),
                    _ => {
                        return Err(invalid(format!(
                            "'{}' is not the geometry property of collection '{}'",
                            property, self.schema.name
                        )));
                    }
                };
                let bbox_srid = bbox.srid().map_err(|e| invalid(e.to_string()))?;
                let column = self.column(&geometry.name)?;
                let corners = [bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y]
                    .into_iter()
                    .map(|v| self.bind(BindValue::Float(v)))
                    .collect::<Vec<_>>()
                    .join(", ");
                let envelope = format!(
                    "ST_MakeEnvelope({}, {})",
                    corners,
                    self.bind(BindValue::Srid(bbox_srid))
                );
                let envelope = match geometry.srid {
                    Some(srid) if srid == bbox_srid => envelope,
                    Some(srid) => format!(
                        "ST_Transform({}, {})",
                        envelope,
                        self.bind(BindValue::Srid(srid))
                    ),
                    None => format!("ST_SetSRID({}, ST_SRID({}))", envelope, column),
                };
                format!("{} && {}", column, envelope)
            }
        };
        Ok(sql)
    }

    fn join(&mut self, parts: &[Filter], separator: &str, empty: &str) -> anyhow::Result<String> {
        if parts.is_empty() {
            return Ok(empty.to_string());
        }
        let mut sql = Vec::with_capacity(parts.len());
        for part in parts {
            sql.push(format!("({})", self.predicate(part)?));
        }
        Ok(sql.join(separator))
    }

    fn order_by(&self, sort: &[SortKey]) -> anyhow::Result<String> {
        let mut keys = Vec::new();
        for key in sort {
            match key {
                SortKey::Property { name, ascending } => {
                    self.data_type(name)?;
                    keys.push(format!(
                        "{} {}",
                        self.column(name)?,
                        if *ascending { "ASC" } else { "DESC" }
                    ));
                }
                SortKey::Natural if self.schema.primary_key.is_empty() => {
                    keys.push(match self.relation.kind {
                        RelationKind::Table => format!("{}.ctid", TABLE_ALIAS),
                        RelationKind::View => self.id_expr()?,
                    });
                }
                SortKey::Natural => {
                    for column in &self.schema.primary_key {
                        keys.push(self.column(column)?);
                    }
                }
            }
        }
        Ok(keys.join(", "))
    }

    fn page(&mut self, query: &BackendQuery) -> String {
        let mut sql = String::new();
        if let Some(limit) = query.limit {
            let placeholder = self.bind(BindValue::Int(to_i64(limit)));
            sql.push_str(&format!(" LIMIT {}", placeholder));
        }
        if let Some(offset) = query.offset {
            let placeholder = self.bind(BindValue::Int(to_i64(offset)));
            sql.push_str(&format!(" OFFSET {}", placeholder));
        }
        sql
    }

    fn from(&self, namespace: &str) -> anyhow::Result<String> {
        Ok(format!(
            "{}.{} AS {}",
            quote_ident(namespace)?,
            quote_ident(&self.schema.name)?,
            TABLE_ALIAS
        ))
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn literal_text(value: &Literal) -> String {
    match value {
        Literal::Null => String::new(),
        Literal::Bool(b) => b.to_string(),
        Literal::Integer(n) => n.to_string(),
        Literal::Float(f) => f.to_string(),
        Literal::Text(s) => s.clone(),
    }
}

/// Text form of a record's id: the primary key, its columns joined with `.`,
/// or the physical row id when the table has no key.
///
/// Views have neither a key nor a `ctid`; their rows are identified by a hash
/// of their content, so identical rows share an id.
pub fn id_expr(relation: &Relation) -> anyhow::Result<String> {
    match relation.schema.primary_key.as_slice() {
        [] if relation.kind == RelationKind::View => {
            Ok(format!("md5(to_jsonb({})::text)", TABLE_ALIAS))
        }
        [] => Ok(format!("{}.ctid::text", TABLE_ALIAS)),
        [column] => Ok(format!("{}.{}::text", TABLE_ALIAS, quote_ident(column)?)),
        columns => {
            let parts = columns
                .iter()
                .map(|c| Ok(format!("{}.{}", TABLE_ALIAS, quote_ident(c)?)))
                .collect::<anyhow::Result<Vec<_>>>()?;
            Ok(format!("concat_ws('.', {})", parts.join(", ")))
        }
    }
}

/// `SELECT` producing one `(row, geometry, id)` tuple per record.
///
/// `row` holds every non-geometry column as a JSON object; `geometry` is
/// GeoJSON, reprojected to the query's target CRS when it differs from the
/// column's.
pub fn select(namespace: &str, relation: &Relation, query: &BackendQuery) -> anyhow::Result<Statement> {
    let schema = &relation.schema;
    let mut builder = Builder::new(relation);

    let projection = match &schema.geometry {
        Some(geometry) => {
            let column = builder.column(&geometry.name)?;
            let target = match &query.target_crs {
                Some(crs) => Some(epsg_code(crs).map_err(|e| invalid(e.to_string()))?),
                None => None,
            };
            let shape = match target {
                Some(srid) if Some(srid) != geometry.srid => format!(
                    "ST_Transform({}, {})",
                    column,
                    builder.bind(BindValue::Srid(srid))
                ),
                _ => column,
            };
            format!(
                "(to_jsonb({alias}) - {name}::text) AS row, ST_AsGeoJSON({shape})::jsonb AS geometry",
                alias = TABLE_ALIAS,
                name = quote_literal(&geometry.name),
                shape = shape
            )
        }
        None => format!("to_jsonb({}) AS row, NULL::jsonb AS geometry", TABLE_ALIAS),
    };

    let mut sql = format!(
        "SELECT {}, {} AS id FROM {}",
        projection,
        builder.id_expr()?,
        builder.from(namespace)?
    );
    if query.filter != Filter::Include {
        let predicate = builder.predicate(&query.filter)?;
        sql.push_str(&format!(" WHERE {}", predicate));
    }
    let order = builder.order_by(&query.sort)?;
    if !order.is_empty() {
        sql.push_str(&format!(" ORDER BY {}", order));
    }
    let page = builder.page(query);
    sql.push_str(&page);

    Ok(Statement {
        sql,
        binds: builder.binds,
    })
}

/// `SELECT count(*)` of the records `select` would return.
pub fn count(namespace: &str, relation: &Relation, query: &BackendQuery) -> anyhow::Result<Statement> {
    let mut builder = Builder::new(relation);

    let mut relation = builder.from(namespace)?;
    if query.filter != Filter::Include {
        let predicate = builder.predicate(&query.filter)?;
        relation.push_str(&format!(" WHERE {}", predicate));
    }

    let sql = if query.is_paged() {
        let order = builder.order_by(&query.sort)?;
        if !order.is_empty() {
            relation.push_str(&format!(" ORDER BY {}", order));
        }
        let page = builder.page(query);
        relation.push_str(&page);
        format!("SELECT count(*) AS count FROM (SELECT 1 FROM {}) AS page", relation)
    } else {
        format!("SELECT count(*) AS count FROM {}", relation)
    };

    Ok(Statement {
        sql,
        binds: builder.binds,
    })
}
