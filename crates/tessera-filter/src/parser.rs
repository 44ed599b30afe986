//! Filter text parsing.

use crate::ast::{CompareOp, Filter, Literal};
use crate::error::FilterError;
use sqlparser::ast::{
    BinaryOperator, Expr, FunctionArg, FunctionArgExpr, FunctionArguments, UnaryOperator, Value,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;
use tessera_core::BoundingBox;

/// Parses filter text into a [`Filter`].
pub struct FilterParser {
    dialect: PostgreSqlDialect,
}

impl Clone for FilterParser {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl Default for FilterParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse `text` with a default [`FilterParser`].
pub fn parse(text: &str) -> Result<Filter, FilterError> {
    FilterParser::new().parse(text)
}

impl FilterParser {
    pub fn new() -> Self {
        Self {
            dialect: PostgreSqlDialect {},
        }
    }

    /// Parse filter text. Blank text matches everything.
    pub fn parse(&self, text: &str) -> Result<Filter, FilterError> {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("INCLUDE") {
            return Ok(Filter::Include);
        }
        if trimmed.eq_ignore_ascii_case("EXCLUDE") {
            return Ok(Filter::Exclude);
        }

        let syntax = |e: sqlparser::parser::ParserError| FilterError::Syntax {
            text: text.to_string(),
            message: e.to_string(),
        };
        let mut parser = Parser::new(&self.dialect)
            .try_with_sql(trimmed)
            .map_err(syntax)?;
        let expr = parser.parse_expr().map_err(syntax)?;
        let next = parser.peek_token();
        if next.token != Token::EOF {
            return Err(FilterError::Syntax {
                text: text.to_string(),
                message: format!("unexpected '{}' after expression", next.token),
            });
        }

        predicate(&expr)
    }
}

fn predicate(expr: &Expr) -> Result<Filter, FilterError> {
    match expr {
        Expr::Nested(inner) => predicate(inner),

        Expr::BinaryOp { left, op, right } => match op {
            BinaryOperator::And => Ok(predicate(left)?.and(predicate(right)?)),
            BinaryOperator::Or => Ok(predicate(left)?.or(predicate(right)?)),
            _ => comparison(left, op, right),
        },

        Expr::UnaryOp {
            op: UnaryOperator::Not,
            expr,
        } => Ok(predicate(expr)?.not()),

        Expr::IsNull(inner) => Ok(Filter::IsNull {
            property: property(inner)?,
            negated: false,
        }),
        Expr::IsNotNull(inner) => Ok(Filter::IsNull {
            property: property(inner)?,
            negated: true,
        }),

        Expr::Like {
            negated,
            expr,
            pattern,
            ..
        } => like(expr, pattern, false, *negated),
        Expr::ILike {
            negated,
            expr,
            pattern,
            ..
        } => like(expr, pattern, true, *negated),

        Expr::InList {
            expr,
            list,
            negated,
        } => Ok(Filter::In {
            property: property(expr)?,
            values: list.iter().map(literal).collect::<Result<_, _>>()?,
            negated: *negated,
        }),

        Expr::Between {
            expr,
            negated,
            low,
            high,
        } => Ok(Filter::Between {
            property: property(expr)?,
            low: literal(low)?,
            high: literal(high)?,
            negated: *negated,
        }),

        Expr::Function(function) if function.name.to_string().eq_ignore_ascii_case("BBOX") => {
            bbox(&function.args)
        }

        Expr::Value(value) => match &value.value {
            Value::Boolean(true) => Ok(Filter::Include),
            Value::Boolean(false) => Ok(Filter::Exclude),
            other => Err(FilterError::Unsupported(format!(
                "'{}' is not a boolean expression",
                other
            ))),
        },

        Expr::Identifier(ident) if ident.quote_style.is_none() => {
            match ident.value.to_ascii_uppercase().as_str() {
                "INCLUDE" => Ok(Filter::Include),
                "EXCLUDE" => Ok(Filter::Exclude),
                _ => Ok(boolean_property(ident.value.clone())),
            }
        }
        Expr::Identifier(ident) => Ok(boolean_property(ident.value.clone())),

        other => Err(FilterError::Unsupported(other.to_string())),
    }
}

/// A bare property in boolean position tests for `TRUE`.
fn boolean_property(property: String) -> Filter {
    Filter::Compare {
        property,
        op: CompareOp::Eq,
        value: Literal::Bool(true),
    }
}

fn comparison(left: &Expr, op: &BinaryOperator, right: &Expr) -> Result<Filter, FilterError> {
    let op = match op {
        BinaryOperator::Eq => CompareOp::Eq,
        BinaryOperator::NotEq => CompareOp::NotEq,
        BinaryOperator::Lt => CompareOp::Lt,
        BinaryOperator::LtEq => CompareOp::LtEq,
        BinaryOperator::Gt => CompareOp::Gt,
        BinaryOperator::GtEq => CompareOp::GtEq,
        other => return Err(FilterError::Unsupported(format!("operator {}", other))),
    };

    if is_property(left) && is_property(right) {
        Err(FilterError::Unsupported(format!(
            "comparison between properties {} and {}",
            left, right
        )))
    } else if is_property(left) {
        Ok(Filter::Compare {
            property: property(left)?,
            op,
            value: literal(right)?,
        })
    } else if is_property(right) {
        Ok(Filter::Compare {
            property: property(right)?,
            op: op.flip(),
            value: literal(left)?,
        })
    } else {
        Err(FilterError::Unsupported(format!(
            "comparison between {} and {} needs exactly one property",
            left, right
        )))
    }
}

fn like(expr: &Expr, pattern: &Expr, case_insensitive: bool, negated: bool) -> Result<Filter, FilterError> {
    let pattern = match literal(pattern)? {
        Literal::Text(text) => text,
        other => {
            return Err(FilterError::InvalidLiteral(format!(
                "LIKE pattern must be a string, got {}",
                other
            )));
        }
    };
    Ok(Filter::Like {
        property: property(expr)?,
        pattern,
        case_insensitive,
        negated,
    })
}

/// `BBOX(property, minx, miny, maxx, maxy [, 'crs'])`
fn bbox(args: &FunctionArguments) -> Result<Filter, FilterError> {
    let FunctionArguments::List(list) = args else {
        return Err(FilterError::InvalidBbox("missing arguments".to_string()));
    };
    let args = list
        .args
        .iter()
        .map(|arg| match arg {
            FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) => Ok(expr),
            other => Err(FilterError::InvalidBbox(format!("unexpected argument {}", other))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    if args.len() != 5 && args.len() != 6 {
        return Err(FilterError::InvalidBbox(format!(
            "expected 5 or 6 arguments, got {}",
            args.len()
        )));
    }

    let property = property(args[0])?;
    let mut coordinates = [0.0; 4];
    for (slot, arg) in coordinates.iter_mut().zip(&args[1..5]) {
        *slot = match literal(arg)? {
            Literal::Integer(i) => i as f64,
            Literal::Float(x) => x,
            other => {
                return Err(FilterError::InvalidBbox(format!("{} is not a coordinate", other)));
            }
        };
    }
    let [min_x, min_y, max_x, max_y] = coordinates;
    if min_x > max_x || min_y > max_y {
        return Err(FilterError::InvalidBbox(
            "min must not exceed max".to_string(),
        ));
    }

    let mut bbox = BoundingBox::new(min_x, min_y, max_x, max_y);
    if let Some(crs) = args.get(5) {
        match literal(crs)? {
            Literal::Text(crs) => bbox = bbox.with_crs(crs),
            other => {
                return Err(FilterError::InvalidBbox(format!("{} is not a CRS", other)));
            }
        }
    }

    Ok(Filter::Bbox { property, bbox })
}

fn is_property(expr: &Expr) -> bool {
    matches!(expr, Expr::Identifier(_) | Expr::Nested(_)) && property(expr).is_ok()
}

fn property(expr: &Expr) -> Result<String, FilterError> {
    match expr {
        Expr::Identifier(ident) => Ok(ident.value.clone()),
        Expr::Nested(inner) => property(inner),
        Expr::CompoundIdentifier(_) => Err(FilterError::Unsupported(format!(
            "qualified property name {}",
            expr
        ))),
        other => Err(FilterError::Unsupported(format!(
            "expected a property name, got {}",
            other
        ))),
    }
}

fn literal(expr: &Expr) -> Result<Literal, FilterError> {
    match expr {
        Expr::Nested(inner) => literal(inner),
        Expr::Value(value) => value_literal(&value.value),
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match literal(expr)? {
            Literal::Integer(i) => Ok(Literal::Integer(-i)),
            Literal::Float(x) => Ok(Literal::Float(-x)),
            other => Err(FilterError::InvalidLiteral(format!("-{}", other))),
        },
        Expr::UnaryOp {
            op: UnaryOperator::Plus,
            expr,
        } => literal(expr),
        other => Err(FilterError::InvalidLiteral(other.to_string())),
    }
}

fn value_literal(value: &Value) -> Result<Literal, FilterError> {
    match value {
        Value::Null => Ok(Literal::Null),
        Value::Boolean(b) => Ok(Literal::Bool(*b)),
        Value::SingleQuotedString(s) => Ok(Literal::Text(s.clone())),
        Value::Number(n, _) => {
            if let Ok(i) = n.parse::<i64>() {
                Ok(Literal::Integer(i))
            } else {
                n.parse::<f64>()
                    .map(Literal::Float)
                    .map_err(|_| FilterError::InvalidLiteral(n.to_string()))
            }
        }
        other => Err(FilterError::InvalidLiteral(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn compare(property: &str, op: CompareOp, value: Literal) -> Filter {
        Filter::Compare {
            property: property.to_string(),
            op,
            value,
        }
    }

    #[test]
    fn blank_and_include_match_everything() {
        assert_eq!(parse("").unwrap(), Filter::Include);
        assert_eq!(parse("  include ").unwrap(), Filter::Include);
        assert_eq!(parse("EXCLUDE").unwrap(), Filter::Exclude);
    }

    #[test]
    fn parses_comparisons() {
        assert_eq!(
            parse("population >= 10000").unwrap(),
            compare("population", CompareOp::GtEq, Literal::Integer(10000))
        );
        assert_eq!(
            parse("name <> 'Lille'").unwrap(),
            compare("name", CompareOp::NotEq, Literal::Text("Lille".to_string()))
        );
        assert_eq!(
            parse("score != -1.5").unwrap(),
            compare("score", CompareOp::NotEq, Literal::Float(-1.5))
        );
    }

    #[test]
    fn flips_literal_on_the_left() {
        assert_eq!(
            parse("10 < population").unwrap(),
            compare("population", CompareOp::Gt, Literal::Integer(10))
        );
    }

    #[test]
    fn parses_boolean_structure() {
        let filter = parse("(a = 1 OR b = 2) AND NOT c IS NULL").unwrap();
        assert_eq!(
            filter,
            Filter::And(vec![
                Filter::Or(vec![
                    compare("a", CompareOp::Eq, Literal::Integer(1)),
                    compare("b", CompareOp::Eq, Literal::Integer(2)),
                ]),
                Filter::Not(Box::new(Filter::IsNull {
                    property: "c".to_string(),
                    negated: false,
                })),
            ])
        );
    }

    #[test]
    fn parses_like_in_and_between() {
        assert_eq!(
            parse("name NOT ILIKE 'ville%'").unwrap(),
            Filter::Like {
                property: "name".to_string(),
                pattern: "ville%".to_string(),
                case_insensitive: true,
                negated: true,
            }
        );
        assert_eq!(
            parse("kind IN ('school', 'library')").unwrap(),
            Filter::In {
                property: "kind".to_string(),
                values: vec![
                    Literal::Text("school".to_string()),
                    Literal::Text("library".to_string())
                ],
                negated: false,
            }
        );
        assert_eq!(
            parse("year NOT BETWEEN 1990 AND 2000").unwrap(),
            Filter::Between {
                property: "year".to_string(),
                low: Literal::Integer(1990),
                high: Literal::Integer(2000),
                negated: true,
            }
        );
    }

    #[test]
    fn parses_bbox_with_and_without_crs() {
        assert_eq!(
            parse("BBOX(geom, 2.9, 50.5, 3.2, 50.7)").unwrap(),
            Filter::Bbox {
                property: "geom".to_string(),
                bbox: BoundingBox::new(2.9, 50.5, 3.2, 50.7),
            }
        );
        assert_eq!(
            parse("bbox(geom, 700000, 7000000, 710000, 7100000, 'EPSG:2154')").unwrap(),
            Filter::Bbox {
                property: "geom".to_string(),
                bbox: BoundingBox::new(700000.0, 7000000.0, 710000.0, 7100000.0)
                    .with_crs("EPSG:2154"),
            }
        );
        assert!(matches!(
            parse("BBOX(geom, 1, 2, 3)"),
            Err(FilterError::InvalidBbox(_))
        ));
    }

    #[test]
    fn quoted_identifiers_keep_their_case() {
        assert_eq!(
            parse("\"Name\" = 'x'").unwrap(),
            compare("Name", CompareOp::Eq, Literal::Text("x".to_string()))
        );
    }

    #[test]
    fn bare_property_tests_for_true() {
        assert_eq!(
            parse("active AND NOT archived").unwrap(),
            Filter::And(vec![
                compare("active", CompareOp::Eq, Literal::Bool(true)),
                Filter::Not(Box::new(compare("archived", CompareOp::Eq, Literal::Bool(true)))),
            ])
        );
    }

    #[test]
    fn rejects_malformed_text() {
        assert!(matches!(parse("name = "), Err(FilterError::Syntax { .. })));
        assert!(matches!(parse("a = 1 b"), Err(FilterError::Syntax { .. })));
        assert!(matches!(parse("a = b"), Err(FilterError::Unsupported(_))));
        assert!(matches!(parse("t.a = 1"), Err(FilterError::Unsupported(_))));
        assert!(matches!(parse("a + 1"), Err(FilterError::Unsupported(_))));
    }
}
