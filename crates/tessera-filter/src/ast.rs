//! The filter tree.

use std::collections::BTreeSet;
use std::fmt;
use tessera_core::BoundingBox;

/// A boolean predicate over the records of one collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches everything.
    Include,
    /// Matches nothing.
    Exclude,
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Compare {
        property: String,
        op: CompareOp,
        value: Literal,
    },
    Like {
        property: String,
        pattern: String,
        case_insensitive: bool,
        negated: bool,
    },
    In {
        property: String,
        values: Vec<Literal>,
        negated: bool,
    },
    Between {
        property: String,
        low: Literal,
        high: Literal,
        negated: bool,
    },
    IsNull {
        property: String,
        negated: bool,
    },
    /// Records whose id is one of the given values.
    Ids(Vec<String>),
    /// Records whose geometry envelope intersects `bbox`.
    Bbox {
        property: String,
        bbox: BoundingBox,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    /// The operator giving the same result with operands swapped.
    pub fn flip(self) -> Self {
        match self {
            CompareOp::Eq => CompareOp::Eq,
            CompareOp::NotEq => CompareOp::NotEq,
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::LtEq => CompareOp::GtEq,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::GtEq => CompareOp::LtEq,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "<>",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
        }
    }
}

/// A constant operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Filter {
    /// Conjunction of two filters, flattening nested `And`s.
    pub fn and(self, other: Filter) -> Filter {
        match (self, other) {
            (Filter::Include, f) | (f, Filter::Include) => f,
            (Filter::Exclude, _) | (_, Filter::Exclude) => Filter::Exclude,
            (Filter::And(mut left), Filter::And(right)) => {
                left.extend(right);
                Filter::And(left)
            }
            (Filter::And(mut left), f) => {
                left.push(f);
                Filter::And(left)
            }
            (f, Filter::And(mut right)) => {
                right.insert(0, f);
                Filter::And(right)
            }
            (left, right) => Filter::And(vec![left, right]),
        }
    }

    /// Disjunction of two filters, flattening nested `Or`s.
    pub fn or(self, other: Filter) -> Filter {
        match (self, other) {
            (Filter::Exclude, f) | (f, Filter::Exclude) => f,
            (Filter::Include, _) | (_, Filter::Include) => Filter::Include,
            (Filter::Or(mut left), Filter::Or(right)) => {
                left.extend(right);
                Filter::Or(left)
            }
            (Filter::Or(mut left), f) => {
                left.push(f);
                Filter::Or(left)
            }
            (f, Filter::Or(mut right)) => {
                right.insert(0, f);
                Filter::Or(right)
            }
            (left, right) => Filter::Or(vec![left, right]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Filter {
        match self {
            Filter::Include => Filter::Exclude,
            Filter::Exclude => Filter::Include,
            Filter::Not(inner) => *inner,
            f => Filter::Not(Box::new(f)),
        }
    }

    /// Property names referenced anywhere in the tree.
    pub fn properties(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        self.collect_properties(&mut names);
        names
    }

    fn collect_properties<'a>(&'a self, names: &mut BTreeSet<&'a str>) {
        match self {
            Filter::Include | Filter::Exclude | Filter::Ids(_) => {}
            Filter::And(items) | Filter::Or(items) => {
                items.iter().for_each(|f| f.collect_properties(names));
            }
            Filter::Not(inner) => inner.collect_properties(names),
            Filter::Compare { property, .. }
            | Filter::Like { property, .. }
            | Filter::In { property, .. }
            | Filter::Between { property, .. }
            | Filter::IsNull { property, .. }
            | Filter::Bbox { property, .. } => {
                names.insert(property.as_str());
            }
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "NULL"),
            Literal::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Literal::Integer(i) => write!(f, "{}", i),
            Literal::Float(x) => write!(f, "{}", x),
            Literal::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

fn join<T: fmt::Display>(items: &[T], separator: &str) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(separator)
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let not = |negated: &bool| if *negated { "NOT " } else { "" };
        match self {
            Filter::Include => write!(f, "INCLUDE"),
            Filter::Exclude => write!(f, "EXCLUDE"),
            Filter::And(items) => write!(f, "({})", join(items, " AND ")),
            Filter::Or(items) => write!(f, "({})", join(items, " OR ")),
            Filter::Not(inner) => write!(f, "NOT {}", inner),
            Filter::Compare { property, op, value } => {
                write!(f, "{} {} {}", property, op.as_sql(), value)
            }
            Filter::Like {
                property,
                pattern,
                case_insensitive,
                negated,
            } => {
                let keyword = if *case_insensitive { "ILIKE" } else { "LIKE" };
                write!(f, "{} {}{} {}", property, not(negated), keyword, Literal::Text(pattern.clone()))
            }
            Filter::In {
                property,
                values,
                negated,
            } => write!(f, "{} {}IN ({})", property, not(negated), join(values, ", ")),
            Filter::Between {
                property,
                low,
                high,
                negated,
            } => write!(f, "{} {}BETWEEN {} AND {}", property, not(negated), low, high),
            Filter::IsNull { property, negated } => {
                write!(f, "{} IS {}NULL", property, not(negated))
            }
            Filter::Ids(ids) => {
                let ids: Vec<Literal> = ids.iter().cloned().map(Literal::Text).collect();
                write!(f, "IDS({})", join(&ids, ", "))
            }
            Filter::Bbox { property, bbox } => {
                write!(
                    f,
                    "BBOX({}, {}, {}, {}, {})",
                    property, bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y
                )
            }
        }
    }
}
