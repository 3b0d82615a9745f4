use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Database, QueryBuilder};

use crate::error::{Result, StoreError};

/// Whether a match targets the JSON metadata or a base column of the stream
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Metadata,
    MessageProperty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanEquals,
    In,
    LowerThan,
    LowerThanEquals,
    NotIn,
    Regex,
}

impl Operator {
    fn sql(&self, regex_op: &'static str) -> &'static str {
        match self {
            Operator::Equals => "=",
            Operator::NotEquals => "!=",
            Operator::GreaterThan => ">",
            Operator::GreaterThanEquals => ">=",
            Operator::In => "IN",
            Operator::LowerThan => "<",
            Operator::LowerThanEquals => "<=",
            Operator::NotIn => "NOT IN",
            Operator::Regex => regex_op,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    DateTime(DateTime<Utc>),
    Many(Vec<MatchValue>),
}

impl From<&str> for MatchValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for MatchValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for MatchValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for MatchValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for MatchValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<DateTime<Utc>> for MatchValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::DateTime(value)
    }
}

impl MatchValue {
    fn is_numeric(&self) -> bool {
        matches!(self, MatchValue::Int(_) | MatchValue::Float(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataMatch {
    pub field: String,
    pub operator: Operator,
    pub value: MatchValue,
    pub field_type: FieldType,
}

/// Filter over events, translated into WHERE predicates by the engines.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataMatcher {
    matches: Vec<MetadataMatch>,
}

impl MetadataMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a match against a metadata field.
    pub fn with_metadata_match<F, V>(self, field: F, operator: Operator, value: V) -> Result<Self>
    where
        F: Into<String>,
        V: Into<MatchValue>,
    {
        self.with(field, operator, value, FieldType::Metadata)
    }

    /// Adds a match against a base column (`event_id`, `event_name`,
    /// `created_at`, `no`).
    pub fn with_message_property_match<F, V>(
        self,
        field: F,
        operator: Operator,
        value: V,
    ) -> Result<Self>
    where
        F: Into<String>,
        V: Into<MatchValue>,
    {
        self.with(field, operator, value, FieldType::MessageProperty)
    }

    pub fn with<F, V>(
        mut self,
        field: F,
        operator: Operator,
        value: V,
        field_type: FieldType,
    ) -> Result<Self>
    where
        F: Into<String>,
        V: Into<MatchValue>,
    {
        let value = value.into();

        match (operator, &value) {
            (Operator::In | Operator::NotIn, MatchValue::Many(_)) => {}
            (Operator::In | Operator::NotIn, _) => {
                return Err(StoreError::InvalidArgument(
                    "IN and NOT IN operators expect a list of values".into(),
                ));
            }
            (Operator::Regex, MatchValue::String(_)) => {}
            (Operator::Regex, _) => {
                return Err(StoreError::InvalidArgument(
                    "REGEX operator expects a string value".into(),
                ));
            }
            (_, MatchValue::Many(_)) => {
                return Err(StoreError::InvalidArgument(
                    "list of values is only valid with IN and NOT IN".into(),
                ));
            }
            _ => {}
        }

        self.matches.push(MetadataMatch {
            field: field.into(),
            operator,
            value,
            field_type,
        });

        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn matches(&self) -> &[MetadataMatch] {
        &self.matches
    }
}

/// Base columns a message-property match may target.
const MESSAGE_PROPERTIES: [&str; 4] = ["event_id", "event_name", "created_at", "no"];

/// Dialect parameters for translating a matcher into SQL.
pub(crate) struct MatcherStyle {
    /// Textual JSON extraction for a metadata field.
    pub json_field: fn(&str) -> String,
    /// Numeric JSON extraction for a metadata field.
    pub json_field_numeric: fn(&str) -> String,
    pub regex_op: &'static str,
    pub bool_true: &'static str,
    pub bool_false: &'static str,
}

pub(crate) const POSTGRES_STYLE: MatcherStyle = MatcherStyle {
    json_field: |field| format!("metadata->>'{field}'"),
    json_field_numeric: |field| format!("(metadata->>'{field}')::numeric"),
    regex_op: "~",
    bool_true: "true",
    bool_false: "false",
};

pub(crate) const MYSQL_STYLE: MatcherStyle = MatcherStyle {
    json_field: |field| format!("json_value(metadata, '$.{field}')"),
    json_field_numeric: |field| format!("json_value(metadata, '$.{field}')"),
    regex_op: "REGEXP",
    bool_true: "1",
    bool_false: "0",
};

/// Appends the matcher's predicates to `qb`, one `AND`-joined predicate per
/// match. `separated` must already hold a leading condition (`WHERE …`).
///
/// Metadata fields present in the strategy's indexed-metadata projection are
/// rewritten to target the projected column directly.
pub(crate) fn push_matcher<'args, DB>(
    qb: &mut QueryBuilder<'args, DB>,
    matcher: &MetadataMatcher,
    style: &MatcherStyle,
    indexed: Option<&'static [(&'static str, &'static str)]>,
) -> Result<()>
where
    DB: Database,
    String: sqlx::Encode<'args, DB> + sqlx::Type<DB>,
    i64: sqlx::Encode<'args, DB> + sqlx::Type<DB>,
    f64: sqlx::Encode<'args, DB> + sqlx::Type<DB>,
    DateTime<Utc>: sqlx::Encode<'args, DB> + sqlx::Type<DB>,
{
    for m in matcher.matches() {
        let field_type = match (m.field_type, indexed) {
            (FieldType::Metadata, Some(fields))
                if fields.iter().any(|(from, _)| *from == m.field) =>
            {
                FieldType::MessageProperty
            }
            (field_type, _) => field_type,
        };

        let lhs = match field_type {
            FieldType::Metadata => {
                if m.field.contains(&['\'', '"', '\\', '`'][..]) {
                    return Err(StoreError::InvalidArgument(format!(
                        "invalid metadata field name {}",
                        m.field
                    )));
                }

                if m.value.is_numeric() || leading_numeric(&m.value) {
                    (style.json_field_numeric)(&m.field)
                } else {
                    (style.json_field)(&m.field)
                }
            }
            FieldType::MessageProperty => {
                let column = indexed
                    .and_then(|fields| {
                        fields
                            .iter()
                            .find(|(from, _)| *from == m.field)
                            .map(|(_, to)| *to)
                    })
                    .unwrap_or(m.field.as_str());

                if indexed.map_or(true, |fields| {
                    fields.iter().all(|(_, to)| *to != column)
                }) && !MESSAGE_PROPERTIES.contains(&column)
                {
                    return Err(StoreError::UnexpectedValue(
                        "Unknown field given in metadata matcher".into(),
                    ));
                }

                column.to_owned()
            }
        };

        qb.push(" AND ");
        qb.push(lhs);
        qb.push(" ");
        qb.push(m.operator.sql(style.regex_op));

        match &m.value {
            MatchValue::Many(values) => {
                qb.push(" (");
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        qb.push(", ");
                    }
                    push_scalar(qb, value, style)?;
                }
                qb.push(")");
            }
            value => {
                qb.push(" ");
                push_scalar(qb, value, style)?;
            }
        }
    }

    Ok(())
}

fn leading_numeric(value: &MatchValue) -> bool {
    match value {
        MatchValue::Many(values) => values.first().is_some_and(MatchValue::is_numeric),
        _ => false,
    }
}

fn push_scalar<'args, DB>(
    qb: &mut QueryBuilder<'args, DB>,
    value: &MatchValue,
    style: &MatcherStyle,
) -> Result<()>
where
    DB: Database,
    String: sqlx::Encode<'args, DB> + sqlx::Type<DB>,
    i64: sqlx::Encode<'args, DB> + sqlx::Type<DB>,
    f64: sqlx::Encode<'args, DB> + sqlx::Type<DB>,
    DateTime<Utc>: sqlx::Encode<'args, DB> + sqlx::Type<DB>,
{
    match value {
        // booleans are inlined; the JSON functions yield numerics for them
        // on some dialects and a bound parameter would not compare
        MatchValue::Bool(true) => {
            qb.push(style.bool_true);
        }
        MatchValue::Bool(false) => {
            qb.push(style.bool_false);
        }
        MatchValue::String(s) => {
            qb.push_bind(s.clone());
        }
        MatchValue::Int(i) => {
            qb.push_bind(*i);
        }
        MatchValue::Float(f) => {
            qb.push_bind(*f);
        }
        MatchValue::DateTime(ts) => {
            qb.push_bind(*ts);
        }
        MatchValue::Many(_) => {
            return Err(StoreError::InvalidArgument(
                "nested value lists are not supported".into(),
            ));
        }
    }

    Ok(())
}

/// Converts a decoded JSON value into a match value, for callers building
/// matchers from dynamic input.
impl TryFrom<&Value> for MatchValue {
    type Error = StoreError;

    fn try_from(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(MatchValue::String(s.clone())),
            Value::Bool(b) => Ok(MatchValue::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(MatchValue::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(MatchValue::Float(f))
                } else {
                    Err(StoreError::InvalidArgument(format!(
                        "unsupported numeric match value {n}"
                    )))
                }
            }
            Value::Array(values) => Ok(MatchValue::Many(
                values
                    .iter()
                    .map(MatchValue::try_from)
                    .collect::<Result<Vec<_>>>()?,
            )),
            other => Err(StoreError::InvalidArgument(format!(
                "unsupported match value {other}"
            ))),
        }
    }
}
