//! Caller-facing conditions and their operator vocabulary.
//!
//! A [`Condition`] is the unresolved form a builder call produces: a logical
//! field name, an operator, and operand values. Resolution to wire attribute
//! names and compilation into expression text happen in the engine.

use std::fmt;
use std::str::FromStr;

use crate::attribute_value::AttributeValue;

/// Comparison and function operators accepted by builder calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionOperator {
    /// `=`
    Eq,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// Range test over two operands, inclusive.
    Between,
    /// String prefix test.
    BeginsWith,
    /// Substring or set membership test.
    Contains,
    /// Membership in an explicit operand list.
    In,
    /// Attribute presence test.
    Exists,
    /// Attribute absence test.
    NotExists,
}

impl ConditionOperator {
    /// Returns the canonical operator spelling.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Between => "BETWEEN",
            Self::BeginsWith => "BEGINS_WITH",
            Self::Contains => "CONTAINS",
            Self::In => "IN",
            Self::Exists => "EXISTS",
            Self::NotExists => "NOT_EXISTS",
        }
    }

    /// Returns `true` for operators the store accepts in key conditions.
    ///
    /// Partition keys only ever take `=`; sort keys additionally take the
    /// comparisons, `BETWEEN`, and `BEGINS_WITH`.
    #[must_use]
    pub fn key_eligible(&self) -> bool {
        !matches!(self, Self::Contains | Self::In | Self::Exists | Self::NotExists)
    }

    /// Returns the accepted operand count as `(min, max)`; `None` max means
    /// unbounded.
    #[must_use]
    pub fn arity(&self) -> (usize, Option<usize>) {
        match self {
            Self::Exists | Self::NotExists => (0, Some(0)),
            Self::Between => (2, Some(2)),
            Self::In => (1, None),
            _ => (1, Some(1)),
        }
    }
}

impl fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConditionOperator {
    type Err = OperatorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Symbols match exactly; word operators are case-insensitive and
        // accept the store's function spellings.
        let op = match s {
            "=" | "==" => Self::Eq,
            "<" => Self::Lt,
            "<=" => Self::Le,
            ">" => Self::Gt,
            ">=" => Self::Ge,
            _ => match s.to_ascii_uppercase().as_str() {
                "BETWEEN" => Self::Between,
                "BEGINS_WITH" => Self::BeginsWith,
                "CONTAINS" => Self::Contains,
                "IN" => Self::In,
                "EXISTS" | "ATTRIBUTE_EXISTS" => Self::Exists,
                "NOT_EXISTS" | "ATTRIBUTE_NOT_EXISTS" => Self::NotExists,
                _ => {
                    return Err(OperatorParseError {
                        input: s.to_owned(),
                    });
                }
            },
        };
        Ok(op)
    }
}

/// Error returned when an operator string is not recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorParseError {
    /// The rejected operator spelling.
    pub input: String,
}

impl fmt::Display for OperatorParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown condition operator: {:?}", self.input)
    }
}

impl std::error::Error for OperatorParseError {}

/// One builder-supplied condition before field resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Logical field name as the caller wrote it.
    pub field: String,
    /// Parsed operator.
    pub operator: ConditionOperator,
    /// Operand values; arity is validated at compile time.
    pub values: Vec<AttributeValue>,
}

impl Condition {
    /// Creates a condition from an already-parsed operator.
    #[must_use]
    pub fn new(
        field: impl Into<String>,
        operator: ConditionOperator,
        values: Vec<AttributeValue>,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            values,
        }
    }

    /// Returns `true` when the operand count satisfies the operator's arity.
    #[must_use]
    pub fn arity_ok(&self) -> bool {
        let (min, max) = self.operator.arity();
        self.values.len() >= min && max.is_none_or(|m| self.values.len() <= m)
    }

    /// Returns `true` for an equality condition, the only form that can
    /// cover a partition key.
    #[must_use]
    pub fn is_equality(&self) -> bool {
        self.operator == ConditionOperator::Eq
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({} values)", self.field, self.operator, self.values.len())
    }
}
