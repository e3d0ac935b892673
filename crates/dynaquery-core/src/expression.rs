//! Expression compilation with generated placeholders.
//!
//! One [`ExpressionCompiler`] instance builds up to four trees: key
//! conditions (AND-only, at most partition plus sort), filter (full AND/OR
//! with parenthesized groups), condition (write guards), and update clause
//! lists. Name placeholders `#n0, #n1, ...` and value placeholders
//! `:v0, :v1, ...` are numbered monotonically per instance, so the same
//! push sequence always renders byte-identical output.
//!
//! Groups compile through an isolated sub-compiler seeded with the parent's
//! counters; the parenthesized result is spliced back and the placeholder
//! maps merge, failing on collision rather than overwriting.

use std::collections::HashMap;

use dynaquery_model::{
    AttributeValue, ConditionOperator, ExpressionComponents,
};

/// Errors raised while compiling expression trees.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// An operator received the wrong number of operands.
    #[error("operator {operator} on {field} takes {expected} operands, got {found}")]
    BadArity {
        /// Wire name of the conditioned attribute.
        field: String,
        /// Offending operator spelling.
        operator: String,
        /// Accepted operand count description.
        expected: String,
        /// Actual operand count.
        found: usize,
    },
    /// A key condition used an operator the store rejects on keys.
    #[error("operator {operator} cannot appear in a key condition")]
    UnsupportedKeyOperator {
        /// Offending operator spelling.
        operator: String,
    },
    /// More key conditions than the partition/sort pair were pushed.
    #[error("key condition tree holds at most two leaves, got {count}")]
    TooManyKeyConditions {
        /// Number of key conditions pushed.
        count: usize,
    },
    /// Two update targets where one is a path-prefix of the other.
    #[error("overlapping update paths: {first} and {second}")]
    OverlappingPaths {
        /// Earlier declared path.
        first: String,
        /// Later declared path.
        second: String,
    },
    /// Merging trees found the same placeholder on both sides.
    #[error("placeholder {placeholder} already bound")]
    PlaceholderCollision {
        /// The colliding placeholder.
        placeholder: String,
    },
    /// An update compiled to zero clauses.
    #[error("update expression has no clauses")]
    EmptyUpdateExpression,
}

/// Logical connective joining filter or condition terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connective {
    /// Both sides must hold.
    And,
    /// Either side may hold.
    Or,
}

impl Connective {
    /// Returns the wire keyword.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

/// A condition whose field already resolved to its wire attribute name.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCondition {
    /// Wire attribute name or document path.
    pub wire_name: String,
    /// Parsed operator.
    pub operator: ConditionOperator,
    /// Operand values.
    pub values: Vec<AttributeValue>,
}

impl ResolvedCondition {
    /// Creates a resolved condition.
    #[must_use]
    pub fn new(
        wire_name: impl Into<String>,
        operator: ConditionOperator,
        values: Vec<AttributeValue>,
    ) -> Self {
        Self {
            wire_name: wire_name.into(),
            operator,
            values,
        }
    }
}

/// Caller-written condition text with its placeholder bindings.
#[derive(Debug, Clone)]
pub(crate) struct RawCondition {
    pub expression: String,
    pub names: HashMap<String, String>,
    pub values: HashMap<String, AttributeValue>,
}

/// Right-hand side of a SET clause.
#[derive(Debug, Clone, PartialEq)]
pub enum SetOperand {
    /// Plain assignment.
    Value(AttributeValue),
    /// Assignment only when the attribute is absent.
    IfNotExists(AttributeValue),
    /// Numeric increment of the current value.
    Increment(AttributeValue),
    /// Numeric decrement of the current value.
    Decrement(AttributeValue),
    /// Append elements to the end of a list.
    ListAppend(AttributeValue),
    /// Prepend elements to the front of a list.
    ListPrepend(AttributeValue),
}

/// Builds expression text and placeholder maps for one compilation.
#[derive(Debug, Default)]
pub struct ExpressionCompiler {
    name_seq: usize,
    value_seq: usize,
    names: HashMap<String, String>,
    values: HashMap<String, AttributeValue>,
    key_terms: Vec<String>,
    filter_terms: Vec<(Connective, String)>,
    condition_terms: Vec<(Connective, String)>,
    set_clauses: Vec<String>,
    add_clauses: Vec<String>,
    remove_clauses: Vec<String>,
    delete_clauses: Vec<String>,
    update_paths: Vec<String>,
    projection: Option<String>,
}

impl ExpressionCompiler {
    /// Creates a fresh compiler with counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an isolated sub-compiler continuing this one's numbering.
    #[must_use]
    pub fn subcompiler(&self) -> Self {
        Self {
            name_seq: self.name_seq,
            value_seq: self.value_seq,
            ..Self::default()
        }
    }

    /// Allocates the next `#nK` placeholder for a wire attribute name.
    pub fn name_placeholder(&mut self, wire_name: &str) -> String {
        let placeholder = format!("#n{}", self.name_seq);
        self.name_seq += 1;
        self.names.insert(placeholder.clone(), wire_name.to_owned());
        placeholder
    }

    /// Allocates the next `:vK` placeholder for an operand value.
    pub fn value_placeholder(&mut self, value: AttributeValue) -> String {
        let placeholder = format!(":v{}", self.value_seq);
        self.value_seq += 1;
        self.values.insert(placeholder.clone(), value);
        placeholder
    }

    /// Adds a leaf to the key condition tree.
    pub fn push_key_condition(&mut self, cond: &ResolvedCondition) -> Result<(), CompileError> {
        if !cond.operator.key_eligible() {
            return Err(CompileError::UnsupportedKeyOperator {
                operator: cond.operator.as_str().to_owned(),
            });
        }
        if self.key_terms.len() >= 2 {
            return Err(CompileError::TooManyKeyConditions {
                count: self.key_terms.len() + 1,
            });
        }
        let term = self.render_term(cond)?;
        self.key_terms.push(term);
        Ok(())
    }

    /// Adds a leaf to the filter tree.
    pub fn push_filter(
        &mut self,
        connective: Connective,
        cond: &ResolvedCondition,
    ) -> Result<(), CompileError> {
        let term = self.render_term(cond)?;
        self.filter_terms.push((connective, term));
        Ok(())
    }

    /// Splices a finished sub-compiler's filter tree as a parenthesized
    /// group. An empty group contributes nothing.
    pub fn splice_filter_group(
        &mut self,
        connective: Connective,
        sub: ExpressionCompiler,
    ) -> Result<(), CompileError> {
        let Some(text) = sub.render_terms(&sub.filter_terms) else {
            return Ok(());
        };
        self.merge(sub)?;
        self.filter_terms.push((connective, format!("({text})")));
        Ok(())
    }

    /// Adds a leaf to the condition (write guard) tree.
    pub fn push_condition(
        &mut self,
        connective: Connective,
        cond: &ResolvedCondition,
    ) -> Result<(), CompileError> {
        let term = self.render_term(cond)?;
        self.condition_terms.push((connective, term));
        Ok(())
    }

    /// Splices caller-written condition text with its own placeholder maps.
    ///
    /// The merge fails on placeholder collision rather than overwriting.
    pub fn push_raw_condition(
        &mut self,
        connective: Connective,
        expression: &str,
        names: HashMap<String, String>,
        values: HashMap<String, AttributeValue>,
    ) -> Result<(), CompileError> {
        for (placeholder, wire_name) in names {
            if self.names.contains_key(&placeholder) {
                return Err(CompileError::PlaceholderCollision { placeholder });
            }
            self.names.insert(placeholder, wire_name);
        }
        for (placeholder, value) in values {
            if self.values.contains_key(&placeholder) {
                return Err(CompileError::PlaceholderCollision { placeholder });
            }
            self.values.insert(placeholder, value);
        }
        self.condition_terms
            .push((connective, format!("({expression})")));
        Ok(())
    }

    /// Adds a SET clause.
    pub fn push_set(&mut self, path: &str, operand: SetOperand) -> Result<(), CompileError> {
        self.claim_path(path)?;
        let target = self.render_path(path);
        let clause = match operand {
            SetOperand::Value(v) => {
                let v = self.value_placeholder(v);
                format!("{target} = {v}")
            }
            SetOperand::IfNotExists(v) => {
                let v = self.value_placeholder(v);
                format!("{target} = if_not_exists({target}, {v})")
            }
            SetOperand::Increment(v) => {
                let v = self.value_placeholder(v);
                format!("{target} = {target} + {v}")
            }
            SetOperand::Decrement(v) => {
                let v = self.value_placeholder(v);
                format!("{target} = {target} - {v}")
            }
            SetOperand::ListAppend(v) => {
                let v = self.value_placeholder(v);
                format!("{target} = list_append({target}, {v})")
            }
            SetOperand::ListPrepend(v) => {
                let v = self.value_placeholder(v);
                format!("{target} = list_append({v}, {target})")
            }
        };
        self.set_clauses.push(clause);
        Ok(())
    }

    /// Adds an ADD clause (numeric add or set union).
    pub fn push_add(&mut self, path: &str, value: AttributeValue) -> Result<(), CompileError> {
        self.claim_path(path)?;
        let target = self.render_path(path);
        let v = self.value_placeholder(value);
        self.add_clauses.push(format!("{target} {v}"));
        Ok(())
    }

    /// Adds a REMOVE clause.
    pub fn push_remove(&mut self, path: &str) -> Result<(), CompileError> {
        self.claim_path(path)?;
        let target = self.render_path(path);
        self.remove_clauses.push(target);
        Ok(())
    }

    /// Adds a DELETE clause (set element removal).
    pub fn push_delete(&mut self, path: &str, value: AttributeValue) -> Result<(), CompileError> {
        self.claim_path(path)?;
        let target = self.render_path(path);
        let v = self.value_placeholder(value);
        self.delete_clauses.push(format!("{target} {v}"));
        Ok(())
    }

    /// Sets the projection from already-resolved wire names.
    pub fn set_projection(&mut self, wire_names: &[String]) {
        if wire_names.is_empty() {
            return;
        }
        let rendered: Vec<String> = wire_names
            .iter()
            .map(|w| self.name_placeholder(w))
            .collect();
        self.projection = Some(rendered.join(", "));
    }

    /// Returns `true` when any update clause was pushed.
    #[must_use]
    pub fn has_update_clauses(&self) -> bool {
        !self.set_clauses.is_empty()
            || !self.add_clauses.is_empty()
            || !self.remove_clauses.is_empty()
            || !self.delete_clauses.is_empty()
    }

    /// Renders all trees into wire expression components.
    #[must_use]
    pub fn build(self) -> ExpressionComponents {
        let mut components = ExpressionComponents::default();

        if !self.key_terms.is_empty() {
            components.key_condition_expression = Some(self.key_terms.join(" AND "));
        }
        components.filter_expression = self.render_terms(&self.filter_terms);
        components.condition_expression = self.render_terms(&self.condition_terms);

        let mut update = Vec::new();
        if !self.set_clauses.is_empty() {
            update.push(format!("SET {}", self.set_clauses.join(", ")));
        }
        if !self.add_clauses.is_empty() {
            update.push(format!("ADD {}", self.add_clauses.join(", ")));
        }
        if !self.remove_clauses.is_empty() {
            update.push(format!("REMOVE {}", self.remove_clauses.join(", ")));
        }
        if !self.delete_clauses.is_empty() {
            update.push(format!("DELETE {}", self.delete_clauses.join(", ")));
        }
        if !update.is_empty() {
            components.update_expression = Some(update.join(" "));
        }

        components.projection_expression = self.projection;
        components.expression_attribute_names = self.names;
        components.expression_attribute_values = self.values;
        components
    }

    // -- internals ---------------------------------------------------------

    fn render_terms(&self, terms: &[(Connective, String)]) -> Option<String> {
        if terms.is_empty() {
            return None;
        }
        let mut out = String::new();
        for (i, (connective, term)) in terms.iter().enumerate() {
            if i > 0 {
                out.push(' ');
                out.push_str(connective.as_str());
                out.push(' ');
            }
            out.push_str(term);
        }
        Some(out)
    }

    fn render_term(&mut self, cond: &ResolvedCondition) -> Result<String, CompileError> {
        check_arity(cond)?;
        let path = self.render_path(&cond.wire_name);
        let term = match cond.operator {
            ConditionOperator::Eq
            | ConditionOperator::Lt
            | ConditionOperator::Le
            | ConditionOperator::Gt
            | ConditionOperator::Ge => {
                let v = self.value_placeholder(cond.values[0].clone());
                format!("{path} {} {v}", cond.operator.as_str())
            }
            ConditionOperator::Between => {
                let lo = self.value_placeholder(cond.values[0].clone());
                let hi = self.value_placeholder(cond.values[1].clone());
                format!("{path} BETWEEN {lo} AND {hi}")
            }
            ConditionOperator::BeginsWith => {
                let v = self.value_placeholder(cond.values[0].clone());
                format!("begins_with({path}, {v})")
            }
            ConditionOperator::Contains => {
                let v = self.value_placeholder(cond.values[0].clone());
                format!("contains({path}, {v})")
            }
            ConditionOperator::In => {
                let rendered: Vec<String> = cond
                    .values
                    .iter()
                    .map(|v| self.value_placeholder(v.clone()))
                    .collect();
                format!("{path} IN ({})", rendered.join(", "))
            }
            ConditionOperator::Exists => format!("attribute_exists({path})"),
            ConditionOperator::NotExists => format!("attribute_not_exists({path})"),
        };
        Ok(term)
    }

    fn render_path(&mut self, path: &str) -> String {
        let mut rendered = Vec::new();
        for segment in path.split('.') {
            let (name, indexes) = split_indexes(segment);
            let placeholder = self.name_placeholder(name);
            rendered.push(format!("{placeholder}{indexes}"));
        }
        rendered.join(".")
    }

    fn claim_path(&mut self, path: &str) -> Result<(), CompileError> {
        for earlier in &self.update_paths {
            if paths_overlap(earlier, path) {
                return Err(CompileError::OverlappingPaths {
                    first: earlier.clone(),
                    second: path.to_owned(),
                });
            }
        }
        self.update_paths.push(path.to_owned());
        Ok(())
    }

    fn merge(&mut self, sub: ExpressionCompiler) -> Result<(), CompileError> {
        for (placeholder, wire_name) in sub.names {
            if self.names.contains_key(&placeholder) {
                return Err(CompileError::PlaceholderCollision { placeholder });
            }
            self.names.insert(placeholder, wire_name);
        }
        for (placeholder, value) in sub.values {
            if self.values.contains_key(&placeholder) {
                return Err(CompileError::PlaceholderCollision { placeholder });
            }
            self.values.insert(placeholder, value);
        }
        self.name_seq = self.name_seq.max(sub.name_seq);
        self.value_seq = self.value_seq.max(sub.value_seq);
        Ok(())
    }
}

fn check_arity(cond: &ResolvedCondition) -> Result<(), CompileError> {
    let (min, max) = cond.operator.arity();
    let found = cond.values.len();
    let ok = found >= min && max.is_none_or(|m| found <= m);
    if ok {
        return Ok(());
    }
    let expected = match (min, max) {
        (min, Some(max)) if min == max => format!("exactly {min}"),
        (min, Some(max)) => format!("{min} to {max}"),
        (min, None) => format!("at least {min}"),
    };
    Err(CompileError::BadArity {
        field: cond.wire_name.clone(),
        operator: cond.operator.as_str().to_owned(),
        expected,
        found,
    })
}

fn split_indexes(segment: &str) -> (&str, &str) {
    match segment.find('[') {
        Some(pos) => segment.split_at(pos),
        None => (segment, ""),
    }
}

/// Splits a document path into comparable segments; list indexes become
/// their own segments so `tags` is a prefix of `tags[2]`.
fn path_segments(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    for part in path.split('.') {
        let (name, mut indexes) = split_indexes(part);
        segments.push(name.to_owned());
        while let Some(end) = indexes.find(']') {
            segments.push(indexes[..=end].to_owned());
            indexes = &indexes[end + 1..];
        }
    }
    segments
}

fn paths_overlap(a: &str, b: &str) -> bool {
    let a = path_segments(a);
    let b = path_segments(b);
    let shared = a.len().min(b.len());
    a[..shared] == b[..shared]
}
