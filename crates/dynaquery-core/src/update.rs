//! Multi-action update builder.
//!
//! [`Update`] collects mutation actions and guard conditions against one
//! item, compiles them into a single `UpdateItem` operation, and executes
//! it. Instances come from [`Query::update_builder`](crate::query::Query);
//! the key is already extracted when the builder is handed over.
//!
//! Like the query builder, mutators never fail in place. The first invalid
//! input is recorded and execution returns it.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use dynaquery_model::{
    AttributeValue, CompiledQuery, ConditionOperator, Key, Operation, ReturnValues,
};
use tracing::debug;

use crate::error::{BuilderError, Error, Result};
use crate::executor::{Executor, ExecutorError};
use crate::expression::{
    Connective, ExpressionCompiler, RawCondition, ResolvedCondition, SetOperand,
};
use crate::model::Model;
use crate::query::IntoOperands;
use crate::schema::TAG_PROTECTED;

/// One queued mutation, with its path already in wire form.
#[derive(Debug, Clone)]
enum UpdateAction {
    Set { path: String, operand: SetOperand },
    Add { path: String, value: AttributeValue },
    Remove { path: String },
    DeleteElems { path: String, value: AttributeValue },
}

/// Builder for a single `UpdateItem` with multiple actions and guards.
pub struct Update<M: Model> {
    executor: Arc<dyn Executor>,
    key: Key,
    actions: Vec<UpdateAction>,
    guards: Vec<(Connective, ResolvedCondition)>,
    raw_guards: Vec<RawCondition>,
    return_values: Option<ReturnValues>,
    deadline: Option<Duration>,
    err: Option<Error>,
    _model: PhantomData<M>,
}

impl<M: Model> fmt::Debug for Update<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Update")
            .field("table", &M::schema().table_name())
            .field("actions", &self.actions.len())
            .field("guards", &self.guards.len())
            .field("err", &self.err)
            .finish_non_exhaustive()
    }
}

impl<M: Model> Update<M> {
    pub(crate) fn new(executor: Arc<dyn Executor>, key: Key) -> Self {
        Self {
            executor,
            key,
            actions: Vec::new(),
            guards: Vec::new(),
            raw_guards: Vec::new(),
            return_values: None,
            deadline: None,
            err: None,
            _model: PhantomData,
        }
    }

    pub(crate) fn failed(executor: Arc<dyn Executor>, err: Error) -> Self {
        let mut update = Self::new(executor, Key::new());
        update.err = Some(err);
        update
    }

    pub(crate) fn guard(mut self, connective: Connective, guard: ResolvedCondition) -> Self {
        self.guards.push((connective, guard));
        self
    }

    pub(crate) fn raw_guard(mut self, raw: RawCondition) -> Self {
        self.raw_guards.push(raw);
        self
    }

    fn record(&mut self, err: BuilderError) {
        if self.err.is_none() {
            self.err = Some(err.into());
        }
    }

    /// Resolves a document path's head field to its wire name; list
    /// indexes and nested segments pass through untouched.
    fn resolve_path(&mut self, path: &str) -> Option<String> {
        if self.err.is_some() {
            return None;
        }
        if path.is_empty() {
            self.record(BuilderError::EmptyField);
            return None;
        }
        let schema = M::schema();
        let head_end = path.find(['.', '[']).unwrap_or(path.len());
        let head = &path[..head_end];
        if schema.attribute(head).is_some_and(|a| a.has_tag(TAG_PROTECTED)) {
            self.record(BuilderError::ProtectedField {
                field: head.to_owned(),
            });
            return None;
        }
        Some(format!("{}{}", schema.wire_name(head), &path[head_end..]))
    }

    fn push_guard_parts(
        &mut self,
        connective: Connective,
        field: &str,
        operator: ConditionOperator,
        values: Vec<AttributeValue>,
    ) {
        if self.err.is_some() {
            return;
        }
        if field.is_empty() {
            self.record(BuilderError::EmptyField);
            return;
        }
        let schema = M::schema();
        if schema.attribute(field).is_some_and(|a| a.has_tag(TAG_PROTECTED)) {
            self.record(BuilderError::ProtectedField {
                field: field.to_owned(),
            });
            return;
        }
        self.guards.push((
            connective,
            ResolvedCondition::new(schema.wire_name(field), operator, values),
        ));
    }

    fn push_parsed_guard(
        &mut self,
        connective: Connective,
        field: &str,
        operator: &str,
        values: Vec<AttributeValue>,
    ) {
        let Ok(operator) = operator.parse::<ConditionOperator>() else {
            self.record(BuilderError::UnknownOperator {
                operator: operator.to_owned(),
            });
            return;
        };
        self.push_guard_parts(connective, field, operator, values);
    }

    // -- mutations ---------------------------------------------------------

    /// Sets a field or document path to a value.
    #[must_use]
    pub fn set(mut self, path: &str, value: impl Into<AttributeValue>) -> Self {
        if let Some(path) = self.resolve_path(path) {
            self.actions.push(UpdateAction::Set {
                path,
                operand: SetOperand::Value(value.into()),
            });
        }
        self
    }

    /// Sets a field only when the item does not already carry it.
    #[must_use]
    pub fn set_if_not_exists(mut self, path: &str, value: impl Into<AttributeValue>) -> Self {
        if let Some(path) = self.resolve_path(path) {
            self.actions.push(UpdateAction::Set {
                path,
                operand: SetOperand::IfNotExists(value.into()),
            });
        }
        self
    }

    /// Adds to a numeric field in place.
    #[must_use]
    pub fn increment(mut self, path: &str, by: impl Into<AttributeValue>) -> Self {
        if let Some(path) = self.resolve_path(path) {
            self.actions.push(UpdateAction::Set {
                path,
                operand: SetOperand::Increment(by.into()),
            });
        }
        self
    }

    /// Subtracts from a numeric field in place.
    #[must_use]
    pub fn decrement(mut self, path: &str, by: impl Into<AttributeValue>) -> Self {
        if let Some(path) = self.resolve_path(path) {
            self.actions.push(UpdateAction::Set {
                path,
                operand: SetOperand::Decrement(by.into()),
            });
        }
        self
    }

    /// ADD semantics: numeric add, or union into a set attribute.
    #[must_use]
    pub fn add(mut self, path: &str, value: impl Into<AttributeValue>) -> Self {
        if let Some(path) = self.resolve_path(path) {
            self.actions.push(UpdateAction::Add {
                path,
                value: value.into(),
            });
        }
        self
    }

    /// Removes an attribute or document path.
    #[must_use]
    pub fn remove(mut self, path: &str) -> Self {
        if let Some(path) = self.resolve_path(path) {
            self.actions.push(UpdateAction::Remove { path });
        }
        self
    }

    /// Removes elements from a set attribute.
    #[must_use]
    pub fn delete_from_set(mut self, path: &str, elems: impl Into<AttributeValue>) -> Self {
        if let Some(path) = self.resolve_path(path) {
            self.actions.push(UpdateAction::DeleteElems {
                path,
                value: elems.into(),
            });
        }
        self
    }

    /// Appends elements to the end of a list attribute.
    #[must_use]
    pub fn append_to_list(mut self, path: &str, elems: impl Into<AttributeValue>) -> Self {
        if let Some(path) = self.resolve_path(path) {
            self.actions.push(UpdateAction::Set {
                path,
                operand: SetOperand::ListAppend(elems.into()),
            });
        }
        self
    }

    /// Prepends elements to the front of a list attribute.
    #[must_use]
    pub fn prepend_to_list(mut self, path: &str, elems: impl Into<AttributeValue>) -> Self {
        if let Some(path) = self.resolve_path(path) {
            self.actions.push(UpdateAction::Set {
                path,
                operand: SetOperand::ListPrepend(elems.into()),
            });
        }
        self
    }

    /// Overwrites one list element in place.
    #[must_use]
    pub fn set_list_element(
        mut self,
        field: &str,
        index: usize,
        value: impl Into<AttributeValue>,
    ) -> Self {
        if let Some(path) = self.resolve_path(&format!("{field}[{index}]")) {
            self.actions.push(UpdateAction::Set {
                path,
                operand: SetOperand::Value(value.into()),
            });
        }
        self
    }

    /// Removes one list element by position.
    #[must_use]
    pub fn remove_from_list_at(mut self, field: &str, index: usize) -> Self {
        if let Some(path) = self.resolve_path(&format!("{field}[{index}]")) {
            self.actions.push(UpdateAction::Remove { path });
        }
        self
    }

    // -- guards ------------------------------------------------------------

    /// Adds a guard condition, AND-joined with earlier guards.
    #[must_use]
    pub fn condition(mut self, field: &str, operator: &str, operands: impl IntoOperands) -> Self {
        self.push_parsed_guard(Connective::And, field, operator, operands.into_operands());
        self
    }

    /// Adds a guard condition, OR-joined with earlier guards.
    #[must_use]
    pub fn or_condition(
        mut self,
        field: &str,
        operator: &str,
        operands: impl IntoOperands,
    ) -> Self {
        self.push_parsed_guard(Connective::Or, field, operator, operands.into_operands());
        self
    }

    /// Guards on the attribute being present.
    #[must_use]
    pub fn condition_exists(mut self, field: &str) -> Self {
        self.push_guard_parts(Connective::And, field, ConditionOperator::Exists, Vec::new());
        self
    }

    /// Guards on the attribute being absent.
    #[must_use]
    pub fn condition_not_exists(mut self, field: &str) -> Self {
        self.push_guard_parts(
            Connective::And,
            field,
            ConditionOperator::NotExists,
            Vec::new(),
        );
        self
    }

    /// Optimistic-lock guard: requires the declared version field to equal
    /// `expected` and bumps it to `expected + 1` in the same write.
    #[must_use]
    pub fn condition_version(mut self, expected: i64) -> Self {
        if self.err.is_some() {
            return self;
        }
        let schema = M::schema();
        let Some(field) = schema.version_field() else {
            self.record(BuilderError::NoVersionField {
                table: schema.table_name().to_owned(),
            });
            return self;
        };
        let wire = schema.wire_name(field).to_owned();
        self.actions.push(UpdateAction::Set {
            path: wire.clone(),
            operand: SetOperand::Value(AttributeValue::number(expected + 1)),
        });
        self.guards.push((
            Connective::And,
            ResolvedCondition::new(wire, ConditionOperator::Eq, vec![AttributeValue::number(
                expected,
            )]),
        ));
        self
    }

    /// Selects what the store reports back about the written item.
    #[must_use]
    pub fn return_values(mut self, values: ReturnValues) -> Self {
        self.return_values = Some(values);
        self
    }

    /// Bounds execution of this update.
    #[must_use]
    pub fn timeout(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    // -- execution ---------------------------------------------------------

    fn compile(&self, return_values: Option<ReturnValues>) -> Result<CompiledQuery> {
        if self.actions.is_empty() {
            return Err(BuilderError::EmptyUpdate.into());
        }
        let mut compiler = ExpressionCompiler::new();
        for action in &self.actions {
            match action {
                UpdateAction::Set { path, operand } => compiler.push_set(path, operand.clone())?,
                UpdateAction::Add { path, value } => compiler.push_add(path, value.clone())?,
                UpdateAction::Remove { path } => compiler.push_remove(path)?,
                UpdateAction::DeleteElems { path, value } => {
                    compiler.push_delete(path, value.clone())?;
                }
            }
        }
        for (connective, guard) in &self.guards {
            compiler.push_condition(*connective, guard)?;
        }
        for raw in &self.raw_guards {
            compiler.push_raw_condition(
                Connective::And,
                &raw.expression,
                raw.names.clone(),
                raw.values.clone(),
            )?;
        }
        let mut compiled = CompiledQuery::new(Operation::UpdateItem, M::schema().table_name());
        compiled.expressions = compiler.build();
        compiled.key = self.key.clone();
        compiled.return_values = return_values;
        Ok(compiled)
    }

    async fn dispatch<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, ExecutorError>>,
    {
        match self.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, call).await {
                Ok(result) => result.map_err(|e| Error::from_executor(Operation::UpdateItem, e)),
                Err(_) => Err(Error::DeadlineExceeded {
                    operation: Operation::UpdateItem.as_str().to_owned(),
                }),
            },
            None => call
                .await
                .map_err(|e| Error::from_executor(Operation::UpdateItem, e)),
        }
    }

    /// Executes the update, discarding any reported attributes.
    pub async fn execute(mut self) -> Result<()> {
        if let Some(err) = self.err.take() {
            return Err(err);
        }
        let compiled = self.compile(self.return_values)?;
        debug!(
            table = compiled.table_name.as_str(),
            actions = self.actions.len(),
            "update item"
        );
        self.dispatch(self.executor.execute_update_item(&compiled))
            .await
    }

    /// Executes the update and decodes the reported item.
    ///
    /// When no return preference was set, the whole post-write item is
    /// requested; an explicit choice is passed through untouched.
    pub async fn execute_with_result(mut self) -> Result<M> {
        if let Some(err) = self.err.take() {
            return Err(err);
        }
        let return_values = Some(self.return_values.unwrap_or(ReturnValues::AllNew));
        let compiled = self.compile(return_values)?;
        let result = self
            .dispatch(self.executor.execute_update_item_with_result(&compiled))
            .await?;
        Ok(M::from_item(&result.attributes)?)
    }
}
