//! Fluent query orchestration.
//!
//! [`Query`] accumulates conditions and options through a fluent chain,
//! compiles them into an immutable [`CompiledQuery`] (index selection,
//! then key/filter classification, then expression compilation), and
//! dispatches terminal operations through the [`Executor`].
//!
//! Builder calls never fail. The first invalid input is recorded and
//! every terminal returns that error without re-validating. Instances
//! are not safe for concurrent reuse; parallel paths hand each task its
//! own compiled copy.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use dynaquery_model::{
    AttributeValue, CompiledQuery, Condition, ConditionOperator, Item, Key, Operation,
    QueryResult, Select, SortDirection,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::config::EngineConfig;
use crate::cursor::Cursor;
use crate::error::{BuilderError, Error, KeyError, Result};
use crate::executor::{Executor, ExecutorError};
use crate::expression::{
    CompileError, Connective, ExpressionCompiler, RawCondition, ResolvedCondition,
};
use crate::index::select_index;
use crate::model::Model;
use crate::schema::{SchemaDescriptor, TAG_CREATED_AT, TAG_PROTECTED};
use crate::update::Update;

// ---------------------------------------------------------------------------
// Operand conversion
// ---------------------------------------------------------------------------

/// Conversion of caller values into condition operands.
///
/// Scalars become a single operand, a `Vec` becomes one operand per
/// element (IN lists), a two-tuple becomes the BETWEEN pair, and `()`
/// carries the zero operands of EXISTS / NOT_EXISTS.
pub trait IntoOperands {
    /// Converts `self` into the operand list.
    fn into_operands(self) -> Vec<AttributeValue>;
}

impl IntoOperands for AttributeValue {
    fn into_operands(self) -> Vec<AttributeValue> {
        vec![self]
    }
}

impl IntoOperands for () {
    fn into_operands(self) -> Vec<AttributeValue> {
        Vec::new()
    }
}

impl<T: Into<AttributeValue>> IntoOperands for Vec<T> {
    fn into_operands(self) -> Vec<AttributeValue> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<A: Into<AttributeValue>, B: Into<AttributeValue>> IntoOperands for (A, B) {
    fn into_operands(self) -> Vec<AttributeValue> {
        vec![self.0.into(), self.1.into()]
    }
}

macro_rules! impl_scalar_operand {
    ($($ty:ty),+ $(,)?) => {
        $(impl IntoOperands for $ty {
            fn into_operands(self) -> Vec<AttributeValue> {
                vec![self.into()]
            }
        })+
    };
}

impl_scalar_operand!(&str, String, i32, i64, u32, u64, f64, bool);

// ---------------------------------------------------------------------------
// Builder state
// ---------------------------------------------------------------------------

/// First recorded builder failure, cloned into every terminal result.
#[derive(Debug, Clone)]
pub(crate) enum Sticky {
    Builder(BuilderError),
    Cursor(crate::cursor::CursorError),
}

impl From<Sticky> for Error {
    fn from(sticky: Sticky) -> Self {
        match sticky {
            Sticky::Builder(e) => Self::Builder(e),
            Sticky::Cursor(e) => Self::Cursor(e),
        }
    }
}

#[derive(Debug, Clone)]
enum FilterEntry {
    Leaf(Connective, Condition),
    Group(Connective, Vec<FilterEntry>),
}

/// Builder for a parenthesized filter group.
pub struct FilterGroup<M: Model> {
    entries: Vec<FilterEntry>,
    err: Option<BuilderError>,
    _model: PhantomData<M>,
}

impl<M: Model> fmt::Debug for FilterGroup<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterGroup")
            .field("entries", &self.entries.len())
            .field("err", &self.err)
            .finish()
    }
}

impl<M: Model> Default for FilterGroup<M> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            err: None,
            _model: PhantomData,
        }
    }
}

impl<M: Model> FilterGroup<M> {
    fn push(&mut self, connective: Connective, field: &str, operator: &str, operands: Vec<AttributeValue>) {
        match build_condition::<M>(field, operator, operands) {
            Ok(cond) => self.entries.push(FilterEntry::Leaf(connective, cond)),
            Err(e) => {
                if self.err.is_none() {
                    self.err = Some(e);
                }
            }
        }
    }

    /// Adds an AND-joined condition to the group.
    #[must_use]
    pub fn filter(mut self, field: &str, operator: &str, operands: impl IntoOperands) -> Self {
        self.push(Connective::And, field, operator, operands.into_operands());
        self
    }

    /// Adds an OR-joined condition to the group.
    #[must_use]
    pub fn or_filter(mut self, field: &str, operator: &str, operands: impl IntoOperands) -> Self {
        self.push(Connective::Or, field, operator, operands.into_operands());
        self
    }

    /// Adds a nested AND-joined group.
    #[must_use]
    pub fn filter_group<F>(mut self, build: F) -> Self
    where
        F: FnOnce(FilterGroup<M>) -> FilterGroup<M>,
    {
        self.splice(Connective::And, build(FilterGroup::default()));
        self
    }

    /// Adds a nested OR-joined group.
    #[must_use]
    pub fn or_filter_group<F>(mut self, build: F) -> Self
    where
        F: FnOnce(FilterGroup<M>) -> FilterGroup<M>,
    {
        self.splice(Connective::Or, build(FilterGroup::default()));
        self
    }

    fn splice(&mut self, connective: Connective, group: FilterGroup<M>) {
        if self.err.is_none() {
            self.err = group.err;
        }
        if !group.entries.is_empty() {
            self.entries.push(FilterEntry::Group(connective, group.entries));
        }
    }
}

fn build_condition<M: Model>(
    field: &str,
    operator: &str,
    operands: Vec<AttributeValue>,
) -> std::result::Result<Condition, BuilderError> {
    if field.is_empty() {
        return Err(BuilderError::EmptyField);
    }
    let operator: ConditionOperator = operator.parse().map_err(|_| BuilderError::UnknownOperator {
        operator: operator.to_owned(),
    })?;
    if let Some(meta) = M::schema().attribute(field) {
        if meta.has_tag(TAG_PROTECTED) {
            return Err(BuilderError::ProtectedField {
                field: field.to_owned(),
            });
        }
    }
    Ok(Condition::new(field, operator, operands))
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// One decoded page of results plus the continuation token.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<M> {
    /// Decoded items of this page.
    pub items: Vec<M>,
    /// Token resuming after this page; empty when no pages remain.
    pub cursor: String,
}

impl<M> Page<M> {
    /// Returns `true` when another page can be fetched.
    #[must_use]
    pub fn has_more(&self) -> bool {
        !self.cursor.is_empty()
    }
}

/// Fluent query builder and terminal dispatcher for one model value.
pub struct Query<'a, M: Model> {
    executor: Arc<dyn Executor>,
    model: &'a M,
    config: EngineConfig,
    wheres: Vec<Condition>,
    filters: Vec<FilterEntry>,
    guards: Vec<(Connective, Condition)>,
    raw_guards: Vec<RawCondition>,
    projection: Vec<String>,
    limit: Option<i32>,
    offset: Option<i32>,
    sort: Option<SortDirection>,
    consistent: Option<bool>,
    cursor: Option<Cursor>,
    forced_index: Option<String>,
    deadline: Option<Duration>,
    err: Option<Sticky>,
}

impl<M: Model> fmt::Debug for Query<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("table", &M::schema().table_name())
            .field("wheres", &self.wheres.len())
            .field("filters", &self.filters.len())
            .field("guards", &self.guards.len())
            .field("err", &self.err)
            .finish_non_exhaustive()
    }
}

impl<'a, M: Model> Query<'a, M> {
    /// Starts a query over `model`'s table.
    #[must_use]
    pub fn new(executor: Arc<dyn Executor>, model: &'a M) -> Self {
        Self {
            executor,
            model,
            config: EngineConfig::default(),
            wheres: Vec::new(),
            filters: Vec::new(),
            guards: Vec::new(),
            raw_guards: Vec::new(),
            projection: Vec::new(),
            limit: None,
            offset: None,
            sort: None,
            consistent: None,
            cursor: None,
            forced_index: None,
            deadline: None,
            err: None,
        }
    }

    /// Overrides the engine configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    fn record(&mut self, err: BuilderError) {
        if self.err.is_none() {
            self.err = Some(Sticky::Builder(err));
        }
    }

    /// Adds a condition eligible for key classification.
    ///
    /// Conditions that do not land on the chosen index's keys compile
    /// into the filter expression instead.
    #[must_use]
    pub fn where_(mut self, field: &str, operator: &str, operands: impl IntoOperands) -> Self {
        match build_condition::<M>(field, operator, operands.into_operands()) {
            Ok(cond) => self.wheres.push(cond),
            Err(e) => self.record(e),
        }
        self
    }

    /// Adds an AND-joined filter condition.
    #[must_use]
    pub fn filter(mut self, field: &str, operator: &str, operands: impl IntoOperands) -> Self {
        match build_condition::<M>(field, operator, operands.into_operands()) {
            Ok(cond) => self.filters.push(FilterEntry::Leaf(Connective::And, cond)),
            Err(e) => self.record(e),
        }
        self
    }

    /// Adds an OR-joined filter condition.
    #[must_use]
    pub fn or_filter(mut self, field: &str, operator: &str, operands: impl IntoOperands) -> Self {
        match build_condition::<M>(field, operator, operands.into_operands()) {
            Ok(cond) => self.filters.push(FilterEntry::Leaf(Connective::Or, cond)),
            Err(e) => self.record(e),
        }
        self
    }

    /// Adds an AND-joined parenthesized filter group.
    #[must_use]
    pub fn filter_group<F>(mut self, build: F) -> Self
    where
        F: FnOnce(FilterGroup<M>) -> FilterGroup<M>,
    {
        self.adopt_group(Connective::And, build(FilterGroup::default()));
        self
    }

    /// Adds an OR-joined parenthesized filter group.
    #[must_use]
    pub fn or_filter_group<F>(mut self, build: F) -> Self
    where
        F: FnOnce(FilterGroup<M>) -> FilterGroup<M>,
    {
        self.adopt_group(Connective::Or, build(FilterGroup::default()));
        self
    }

    fn adopt_group(&mut self, connective: Connective, group: FilterGroup<M>) {
        if let Some(e) = group.err {
            self.record(e);
        } else if !group.entries.is_empty() {
            self.filters.push(FilterEntry::Group(connective, group.entries));
        }
    }

    /// Adds a write guard condition, AND-joined with earlier guards.
    #[must_use]
    pub fn with_condition(
        mut self,
        field: &str,
        operator: &str,
        operands: impl IntoOperands,
    ) -> Self {
        match build_condition::<M>(field, operator, operands.into_operands()) {
            Ok(cond) => self.guards.push((Connective::And, cond)),
            Err(e) => self.record(e),
        }
        self
    }

    /// Splices caller-written guard text with its own placeholder maps.
    #[must_use]
    pub fn with_condition_expression(
        mut self,
        expression: &str,
        names: HashMap<String, String>,
        values: HashMap<String, AttributeValue>,
    ) -> Self {
        match validate_raw_expression(expression) {
            Ok(()) => self.raw_guards.push(RawCondition {
                expression: expression.to_owned(),
                names,
                values,
            }),
            Err(e) => self.record(e),
        }
        self
    }

    /// Forces a declared index instead of running selection.
    #[must_use]
    pub fn use_index(mut self, name: impl Into<String>) -> Self {
        self.forced_index = Some(name.into());
        self
    }

    /// Restricts returned attributes to the named logical fields.
    #[must_use]
    pub fn projection(mut self, fields: &[&str]) -> Self {
        self.projection = fields.iter().map(|f| (*f).to_owned()).collect();
        self
    }

    /// Caps the number of evaluated items.
    #[must_use]
    pub fn limit(mut self, limit: i32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Requests a best-effort skip; the executor may reject it.
    #[must_use]
    pub fn offset(mut self, offset: i32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Sets the sort-key traversal direction.
    #[must_use]
    pub fn sort(mut self, direction: SortDirection) -> Self {
        self.sort = Some(direction);
        self
    }

    /// Requests strongly consistent reads.
    #[must_use]
    pub fn consistent_read(mut self, consistent: bool) -> Self {
        self.consistent = Some(consistent);
        self
    }

    /// Resumes after the page a cursor token points at.
    ///
    /// An empty token is a no-op; a malformed one is recorded sticky.
    #[must_use]
    pub fn start_from(mut self, token: &str) -> Self {
        match Cursor::decode(token) {
            Ok(Some(cursor)) => self.cursor = Some(cursor),
            Ok(None) => {}
            Err(e) => {
                if self.err.is_none() {
                    self.err = Some(Sticky::Cursor(e));
                }
            }
        }
        self
    }

    /// Bounds every terminal call on this query.
    #[must_use]
    pub fn timeout(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    // -- compilation -------------------------------------------------------

    fn sticky(&self) -> Result<()> {
        match &self.err {
            Some(s) => Err(s.clone().into()),
            None => Ok(()),
        }
    }

    fn resolved_wheres(&self) -> Vec<ResolvedCondition> {
        let schema = M::schema();
        self.wheres
            .iter()
            .map(|c| {
                ResolvedCondition::new(schema.wire_name(&c.field), c.operator, c.values.clone())
            })
            .collect()
    }

    fn forced_candidate(&self) -> Result<Option<&'static dynaquery_model::IndexSchema>> {
        let Some(name) = &self.forced_index else {
            return Ok(None);
        };
        M::schema()
            .candidate_indexes()
            .iter()
            .find(|i| &i.name == name)
            .map(Some)
            .ok_or_else(|| BuilderError::UnknownIndex { name: name.clone() }.into())
    }

    /// Compiles the accumulated read state into an immutable query.
    pub fn compile(&self) -> Result<CompiledQuery> {
        self.compile_read(self.limit, None)
    }

    fn compile_read(&self, limit: Option<i32>, select: Option<Select>) -> Result<CompiledQuery> {
        self.sticky()?;
        let schema = M::schema();
        let resolved = self.resolved_wheres();
        let index = match self.forced_candidate()? {
            Some(forced) => Some(forced),
            None => select_index(&resolved, schema),
        };

        let mut compiler = ExpressionCompiler::new();
        let mut operation = Operation::Scan;
        let mut index_name = None;
        let mut leftovers: Vec<&ResolvedCondition> = Vec::new();

        if let Some(index) = index {
            let keys = &index.key_schema;
            let partition_pos = resolved.iter().position(|c| {
                c.operator == ConditionOperator::Eq && c.wire_name == keys.partition_key
            });
            if let Some(partition_pos) = partition_pos {
                operation = Operation::Query;
                let sort_pos = keys.sort_key.as_ref().and_then(|sk| {
                    resolved
                        .iter()
                        .position(|c| c.operator.key_eligible() && &c.wire_name == sk)
                });
                for (pos, cond) in resolved.iter().enumerate() {
                    if pos == partition_pos || Some(pos) == sort_pos {
                        compiler.push_key_condition(cond)?;
                    } else {
                        leftovers.push(cond);
                    }
                }
            } else {
                // A forced index without partition equality still scans
                // that index rather than erroring.
                leftovers.extend(resolved.iter());
            }
            if !index.is_primary() {
                index_name = Some(index.name.clone());
            }
        } else {
            leftovers.extend(resolved.iter());
        }

        for cond in leftovers {
            compiler.push_filter(Connective::And, cond)?;
        }
        fill_filter_tree(&mut compiler, &self.filters, schema)?;
        self.attach_projection(&mut compiler);

        let mut compiled = CompiledQuery::new(operation, schema.table_name());
        compiled.index_name = index_name;
        compiled.expressions = compiler.build();
        compiled.limit = limit;
        compiled.offset = self.offset;
        if let Some(cursor) = &self.cursor {
            compiled.exclusive_start_key = cursor.last_evaluated_key.clone();
        }
        compiled.scan_index_forward = self.effective_sort().map(|d| d.scan_index_forward());
        compiled.consistent_read = self.consistent;
        compiled.select = select;
        debug!(
            operation = %compiled.operation,
            table = compiled.table_name.as_str(),
            index = compiled.index_name.as_deref().unwrap_or_default(),
            "compiled read"
        );
        Ok(compiled)
    }

    fn compile_scan(&self, segment: Option<i32>, total_segments: Option<i32>) -> Result<CompiledQuery> {
        self.sticky()?;
        let schema = M::schema();
        let mut compiler = ExpressionCompiler::new();
        for cond in &self.resolved_wheres() {
            compiler.push_filter(Connective::And, cond)?;
        }
        fill_filter_tree(&mut compiler, &self.filters, schema)?;
        self.attach_projection(&mut compiler);

        let mut compiled = CompiledQuery::new(Operation::Scan, schema.table_name());
        compiled.index_name = self
            .forced_candidate()?
            .filter(|i| !i.is_primary())
            .map(|i| i.name.clone());
        compiled.expressions = compiler.build();
        compiled.limit = self.limit;
        compiled.offset = self.offset;
        if let Some(cursor) = &self.cursor {
            compiled.exclusive_start_key = cursor.last_evaluated_key.clone();
        }
        compiled.consistent_read = self.consistent;
        compiled.segment = segment;
        compiled.total_segments = total_segments;
        Ok(compiled)
    }

    fn attach_projection(&self, compiler: &mut ExpressionCompiler) {
        if self.projection.is_empty() {
            return;
        }
        let schema = M::schema();
        let wires: Vec<String> = self
            .projection
            .iter()
            .map(|f| schema.wire_name(f).to_owned())
            .collect();
        compiler.set_projection(&wires);
    }

    fn effective_sort(&self) -> Option<SortDirection> {
        // A cursor remembers the direction it was produced under so a
        // resumed page keeps walking the same way.
        self.sort
            .or_else(|| self.cursor.as_ref().map(|c| c.sort_direction))
    }

    // -- guard compilation (write terminals) -------------------------------

    fn push_guards(&self, compiler: &mut ExpressionCompiler) -> Result<()> {
        let schema = M::schema();
        for (connective, cond) in &self.guards {
            let resolved = ResolvedCondition::new(
                schema.wire_name(&cond.field),
                cond.operator,
                cond.values.clone(),
            );
            compiler.push_condition(*connective, &resolved)?;
        }
        for raw in &self.raw_guards {
            compiler.push_raw_condition(
                Connective::And,
                &raw.expression,
                raw.names.clone(),
                raw.values.clone(),
            )?;
        }
        Ok(())
    }

    fn has_guards(&self) -> bool {
        !self.guards.is_empty() || !self.raw_guards.is_empty()
    }

    // -- terminals ---------------------------------------------------------

    async fn with_deadline<T, F>(&self, operation: Operation, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, ExecutorError>>,
    {
        match self.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, call).await {
                Ok(result) => result.map_err(|e| Error::from_executor(operation, e)),
                Err(_) => Err(Error::DeadlineExceeded {
                    operation: operation.as_str().to_owned(),
                }),
            },
            None => call.await.map_err(|e| Error::from_executor(operation, e)),
        }
    }

    async fn dispatch_read(&self, compiled: &CompiledQuery) -> Result<QueryResult> {
        let start_key = (!compiled.exclusive_start_key.is_empty())
            .then(|| compiled.exclusive_start_key.clone());
        let executor = &self.executor;
        let call = async {
            match (compiled.operation, start_key) {
                (Operation::Query, Some(key)) => {
                    executor
                        .execute_query_with_pagination(compiled, compiled.limit, Some(key))
                        .await
                }
                (Operation::Query, None) => executor.execute_query(compiled).await,
                (_, Some(key)) => {
                    executor
                        .execute_scan_with_pagination(compiled, compiled.limit, Some(key))
                        .await
                }
                (_, None) => executor.execute_scan(compiled).await,
            }
        };
        self.with_deadline(compiled.operation, call).await
    }

    fn page_from(&self, compiled: &CompiledQuery, result: QueryResult) -> Result<Page<M>> {
        let mut items = Vec::with_capacity(result.items.len());
        for item in &result.items {
            items.push(M::from_item(item)?);
        }
        let cursor = if result.last_evaluated_key.is_empty() {
            String::new()
        } else {
            let mut next = Cursor::new(result.last_evaluated_key);
            if let Some(name) = &compiled.index_name {
                next = next.with_index_name(name.clone());
            }
            if let Some(direction) = self.effective_sort() {
                next = next.with_sort_direction(direction);
            }
            next.encode()?
        };
        Ok(Page { items, cursor })
    }

    /// Fetches at most one item.
    pub async fn first(&self) -> Result<Option<M>> {
        let compiled = self.compile_read(Some(1), None)?;
        let result = self.dispatch_read(&compiled).await?;
        match result.items.first() {
            Some(item) => Ok(Some(M::from_item(item)?)),
            None => Ok(None),
        }
    }

    /// Fetches one page of items plus the continuation cursor.
    pub async fn all(&self) -> Result<Page<M>> {
        let compiled = self.compile_read(self.limit, None)?;
        let result = self.dispatch_read(&compiled).await?;
        self.page_from(&compiled, result)
    }

    /// Returns the store-reported match count without fetching items.
    pub async fn count(&self) -> Result<i32> {
        let compiled = self.compile_read(self.limit, Some(Select::Count))?;
        let result = self.dispatch_read(&compiled).await?;
        Ok(result.count)
    }

    /// Writes the model as a new item.
    ///
    /// Without explicit guards a default `attribute_not_exists` guard on
    /// the partition key rejects overwrites; the rejection surfaces as
    /// [`Error::ConditionFailed`].
    pub async fn create(&self) -> Result<()> {
        self.sticky()?;
        let schema = M::schema();
        let item = self.model.to_item()?;
        let mut compiler = ExpressionCompiler::new();
        if self.has_guards() {
            self.push_guards(&mut compiler)?;
        } else {
            let guard = ResolvedCondition::new(
                schema.primary_key().partition_key.clone(),
                ConditionOperator::NotExists,
                Vec::new(),
            );
            compiler.push_condition(Connective::And, &guard)?;
        }
        let mut compiled = CompiledQuery::new(Operation::PutItem, schema.table_name());
        compiled.expressions = compiler.build();
        compiled.item = item;
        debug!(table = compiled.table_name.as_str(), "create item");
        self.with_deadline(Operation::PutItem, self.executor.execute_put_item(&compiled))
            .await
    }

    /// Updates the item addressed by the where-clause key conditions.
    ///
    /// An empty `fields` list auto-discovers every non-key attribute the
    /// model carries a value for, skipping creation-timestamp and
    /// protected fields. Where conditions beyond the key become the write
    /// guard.
    pub async fn update(&self, fields: &[&str]) -> Result<()> {
        let mut update = self.update_builder();
        let schema = M::schema();
        let names: Vec<&str> = if fields.is_empty() {
            schema
                .attributes()
                .iter()
                .filter(|a| {
                    !schema.is_primary_key_attribute(&a.wire_name)
                        && !a.has_tag(TAG_CREATED_AT)
                        && !a.has_tag(TAG_PROTECTED)
                })
                .map(|a| a.name.as_str())
                .collect()
        } else {
            fields.to_vec()
        };
        for name in names {
            if let Some(value) = self.model.attribute(name) {
                update = update.set(name, value);
            }
        }
        update.execute().await
    }

    /// Hands the accumulated state to an update builder.
    ///
    /// Where-clause equalities on the primary key become the item key;
    /// remaining where conditions and guards become the write guard. An
    /// incomplete key surfaces when the update executes.
    #[must_use]
    pub fn update_builder(&self) -> Update<M> {
        if let Some(sticky) = &self.err {
            return Update::failed(self.executor.clone(), sticky.clone().into());
        }
        let resolved = self.resolved_wheres();
        let mut update = match extract_key(&resolved, M::schema()) {
            Ok((key, leftovers)) => {
                let mut update = Update::new(self.executor.clone(), key);
                for leftover in leftovers {
                    update = update.guard(Connective::And, leftover);
                }
                update
            }
            Err(e) => Update::failed(self.executor.clone(), e),
        };
        let schema = M::schema();
        for (connective, cond) in &self.guards {
            let guard = ResolvedCondition::new(
                schema.wire_name(&cond.field),
                cond.operator,
                cond.values.clone(),
            );
            update = update.guard(*connective, guard);
        }
        for raw in &self.raw_guards {
            update = update.raw_guard(raw.clone());
        }
        if let Some(deadline) = self.deadline {
            update = update.timeout(deadline);
        }
        update
    }

    /// Deletes the item addressed by the where-clause key conditions.
    ///
    /// Where conditions beyond the key become the write guard.
    pub async fn delete(&self) -> Result<()> {
        self.sticky()?;
        let schema = M::schema();
        let resolved = self.resolved_wheres();
        let (key, leftovers) = extract_key(&resolved, schema)?;
        let mut compiler = ExpressionCompiler::new();
        for cond in &leftovers {
            compiler.push_condition(Connective::And, cond)?;
        }
        self.push_guards(&mut compiler)?;
        let mut compiled = CompiledQuery::new(Operation::DeleteItem, schema.table_name());
        compiled.expressions = compiler.build();
        compiled.key = key;
        debug!(table = compiled.table_name.as_str(), "delete item");
        self.with_deadline(
            Operation::DeleteItem,
            self.executor.execute_delete_item(&compiled),
        )
        .await
    }

    /// Scans the table, compiling every condition into the filter.
    pub async fn scan(&self) -> Result<Page<M>> {
        let compiled = self.compile_scan(None, None)?;
        let result = self.dispatch_read(&compiled).await?;
        self.page_from(&compiled, result)
    }

    /// Scans one segment of a segmented scan.
    pub async fn parallel_scan(&self, segment: i32, total_segments: i32) -> Result<Page<M>> {
        let compiled = self.compile_scan(Some(segment), Some(total_segments))?;
        let result = self.dispatch_read(&compiled).await?;
        self.page_from(&compiled, result)
    }

    /// Drains every segment of a segmented scan concurrently.
    ///
    /// Segments run under the configured concurrency bound, each on its
    /// own compiled copy. Results carry no cross-segment ordering. The
    /// first segment error is returned after all segments finish; a
    /// deadline aborts outstanding segments.
    pub async fn scan_all_segments(&self, total_segments: i32) -> Result<Vec<M>> {
        let base = self.compile_scan(None, Some(total_segments))?;
        debug!(
            table = base.table_name.as_str(),
            total_segments, "segmented scan"
        );
        let run = async {
            let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
            let mut tasks: JoinSet<std::result::Result<Vec<Item>, ExecutorError>> = JoinSet::new();
            for segment in 0..total_segments {
                let mut compiled = base.clone();
                compiled.segment = Some(segment);
                let executor = self.executor.clone();
                let semaphore = semaphore.clone();
                tasks.spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| ExecutorError::cancelled(e.to_string()))?;
                    drain_segment(executor, compiled).await
                });
            }

            let mut items = Vec::new();
            let mut first_err: Option<Error> = None;
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Ok(segment_items)) => items.extend(segment_items),
                    Ok(Err(e)) => {
                        if first_err.is_none() {
                            first_err = Some(Error::from_executor(Operation::Scan, e));
                        }
                    }
                    Err(e) => {
                        if first_err.is_none() {
                            first_err = Some(Error::Executor(ExecutorError::other(format!(
                                "segment task failed: {e}"
                            ))));
                        }
                    }
                }
            }
            if let Some(err) = first_err {
                return Err(err);
            }
            let mut decoded = Vec::with_capacity(items.len());
            for item in &items {
                decoded.push(M::from_item(item)?);
            }
            Ok(decoded)
        };
        match self.deadline {
            Some(deadline) => tokio::time::timeout(deadline, run).await.unwrap_or_else(|_| {
                Err(Error::DeadlineExceeded {
                    operation: "scan_all_segments".to_owned(),
                })
            }),
            None => run.await,
        }
    }
}

async fn drain_segment(
    executor: Arc<dyn Executor>,
    compiled: CompiledQuery,
) -> std::result::Result<Vec<Item>, ExecutorError> {
    let mut items = Vec::new();
    let mut start_key: Option<Key> = None;
    loop {
        let page = executor
            .execute_scan_with_pagination(&compiled, compiled.limit, start_key.take())
            .await?;
        let QueryResult {
            items: page_items,
            last_evaluated_key,
            ..
        } = page;
        items.extend(page_items);
        if last_evaluated_key.is_empty() {
            break;
        }
        start_key = Some(last_evaluated_key);
    }
    Ok(items)
}

fn fill_filter_tree(
    compiler: &mut ExpressionCompiler,
    entries: &[FilterEntry],
    schema: &SchemaDescriptor,
) -> std::result::Result<(), CompileError> {
    for entry in entries {
        match entry {
            FilterEntry::Leaf(connective, cond) => {
                let resolved = ResolvedCondition::new(
                    schema.wire_name(&cond.field),
                    cond.operator,
                    cond.values.clone(),
                );
                compiler.push_filter(*connective, &resolved)?;
            }
            FilterEntry::Group(connective, inner) => {
                let mut sub = compiler.subcompiler();
                fill_filter_tree(&mut sub, inner, schema)?;
                compiler.splice_filter_group(*connective, sub)?;
            }
        }
    }
    Ok(())
}

fn extract_key(
    resolved: &[ResolvedCondition],
    schema: &SchemaDescriptor,
) -> Result<(Key, Vec<ResolvedCondition>)> {
    let primary = schema.primary_key();
    let mut key_parts = vec![primary.partition_key.as_str()];
    if let Some(sort_key) = &primary.sort_key {
        key_parts.push(sort_key);
    }

    let mut key = Key::new();
    let mut consumed = vec![false; resolved.len()];
    for part in key_parts {
        let eq_pos = resolved.iter().position(|c| {
            c.wire_name == part && c.operator == ConditionOperator::Eq && !c.values.is_empty()
        });
        match eq_pos {
            Some(pos) => {
                consumed[pos] = true;
                key.insert(part.to_owned(), resolved[pos].values[0].clone());
            }
            None => {
                let err = if resolved.iter().any(|c| c.wire_name == part) {
                    KeyError::NonEquality {
                        field: part.to_owned(),
                    }
                } else {
                    KeyError::Incomplete {
                        missing: part.to_owned(),
                    }
                };
                return Err(err.into());
            }
        }
    }
    let leftovers = resolved
        .iter()
        .zip(&consumed)
        .filter(|(_, used)| !**used)
        .map(|(c, _)| c.clone())
        .collect();
    Ok((key, leftovers))
}

fn validate_raw_expression(expression: &str) -> std::result::Result<(), BuilderError> {
    if expression.trim().is_empty() {
        return Err(BuilderError::MalformedExpression {
            reason: "expression is empty".to_owned(),
        });
    }
    let mut depth: i32 = 0;
    for ch in expression.chars() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    break;
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(BuilderError::MalformedExpression {
            reason: "unbalanced parentheses".to_owned(),
        });
    }
    Ok(())
}
