//! In-memory store executor.
//!
//! [`MemoryExecutor`] keeps tables as plain item vectors and interprets the
//! compiled expressions it receives: key conditions, filters, write guards,
//! projections, and update clauses. Tests can inject failures and leave
//! writes or keys unprocessed to drive the engine's retry paths.

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use async_trait::async_trait;
use dynaquery_core::{Executor, ExecutorError, ExecutorErrorKind};
use dynaquery_model::{
    AttributeValue, BatchGetResult, BatchWriteResult, CompiledBatchGet, CompiledQuery,
    ExpressionComponents, Item, Key, KeySchema, KeysAndAttributes, QueryResult, ReturnValues,
    Select, UpdateResult, WriteRequest,
};
use parking_lot::Mutex;
use tracing::debug;

#[derive(Debug)]
struct TableEntry {
    key: KeySchema,
    indexes: HashMap<String, KeySchema>,
    items: Vec<Item>,
}

/// An [`Executor`] over in-process tables, addressed by wire names.
#[derive(Debug, Default)]
pub struct MemoryExecutor {
    tables: Mutex<HashMap<String, TableEntry>>,
    failures: Mutex<VecDeque<ExecutorError>>,
    unprocessed_writes: Mutex<Option<usize>>,
    unprocessed_gets: Mutex<Option<usize>>,
    write_calls: AtomicUsize,
    get_calls: AtomicUsize,
}

impl MemoryExecutor {
    /// Creates an executor with no tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an empty table under its wire key schema.
    pub fn create_table(&self, name: &str, key: KeySchema) {
        debug!(table = name, "create table");
        self.tables.lock().insert(name.to_owned(), TableEntry {
            key,
            indexes: HashMap::new(),
            items: Vec::new(),
        });
    }

    /// Registers a secondary index on an existing table.
    pub fn create_index(&self, table: &str, name: &str, key: KeySchema) {
        debug!(table, index = name, "create index");
        let mut tables = self.tables.lock();
        let entry = tables
            .get_mut(table)
            .unwrap_or_else(|| panic!("table {table} does not exist"));
        entry.indexes.insert(name.to_owned(), key);
    }

    /// Fails the next operation with `error`; queued in FIFO order.
    pub fn inject_failure(&self, error: ExecutorError) {
        self.failures.lock().push_back(error);
    }

    /// Leaves the last `count` writes of the next batch-write unprocessed.
    pub fn leave_unprocessed_writes(&self, count: usize) {
        *self.unprocessed_writes.lock() = Some(count);
    }

    /// Leaves the last `count` keys of the next batch-get unprocessed.
    pub fn leave_unprocessed_gets(&self, count: usize) {
        *self.unprocessed_gets.lock() = Some(count);
    }

    /// Number of batch-write round trips served so far.
    #[must_use]
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(AtomicOrdering::Relaxed)
    }

    /// Number of batch-get round trips served so far.
    #[must_use]
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(AtomicOrdering::Relaxed)
    }

    /// Number of items currently stored in `table`.
    #[must_use]
    pub fn table_len(&self, table: &str) -> usize {
        self.tables.lock().get(table).map_or(0, |e| e.items.len())
    }

    /// Copies out every item of `table` in insertion order.
    #[must_use]
    pub fn snapshot(&self, table: &str) -> Vec<Item> {
        self.tables
            .lock()
            .get(table)
            .map(|e| e.items.clone())
            .unwrap_or_default()
    }

    fn take_failure(&self) -> Result<(), ExecutorError> {
        match self.failures.lock().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    // -- operations --------------------------------------------------------

    fn run_read(
        &self,
        compiled: &CompiledQuery,
        limit: Option<i32>,
        start_key: Option<Key>,
    ) -> Result<QueryResult, ExecutorError> {
        let tables = self.tables.lock();
        let entry = tables
            .get(&compiled.table_name)
            .ok_or_else(|| not_found(&compiled.table_name))?;
        let active = match &compiled.index_name {
            Some(name) => entry.indexes.get(name).ok_or_else(|| not_found(name))?,
            None => &entry.key,
        };
        let segments = match (compiled.segment, compiled.total_segments) {
            (Some(segment), Some(total)) => {
                let total = usize::try_from(total)
                    .ok()
                    .filter(|t| *t > 0)
                    .ok_or_else(|| validation("total segments must be positive"))?;
                let segment = usize::try_from(segment)
                    .map_err(|_| validation("segment must be non-negative"))?;
                Some((segment, total))
            }
            _ => None,
        };

        // Segment assignment follows insertion order, before any sorting.
        let mut candidates = Vec::new();
        for (position, item) in entry.items.iter().enumerate() {
            if let Some((segment, total)) = segments {
                if position % total != segment {
                    continue;
                }
            }
            if let Some(expr) = &compiled.expressions.key_condition_expression {
                if !evaluate_condition(expr, &compiled.expressions, item)? {
                    continue;
                }
            }
            candidates.push(item.clone());
        }
        if let Some(sort_attr) = &active.sort_key {
            candidates.sort_by(|a, b| compare_sort_values(a.get(sort_attr), b.get(sort_attr)));
        }
        if compiled.scan_index_forward == Some(false) {
            candidates.reverse();
        }

        let resume = start_key.or_else(|| {
            (!compiled.exclusive_start_key.is_empty()).then(|| compiled.exclusive_start_key.clone())
        });
        let start = resume.as_ref().map_or(0, |key| {
            position_of(&entry.key, &candidates, key).map_or(0, |pos| pos + 1)
        });

        // The limit caps evaluated items; the filter prunes afterwards.
        let page_limit = limit.or(compiled.limit).and_then(|l| usize::try_from(l).ok());
        let mut matched = Vec::new();
        let mut scanned = 0usize;
        for item in &candidates[start..] {
            if page_limit.is_some_and(|cap| scanned >= cap) {
                break;
            }
            scanned += 1;
            let keep = match &compiled.expressions.filter_expression {
                Some(expr) => evaluate_condition(expr, &compiled.expressions, item)?,
                None => true,
            };
            if keep {
                matched.push(item.clone());
            }
        }

        // The resume key points at the last evaluated item, pre-filter.
        let last_evaluated_key = if scanned > 0 && start + scanned < candidates.len() {
            project_key(&entry.key, &candidates[start + scanned - 1]).unwrap_or_default()
        } else {
            Key::new()
        };

        if let Some(offset) = compiled.offset {
            let skip = usize::try_from(offset).unwrap_or(0).min(matched.len());
            matched.drain(..skip);
        }
        if let Some(projection) = &compiled.expressions.projection_expression {
            let wires = projection_wires(projection, &compiled.expressions)?;
            for item in &mut matched {
                item.retain(|name, _| wires.iter().any(|w| w == name));
            }
        }

        let count = i32::try_from(matched.len()).unwrap_or(i32::MAX);
        let scanned_count = i32::try_from(scanned).unwrap_or(i32::MAX);
        let items = if compiled.select == Some(Select::Count) {
            Vec::new()
        } else {
            matched
        };
        Ok(QueryResult {
            items,
            count,
            scanned_count,
            last_evaluated_key,
        })
    }

    fn run_put(&self, query: &CompiledQuery) -> Result<(), ExecutorError> {
        let mut tables = self.tables.lock();
        let entry = tables
            .get_mut(&query.table_name)
            .ok_or_else(|| not_found(&query.table_name))?;
        let key = project_key(&entry.key, &query.item)
            .ok_or_else(|| validation("put item does not cover the table key"))?;
        let pos = position_of(&entry.key, &entry.items, &key);
        if let Some(guard) = &query.expressions.condition_expression {
            let image = pos.map_or_else(Item::new, |p| entry.items[p].clone());
            if !evaluate_condition(guard, &query.expressions, &image)? {
                return Err(ExecutorError::condition_failed("put guard rejected the write"));
            }
        }
        match pos {
            Some(p) => entry.items[p] = query.item.clone(),
            None => entry.items.push(query.item.clone()),
        }
        Ok(())
    }

    fn run_update(&self, query: &CompiledQuery) -> Result<UpdateResult, ExecutorError> {
        let mut tables = self.tables.lock();
        let entry = tables
            .get_mut(&query.table_name)
            .ok_or_else(|| not_found(&query.table_name))?;
        if !entry.key.covered_by(&query.key) {
            return Err(validation("update key does not cover the table key"));
        }
        let pos = position_of(&entry.key, &entry.items, &query.key);
        let prior = pos.map(|p| entry.items[p].clone());
        if let Some(guard) = &query.expressions.condition_expression {
            // A missing item presents an empty image to the guard.
            let image = prior.clone().unwrap_or_default();
            if !evaluate_condition(guard, &query.expressions, &image)? {
                return Err(ExecutorError::condition_failed(
                    "update guard rejected the write",
                ));
            }
        }
        let mut updated = prior.clone().unwrap_or_else(|| query.key.clone());
        let touched = match &query.expressions.update_expression {
            Some(expr) => apply_update(&mut updated, expr, &query.expressions)?,
            None => Vec::new(),
        };
        match pos {
            Some(p) => entry.items[p] = updated.clone(),
            None => entry.items.push(updated.clone()),
        }
        let attributes = match query.return_values.unwrap_or_default() {
            ReturnValues::None => Item::new(),
            ReturnValues::AllOld => prior.unwrap_or_default(),
            ReturnValues::UpdatedOld => restrict(&prior.unwrap_or_default(), &touched),
            ReturnValues::AllNew => updated,
            ReturnValues::UpdatedNew => restrict(&updated, &touched),
        };
        Ok(UpdateResult { attributes })
    }

    fn run_delete(&self, query: &CompiledQuery) -> Result<(), ExecutorError> {
        let mut tables = self.tables.lock();
        let entry = tables
            .get_mut(&query.table_name)
            .ok_or_else(|| not_found(&query.table_name))?;
        let pos = position_of(&entry.key, &entry.items, &query.key);
        if let Some(guard) = &query.expressions.condition_expression {
            let image = pos.map_or_else(Item::new, |p| entry.items[p].clone());
            if !evaluate_condition(guard, &query.expressions, &image)? {
                return Err(ExecutorError::condition_failed(
                    "delete guard rejected the write",
                ));
            }
        }
        if let Some(p) = pos {
            entry.items.remove(p);
        }
        Ok(())
    }
}

#[async_trait]
impl Executor for MemoryExecutor {
    async fn execute_query(&self, query: &CompiledQuery) -> Result<QueryResult, ExecutorError> {
        self.take_failure()?;
        self.run_read(query, None, None)
    }

    async fn execute_scan(&self, query: &CompiledQuery) -> Result<QueryResult, ExecutorError> {
        self.take_failure()?;
        self.run_read(query, None, None)
    }

    async fn execute_put_item(&self, query: &CompiledQuery) -> Result<(), ExecutorError> {
        self.take_failure()?;
        self.run_put(query)
    }

    async fn execute_update_item(&self, query: &CompiledQuery) -> Result<(), ExecutorError> {
        self.take_failure()?;
        self.run_update(query).map(|_| ())
    }

    async fn execute_update_item_with_result(
        &self,
        query: &CompiledQuery,
    ) -> Result<UpdateResult, ExecutorError> {
        self.take_failure()?;
        self.run_update(query)
    }

    async fn execute_delete_item(&self, query: &CompiledQuery) -> Result<(), ExecutorError> {
        self.take_failure()?;
        self.run_delete(query)
    }

    async fn execute_query_with_pagination(
        &self,
        query: &CompiledQuery,
        limit: Option<i32>,
        start_key: Option<Key>,
    ) -> Result<QueryResult, ExecutorError> {
        self.take_failure()?;
        self.run_read(query, limit, start_key)
    }

    async fn execute_scan_with_pagination(
        &self,
        query: &CompiledQuery,
        limit: Option<i32>,
        start_key: Option<Key>,
    ) -> Result<QueryResult, ExecutorError> {
        self.take_failure()?;
        self.run_read(query, limit, start_key)
    }

    async fn execute_batch_get(
        &self,
        request: &CompiledBatchGet,
    ) -> Result<BatchGetResult, ExecutorError> {
        self.get_calls.fetch_add(1, AtomicOrdering::Relaxed);
        self.take_failure()?;
        let serve = {
            let taken = self.unprocessed_gets.lock().take();
            taken.map_or(request.keys.len(), |n| request.keys.len().saturating_sub(n))
        };
        let tables = self.tables.lock();
        let entry = tables
            .get(&request.table_name)
            .ok_or_else(|| not_found(&request.table_name))?;
        let mut found = Vec::new();
        for key in &request.keys[..serve] {
            if let Some(pos) = position_of(&entry.key, &entry.items, key) {
                found.push(entry.items[pos].clone());
            }
        }
        let mut result = BatchGetResult::default();
        result.responses.insert(request.table_name.clone(), found);
        if serve < request.keys.len() {
            result
                .unprocessed_keys
                .insert(request.table_name.clone(), KeysAndAttributes {
                    keys: request.keys[serve..].to_vec(),
                    ..KeysAndAttributes::default()
                });
        }
        Ok(result)
    }

    async fn execute_batch_write(
        &self,
        table: &str,
        writes: &[WriteRequest],
    ) -> Result<BatchWriteResult, ExecutorError> {
        self.write_calls.fetch_add(1, AtomicOrdering::Relaxed);
        self.take_failure()?;
        debug!(table, writes = writes.len(), "batch write");
        let keep = {
            let taken = self.unprocessed_writes.lock().take();
            taken.map_or(writes.len(), |n| writes.len().saturating_sub(n))
        };
        let mut tables = self.tables.lock();
        let entry = tables.get_mut(table).ok_or_else(|| not_found(table))?;
        for write in &writes[..keep] {
            if let Some(put) = &write.put_request {
                let key = project_key(&entry.key, &put.item)
                    .ok_or_else(|| validation("put item does not cover the table key"))?;
                match position_of(&entry.key, &entry.items, &key) {
                    Some(pos) => entry.items[pos] = put.item.clone(),
                    None => entry.items.push(put.item.clone()),
                }
            }
            if let Some(delete) = &write.delete_request {
                entry
                    .items
                    .retain(|item| project_key(&entry.key, item).as_ref() != Some(&delete.key));
            }
        }
        let mut result = BatchWriteResult::default();
        if keep < writes.len() {
            result
                .unprocessed_items
                .insert(table.to_owned(), writes[keep..].to_vec());
        }
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Condition evaluation
// ---------------------------------------------------------------------------

fn evaluate_condition(
    expression: &str,
    components: &ExpressionComponents,
    item: &Item,
) -> Result<bool, ExecutorError> {
    let tokens = tokenize(expression);
    let mut parser = ConditionParser {
        tokens: &tokens,
        pos: 0,
        components,
        item,
    };
    let matched = parser.disjunction()?;
    if parser.pos != tokens.len() {
        return Err(validation(format!("trailing tokens in expression {expression}")));
    }
    Ok(matched)
}

fn tokenize(expression: &str) -> Vec<String> {
    expression
        .replace('(', " ( ")
        .replace(')', " ) ")
        .replace(',', " , ")
        .split_whitespace()
        .map(str::to_owned)
        .collect()
}

/// Recursive-descent evaluator over tokenized condition text.
///
/// AND binds tighter than OR; BETWEEN consumes its own AND.
struct ConditionParser<'a> {
    tokens: &'a [String],
    pos: usize,
    components: &'a ExpressionComponents,
    item: &'a Item,
}

impl<'a> ConditionParser<'a> {
    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn next(&mut self) -> Result<&'a str, ExecutorError> {
        let token = self
            .tokens
            .get(self.pos)
            .ok_or_else(|| validation("unexpected end of expression"))?;
        self.pos += 1;
        Ok(token.as_str())
    }

    fn expect(&mut self, expected: &str) -> Result<(), ExecutorError> {
        let token = self.next()?;
        if token == expected {
            Ok(())
        } else {
            Err(validation(format!("expected {expected}, found {token}")))
        }
    }

    fn disjunction(&mut self) -> Result<bool, ExecutorError> {
        let mut result = self.conjunction()?;
        while self.peek() == Some("OR") {
            self.pos += 1;
            let rhs = self.conjunction()?;
            result = result || rhs;
        }
        Ok(result)
    }

    fn conjunction(&mut self) -> Result<bool, ExecutorError> {
        let mut result = self.term()?;
        while self.peek() == Some("AND") {
            self.pos += 1;
            let rhs = self.term()?;
            result = result && rhs;
        }
        Ok(result)
    }

    fn term(&mut self) -> Result<bool, ExecutorError> {
        let token = self.next()?;
        match token {
            "(" => {
                let inner = self.disjunction()?;
                self.expect(")")?;
                Ok(inner)
            }
            "attribute_exists" => {
                self.expect("(")?;
                let path = self.next()?;
                self.expect(")")?;
                Ok(self.resolve_path(path)?.is_some())
            }
            "attribute_not_exists" => {
                self.expect("(")?;
                let path = self.next()?;
                self.expect(")")?;
                Ok(self.resolve_path(path)?.is_none())
            }
            "begins_with" => {
                let (lhs, rhs) = self.path_value_args()?;
                Ok(match (lhs.as_ref().and_then(AttributeValue::as_s), rhs.as_s()) {
                    (Some(value), Some(prefix)) => value.starts_with(prefix),
                    _ => false,
                })
            }
            "contains" => {
                let (lhs, rhs) = self.path_value_args()?;
                Ok(lhs.as_ref().is_some_and(|value| contains_value(value, &rhs)))
            }
            path => self.comparison(path),
        }
    }

    fn path_value_args(&mut self) -> Result<(Option<AttributeValue>, AttributeValue), ExecutorError> {
        self.expect("(")?;
        let path = self.next()?;
        let lhs = self.resolve_path(path)?;
        self.expect(",")?;
        let token = self.next()?;
        let rhs = self.resolve_value(token)?;
        self.expect(")")?;
        Ok((lhs, rhs))
    }

    fn comparison(&mut self, path: &str) -> Result<bool, ExecutorError> {
        let lhs = self.resolve_path(path)?;
        let op = self.next()?;
        match op {
            "=" | "<" | "<=" | ">" | ">=" => {
                let token = self.next()?;
                let rhs = self.resolve_value(token)?;
                Ok(compare(op, lhs.as_ref(), &rhs))
            }
            "BETWEEN" => {
                let token = self.next()?;
                let low = self.resolve_value(token)?;
                self.expect("AND")?;
                let token = self.next()?;
                let high = self.resolve_value(token)?;
                Ok(compare(">=", lhs.as_ref(), &low) && compare("<=", lhs.as_ref(), &high))
            }
            "IN" => {
                self.expect("(")?;
                let mut found = false;
                loop {
                    let token = self.next()?;
                    let value = self.resolve_value(token)?;
                    if lhs.as_ref() == Some(&value) {
                        found = true;
                    }
                    match self.next()? {
                        "," => {}
                        ")" => break,
                        other => {
                            return Err(validation(format!("unexpected {other} in IN list")));
                        }
                    }
                }
                Ok(found)
            }
            other => Err(validation(format!("unknown operator {other}"))),
        }
    }

    fn resolve_value(&self, token: &str) -> Result<AttributeValue, ExecutorError> {
        self.components
            .expression_attribute_values
            .get(token)
            .cloned()
            .ok_or_else(|| validation(format!("unbound value placeholder {token}")))
    }

    fn resolve_path(&self, token: &str) -> Result<Option<AttributeValue>, ExecutorError> {
        let mut current: Option<AttributeValue> = None;
        for (depth, segment) in token.split('.').enumerate() {
            let (name, indexes) = split_segment(segment)?;
            let wire = self
                .components
                .expression_attribute_names
                .get(name)
                .ok_or_else(|| validation(format!("unbound name placeholder {name}")))?;
            let mut value = if depth == 0 {
                self.item.get(wire).cloned()
            } else {
                current
                    .as_ref()
                    .and_then(AttributeValue::as_m)
                    .and_then(|m| m.get(wire))
                    .cloned()
            };
            for index in indexes {
                value = value
                    .as_ref()
                    .and_then(AttributeValue::as_l)
                    .and_then(|l| l.get(index))
                    .cloned();
            }
            current = value;
        }
        Ok(current)
    }
}

fn compare(op: &str, lhs: Option<&AttributeValue>, rhs: &AttributeValue) -> bool {
    match op {
        "=" => lhs == Some(rhs),
        "<" => ordering_of(lhs, rhs) == Some(Ordering::Less),
        "<=" => matches!(ordering_of(lhs, rhs), Some(Ordering::Less | Ordering::Equal)),
        ">" => ordering_of(lhs, rhs) == Some(Ordering::Greater),
        ">=" => matches!(ordering_of(lhs, rhs), Some(Ordering::Greater | Ordering::Equal)),
        _ => false,
    }
}

fn ordering_of(lhs: Option<&AttributeValue>, rhs: &AttributeValue) -> Option<Ordering> {
    match (lhs?, rhs) {
        (AttributeValue::N(a), AttributeValue::N(b)) => {
            let a: f64 = a.parse().ok()?;
            let b: f64 = b.parse().ok()?;
            a.partial_cmp(&b)
        }
        (AttributeValue::S(a), AttributeValue::S(b)) => Some(a.as_str().cmp(b.as_str())),
        _ => None,
    }
}

fn compare_sort_values(a: Option<&AttributeValue>, b: Option<&AttributeValue>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => ordering_of(Some(a), b).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

fn contains_value(haystack: &AttributeValue, needle: &AttributeValue) -> bool {
    match haystack {
        AttributeValue::S(s) => needle.as_s().is_some_and(|n| s.contains(n)),
        AttributeValue::Ss(set) => needle.as_s().is_some_and(|n| set.iter().any(|e| e == n)),
        AttributeValue::Ns(set) => needle.as_n().is_some_and(|n| set.iter().any(|e| e == n)),
        AttributeValue::L(list) => list.contains(needle),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Update application
// ---------------------------------------------------------------------------

/// Applies an update expression in place, returning the touched wire names.
fn apply_update(
    item: &mut Item,
    expression: &str,
    components: &ExpressionComponents,
) -> Result<Vec<String>, ExecutorError> {
    let tokens = tokenize(expression);
    let mut touched = Vec::new();
    let mut pos = 0;
    while pos < tokens.len() {
        let section = tokens[pos].clone();
        pos += 1;
        let clauses = collect_clauses(&tokens, &mut pos);
        for clause in &clauses {
            match section.as_str() {
                "SET" => apply_set(item, clause, components, &mut touched)?,
                "ADD" => apply_add(item, clause, components, &mut touched)?,
                "REMOVE" => apply_remove(item, clause, components, &mut touched)?,
                "DELETE" => apply_delete(item, clause, components, &mut touched)?,
                other => return Err(validation(format!("unknown update section {other}"))),
            }
        }
    }
    Ok(touched)
}

/// Collects one section's clauses, split on depth-zero commas, stopping
/// at the next section keyword.
fn collect_clauses(tokens: &[String], pos: &mut usize) -> Vec<Vec<String>> {
    let mut clauses = Vec::new();
    let mut current = Vec::new();
    let mut depth = 0i32;
    while *pos < tokens.len() {
        let token = tokens[*pos].as_str();
        if depth == 0 && matches!(token, "SET" | "ADD" | "REMOVE" | "DELETE") {
            break;
        }
        *pos += 1;
        match token {
            "(" => {
                depth += 1;
                current.push(token.to_owned());
            }
            ")" => {
                depth -= 1;
                current.push(token.to_owned());
            }
            "," if depth == 0 => clauses.push(std::mem::take(&mut current)),
            _ => current.push(token.to_owned()),
        }
    }
    if !current.is_empty() {
        clauses.push(current);
    }
    clauses
}

struct UpdatePath {
    wire: String,
    index: Option<usize>,
}

fn update_path(token: &str, components: &ExpressionComponents) -> Result<UpdatePath, ExecutorError> {
    if token.contains('.') {
        return Err(validation("nested update paths are not modeled"));
    }
    let (name, indexes) = split_segment(token)?;
    if indexes.len() > 1 {
        return Err(validation(format!("multiple list indexes in {token}")));
    }
    let wire = components
        .expression_attribute_names
        .get(name)
        .ok_or_else(|| validation(format!("unbound name placeholder {name}")))?
        .clone();
    Ok(UpdatePath {
        wire,
        index: indexes.first().copied(),
    })
}

fn read_path(item: &Item, path: &UpdatePath) -> Option<AttributeValue> {
    let value = item.get(&path.wire)?;
    match path.index {
        Some(index) => value.as_l()?.get(index).cloned(),
        None => Some(value.clone()),
    }
}

fn write_path(item: &mut Item, path: &UpdatePath, value: AttributeValue) -> Result<(), ExecutorError> {
    match path.index {
        Some(index) => {
            let Some(AttributeValue::L(list)) = item.get_mut(&path.wire) else {
                return Err(validation(format!("{} is not a list", path.wire)));
            };
            let Some(slot) = list.get_mut(index) else {
                return Err(validation(format!("index {index} out of bounds on {}", path.wire)));
            };
            *slot = value;
        }
        None => {
            item.insert(path.wire.clone(), value);
        }
    }
    Ok(())
}

fn operand_value(
    item: &Item,
    token: &str,
    components: &ExpressionComponents,
) -> Result<Option<AttributeValue>, ExecutorError> {
    if token.starts_with(':') {
        let value = components
            .expression_attribute_values
            .get(token)
            .ok_or_else(|| validation(format!("unbound value placeholder {token}")))?;
        return Ok(Some(value.clone()));
    }
    let path = update_path(token, components)?;
    Ok(read_path(item, &path))
}

fn operand_list(
    item: &Item,
    token: &str,
    components: &ExpressionComponents,
) -> Result<Vec<AttributeValue>, ExecutorError> {
    match operand_value(item, token, components)? {
        Some(AttributeValue::L(list)) => Ok(list),
        Some(_) => Err(validation("list_append operand is not a list")),
        None => Ok(Vec::new()),
    }
}

fn apply_set(
    item: &mut Item,
    clause: &[String],
    components: &ExpressionComponents,
    touched: &mut Vec<String>,
) -> Result<(), ExecutorError> {
    if clause.len() < 3 || clause[1] != "=" {
        return Err(validation("malformed SET clause"));
    }
    let target = update_path(&clause[0], components)?;
    let rhs: Vec<&str> = clause[2..].iter().map(String::as_str).collect();
    let value = match rhs.as_slice() {
        [operand] => operand_value(item, operand, components)?
            .ok_or_else(|| validation("SET operand resolves to nothing"))?,
        ["if_not_exists", "(", fallback, ",", operand, ")"] => {
            match operand_value(item, fallback, components)? {
                Some(existing) => existing,
                None => operand_value(item, operand, components)?
                    .ok_or_else(|| validation("if_not_exists fallback resolves to nothing"))?,
            }
        }
        ["list_append", "(", first, ",", second, ")"] => {
            let mut list = operand_list(item, first, components)?;
            list.extend(operand_list(item, second, components)?);
            AttributeValue::L(list)
        }
        [a, "+", b] => {
            let lhs = operand_value(item, a, components)?;
            let addend = operand_value(item, b, components)?;
            add_numbers(lhs.as_ref(), addend.as_ref(), false)?
        }
        [a, "-", b] => {
            let lhs = operand_value(item, a, components)?;
            let subtrahend = operand_value(item, b, components)?;
            add_numbers(lhs.as_ref(), subtrahend.as_ref(), true)?
        }
        _ => return Err(validation("unrecognized SET operand form")),
    };
    write_path(item, &target, value)?;
    touched.push(target.wire);
    Ok(())
}

fn apply_add(
    item: &mut Item,
    clause: &[String],
    components: &ExpressionComponents,
    touched: &mut Vec<String>,
) -> Result<(), ExecutorError> {
    let [path_token, value_token] = clause else {
        return Err(validation("malformed ADD clause"));
    };
    let path = update_path(path_token, components)?;
    if path.index.is_some() {
        return Err(validation("ADD cannot target a list element"));
    }
    let value = components
        .expression_attribute_values
        .get(value_token.as_str())
        .ok_or_else(|| validation(format!("unbound value placeholder {value_token}")))?;
    let current = item.get(&path.wire).cloned();
    let merged = match current {
        None => value.clone(),
        Some(n @ AttributeValue::N(_)) => add_numbers(Some(&n), Some(value), false)?,
        Some(AttributeValue::Ss(existing)) => {
            let Some(incoming) = value.as_ss() else {
                return Err(validation("ADD operand must match the set type"));
            };
            let mut merged = existing;
            for elem in incoming {
                if !merged.iter().any(|e| e == elem) {
                    merged.push(elem.clone());
                }
            }
            AttributeValue::Ss(merged)
        }
        Some(AttributeValue::Ns(existing)) => {
            let AttributeValue::Ns(incoming) = value else {
                return Err(validation("ADD operand must match the set type"));
            };
            let mut merged = existing;
            for elem in incoming {
                if !merged.iter().any(|e| e == elem) {
                    merged.push(elem.clone());
                }
            }
            AttributeValue::Ns(merged)
        }
        Some(_) => return Err(validation("ADD targets numbers and sets")),
    };
    item.insert(path.wire.clone(), merged);
    touched.push(path.wire);
    Ok(())
}

fn apply_remove(
    item: &mut Item,
    clause: &[String],
    components: &ExpressionComponents,
    touched: &mut Vec<String>,
) -> Result<(), ExecutorError> {
    let [path_token] = clause else {
        return Err(validation("malformed REMOVE clause"));
    };
    let path = update_path(path_token, components)?;
    match path.index {
        Some(index) => {
            if let Some(AttributeValue::L(list)) = item.get_mut(&path.wire) {
                if index < list.len() {
                    list.remove(index);
                }
            }
        }
        None => {
            item.remove(&path.wire);
        }
    }
    touched.push(path.wire);
    Ok(())
}

fn apply_delete(
    item: &mut Item,
    clause: &[String],
    components: &ExpressionComponents,
    touched: &mut Vec<String>,
) -> Result<(), ExecutorError> {
    let [path_token, value_token] = clause else {
        return Err(validation("malformed DELETE clause"));
    };
    let path = update_path(path_token, components)?;
    let value = components
        .expression_attribute_values
        .get(value_token.as_str())
        .ok_or_else(|| validation(format!("unbound value placeholder {value_token}")))?;
    let current = item.get(&path.wire).cloned();
    match (current, value) {
        (Some(AttributeValue::Ss(existing)), AttributeValue::Ss(remove)) => {
            let remaining: Vec<String> =
                existing.into_iter().filter(|e| !remove.contains(e)).collect();
            // An emptied set disappears rather than lingering empty.
            if remaining.is_empty() {
                item.remove(&path.wire);
            } else {
                item.insert(path.wire.clone(), AttributeValue::Ss(remaining));
            }
        }
        (Some(AttributeValue::Ns(existing)), AttributeValue::Ns(remove)) => {
            let remaining: Vec<String> =
                existing.into_iter().filter(|e| !remove.contains(e)).collect();
            if remaining.is_empty() {
                item.remove(&path.wire);
            } else {
                item.insert(path.wire.clone(), AttributeValue::Ns(remaining));
            }
        }
        (None, _) => {}
        _ => return Err(validation("DELETE targets string and number sets")),
    }
    touched.push(path.wire);
    Ok(())
}

fn add_numbers(
    lhs: Option<&AttributeValue>,
    rhs: Option<&AttributeValue>,
    subtract: bool,
) -> Result<AttributeValue, ExecutorError> {
    let (Some(lhs), Some(rhs)) = (
        lhs.and_then(AttributeValue::as_n),
        rhs.and_then(AttributeValue::as_n),
    ) else {
        return Err(validation("arithmetic needs two numeric operands"));
    };
    if let (Ok(a), Ok(b)) = (lhs.parse::<i64>(), rhs.parse::<i64>()) {
        return Ok(AttributeValue::number(if subtract { a - b } else { a + b }));
    }
    let a: f64 = lhs
        .parse()
        .map_err(|_| validation(format!("{lhs} is not numeric")))?;
    let b: f64 = rhs
        .parse()
        .map_err(|_| validation(format!("{rhs} is not numeric")))?;
    Ok(AttributeValue::number(if subtract { a - b } else { a + b }))
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn split_segment(segment: &str) -> Result<(&str, Vec<usize>), ExecutorError> {
    let Some(start) = segment.find('[') else {
        return Ok((segment, Vec::new()));
    };
    let (name, rest) = segment.split_at(start);
    let mut indexes = Vec::new();
    for part in rest.split('[').skip(1) {
        let index = part
            .strip_suffix(']')
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| validation(format!("bad list index in {segment}")))?;
        indexes.push(index);
    }
    Ok((name, indexes))
}

fn projection_wires(
    expression: &str,
    components: &ExpressionComponents,
) -> Result<Vec<String>, ExecutorError> {
    let mut wires = Vec::new();
    for part in expression.split(',') {
        let name = part.trim();
        let wire = components
            .expression_attribute_names
            .get(name)
            .ok_or_else(|| validation(format!("unbound name placeholder {name}")))?;
        wires.push(wire.clone());
    }
    Ok(wires)
}

fn project_key(schema: &KeySchema, item: &Item) -> Option<Key> {
    let mut key = Key::new();
    key.insert(
        schema.partition_key.clone(),
        item.get(&schema.partition_key)?.clone(),
    );
    if let Some(sort) = &schema.sort_key {
        key.insert(sort.clone(), item.get(sort)?.clone());
    }
    Some(key)
}

fn position_of(schema: &KeySchema, items: &[Item], key: &Key) -> Option<usize> {
    items
        .iter()
        .position(|item| project_key(schema, item).as_ref() == Some(key))
}

fn restrict(image: &Item, touched: &[String]) -> Item {
    touched
        .iter()
        .filter_map(|name| image.get(name).map(|v| (name.clone(), v.clone())))
        .collect()
}

fn not_found(target: &str) -> ExecutorError {
    ExecutorError::new(ExecutorErrorKind::NotFound, format!("{target} does not exist"))
}

fn validation(message: impl Into<String>) -> ExecutorError {
    ExecutorError::new(ExecutorErrorKind::Validation, message)
}
