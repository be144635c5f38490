//! # IR Executor
//!
//! Executes compiled programs against a [`GraphEngine`], producing ordered
//! [`Record`]s. The executor operates on a stream of rows (variable →
//! value); missing variables and missing properties resolve to null rather
//! than raising, so ordering and projection never fail on absent data.
//!
//! Writes are buffered on the supplied [`Transaction`] as WAL operations —
//! the executor materializes created entities in its row stream so
//! `CREATE ... RETURN` works, but nothing touches the engine until commit.
//! Without a transaction, writes are applied to the engine immediately.
//!
//! A pipeline failure never escapes `run_pipeline`: the result still
//! materializes, with the failing stage recorded in its [`Summary`].

use std::collections::HashMap;

use serde::Serialize;
use smallvec::SmallVec;
use tracing::debug;
use uuid::Uuid;

use crate::cypher::ast::{BinaryOp, Expr, Literal, UnaryOp};
use crate::cypher::ir::{IrOp, IrProgram};
use crate::engine::GraphEngine;
use crate::model::{Direction, Node, NodeId, PropertyMap, RelId, Relationship, Value};
use crate::tx::Transaction;
use crate::wal::Operation;
use crate::{Error, Result, Stage};

// ============================================================================
// Record
// ============================================================================

/// A single row of a query result: a (keys, values) pair with explicit
/// accessors. Column order is preserved.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    keys: Vec<String>,
    values: Vec<Value>,
}

impl Record {
    pub fn new(keys: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(keys.len(), values.len());
        Self { keys, values }
    }

    /// Value by column name; `None` for an unknown column.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.keys
            .iter()
            .position(|k| k == key)
            .map(|i| &self.values[i])
    }

    /// Value by column name, null for an unknown column.
    pub fn get_or_null(&self, key: &str) -> &Value {
        self.get(key).unwrap_or(&Value::Null)
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn data(&self) -> HashMap<String, Value> {
        self.keys
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }
}

impl std::ops::Index<usize> for Record {
    type Output = Value;
    fn index(&self, index: usize) -> &Value {
        &self.values[index]
    }
}

impl std::ops::Index<&str> for Record {
    type Output = Value;
    fn index(&self, key: &str) -> &Value {
        self.get(key)
            .unwrap_or_else(|| panic!("no column '{key}' in record"))
    }
}

// ============================================================================
// Summary / QueryResult
// ============================================================================

/// Execution summary attached to every result. Pipeline failures are
/// reported here, with the stage that failed.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub query: String,
    pub query_type: Option<String>,
    pub records_returned: usize,
    pub ir_operations: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_stage: Option<Stage>,
}

/// An ordered sequence of records plus its summary.
#[derive(Debug, Clone)]
pub struct QueryResult {
    records: Vec<Record>,
    summary: Summary,
}

impl QueryResult {
    pub fn new(records: Vec<Record>, mut summary: Summary) -> Self {
        summary.records_returned = records.len();
        Self { records, summary }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    pub fn is_err(&self) -> bool {
        self.summary.error.is_some()
    }

    /// The sole record of the result.
    pub fn single(&self) -> Result<&Record> {
        match self.records.len() {
            1 => Ok(&self.records[0]),
            n => Err(Error::Execution(format!(
                "expected exactly one record, got {n}"
            ))),
        }
    }

    /// Materialize all records as column-name → value maps.
    pub fn data(&self) -> Vec<HashMap<String, Value>> {
        self.records.iter().map(Record::data).collect()
    }
}

impl IntoIterator for QueryResult {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;
    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a QueryResult {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;
    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

// ============================================================================
// Pipeline entry
// ============================================================================

/// Parse, compile, and execute a query. Failures never raise out of band:
/// the result carries the error and its stage in the summary.
pub fn run_pipeline(
    engine: &GraphEngine,
    txn: Option<&mut Transaction>,
    query: &str,
    params: &PropertyMap,
) -> QueryResult {
    run_pipeline_with_deadline(engine, txn, query, params, None)
}

/// [`run_pipeline`] with a cooperative deadline, checked between IR stages.
/// Expiry surfaces as a query-timeout error in the summary; an in-flight
/// stage is allowed to complete.
pub fn run_pipeline_with_deadline(
    engine: &GraphEngine,
    txn: Option<&mut Transaction>,
    query: &str,
    params: &PropertyMap,
    deadline: Option<std::time::Instant>,
) -> QueryResult {
    let mut summary = Summary {
        query: query.to_owned(),
        query_type: None,
        records_returned: 0,
        ir_operations: 0,
        error: None,
        error_stage: None,
    };

    let stmt = match crate::cypher::parse(query) {
        Ok(stmt) => stmt,
        Err(e) => {
            summary.error = Some(e.to_string());
            summary.error_stage = Some(Stage::Parse);
            return QueryResult::new(Vec::new(), summary);
        }
    };

    let program = match crate::cypher::compiler::compile(&stmt) {
        Ok(program) => program,
        Err(e) => {
            summary.error = Some(e.to_string());
            summary.error_stage = Some(Stage::Compile);
            return QueryResult::new(Vec::new(), summary);
        }
    };
    summary.query_type = Some(program.query_type.as_str().to_owned());
    summary.ir_operations = program.ops.len();

    let mut executor = Executor {
        engine,
        txn,
        params,
        columns: None,
        deadline,
    };
    match executor.run(&program) {
        Ok(records) => QueryResult::new(records, summary),
        Err(e) => {
            summary.error = Some(e.to_string());
            summary.error_stage = Some(Stage::Execute);
            QueryResult::new(Vec::new(), summary)
        }
    }
}

/// Execute a compiled program. Surfaced errors belong to the execute stage.
pub fn execute_program(
    engine: &GraphEngine,
    txn: Option<&mut Transaction>,
    program: &IrProgram,
    params: &PropertyMap,
) -> Result<Vec<Record>> {
    let mut executor = Executor {
        engine,
        txn,
        params,
        columns: None,
        deadline: None,
    };
    executor.run(program)
}

// ============================================================================
// Executor
// ============================================================================

type Row = HashMap<String, Value>;

struct Executor<'a> {
    engine: &'a GraphEngine,
    txn: Option<&'a mut Transaction>,
    params: &'a PropertyMap,
    columns: Option<Vec<String>>,
    deadline: Option<std::time::Instant>,
}

impl<'a> Executor<'a> {
    fn run(&mut self, program: &IrProgram) -> Result<Vec<Record>> {
        let mut rows: Vec<Row> = vec![Row::new()];
        for op in &program.ops {
            if let Some(deadline) = self.deadline {
                if std::time::Instant::now() >= deadline {
                    return Err(Error::QueryTimeout(
                        "query deadline exceeded between pipeline stages".into(),
                    ));
                }
            }
            rows = self.apply(op, rows)?;
        }
        debug!(rows = rows.len(), "program executed");

        let Some(columns) = self.columns.clone() else {
            return Ok(Vec::new());
        };
        Ok(rows
            .into_iter()
            .map(|row| {
                let values = columns
                    .iter()
                    .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                    .collect();
                Record::new(columns.clone(), values)
            })
            .collect())
    }

    /// Buffer a write on the transaction, or apply it directly when running
    /// without one.
    fn stage(&mut self, op: Operation) -> Result<()> {
        match &mut self.txn {
            Some(txn) => txn.record(op),
            None => self.engine.apply_operation(&op).map(|_| ()),
        }
    }

    fn apply(&mut self, op: &IrOp, rows: Vec<Row>) -> Result<Vec<Row>> {
        match op {
            IrOp::ScanNodes {
                variable,
                labels,
                properties,
            } => {
                let mut out = Vec::new();
                for row in rows {
                    let props = self.eval_property_map(properties, &row)?;
                    let matches = self.engine.find_nodes(
                        if labels.is_empty() { None } else { Some(labels) },
                        if props.is_empty() { None } else { Some(&props) },
                        None,
                    );
                    for node in matches {
                        // A re-used variable joins instead of rebinding.
                        if let Some(Value::Node(bound)) = row.get(variable) {
                            if bound.id == node.id {
                                out.push(row.clone());
                            }
                            continue;
                        }
                        let mut next = row.clone();
                        next.insert(variable.clone(), Value::Node(Box::new(node)));
                        out.push(next);
                    }
                }
                Ok(out)
            }

            IrOp::Expand {
                from,
                rel_variable,
                rel_types,
                rel_properties,
                direction,
                to,
                to_labels,
                to_properties,
            } => {
                let mut out = Vec::new();
                for row in rows {
                    let Some(Value::Node(from_node)) = row.get(from) else {
                        continue;
                    };
                    let from_node = from_node.clone();
                    let rel_props = self.eval_property_map(rel_properties, &row)?;
                    let to_props = self.eval_property_map(to_properties, &row)?;

                    for rel in self.engine.get_relationships(&from_node.id, *direction, None) {
                        if !rel_types.is_empty() && !rel_types.contains(&rel.rel_type) {
                            continue;
                        }
                        if !rel_props.iter().all(|(k, v)| rel.get(k) == Some(v)) {
                            continue;
                        }
                        let target_id = match direction {
                            Direction::Outgoing => rel.end_node.clone(),
                            Direction::Incoming => rel.start_node.clone(),
                            Direction::Both => match rel.other_node(&from_node.id) {
                                Some(id) => id.clone(),
                                None => continue,
                            },
                        };
                        // Orphan relationship: target gone, branch ends.
                        let Some(target) = self.engine.get_node(&target_id) else {
                            continue;
                        };
                        if !to_labels.iter().all(|l| target.has_label(l)) {
                            continue;
                        }
                        if !to_props.iter().all(|(k, v)| target.get(k) == Some(v)) {
                            continue;
                        }

                        let mut next = row.clone();
                        if let Some(Value::Node(bound)) = row.get(to) {
                            if bound.id != target.id {
                                continue;
                            }
                        } else {
                            next.insert(to.clone(), Value::Node(Box::new(target)));
                        }
                        if let Some(var) = rel_variable {
                            next.insert(var.clone(), Value::Relationship(Box::new(rel)));
                        }
                        out.push(next);
                    }
                }
                Ok(out)
            }

            IrOp::Filter { predicate } => {
                let mut out = Vec::new();
                for row in rows {
                    if self.eval(predicate, &row)?.is_truthy() {
                        out.push(row);
                    }
                }
                Ok(out)
            }

            IrOp::CreateNode {
                variable,
                labels,
                properties,
            } => {
                let mut out = Vec::new();
                for mut row in rows {
                    let props = self.eval_property_map(properties, &row)?;
                    let node = Node {
                        id: NodeId(format!("node-{}", short_hex())),
                        labels: labels.clone(),
                        properties: props,
                    };
                    self.stage(Operation::write_node(&node))?;
                    row.insert(variable.clone(), Value::Node(Box::new(node)));
                    out.push(row);
                }
                Ok(out)
            }

            IrOp::CreateRel {
                variable,
                from,
                to,
                rel_type,
                properties,
            } => {
                let mut out = Vec::new();
                for mut row in rows {
                    let start = match row.get(from) {
                        Some(Value::Node(n)) => n.id.clone(),
                        _ => {
                            return Err(Error::Execution(format!(
                                "cannot resolve relationship endpoint '{from}'"
                            )))
                        }
                    };
                    let end = match row.get(to) {
                        Some(Value::Node(n)) => n.id.clone(),
                        _ => {
                            return Err(Error::Execution(format!(
                                "cannot resolve relationship endpoint '{to}'"
                            )))
                        }
                    };
                    let props = self.eval_property_map(properties, &row)?;
                    let rel = Relationship {
                        id: RelId(format!("rel-{}", short_hex())),
                        rel_type: rel_type.clone(),
                        start_node: start,
                        end_node: end,
                        properties: props,
                    };
                    self.stage(Operation::write_rel(&rel))?;
                    if let Some(var) = variable {
                        row.insert(var.clone(), Value::Relationship(Box::new(rel)));
                    }
                    out.push(row);
                }
                Ok(out)
            }

            IrOp::MergeNode {
                variable,
                labels,
                properties,
            } => {
                let mut out = Vec::new();
                for row in rows {
                    let props = self.eval_property_map(properties, &row)?;
                    let matches = self.engine.find_nodes(
                        if labels.is_empty() { None } else { Some(labels) },
                        if props.is_empty() { None } else { Some(&props) },
                        None,
                    );
                    if matches.is_empty() {
                        let node = Node {
                            id: NodeId(format!("node-{}", short_hex())),
                            labels: labels.clone(),
                            properties: props,
                        };
                        self.stage(Operation::write_node(&node))?;
                        let mut next = row.clone();
                        next.insert(variable.clone(), Value::Node(Box::new(node)));
                        out.push(next);
                    } else {
                        for node in matches {
                            let mut next = row.clone();
                            next.insert(variable.clone(), Value::Node(Box::new(node)));
                            out.push(next);
                        }
                    }
                }
                Ok(out)
            }

            IrOp::MergeRel {
                left_variable,
                left_labels,
                left_properties,
                rel_variable,
                rel_type,
                rel_properties,
                right_variable,
                right_labels,
                right_properties,
            } => {
                let mut out = Vec::new();
                for row in rows {
                    let left_props = self.eval_property_map(left_properties, &row)?;
                    let rel_props = self.eval_property_map(rel_properties, &row)?;
                    let right_props = self.eval_property_map(right_properties, &row)?;

                    let lefts = self.engine.find_nodes(
                        if left_labels.is_empty() { None } else { Some(left_labels) },
                        if left_props.is_empty() { None } else { Some(&left_props) },
                        None,
                    );

                    let mut matched = false;
                    for left in &lefts {
                        for rel in self.engine.get_relationships(
                            &left.id,
                            Direction::Outgoing,
                            Some(rel_type),
                        ) {
                            if !rel_props.iter().all(|(k, v)| rel.get(k) == Some(v)) {
                                continue;
                            }
                            let Some(right) = self.engine.get_node(&rel.end_node) else {
                                continue;
                            };
                            if !right_labels.iter().all(|l| right.has_label(l)) {
                                continue;
                            }
                            if !right_props.iter().all(|(k, v)| right.get(k) == Some(v)) {
                                continue;
                            }
                            matched = true;
                            let mut next = row.clone();
                            next.insert(left_variable.clone(), Value::Node(Box::new(left.clone())));
                            next.insert(right_variable.clone(), Value::Node(Box::new(right)));
                            if let Some(var) = rel_variable {
                                next.insert(var.clone(), Value::Relationship(Box::new(rel)));
                            }
                            out.push(next);
                        }
                    }

                    if !matched {
                        // Create the missing parts of the pattern.
                        let left = match lefts.into_iter().next() {
                            Some(node) => node,
                            None => {
                                let node = Node {
                                    id: NodeId(format!("node-{}", short_hex())),
                                    labels: left_labels.clone(),
                                    properties: left_props,
                                };
                                self.stage(Operation::write_node(&node))?;
                                node
                            }
                        };
                        let rights = self.engine.find_nodes(
                            if right_labels.is_empty() { None } else { Some(right_labels) },
                            if right_props.is_empty() { None } else { Some(&right_props) },
                            Some(1),
                        );
                        let right = match rights.into_iter().next() {
                            Some(node) => node,
                            None => {
                                let node = Node {
                                    id: NodeId(format!("node-{}", short_hex())),
                                    labels: right_labels.clone(),
                                    properties: right_props,
                                };
                                self.stage(Operation::write_node(&node))?;
                                node
                            }
                        };
                        let rel = Relationship {
                            id: RelId(format!("rel-{}", short_hex())),
                            rel_type: rel_type.clone(),
                            start_node: left.id.clone(),
                            end_node: right.id.clone(),
                            properties: rel_props,
                        };
                        self.stage(Operation::write_rel(&rel))?;

                        let mut next = row.clone();
                        next.insert(left_variable.clone(), Value::Node(Box::new(left)));
                        next.insert(right_variable.clone(), Value::Node(Box::new(right)));
                        if let Some(var) = rel_variable {
                            next.insert(var.clone(), Value::Relationship(Box::new(rel)));
                        }
                        out.push(next);
                    }
                }
                Ok(out)
            }

            IrOp::SetProperty {
                variable,
                key,
                value,
            } => {
                let mut out = Vec::new();
                for mut row in rows {
                    let resolved = self.eval(value, &row)?;
                    match row.get(variable) {
                        Some(Value::Node(node)) => {
                            let mut updated = (**node).clone();
                            updated.properties.insert(key.clone(), resolved);
                            self.stage(Operation::write_node(&updated))?;
                            row.insert(variable.clone(), Value::Node(Box::new(updated)));
                        }
                        Some(Value::Relationship(rel)) => {
                            let mut updated = (**rel).clone();
                            updated.properties.insert(key.clone(), resolved);
                            self.stage(Operation::write_rel(&updated))?;
                            row.insert(variable.clone(), Value::Relationship(Box::new(updated)));
                        }
                        _ => {} // SET on null is a no-op
                    }
                    out.push(row);
                }
                Ok(out)
            }

            IrOp::Delete { variables, detach } => {
                let mut deleted_nodes: std::collections::HashSet<NodeId> =
                    std::collections::HashSet::new();
                let mut deleted_rels: std::collections::HashSet<RelId> =
                    std::collections::HashSet::new();
                for row in &rows {
                    for variable in variables {
                        match row.get(variable) {
                            Some(Value::Node(node)) => {
                                if !deleted_nodes.insert(node.id.clone()) {
                                    continue;
                                }
                                let attached = self.engine.get_relationships(
                                    &node.id,
                                    Direction::Both,
                                    None,
                                );
                                if *detach {
                                    for rel in attached {
                                        if deleted_rels.insert(rel.id.clone()) {
                                            self.stage(Operation::delete_rel(&rel.id))?;
                                        }
                                    }
                                } else if !attached.is_empty() {
                                    return Err(Error::Execution(format!(
                                        "cannot delete node {} with {} relationships; use DETACH DELETE",
                                        node.id,
                                        attached.len()
                                    )));
                                }
                                self.stage(Operation::delete_node(&node.id))?;
                            }
                            Some(Value::Relationship(rel)) => {
                                if deleted_rels.insert(rel.id.clone()) {
                                    self.stage(Operation::delete_rel(&rel.id))?;
                                }
                            }
                            _ => {}
                        }
                    }
                }
                Ok(rows)
            }

            IrOp::OrderBy { keys } => {
                let mut decorated: Vec<(SmallVec<[Value; 2]>, Row)> = rows
                    .into_iter()
                    .map(|row| {
                        let key: SmallVec<[Value; 2]> = keys
                            .iter()
                            .map(|(expr, _)| self.eval(expr, &row).unwrap_or(Value::Null))
                            .collect();
                        (key, row)
                    })
                    .collect();
                decorated.sort_by(|(a, _), (b, _)| {
                    for (i, (_, ascending)) in keys.iter().enumerate() {
                        let ord = compare_with_nulls_last(&a[i], &b[i], *ascending);
                        if ord != std::cmp::Ordering::Equal {
                            return ord;
                        }
                    }
                    std::cmp::Ordering::Equal
                });
                Ok(decorated.into_iter().map(|(_, row)| row).collect())
            }

            IrOp::Skip { count } => {
                let n = self.resolve_page_count(count, "SKIP")?;
                Ok(rows.into_iter().skip(n).collect())
            }

            IrOp::Limit { count } => {
                let n = self.resolve_page_count(count, "LIMIT")?;
                Ok(rows.into_iter().take(n).collect())
            }

            IrOp::Project { items, distinct } => {
                self.columns = Some(items.iter().map(|(_, alias)| alias.clone()).collect());
                let mut out = Vec::new();
                let mut seen: Vec<Vec<String>> = Vec::new();
                for row in &rows {
                    let mut projected = Row::new();
                    for (expr, alias) in items {
                        projected.insert(alias.clone(), self.eval(expr, row)?);
                    }
                    if *distinct {
                        let key: Vec<String> = items
                            .iter()
                            .map(|(_, alias)| format!("{}", projected[alias]))
                            .collect();
                        if seen.contains(&key) {
                            continue;
                        }
                        seen.push(key);
                    }
                    out.push(projected);
                }
                Ok(out)
            }

            IrOp::Aggregate { groups, aggregates } => {
                self.columns = Some(
                    groups
                        .iter()
                        .chain(aggregates.iter())
                        .map(|(_, alias)| alias.clone())
                        .collect(),
                );

                // Group rows by the resolved grouping-key tuple, keeping
                // first-seen order.
                let mut grouped: Vec<(Vec<Value>, Vec<Row>)> = Vec::new();
                for row in rows {
                    let key: Vec<Value> = groups
                        .iter()
                        .map(|(expr, _)| self.eval(expr, &row).unwrap_or(Value::Null))
                        .collect();
                    match grouped.iter_mut().find(|(k, _)| *k == key) {
                        Some((_, bucket)) => bucket.push(row),
                        None => grouped.push((key, vec![row])),
                    }
                }
                // Every projection an aggregate: a single row, even over
                // zero input rows.
                if grouped.is_empty() && groups.is_empty() {
                    grouped.push((Vec::new(), Vec::new()));
                }

                let mut out = Vec::new();
                for (key, bucket) in grouped {
                    let mut row = Row::new();
                    for (i, (_, alias)) in groups.iter().enumerate() {
                        row.insert(alias.clone(), key[i].clone());
                    }
                    for (expr, alias) in aggregates {
                        row.insert(alias.clone(), self.compute_aggregate(expr, &bucket)?);
                    }
                    out.push(row);
                }
                Ok(out)
            }
        }
    }

    fn eval_property_map(&mut self, pairs: &[(String, Expr)], row: &Row) -> Result<PropertyMap> {
        let mut props = PropertyMap::new();
        for (key, expr) in pairs {
            props.insert(key.clone(), self.eval(expr, row)?);
        }
        Ok(props)
    }

    fn resolve_page_count(&mut self, expr: &Expr, clause: &str) -> Result<usize> {
        let value = self.eval(expr, &Row::new())?;
        match value.as_int() {
            Some(n) if n >= 0 => Ok(n as usize),
            _ => Err(Error::Execution(format!(
                "{clause} requires a non-negative integer, got {value}"
            ))),
        }
    }

    // ========================================================================
    // Expression evaluation
    // ========================================================================

    fn eval(&mut self, expr: &Expr, row: &Row) -> Result<Value> {
        match expr {
            Expr::Literal(lit) => Ok(match lit {
                Literal::Null => Value::Null,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Float(f) => Value::Float(*f),
                Literal::String(s) => Value::String(s.clone()),
            }),

            // Missing variables resolve to null, never raise.
            Expr::Variable(name) => Ok(row.get(name).cloned().unwrap_or(Value::Null)),

            Expr::Parameter(name) => self
                .params
                .get(name)
                .cloned()
                .ok_or_else(|| Error::Execution(format!("missing parameter: ${name}"))),

            // Missing properties, and property access on non-entities,
            // resolve to null.
            Expr::Property { expr, key } => {
                let value = self.eval(expr, row)?;
                Ok(match value {
                    Value::Node(n) => n.get(key).cloned().unwrap_or(Value::Null),
                    Value::Relationship(r) => r.get(key).cloned().unwrap_or(Value::Null),
                    Value::Map(m) => m.get(key).cloned().unwrap_or(Value::Null),
                    _ => Value::Null,
                })
            }

            Expr::FunctionCall { name, args, .. } => self.eval_function(name, args, row),

            Expr::BinaryOp { left, op, right } => {
                let lv = self.eval(left, row)?;
                match op {
                    BinaryOp::And => {
                        if !lv.is_truthy() {
                            return Ok(Value::Bool(false));
                        }
                        let rv = self.eval(right, row)?;
                        return Ok(Value::Bool(rv.is_truthy()));
                    }
                    BinaryOp::Or => {
                        if lv.is_truthy() {
                            return Ok(Value::Bool(true));
                        }
                        let rv = self.eval(right, row)?;
                        return Ok(Value::Bool(rv.is_truthy()));
                    }
                    _ => {}
                }
                let rv = self.eval(right, row)?;
                eval_binary_op(&lv, *op, &rv)
            }

            Expr::UnaryOp { op, expr } => {
                let value = self.eval(expr, row)?;
                match op {
                    UnaryOp::Not => Ok(match value {
                        Value::Null => Value::Null,
                        Value::Bool(b) => Value::Bool(!b),
                        other => Value::Bool(!other.is_truthy()),
                    }),
                    UnaryOp::Negate => match value {
                        Value::Int(i) => Ok(Value::Int(-i)),
                        Value::Float(f) => Ok(Value::Float(-f)),
                        Value::Null => Ok(Value::Null),
                        other => Err(Error::Execution(format!(
                            "cannot negate {}",
                            other.type_name()
                        ))),
                    },
                }
            }

            Expr::List(items) => {
                let values: Vec<Value> = items
                    .iter()
                    .map(|e| self.eval(e, row))
                    .collect::<Result<_>>()?;
                Ok(Value::List(values))
            }

            Expr::IsNull { expr, negated } => {
                let is_null = self.eval(expr, row)?.is_null();
                Ok(Value::Bool(if *negated { !is_null } else { is_null }))
            }

            Expr::In { expr, list } => {
                let item = self.eval(expr, row)?;
                let list = self.eval(list, row)?;
                match list {
                    Value::Null => Ok(Value::Null),
                    Value::List(items) => {
                        if item.is_null() {
                            Ok(Value::Null)
                        } else {
                            Ok(Value::Bool(items.iter().any(|v| values_equal(v, &item))))
                        }
                    }
                    other => Err(Error::Execution(format!(
                        "IN requires a list, got {}",
                        other.type_name()
                    ))),
                }
            }

            Expr::HasLabel { expr, label } => {
                let value = self.eval(expr, row)?;
                Ok(match value {
                    Value::Node(n) => Value::Bool(n.has_label(label)),
                    _ => Value::Null,
                })
            }

            Expr::Star => Ok(Value::Null),
        }
    }

    fn eval_function(&mut self, name: &str, args: &[Expr], row: &Row) -> Result<Value> {
        let upper = name.to_uppercase();
        let arg0 = |ex: &mut Self| -> Result<Value> {
            let first = args.first().ok_or_else(|| {
                Error::Execution(format!("{name}() requires an argument"))
            })?;
            ex.eval(first, row)
        };

        match upper.as_str() {
            "ID" => {
                let value = arg0(self)?;
                Ok(match value {
                    Value::Node(n) => Value::String(n.id.0.clone()),
                    Value::Relationship(r) => Value::String(r.id.0.clone()),
                    Value::Null => Value::Null,
                    other => {
                        return Err(Error::Execution(format!(
                            "id() expects a node or relationship, got {}",
                            other.type_name()
                        )))
                    }
                })
            }
            "LABELS" => {
                let value = arg0(self)?;
                Ok(match value {
                    Value::Node(n) => Value::List(
                        n.labels.iter().map(|l| Value::String(l.clone())).collect(),
                    ),
                    Value::Null => Value::Null,
                    other => {
                        return Err(Error::Execution(format!(
                            "labels() expects a node, got {}",
                            other.type_name()
                        )))
                    }
                })
            }
            "TYPE" => {
                let value = arg0(self)?;
                Ok(match value {
                    Value::Relationship(r) => Value::String(r.rel_type.clone()),
                    Value::Null => Value::Null,
                    other => {
                        return Err(Error::Execution(format!(
                            "type() expects a relationship, got {}",
                            other.type_name()
                        )))
                    }
                })
            }
            "PROPERTIES" => {
                let value = arg0(self)?;
                Ok(match value {
                    Value::Node(n) => Value::Map(n.properties.clone()),
                    Value::Relationship(r) => Value::Map(r.properties.clone()),
                    Value::Null => Value::Null,
                    other => {
                        return Err(Error::Execution(format!(
                            "properties() expects a node or relationship, got {}",
                            other.type_name()
                        )))
                    }
                })
            }
            "KEYS" => {
                let value = arg0(self)?;
                let keys: Vec<String> = match value {
                    Value::Node(n) => n.properties.keys().cloned().collect(),
                    Value::Relationship(r) => r.properties.keys().cloned().collect(),
                    Value::Map(m) => m.keys().cloned().collect(),
                    Value::Null => return Ok(Value::Null),
                    other => {
                        return Err(Error::Execution(format!(
                            "keys() expects a node, relationship, or map, got {}",
                            other.type_name()
                        )))
                    }
                };
                let mut keys = keys;
                keys.sort();
                Ok(Value::List(keys.into_iter().map(Value::String).collect()))
            }
            "SIZE" | "LENGTH" => {
                let value = arg0(self)?;
                Ok(match value {
                    Value::String(s) => Value::Int(s.chars().count() as i64),
                    Value::List(l) => Value::Int(l.len() as i64),
                    Value::Null => Value::Null,
                    other => {
                        return Err(Error::Execution(format!(
                            "size() expects a string or list, got {}",
                            other.type_name()
                        )))
                    }
                })
            }
            "COALESCE" => {
                for arg in args {
                    let value = self.eval(arg, row)?;
                    if !value.is_null() {
                        return Ok(value);
                    }
                }
                Ok(Value::Null)
            }
            "TOSTRING" => {
                let value = arg0(self)?;
                Ok(match value {
                    Value::Null => Value::Null,
                    Value::String(_) => value,
                    other => Value::String(format!("{other}")),
                })
            }
            "TOINTEGER" => {
                let value = arg0(self)?;
                Ok(match value {
                    Value::Int(_) => value,
                    Value::Float(f) => Value::Int(f as i64),
                    Value::String(s) => s.parse::<i64>().map(Value::Int).unwrap_or(Value::Null),
                    Value::Null => Value::Null,
                    _ => Value::Null,
                })
            }
            "TOFLOAT" => {
                let value = arg0(self)?;
                Ok(match value {
                    Value::Float(_) => value,
                    Value::Int(i) => Value::Float(i as f64),
                    Value::String(s) => s.parse::<f64>().map(Value::Float).unwrap_or(Value::Null),
                    Value::Null => Value::Null,
                    _ => Value::Null,
                })
            }
            // Aggregates evaluated per-row outside an aggregation context
            // reduce to their argument.
            "COUNT" | "SUM" | "AVG" | "MIN" | "MAX" | "COLLECT" => {
                if args.is_empty() || matches!(args[0], Expr::Star) {
                    Ok(Value::Int(1))
                } else {
                    self.eval(&args[0], row)
                }
            }
            _ => Err(Error::Execution(format!("unknown function: {name}"))),
        }
    }

    // ========================================================================
    // Aggregation
    // ========================================================================

    fn compute_aggregate(&mut self, expr: &Expr, rows: &[Row]) -> Result<Value> {
        let Expr::FunctionCall {
            name,
            args,
            distinct,
        } = expr
        else {
            return Err(Error::Execution(format!(
                "expected aggregate function, got {expr}"
            )));
        };
        let upper = name.to_uppercase();
        let counts_rows = args.is_empty() || matches!(args[0], Expr::Star);

        let mut values: Vec<Value> = Vec::new();
        if !counts_rows {
            for row in rows {
                let value = self.eval(&args[0], row)?;
                if !value.is_null() {
                    values.push(value);
                }
            }
            if *distinct {
                let mut deduped: Vec<Value> = Vec::new();
                for value in values {
                    if !deduped.iter().any(|v| values_equal(v, &value)) {
                        deduped.push(value);
                    }
                }
                values = deduped;
            }
        }

        match upper.as_str() {
            "COUNT" => Ok(Value::Int(if counts_rows {
                rows.len() as i64
            } else {
                values.len() as i64
            })),
            "SUM" => {
                let mut sum_int: i64 = 0;
                let mut sum_float: f64 = 0.0;
                let mut has_float = false;
                for value in &values {
                    match value {
                        Value::Int(i) => sum_int += i,
                        Value::Float(f) => {
                            has_float = true;
                            sum_float += f;
                        }
                        _ => {}
                    }
                }
                if has_float {
                    Ok(Value::Float(sum_int as f64 + sum_float))
                } else {
                    Ok(Value::Int(sum_int))
                }
            }
            "AVG" => {
                let numeric: Vec<f64> = values.iter().filter_map(Value::as_float).collect();
                if numeric.is_empty() {
                    Ok(Value::Null)
                } else {
                    Ok(Value::Float(numeric.iter().sum::<f64>() / numeric.len() as f64))
                }
            }
            "MIN" => Ok(values
                .into_iter()
                .reduce(|a, b| {
                    if a.compare(&b) == Some(std::cmp::Ordering::Greater) {
                        b
                    } else {
                        a
                    }
                })
                .unwrap_or(Value::Null)),
            "MAX" => Ok(values
                .into_iter()
                .reduce(|a, b| {
                    if a.compare(&b) == Some(std::cmp::Ordering::Less) {
                        b
                    } else {
                        a
                    }
                })
                .unwrap_or(Value::Null)),
            "COLLECT" => Ok(Value::List(values)),
            _ => Err(Error::Execution(format!("unknown aggregate: {name}"))),
        }
    }
}

// ============================================================================
// Value helpers
// ============================================================================

/// Ordering for ORDER BY: nulls sort last regardless of direction; the
/// direction applies only to comparable pairs.
fn compare_with_nulls_last(a: &Value, b: &Value, ascending: bool) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let ord = a.compare(b).unwrap_or(Ordering::Equal);
            if ascending {
                ord
            } else {
                ord.reverse()
            }
        }
    }
}

/// Equality with numeric coercion (`1 = 1.0`).
fn values_equal(a: &Value, b: &Value) -> bool {
    match a.compare(b) {
        Some(ord) => ord == std::cmp::Ordering::Equal,
        None => a == b,
    }
}

fn eval_binary_op(left: &Value, op: BinaryOp, right: &Value) -> Result<Value> {
    use std::cmp::Ordering;

    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }

    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(left, right))),
        BinaryOp::Neq => Ok(Value::Bool(!values_equal(left, right))),
        BinaryOp::Lt => Ok(match left.compare(right) {
            Some(ord) => Value::Bool(ord == Ordering::Less),
            None => Value::Null,
        }),
        BinaryOp::Lte => Ok(match left.compare(right) {
            Some(ord) => Value::Bool(ord != Ordering::Greater),
            None => Value::Null,
        }),
        BinaryOp::Gt => Ok(match left.compare(right) {
            Some(ord) => Value::Bool(ord == Ordering::Greater),
            None => Value::Null,
        }),
        BinaryOp::Gte => Ok(match left.compare(right) {
            Some(ord) => Value::Bool(ord != Ordering::Less),
            None => Value::Null,
        }),

        BinaryOp::Add => eval_add(left, right),
        BinaryOp::Sub => eval_arith(left, right, i64::wrapping_sub, |a, b| a - b),
        BinaryOp::Mul => eval_arith(left, right, i64::wrapping_mul, |a, b| a * b),
        BinaryOp::Div => match right {
            Value::Int(0) => Err(Error::Execution("division by zero".into())),
            Value::Float(f) if *f == 0.0 => Err(Error::Execution("division by zero".into())),
            _ => eval_arith(left, right, i64::wrapping_div, |a, b| a / b),
        },
        BinaryOp::Mod => match right {
            Value::Int(0) => Err(Error::Execution("division by zero".into())),
            _ => eval_arith(left, right, i64::wrapping_rem, |a, b| a % b),
        },

        BinaryOp::And => Ok(Value::Bool(left.is_truthy() && right.is_truthy())),
        BinaryOp::Or => Ok(Value::Bool(left.is_truthy() || right.is_truthy())),
    }
}

fn eval_add(left: &Value, right: &Value) -> Result<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(*a as f64 + b)),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a + *b as f64)),
        (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
        (Value::List(a), Value::List(b)) => {
            let mut out = a.clone();
            out.extend(b.clone());
            Ok(Value::List(out))
        }
        _ => Err(Error::Execution(format!(
            "cannot add {} and {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn eval_arith(
    left: &Value,
    right: &Value,
    int_op: fn(i64, i64) -> i64,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(int_op(*a, *b))),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(float_op(*a, *b))),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(float_op(*a as f64, *b))),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(float_op(*a, *b as f64))),
        _ => Err(Error::Execution(format!(
            "arithmetic requires numbers, got {} and {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn short_hex() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    hex[..12].to_owned()
}
