//! AST → IR compiler.
//!
//! Lowers parsed statements into the operation pipeline the executor runs.
//! Pattern elements without an explicit variable receive a generated name
//! `_n<i>`, where `<i>` is the element's position in a pre-order walk of the
//! statement's patterns — generated names are always non-empty.

use super::ast::*;
use super::ir::{IrOp, IrProgram, QueryType};
use crate::model::Direction;
use crate::{Error, Result};

/// Compile a statement. Rejects reserved parameter names (leading `_`) and
/// negative SKIP/LIMIT literals with validation errors.
pub fn compile(stmt: &Statement) -> Result<IrProgram> {
    let mut compiler = Compiler::default();
    let program = match stmt {
        Statement::Query(q) => compiler.compile_query(q)?,
        Statement::Create(c) => compiler.compile_create(c)?,
        Statement::Merge(m) => compiler.compile_merge(m)?,
        Statement::Delete(d) => compiler.compile_delete(d)?,
        Statement::Set(s) => compiler.compile_set(s)?,
    };
    validate_parameters(&program)?;
    Ok(program)
}

#[derive(Default)]
struct Compiler {
    element_index: usize,
}

impl Compiler {
    /// Pre-order element numbering across the whole statement.
    fn name_for(&mut self, explicit: &Option<String>) -> String {
        let index = self.element_index;
        self.element_index += 1;
        match explicit {
            Some(name) => name.clone(),
            None => format!("_n{index}"),
        }
    }

    // ========================================================================
    // MATCH pipelines
    // ========================================================================

    fn compile_matches(&mut self, matches: &[MatchClause], ops: &mut Vec<IrOp>) -> Result<()> {
        for clause in matches {
            for pattern in &clause.patterns {
                self.compile_match_pattern(pattern, ops)?;
            }
        }
        Ok(())
    }

    fn compile_match_pattern(&mut self, pattern: &Pattern, ops: &mut Vec<IrOp>) -> Result<()> {
        let mut elements = pattern.elements.iter();
        let first = match elements.next() {
            Some(PatternElement::Node(node)) => node,
            _ => return Err(Error::Execution("pattern must start with a node".into())),
        };
        let mut previous = self.name_for(&first.variable);
        ops.push(IrOp::ScanNodes {
            variable: previous.clone(),
            labels: first.labels.clone(),
            properties: first.properties.clone(),
        });

        while let Some(element) = elements.next() {
            let PatternElement::Rel(rel) = element else {
                return Err(Error::Execution("expected relationship in pattern".into()));
            };
            // Relationships consume a pre-order slot whether or not they
            // bind a variable.
            self.element_index += 1;
            let rel_variable = rel.variable.clone();

            let Some(PatternElement::Node(node)) = elements.next() else {
                return Err(Error::Execution("pattern must end with a node".into()));
            };
            let to = self.name_for(&node.variable);

            ops.push(IrOp::Expand {
                from: previous,
                rel_variable,
                rel_types: rel.rel_types.clone(),
                rel_properties: rel.properties.clone(),
                direction: map_direction(rel.direction),
                to: to.clone(),
                to_labels: node.labels.clone(),
                to_properties: node.properties.clone(),
            });
            previous = to;
        }
        Ok(())
    }

    fn compile_query(&mut self, q: &Query) -> Result<IrProgram> {
        let mut ops = Vec::new();
        self.compile_matches(&q.matches, &mut ops)?;
        if let Some(predicate) = &q.where_clause {
            ops.push(IrOp::Filter {
                predicate: predicate.clone(),
            });
        }
        self.push_projection_tail(
            &mut ops,
            &q.return_clause,
            &q.order_by,
            q.skip.as_ref(),
            q.limit.as_ref(),
        )?;
        Ok(IrProgram {
            ops,
            query_type: QueryType::Read,
        })
    }

    /// RETURN/ORDER BY/SKIP/LIMIT tail shared by read and write statements.
    ///
    /// Without aggregation, ordering runs before projection so ORDER BY can
    /// reference pattern variables the projection drops. With aggregation,
    /// ordering runs after and references the projected columns.
    fn push_projection_tail(
        &mut self,
        ops: &mut Vec<IrOp>,
        return_clause: &ReturnClause,
        order_by: &[OrderExpr],
        skip: Option<&Expr>,
        limit: Option<&Expr>,
    ) -> Result<()> {
        validate_page_expr(skip, "SKIP")?;
        validate_page_expr(limit, "LIMIT")?;

        let items: Vec<(Expr, String)> = return_clause
            .items
            .iter()
            .map(|item| {
                let alias = item.alias.clone().unwrap_or_else(|| item.expr.to_string());
                (item.expr.clone(), alias)
            })
            .collect();

        let (aggregates, groups): (Vec<_>, Vec<_>) = items
            .into_iter()
            .partition(|(expr, _)| is_aggregate_expr(expr));

        if aggregates.is_empty() {
            if !order_by.is_empty() {
                ops.push(IrOp::OrderBy {
                    keys: order_by
                        .iter()
                        .map(|o| (o.expr.clone(), o.ascending))
                        .collect(),
                });
            }
            if let Some(skip) = skip {
                ops.push(IrOp::Skip { count: skip.clone() });
            }
            if let Some(limit) = limit {
                ops.push(IrOp::Limit { count: limit.clone() });
            }
            ops.push(IrOp::Project {
                items: groups,
                distinct: return_clause.distinct,
            });
        } else {
            ops.push(IrOp::Aggregate { groups, aggregates });
            if !order_by.is_empty() {
                ops.push(IrOp::OrderBy {
                    keys: order_by
                        .iter()
                        .map(|o| (o.expr.clone(), o.ascending))
                        .collect(),
                });
            }
            if let Some(skip) = skip {
                ops.push(IrOp::Skip { count: skip.clone() });
            }
            if let Some(limit) = limit {
                ops.push(IrOp::Limit { count: limit.clone() });
            }
        }
        Ok(())
    }

    // ========================================================================
    // Write statements
    // ========================================================================

    fn compile_create(&mut self, c: &CreateClause) -> Result<IrProgram> {
        let mut ops = Vec::new();
        for pattern in &c.patterns {
            self.compile_create_pattern(pattern, &mut ops)?;
        }
        if let Some(return_clause) = &c.return_clause {
            self.push_projection_tail(&mut ops, return_clause, &[], None, None)?;
        }
        Ok(IrProgram {
            ops,
            query_type: QueryType::Write,
        })
    }

    fn compile_create_pattern(&mut self, pattern: &Pattern, ops: &mut Vec<IrOp>) -> Result<()> {
        let mut variables: Vec<String> = Vec::new();

        // Nodes first, so relationship endpoints are bound.
        for element in &pattern.elements {
            match element {
                PatternElement::Node(node) => {
                    let variable = self.name_for(&node.variable);
                    variables.push(variable.clone());
                    ops.push(IrOp::CreateNode {
                        variable,
                        labels: node.labels.clone(),
                        properties: node.properties.clone(),
                    });
                }
                PatternElement::Rel(_) => {
                    self.element_index += 1;
                    variables.push(String::new()); // placeholder, filled below
                }
            }
        }

        for (i, element) in pattern.elements.iter().enumerate() {
            let PatternElement::Rel(rel) = element else {
                continue;
            };
            if rel.rel_types.len() != 1 {
                return Err(Error::Validation(
                    "CREATE requires exactly one relationship type".into(),
                ));
            }
            let (from, to) = match rel.direction {
                PatternDirection::Right => (variables[i - 1].clone(), variables[i + 1].clone()),
                PatternDirection::Left => (variables[i + 1].clone(), variables[i - 1].clone()),
                PatternDirection::Both => {
                    return Err(Error::Validation(
                        "CREATE requires a directed relationship".into(),
                    ))
                }
            };
            ops.push(IrOp::CreateRel {
                variable: rel.variable.clone(),
                from,
                to,
                rel_type: rel.rel_types[0].clone(),
                properties: rel.properties.clone(),
            });
        }
        Ok(())
    }

    fn compile_merge(&mut self, m: &MergeClause) -> Result<IrProgram> {
        let mut ops = Vec::new();
        match m.pattern.elements.as_slice() {
            [PatternElement::Node(node)] => {
                let variable = self.name_for(&node.variable);
                ops.push(IrOp::MergeNode {
                    variable,
                    labels: node.labels.clone(),
                    properties: node.properties.clone(),
                });
            }
            [PatternElement::Node(left), PatternElement::Rel(rel), PatternElement::Node(right)] => {
                if rel.rel_types.len() != 1 {
                    return Err(Error::Validation(
                        "MERGE requires exactly one relationship type".into(),
                    ));
                }
                if rel.direction != PatternDirection::Right {
                    return Err(Error::Validation(
                        "MERGE supports left-to-right relationship patterns".into(),
                    ));
                }
                let left_variable = self.name_for(&left.variable);
                self.element_index += 1;
                let right_variable = self.name_for(&right.variable);
                ops.push(IrOp::MergeRel {
                    left_variable,
                    left_labels: left.labels.clone(),
                    left_properties: left.properties.clone(),
                    rel_variable: rel.variable.clone(),
                    rel_type: rel.rel_types[0].clone(),
                    rel_properties: rel.properties.clone(),
                    right_variable,
                    right_labels: right.labels.clone(),
                    right_properties: right.properties.clone(),
                });
            }
            _ => {
                return Err(Error::Validation(
                    "MERGE supports a single node or a node-relationship-node pattern".into(),
                ))
            }
        }
        if let Some(return_clause) = &m.return_clause {
            self.push_projection_tail(&mut ops, return_clause, &[], None, None)?;
        }
        Ok(IrProgram {
            ops,
            query_type: QueryType::Write,
        })
    }

    fn compile_delete(&mut self, d: &DeleteClause) -> Result<IrProgram> {
        let mut ops = Vec::new();
        self.compile_matches(&d.matches, &mut ops)?;
        if let Some(predicate) = &d.where_clause {
            ops.push(IrOp::Filter {
                predicate: predicate.clone(),
            });
        }
        ops.push(IrOp::Delete {
            variables: d.variables.clone(),
            detach: d.detach,
        });
        Ok(IrProgram {
            ops,
            query_type: QueryType::Write,
        })
    }

    fn compile_set(&mut self, s: &SetClause) -> Result<IrProgram> {
        let mut ops = Vec::new();
        self.compile_matches(&s.matches, &mut ops)?;
        if let Some(predicate) = &s.where_clause {
            ops.push(IrOp::Filter {
                predicate: predicate.clone(),
            });
        }
        for item in &s.items {
            ops.push(IrOp::SetProperty {
                variable: item.variable.clone(),
                key: item.key.clone(),
                value: item.value.clone(),
            });
        }
        if let Some(return_clause) = &s.return_clause {
            self.push_projection_tail(&mut ops, return_clause, &[], None, None)?;
        }
        Ok(IrProgram {
            ops,
            query_type: QueryType::Write,
        })
    }
}

fn map_direction(direction: PatternDirection) -> Direction {
    match direction {
        PatternDirection::Right => Direction::Outgoing,
        PatternDirection::Left => Direction::Incoming,
        PatternDirection::Both => Direction::Both,
    }
}

const AGGREGATE_FUNCTIONS: [&str; 6] = ["COUNT", "SUM", "AVG", "MIN", "MAX", "COLLECT"];

pub(crate) fn is_aggregate_expr(expr: &Expr) -> bool {
    match expr {
        Expr::FunctionCall { name, .. } => {
            AGGREGATE_FUNCTIONS.contains(&name.to_uppercase().as_str())
        }
        _ => false,
    }
}

fn validate_page_expr(expr: Option<&Expr>, clause: &str) -> Result<()> {
    match expr {
        None | Some(Expr::Parameter(_)) => Ok(()),
        Some(Expr::Literal(Literal::Int(n))) if *n >= 0 => Ok(()),
        Some(other) => Err(Error::Validation(format!(
            "{clause} requires a non-negative integer or parameter, got {other}"
        ))),
    }
}

/// Reserved parameter names begin with `_`.
fn validate_parameters(program: &IrProgram) -> Result<()> {
    let mut names = Vec::new();
    for op in &program.ops {
        collect_op_parameters(op, &mut names);
    }
    for name in names {
        if name.starts_with('_') {
            return Err(Error::Validation(format!(
                "parameter names beginning with '_' are reserved: ${name}"
            )));
        }
    }
    Ok(())
}

fn collect_op_parameters(op: &IrOp, out: &mut Vec<String>) {
    let from_pairs = |pairs: &[(String, Expr)], out: &mut Vec<String>| {
        for (_, expr) in pairs {
            collect_expr_parameters(expr, out);
        }
    };
    match op {
        IrOp::ScanNodes { properties, .. }
        | IrOp::CreateNode { properties, .. }
        | IrOp::MergeNode { properties, .. }
        | IrOp::CreateRel { properties, .. } => from_pairs(properties, out),
        IrOp::Expand {
            rel_properties,
            to_properties,
            ..
        } => {
            from_pairs(rel_properties, out);
            from_pairs(to_properties, out);
        }
        IrOp::MergeRel {
            left_properties,
            rel_properties,
            right_properties,
            ..
        } => {
            from_pairs(left_properties, out);
            from_pairs(rel_properties, out);
            from_pairs(right_properties, out);
        }
        IrOp::Filter { predicate } => collect_expr_parameters(predicate, out),
        IrOp::SetProperty { value, .. } => collect_expr_parameters(value, out),
        IrOp::OrderBy { keys } => {
            for (expr, _) in keys {
                collect_expr_parameters(expr, out);
            }
        }
        IrOp::Skip { count } | IrOp::Limit { count } => collect_expr_parameters(count, out),
        IrOp::Project { items, .. } => {
            for (expr, _) in items {
                collect_expr_parameters(expr, out);
            }
        }
        IrOp::Aggregate { groups, aggregates } => {
            for (expr, _) in groups {
                collect_expr_parameters(expr, out);
            }
            for (expr, _) in aggregates {
                collect_expr_parameters(expr, out);
            }
        }
        IrOp::Delete { .. } => {}
    }
}

fn collect_expr_parameters(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Parameter(name) => out.push(name.clone()),
        Expr::Property { expr, .. } | Expr::UnaryOp { expr, .. } => {
            collect_expr_parameters(expr, out)
        }
        Expr::BinaryOp { left, right, .. } => {
            collect_expr_parameters(left, out);
            collect_expr_parameters(right, out);
        }
        Expr::FunctionCall { args, .. } => {
            for arg in args {
                collect_expr_parameters(arg, out);
            }
        }
        Expr::List(items) => {
            for item in items {
                collect_expr_parameters(item, out);
            }
        }
        Expr::IsNull { expr, .. } => collect_expr_parameters(expr, out),
        Expr::In { expr, list } => {
            collect_expr_parameters(expr, out);
            collect_expr_parameters(list, out);
        }
        Expr::HasLabel { expr, .. } => collect_expr_parameters(expr, out),
        Expr::Literal(_) | Expr::Variable(_) | Expr::Star => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cypher::{lexer::tokenize, parser::parse_statement};

    fn compile_str(input: &str) -> Result<IrProgram> {
        compile(&parse_statement(&tokenize(input)?)?)
    }

    #[test]
    fn test_match_return_compiles_to_scan_project() {
        let program = compile_str("MATCH (n:Person) RETURN n.name").unwrap();
        assert_eq!(program.query_type, QueryType::Read);
        assert!(matches!(program.ops[0], IrOp::ScanNodes { .. }));
        let IrOp::Project { items, .. } = program.ops.last().unwrap() else {
            panic!("expected project")
        };
        assert_eq!(items[0].1, "n.name");
    }

    #[test]
    fn test_anonymous_elements_get_preorder_names() {
        let program = compile_str("MATCH (:Person)-[:KNOWS]->() RETURN count(*)").unwrap();
        let IrOp::ScanNodes { variable, .. } = &program.ops[0] else {
            panic!()
        };
        assert_eq!(variable, "_n0");
        let IrOp::Expand { to, .. } = &program.ops[1] else {
            panic!()
        };
        assert_eq!(to, "_n2");
    }

    #[test]
    fn test_order_runs_before_project_without_aggregates() {
        let program =
            compile_str("MATCH (n:P) RETURN n.name ORDER BY n.age SKIP 1 LIMIT 2").unwrap();
        let order_pos = program
            .ops
            .iter()
            .position(|op| matches!(op, IrOp::OrderBy { .. }))
            .unwrap();
        let project_pos = program
            .ops
            .iter()
            .position(|op| matches!(op, IrOp::Project { .. }))
            .unwrap();
        assert!(order_pos < project_pos);
        assert_eq!(program.ops.len(), 5); // scan, order, skip, limit, project
    }

    #[test]
    fn test_aggregate_partitioning() {
        let program = compile_str("MATCH (n:P) RETURN n.city, count(n) AS total").unwrap();
        let IrOp::Aggregate { groups, aggregates } = program
            .ops
            .iter()
            .find(|op| matches!(op, IrOp::Aggregate { .. }))
            .unwrap()
        else {
            panic!()
        };
        assert_eq!(groups.len(), 1);
        assert_eq!(aggregates.len(), 1);
        assert_eq!(aggregates[0].1, "total");
    }

    #[test]
    fn test_create_pattern_orders_nodes_before_rels() {
        let program = compile_str("CREATE (a:P)-[:KNOWS]->(b:P)").unwrap();
        assert_eq!(program.query_type, QueryType::Write);
        assert!(matches!(program.ops[0], IrOp::CreateNode { .. }));
        assert!(matches!(program.ops[1], IrOp::CreateNode { .. }));
        let IrOp::CreateRel { from, to, .. } = &program.ops[2] else {
            panic!()
        };
        assert_eq!(from, "a");
        assert_eq!(to, "b");
    }

    #[test]
    fn test_create_left_direction_swaps_endpoints() {
        let program = compile_str("CREATE (a:P)<-[:KNOWS]-(b:P)").unwrap();
        let IrOp::CreateRel { from, to, .. } = &program.ops[2] else {
            panic!()
        };
        assert_eq!(from, "b");
        assert_eq!(to, "a");
    }

    #[test]
    fn test_reserved_parameter_rejected() {
        let err = compile_str("MATCH (n) WHERE n.name = $_secret RETURN n").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_negative_limit_rejected() {
        let err = compile_str("MATCH (n) RETURN n LIMIT -1").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_merge_single_node() {
        let program = compile_str("MERGE (n:Person {name: 'A'}) RETURN n").unwrap();
        assert!(matches!(program.ops[0], IrOp::MergeNode { .. }));
    }

    #[test]
    fn test_detach_delete() {
        let program = compile_str("MATCH (n:P) DETACH DELETE n").unwrap();
        let IrOp::Delete { variables, detach } = program.ops.last().unwrap() else {
            panic!()
        };
        assert!(detach);
        assert_eq!(variables, &["n"]);
    }
}
