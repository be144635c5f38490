//! Cypher recursive descent parser.
//!
//! Parses token streams into AST nodes. Supports:
//! - MATCH with node/relationship patterns
//! - WHERE, RETURN (DISTINCT, AS), ORDER BY, SKIP, LIMIT
//! - CREATE, MERGE, MATCH ... SET, MATCH ... [DETACH] DELETE
//! - Expression parsing with precedence

use super::ast::*;
use super::lexer::{Token, TokenKind};
use crate::{Error, Result};

/// Parser state — a token slice with a cursor.
struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Parser<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn advance(&mut self) -> &Token {
        let tok = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&Token> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            let tok = self.peek();
            Err(Error::Syntax {
                position: tok.span.start,
                message: format!("Expected {:?}, got {:?} '{}'", kind, tok.kind, tok.text),
            })
        }
    }

    fn error(&self, msg: impl Into<String>) -> Error {
        Error::Syntax {
            position: self.peek().span.start,
            message: msg.into(),
        }
    }
}

/// Parse a complete Cypher statement from tokens.
pub fn parse_statement(tokens: &[Token]) -> Result<Statement> {
    let mut p = Parser::new(tokens);

    let stmt = match p.peek_kind() {
        TokenKind::Match => parse_match_stmt(&mut p)?,
        TokenKind::Create => parse_create_stmt(&mut p)?,
        TokenKind::Merge => parse_merge_stmt(&mut p)?,
        TokenKind::Eof => return Err(p.error("Empty query")),
        kind => return Err(p.error(format!("Unexpected token {kind:?} at start of statement"))),
    };

    p.eat(TokenKind::Semicolon);
    if !p.at(TokenKind::Eof) {
        return Err(p.error(format!(
            "Unexpected token after statement: {:?}",
            p.peek_kind()
        )));
    }

    Ok(stmt)
}

// ============================================================================
// Statement parsers
// ============================================================================

fn parse_match_stmt(p: &mut Parser) -> Result<Statement> {
    let mut matches = Vec::new();
    let mut where_clause = None;

    while p.eat(TokenKind::Match) {
        let patterns = parse_pattern_list(p)?;
        matches.push(MatchClause { patterns });

        if p.eat(TokenKind::Where) {
            where_clause = Some(parse_expr(p)?);
        }
    }

    // MATCH ... SET
    if p.eat(TokenKind::Set) {
        let items = parse_set_items(p)?;
        let return_clause = if p.eat(TokenKind::Return) {
            Some(parse_return_clause(p)?)
        } else {
            None
        };
        return Ok(Statement::Set(SetClause {
            matches,
            where_clause,
            items,
            return_clause,
        }));
    }

    // MATCH ... [DETACH] DELETE
    if p.at(TokenKind::Delete) || p.at(TokenKind::Detach) {
        let detach = p.eat(TokenKind::Detach);
        p.expect(TokenKind::Delete)?;
        let variables = parse_variable_list(p)?;
        return Ok(Statement::Delete(DeleteClause {
            matches,
            where_clause,
            variables,
            detach,
        }));
    }

    p.expect(TokenKind::Return)?;
    let return_clause = parse_return_clause(p)?;
    let (order_by, skip, limit) = parse_tail_clauses(p)?;

    Ok(Statement::Query(Query {
        matches,
        where_clause,
        return_clause,
        order_by,
        skip,
        limit,
    }))
}

fn parse_create_stmt(p: &mut Parser) -> Result<Statement> {
    p.expect(TokenKind::Create)?;
    let patterns = parse_pattern_list(p)?;
    let return_clause = if p.eat(TokenKind::Return) {
        Some(parse_return_clause(p)?)
    } else {
        None
    };
    Ok(Statement::Create(CreateClause {
        patterns,
        return_clause,
    }))
}

fn parse_merge_stmt(p: &mut Parser) -> Result<Statement> {
    p.expect(TokenKind::Merge)?;
    let pattern = parse_pattern(p)?;
    let return_clause = if p.eat(TokenKind::Return) {
        Some(parse_return_clause(p)?)
    } else {
        None
    };
    Ok(Statement::Merge(MergeClause {
        pattern,
        return_clause,
    }))
}

fn parse_tail_clauses(p: &mut Parser) -> Result<(Vec<OrderExpr>, Option<Expr>, Option<Expr>)> {
    let mut order_by = Vec::new();
    if p.eat(TokenKind::Order) {
        p.expect(TokenKind::By)?;
        loop {
            let expr = parse_expr(p)?;
            let ascending = if p.eat(TokenKind::Desc) {
                false
            } else {
                p.eat(TokenKind::Asc);
                true
            };
            order_by.push(OrderExpr { expr, ascending });
            if !p.eat(TokenKind::Comma) {
                break;
            }
        }
    }

    let skip = if p.eat(TokenKind::Skip) {
        Some(parse_expr(p)?)
    } else {
        None
    };
    let limit = if p.eat(TokenKind::Limit) {
        Some(parse_expr(p)?)
    } else {
        None
    };
    Ok((order_by, skip, limit))
}

fn parse_return_clause(p: &mut Parser) -> Result<ReturnClause> {
    let distinct = p.eat(TokenKind::Distinct);
    let mut items = Vec::new();
    loop {
        let expr = parse_expr(p)?;
        let alias = if p.eat(TokenKind::As) {
            Some(p.expect(TokenKind::Identifier)?.text.clone())
        } else {
            None
        };
        items.push(ReturnItem { expr, alias });
        if !p.eat(TokenKind::Comma) {
            break;
        }
    }
    Ok(ReturnClause { distinct, items })
}

fn parse_set_items(p: &mut Parser) -> Result<Vec<SetItem>> {
    let mut items = Vec::new();
    loop {
        let variable = p.expect(TokenKind::Identifier)?.text.clone();
        p.expect(TokenKind::Dot)?;
        let key = p.expect(TokenKind::Identifier)?.text.clone();
        p.expect(TokenKind::Eq)?;
        let value = parse_expr(p)?;
        items.push(SetItem {
            variable,
            key,
            value,
        });
        if !p.eat(TokenKind::Comma) {
            break;
        }
    }
    Ok(items)
}

fn parse_variable_list(p: &mut Parser) -> Result<Vec<String>> {
    let mut variables = Vec::new();
    loop {
        variables.push(p.expect(TokenKind::Identifier)?.text.clone());
        if !p.eat(TokenKind::Comma) {
            break;
        }
    }
    Ok(variables)
}

// ============================================================================
// Pattern parsing
// ============================================================================

fn parse_pattern_list(p: &mut Parser) -> Result<Vec<Pattern>> {
    let mut patterns = vec![parse_pattern(p)?];
    while p.eat(TokenKind::Comma) {
        patterns.push(parse_pattern(p)?);
    }
    Ok(patterns)
}

fn parse_pattern(p: &mut Parser) -> Result<Pattern> {
    let mut elements = vec![PatternElement::Node(parse_node_pattern(p)?)];

    while p.at(TokenKind::Dash) || p.at(TokenKind::LeftArrow) {
        elements.push(PatternElement::Rel(parse_rel_pattern(p)?));
        elements.push(PatternElement::Node(parse_node_pattern(p)?));
    }

    Ok(Pattern { elements })
}

fn parse_node_pattern(p: &mut Parser) -> Result<NodePattern> {
    p.expect(TokenKind::LParen)?;

    let variable = if p.at(TokenKind::Identifier) {
        Some(p.advance().text.clone())
    } else {
        None
    };

    let mut labels = Vec::new();
    while p.eat(TokenKind::Colon) {
        labels.push(p.expect(TokenKind::Identifier)?.text.clone());
    }

    let properties = if p.at(TokenKind::LBrace) {
        parse_property_map(p)?
    } else {
        Vec::new()
    };

    p.expect(TokenKind::RParen)?;
    Ok(NodePattern {
        variable,
        labels,
        properties,
    })
}

/// `-[r:TYPE|OTHER {p: v}]->`, `<-[...]-`, `-[...]-`, `-->`, `<--`
fn parse_rel_pattern(p: &mut Parser) -> Result<RelPattern> {
    let from_left = p.eat(TokenKind::LeftArrow);
    if !from_left {
        p.expect(TokenKind::Dash)?;
    }

    let (variable, rel_types, properties) = if p.eat(TokenKind::LBracket) {
        let variable = if p.at(TokenKind::Identifier) {
            Some(p.advance().text.clone())
        } else {
            None
        };
        let mut rel_types = Vec::new();
        if p.eat(TokenKind::Colon) {
            rel_types.push(p.expect(TokenKind::Identifier)?.text.clone());
            while p.eat(TokenKind::Pipe) {
                p.eat(TokenKind::Colon);
                rel_types.push(p.expect(TokenKind::Identifier)?.text.clone());
            }
        }
        let properties = if p.at(TokenKind::LBrace) {
            parse_property_map(p)?
        } else {
            Vec::new()
        };
        p.expect(TokenKind::RBracket)?;
        (variable, rel_types, properties)
    } else {
        (None, Vec::new(), Vec::new())
    };

    let direction = if from_left {
        p.expect(TokenKind::Dash)?;
        PatternDirection::Left
    } else if p.eat(TokenKind::Arrow) {
        PatternDirection::Right
    } else {
        p.expect(TokenKind::Dash)?;
        PatternDirection::Both
    };

    Ok(RelPattern {
        variable,
        rel_types,
        direction,
        properties,
    })
}

fn parse_property_map(p: &mut Parser) -> Result<Vec<(String, Expr)>> {
    p.expect(TokenKind::LBrace)?;
    let mut properties = Vec::new();
    if !p.at(TokenKind::RBrace) {
        loop {
            let key = p.expect(TokenKind::Identifier)?.text.clone();
            p.expect(TokenKind::Colon)?;
            let value = parse_expr(p)?;
            properties.push((key, value));
            if !p.eat(TokenKind::Comma) {
                break;
            }
        }
    }
    p.expect(TokenKind::RBrace)?;
    Ok(properties)
}

// ============================================================================
// Expression parsing (precedence climbing)
// ============================================================================

fn parse_expr(p: &mut Parser) -> Result<Expr> {
    parse_or(p)
}

fn parse_or(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_and(p)?;
    while p.eat(TokenKind::Or) {
        let right = parse_and(p)?;
        left = Expr::BinaryOp {
            left: Box::new(left),
            op: BinaryOp::Or,
            right: Box::new(right),
        };
    }
    Ok(left)
}

fn parse_and(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_not(p)?;
    while p.eat(TokenKind::And) {
        let right = parse_not(p)?;
        left = Expr::BinaryOp {
            left: Box::new(left),
            op: BinaryOp::And,
            right: Box::new(right),
        };
    }
    Ok(left)
}

fn parse_not(p: &mut Parser) -> Result<Expr> {
    if p.eat(TokenKind::Not) {
        let expr = parse_not(p)?;
        return Ok(Expr::UnaryOp {
            op: UnaryOp::Not,
            expr: Box::new(expr),
        });
    }
    parse_comparison(p)
}

fn parse_comparison(p: &mut Parser) -> Result<Expr> {
    let left = parse_additive(p)?;

    // IS [NOT] NULL
    if p.eat(TokenKind::Is) {
        let negated = p.eat(TokenKind::Not);
        p.expect(TokenKind::Null)?;
        return Ok(Expr::IsNull {
            expr: Box::new(left),
            negated,
        });
    }

    // IN list
    if p.eat(TokenKind::In) {
        let list = parse_additive(p)?;
        return Ok(Expr::In {
            expr: Box::new(left),
            list: Box::new(list),
        });
    }

    let op = match p.peek_kind() {
        TokenKind::Eq => BinaryOp::Eq,
        TokenKind::Neq => BinaryOp::Neq,
        TokenKind::Lt => BinaryOp::Lt,
        TokenKind::Lte => BinaryOp::Lte,
        TokenKind::Gt => BinaryOp::Gt,
        TokenKind::Gte => BinaryOp::Gte,
        _ => return Ok(left),
    };
    p.advance();
    let right = parse_additive(p)?;
    Ok(Expr::BinaryOp {
        left: Box::new(left),
        op,
        right: Box::new(right),
    })
}

fn parse_additive(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_multiplicative(p)?;
    loop {
        let op = match p.peek_kind() {
            TokenKind::Plus => BinaryOp::Add,
            TokenKind::Dash => BinaryOp::Sub,
            _ => break,
        };
        p.advance();
        let right = parse_multiplicative(p)?;
        left = Expr::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        };
    }
    Ok(left)
}

fn parse_multiplicative(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_unary(p)?;
    loop {
        let op = match p.peek_kind() {
            TokenKind::Star => BinaryOp::Mul,
            TokenKind::Slash => BinaryOp::Div,
            TokenKind::Percent => BinaryOp::Mod,
            _ => break,
        };
        p.advance();
        let right = parse_unary(p)?;
        left = Expr::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        };
    }
    Ok(left)
}

fn parse_unary(p: &mut Parser) -> Result<Expr> {
    if p.eat(TokenKind::Dash) {
        let expr = parse_unary(p)?;
        return Ok(Expr::UnaryOp {
            op: UnaryOp::Negate,
            expr: Box::new(expr),
        });
    }
    parse_postfix(p)
}

/// Property access and label checks bind tighter than any operator.
fn parse_postfix(p: &mut Parser) -> Result<Expr> {
    let mut expr = parse_primary(p)?;
    loop {
        if p.eat(TokenKind::Dot) {
            let key = p.expect(TokenKind::Identifier)?.text.clone();
            expr = Expr::Property {
                expr: Box::new(expr),
                key,
            };
        } else if p.at(TokenKind::Colon) && matches!(expr, Expr::Variable(_)) {
            p.advance();
            let label = p.expect(TokenKind::Identifier)?.text.clone();
            expr = Expr::HasLabel {
                expr: Box::new(expr),
                label,
            };
        } else {
            break;
        }
    }
    Ok(expr)
}

fn parse_primary(p: &mut Parser) -> Result<Expr> {
    match p.peek_kind() {
        TokenKind::Integer => {
            let text = p.advance().text.clone();
            let value = text
                .parse::<i64>()
                .map_err(|_| p.error(format!("Invalid integer literal '{text}'")))?;
            Ok(Expr::Literal(Literal::Int(value)))
        }
        TokenKind::Float => {
            let text = p.advance().text.clone();
            let value = text
                .parse::<f64>()
                .map_err(|_| p.error(format!("Invalid float literal '{text}'")))?;
            Ok(Expr::Literal(Literal::Float(value)))
        }
        TokenKind::StringLiteral => {
            let text = p.advance().text.clone();
            Ok(Expr::Literal(Literal::String(text)))
        }
        TokenKind::Null => {
            p.advance();
            Ok(Expr::Literal(Literal::Null))
        }
        TokenKind::True => {
            p.advance();
            Ok(Expr::Literal(Literal::Bool(true)))
        }
        TokenKind::False => {
            p.advance();
            Ok(Expr::Literal(Literal::Bool(false)))
        }
        TokenKind::Parameter => {
            let name = p.advance().text.clone();
            Ok(Expr::Parameter(name))
        }
        TokenKind::Star => {
            p.advance();
            Ok(Expr::Star)
        }
        TokenKind::LBracket => {
            p.advance();
            let mut items = Vec::new();
            if !p.at(TokenKind::RBracket) {
                loop {
                    items.push(parse_expr(p)?);
                    if !p.eat(TokenKind::Comma) {
                        break;
                    }
                }
            }
            p.expect(TokenKind::RBracket)?;
            Ok(Expr::List(items))
        }
        TokenKind::LParen => {
            p.advance();
            let expr = parse_expr(p)?;
            p.expect(TokenKind::RParen)?;
            Ok(expr)
        }
        TokenKind::Identifier => {
            let name = p.advance().text.clone();
            if p.eat(TokenKind::LParen) {
                let distinct = p.eat(TokenKind::Distinct);
                let mut args = Vec::new();
                if !p.at(TokenKind::RParen) {
                    loop {
                        args.push(parse_expr(p)?);
                        if !p.eat(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                p.expect(TokenKind::RParen)?;
                Ok(Expr::FunctionCall {
                    name,
                    args,
                    distinct,
                })
            } else {
                Ok(Expr::Variable(name))
            }
        }
        kind => Err(p.error(format!("Unexpected token {kind:?} in expression"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cypher::lexer::tokenize;

    fn parse(input: &str) -> Result<Statement> {
        parse_statement(&tokenize(input)?)
    }

    #[test]
    fn test_simple_match_return() {
        let stmt = parse("MATCH (n:Person) RETURN n").unwrap();
        let Statement::Query(q) = stmt else {
            panic!("expected query")
        };
        assert_eq!(q.matches.len(), 1);
        assert_eq!(q.return_clause.items.len(), 1);
        let PatternElement::Node(n) = &q.matches[0].patterns[0].elements[0] else {
            panic!("expected node")
        };
        assert_eq!(n.variable.as_deref(), Some("n"));
        assert_eq!(n.labels, ["Person"]);
    }

    #[test]
    fn test_match_with_relationship_pattern() {
        let stmt = parse("MATCH (a:Person)-[r:KNOWS|LIKES]->(b) RETURN a, b").unwrap();
        let Statement::Query(q) = stmt else {
            panic!("expected query")
        };
        let elements = &q.matches[0].patterns[0].elements;
        assert_eq!(elements.len(), 3);
        let PatternElement::Rel(rel) = &elements[1] else {
            panic!("expected rel")
        };
        assert_eq!(rel.variable.as_deref(), Some("r"));
        assert_eq!(rel.rel_types, ["KNOWS", "LIKES"]);
        assert_eq!(rel.direction, PatternDirection::Right);
    }

    #[test]
    fn test_left_and_undirected_patterns() {
        let stmt = parse("MATCH (a)<-[:KNOWS]-(b), (a)-[:LIKES]-(c) RETURN a").unwrap();
        let Statement::Query(q) = stmt else {
            panic!("expected query")
        };
        let PatternElement::Rel(left) = &q.matches[0].patterns[0].elements[1] else {
            panic!()
        };
        assert_eq!(left.direction, PatternDirection::Left);
        let PatternElement::Rel(both) = &q.matches[0].patterns[1].elements[1] else {
            panic!()
        };
        assert_eq!(both.direction, PatternDirection::Both);
    }

    #[test]
    fn test_node_property_map() {
        let stmt = parse("MATCH (n:Person {name: 'Alice', age: 30}) RETURN n").unwrap();
        let Statement::Query(q) = stmt else {
            panic!("expected query")
        };
        let PatternElement::Node(n) = &q.matches[0].patterns[0].elements[0] else {
            panic!()
        };
        assert_eq!(n.properties.len(), 2);
        assert_eq!(n.properties[0].0, "name");
    }

    #[test]
    fn test_where_order_skip_limit() {
        let stmt =
            parse("MATCH (n) WHERE n.age >= 21 AND NOT n.name = 'X' RETURN n.age ORDER BY n.age DESC SKIP 1 LIMIT 2")
                .unwrap();
        let Statement::Query(q) = stmt else {
            panic!("expected query")
        };
        assert!(q.where_clause.is_some());
        assert_eq!(q.order_by.len(), 1);
        assert!(!q.order_by[0].ascending);
        assert!(q.skip.is_some());
        assert!(q.limit.is_some());
    }

    #[test]
    fn test_return_alias_and_distinct() {
        let stmt = parse("MATCH (n) RETURN DISTINCT n.name AS name, count(*) AS total").unwrap();
        let Statement::Query(q) = stmt else {
            panic!("expected query")
        };
        assert!(q.return_clause.distinct);
        assert_eq!(q.return_clause.items[0].alias.as_deref(), Some("name"));
        assert!(matches!(
            q.return_clause.items[1].expr,
            Expr::FunctionCall { .. }
        ));
    }

    #[test]
    fn test_create_with_return() {
        let stmt = parse("CREATE (n:Person {name: $name}) RETURN n").unwrap();
        let Statement::Create(c) = stmt else {
            panic!("expected create")
        };
        assert!(c.return_clause.is_some());
        let PatternElement::Node(n) = &c.patterns[0].elements[0] else {
            panic!()
        };
        assert!(matches!(n.properties[0].1, Expr::Parameter(_)));
    }

    #[test]
    fn test_create_relationship_pattern() {
        let stmt = parse("CREATE (a:P {n: 1})-[:KNOWS {since: 2020}]->(b:P {n: 2})").unwrap();
        let Statement::Create(c) = stmt else {
            panic!("expected create")
        };
        assert_eq!(c.patterns[0].elements.len(), 3);
    }

    #[test]
    fn test_merge() {
        let stmt = parse("MERGE (n:Person {name: 'Alice'}) RETURN n").unwrap();
        assert!(matches!(stmt, Statement::Merge(_)));
    }

    #[test]
    fn test_match_set() {
        let stmt = parse("MATCH (n:Person) WHERE n.name = 'Alice' SET n.age = 31, n.city = 'Oslo'").unwrap();
        let Statement::Set(s) = stmt else {
            panic!("expected set")
        };
        assert_eq!(s.items.len(), 2);
        assert_eq!(s.items[0].variable, "n");
        assert_eq!(s.items[0].key, "age");
    }

    #[test]
    fn test_detach_delete() {
        let stmt = parse("MATCH (n:Person {name: 'Alice'}) DETACH DELETE n").unwrap();
        let Statement::Delete(d) = stmt else {
            panic!("expected delete")
        };
        assert!(d.detach);
        assert_eq!(d.variables, ["n"]);
    }

    #[test]
    fn test_is_null_and_in() {
        let stmt = parse("MATCH (n) WHERE n.age IS NOT NULL AND n.name IN ['A', 'B'] RETURN n").unwrap();
        assert!(matches!(stmt, Statement::Query(_)));
    }

    #[test]
    fn test_empty_query_is_error() {
        let err = parse("").unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
    }

    #[test]
    fn test_trailing_garbage_is_error() {
        assert!(parse("MATCH (n) RETURN n n").is_err());
    }
}
