//! # Cypher pipeline
//!
//! Lexer → parser → compiler. Query text becomes an [`ir::IrProgram`] the
//! executor runs; every stage is a pure function of its input.

pub mod ast;
pub mod compiler;
pub mod ir;
pub mod lexer;
pub mod parser;

use crate::Result;

/// Parse Cypher text into an AST.
pub fn parse(query: &str) -> Result<ast::Statement> {
    let tokens = lexer::tokenize(query)?;
    parser::parse_statement(&tokens)
}

/// Parse and compile Cypher text into an executable program.
pub fn compile(query: &str) -> Result<ir::IrProgram> {
    let stmt = parse(query)?;
    compiler::compile(&stmt)
}
