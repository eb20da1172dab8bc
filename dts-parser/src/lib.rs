//! Zero-copy parser for Device Tree Source (`.dts`) files.
//!
//! The parser turns DTS text into the AST in [`ast`], preserving labels,
//! references and value structure exactly as written. It performs no
//! linking: references stay symbolic, includes stay as directives, and
//! multiple top-level blocks stay separate. Consumers that need a linked
//! tree merge the AST themselves.

use std::fmt;

pub mod ast;
mod parser;

pub use parser::{contents_from_str, from_str};

/// A syntax error, located in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    /// 1-based source line.
    pub line: u32,
    /// 1-based column on that line.
    pub column: usize,
    snippet: String,
}

impl SyntaxError {
    fn at(input: &parser::Input<'_>) -> Self {
        let snippet: String = input
            .fragment()
            .chars()
            .take(40)
            .take_while(|c| *c != '\n')
            .collect();

        SyntaxError {
            line: input.location_line(),
            column: input.get_utf8_column(),
            snippet,
        }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "syntax error at line {}, column {}",
            self.line, self.column
        )?;
        if !self.snippet.is_empty() {
            write!(f, " near `{}`", self.snippet)?;
        }
        Ok(())
    }
}

impl std::error::Error for SyntaxError {}
