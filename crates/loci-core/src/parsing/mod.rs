//! Source parsing contract.
//!
//! The indexer consumes a [`ParseResult`] and does not care how the bytes
//! were turned into one. Parsers register by extension with the
//! [`ParserOrchestrator`]; the crate ships a reference Python extractor, and
//! embedders plug richer grammars in through the [`SourceParser`] seam.

mod python;

pub use python::PythonParser;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One import statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportInfo {
    pub module: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
    pub line: u32,
    #[serde(default)]
    pub is_relative: bool,
}

/// One function or method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    pub signature: String,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    #[serde(default)]
    pub docstring: Option<String>,
    #[serde(default)]
    pub parameters: Vec<String>,
    #[serde(default)]
    pub return_type: Option<String>,
    #[serde(default)]
    pub decorators: Vec<String>,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default)]
    pub is_method: bool,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_classmethod: bool,
    #[serde(default)]
    pub is_property: bool,
    /// Class name when this is a method; resolved to a memory id later.
    #[serde(default)]
    pub containing_class: Option<String>,
    /// Call names seen in the body. Optional parser capability; CALLS edges
    /// are skipped for parsers that leave this empty.
    #[serde(default)]
    pub calls: Vec<String>,
}

/// One class definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassInfo {
    pub name: String,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    #[serde(default)]
    pub docstring: Option<String>,
    #[serde(default)]
    pub bases: Vec<String>,
    #[serde(default)]
    pub decorators: Vec<String>,
    #[serde(default)]
    pub methods: Vec<FunctionInfo>,
    /// (name, type annotation) pairs.
    #[serde(default)]
    pub class_variables: Vec<(String, Option<String>)>,
    #[serde(default)]
    pub is_dataclass: bool,
    #[serde(default)]
    pub is_abstract: bool,
}

/// Everything extracted from one source file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseResult {
    pub file_path: String,
    pub language: String,
    #[serde(default)]
    pub module_docstring: Option<String>,
    #[serde(default)]
    pub imports: Vec<ImportInfo>,
    #[serde(default)]
    pub functions: Vec<FunctionInfo>,
    #[serde(default)]
    pub classes: Vec<ClassInfo>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ParseResult {
    /// An empty result carrying one error, for files nothing could parse.
    pub fn failed(file_path: &str, error: impl Into<String>) -> Self {
        Self {
            file_path: file_path.to_string(),
            language: "unknown".to_string(),
            errors: vec![error.into()],
            ..Default::default()
        }
    }
}

/// A language-specific extractor.
pub trait SourceParser: Send + Sync {
    fn language(&self) -> &str;
    /// Extensions without the leading dot.
    fn extensions(&self) -> &[&str];
    fn parse(&self, file_path: &str, content: &str) -> ParseResult;
}

/// Dispatches files to the parser registered for their extension.
pub struct ParserOrchestrator {
    parsers: Vec<Arc<dyn SourceParser>>,
}

impl Default for ParserOrchestrator {
    fn default() -> Self {
        Self {
            parsers: vec![Arc::new(PythonParser::new())],
        }
    }
}

impl ParserOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an additional parser; later registrations win on extension
    /// collisions.
    pub fn register(&mut self, parser: Arc<dyn SourceParser>) {
        self.parsers.push(parser);
    }

    pub fn supported_extensions(&self) -> Vec<&str> {
        self.parsers
            .iter()
            .flat_map(|parser| parser.extensions().iter().copied())
            .collect()
    }

    fn parser_for(&self, extension: &str) -> Option<&Arc<dyn SourceParser>> {
        self.parsers
            .iter()
            .rev()
            .find(|parser| parser.extensions().contains(&extension))
    }

    pub fn supports(&self, file_path: &str) -> bool {
        extension_of(file_path)
            .map(|ext| self.parser_for(&ext).is_some())
            .unwrap_or(false)
    }

    /// Parse one file. Unsupported extensions produce an error-carrying
    /// result instead of failing the caller.
    pub fn parse_file(&self, file_path: &str, content: &str) -> ParseResult {
        let Some(extension) = extension_of(file_path) else {
            return ParseResult::failed(file_path, "file has no extension");
        };
        match self.parser_for(&extension) {
            Some(parser) => parser.parse(file_path, content),
            None => ParseResult::failed(
                file_path,
                format!("no parser registered for extension '{}'", extension),
            ),
        }
    }
}

fn extension_of(file_path: &str) -> Option<String> {
    std::path::Path::new(file_path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}
