//! Reference Python extractor.
//!
//! Line-oriented and regex-assisted rather than a full grammar: enough to
//! pull functions, classes, methods, docstrings, imports, and call names out
//! of well-formed source. Pathological layouts degrade to partial results,
//! never to a parse failure.

use regex::Regex;
use std::sync::OnceLock;

use super::{ClassInfo, FunctionInfo, ImportInfo, ParseResult, SourceParser};

fn def_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\s*)(async\s+)?def\s+(\w+)\s*\(").expect("valid pattern"))
}

fn class_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\s*)class\s+(\w+)\s*(?:\(([^)]*)\))?\s*:").expect("valid pattern")
    })
}

fn import_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*import\s+([\w.]+)(?:\s+as\s+(\w+))?\s*$").expect("valid pattern")
    })
}

fn from_import_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*from\s+(\.*)([\w.]*)\s+import\s+(.+)$").expect("valid pattern")
    })
}

fn call_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\.?)([A-Za-z_]\w*)\s*\(").expect("valid pattern"))
}

fn class_var_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\w+)\s*(?::\s*([^=]+?))?\s*(?:=.*)?$").expect("valid pattern")
    })
}

/// Statement keywords that look like calls to the call-name regex.
const NON_CALL_KEYWORDS: &[&str] = &[
    "if", "elif", "while", "for", "return", "yield", "with", "assert", "not", "and", "or", "in",
    "is", "lambda", "except", "raise", "del", "print", "def", "class", "await", "async", "super",
    "self", "isinstance", "len", "str", "int", "float", "bool", "list", "dict", "set", "tuple",
    "type", "range", "enumerate", "zip", "map", "filter", "sorted", "open", "format",
];

/// Indentation width, tabs counted as four columns.
fn indent_of(line: &str) -> usize {
    let mut width = 0;
    for c in line.chars() {
        match c {
            ' ' => width += 1,
            '\t' => width += 4,
            _ => break,
        }
    }
    width
}

fn is_blank_or_comment(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}

/// Drop a trailing `#` comment, respecting simple string quoting.
fn strip_comment(line: &str) -> &str {
    let mut in_single = false;
    let mut in_double = false;
    for (i, c) in line.char_indices() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '#' if !in_single && !in_double => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Split a parameter list on top-level commas.
fn split_parameters(params: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0_i32;
    let mut current = String::new();
    for c in params.chars() {
        match c {
            '(' | '[' | '{' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' | '}' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    out.push(trimmed.to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
    out
}

/// Extracted pieces of one `def` header.
struct Signature {
    text: String,
    name: String,
    is_async: bool,
    parameters: Vec<String>,
    return_type: Option<String>,
    /// Index of the last header line.
    end_index: usize,
}

pub struct PythonParser;

impl Default for PythonParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PythonParser {
    pub fn new() -> Self {
        Self
    }

    /// Accumulate a possibly multi-line `def` header up to its terminating
    /// colon at paren depth zero.
    fn read_signature(lines: &[&str], start: usize) -> Option<Signature> {
        let captures = def_pattern().captures(lines[start])?;
        let is_async = captures.get(2).is_some();
        let name = captures[3].to_string();

        let mut header = String::new();
        let mut end_index = start;
        let mut depth = 0_i32;
        let mut terminated = false;

        for (offset, raw) in lines[start..].iter().enumerate() {
            let line = strip_comment(raw);
            if !header.is_empty() {
                header.push(' ');
            }
            header.push_str(line.trim());
            end_index = start + offset;

            for c in line.chars() {
                match c {
                    '(' | '[' | '{' => depth += 1,
                    ')' | ']' | '}' => depth -= 1,
                    ':' if depth == 0 => terminated = true,
                    _ => {}
                }
            }
            if terminated {
                break;
            }
            // Header running away; give up after a screenful.
            if offset > 20 {
                return None;
            }
        }
        if !terminated {
            return None;
        }

        // Normalize: strip everything after the final colon.
        let text = header
            .rsplit_once(':')
            .map(|(head, _)| head.trim().to_string())
            .unwrap_or(header);

        let parameters = text
            .find('(')
            .and_then(|open| text.rfind(')').map(|close| (open, close)))
            .filter(|(open, close)| close > open)
            .map(|(open, close)| split_parameters(&text[open + 1..close]))
            .unwrap_or_default();

        let return_type = text
            .rsplit_once("->")
            .map(|(_, ret)| ret.trim().to_string())
            .filter(|ret| !ret.is_empty());

        Some(Signature {
            text,
            name,
            is_async,
            parameters,
            return_type,
            end_index,
        })
    }

    /// Last line of a block whose body is indented beyond `indent`.
    fn block_end(lines: &[&str], header_end: usize, indent: usize) -> usize {
        let mut end = header_end;
        for (offset, line) in lines[header_end + 1..].iter().enumerate() {
            if is_blank_or_comment(line) {
                continue;
            }
            if indent_of(line) <= indent {
                break;
            }
            end = header_end + 1 + offset;
        }
        end
    }

    /// Docstring starting at the first meaningful line after `header_end`
    /// with indentation beyond `indent`.
    fn read_docstring(lines: &[&str], header_end: usize, indent: usize) -> Option<String> {
        let mut index = header_end + 1;
        while index < lines.len() && is_blank_or_comment(lines[index]) {
            index += 1;
        }
        if index >= lines.len() || indent_of(lines[index]) <= indent {
            return None;
        }

        let trimmed = lines[index].trim();
        let unprefixed = trimmed.trim_start_matches(['r', 'b', 'f', 'u', 'R', 'B', 'F', 'U']);
        let quote = if unprefixed.starts_with("\"\"\"") {
            "\"\"\""
        } else if unprefixed.starts_with("'''") {
            "'''"
        } else if (unprefixed.starts_with('"') && unprefixed.len() > 1 && unprefixed.ends_with('"'))
            || (unprefixed.starts_with('\'') && unprefixed.len() > 1 && unprefixed.ends_with('\''))
        {
            // Single-line, single-quoted docstring.
            return Some(unprefixed[1..unprefixed.len() - 1].trim().to_string());
        } else {
            return None;
        };

        let body_start = &unprefixed[quote.len()..];
        if let Some(end) = body_start.find(quote) {
            return Some(body_start[..end].trim().to_string());
        }

        // Multi-line: collect until the closing triple quote.
        let mut parts = vec![body_start.trim_end().to_string()];
        for line in &lines[index + 1..] {
            match line.find(quote) {
                Some(end) => {
                    parts.push(line[..end].trim_end().to_string());
                    let joined = parts.join("\n");
                    return Some(joined.trim().to_string());
                }
                None => parts.push(line.trim_end().to_string()),
            }
        }
        None
    }

    /// Call names in a body range: bare identifiers followed by an opening
    /// paren, minus statement keywords and attribute calls.
    fn collect_calls(lines: &[&str], body_start: usize, body_end: usize, own_name: &str) -> Vec<String> {
        let mut calls = Vec::new();
        for raw in lines.iter().take(body_end + 1).skip(body_start) {
            let line = strip_comment(raw);
            for captures in call_pattern().captures_iter(line) {
                if !captures[1].is_empty() {
                    continue; // attribute call
                }
                let name = &captures[2];
                if name == own_name || NON_CALL_KEYWORDS.contains(&name) {
                    continue;
                }
                if !calls.iter().any(|existing: &String| existing == name) {
                    calls.push(name.to_string());
                }
            }
        }
        calls
    }

    fn read_function(
        lines: &[&str],
        start: usize,
        file_path: &str,
        decorators: Vec<String>,
        containing_class: Option<&str>,
    ) -> Option<(FunctionInfo, usize)> {
        let indent = indent_of(lines[start]);
        let signature = Self::read_signature(lines, start)?;
        let end = Self::block_end(lines, signature.end_index, indent);
        let docstring = Self::read_docstring(lines, signature.end_index, indent);

        let has_decorator = |name: &str| {
            decorators
                .iter()
                .any(|d| d == name || d.starts_with(&format!("{}(", name)))
        };

        let calls = Self::collect_calls(lines, signature.end_index + 1, end, &signature.name);

        let function = FunctionInfo {
            name: signature.name,
            signature: signature.text,
            file_path: file_path.to_string(),
            start_line: (start + 1) as u32,
            end_line: (end + 1).max(start + 1) as u32,
            docstring,
            parameters: signature.parameters,
            return_type: signature.return_type,
            is_async: signature.is_async,
            is_method: containing_class.is_some(),
            is_static: has_decorator("staticmethod"),
            is_classmethod: has_decorator("classmethod"),
            is_property: has_decorator("property"),
            containing_class: containing_class.map(str::to_string),
            decorators,
            calls,
        };
        Some((function, end))
    }

    fn read_class(
        lines: &[&str],
        start: usize,
        file_path: &str,
        decorators: Vec<String>,
    ) -> Option<(ClassInfo, usize)> {
        let captures = class_pattern().captures(lines[start])?;
        let indent = indent_of(lines[start]);
        let name = captures[2].to_string();
        let bases: Vec<String> = captures
            .get(3)
            .map(|m| {
                m.as_str()
                    .split(',')
                    .map(|b| b.trim().to_string())
                    .filter(|b| !b.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let end = Self::block_end(lines, start, indent);
        let docstring = Self::read_docstring(lines, start, indent);

        let is_dataclass = decorators.iter().any(|d| d.contains("dataclass"));
        let mut is_abstract = bases
            .iter()
            .any(|base| base == "ABC" || base.contains("ABCMeta") || base.contains("Protocol"));

        // Body indent: first meaningful line inside the block.
        let body_indent = lines[start + 1..=end.min(lines.len() - 1)]
            .iter()
            .filter(|line| !is_blank_or_comment(line))
            .map(|line| indent_of(line))
            .find(|&i| i > indent);

        let mut methods = Vec::new();
        let mut class_variables = Vec::new();
        let mut pending_decorators: Vec<String> = Vec::new();
        let mut index = start + 1;

        while index <= end {
            let line = lines[index];
            if is_blank_or_comment(line) {
                index += 1;
                continue;
            }
            let line_indent = indent_of(line);
            if Some(line_indent) != body_indent {
                index += 1;
                continue;
            }
            let trimmed = strip_comment(line).trim();

            if let Some(decorator) = trimmed.strip_prefix('@') {
                if decorator.contains("abstractmethod") {
                    is_abstract = true;
                }
                pending_decorators.push(decorator.to_string());
                index += 1;
                continue;
            }

            if def_pattern().is_match(line) {
                let decorators = std::mem::take(&mut pending_decorators);
                if let Some((method, method_end)) =
                    Self::read_function(lines, index, file_path, decorators, Some(&name))
                {
                    index = method_end + 1;
                    methods.push(method);
                    continue;
                }
            } else if !trimmed.starts_with("def ")
                && !trimmed.starts_with("class ")
                && !trimmed.starts_with('"')
                && !trimmed.starts_with('\'')
            {
                if let Some(var) = class_var_pattern().captures(trimmed) {
                    let var_name = var[1].to_string();
                    // Require an annotation or an assignment so bare
                    // expressions don't register as variables.
                    if trimmed.contains('=') || trimmed.contains(':') {
                        class_variables
                            .push((var_name, var.get(2).map(|m| m.as_str().trim().to_string())));
                    }
                }
                pending_decorators.clear();
            }
            index += 1;
        }

        let class_info = ClassInfo {
            name,
            file_path: file_path.to_string(),
            start_line: (start + 1) as u32,
            end_line: (end + 1).max(start + 1) as u32,
            docstring,
            bases,
            decorators,
            methods,
            class_variables,
            is_dataclass,
            is_abstract,
        };
        Some((class_info, end))
    }

    fn read_imports(lines: &[&str]) -> Vec<ImportInfo> {
        let mut imports = Vec::new();
        for (index, raw) in lines.iter().enumerate() {
            let line = strip_comment(raw);
            let line_number = (index + 1) as u32;

            if let Some(captures) = import_pattern().captures(line) {
                imports.push(ImportInfo {
                    module: captures[1].to_string(),
                    name: None,
                    alias: captures.get(2).map(|m| m.as_str().to_string()),
                    line: line_number,
                    is_relative: false,
                });
                continue;
            }

            if let Some(captures) = from_import_pattern().captures(line) {
                let dots = &captures[1];
                let module = format!("{}{}", dots, &captures[2]);
                let is_relative = !dots.is_empty();
                for item in captures[3].split(',') {
                    let item = item.trim().trim_end_matches('\\').trim();
                    if item.is_empty() || item == "(" || item == ")" {
                        continue;
                    }
                    let (name, alias) = match item.split_once(" as ") {
                        Some((name, alias)) => {
                            (name.trim().to_string(), Some(alias.trim().to_string()))
                        }
                        None => (item.trim_matches(['(', ')']).trim().to_string(), None),
                    };
                    if name.is_empty() || name == "*" {
                        continue;
                    }
                    imports.push(ImportInfo {
                        module: module.clone(),
                        name: Some(name),
                        alias,
                        line: line_number,
                        is_relative,
                    });
                }
            }
        }
        imports
    }
}

impl SourceParser for PythonParser {
    fn language(&self) -> &str {
        "python"
    }

    fn extensions(&self) -> &[&str] {
        &["py", "pyi"]
    }

    fn parse(&self, file_path: &str, content: &str) -> ParseResult {
        let lines: Vec<&str> = content.lines().collect();
        let mut result = ParseResult {
            file_path: file_path.to_string(),
            language: self.language().to_string(),
            ..Default::default()
        };

        if lines.is_empty() {
            return result;
        }

        // Module docstring: a string literal as the first statement.
        result.module_docstring = lines
            .iter()
            .position(|line| !is_blank_or_comment(line))
            .filter(|&first| indent_of(lines[first]) == 0)
            .and_then(|first| Self::read_docstring_at(&lines, first));

        result.imports = Self::read_imports(&lines);

        let mut pending_decorators: Vec<String> = Vec::new();
        let mut index = 0;
        while index < lines.len() {
            let line = lines[index];
            if is_blank_or_comment(line) || indent_of(line) > 0 {
                index += 1;
                continue;
            }
            let trimmed = strip_comment(line).trim();

            if let Some(decorator) = trimmed.strip_prefix('@') {
                pending_decorators.push(decorator.to_string());
                index += 1;
                continue;
            }

            if class_pattern().is_match(line) {
                let decorators = std::mem::take(&mut pending_decorators);
                if let Some((class_info, end)) =
                    Self::read_class(&lines, index, file_path, decorators)
                {
                    index = end + 1;
                    result.classes.push(class_info);
                    continue;
                }
                result
                    .errors
                    .push(format!("unparseable class header at line {}", index + 1));
            } else if def_pattern().is_match(line) {
                let decorators = std::mem::take(&mut pending_decorators);
                match Self::read_function(&lines, index, file_path, decorators, None) {
                    Some((function, end)) => {
                        index = end + 1;
                        result.functions.push(function);
                        continue;
                    }
                    None => result
                        .errors
                        .push(format!("unparseable function header at line {}", index + 1)),
                }
            } else {
                pending_decorators.clear();
            }
            index += 1;
        }

        result
    }
}

impl PythonParser {
    /// Docstring literal starting exactly at `index`.
    fn read_docstring_at(lines: &[&str], index: usize) -> Option<String> {
        let trimmed = lines[index].trim();
        let quote = if trimmed.starts_with("\"\"\"") {
            "\"\"\""
        } else if trimmed.starts_with("'''") {
            "'''"
        } else {
            return None;
        };
        let body = &trimmed[quote.len()..];
        if let Some(end) = body.find(quote) {
            return Some(body[..end].trim().to_string());
        }
        let mut parts = vec![body.trim_end().to_string()];
        for line in &lines[index + 1..] {
            match line.find(quote) {
                Some(end) => {
                    parts.push(line[..end].trim_end().to_string());
                    return Some(parts.join("\n").trim().to_string());
                }
                None => parts.push(line.trim_end().to_string()),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#""""User handling helpers."""

import os
import collections as col
from pathlib import Path
from .models import User, Role as UserRole


def parse_user(raw: str) -> User:
    """Parse raw user input into a User model."""
    cleaned = normalize(raw)
    return build_user(cleaned)


async def fetch_user(user_id):
    return await backend.get(user_id)


@dataclass
class UserService:
    """Service wrapping user storage."""

    table_name: str = "users"
    MAX_RETRIES: int = 3

    def get(self, user_id: int) -> User:
        """Fetch one user."""
        record = self.backend.fetch(user_id)
        return parse_user(record)

    @staticmethod
    def normalize_name(name: str) -> str:
        return name.strip().lower()

    @property
    def size(self):
        return count_rows(self.table_name)
"#;

    fn parse_sample() -> ParseResult {
        PythonParser::new().parse("users.py", SAMPLE)
    }

    #[test]
    fn test_module_docstring() {
        let result = parse_sample();
        assert_eq!(
            result.module_docstring.as_deref(),
            Some("User handling helpers.")
        );
    }

    #[test]
    fn test_imports() {
        let result = parse_sample();
        assert_eq!(result.imports.len(), 5);

        assert_eq!(result.imports[0].module, "os");
        assert_eq!(result.imports[1].alias.as_deref(), Some("col"));

        let from_import = &result.imports[2];
        assert_eq!(from_import.module, "pathlib");
        assert_eq!(from_import.name.as_deref(), Some("Path"));
        assert!(!from_import.is_relative);

        let relative = &result.imports[3];
        assert_eq!(relative.module, ".models");
        assert!(relative.is_relative);
        assert_eq!(result.imports[4].alias.as_deref(), Some("UserRole"));
    }

    #[test]
    fn test_top_level_functions() {
        let result = parse_sample();
        assert_eq!(result.functions.len(), 2);

        let parse_fn = &result.functions[0];
        assert_eq!(parse_fn.name, "parse_user");
        assert_eq!(parse_fn.signature, "def parse_user(raw: str) -> User");
        assert_eq!(parse_fn.parameters, vec!["raw: str"]);
        assert_eq!(parse_fn.return_type.as_deref(), Some("User"));
        assert_eq!(
            parse_fn.docstring.as_deref(),
            Some("Parse raw user input into a User model.")
        );
        assert!(parse_fn.calls.contains(&"normalize".to_string()));
        assert!(parse_fn.calls.contains(&"build_user".to_string()));
        assert!(!parse_fn.is_method);

        let fetch_fn = &result.functions[1];
        assert!(fetch_fn.is_async);
    }

    #[test]
    fn test_class_extraction() {
        let result = parse_sample();
        assert_eq!(result.classes.len(), 1);
        let class_info = &result.classes[0];

        assert_eq!(class_info.name, "UserService");
        assert!(class_info.is_dataclass);
        assert!(!class_info.is_abstract);
        assert_eq!(
            class_info.docstring.as_deref(),
            Some("Service wrapping user storage.")
        );
        assert_eq!(class_info.methods.len(), 3);

        let get = &class_info.methods[0];
        assert!(get.is_method);
        assert_eq!(get.containing_class.as_deref(), Some("UserService"));
        assert!(get.calls.contains(&"parse_user".to_string()));

        let normalize = &class_info.methods[1];
        assert!(normalize.is_static);

        let size = &class_info.methods[2];
        assert!(size.is_property);

        let var_names: Vec<&str> = class_info
            .class_variables
            .iter()
            .map(|(name, _)| name.as_str())
            .collect();
        assert!(var_names.contains(&"table_name"));
        assert!(var_names.contains(&"MAX_RETRIES"));
    }

    #[test]
    fn test_line_numbers() {
        let result = parse_sample();
        let parse_fn = &result.functions[0];
        assert_eq!(parse_fn.start_line, 9);
        assert!(parse_fn.end_line > parse_fn.start_line);
        assert!(parse_fn.end_line < result.functions[1].start_line);
    }

    #[test]
    fn test_abstract_class_detection() {
        let source = "class Repo(ABC):\n    @abstractmethod\n    def save(self): ...\n";
        let result = PythonParser::new().parse("repo.py", source);
        assert!(result.classes[0].is_abstract);
    }

    #[test]
    fn test_multiline_signature() {
        let source = "def configure(\n    host: str,\n    port: int = 8080,\n) -> None:\n    pass\n";
        let result = PythonParser::new().parse("config.py", source);
        assert_eq!(result.functions.len(), 1);
        let function = &result.functions[0];
        assert_eq!(function.parameters.len(), 2);
        assert_eq!(function.return_type.as_deref(), Some("None"));
    }

    #[test]
    fn test_empty_file() {
        let result = PythonParser::new().parse("empty.py", "");
        assert!(result.functions.is_empty());
        assert!(result.classes.is_empty());
        assert!(result.errors.is_empty());
    }
}
