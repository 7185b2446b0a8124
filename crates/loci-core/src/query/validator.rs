//! Read-only query validation.
//!
//! Every externally supplied graph query passes through here before it may
//! reach the store. The check is allowlist-shaped: strip comments, escape
//! string literals, then reject any write/procedure keyword, require a
//! read-only opening keyword and a RETURN, and refuse non-ASCII outside
//! literals to defeat lookalike-character smuggling.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{CoreError, Result};

/// Hard cap on normalized query length.
const MAX_QUERY_CHARS: usize = 10_000;

/// Keywords that must never appear outside string literals.
const BLOCKED_KEYWORDS: &[&str] = &[
    // Write operations
    "CREATE",
    "DELETE",
    "DETACH DELETE",
    "SET",
    "REMOVE",
    "MERGE",
    // Schema operations
    "DROP",
    "CREATE INDEX",
    "CREATE CONSTRAINT",
    "CREATE DATABASE",
    // Procedure calls can execute arbitrary code
    "CALL",
    "YIELD",
    // Bulk/side-effect constructs
    "LOAD CSV",
    "USING PERIODIC COMMIT",
    "FOREACH",
];

fn line_comment_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"//[^\n]*").expect("valid pattern"))
}

fn block_comment_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)/\*.*?\*/").expect("valid pattern"))
}

fn single_quoted_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"'[^']*'").expect("valid pattern"))
}

fn double_quoted_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""[^"]*""#).expect("valid pattern"))
}

fn return_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bRETURN\b").expect("valid pattern"))
}

fn rejected(message: impl Into<String>) -> CoreError {
    CoreError::validation("cypher", message)
}

/// Replace string literal bodies with empty literals.
fn escape_literals(text: &str) -> String {
    let text = single_quoted_pattern().replace_all(text, "''");
    double_quoted_pattern().replace_all(&text, "\"\"").into_owned()
}

/// Validate that a query is read-only and structurally sane. On `Err` the
/// query must never reach the graph store.
pub fn validate_read_only(cypher: &str) -> Result<()> {
    // Normalize: drop comments, collapse whitespace.
    let stripped = line_comment_pattern().replace_all(cypher, "");
    let stripped = block_comment_pattern().replace_all(&stripped, "");
    let normalized = stripped.split_whitespace().collect::<Vec<_>>().join(" ");

    if normalized.len() > MAX_QUERY_CHARS {
        return Err(rejected(format!(
            "query too long (max {} characters)",
            MAX_QUERY_CHARS
        )));
    }
    if normalized.is_empty() {
        return Err(rejected("empty query"));
    }

    let escaped_upper = escape_literals(&normalized).to_uppercase();

    for keyword in BLOCKED_KEYWORDS {
        // Word-boundary matching; multi-word keywords tolerate any
        // whitespace run between their words.
        let pattern = format!(r"\b{}\b", keyword.replace(' ', r"\s+"));
        let re = Regex::new(&pattern).expect("keyword patterns are static");
        if re.is_match(&escaped_upper) {
            return Err(rejected(format!(
                "query contains forbidden operation: {}",
                keyword
            )));
        }
    }

    let starts_valid = ["MATCH", "OPTIONAL MATCH", "WITH", "UNWIND"]
        .iter()
        .any(|prefix| {
            let pattern = format!(r"^\s*{}\b", prefix.replace(' ', r"\s+"));
            Regex::new(&pattern)
                .expect("prefix patterns are static")
                .is_match(&escaped_upper)
        });
    if !starts_valid {
        return Err(rejected(
            "query must start with MATCH, OPTIONAL MATCH, WITH, or UNWIND",
        ));
    }

    if !return_pattern().is_match(&escaped_upper) {
        return Err(rejected("query must contain a RETURN clause"));
    }

    // Non-ASCII is only tolerable inside string literals.
    let escaped = escape_literals(&normalized);
    if !escaped.is_ascii() {
        return Err(rejected(
            "query contains non-ASCII characters outside string literals",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_read() {
        validate_read_only("MATCH (n:Function) WHERE n.deleted = false RETURN n LIMIT 10")
            .unwrap();
        validate_read_only("OPTIONAL MATCH (n) RETURN n").unwrap();
        validate_read_only("UNWIND [1,2] AS x RETURN x").unwrap();
    }

    #[test]
    fn test_rejects_write_operations() {
        for query in [
            "MATCH (n) DETACH DELETE n RETURN n",
            "MATCH (n) DELETE n RETURN count(n)",
            "MATCH (n) SET n.deleted = true RETURN n",
            "CREATE (n:Memory) RETURN n",
            "MATCH (n) REMOVE n.content RETURN n",
            "MERGE (n:Memory {id: 'x'}) RETURN n",
            "MATCH (n) CALL apoc.doom() RETURN n",
            "MATCH (n) RETURN n FOREACH (x IN [1] | SET n.a = x)",
        ] {
            assert!(validate_read_only(query).is_err(), "accepted: {}", query);
        }
    }

    #[test]
    fn test_keywords_inside_literals_are_fine() {
        validate_read_only("MATCH (n) WHERE n.content = 'please DELETE me' RETURN n").unwrap();
        validate_read_only("MATCH (n) WHERE n.title = \"CREATE INDEX docs\" RETURN n").unwrap();
    }

    #[test]
    fn test_comments_are_stripped_before_checks() {
        validate_read_only("MATCH (n) // trailing comment\nRETURN n").unwrap();
        validate_read_only("/* leading */ MATCH (n) RETURN n").unwrap();
        // A write hidden only by a comment is still a write.
        assert!(validate_read_only("MATCH (n) /* x */ DELETE n RETURN n").is_err());
    }

    #[test]
    fn test_requires_read_start_and_return() {
        assert!(validate_read_only("RETURN 1").is_err());
        assert!(validate_read_only("MATCH (n)").is_err());
        assert!(validate_read_only("").is_err());
    }

    #[test]
    fn test_length_cap() {
        let long = format!("MATCH (n) WHERE n.a = '{}' RETURN n", "x".repeat(11_000));
        assert!(validate_read_only(&long).is_err());
    }

    #[test]
    fn test_non_ascii_outside_literals_rejected() {
        // Cyrillic 'Е' in a keyword position sneaks past naive matching.
        assert!(validate_read_only("MATCH (n) DЕLETE n RETURN n").is_err());
        // Non-ASCII inside a literal is legitimate data.
        validate_read_only("MATCH (n) WHERE n.content = 'héllo' RETURN n").unwrap();
    }

    #[test]
    fn test_word_boundaries_avoid_false_positives() {
        // "created_at" contains no standalone CREATE token.
        validate_read_only("MATCH (n) WHERE n.created_at = '2026' RETURN n").unwrap();
        validate_read_only("MATCH (n) WHERE n.dataset = 'x' RETURN n").unwrap();
    }
}
