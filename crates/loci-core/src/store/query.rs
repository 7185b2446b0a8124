//! Read-only graph query parsing.
//!
//! The embedded graph store evaluates a small Cypher subset, enough for the
//! label-agnostic lookups the engine issues and for externally supplied
//! read-only queries that already passed the security validator:
//!
//! ```text
//! MATCH (n[:Label]) [WHERE <expr>] RETURN <items> [LIMIT <n|$param>]
//! expr  := term (OR term)*         term := factor (AND factor)*
//! factor:= '(' expr ')' | n.prop (= | <>) value | n.prop CONTAINS value
//! value := 'string' | "string" | number | true | false | null | $param
//! items := item (',' item)*  with optional AS alias
//! item  := n | n.prop | labels(n) | properties(n) | count(n)
//! ```
//!
//! Parsing is a hand-rolled recursive descent over a token stream; anything
//! outside the grammar is a validation error, never a panic.

use serde_json::Value;

use crate::error::{CoreError, Result};

// ============================================================================
// AST
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Value),
    Param(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Contains,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp {
        property: String,
        op: CmpOp,
        value: Operand,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReturnItem {
    /// `n` - the node's properties.
    Node { alias: Option<String> },
    /// `n.prop`
    Property {
        property: String,
        alias: Option<String>,
    },
    /// `labels(n)`
    Labels { alias: Option<String> },
    /// `properties(n)`
    Properties { alias: Option<String> },
    /// `count(n)` - collapses the result to a single row.
    Count { alias: Option<String> },
}

impl ReturnItem {
    /// Column name in the produced rows.
    pub fn column_name(&self, variable: &str) -> String {
        let default = match self {
            ReturnItem::Node { .. } => variable.to_string(),
            ReturnItem::Property { property, .. } => format!("{}.{}", variable, property),
            ReturnItem::Labels { .. } => format!("labels({})", variable),
            ReturnItem::Properties { .. } => format!("properties({})", variable),
            ReturnItem::Count { .. } => format!("count({})", variable),
        };
        match self {
            ReturnItem::Node { alias }
            | ReturnItem::Property { alias, .. }
            | ReturnItem::Labels { alias }
            | ReturnItem::Properties { alias }
            | ReturnItem::Count { alias } => alias.clone().unwrap_or(default),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LimitSpec {
    Literal(usize),
    Param(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuery {
    pub variable: String,
    pub label: Option<String>,
    pub predicate: Option<Expr>,
    pub returns: Vec<ReturnItem>,
    pub limit: Option<LimitSpec>,
}

// ============================================================================
// TOKENIZER
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Number(f64),
    Param(String),
    LParen,
    RParen,
    Colon,
    Dot,
    Comma,
    Eq,
    Ne,
}

fn unsupported(message: impl Into<String>) -> CoreError {
    CoreError::validation("cypher", message)
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ':' => {
                chars.next();
                tokens.push(Token::Colon);
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Eq);
            }
            '<' => {
                chars.next();
                if chars.next_if_eq(&'>').is_some() {
                    tokens.push(Token::Ne);
                } else {
                    return Err(unsupported("'<' is only supported as '<>'"));
                }
            }
            '$' => {
                chars.next();
                let name: String = std::iter::from_fn(|| {
                    chars.next_if(|c| c.is_alphanumeric() || *c == '_')
                })
                .collect();
                if name.is_empty() {
                    return Err(unsupported("'$' must be followed by a parameter name"));
                }
                tokens.push(Token::Param(name));
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                for ch in chars.by_ref() {
                    if ch == quote {
                        closed = true;
                        break;
                    }
                    text.push(ch);
                }
                if !closed {
                    return Err(unsupported("unterminated string literal"));
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let raw: String = std::iter::from_fn(|| {
                    chars.next_if(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                })
                .collect();
                let number = raw
                    .parse::<f64>()
                    .map_err(|_| unsupported(format!("bad number literal '{}'", raw)))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let word: String = std::iter::from_fn(|| {
                    chars.next_if(|c| c.is_alphanumeric() || *c == '_')
                })
                .collect();
                tokens.push(Token::Ident(word));
            }
            other => return Err(unsupported(format!("unexpected character '{}'", other))),
        }
    }

    Ok(tokens)
}

// ============================================================================
// PARSER
// ============================================================================

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        match self.next() {
            Some(found) if found == token => Ok(()),
            other => Err(unsupported(format!(
                "expected {:?}, found {:?}",
                token, other
            ))),
        }
    }

    /// Consume an identifier; case-insensitive keyword match when `keyword`
    /// is given.
    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        match self.next() {
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case(keyword) => Ok(()),
            other => Err(unsupported(format!(
                "expected {}, found {:?}",
                keyword, other
            ))),
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(word)) if word.eq_ignore_ascii_case(keyword))
    }

    fn ident(&mut self) -> Result<String> {
        match self.next() {
            Some(Token::Ident(word)) => Ok(word),
            other => Err(unsupported(format!("expected identifier, found {:?}", other))),
        }
    }

    fn operand(&mut self) -> Result<Operand> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Operand::Literal(Value::String(s))),
            Some(Token::Number(n)) => Ok(Operand::Literal(
                serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            )),
            Some(Token::Param(name)) => Ok(Operand::Param(name)),
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("true") => {
                Ok(Operand::Literal(Value::Bool(true)))
            }
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("false") => {
                Ok(Operand::Literal(Value::Bool(false)))
            }
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("null") => {
                Ok(Operand::Literal(Value::Null))
            }
            other => Err(unsupported(format!("expected value, found {:?}", other))),
        }
    }

    fn expr(&mut self, variable: &str) -> Result<Expr> {
        let mut left = self.term(variable)?;
        while self.peek_keyword("OR") {
            self.next();
            let right = self.term(variable)?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn term(&mut self, variable: &str) -> Result<Expr> {
        let mut left = self.factor(variable)?;
        while self.peek_keyword("AND") {
            self.next();
            let right = self.factor(variable)?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn factor(&mut self, variable: &str) -> Result<Expr> {
        if self.peek() == Some(&Token::LParen) {
            self.next();
            let inner = self.expr(variable)?;
            self.expect(Token::RParen)?;
            return Ok(inner);
        }

        let var = self.ident()?;
        if var != variable {
            return Err(unsupported(format!(
                "unknown variable '{}' (bound: '{}')",
                var, variable
            )));
        }
        self.expect(Token::Dot)?;
        let property = self.ident()?;

        let op = match self.next() {
            Some(Token::Eq) => CmpOp::Eq,
            Some(Token::Ne) => CmpOp::Ne,
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("CONTAINS") => CmpOp::Contains,
            other => {
                return Err(unsupported(format!(
                    "expected comparison operator, found {:?}",
                    other
                )))
            }
        };
        let value = self.operand()?;

        Ok(Expr::Cmp {
            property,
            op,
            value,
        })
    }

    fn return_item(&mut self, variable: &str) -> Result<ReturnItem> {
        let first = self.ident()?;

        let mut item = if self.peek() == Some(&Token::LParen) {
            self.next();
            let arg = self.ident()?;
            if arg != variable {
                return Err(unsupported(format!("unknown variable '{}'", arg)));
            }
            self.expect(Token::RParen)?;
            match first.to_ascii_lowercase().as_str() {
                "labels" => ReturnItem::Labels { alias: None },
                "properties" => ReturnItem::Properties { alias: None },
                "count" => ReturnItem::Count { alias: None },
                other => {
                    return Err(unsupported(format!("unsupported function '{}'", other)))
                }
            }
        } else if first == variable {
            if self.peek() == Some(&Token::Dot) {
                self.next();
                let property = self.ident()?;
                ReturnItem::Property {
                    property,
                    alias: None,
                }
            } else {
                ReturnItem::Node { alias: None }
            }
        } else {
            return Err(unsupported(format!("unknown variable '{}'", first)));
        };

        if self.peek_keyword("AS") {
            self.next();
            let alias = Some(self.ident()?);
            match &mut item {
                ReturnItem::Node { alias: a }
                | ReturnItem::Property { alias: a, .. }
                | ReturnItem::Labels { alias: a }
                | ReturnItem::Properties { alias: a }
                | ReturnItem::Count { alias: a } => *a = alias,
            }
        }

        Ok(item)
    }
}

/// Parse a query into its AST.
pub fn parse(query: &str) -> Result<ParsedQuery> {
    let mut parser = Parser {
        tokens: tokenize(query)?,
        position: 0,
    };

    parser.expect_keyword("MATCH")?;
    parser.expect(Token::LParen)?;
    let variable = parser.ident()?;
    let label = if parser.peek() == Some(&Token::Colon) {
        parser.next();
        Some(parser.ident()?)
    } else {
        None
    };
    parser.expect(Token::RParen)?;

    let predicate = if parser.peek_keyword("WHERE") {
        parser.next();
        Some(parser.expr(&variable)?)
    } else {
        None
    };

    parser.expect_keyword("RETURN")?;
    let mut returns = vec![parser.return_item(&variable)?];
    while parser.peek() == Some(&Token::Comma) {
        parser.next();
        returns.push(parser.return_item(&variable)?);
    }

    let limit = if parser.peek_keyword("LIMIT") {
        parser.next();
        match parser.next() {
            Some(Token::Number(n)) if n >= 0.0 => Some(LimitSpec::Literal(n as usize)),
            Some(Token::Param(name)) => Some(LimitSpec::Param(name)),
            other => return Err(unsupported(format!("bad LIMIT value: {:?}", other))),
        }
    } else {
        None
    };

    if parser.peek().is_some() {
        return Err(unsupported("trailing tokens after query"));
    }

    Ok(ParsedQuery {
        variable,
        label,
        predicate,
        returns,
        limit,
    })
}
