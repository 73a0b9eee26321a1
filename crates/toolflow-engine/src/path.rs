//! Context path expressions.
//!
//! Grammar (one level of ternary only):
//!
//! ```text
//! expr      := literal | reference | reference '?' operand ':' operand
//! operand   := reference | literal
//! reference := '$.' segment ('.' segment)*
//! segment   := name ('[' digits ']')*
//! ```
//!
//! Text that does not start with `$.` is a literal and evaluates to itself.
//! Lookups that miss are not errors at the public boundary: [`resolve`]
//! logs the diagnostic and yields `null`, leaving it to the caller to decide
//! whether a `null` is acceptable.

use std::fmt;

use serde_json::Value;
use tracing::warn;

use toolflow_core::error::{FlowError, Result};

use crate::context::{type_name, WorkflowContext};

pub const PATH_PREFIX: &str = "$.";

/// Parsed path expression.
#[derive(Debug, Clone, PartialEq)]
pub enum PathExpr {
    Literal(String),
    Reference {
        source: String,
        segments: Vec<Segment>,
    },
    Ternary {
        condition: Box<PathExpr>,
        then: Box<PathExpr>,
        otherwise: Box<PathExpr>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Why an expression produced no value.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// The referenced path does not exist in the context.
    PathNotFound(String),
    /// A ternary condition resolved to something other than a boolean.
    InvalidCondition { condition: String, found: &'static str },
    /// The expression text could not be parsed.
    Malformed { path: String, reason: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PathNotFound(path) => write!(f, "Path not found: {}", path),
            Self::InvalidCondition { condition, found } => write!(
                f,
                "Condition must evaluate to boolean: {} (got {})",
                condition, found
            ),
            Self::Malformed { path, reason } => write!(f, "Malformed path {:?}: {}", path, reason),
        }
    }
}

impl PathExpr {
    /// Parse an expression. Never fails for literals.
    pub fn parse(input: &str) -> std::result::Result<PathExpr, Diagnostic> {
        if !input.starts_with(PATH_PREFIX) {
            return Ok(PathExpr::Literal(input.to_string()));
        }
        Parser::new(input).expression()
    }

    /// Evaluate against a context.
    pub fn evaluate(&self, context: &WorkflowContext) -> std::result::Result<Value, Diagnostic> {
        match self {
            PathExpr::Literal(text) => Ok(Value::String(text.clone())),
            PathExpr::Reference { source, segments } => lookup(context, segments)
                .cloned()
                .ok_or_else(|| Diagnostic::PathNotFound(source.clone())),
            PathExpr::Ternary {
                condition,
                then,
                otherwise,
            } => match condition.evaluate(context)? {
                Value::Bool(true) => then.evaluate(context),
                Value::Bool(false) => otherwise.evaluate(context),
                other => Err(Diagnostic::InvalidCondition {
                    condition: condition.to_string(),
                    found: type_name(&other),
                }),
            },
        }
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathExpr::Literal(text) => f.write_str(text),
            PathExpr::Reference { source, .. } => f.write_str(source),
            PathExpr::Ternary {
                condition,
                then,
                otherwise,
            } => write!(f, "{} ? {} : {}", condition, then, otherwise),
        }
    }
}

/// Resolve `path` against the context.
///
/// Empty paths are rejected with `InvalidPath`. Every other failure is
/// logged and degrades to `Value::Null`.
pub fn resolve(path: &str, context: &WorkflowContext) -> Result<Value> {
    match try_resolve(path, context)? {
        Ok(value) => Ok(value),
        Err(diagnostic) => {
            warn!(path = %path, "Error resolving context path: {}", diagnostic);
            Ok(Value::Null)
        }
    }
}

/// Like [`resolve`], but hands the diagnostic to the caller instead of
/// logging it.
pub fn try_resolve(
    path: &str,
    context: &WorkflowContext,
) -> Result<std::result::Result<Value, Diagnostic>> {
    if path.is_empty() {
        return Err(FlowError::InvalidPath(path.to_string()));
    }
    Ok(PathExpr::parse(path).and_then(|expr| expr.evaluate(context)))
}

fn lookup<'a>(context: &'a WorkflowContext, segments: &[Segment]) -> Option<&'a Value> {
    let (first, rest) = segments.split_first()?;
    let mut current = match first {
        Segment::Key(key) => context.get(key)?,
        Segment::Index(_) => return None,
    };

    for segment in rest {
        current = match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get(key)?,
            (Segment::Key(key), Value::Array(items)) => items.get(key.parse::<usize>().ok()?)?,
            (Segment::Index(i), Value::Array(items)) => items.get(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn expression(&mut self) -> std::result::Result<PathExpr, Diagnostic> {
        let condition = self.operand('?')?;
        if !self.eat('?') {
            return self.finish(condition);
        }

        let then = self.operand(':')?;
        if !self.eat(':') {
            return Err(self.malformed("ternary is missing ':'"));
        }
        let otherwise = self.operand('?')?;
        let expr = PathExpr::Ternary {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        };
        self.finish(expr)
    }

    fn finish(&self, expr: PathExpr) -> std::result::Result<PathExpr, Diagnostic> {
        if self.pos < self.src.len() {
            return Err(self.malformed("only a single ternary level is supported"));
        }
        Ok(expr)
    }

    /// Read up to the next `?` or `stop`, trimmed.
    fn operand(&mut self, stop: char) -> std::result::Result<PathExpr, Diagnostic> {
        let rest = &self.src[self.pos..];
        let len = rest.find(|c: char| c == '?' || c == stop).unwrap_or(rest.len());
        let text = rest[..len].trim();
        self.pos += len;

        if text.is_empty() {
            return Err(self.malformed("empty operand"));
        }
        match text.strip_prefix(PATH_PREFIX) {
            Some(body) => Ok(PathExpr::Reference {
                source: text.to_string(),
                segments: self.segments(body)?,
            }),
            None => Ok(PathExpr::Literal(text.to_string())),
        }
    }

    fn eat(&mut self, c: char) -> bool {
        if self.src[self.pos..].starts_with(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn segments(&self, body: &str) -> std::result::Result<Vec<Segment>, Diagnostic> {
        if body.is_empty() {
            return Err(self.malformed("invalid path after normalization"));
        }

        let mut segments = Vec::new();
        for part in body.split('.') {
            let (name, mut indices) = match part.find('[') {
                Some(i) => (&part[..i], &part[i..]),
                None => (part, ""),
            };
            if name.is_empty() {
                return Err(self.malformed("empty path segment"));
            }
            segments.push(Segment::Key(name.to_string()));

            while !indices.is_empty() {
                let close = indices
                    .find(']')
                    .ok_or_else(|| self.malformed("unclosed '['"))?;
                let digits = indices
                    .strip_prefix('[')
                    .map(|s| &s[..close - 1])
                    .ok_or_else(|| self.malformed("unexpected text after index"))?;
                let index = digits
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| self.malformed(&format!("invalid index {:?}", digits)))?;
                segments.push(Segment::Index(index));
                indices = &indices[close + 1..];
            }
        }
        Ok(segments)
    }

    fn malformed(&self, reason: &str) -> Diagnostic {
        Diagnostic::Malformed {
            path: self.src.to_string(),
            reason: reason.to_string(),
        }
    }
}
