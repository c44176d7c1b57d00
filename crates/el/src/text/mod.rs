//! Template text split into literal runs and `${…}` / `#{…}` placeholders.
//!
//! Scanning is a single left-to-right pass. A backslash directly in front of
//! a marker emits the marker literally. Placeholder bodies are brace-matched
//! with a string-aware sub-scan, so `#{m['}']}` is one placeholder.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::composite::ContextualCompositeValueExpression;
use crate::context::ElContext;
use crate::error::ElError;
use crate::expression::{ExpressionFactory, Location, ValueExpression};
use crate::value::Value;

static COMPOSITE_COMPONENT_EXPRESSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r".(?:[ ]+|[\[{,(])cc[.].+[}]").expect("static pattern")
});

static COMPOSITE_LOOKUP_WITH_ARGS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:[ ]+|[\[{,(])cc[.]attrs[.]\w+[(].+[)]").expect("static pattern")
});

static COMPOSITE_METHOD_LOOKUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^.[{]cc[.]attrs[.]\w+[}]$").expect("static pattern")
});

/// Whether `expression` refers to the enclosing composite component (`cc.`).
pub fn is_composite_component_expression(expression: &str) -> bool {
    COMPOSITE_COMPONENT_EXPRESSION.is_match(expression)
}

/// Whether `expression` looks up a composite attribute with arguments,
/// e.g. `#{cc.attrs.action(1)}`.
pub fn is_composite_lookup_with_args(expression: &str) -> bool {
    COMPOSITE_LOOKUP_WITH_ARGS.is_match(expression)
}

/// Whether `expression` is exactly a simple attribute lookup such as
/// `#{cc.attrs.action}`.
pub fn is_composite_method_lookup(expression: &str) -> bool {
    COMPOSITE_METHOD_LOOKUP.is_match(expression)
}

// ──────────────────────────────────────────────
// Scanner
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RawSegment {
    Literal(String),
    /// Full placeholder text including its marker and braces.
    Expression(String),
}

pub(crate) fn scan(text: &str) -> Result<Vec<RawSegment>, ElError> {
    let chars: Vec<char> = text.chars().collect();
    let mut segments = Vec::new();
    let mut buffer = String::new();
    let mut escaped = false;
    let mut pos = 0usize;

    while pos < chars.len() {
        let c = chars[pos];

        if c == '\\' {
            escaped = !escaped;
            if escaped && matches!(chars.get(pos + 1), Some('$') | Some('#')) {
                pos += 1;
                continue;
            }
        } else if !escaped && (c == '$' || c == '#') && chars.get(pos + 1) == Some(&'{') {
            if !buffer.is_empty() {
                segments.push(RawSegment::Literal(std::mem::take(&mut buffer)));
            }
            let len = placeholder_len(&chars, pos)?;
            segments.push(RawSegment::Expression(
                chars[pos..pos + len].iter().collect(),
            ));
            pos += len;
            continue;
        }

        escaped = false;
        buffer.push(c);
        pos += 1;
    }

    if !buffer.is_empty() {
        segments.push(RawSegment::Literal(buffer));
    }
    Ok(segments)
}

/// Length of the placeholder starting at `start` (the marker) up to and
/// including its closing brace.
fn placeholder_len(chars: &[char], start: usize) -> Result<usize, ElError> {
    let mut pos = start;
    let mut quote: Option<char> = None;
    let mut depth = 0usize;

    while pos < chars.len() {
        let c = chars[pos];
        if c == '\\' && pos + 1 < chars.len() {
            pos += 1;
        } else if c == '\'' || c == '"' {
            match quote {
                Some(q) if q == c => quote = None,
                None => quote = Some(c),
                Some(_) => {}
            }
        } else if quote.is_none() && c == '{' {
            depth += 1;
        } else if quote.is_none() && c == '}' {
            if depth > 1 {
                depth -= 1;
            } else {
                return Ok(pos - start + 1);
            }
        }
        pos += 1;
    }

    Err(ElError::Unbalanced {
        fragment: chars[start..].iter().collect(),
    })
}

// ──────────────────────────────────────────────
// ExpressionText
// ──────────────────────────────────────────────

/// Parsed template text.
///
/// Text with no placeholder parses to `Literal`, text that is exactly one
/// placeholder parses to `Variable`, anything else to `Composite`.
#[derive(Clone)]
pub enum ExpressionText {
    Literal(String),
    Variable(Arc<dyn ValueExpression>),
    Composite(Vec<ExpressionText>),
}

enum Compile<'a> {
    /// Placeholders are kept as unevaluated source.
    Unbound,
    /// Placeholders are compiled by the factory.
    Validated(&'a dyn ExpressionFactory, &'a ElContext),
    /// Composite references become contextual expressions; other
    /// placeholders stay unbound.
    Aliased(&'a dyn ExpressionFactory, &'a ElContext, &'a str),
}

impl ExpressionText {
    /// Parse without compiling placeholders. Placeholders evaluate to
    /// `Null` until [`ExpressionText::apply`] compiles them.
    pub fn parse(text: &str) -> Result<Self, ElError> {
        Self::parse_with(text, Compile::Unbound)
    }

    /// Parse and compile every placeholder with `factory`.
    pub fn parse_validated(
        factory: &dyn ExpressionFactory,
        ctx: &ElContext,
        text: &str,
    ) -> Result<Self, ElError> {
        Self::parse_with(text, Compile::Validated(factory, ctx))
    }

    /// Parse text authored in the document `alias`. Placeholders that refer
    /// to the enclosing composite component are bound to location
    /// `(alias, -1, -1)`; the rest evaluate to `Null` until applied.
    pub fn parse_with_alias(
        factory: &dyn ExpressionFactory,
        ctx: &ElContext,
        text: &str,
        alias: &str,
    ) -> Result<Self, ElError> {
        Self::parse_with(text, Compile::Aliased(factory, ctx, alias))
    }

    fn parse_with(text: &str, mode: Compile<'_>) -> Result<Self, ElError> {
        let mut parts = scan(text)?
            .into_iter()
            .map(|segment| match segment {
                RawSegment::Literal(s) => Ok(ExpressionText::Literal(s)),
                RawSegment::Expression(expr) => compile(&mode, expr).map(ExpressionText::Variable),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(match parts.len() {
            0 => ExpressionText::Literal(String::new()),
            1 => parts.remove(0),
            _ => ExpressionText::Composite(parts),
        })
    }

    /// Whether `text` contains no placeholder.
    pub fn is_literal_text(text: &str) -> Result<bool, ElError> {
        Ok(Self::parse(text)?.is_literal())
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, ExpressionText::Literal(_))
    }

    /// Recompile placeholders with `factory`. Contextual composite
    /// expressions are kept as they are.
    pub fn apply(&self, factory: &dyn ExpressionFactory, ctx: &ElContext) -> Result<Self, ElError> {
        Ok(match self {
            ExpressionText::Literal(s) => ExpressionText::Literal(s.clone()),
            ExpressionText::Variable(expr) => {
                if expr
                    .as_any()
                    .downcast_ref::<ContextualCompositeValueExpression>()
                    .is_some()
                {
                    ExpressionText::Variable(expr.clone())
                } else {
                    ExpressionText::Variable(
                        factory.create_value_expression(ctx, expr.expression_string())?,
                    )
                }
            }
            ExpressionText::Composite(parts) => ExpressionText::Composite(
                parts
                    .iter()
                    .map(|p| p.apply(factory, ctx))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    /// Evaluate to text; `Null` values render as the empty string.
    pub fn evaluate(&self, ctx: &ElContext) -> Result<String, ElError> {
        let mut out = String::new();
        self.write(ctx, &mut out, false)?;
        Ok(out)
    }

    /// Evaluate into `out`, XML-escaping evaluated values. Literal runs are
    /// written as authored.
    pub fn write_xml(&self, ctx: &ElContext, out: &mut String) -> Result<(), ElError> {
        self.write(ctx, out, true)
    }

    fn write(&self, ctx: &ElContext, out: &mut String, escape: bool) -> Result<(), ElError> {
        match self {
            ExpressionText::Literal(s) => out.push_str(s),
            ExpressionText::Variable(expr) => {
                let value = expr.get_value(ctx)?.to_string();
                if escape {
                    escape_xml_into(&value, out);
                } else {
                    out.push_str(&value);
                }
            }
            ExpressionText::Composite(parts) => {
                for part in parts {
                    part.write(ctx, out, escape)?;
                }
            }
        }
        Ok(())
    }
}

fn compile(mode: &Compile<'_>, expr: String) -> Result<Arc<dyn ValueExpression>, ElError> {
    match *mode {
        Compile::Unbound => Ok(Arc::new(UnboundExpression { source: expr })),
        Compile::Validated(factory, ctx) => factory.create_value_expression(ctx, &expr),
        Compile::Aliased(factory, ctx, alias) => {
            if !is_composite_component_expression(&expr) {
                return Ok(Arc::new(UnboundExpression { source: expr }));
            }
            if is_composite_lookup_with_args(&expr) {
                return Err(ElError::CompositeArgumentsNotLegal { expression: expr });
            }
            let delegate = factory.create_value_expression(ctx, &expr)?;
            Ok(Arc::new(ContextualCompositeValueExpression::new(
                Location::aliased(alias),
                delegate,
            )))
        }
    }
}

fn escape_xml_into(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
}

impl fmt::Display for ExpressionText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpressionText::Literal(s) => f.write_str(s),
            ExpressionText::Variable(expr) => f.write_str(expr.expression_string()),
            ExpressionText::Composite(parts) => parts.iter().try_for_each(|p| write!(f, "{p}")),
        }
    }
}

impl fmt::Debug for ExpressionText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpressionText::Literal(s) => f.debug_tuple("Literal").field(s).finish(),
            ExpressionText::Variable(expr) => f
                .debug_tuple("Variable")
                .field(&expr.expression_string())
                .finish(),
            ExpressionText::Composite(parts) => f.debug_tuple("Composite").field(parts).finish(),
        }
    }
}

// ──────────────────────────────────────────────
// Unbound placeholder
// ──────────────────────────────────────────────

/// Placeholder kept as source text only.
struct UnboundExpression {
    source: String,
}

impl ValueExpression for UnboundExpression {
    fn expression_string(&self) -> &str {
        &self.source
    }

    fn get_value(&self, _ctx: &ElContext) -> Result<Value, ElError> {
        Ok(Value::Null)
    }

    fn set_value(&self, _ctx: &ElContext, _value: Value) -> Result<(), ElError> {
        Err(ElError::PropertyNotWritable {
            expression: self.source.clone(),
        })
    }

    fn is_read_only(&self, _ctx: &ElContext) -> Result<bool, ElError> {
        Ok(true)
    }

    fn is_literal_text(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
