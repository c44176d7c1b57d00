//! A small standard evaluator.
//!
//! Placeholder bodies may be a string, number, boolean or `null` literal, a
//! dotted property path (`flowScope.greeting`), or a function call
//! (`fn:upper(name)`). Anything richer belongs to a full expression engine
//! plugged in through [`ExpressionFactory`].

use std::any::Any;
use std::sync::Arc;

use crate::context::ElContext;
use crate::error::ElError;
use crate::expression::{ExpressionFactory, LiteralExpression, MethodExpression, ValueExpression};
use crate::text::{scan, RawSegment};
use crate::value::Value;

/// Factory compiling expressions into [`Term`]-based evaluators.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardExpressionFactory;

impl StandardExpressionFactory {
    pub fn new() -> Self {
        Self
    }
}

impl ExpressionFactory for StandardExpressionFactory {
    fn create_value_expression(
        &self,
        _ctx: &ElContext,
        expression: &str,
    ) -> Result<Arc<dyn ValueExpression>, ElError> {
        let parts = scan(expression)?
            .into_iter()
            .map(|segment| match segment {
                RawSegment::Literal(s) => Ok(Part::Text(s)),
                RawSegment::Expression(e) => parse_placeholder(&e).map(Part::Term),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Arc::new(StandardValueExpression {
            source: expression.to_string(),
            parts,
        }))
    }

    fn create_method_expression(
        &self,
        _ctx: &ElContext,
        expression: &str,
    ) -> Result<Arc<dyn MethodExpression>, ElError> {
        let mut segments = scan(expression)?;
        if segments
            .iter()
            .all(|s| matches!(s, RawSegment::Literal(_)))
        {
            let text: String = segments
                .into_iter()
                .filter_map(|s| match s {
                    RawSegment::Literal(s) => Some(s),
                    RawSegment::Expression(_) => None,
                })
                .collect();
            return Ok(Arc::new(LiteralExpression::new(text)));
        }
        match (segments.len(), segments.pop()) {
            (1, Some(RawSegment::Expression(e))) => Ok(Arc::new(StandardMethodExpression {
                source: expression.to_string(),
                term: parse_placeholder(&e)?,
            })),
            _ => Err(ElError::Syntax {
                expression: expression.to_string(),
                message: "a method expression must be a single placeholder".to_string(),
            }),
        }
    }
}

// ──────────────────────────────────────────────
// Terms
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Term {
    Literal(Value),
    Path(Vec<String>),
    Call {
        prefix: String,
        name: String,
        args: Vec<Term>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Text(String),
    Term(Term),
}

/// Parse the body of a `${…}`/`#{…}` placeholder.
fn parse_placeholder(placeholder: &str) -> Result<Term, ElError> {
    let body = placeholder
        .get(2..placeholder.len().saturating_sub(1))
        .unwrap_or_default();
    let mut parser = TermParser {
        chars: body.chars().collect(),
        pos: 0,
        source: placeholder,
    };
    let term = parser.term()?;
    parser.skip_ws();
    if parser.pos < parser.chars.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(term)
}

struct TermParser<'a> {
    chars: Vec<char>,
    pos: usize,
    source: &'a str,
}

impl TermParser<'_> {
    fn error(&self, message: &str) -> ElError {
        ElError::Syntax {
            expression: self.source.to_string(),
            message: format!("{message} at offset {}", self.pos),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, c: char) -> Result<(), ElError> {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{c}'")))
        }
    }

    fn term(&mut self) -> Result<Term, ElError> {
        self.skip_ws();
        match self.peek() {
            Some(q @ ('\'' | '"')) => self.string(q),
            Some(c) if c.is_ascii_digit() || c == '-' => self.number(),
            Some(c) if c.is_alphabetic() || c == '_' => self.word(),
            Some(_) => Err(self.error("unexpected character")),
            None => Err(self.error("empty expression")),
        }
    }

    fn string(&mut self, quote: char) -> Result<Term, ElError> {
        self.pos += 1;
        let mut s = String::new();
        while let Some(c) = self.peek() {
            self.pos += 1;
            if c == '\\' {
                if let Some(next) = self.peek() {
                    s.push(next);
                    self.pos += 1;
                }
            } else if c == quote {
                return Ok(Term::Literal(Value::Text(s)));
            } else {
                s.push(c);
            }
        }
        Err(self.error("unterminated string"))
    }

    fn number(&mut self) -> Result<Term, ElError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if text.contains('.') {
            text.parse::<f64>()
                .map(|f| Term::Literal(Value::Float(f)))
                .map_err(|_| self.error("invalid number"))
        } else {
            text.parse::<i64>()
                .map(|i| Term::Literal(Value::Int(i)))
                .map_err(|_| self.error("invalid number"))
        }
    }

    fn ident(&mut self) -> Result<String, ElError> {
        self.skip_ws();
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error("expected identifier"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn word(&mut self) -> Result<Term, ElError> {
        let first = self.ident()?;
        self.skip_ws();
        match self.peek() {
            Some(':') => {
                self.pos += 1;
                let name = self.ident()?;
                self.expect('(')?;
                let mut args = Vec::new();
                self.skip_ws();
                if self.peek() == Some(')') {
                    self.pos += 1;
                } else {
                    loop {
                        args.push(self.term()?);
                        self.skip_ws();
                        match self.peek() {
                            Some(',') => self.pos += 1,
                            Some(')') => {
                                self.pos += 1;
                                break;
                            }
                            _ => return Err(self.error("expected ',' or ')'")),
                        }
                    }
                }
                Ok(Term::Call {
                    prefix: first,
                    name,
                    args,
                })
            }
            _ => match first.as_str() {
                "true" => Ok(Term::Literal(Value::Bool(true))),
                "false" => Ok(Term::Literal(Value::Bool(false))),
                "null" => Ok(Term::Literal(Value::Null)),
                _ => {
                    let mut path = vec![first];
                    while self.peek() == Some('.') {
                        self.pos += 1;
                        path.push(self.ident()?);
                        self.skip_ws();
                    }
                    Ok(Term::Path(path))
                }
            },
        }
    }
}

// ──────────────────────────────────────────────
// Evaluation
// ──────────────────────────────────────────────

fn property(base: Value, name: &str, source: &str) -> Result<Value, ElError> {
    match base {
        Value::Null => Ok(Value::Null),
        Value::Map(map) => Ok(map.get(name).cloned().unwrap_or_default()),
        Value::Scope(scope) => Ok(scope.get(name).unwrap_or_default()),
        other => Err(ElError::evaluation(format!(
            "property '{name}' not found on type {} in '{source}'",
            other.type_name()
        ))),
    }
}

fn eval_path(ctx: &ElContext, path: &[String], source: &str) -> Result<Value, ElError> {
    let Some((root, rest)) = path.split_first() else {
        return Ok(Value::Null);
    };
    let mut value = ctx.resolve_root(root)?.unwrap_or_default();
    for name in rest {
        value = property(value, name, source)?;
    }
    Ok(value)
}

fn eval(ctx: &ElContext, term: &Term, source: &str) -> Result<Value, ElError> {
    match term {
        Term::Literal(value) => Ok(value.clone()),
        Term::Path(path) => eval_path(ctx, path, source),
        Term::Call { prefix, name, args } => {
            let function = ctx
                .function_mapper()
                .resolve_function(prefix, name)
                .ok_or_else(|| ElError::FunctionNotFound {
                    prefix: prefix.clone(),
                    name: name.clone(),
                })?;
            let args = args
                .iter()
                .map(|a| eval(ctx, a, source))
                .collect::<Result<Vec<_>, _>>()?;
            function(&args)
        }
    }
}

// ──────────────────────────────────────────────
// Compiled expressions
// ──────────────────────────────────────────────

struct StandardValueExpression {
    source: String,
    parts: Vec<Part>,
}

impl StandardValueExpression {
    fn single_path(&self) -> Option<&[String]> {
        match self.parts.as_slice() {
            [Part::Term(Term::Path(path))] => Some(path),
            _ => None,
        }
    }

    fn not_writable(&self) -> ElError {
        ElError::PropertyNotWritable {
            expression: self.source.clone(),
        }
    }
}

impl ValueExpression for StandardValueExpression {
    fn expression_string(&self) -> &str {
        &self.source
    }

    fn get_value(&self, ctx: &ElContext) -> Result<Value, ElError> {
        match self.parts.as_slice() {
            [] => Ok(Value::Text(String::new())),
            [Part::Term(term)] => eval(ctx, term, &self.source),
            parts => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        Part::Text(s) => out.push_str(s),
                        Part::Term(term) => out.push_str(&eval(ctx, term, &self.source)?.to_string()),
                    }
                }
                Ok(Value::Text(out))
            }
        }
    }

    fn set_value(&self, ctx: &ElContext, value: Value) -> Result<(), ElError> {
        let path = self.single_path().ok_or_else(|| self.not_writable())?;
        match path {
            [root] => ctx.assign_root(root, value),
            [base @ .., last] => match eval_path(ctx, base, &self.source)? {
                Value::Scope(scope) => {
                    scope.insert(last.clone(), value);
                    Ok(())
                }
                Value::Null => Err(ElError::evaluation(format!(
                    "target unreachable, '{}' resolved to null",
                    base.join(".")
                ))),
                _ => Err(self.not_writable()),
            },
            [] => Err(self.not_writable()),
        }
    }

    fn is_read_only(&self, ctx: &ElContext) -> Result<bool, ElError> {
        match self.single_path() {
            Some([_]) => Ok(false),
            Some([base @ .., _]) => Ok(!matches!(
                eval_path(ctx, base, &self.source)?,
                Value::Scope(_)
            )),
            _ => Ok(true),
        }
    }

    fn is_literal_text(&self) -> bool {
        self.parts.iter().all(|p| matches!(p, Part::Text(_)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct StandardMethodExpression {
    source: String,
    term: Term,
}

impl MethodExpression for StandardMethodExpression {
    fn expression_string(&self) -> &str {
        &self.source
    }

    fn invoke(&self, ctx: &ElContext, params: &[Value]) -> Result<Value, ElError> {
        match &self.term {
            Term::Path(path) => match eval_path(ctx, path, &self.source)? {
                Value::Method(method) => method.invoke(ctx, params),
                _ => Err(ElError::MethodNotFound {
                    expression: self.source.clone(),
                }),
            },
            other => eval(ctx, other, &self.source),
        }
    }

    fn is_literal_text(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::FnMethod;
    use crate::mapper::{MapFunctionMapper, MapVariableMapper};
    use crate::value::ScopeMap;
    use std::collections::BTreeMap;

    struct ScopeResolver {
        name: &'static str,
        scope: ScopeMap,
    }

    impl crate::context::ElResolver for ScopeResolver {
        fn resolve(&self, _ctx: &ElContext, name: &str) -> Result<Option<Value>, ElError> {
            Ok((name == self.name).then(|| Value::Scope(self.scope.clone())))
        }
    }

    fn context_with_scope(scope: &ScopeMap) -> ElContext {
        let upper = MapFunctionMapper::new().with("fn", "upper", |args| {
            Ok(Value::Text(args.first().map(|a| a.to_string()).unwrap_or_default().to_uppercase()))
        });
        ElContext::new()
            .with_function_mapper(Arc::new(upper))
            .with_resolver(Arc::new(ScopeResolver {
                name: "flowScope",
                scope: scope.clone(),
            }))
    }

    #[test]
    fn literals_and_paths() {
        let scope = ScopeMap::new();
        scope.insert("greeting", "Hi".into());
        let mut user = BTreeMap::new();
        user.insert("name".to_string(), Value::text("Ada"));
        scope.insert("user", Value::Map(user));
        let ctx = context_with_scope(&scope);
        let factory = StandardExpressionFactory::new();

        let value = |src: &str| factory.create_value_expression(&ctx, src).unwrap().get_value(&ctx).unwrap();
        assert_eq!(value("#{'a}b'}"), Value::text("a}b"));
        assert_eq!(value("${42}"), Value::Int(42));
        assert_eq!(value("${-1.5}"), Value::Float(-1.5));
        assert_eq!(value("#{true}"), Value::Bool(true));
        assert_eq!(value("#{null}"), Value::Null);
        assert_eq!(value("#{flowScope.greeting}"), Value::text("Hi"));
        assert_eq!(value("#{flowScope.user.name}"), Value::text("Ada"));
        assert_eq!(value("#{flowScope.missing.deeper}"), Value::Null);
        assert_eq!(value("#{unknown}"), Value::Null);
        assert_eq!(value("Dear #{fn:upper(flowScope.user.name)}!"), Value::text("Dear ADA!"));
        assert_eq!(value("plain"), Value::text("plain"));
    }

    #[test]
    fn property_on_scalar_is_an_error() {
        let scope = ScopeMap::new();
        scope.insert("n", Value::Int(1));
        let ctx = context_with_scope(&scope);
        let expr = StandardExpressionFactory
            .create_value_expression(&ctx, "#{flowScope.n.x}")
            .unwrap();
        assert!(matches!(expr.get_value(&ctx), Err(ElError::Evaluation { .. })));
    }

    #[test]
    fn assignment_into_scope() {
        let scope = ScopeMap::new();
        let ctx = context_with_scope(&scope);
        let expr = StandardExpressionFactory
            .create_value_expression(&ctx, "#{flowScope.greeting}")
            .unwrap();
        assert!(!expr.is_read_only(&ctx).unwrap());
        expr.set_value(&ctx, "Hello".into()).unwrap();
        assert_eq!(scope.get("greeting"), Some(Value::text("Hello")));

        let literal = StandardExpressionFactory
            .create_value_expression(&ctx, "Hello")
            .unwrap();
        assert!(literal.is_literal_text());
        assert!(matches!(
            literal.set_value(&ctx, Value::Null),
            Err(ElError::PropertyNotWritable { .. })
        ));
    }

    #[test]
    fn root_assignment_goes_through_variable_mapper() {
        let holder = ScopeMap::new();
        let ctx = context_with_scope(&holder);
        let target = StandardExpressionFactory
            .create_value_expression(&ctx, "#{flowScope.slot}")
            .unwrap();
        let ctx = ctx.with_variable_mapper(Arc::new(MapVariableMapper::new().with("alias", target)));
        let alias = StandardExpressionFactory
            .create_value_expression(&ctx, "#{alias}")
            .unwrap();
        alias.set_value(&ctx, Value::Int(5)).unwrap();
        assert_eq!(holder.get("slot"), Some(Value::Int(5)));

        let orphan = StandardExpressionFactory
            .create_value_expression(&ctx, "#{nobody}")
            .unwrap();
        assert!(matches!(
            orphan.set_value(&ctx, Value::Int(1)),
            Err(ElError::PropertyNotWritable { .. })
        ));
    }

    #[test]
    fn method_expressions() {
        let scope = ScopeMap::new();
        scope.insert(
            "save",
            FnMethod::new("save", |_, params| Ok(Value::Int(params.len() as i64))).into_value(),
        );
        let ctx = context_with_scope(&scope);
        let factory = StandardExpressionFactory;

        let save = factory.create_method_expression(&ctx, "#{flowScope.save}").unwrap();
        assert_eq!(save.invoke(&ctx, &[Value::Null, Value::Null]).unwrap(), Value::Int(2));

        let missing = factory.create_method_expression(&ctx, "#{flowScope.nothing}").unwrap();
        assert!(missing.invoke(&ctx, &[]).unwrap_err().is_method_not_found());

        let literal = factory.create_method_expression(&ctx, "done").unwrap();
        assert!(literal.is_literal_text());
        assert_eq!(literal.invoke(&ctx, &[]).unwrap(), Value::text("done"));

        assert!(matches!(
            factory.create_method_expression(&ctx, "a #{b}"),
            Err(ElError::Syntax { .. })
        ));
    }

    #[test]
    fn syntax_errors() {
        let ctx = ElContext::new();
        for bad in ["#{}", "#{a.}", "#{1 2}", "#{fn:f(1}", "#{a b}"] {
            assert!(
                matches!(
                    StandardExpressionFactory.create_value_expression(&ctx, bad),
                    Err(ElError::Syntax { .. })
                ),
                "{bad}"
            );
        }
        assert!(matches!(
            StandardExpressionFactory
                .create_value_expression(&ctx, "#{fn:nope()}")
                .unwrap()
                .get_value(&ctx),
            Err(ElError::FunctionNotFound { .. })
        ));
    }
}
