//! Resolving placeholder keys to text.
//!
//! The replacement engine only needs a yes/no answer plus the rendered
//! string. [`Evaluator`] is that contract for `{{expr}}` tokens and
//! [`PlaceholderMap`] is the flat lookup used for `{key}` tokens.
//! [`PathEvaluator`] is a small built-in evaluator over JSON contexts.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::placeholder::Placeholder;

/// Flat key to replacement mapping for the simple `{key}` syntax.
pub type PlaceholderMap = HashMap<String, String>;

/// Outcome of evaluating one placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(String),
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    #[error("can't evaluate field {0}")]
    MissingField(String),

    #[error("function \"{0}\" not defined")]
    UnknownFunction(String),

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("error calling {name}: {reason}")]
    Function { name: String, reason: String },
}

impl EvalError {
    /// Missing data rather than a broken expression.
    pub fn is_missing_field(&self) -> bool {
        matches!(self, EvalError::MissingField(_))
    }
}

/// Evaluates placeholder expressions against a context.
pub trait Evaluator {
    type Context: ?Sized;

    fn evaluate(&self, expression: &str, context: &Self::Context) -> Result<Resolution, EvalError>;
}

/// Resolves located placeholders; the seam the replacement engine calls.
pub trait Resolver {
    fn resolve(&self, placeholder: &Placeholder) -> Result<Resolution, EvalError>;
}

impl Resolver for PlaceholderMap {
    fn resolve(&self, placeholder: &Placeholder) -> Result<Resolution, EvalError> {
        Ok(match self.get(&placeholder.key) {
            Some(value) => Resolution::Found(value.clone()),
            None => Resolution::NotFound,
        })
    }
}

/// Binds an evaluator to an optional context. Without a context nothing
/// resolves.
pub struct ContextResolver<'a, E: Evaluator + ?Sized> {
    evaluator: &'a E,
    context: Option<&'a E::Context>,
}

impl<'a, E: Evaluator + ?Sized> ContextResolver<'a, E> {
    pub fn new(evaluator: &'a E, context: Option<&'a E::Context>) -> Self {
        Self { evaluator, context }
    }
}

impl<E: Evaluator + ?Sized> Resolver for ContextResolver<'_, E> {
    fn resolve(&self, placeholder: &Placeholder) -> Result<Resolution, EvalError> {
        match self.context {
            Some(context) => self.evaluator.evaluate(&placeholder.key, context),
            None => Ok(Resolution::NotFound),
        }
    }
}

pub type TemplateFn = Box<dyn Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync>;

/// Named functions callable from expression pipelines.
///
/// A function receives its literal arguments followed by the value piped
/// into it, so `{{.name | default "n/a"}}` calls `default("n/a", name)`.
#[derive(Default)]
pub struct FunctionTable {
    functions: HashMap<String, TemplateFn>,
}

impl fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FunctionTable").field("functions", &names).finish()
    }
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with `upper`, `lower`, `trim`, `title`, `join` and `default`.
    pub fn with_builtins() -> Self {
        let mut table = Self::new();
        table
            .register("upper", |args| map_text(args, "upper", |s| s.to_uppercase()))
            .register("lower", |args| map_text(args, "lower", |s| s.to_lowercase()))
            .register("trim", |args| map_text(args, "trim", |s| s.trim().to_string()))
            .register("title", |args| map_text(args, "title", title_case))
            .register("join", join)
            .register("default", default_value);
        table
    }

    pub fn register<F>(&mut self, name: impl Into<String>, function: F) -> &mut Self
    where
        F: Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Box::new(function));
        self
    }

    pub fn get(&self, name: &str) -> Option<&TemplateFn> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

fn map_text(args: &[Value], name: &str, f: impl Fn(&str) -> String) -> Result<Value, EvalError> {
    match args {
        [Value::Null] => Ok(Value::Null),
        [value] => Ok(Value::String(f(&render(value)))),
        _ => Err(EvalError::Function {
            name: name.to_string(),
            reason: format!("wrong number of args: want 1 got {}", args.len()),
        }),
    }
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for ch in text.chars() {
        if at_word_start {
            out.extend(ch.to_uppercase());
        } else {
            out.push(ch);
        }
        at_word_start = ch.is_whitespace();
    }
    out
}

fn join(args: &[Value]) -> Result<Value, EvalError> {
    let (separator, items) = match args {
        [Value::String(sep), Value::Array(items)] | [Value::Array(items), Value::String(sep)] => {
            (sep.as_str(), items)
        }
        [_, Value::Null] | [Value::Null, _] => return Ok(Value::Null),
        _ => {
            return Err(EvalError::Function {
                name: "join".to_string(),
                reason: "expected a separator and a list".to_string(),
            })
        }
    };
    let parts: Vec<String> = items.iter().map(render).collect();
    Ok(Value::String(parts.join(separator)))
}

fn default_value(args: &[Value]) -> Result<Value, EvalError> {
    match args {
        [fallback, Value::Null] => Ok(fallback.clone()),
        [fallback, Value::String(s)] if s.is_empty() => Ok(fallback.clone()),
        [_, value] => Ok(value.clone()),
        _ => Err(EvalError::Function {
            name: "default".to_string(),
            reason: format!("wrong number of args: want 2 got {}", args.len()),
        }),
    }
}

/// Text form of a value as written into the document.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Pipe,
    /// `.a.b.0`; empty for `.`
    Path(Vec<String>),
    Ident(String),
    Literal(Value),
}

fn tokenize(expression: &str) -> Result<Vec<Token>, EvalError> {
    let mut tokens = Vec::new();
    let mut chars = expression.char_indices().peekable();

    while let Some(&(start, ch)) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '|' => {
                chars.next();
                tokens.push(Token::Pipe);
            }
            '"' => {
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some((_, 'n')) => text.push('\n'),
                            Some((_, 't')) => text.push('\t'),
                            Some((_, other)) => text.push(other),
                            None => break,
                        },
                        _ => text.push(c),
                    }
                }
                if !closed {
                    return Err(EvalError::Syntax("unterminated quoted string".to_string()));
                }
                tokens.push(Token::Literal(Value::String(text)));
            }
            _ => {
                let mut end = expression.len();
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_whitespace() || c == '|' || c == '"' {
                        end = i;
                        break;
                    }
                    chars.next();
                }
                tokens.push(word_token(&expression[start..end])?);
            }
        }
    }
    Ok(tokens)
}

fn word_token(word: &str) -> Result<Token, EvalError> {
    if let Some(path) = word.strip_prefix('.') {
        if path.is_empty() {
            return Ok(Token::Path(Vec::new()));
        }
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(EvalError::Syntax(format!("bad field path {}", word)));
        }
        return Ok(Token::Path(segments));
    }

    match word {
        "true" => return Ok(Token::Literal(Value::Bool(true))),
        "false" => return Ok(Token::Literal(Value::Bool(false))),
        "nil" => return Ok(Token::Literal(Value::Null)),
        _ => {}
    }

    if word.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
        let number: serde_json::Number = serde_json::from_str(word)
            .map_err(|_| EvalError::Syntax(format!("bad number syntax: {}", word)))?;
        return Ok(Token::Literal(Value::Number(number)));
    }

    if word.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Ok(Token::Ident(word.to_string()));
    }

    Err(EvalError::Syntax(format!("unexpected \"{}\" in operand", word)))
}

/// Field-access evaluator over `serde_json::Value` contexts.
///
/// Supports `.`, `.field`, `.a.b.0` paths, string/number/bool literals and
/// `|` pipelines into a [`FunctionTable`]. A missing key or a `null` value
/// resolves to [`Resolution::NotFound`].
#[derive(Debug)]
pub struct PathEvaluator {
    functions: FunctionTable,
}

impl Default for PathEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl PathEvaluator {
    pub fn new() -> Self {
        Self::with_functions(FunctionTable::with_builtins())
    }

    pub fn with_functions(functions: FunctionTable) -> Self {
        Self { functions }
    }

    pub fn functions_mut(&mut self) -> &mut FunctionTable {
        &mut self.functions
    }

    fn lookup(&self, path: &[String], context: &Value) -> Result<Value, EvalError> {
        let mut current = context;
        for (depth, segment) in path.iter().enumerate() {
            let next = match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                Value::Null => return Ok(Value::Null),
                _ => return Err(EvalError::MissingField(path[..=depth].join("."))),
            };
            match next {
                Some(value) => current = value,
                None => return Ok(Value::Null),
            }
        }
        Ok(current.clone())
    }

    fn operand(&self, token: &Token, context: &Value) -> Result<Value, EvalError> {
        match token {
            Token::Path(path) => self.lookup(path, context),
            Token::Literal(value) => Ok(value.clone()),
            Token::Ident(name) => Err(EvalError::Syntax(format!(
                "function \"{}\" used as an argument",
                name
            ))),
            Token::Pipe => Err(EvalError::Syntax("unexpected |".to_string())),
        }
    }

    fn command(&self, tokens: &[Token], piped: Option<Value>, context: &Value) -> Result<Value, EvalError> {
        match tokens {
            [] => Err(EvalError::Syntax("missing value for command".to_string())),
            [Token::Ident(name), args @ ..] => {
                let function = self
                    .functions
                    .get(name)
                    .ok_or_else(|| EvalError::UnknownFunction(name.clone()))?;
                let mut values = args
                    .iter()
                    .map(|arg| self.operand(arg, context))
                    .collect::<Result<Vec<_>, _>>()?;
                values.extend(piped);
                function(values.as_slice())
            }
            [operand] if piped.is_none() => self.operand(operand, context),
            _ => Err(EvalError::Syntax(
                "can't give argument to non-function".to_string(),
            )),
        }
    }
}

impl Evaluator for PathEvaluator {
    type Context = Value;

    fn evaluate(&self, expression: &str, context: &Value) -> Result<Resolution, EvalError> {
        let tokens = tokenize(expression)?;
        let mut piped = None;
        for command in tokens.split(|token| *token == Token::Pipe) {
            piped = Some(self.command(command, piped, context)?);
        }

        Ok(match piped {
            None | Some(Value::Null) => Resolution::NotFound,
            Some(value) => Resolution::Found(render(&value)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(expression: &str, context: &Value) -> Result<Resolution, EvalError> {
        PathEvaluator::new().evaluate(expression, context)
    }

    fn found(text: &str) -> Result<Resolution, EvalError> {
        Ok(Resolution::Found(text.to_string()))
    }

    #[test]
    fn test_field_access() {
        let ctx = json!({
            "name": "Ada",
            "age": 36,
            "active": true,
            "company": {"name": "Engines Ltd", "staff": [{"name": "Charles"}]}
        });

        assert_eq!(eval(".name", &ctx), found("Ada"));
        assert_eq!(eval(" .age ", &ctx), found("36"));
        assert_eq!(eval(".active", &ctx), found("true"));
        assert_eq!(eval(".company.name", &ctx), found("Engines Ltd"));
        assert_eq!(eval(".company.staff.0.name", &ctx), found("Charles"));
        assert_eq!(eval("\"literal\"", &ctx), found("literal"));
    }

    #[test]
    fn test_missing_values_are_not_found() {
        let ctx = json!({"name": "Ada", "nothing": null, "list": [1]});

        assert_eq!(eval(".missing", &ctx), Ok(Resolution::NotFound));
        assert_eq!(eval(".nothing", &ctx), Ok(Resolution::NotFound));
        assert_eq!(eval(".missing.deeper", &ctx), Ok(Resolution::NotFound));
        assert_eq!(eval(".list.3", &ctx), Ok(Resolution::NotFound));
        assert_eq!(eval(".missing | upper", &ctx), Ok(Resolution::NotFound));

        let err = eval(".name.first", &ctx).unwrap_err();
        assert!(err.is_missing_field());
    }

    #[test]
    fn test_pipelines_and_builtins() {
        let ctx = json!({"name": "ada lovelace", "tags": ["a", "b"], "empty": ""});

        assert_eq!(eval(".name | upper", &ctx), found("ADA LOVELACE"));
        assert_eq!(eval("upper .name", &ctx), found("ADA LOVELACE"));
        assert_eq!(eval(".name | title", &ctx), found("Ada Lovelace"));
        assert_eq!(eval(".tags | join \", \"", &ctx), found("a, b"));
        assert_eq!(eval(".missing | default \"n/a\"", &ctx), found("n/a"));
        assert_eq!(eval(".empty | default \"n/a\"", &ctx), found("n/a"));
        assert_eq!(eval(".name | default \"n/a\" | upper", &ctx), found("ADA LOVELACE"));
    }

    #[test]
    fn test_custom_functions() {
        let mut evaluator = PathEvaluator::new();
        evaluator.functions_mut().register("shout", |args| match args {
            [Value::String(s)] => Ok(Value::String(format!("{}!", s))),
            _ => Ok(Value::Null),
        });

        let ctx = json!({"word": "hi"});
        assert_eq!(evaluator.evaluate(".word | shout", &ctx), found("hi!"));
        assert!(evaluator.functions_mut().contains("upper"));
    }

    #[test]
    fn test_broken_expressions() {
        let ctx = json!({"name": "Ada"});

        assert_eq!(
            eval(".name | frobnicate", &ctx),
            Err(EvalError::UnknownFunction("frobnicate".to_string()))
        );
        assert!(matches!(eval("\"open", &ctx), Err(EvalError::Syntax(_))));
        assert!(matches!(eval(".name .name", &ctx), Err(EvalError::Syntax(_))));
        assert!(matches!(eval(".a..b", &ctx), Err(EvalError::Syntax(_))));
        assert!(matches!(eval(".name |", &ctx), Err(EvalError::Syntax(_))));
    }

    #[test]
    fn test_placeholder_map_resolver() {
        use crate::placeholder::{locate_placeholders, Syntax};
        use crate::run::parse_runs;

        let xml = br#"<w:r xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:t>{title} {other}</w:t></w:r>"#;
        let runs = parse_runs(xml).unwrap();
        let found = locate_placeholders(&runs, xml, Syntax::Simple);

        let mut map = PlaceholderMap::new();
        map.insert("title".to_string(), "Dr.".to_string());

        assert_eq!(map.resolve(&found[0]), Ok(Resolution::Found("Dr.".to_string())));
        assert_eq!(map.resolve(&found[1]), Ok(Resolution::NotFound));
    }

    #[test]
    fn test_context_resolver_without_context() {
        use crate::placeholder::{locate_placeholders, Syntax};
        use crate::run::parse_runs;

        let xml = br#"<w:r xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:t>{{.name}}</w:t></w:r>"#;
        let runs = parse_runs(xml).unwrap();
        let found = locate_placeholders(&runs, xml, Syntax::Expression);
        let evaluator = PathEvaluator::new();

        let resolver = ContextResolver::new(&evaluator, None);
        assert_eq!(resolver.resolve(&found[0]), Ok(Resolution::NotFound));

        let ctx = json!({"name": "Ada"});
        let resolver = ContextResolver::new(&evaluator, Some(&ctx));
        assert_eq!(resolver.resolve(&found[0]), Ok(Resolution::Found("Ada".to_string())));
    }
}
