//! Registerable XPath function table and the built-in XForms set.
//!
//! The registry is the extension seam: embedders can register additional
//! functions, and the engine evaluates every expression against whichever
//! table it was handed. The built-ins cover what `calculate`/`constraint`/
//! `relevant` expressions use in practice, including the ODK additions
//! (`selected`, `selected-at`, `regex`, `coalesce`, `if`).

use chrono::Utc;
use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashMap;

use super::{EvalContext, Value};
use crate::error::{EvalError, Result};

/// An XPath function: evaluated arguments in, one value out
pub type XPathFn =
    Box<dyn Fn(&EvalContext<'_>, &[Value]) -> Result<Value> + Send + Sync + 'static>;

/// Named function table consulted by the evaluator
#[derive(Default)]
pub struct FunctionRegistry {
    functions: FxHashMap<String, XPathFn>,
}

impl FunctionRegistry {
    /// An empty table
    pub fn new() -> Self {
        FunctionRegistry::default()
    }

    /// A table preloaded with the built-in XForms functions
    pub fn standard() -> Self {
        let mut registry = FunctionRegistry::new();
        register_builtins(&mut registry);
        registry
    }

    /// Register (or replace) a function
    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&EvalContext<'_>, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Box::new(function));
    }

    /// Look up a function by name
    pub fn get(&self, name: &str) -> Option<&XPathFn> {
        self.functions.get(name)
    }

    /// Names of every registered function, unordered
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }
}

/// The shared built-in table used when no custom registry is supplied
pub fn default_registry() -> &'static FunctionRegistry {
    static REGISTRY: Lazy<FunctionRegistry> = Lazy::new(FunctionRegistry::standard);
    &REGISTRY
}

fn arity(name: &str, expected: usize, args: &[Value]) -> Result<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(EvalError::InvalidArity {
            name: name.to_string(),
            expected: expected.to_string(),
            actual: args.len(),
        }
        .into())
    }
}

fn arity_range(name: &str, min: usize, max: usize, args: &[Value]) -> Result<()> {
    if (min..=max).contains(&args.len()) {
        Ok(())
    } else {
        Err(EvalError::InvalidArity {
            name: name.to_string(),
            expected: format!("{min} to {max}"),
            actual: args.len(),
        }
        .into())
    }
}

fn register_builtins(registry: &mut FunctionRegistry) {
    registry.register("true", |_, args| {
        arity("true", 0, args)?;
        Ok(Value::Boolean(true))
    });
    registry.register("false", |_, args| {
        arity("false", 0, args)?;
        Ok(Value::Boolean(false))
    });
    registry.register("not", |_, args| {
        arity("not", 1, args)?;
        Ok(Value::Boolean(!args[0].boolean()))
    });
    registry.register("boolean", |_, args| {
        arity("boolean", 1, args)?;
        Ok(Value::Boolean(args[0].boolean()))
    });
    registry.register("string", |ctx, args| {
        arity_range("string", 0, 1, args)?;
        let s = match args.first() {
            Some(v) => v.string(ctx.doc),
            None => ctx.doc.string_value(ctx.node),
        };
        Ok(Value::String(s))
    });
    registry.register("number", |ctx, args| {
        arity_range("number", 0, 1, args)?;
        let n = match args.first() {
            Some(v) => v.number(ctx.doc),
            None => ctx
                .doc
                .string_value(ctx.node)
                .trim()
                .parse()
                .unwrap_or(f64::NAN),
        };
        Ok(Value::Number(n))
    });
    registry.register("concat", |ctx, args| {
        let mut out = String::new();
        for arg in args {
            out.push_str(&arg.string(ctx.doc));
        }
        Ok(Value::String(out))
    });
    registry.register("string-length", |ctx, args| {
        arity_range("string-length", 0, 1, args)?;
        let s = match args.first() {
            Some(v) => v.string(ctx.doc),
            None => ctx.doc.string_value(ctx.node),
        };
        Ok(Value::Number(s.chars().count() as f64))
    });
    registry.register("contains", |ctx, args| {
        arity("contains", 2, args)?;
        let haystack = args[0].string(ctx.doc);
        let needle = args[1].string(ctx.doc);
        Ok(Value::Boolean(haystack.contains(&needle)))
    });
    registry.register("starts-with", |ctx, args| {
        arity("starts-with", 2, args)?;
        let s = args[0].string(ctx.doc);
        let prefix = args[1].string(ctx.doc);
        Ok(Value::Boolean(s.starts_with(&prefix)))
    });
    // ODK substr: 0-based start inclusive, end exclusive; end defaults to
    // the string length.
    registry.register("substr", |ctx, args| {
        arity_range("substr", 2, 3, args)?;
        let s = args[0].string(ctx.doc);
        let chars: Vec<char> = s.chars().collect();
        let start = args[1].number(ctx.doc);
        let end = args
            .get(2)
            .map(|v| v.number(ctx.doc))
            .unwrap_or(chars.len() as f64);
        if start.is_nan() || end.is_nan() {
            return Ok(Value::String(String::new()));
        }
        let start = (start.max(0.0) as usize).min(chars.len());
        let end = (end.max(0.0) as usize).min(chars.len());
        let out: String = chars[start..end.max(start)].iter().collect();
        Ok(Value::String(out))
    });
    // selected(space-separated-list, value): multi-select membership test.
    registry.register("selected", |ctx, args| {
        arity("selected", 2, args)?;
        let list = args[0].string(ctx.doc);
        let value = args[1].string(ctx.doc);
        Ok(Value::Boolean(
            list.split_whitespace().any(|item| item == value),
        ))
    });
    registry.register("selected-at", |ctx, args| {
        arity("selected-at", 2, args)?;
        let list = args[0].string(ctx.doc);
        let index = args[1].number(ctx.doc);
        if index.is_nan() || index < 0.0 {
            return Ok(Value::String(String::new()));
        }
        let item = list
            .split_whitespace()
            .nth(index as usize)
            .unwrap_or_default();
        Ok(Value::String(item.to_string()))
    });
    registry.register("count", |_, args| {
        arity("count", 1, args)?;
        Ok(Value::Number(args[0].nodeset()?.len() as f64))
    });
    registry.register("sum", |ctx, args| {
        arity("sum", 1, args)?;
        let mut total = 0.0;
        for &id in args[0].nodeset()? {
            total += ctx
                .doc
                .string_value(id)
                .trim()
                .parse::<f64>()
                .unwrap_or(f64::NAN);
        }
        Ok(Value::Number(total))
    });
    registry.register("if", |ctx, args| {
        arity("if", 3, args)?;
        let chosen = if args[0].boolean() { &args[1] } else { &args[2] };
        Ok(Value::String(chosen.string(ctx.doc)))
    });
    // coalesce: first argument with a non-empty string cast.
    registry.register("coalesce", |ctx, args| {
        arity("coalesce", 2, args)?;
        let first = args[0].string(ctx.doc);
        if !first.is_empty() {
            Ok(Value::String(first))
        } else {
            Ok(Value::String(args[1].string(ctx.doc)))
        }
    });
    registry.register("position", |ctx, args| {
        arity("position", 0, args)?;
        Ok(Value::Number(ctx.position as f64))
    });
    registry.register("last", |ctx, args| {
        arity("last", 0, args)?;
        Ok(Value::Number(ctx.size as f64))
    });
    registry.register("regex", |ctx, args| {
        arity("regex", 2, args)?;
        let value = args[0].string(ctx.doc);
        let pattern = args[1].string(ctx.doc);
        match Regex::new(&pattern) {
            Ok(re) => Ok(Value::Boolean(re.is_match(&value))),
            Err(err) => {
                warn!("regex('{pattern}') failed to compile: {err}");
                Err(EvalError::BadArgument {
                    name: "regex".to_string(),
                    message: format!("invalid pattern '{pattern}'"),
                }
                .into())
            }
        }
    });
    registry.register("today", |_, args| {
        arity("today", 0, args)?;
        Ok(Value::String(Utc::now().format("%Y-%m-%d").to_string()))
    });
    registry.register("now", |_, args| {
        arity("now", 0, args)?;
        Ok(Value::String(Utc::now().to_rfc3339()))
    });
    registry.register("round", |ctx, args| {
        arity("round", 1, args)?;
        Ok(Value::Number(args[0].number(ctx.doc).round()))
    });
}
