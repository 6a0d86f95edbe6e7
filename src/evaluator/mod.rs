//! Expression evaluation against an instance document.
//!
//! Evaluation follows XPath 1.0 value semantics for the subset: four value
//! kinds (boolean, number, string, node-set) with the canonical casts
//! between them. A node-set used as a scalar takes the string-value of its
//! first node in document order.

pub mod functions;

use log::warn;

use crate::error::{EvalError, Result};
use crate::xml::{Document, NodeId};
use crate::xpath::ast::{Axis, BinaryOp, Expr, LocationPath, NameTest};
use crate::xpath::parse_expression;

pub use functions::FunctionRegistry;

/// Result of evaluating an expression
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean result
    Boolean(bool),
    /// Numeric result (XPath numbers are f64)
    Number(f64),
    /// String result
    String(String),
    /// Node-set result, in document order
    Nodeset(Vec<NodeId>),
}

impl Value {
    /// XPath boolean cast
    pub fn boolean(&self) -> bool {
        match self {
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Nodeset(ns) => !ns.is_empty(),
        }
    }

    /// XPath number cast; non-numeric strings become NaN
    pub fn number(&self, doc: &Document) -> f64 {
        match self {
            Value::Number(n) => *n,
            Value::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
            Value::Nodeset(_) => self.string(doc).trim().parse().unwrap_or(f64::NAN),
        }
    }

    /// XPath string cast
    pub fn string(&self, doc: &Document) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Boolean(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Nodeset(ns) => ns
                .first()
                .map(|&id| doc.string_value(id))
                .unwrap_or_default(),
        }
    }

    /// The node-set, or an error when this is a scalar
    pub fn nodeset(&self) -> Result<&[NodeId]> {
        match self {
            Value::Nodeset(ns) => Ok(ns),
            _ => Err(EvalError::NotANodeset.into()),
        }
    }
}

/// Render a number the way XPath's string() does: integers without a
/// fractional part, NaN as "NaN".
pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n == n.trunc() && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Everything a function or predicate sees while evaluating
pub struct EvalContext<'a> {
    /// The instance document
    pub doc: &'a Document,
    /// The context node
    pub node: NodeId,
    /// 1-based position within the node-set being filtered
    pub position: usize,
    /// Size of the node-set being filtered
    pub size: usize,
    /// Function table in effect
    pub registry: &'a FunctionRegistry,
}

/// Evaluates parsed expressions against a document.
pub struct Evaluator<'r> {
    registry: &'r FunctionRegistry,
}

impl Default for Evaluator<'static> {
    fn default() -> Self {
        Evaluator::new()
    }
}

impl Evaluator<'static> {
    /// An evaluator over the built-in function set
    pub fn new() -> Self {
        Evaluator {
            registry: functions::default_registry(),
        }
    }
}

impl<'r> Evaluator<'r> {
    /// An evaluator over a caller-extended function table
    pub fn with_registry(registry: &'r FunctionRegistry) -> Self {
        Evaluator { registry }
    }

    /// Evaluate a parsed expression with `context` as the context node.
    pub fn evaluate(&self, doc: &Document, context: NodeId, expr: &Expr) -> Result<Value> {
        let ctx = EvalContext {
            doc,
            node: context,
            position: 1,
            size: 1,
            registry: self.registry,
        };
        eval(&ctx, expr)
    }

    /// Resolve `context_path`, parse `expression`, and evaluate. The usual
    /// entry point for ad-hoc evaluation; the engine precompiles instead.
    pub fn evaluate_at(
        &self,
        doc: &Document,
        context_path: &str,
        expression: &str,
    ) -> Result<Value> {
        let context = resolve_context(doc, context_path)?;
        let expr = parse_expression(expression)?;
        self.evaluate(doc, context, &expr)
    }

    /// Convenience wrapper returning the boolean cast
    pub fn evaluate_bool(
        &self,
        doc: &Document,
        context_path: &str,
        expression: &str,
    ) -> Result<bool> {
        Ok(self.evaluate_at(doc, context_path, expression)?.boolean())
    }

    /// Convenience wrapper returning the string cast
    pub fn evaluate_string(
        &self,
        doc: &Document,
        context_path: &str,
        expression: &str,
    ) -> Result<String> {
        Ok(self.evaluate_at(doc, context_path, expression)?.string(doc))
    }

    /// Convenience wrapper returning the number cast
    pub fn evaluate_number(
        &self,
        doc: &Document,
        context_path: &str,
        expression: &str,
    ) -> Result<f64> {
        Ok(self.evaluate_at(doc, context_path, expression)?.number(doc))
    }
}

/// Resolve a context path to a single node. An empty match is an
/// evaluation error (the governed field is unevaluable); multiple matches
/// log a warning and the first node is used.
pub fn resolve_context(doc: &Document, path: &str) -> Result<NodeId> {
    let nodes = select_str(doc, path)?;
    match nodes.as_slice() {
        [] => Err(EvalError::MissingContext {
            path: path.to_string(),
        }
        .into()),
        [only] => Ok(*only),
        [first, ..] => {
            warn!(
                "context path '{path}' matches {} nodes, using the first",
                nodes.len()
            );
            Ok(*first)
        }
    }
}

/// Resolve a path string to a node-set from the document root, with the
/// built-in function table for any predicates.
pub fn select_str(doc: &Document, path: &str) -> Result<Vec<NodeId>> {
    let expr = parse_expression(path)?;
    match Evaluator::new().evaluate(doc, doc.root(), &expr)? {
        Value::Nodeset(ns) => Ok(ns),
        _ => Err(EvalError::NotANodeset.into()),
    }
}

/// Evaluate an expression within an existing context (used by predicates
/// and by functions that re-enter evaluation).
pub(crate) fn eval(ctx: &EvalContext<'_>, expr: &Expr) -> Result<Value> {
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Literal(s) => Ok(Value::String(s.clone())),
        Expr::Path(path) => Ok(Value::Nodeset(eval_path(ctx, path)?)),
        Expr::Negate(inner) => {
            let v = eval(ctx, inner)?;
            Ok(Value::Number(-v.number(ctx.doc)))
        }
        Expr::Binary { op, lhs, rhs } => eval_binary(ctx, *op, lhs, rhs),
        Expr::FunctionCall { name, args } => {
            let function =
                ctx.registry
                    .get(name)
                    .ok_or_else(|| EvalError::UnknownFunction {
                        name: name.clone(),
                    })?;
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(ctx, arg)?);
            }
            function(ctx, &values)
        }
        Expr::Union(lhs, rhs) => {
            let left = eval(ctx, lhs)?;
            let right = eval(ctx, rhs)?;
            let mut nodes = left.nodeset()?.to_vec();
            for &id in right.nodeset()? {
                if !nodes.contains(&id) {
                    nodes.push(id);
                }
            }
            nodes.sort_unstable();
            Ok(Value::Nodeset(nodes))
        }
    }
}

fn eval_binary(ctx: &EvalContext<'_>, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<Value> {
    // Short-circuit logic first.
    match op {
        BinaryOp::Or => {
            if eval(ctx, lhs)?.boolean() {
                return Ok(Value::Boolean(true));
            }
            return Ok(Value::Boolean(eval(ctx, rhs)?.boolean()));
        }
        BinaryOp::And => {
            if !eval(ctx, lhs)?.boolean() {
                return Ok(Value::Boolean(false));
            }
            return Ok(Value::Boolean(eval(ctx, rhs)?.boolean()));
        }
        _ => {}
    }

    let left = eval(ctx, lhs)?;
    let right = eval(ctx, rhs)?;
    let value = match op {
        BinaryOp::Eq => Value::Boolean(compare_eq(ctx.doc, &left, &right)),
        BinaryOp::Neq => Value::Boolean(!compare_eq(ctx.doc, &left, &right)),
        BinaryOp::Lt => numeric_compare(ctx.doc, &left, &right, |a, b| a < b),
        BinaryOp::Le => numeric_compare(ctx.doc, &left, &right, |a, b| a <= b),
        BinaryOp::Gt => numeric_compare(ctx.doc, &left, &right, |a, b| a > b),
        BinaryOp::Ge => numeric_compare(ctx.doc, &left, &right, |a, b| a >= b),
        BinaryOp::Add => Value::Number(left.number(ctx.doc) + right.number(ctx.doc)),
        BinaryOp::Sub => Value::Number(left.number(ctx.doc) - right.number(ctx.doc)),
        BinaryOp::Mul => Value::Number(left.number(ctx.doc) * right.number(ctx.doc)),
        BinaryOp::Div => Value::Number(left.number(ctx.doc) / right.number(ctx.doc)),
        BinaryOp::Mod => Value::Number(left.number(ctx.doc) % right.number(ctx.doc)),
        BinaryOp::Or | BinaryOp::And => unreachable!("handled above"),
    };
    Ok(value)
}

/// Equality per the subset's coercion rules: boolean wins, then number,
/// then string. Node-sets compare through their scalar cast (first node).
fn compare_eq(doc: &Document, left: &Value, right: &Value) -> bool {
    if matches!(left, Value::Boolean(_)) || matches!(right, Value::Boolean(_)) {
        return left.boolean() == right.boolean();
    }
    if matches!(left, Value::Number(_)) || matches!(right, Value::Number(_)) {
        let (a, b) = (left.number(doc), right.number(doc));
        return a == b; // NaN != NaN, as XPath requires
    }
    left.string(doc) == right.string(doc)
}

fn numeric_compare(
    doc: &Document,
    left: &Value,
    right: &Value,
    cmp: fn(f64, f64) -> bool,
) -> Value {
    Value::Boolean(cmp(left.number(doc), right.number(doc)))
}

fn eval_path(ctx: &EvalContext<'_>, path: &LocationPath) -> Result<Vec<NodeId>> {
    let mut current: Vec<NodeId> = if path.absolute {
        vec![ctx.doc.root()]
    } else {
        vec![ctx.node]
    };

    for step in &path.steps {
        let mut next: Vec<NodeId> = Vec::new();
        for &node in &current {
            match step.axis {
                Axis::SelfNode => {
                    if !next.contains(&node) {
                        next.push(node);
                    }
                }
                Axis::Parent => {
                    if let Some(parent) = ctx.doc.node(node).parent {
                        if !next.contains(&parent) {
                            next.push(parent);
                        }
                    }
                }
                Axis::Child => {
                    for &child in &ctx.doc.node(node).children {
                        let matches = match &step.name {
                            NameTest::Any => true,
                            NameTest::Named(name) => ctx.doc.node(child).name == *name,
                        };
                        if matches {
                            next.push(child);
                        }
                    }
                }
            }
        }
        for predicate in &step.predicates {
            next = apply_predicate(ctx, next, predicate)?;
        }
        current = next;
        if current.is_empty() {
            break;
        }
    }
    Ok(current)
}

fn apply_predicate(
    ctx: &EvalContext<'_>,
    nodes: Vec<NodeId>,
    predicate: &Expr,
) -> Result<Vec<NodeId>> {
    let size = nodes.len();
    let mut kept = Vec::new();
    for (index, node) in nodes.into_iter().enumerate() {
        let inner = EvalContext {
            doc: ctx.doc,
            node,
            position: index + 1,
            size,
            registry: ctx.registry,
        };
        let value = eval(&inner, predicate)?;
        let keep = match value {
            // A numeric predicate is a 1-based position filter.
            Value::Number(n) => (index + 1) as f64 == n,
            other => other.boolean(),
        };
        if keep {
            kept.push(node);
        }
    }
    Ok(kept)
}
