//! Expression tree for the XPath subset used by XForm binding attributes.

use std::fmt;

/// Binary operators, lowest to highest precedence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Logical `or`
    Or,
    /// Logical `and`
    And,
    /// `=`
    Eq,
    /// `!=`
    Neq,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `div`
    Div,
    /// `mod`
    Mod,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::Eq => "=",
            BinaryOp::Neq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "div",
            BinaryOp::Mod => "mod",
        };
        f.write_str(s)
    }
}

/// Step axis. Only the axes XForm binding expressions actually use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// `name` — child elements
    Child,
    /// `.` — the context node itself
    SelfNode,
    /// `..` — the parent element
    Parent,
}

/// Element name test within a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameTest {
    /// A specific element name
    Named(String),
    /// `*`
    Any,
}

/// One location step: axis, name test, and predicates
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Which direction this step moves
    pub axis: Axis,
    /// Name filter for child steps; ignored for `.`/`..`
    pub name: NameTest,
    /// `[...]` predicates, applied left to right. A numeric predicate is a
    /// 1-based position filter, anything else a boolean filter.
    pub predicates: Vec<Expr>,
}

impl Step {
    /// A plain child step with no predicates
    pub fn child(name: impl Into<String>) -> Step {
        Step {
            axis: Axis::Child,
            name: NameTest::Named(name.into()),
            predicates: Vec::new(),
        }
    }
}

/// A location path: `/data/person/age`, `../unit`, `.`
#[derive(Debug, Clone, PartialEq)]
pub struct LocationPath {
    /// True when the path starts at the document root (`/...`)
    pub absolute: bool,
    /// Steps in order
    pub steps: Vec<Step>,
}

/// A parsed expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Numeric literal
    Number(f64),
    /// String literal
    Literal(String),
    /// Location path
    Path(LocationPath),
    /// Binary operation
    Binary {
        /// The operator
        op: BinaryOp,
        /// Left operand
        lhs: Box<Expr>,
        /// Right operand
        rhs: Box<Expr>,
    },
    /// Unary minus
    Negate(Box<Expr>),
    /// Function call, resolved through the registry at evaluation time
    FunctionCall {
        /// Function name as written
        name: String,
        /// Arguments in order
        args: Vec<Expr>,
    },
    /// Node-set union (`|`)
    Union(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Collect every location path referenced anywhere in this expression,
    /// made absolute against `context`, the absolute path of the node the
    /// expression is evaluated at. Used to build the recalculation
    /// dependency graph.
    pub fn referenced_paths(&self, context: &str) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_paths(context, &mut out);
        out
    }

    fn collect_paths(&self, context: &str, out: &mut Vec<String>) {
        match self {
            Expr::Number(_) | Expr::Literal(_) => {}
            Expr::Path(path) => {
                if let Some(abs) = absolutize(path, context) {
                    if !out.contains(&abs) {
                        out.push(abs);
                    }
                }
                for step in &path.steps {
                    for pred in &step.predicates {
                        pred.collect_paths(context, out);
                    }
                }
            }
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_paths(context, out);
                rhs.collect_paths(context, out);
            }
            Expr::Negate(inner) => inner.collect_paths(context, out),
            Expr::FunctionCall { args, .. } => {
                for arg in args {
                    arg.collect_paths(context, out);
                }
            }
            Expr::Union(lhs, rhs) => {
                lhs.collect_paths(context, out);
                rhs.collect_paths(context, out);
            }
        }
    }
}

/// Resolve a location path to an absolute slash-joined path string, given
/// the absolute path of the context node. Returns `None` when the path
/// escapes above the root (malformed, treated as referencing nothing) or
/// contains a wildcard step (tracked conservatively as no dependency).
fn absolutize(path: &LocationPath, context: &str) -> Option<String> {
    let mut segments: Vec<&str> = if path.absolute {
        Vec::new()
    } else {
        context.split('/').filter(|s| !s.is_empty()).collect()
    };
    for step in &path.steps {
        match step.axis {
            Axis::SelfNode => {}
            Axis::Parent => {
                segments.pop()?;
            }
            Axis::Child => match &step.name {
                NameTest::Named(name) => segments.push(name),
                NameTest::Any => return None,
            },
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(format!("/{}", segments.join("/")))
}
