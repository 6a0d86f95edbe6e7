//! XPath subset: tokenizer, expression tree, and Pratt parser.
//!
//! The grammar is the practical subset XForm binding attributes use: child/
//! self/parent location steps with predicates, comparison and arithmetic
//! operators, node-set union, and function calls resolved through the
//! registry at evaluation time. Descendant (`//`) and attribute (`@`) steps
//! are rejected at parse time.

pub mod ast;
pub mod parser;
pub mod tokenizer;

pub use ast::{Axis, BinaryOp, Expr, LocationPath, NameTest, Step};
pub use parser::{parse_expression, parse_path};
