//! Error taxonomy, split along the crate's lifecycle phases: form
//! definition parsing, expression evaluation, and submission handling.

use thiserror::Error;

/// Any error this crate produces
#[derive(Error, Debug, Clone, PartialEq)]
pub enum XformError {
    /// Form definition or expression parsing failed
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// Expression evaluation failed
    #[error(transparent)]
    Eval(#[from] EvalError),
    /// Submission assembly or acknowledgement failed
    #[error(transparent)]
    Submission(#[from] SubmissionError),
}

/// Failures while parsing a form definition or an expression
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// The XML itself is malformed
    #[error("malformed form XML: {message}")]
    Xml {
        /// Underlying reader message
        message: String,
    },

    /// A `bind` declared a type outside the known vocabulary
    #[error("unknown binding type '{name}'")]
    UnknownBindingType {
        /// The `type` attribute as written
        name: String,
    },

    /// A control referenced a binding that does not exist
    #[error("control references unresolved binding '{reference}'")]
    UnresolvedBinding {
        /// The `ref` or `bind` value as written
        reference: String,
    },

    /// An XPath expression failed to parse
    #[error("invalid expression at offset {position}: {message}")]
    Expression {
        /// Byte offset into the expression text
        position: usize,
        /// What went wrong
        message: String,
    },

    /// The model carried no `<instance>` template
    #[error("form definition has no instance template")]
    MissingInstance,
}

impl ParseError {
    /// Wrap an underlying XML reader error
    pub fn xml(err: impl std::fmt::Display) -> ParseError {
        ParseError::Xml {
            message: err.to_string(),
        }
    }
}

/// Failures while evaluating an expression against an instance document
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    /// The context path matched no node
    #[error("context path '{path}' matches no node")]
    MissingContext {
        /// The unmatched path
        path: String,
    },

    /// A function call named something outside the registry
    #[error("unknown function '{name}'")]
    UnknownFunction {
        /// The function name as written
        name: String,
    },

    /// A function was called with the wrong number of arguments
    #[error("function '{name}' expects {expected} argument(s), got {actual}")]
    InvalidArity {
        /// The function name
        name: String,
        /// Expected count, or a range such as "0 to 1"
        expected: String,
        /// Actual argument count
        actual: usize,
    },

    /// A scalar appeared where a node-set is required
    #[error("expression does not yield a node-set")]
    NotANodeset,

    /// A function received an argument it cannot work with
    #[error("function '{name}': {message}")]
    BadArgument {
        /// The function name
        name: String,
        /// What was wrong with the argument
        message: String,
    },
}

/// Failures around submission assembly and acknowledgement
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubmissionError {
    /// The record was not acknowledged as complete
    #[error("submission was not acknowledged as complete")]
    Incomplete,

    /// The caller's transport reported a failure
    #[error("transport failure: {message}")]
    Transport {
        /// Transport-layer message
        message: String,
    },

    /// The server answered with a non-success status
    #[error("server returned status {code}")]
    Status {
        /// HTTP status code
        code: u16,
    },
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, XformError>;
