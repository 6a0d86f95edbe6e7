//! XForms engine: form-definition parsing, XPath-driven instance
//! evaluation, and the recalculate/revalidate/refresh cycle.
//!
//! A form definition (an XForm: `model`/`bind` schema, instance template,
//! and control markup) is parsed once into an immutable [`FormDefinition`].
//! Starting a record clones the instance template into a mutable
//! [`xml::Document`]; every field edit goes through [`FormEngine::set_value`],
//! which recomputes `calculate` bindings, re-evaluates `required`/`constraint`
//! rules, and emits the flat list of currently-relevant controls for an
//! external renderer. [`submission::assemble`] turns the finished record
//! into an OpenRosa wire payload; transport and rendering stay outside this
//! crate.
//!
//! ```
//! use xformkit::{parse_form, FormEngine, FormMeta};
//!
//! let xml = r#"
//! <html>
//!   <model>
//!     <instance><data><age/></data></instance>
//!     <bind nodeset="/data/age" type="int" required="true()"/>
//!   </model>
//!   <body><input ref="/data/age"><label>Age</label></input></body>
//! </html>"#;
//!
//! let form = parse_form(xml, FormMeta::default()).unwrap();
//! let mut engine = FormEngine::new(&form).unwrap();
//! let out = engine.set_value(0, "17").unwrap();
//! assert!(out.controls[0].valid);
//! assert_eq!(out.progress.answered, 1);
//! ```

#![warn(missing_docs)]

pub mod engine;
pub mod error;
pub mod evaluator;
pub mod model;
pub mod parser;
pub mod store;
pub mod submission;
pub mod xml;
pub mod xpath;

pub use engine::{ControlState, FieldValidity, FormEngine, Progress, RefreshOutput};
pub use error::{EvalError, ParseError, Result, SubmissionError, XformError};
pub use evaluator::{Evaluator, FunctionRegistry, Value};
pub use model::{
    Binding, Control, ControlKind, ControlType, FormDefinition, FormMeta, Group, Item, Submission,
};
pub use parser::parse_form;
pub use store::{FormRepository, MemoryStore, SubmissionRepository};
pub use submission::{assemble, Attachment, Payload};
