//! Schema types produced by the form definition parser.
//!
//! Parsing yields flat arenas (`Vec<Binding>`, `Vec<Control>`, `Vec<Group>`)
//! with cross-references stored as vector indices resolved once at parse
//! time. Nothing here re-queries a store on access; a [`FormDefinition`] is
//! immutable after the parser returns it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Index of a [`Binding`] within [`FormDefinition::bindings`]
pub type BindingId = usize;
/// Index of a [`Control`] within [`FormDefinition::controls`]
pub type ControlId = usize;
/// Index of a [`Group`] within [`FormDefinition::groups`]
pub type GroupId = usize;

/// Data type of the node a binding governs.
///
/// Covers the XForm type vocabulary plus the ODK extensions (`int`,
/// `select`/`select1`-as-type, `rank`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlType {
    /// Free text
    String,
    /// Whole number
    Integer,
    /// Floating-point number
    Decimal,
    /// Calendar date
    Date,
    /// Time of day
    Time,
    /// Combined date and time
    DateTime,
    /// Single latitude/longitude/altitude/accuracy tuple
    Geopoint,
    /// Ordered list of geopoints forming a line
    Geotrace,
    /// Closed ring of geopoints
    Geoshape,
    /// True/false
    Boolean,
    /// Scanned barcode text
    Barcode,
    /// Reference to a captured file (image, audio, ...)
    Binary,
    /// Ordered ranking of choices
    Rank,
}

impl ControlType {
    /// Resolve an XForm `type` attribute value, `None` for anything outside
    /// the vocabulary (a hard parse failure at the call site).
    pub fn from_bind_type(name: &str) -> Option<ControlType> {
        // Strip a namespace prefix such as "xsd:" or "odk:".
        let local = name.rsplit(':').next().unwrap_or(name);
        match local {
            "string" | "select" | "select1" => Some(ControlType::String),
            "int" | "integer" => Some(ControlType::Integer),
            "decimal" => Some(ControlType::Decimal),
            "date" => Some(ControlType::Date),
            "time" => Some(ControlType::Time),
            "dateTime" => Some(ControlType::DateTime),
            "geopoint" => Some(ControlType::Geopoint),
            "geotrace" => Some(ControlType::Geotrace),
            "geoshape" => Some(ControlType::Geoshape),
            "boolean" => Some(ControlType::Boolean),
            "barcode" => Some(ControlType::Barcode),
            "binary" => Some(ControlType::Binary),
            "rank" => Some(ControlType::Rank),
            _ => None,
        }
    }

    /// Whether this type carries geographic coordinates
    pub fn is_geo(self) -> bool {
        matches!(
            self,
            ControlType::Geopoint | ControlType::Geotrace | ControlType::Geoshape
        )
    }
}

/// One `bind` element: the rules governing a data nodeset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    /// Optional `id` attribute, referenced by controls via `bind="..."`
    pub id: Option<String>,
    /// XPath path identifying the governed node(s); never empty
    pub nodeset: String,
    /// Data type of the governed node
    pub data_type: ControlType,
    /// `required` expression, if any
    pub required: Option<String>,
    /// `constraint` expression, if any
    pub constraint: Option<String>,
    /// `relevant` expression, if any
    pub relevant: Option<String>,
    /// `calculate` expression, if any
    pub calculate: Option<String>,
    /// `readonly` expression, if any
    pub readonly: Option<String>,
    /// Message shown when `required` is not satisfied (`jr:requiredMsg`)
    pub required_msg: Option<String>,
    /// Message shown when `constraint` is not satisfied (`jr:constraintMsg`)
    pub constraint_msg: Option<String>,
}

/// Kind of a control, with kind-specific fields inline.
///
/// A tagged union consumed by exhaustive matching; a renderer dispatches on
/// this plus `appearance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlKind {
    /// Plain value entry, typed per the binding
    Input,
    /// Choose exactly one of `items`
    SelectOne,
    /// Choose any number of `items`
    Select,
    /// Order all of `items`
    Rank,
    /// Numeric slider/stepper
    Range {
        /// Lower bound (`start` attribute)
        min: f64,
        /// Upper bound (`end` attribute)
        max: f64,
        /// Step increment (`step` attribute)
        inc: f64,
    },
    /// Acknowledgement control writing a fixed value
    Trigger,
    /// Masked text entry
    Secret,
    /// Captured file
    Upload {
        /// Accepted media type, e.g. `image/*`
        mediatype: String,
    },
    /// Display-only text with no data binding
    Note,
}

/// One choice option for select/select1/rank controls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Text shown to the user
    pub label: String,
    /// Value written to the instance when chosen
    pub value: String,
}

/// A UI-agnostic description of one form field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Control {
    /// What kind of field this is
    pub kind: ControlKind,
    /// Caption text
    pub label: Option<String>,
    /// Secondary help text
    pub hint: Option<String>,
    /// Free-form rendering variant selector, carried through untouched
    pub appearance: Option<String>,
    /// Governing binding; `None` only for [`ControlKind::Note`]
    pub binding: Option<BindingId>,
    /// Direct nodeset reference, used when there is no binding
    pub ref_path: Option<String>,
    /// Choice options for select/select1/rank
    pub items: Vec<Item>,
    /// Enclosing group, `None` at the root
    pub group: Option<GroupId>,
}

impl Control {
    /// The path governing this control's value: its binding's nodeset, or
    /// its own `ref` when bindingless.
    pub fn nodeset<'f>(&'f self, bindings: &'f [Binding]) -> Option<&'f str> {
        match self.binding {
            Some(b) => bindings.get(b).map(|b| b.nodeset.as_str()),
            None => self.ref_path.as_deref(),
        }
    }
}

/// A structural grouping of controls; `repeatable` distinguishes `repeat`
/// from `group`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    /// Caption text
    pub label: Option<String>,
    /// Rendering variant selector
    pub appearance: Option<String>,
    /// Binding carrying the group's `relevant` expression, if any
    pub binding: Option<BindingId>,
    /// True for `repeat` elements
    pub repeatable: bool,
    /// True when the appearance contains `field-list`
    pub fieldlist: bool,
    /// Parent group; `None` at the root. Always an earlier index, so the
    /// parent chain is acyclic by construction.
    pub parent: Option<GroupId>,
}

/// Display metadata handed to the parser alongside the form XML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormMeta {
    /// Stable form identifier
    pub id: String,
    /// Display name; when empty the parser fills it from the form title
    pub name: String,
    /// Version string
    pub version: String,
    /// Author attribution
    pub author: String,
}

/// A parsed form definition: metadata, raw instance templates, and the
/// schema arenas. Immutable after parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormDefinition {
    /// Stable form identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Version string
    pub version: String,
    /// Author attribution
    pub author: String,
    /// When this definition was parsed
    pub created: DateTime<Utc>,
    /// Last-touched timestamp, maintained by the owning registry
    pub updated: DateTime<Utc>,
    /// True when any binding is geopoint/geotrace/geoshape
    pub is_georeferenced: bool,
    /// Raw instance-template XML fragments, in document order
    pub instances: Vec<String>,
    /// All `bind` elements, in document order
    pub bindings: Vec<Binding>,
    /// All controls, in document order
    pub controls: Vec<Control>,
    /// All groups/repeats, in document order
    pub groups: Vec<Group>,
}

impl FormDefinition {
    /// The primary instance template (the first `<instance>` in the model)
    pub fn primary_instance(&self) -> Option<&str> {
        self.instances.first().map(String::as_str)
    }
}

/// One in-progress record: the serialized instance plus captured
/// attachments. The live instance document is owned by the engine while
/// editing; this is the persistence-facing snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    /// Generated identifier, unique per record
    pub id: String,
    /// The form this record was filled against
    pub form_id: String,
    /// Serialized instance XML
    pub instance_xml: String,
    /// Attachment filenames, in capture order
    pub attachments: Vec<String>,
}

impl Submission {
    /// Start a new record for a form. The identifier combines the form id
    /// with a millisecond timestamp; callers needing a different scheme can
    /// overwrite `id`.
    pub fn new(form_id: impl Into<String>, instance_xml: impl Into<String>) -> Self {
        let form_id = form_id.into();
        let id = format!("{}-{}", form_id, Utc::now().timestamp_millis());
        Submission {
            id,
            form_id,
            instance_xml: instance_xml.into(),
            attachments: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_type_vocabulary_resolves() {
        assert_eq!(
            ControlType::from_bind_type("string"),
            Some(ControlType::String)
        );
        assert_eq!(
            ControlType::from_bind_type("int"),
            Some(ControlType::Integer)
        );
        assert_eq!(
            ControlType::from_bind_type("select1"),
            Some(ControlType::String)
        );
        assert_eq!(
            ControlType::from_bind_type("xsd:dateTime"),
            Some(ControlType::DateTime)
        );
        assert_eq!(
            ControlType::from_bind_type("odk:rank"),
            Some(ControlType::Rank)
        );
        assert_eq!(ControlType::from_bind_type("blob"), None);
    }

    #[test]
    fn control_nodeset_prefers_binding() {
        let bindings = vec![Binding {
            id: None,
            nodeset: "/data/a".into(),
            data_type: ControlType::String,
            required: None,
            constraint: None,
            relevant: None,
            calculate: None,
            readonly: None,
            required_msg: None,
            constraint_msg: None,
        }];
        let control = Control {
            kind: ControlKind::Input,
            label: None,
            hint: None,
            appearance: None,
            binding: Some(0),
            ref_path: Some("/data/ignored".into()),
            items: Vec::new(),
            group: None,
        };
        assert_eq!(control.nodeset(&bindings), Some("/data/a"));
    }
}
