//! Form definition parser: XForm XML in, schema arenas out.
//!
//! A streaming walk over the form document with two modes. Inside an
//! `<instance>` element every sub-element is opaque data and is re-serialized
//! verbatim into the template fragment, because form authors' data nodes may
//! legally be named `group`, `label`, or any other reserved word. Outside
//! instance mode, closing elements build schema entities: `bind` becomes a
//! [`Binding`], the control vocabulary becomes [`Control`]s, `group`/`repeat`
//! become [`Group`]s. Unknown elements are skipped for forward
//! compatibility; a malformed binding is a hard failure.
//!
//! The parser has no side effects beyond the returned value — no storage,
//! no network.

use chrono::Utc;
use log::debug;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use rustc_hash::FxHashMap;

use crate::error::{ParseError, Result};
use crate::model::{
    Binding, BindingId, Control, ControlKind, ControlType, FormDefinition, FormMeta, Group,
    GroupId, Item,
};

/// Parse a form definition document.
///
/// `meta` supplies the identity the caller already knows (id, version,
/// author); the display name falls back to the form's `<title>` when empty.
pub fn parse_form(xml: &str, meta: FormMeta) -> Result<FormDefinition> {
    let mut parser = FormParser::new(meta);
    parser.run(xml)?;
    parser.finish()
}

/// Attributes and child-derived state gathered for one open element
#[derive(Debug, Default)]
struct Pending {
    local: String,
    attrs: FxHashMap<String, String>,
    text: String,
    label: Option<String>,
    hint: Option<String>,
    value: Option<String>,
    items: Vec<Item>,
    /// Enclosing group at the time this element opened
    group: Option<GroupId>,
    /// Set when this element is itself a group/repeat
    own_group: Option<GroupId>,
}

impl Pending {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }
}

struct FormParser {
    meta: FormMeta,
    title: Option<String>,
    instances: Vec<String>,
    bindings: Vec<Binding>,
    controls: Vec<Control>,
    groups: Vec<Group>,
    by_nodeset: FxHashMap<String, BindingId>,
    by_id: FxHashMap<String, BindingId>,
    group_stack: Vec<GroupId>,
    stack: Vec<Pending>,
}

impl FormParser {
    fn new(meta: FormMeta) -> Self {
        FormParser {
            meta,
            title: None,
            instances: Vec::new(),
            bindings: Vec::new(),
            controls: Vec::new(),
            groups: Vec::new(),
            by_nodeset: FxHashMap::default(),
            by_id: FxHashMap::default(),
            group_stack: Vec::new(),
            stack: vec![Pending::default()],
        }
    }

    fn run(&mut self, xml: &str) -> Result<()> {
        let mut reader = Reader::from_str(xml);
        loop {
            match reader.read_event().map_err(ParseError::xml)? {
                Event::Start(e) => {
                    if local_name(&e) == "instance" {
                        let fragment = capture_instance(&mut reader)?;
                        self.instances.push(fragment);
                    } else {
                        self.open(&e)?;
                    }
                }
                Event::Empty(e) => {
                    self.open(&e)?;
                    self.close()?;
                }
                Event::End(_) => self.close()?,
                Event::Text(t) => {
                    let text = t.unescape().map_err(ParseError::xml)?;
                    if let Some(top) = self.stack.last_mut() {
                        top.text.push_str(&text);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        if self.stack.len() > 1 {
            return Err(ParseError::Xml {
                message: "unterminated element in form definition".into(),
            }
            .into());
        }
        Ok(())
    }

    fn open(&mut self, e: &BytesStart<'_>) -> Result<()> {
        let local = local_name(e);
        let mut pending = Pending {
            local: local.clone(),
            group: self.group_stack.last().copied(),
            ..Pending::default()
        };
        for attr in e.attributes() {
            let attr = attr.map_err(ParseError::xml)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            // Attributes are addressed by local name; the jr:/odk: prefixes
            // carry no distinction the schema needs.
            let key = key.rsplit(':').next().unwrap_or(&key).to_string();
            let value = attr.unescape_value().map_err(ParseError::xml)?.into_owned();
            pending.attrs.insert(key, value);
        }

        // Group identity is assigned at open so descendant controls can
        // record their enclosing group before the element closes.
        if local == "group" || local == "repeat" {
            let appearance = pending.attr("appearance").map(str::to_string);
            let binding = pending
                .attr("ref")
                .or_else(|| pending.attr("nodeset"))
                .and_then(|path| self.by_nodeset.get(path).copied());
            let group = Group {
                label: None,
                appearance: appearance.clone(),
                binding,
                repeatable: local == "repeat",
                fieldlist: appearance
                    .as_deref()
                    .is_some_and(|a| a.contains("field-list")),
                parent: self.group_stack.last().copied(),
            };
            let id = self.groups.len();
            self.groups.push(group);
            self.group_stack.push(id);
            pending.own_group = Some(id);
        }

        self.stack.push(pending);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let Some(pending) = self.stack.pop() else {
            return Ok(());
        };
        if self.stack.is_empty() {
            // Never pop the synthetic root.
            self.stack.push(pending);
            return Ok(());
        }
        let local = pending.local.clone();
        match local.as_str() {
            "bind" => self.close_bind(&pending)?,
            "label" => {
                if let Some(parent) = self.stack.last_mut() {
                    parent.label = Some(pending.text.trim().to_string());
                }
            }
            "hint" => {
                if let Some(parent) = self.stack.last_mut() {
                    parent.hint = Some(pending.text.trim().to_string());
                }
            }
            "value" => {
                if let Some(parent) = self.stack.last_mut() {
                    parent.value = Some(pending.text.trim().to_string());
                }
            }
            "item" => {
                if let Some(parent) = self.stack.last_mut() {
                    parent.items.push(Item {
                        label: pending.label.unwrap_or_default(),
                        value: pending.value.unwrap_or_default(),
                    });
                }
            }
            "group" | "repeat" => {
                if let Some(id) = pending.own_group {
                    self.groups[id].label = pending.label;
                    self.group_stack.pop();
                }
            }
            "title" => {
                self.title = Some(pending.text.trim().to_string());
            }
            "input" | "select1" | "select" | "rank" | "range" | "trigger" | "secret"
            | "upload" => self.close_control(pending)?,
            other => {
                debug!("ignoring unrecognized element '{other}'");
            }
        }
        Ok(())
    }

    fn close_bind(&mut self, pending: &Pending) -> Result<()> {
        let nodeset = pending.attr("nodeset").unwrap_or_default().to_string();
        if nodeset.is_empty() {
            return Err(ParseError::Xml {
                message: "bind element without a nodeset".into(),
            }
            .into());
        }
        let type_name = pending.attr("type").unwrap_or("string");
        let data_type = ControlType::from_bind_type(type_name).ok_or_else(|| {
            ParseError::UnknownBindingType {
                name: type_name.to_string(),
            }
        })?;
        let binding = Binding {
            id: pending.attr("id").map(str::to_string),
            nodeset: nodeset.clone(),
            data_type,
            required: pending.attr("required").map(str::to_string),
            constraint: pending.attr("constraint").map(str::to_string),
            relevant: pending.attr("relevant").map(str::to_string),
            calculate: pending.attr("calculate").map(str::to_string),
            readonly: pending.attr("readonly").map(str::to_string),
            required_msg: pending.attr("requiredMsg").map(str::to_string),
            constraint_msg: pending.attr("constraintMsg").map(str::to_string),
        };
        let index = self.bindings.len();
        // Later binds shadow earlier ones: resolution uses the most
        // recently parsed match.
        self.by_nodeset.insert(nodeset, index);
        if let Some(id) = &binding.id {
            self.by_id.insert(id.clone(), index);
        }
        self.bindings.push(binding);
        Ok(())
    }

    fn close_control(&mut self, pending: Pending) -> Result<()> {
        let binding = self.resolve_binding(&pending);
        let ref_path = pending.attr("ref").map(str::to_string);

        let kind = match pending.local.as_str() {
            "select1" => ControlKind::SelectOne,
            "select" => ControlKind::Select,
            "rank" => ControlKind::Rank,
            "range" => ControlKind::Range {
                min: numeric_attr(&pending, "start", 0.0),
                max: numeric_attr(&pending, "end", 10.0),
                inc: numeric_attr(&pending, "step", 1.0),
            },
            "trigger" => ControlKind::Trigger,
            "secret" => ControlKind::Secret,
            "upload" => ControlKind::Upload {
                mediatype: pending.attr("mediatype").unwrap_or_default().to_string(),
            },
            // A display-only note is an unbound input explicitly marked
            // readonly; a dangling ref on anything else fails below.
            "input"
                if binding.is_none()
                    && ref_path.is_some()
                    && pending.attr("readonly") == Some("true()") =>
            {
                ControlKind::Note
            }
            _ => ControlKind::Input,
        };

        if binding.is_none() && !matches!(kind, ControlKind::Note) {
            let reference = ref_path
                .or_else(|| pending.attr("bind").map(str::to_string))
                .unwrap_or_else(|| pending.local.clone());
            return Err(ParseError::UnresolvedBinding { reference }.into());
        }

        self.controls.push(Control {
            kind,
            label: pending.label,
            hint: pending.hint,
            appearance: pending.attrs.get("appearance").cloned(),
            binding,
            ref_path,
            items: pending.items,
            group: pending.group,
        });
        Ok(())
    }

    /// Most recently parsed binding whose nodeset equals the control's
    /// `ref`, or whose id equals its `bind` attribute.
    fn resolve_binding(&self, pending: &Pending) -> Option<BindingId> {
        if let Some(path) = pending.attr("ref") {
            if let Some(&id) = self.by_nodeset.get(path) {
                return Some(id);
            }
        }
        if let Some(bind_id) = pending.attr("bind") {
            if let Some(&id) = self.by_id.get(bind_id) {
                return Some(id);
            }
        }
        None
    }

    fn finish(self) -> Result<FormDefinition> {
        if self.instances.is_empty() {
            return Err(ParseError::MissingInstance.into());
        }
        let is_georeferenced = self.bindings.iter().any(|b| b.data_type.is_geo());
        let name = if self.meta.name.is_empty() {
            self.title.unwrap_or_else(|| self.meta.id.clone())
        } else {
            self.meta.name
        };
        let now = Utc::now();
        Ok(FormDefinition {
            id: self.meta.id,
            name,
            version: self.meta.version,
            author: self.meta.author,
            created: now,
            updated: now,
            is_georeferenced,
            instances: self.instances,
            bindings: self.bindings,
            controls: self.controls,
            groups: self.groups,
        })
    }
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn numeric_attr(pending: &Pending, name: &str, default: f64) -> f64 {
    pending
        .attr(name)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Re-serialize everything inside an `<instance>` element verbatim until
/// its matching close tag. Data nodes that collide with schema keywords
/// (`bind`, `group`, `label`, ...) pass through untouched.
fn capture_instance(reader: &mut Reader<&[u8]>) -> Result<String> {
    let mut depth = 1usize;
    let mut out = String::new();
    loop {
        match reader.read_event().map_err(ParseError::xml)? {
            Event::Start(e) => {
                depth += 1;
                write_open(&e, &mut out, false)?;
            }
            Event::Empty(e) => {
                write_open(&e, &mut out, true)?;
            }
            Event::End(e) => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
                out.push_str("</");
                out.push_str(&String::from_utf8_lossy(e.name().as_ref()));
                out.push('>');
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(ParseError::xml)?;
                if !text.trim().is_empty() {
                    out.push_str(&escape(text.as_ref()));
                }
            }
            Event::CData(t) => {
                let text = String::from_utf8_lossy(&t.into_inner()).into_owned();
                out.push_str(&escape(text.as_str()));
            }
            Event::Eof => {
                return Err(ParseError::Xml {
                    message: "unterminated instance element".into(),
                }
                .into());
            }
            _ => {}
        }
    }
    Ok(out)
}

fn write_open(e: &BytesStart<'_>, out: &mut String, self_closing: bool) -> Result<()> {
    out.push('<');
    out.push_str(&String::from_utf8_lossy(e.name().as_ref()));
    for attr in e.attributes() {
        let attr = attr.map_err(ParseError::xml)?;
        out.push(' ');
        out.push_str(&String::from_utf8_lossy(attr.key.as_ref()));
        out.push_str("=\"");
        let value = attr.unescape_value().map_err(ParseError::xml)?;
        out.push_str(&escape(value.as_ref()));
        out.push('"');
    }
    if self_closing {
        out.push_str("/>");
    } else {
        out.push('>');
    }
    Ok(())
}
