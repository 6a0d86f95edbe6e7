//! Recalculation engine: the recalculate → revalidate → refresh cycle.
//!
//! One engine owns one live instance document for one in-progress record.
//! The single mutation entry point is [`FormEngine::set_value`]; each call
//! runs a complete synchronous pass, so no partial state is observable from
//! outside. Expression failures degrade the affected field to
//! invalid/unknown and never abort the cycle.
//!
//! All binding expressions are compiled once at construction, and a static
//! dependency graph (absolute path → calculate-bindings referencing it)
//! limits recomputation to the transitive dependents of the edited path.

use std::collections::VecDeque;

use log::{debug, warn};
use rustc_hash::FxHashMap;

use crate::error::{ParseError, Result};
use crate::evaluator::{resolve_context, Evaluator, FunctionRegistry};
use crate::model::{BindingId, ControlId, ControlKind, FormDefinition, GroupId};
use crate::xml::Document;
use crate::xpath::{parse_expression, Expr};

/// Compiled expressions for one binding
#[derive(Debug, Default)]
struct CompiledBinding {
    required: Option<Expr>,
    constraint: Option<Expr>,
    relevant: Option<Expr>,
    calculate: Option<Expr>,
}

/// Validity of one binding after the last revalidate pass
#[derive(Debug, Clone, PartialEq)]
pub struct FieldValidity {
    /// Whether required and constraint are both satisfied (or the field is
    /// not currently relevant)
    pub valid: bool,
    /// Human message for the failed rule, when invalid
    pub message: Option<String>,
    /// Whether the binding is currently relevant
    pub relevant: bool,
    /// Whether the binding is currently required
    pub required: bool,
    /// Whether the node holds a non-empty value
    pub answered: bool,
}

impl Default for FieldValidity {
    fn default() -> Self {
        FieldValidity {
            valid: true,
            message: None,
            relevant: true,
            required: false,
            answered: false,
        }
    }
}

/// Completion progress across currently-relevant required fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Relevant required fields holding a value
    pub answered: usize,
    /// Relevant required fields in total
    pub required: usize,
}

/// What the renderer needs to draw one control
#[derive(Debug, Clone, PartialEq)]
pub struct ControlState {
    /// Index into [`FormDefinition::controls`]
    pub control: ControlId,
    /// Current display value
    pub value: String,
    /// Validity of the governing binding
    pub valid: bool,
    /// Always true for emitted entries; non-relevant controls are omitted
    pub relevant: bool,
    /// Validation message when invalid
    pub message: Option<String>,
}

/// One refresh pass: the relevant controls in document order, plus progress
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshOutput {
    /// Relevant controls only
    pub controls: Vec<ControlState>,
    /// Required/answered counts
    pub progress: Progress,
}

/// Drives the recalculate/revalidate/refresh cycle for one record.
pub struct FormEngine<'f> {
    form: &'f FormDefinition,
    doc: Document,
    template: Document,
    compiled: Vec<CompiledBinding>,
    /// absolute path -> calculate-bindings whose expression references it
    dependents: FxHashMap<String, Vec<BindingId>>,
    /// per binding: bindings whose nodeset addresses an ancestor element,
    /// so relevance flows down the instance subtree
    ancestors: Vec<Vec<BindingId>>,
    validity: Vec<FieldValidity>,
    registry: Option<&'f FunctionRegistry>,
}

impl<'f> FormEngine<'f> {
    /// Build an engine for a new record: clone the instance template,
    /// compile every binding expression, build the dependency graph, and
    /// run the initial recalculate/revalidate pass.
    pub fn new(form: &'f FormDefinition) -> Result<Self> {
        Self::with_registry_opt(form, None)
    }

    /// Same as [`FormEngine::new`] but evaluating against a caller-extended
    /// function table.
    pub fn with_registry(form: &'f FormDefinition, registry: &'f FunctionRegistry) -> Result<Self> {
        Self::with_registry_opt(form, Some(registry))
    }

    fn with_registry_opt(
        form: &'f FormDefinition,
        registry: Option<&'f FunctionRegistry>,
    ) -> Result<Self> {
        let template_xml = form
            .primary_instance()
            .ok_or(ParseError::MissingInstance)?;
        let template = Document::parse(template_xml)?;
        let doc = template.clone();

        let mut compiled = Vec::with_capacity(form.bindings.len());
        let mut dependents: FxHashMap<String, Vec<BindingId>> = FxHashMap::default();
        for (index, binding) in form.bindings.iter().enumerate() {
            let entry = CompiledBinding {
                required: compile(binding.required.as_deref())?,
                constraint: compile(binding.constraint.as_deref())?,
                relevant: compile(binding.relevant.as_deref())?,
                calculate: compile(binding.calculate.as_deref())?,
            };
            if let Some(calculate) = &entry.calculate {
                for path in calculate.referenced_paths(&binding.nodeset) {
                    dependents.entry(path).or_default().push(index);
                }
            }
            compiled.push(entry);
        }

        let ancestors: Vec<Vec<BindingId>> = form
            .bindings
            .iter()
            .map(|binding| {
                form.bindings
                    .iter()
                    .enumerate()
                    .filter(|(_, other)| is_ancestor_path(&other.nodeset, &binding.nodeset))
                    .map(|(index, _)| index)
                    .collect()
            })
            .collect();

        let validity = vec![FieldValidity::default(); form.bindings.len()];
        let mut engine = FormEngine {
            form,
            doc,
            template,
            compiled,
            dependents,
            ancestors,
            validity,
            registry,
        };
        engine.recalculate_all();
        engine.revalidate();
        Ok(engine)
    }

    fn evaluator(&self) -> Evaluator<'_> {
        match self.registry {
            Some(registry) => Evaluator::with_registry(registry),
            None => Evaluator::new(),
        }
    }

    /// The live instance document
    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Serialize the live instance for persistence or submission
    pub fn serialize_instance(&self) -> String {
        self.doc.serialize()
    }

    /// Validity of one binding after the last pass
    pub fn validity(&self, binding: BindingId) -> &FieldValidity {
        &self.validity[binding]
    }

    /// The sole mutation entry point: write the user's raw value for a
    /// control, then run recalculate → revalidate → refresh. Notes are
    /// display-only; a write aimed at one is ignored.
    pub fn set_value(&mut self, control: ControlId, raw: &str) -> Result<RefreshOutput> {
        let target = self
            .form
            .controls
            .get(control)
            .ok_or_else(|| ParseError::UnresolvedBinding {
                reference: format!("control #{control}"),
            })?;
        if matches!(target.kind, ControlKind::Note) {
            warn!("control #{control} is display-only, ignoring the write");
            return Ok(self.refresh());
        }
        let path = target
            .nodeset(&self.form.bindings)
            .ok_or_else(|| ParseError::UnresolvedBinding {
                reference: format!("control #{control}"),
            })?
            .to_string();
        let written = self.doc.set(&path, raw);
        if written == 0 {
            warn!("set_value: '{path}' matched no node, value dropped");
        }
        self.recalculate(&path);
        self.revalidate();
        Ok(self.refresh())
    }

    /// Restore the instance to the pristine template and rerun the cycle.
    pub fn reset(&mut self) -> RefreshOutput {
        self.doc = self.template.clone();
        self.recalculate_all();
        self.revalidate();
        self.refresh()
    }

    /// Recompute every calculate-bearing binding once in document order,
    /// then flush any resulting changes through the dependency graph so
    /// bindings declared before their inputs still settle. Used at
    /// construction and reset, when everything may be stale.
    fn recalculate_all(&mut self) {
        let mut changed = VecDeque::new();
        for index in 0..self.form.bindings.len() {
            if self.compiled[index].calculate.is_some() && self.run_calculate(index) {
                changed.push_back(self.form.bindings[index].nodeset.clone());
            }
        }
        self.propagate(changed);
    }

    /// Recompute only the transitive dependents of `path`.
    fn recalculate(&mut self, path: &str) {
        self.propagate(VecDeque::from([path.to_string()]));
    }

    /// Breadth-first worklist over changed paths. A binding is re-evaluated
    /// every time one of its inputs changes, so declaration order never
    /// leaves a dependent holding a stale input; a per-binding evaluation
    /// cap cuts true cycles.
    fn propagate(&mut self, mut queue: VecDeque<String>) {
        let mut evaluations: FxHashMap<BindingId, usize> = FxHashMap::default();
        let cap = self.form.bindings.len().max(1);
        while let Some(changed) = queue.pop_front() {
            let Some(dependents) = self.dependents.get(&changed) else {
                continue;
            };
            let targets: Vec<BindingId> = dependents.clone();
            for binding in targets {
                let seen = evaluations.entry(binding).or_insert(0);
                if *seen >= cap {
                    warn!(
                        "calculate for '{}' keeps changing, cutting the cycle",
                        self.form.bindings[binding].nodeset
                    );
                    continue;
                }
                *seen += 1;
                if self.run_calculate(binding) {
                    queue.push_back(self.form.bindings[binding].nodeset.clone());
                }
            }
        }
    }

    /// Evaluate one binding's calculate expression and write the result
    /// back when it differs. Returns whether the stored value changed.
    fn run_calculate(&mut self, binding: BindingId) -> bool {
        let nodeset = self.form.bindings[binding].nodeset.clone();
        let Some(expr) = &self.compiled[binding].calculate else {
            return false;
        };
        let computed = match resolve_context(&self.doc, &nodeset)
            .and_then(|ctx| self.evaluator().evaluate(&self.doc, ctx, expr))
        {
            Ok(value) => value.string(&self.doc),
            Err(err) => {
                warn!("calculate for '{nodeset}' failed: {err}");
                return false;
            }
        };
        let current = self.doc.get(&nodeset).unwrap_or_default();
        if current == computed {
            return false;
        }
        debug!("calculate '{nodeset}': '{current}' -> '{computed}'");
        self.doc.set(&nodeset, &computed);
        true
    }

    /// Re-evaluate required/constraint/relevant for every binding and
    /// refresh the progress counts. A binding is relevant only when its own
    /// `relevant` holds and so does that of every binding addressing an
    /// ancestor element, so fields hidden with their enclosing subtree drop
    /// out of validation and progress together.
    pub fn revalidate(&mut self) {
        let own: Vec<bool> = (0..self.form.bindings.len())
            .map(|index| self.own_relevance(index))
            .collect();
        for index in 0..self.form.bindings.len() {
            let relevant = own[index] && self.ancestors[index].iter().all(|&a| own[a]);
            let validity = self.validate_binding(index, relevant);
            self.validity[index] = validity;
        }
    }

    /// The binding's own `relevant` expression, ignoring ancestors. A
    /// missing context node counts as not relevant; an evaluation failure
    /// degrades to relevant so the field stays visible.
    fn own_relevance(&self, index: BindingId) -> bool {
        let Some(expr) = &self.compiled[index].relevant else {
            return true;
        };
        let nodeset = &self.form.bindings[index].nodeset;
        let Ok(context) = resolve_context(&self.doc, nodeset) else {
            return false;
        };
        match self.evaluator().evaluate(&self.doc, context, expr) {
            Ok(value) => value.boolean(),
            Err(err) => {
                warn!("relevant for '{nodeset}' failed: {err}");
                true
            }
        }
    }

    fn validate_binding(&self, index: BindingId, relevant: bool) -> FieldValidity {
        let binding = &self.form.bindings[index];
        let evaluator = self.evaluator();

        let context = match resolve_context(&self.doc, &binding.nodeset) {
            Ok(node) => node,
            Err(err) => {
                // Unevaluable field: degraded, not fatal.
                warn!("binding '{}' has no context: {err}", binding.nodeset);
                return FieldValidity {
                    valid: false,
                    message: None,
                    relevant: false,
                    required: false,
                    answered: false,
                };
            }
        };

        let eval_bool = |expr: &Option<Expr>, default: bool| -> bool {
            match expr {
                None => default,
                Some(expr) => match evaluator.evaluate(&self.doc, context, expr) {
                    Ok(value) => value.boolean(),
                    Err(err) => {
                        warn!("expression for '{}' failed: {err}", binding.nodeset);
                        default
                    }
                },
            }
        };

        let required = relevant && eval_bool(&self.compiled[index].required, false);
        let value = self.doc.string_value(context);
        let answered = !value.trim().is_empty();

        if !relevant {
            // Non-relevant fields are never invalid.
            return FieldValidity {
                valid: true,
                message: None,
                relevant,
                required: false,
                answered,
            };
        }

        if required && !answered {
            return FieldValidity {
                valid: false,
                message: Some(
                    binding
                        .required_msg
                        .clone()
                        .unwrap_or_else(|| "This field is required".to_string()),
                ),
                relevant,
                required,
                answered,
            };
        }

        // Constraints apply only to non-empty values.
        if answered && !eval_bool(&self.compiled[index].constraint, true) {
            return FieldValidity {
                valid: false,
                message: Some(
                    binding
                        .constraint_msg
                        .clone()
                        .unwrap_or_else(|| "Value is out of range".to_string()),
                ),
                relevant,
                required,
                answered,
            };
        }

        FieldValidity {
            valid: true,
            message: None,
            relevant,
            required,
            answered,
        }
    }

    /// Completion progress over the last revalidate pass
    pub fn progress(&self) -> Progress {
        let mut answered = 0;
        let mut required = 0;
        for validity in &self.validity {
            if validity.relevant && validity.required {
                required += 1;
                if validity.answered {
                    answered += 1;
                }
            }
        }
        Progress { answered, required }
    }

    /// Whether a group (and its whole parent chain) is currently relevant
    fn group_relevant(&self, mut group: Option<GroupId>) -> bool {
        while let Some(id) = group {
            let g = &self.form.groups[id];
            if let Some(binding) = g.binding {
                if !self.validity[binding].relevant {
                    return false;
                }
            }
            group = g.parent;
        }
        true
    }

    /// Emit the flat renderer list: every currently-relevant control with
    /// its display value and validity. Fields that are not relevant are
    /// omitted entirely.
    pub fn refresh(&self) -> RefreshOutput {
        let mut controls = Vec::new();
        for (index, control) in self.form.controls.iter().enumerate() {
            let (relevant, valid, message) = match control.binding {
                Some(binding) => {
                    let v = &self.validity[binding];
                    (v.relevant, v.valid, v.message.clone())
                }
                // Notes have no binding and are always valid.
                None => (true, true, None),
            };
            if !relevant || !self.group_relevant(control.group) {
                continue;
            }
            let value = match control.kind {
                ControlKind::Note => String::new(),
                _ => control
                    .nodeset(&self.form.bindings)
                    .and_then(|path| self.doc.get(path))
                    .unwrap_or_default(),
            };
            controls.push(ControlState {
                control: index,
                value,
                valid,
                relevant: true,
                message,
            });
        }
        RefreshOutput {
            controls,
            progress: self.progress(),
        }
    }
}

fn compile(expression: Option<&str>) -> Result<Option<Expr>> {
    match expression {
        None => Ok(None),
        Some(text) => Ok(Some(parse_expression(text)?)),
    }
}

/// Whether `ancestor` addresses a strict ancestor element of `path`
fn is_ancestor_path(ancestor: &str, path: &str) -> bool {
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FormMeta;
    use crate::parser::parse_form;
    use pretty_assertions::assert_eq;

    const CALC_FORM: &str = r#"
<html>
  <model>
    <instance><data><b/><c/><a/><total-display/></data></instance>
    <bind nodeset="/data/b" type="decimal"/>
    <bind nodeset="/data/c" type="decimal"/>
    <bind nodeset="/data/a" type="decimal" calculate="../b + ../c"/>
    <bind nodeset="/data/total-display" type="string"
          calculate="concat('total: ', ../a)"/>
  </model>
  <body>
    <input ref="/data/b"><label>B</label></input>
    <input ref="/data/c"><label>C</label></input>
    <input ref="/data/a"><label>A</label></input>
  </body>
</html>"#;

    fn engine(form: &FormDefinition) -> FormEngine<'_> {
        FormEngine::new(form).unwrap()
    }

    fn parse(xml: &str) -> FormDefinition {
        parse_form(xml, FormMeta::default()).unwrap()
    }

    #[test]
    fn calculate_converges_in_one_pass() {
        let form = parse(CALC_FORM);
        let mut engine = engine(&form);
        engine.set_value(0, "3").unwrap();
        let out = engine.set_value(1, "4").unwrap();
        assert_eq!(engine.document().get("/data/a"), Some("7".into()));
        // Transitive dependent recomputed in the same pass.
        assert_eq!(
            engine.document().get("/data/total-display"),
            Some("total: 7".into())
        );
        let a_state = out.controls.iter().find(|c| c.control == 2).unwrap();
        assert_eq!(a_state.value, "7");
    }

    #[test]
    fn recalculate_is_stable_without_edits() {
        let form = parse(CALC_FORM);
        let mut engine = engine(&form);
        engine.set_value(0, "3").unwrap();
        engine.set_value(1, "4").unwrap();
        let before = engine.serialize_instance();
        engine.recalculate("/data/b");
        engine.revalidate();
        assert_eq!(engine.serialize_instance(), before);
    }

    #[test]
    fn unrelated_paths_do_not_recompute() {
        let form = parse(CALC_FORM);
        let mut engine = engine(&form);
        engine.set_value(0, "3").unwrap();
        engine.set_value(1, "4").unwrap();
        // Editing `a` itself: nothing depends on /data/a except the
        // display binding, which must update; b and c stay untouched.
        engine.set_value(2, "9").unwrap();
        assert_eq!(engine.document().get("/data/b"), Some("3".into()));
        assert_eq!(
            engine.document().get("/data/total-display"),
            Some("total: 9".into())
        );
    }

    #[test]
    fn reset_restores_the_template() {
        let form = parse(CALC_FORM);
        let mut engine = engine(&form);
        engine.set_value(0, "3").unwrap();
        let out = engine.reset();
        assert_eq!(engine.document().get("/data/b"), Some("".into()));
        assert_eq!(out.progress, Progress { answered: 0, required: 0 });
    }

    const RELEVANT_FORM: &str = r#"
<html>
  <model>
    <instance><data><has-pet/><pet-name/></data></instance>
    <bind nodeset="/data/has-pet" type="select1" required="true()"/>
    <bind nodeset="/data/pet-name" type="string" required="true()"
          relevant="/data/has-pet = 'yes'"/>
  </model>
  <body>
    <select1 ref="/data/has-pet">
      <label>Pet?</label>
      <item><label>Yes</label><value>yes</value></item>
      <item><label>No</label><value>no</value></item>
    </select1>
    <input ref="/data/pet-name"><label>Pet name</label></input>
  </body>
</html>"#;

    #[test]
    fn irrelevant_fields_are_hidden_and_uncounted() {
        let form = parse(RELEVANT_FORM);
        let mut engine = engine(&form);

        let out = engine.set_value(0, "no").unwrap();
        assert_eq!(out.controls.len(), 1, "pet-name must be hidden");
        assert_eq!(out.progress, Progress { answered: 1, required: 1 });

        let out = engine.set_value(0, "yes").unwrap();
        assert_eq!(out.controls.len(), 2);
        assert_eq!(out.progress, Progress { answered: 1, required: 2 });
    }

    #[test]
    fn required_int_scenario() {
        let xml = r#"
<html>
  <model>
    <instance><data><age/></data></instance>
    <bind nodeset="/data/age" type="int" required="true()"/>
  </model>
  <body><input ref="/data/age"><label>Age</label></input></body>
</html>"#;
        let form = parse(xml);
        let mut engine = engine(&form);
        assert_eq!(engine.progress(), Progress { answered: 0, required: 1 });

        let out = engine.set_value(0, "17").unwrap();
        let state = &out.controls[0];
        assert!(state.valid);
        assert_eq!(out.progress, Progress { answered: 1, required: 1 });
    }

    #[test]
    fn constraint_failure_reports_message() {
        let xml = r#"
<html>
  <model>
    <instance><data><age/></data></instance>
    <bind nodeset="/data/age" type="int" constraint=". &gt;= 0"
          jr:constraintMsg="Age cannot be negative"/>
  </model>
  <body><input ref="/data/age"><label>Age</label></input></body>
</html>"#;
        let form = parse(xml);
        let mut engine = engine(&form);
        let out = engine.set_value(0, "-3").unwrap();
        assert!(!out.controls[0].valid);
        assert_eq!(
            out.controls[0].message.as_deref(),
            Some("Age cannot be negative")
        );

        let out = engine.set_value(0, "3").unwrap();
        assert!(out.controls[0].valid);
        assert_eq!(out.controls[0].message, None);
    }

    #[test]
    fn group_relevance_hides_members() {
        let xml = r#"
<html>
  <model>
    <instance><data><show/><details><x/></details></data></instance>
    <bind nodeset="/data/show" type="string"/>
    <bind nodeset="/data/details" type="string"
          relevant="/data/show = 'yes'"/>
    <bind nodeset="/data/details/x" type="string"/>
  </model>
  <body>
    <input ref="/data/show"><label>Show?</label></input>
    <group ref="/data/details">
      <label>Details</label>
      <input ref="/data/details/x"><label>X</label></input>
    </group>
  </body>
</html>"#;
        let form = parse(xml);
        let mut engine = engine(&form);
        let out = engine.refresh();
        assert_eq!(out.controls.len(), 1);

        let out = engine.set_value(0, "yes").unwrap();
        assert_eq!(out.controls.len(), 2);
    }

    #[test]
    fn hidden_required_fields_leave_the_progress_denominator() {
        let xml = r#"
<html>
  <model>
    <instance><data><show/><details><x/></details></data></instance>
    <bind nodeset="/data/show" type="string"/>
    <bind nodeset="/data/details" type="string"
          relevant="/data/show = 'yes'"/>
    <bind nodeset="/data/details/x" type="string" required="true()"/>
  </model>
  <body>
    <input ref="/data/show"><label>Show?</label></input>
    <group ref="/data/details">
      <label>Details</label>
      <input ref="/data/details/x"><label>X</label></input>
    </group>
  </body>
</html>"#;
        let form = parse(xml);
        let mut engine = engine(&form);

        // While the subtree is hidden, its required field must not be
        // counted or reported invalid.
        let out = engine.refresh();
        assert_eq!(out.controls.len(), 1);
        assert_eq!(out.progress, Progress { answered: 0, required: 0 });
        assert!(engine.validity(2).valid);
        assert!(!engine.validity(2).relevant);

        let out = engine.set_value(0, "yes").unwrap();
        assert_eq!(out.controls.len(), 2);
        assert_eq!(out.progress, Progress { answered: 0, required: 1 });

        let out = engine.set_value(1, "filled").unwrap();
        assert_eq!(out.progress, Progress { answered: 1, required: 1 });
    }

    #[test]
    fn declaration_order_does_not_starve_dependents() {
        // The combined total is declared before the doubled input it reads,
        // so one edit must flow b -> a -> d within a single pass.
        let xml = r#"
<html>
  <model>
    <instance><data><d/><a/><b/></data></instance>
    <bind nodeset="/data/d" type="decimal" calculate="../a + ../b"/>
    <bind nodeset="/data/a" type="decimal" calculate="../b * 2"/>
    <bind nodeset="/data/b" type="decimal"/>
  </model>
  <body>
    <input ref="/data/b"><label>B</label></input>
  </body>
</html>"#;
        let form = parse(xml);
        let mut engine = engine(&form);
        engine.set_value(0, "5").unwrap();
        assert_eq!(engine.document().get("/data/a"), Some("10".into()));
        assert_eq!(engine.document().get("/data/d"), Some("15".into()));
    }

    #[test]
    fn note_controls_ignore_writes() {
        let xml = r#"
<html>
  <model>
    <instance><data><info/><name/></data></instance>
    <bind nodeset="/data/name" type="string"/>
  </model>
  <body>
    <input ref="/data/info" readonly="true()"><label>Read me</label></input>
    <input ref="/data/name"><label>Name</label></input>
  </body>
</html>"#;
        let form = parse(xml);
        let mut engine = engine(&form);
        let before = engine.serialize_instance();

        let out = engine.set_value(0, "scribble").unwrap();
        assert_eq!(engine.serialize_instance(), before);
        let note = out.controls.iter().find(|c| c.control == 0).unwrap();
        assert_eq!(note.value, "");

        engine.set_value(1, "Ada").unwrap();
        assert_eq!(engine.document().get("/data/name"), Some("Ada".into()));
    }
}
