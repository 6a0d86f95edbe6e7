//! The recalculate/revalidate/refresh cycle against live documents:
//! convergence, relevance, progress counting, and the documented
//! ambiguous-write behavior.

use pretty_assertions::assert_eq;
use xformkit::{parse_form, xml::Document, FormEngine, FormMeta, Progress};

fn parse(xml: &str) -> xformkit::FormDefinition {
    parse_form(xml, FormMeta::default()).unwrap()
}

#[test]
fn sum_calculation_converges_and_stays_stable() {
    let form = parse(
        r#"
<html>
  <model>
    <instance><data><b/><c/><a/></data></instance>
    <bind nodeset="/data/b" type="decimal"/>
    <bind nodeset="/data/c" type="decimal"/>
    <bind nodeset="/data/a" type="decimal" calculate="../b + ../c"/>
  </model>
  <body>
    <input ref="/data/b"><label>B</label></input>
    <input ref="/data/c"><label>C</label></input>
    <input ref="/data/a"><label>A</label></input>
  </body>
</html>"#,
    );
    let mut engine = FormEngine::new(&form).unwrap();
    engine.set_value(0, "2").unwrap();
    let out = engine.set_value(1, "5").unwrap();
    assert_eq!(engine.document().get("/data/a"), Some("7".into()));

    // The refresh output shows the derived value too.
    let a = out.controls.iter().find(|c| c.control == 2).unwrap();
    assert_eq!(a.value, "7");

    // A second pass with no edits must change nothing.
    let again = engine.set_value(1, "5").unwrap();
    assert_eq!(engine.document().get("/data/a"), Some("7".into()));
    assert_eq!(again.controls, out.controls);
}

#[test]
fn relevance_hides_fields_from_refresh() {
    let form = parse(
        r#"
<html>
  <model>
    <instance><data><married/><spouse/></data></instance>
    <bind nodeset="/data/married" type="select1"/>
    <bind nodeset="/data/spouse" type="string" relevant="/data/married = 'yes'"/>
  </model>
  <body>
    <select1 ref="/data/married">
      <label>Married?</label>
      <item><label>Yes</label><value>yes</value></item>
      <item><label>No</label><value>no</value></item>
    </select1>
    <input ref="/data/spouse"><label>Spouse name</label></input>
  </body>
</html>"#,
    );
    let mut engine = FormEngine::new(&form).unwrap();

    let hidden = engine.refresh();
    assert_eq!(hidden.controls.len(), 1);
    assert!(hidden.controls.iter().all(|c| c.relevant));

    let shown = engine.set_value(0, "yes").unwrap();
    assert_eq!(shown.controls.len(), 2);

    let hidden_again = engine.set_value(0, "no").unwrap();
    assert_eq!(hidden_again.controls.len(), 1);
}

#[test]
fn required_progress_counts_two_of_three() {
    let form = parse(
        r#"
<html>
  <model>
    <instance><data><p/><q/><r/><opt/></data></instance>
    <bind nodeset="/data/p" type="string" required="true()"/>
    <bind nodeset="/data/q" type="string" required="true()"/>
    <bind nodeset="/data/r" type="string" required="true()"/>
    <bind nodeset="/data/opt" type="string"/>
  </model>
  <body>
    <input ref="/data/p"><label>P</label></input>
    <input ref="/data/q"><label>Q</label></input>
    <input ref="/data/r"><label>R</label></input>
    <input ref="/data/opt"><label>Optional</label></input>
  </body>
</html>"#,
    );
    let mut engine = FormEngine::new(&form).unwrap();
    engine.set_value(0, "one").unwrap();
    let out = engine.set_value(1, "two").unwrap();
    assert_eq!(out.progress, Progress { answered: 2, required: 3 });

    // The optional field never joins the denominator.
    let out = engine.set_value(3, "extra").unwrap();
    assert_eq!(out.progress, Progress { answered: 2, required: 3 });
}

#[test]
fn required_int_field_becomes_valid_when_answered() {
    let form = parse(
        r#"
<html>
  <model>
    <instance><data><age/></data></instance>
    <bind nodeset="/data/age" type="int" required="true()"/>
  </model>
  <body><input ref="/data/age"><label>Age</label></input></body>
</html>"#,
    );
    let mut engine = FormEngine::new(&form).unwrap();
    let before = engine.refresh();
    assert!(!before.controls[0].valid);
    assert_eq!(before.progress, Progress { answered: 0, required: 1 });

    let after = engine.set_value(0, "17").unwrap();
    assert!(after.controls[0].valid);
    assert_eq!(after.progress, Progress { answered: 1, required: 1 });
}

#[test]
fn ambiguous_write_updates_every_match() {
    let mut doc = Document::parse(
        "<data><repeat><item/></repeat><repeat><item/></repeat></data>",
    )
    .unwrap();
    let written = doc.set("/data/repeat/item", "x");
    assert_eq!(written, 2);

    let serialized = doc.serialize();
    assert_eq!(serialized.matches("<item>x</item>").count(), 2);
}

#[test]
fn reset_restores_template_and_reruns_the_cycle() {
    let form = parse(
        r#"
<html>
  <model>
    <instance><data><n/><twice/></data></instance>
    <bind nodeset="/data/n" type="int" required="true()"/>
    <bind nodeset="/data/twice" type="int" calculate="../n * 2"/>
  </model>
  <body>
    <input ref="/data/n"><label>N</label></input>
    <input ref="/data/twice"><label>Twice</label></input>
  </body>
</html>"#,
    );
    let mut engine = FormEngine::new(&form).unwrap();
    engine.set_value(0, "21").unwrap();
    assert_eq!(engine.document().get("/data/twice"), Some("42".into()));

    let out = engine.reset();
    assert_eq!(engine.document().get("/data/n"), Some("".into()));
    assert_eq!(out.progress, Progress { answered: 0, required: 1 });
}

#[test]
fn evaluation_failures_degrade_one_field_only() {
    // `crash` divides by a node that never exists; the other fields keep
    // validating and the cycle completes.
    let form = parse(
        r#"
<html>
  <model>
    <instance><data><ok/><crash/></data></instance>
    <bind nodeset="/data/ok" type="string" required="true()"/>
    <bind nodeset="/data/crash" type="decimal" calculate="unknown-fn(../ok)"/>
  </model>
  <body>
    <input ref="/data/ok"><label>Ok</label></input>
    <input ref="/data/crash"><label>Crash</label></input>
  </body>
</html>"#,
    );
    let mut engine = FormEngine::new(&form).unwrap();
    let out = engine.set_value(0, "fine").unwrap();
    assert_eq!(out.controls.len(), 2);
    let ok = out.controls.iter().find(|c| c.control == 0).unwrap();
    assert!(ok.valid);
    // The failed calculate left the target untouched.
    assert_eq!(engine.document().get("/data/crash"), Some("".into()));
}
