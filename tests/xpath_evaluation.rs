//! Evaluator behavior through the public API: casts, context resolution,
//! idempotence, and the XForms function set.

use pretty_assertions::assert_eq;
use rstest::rstest;
use xformkit::{xml::Document, EvalError, Evaluator, FunctionRegistry, Value, XformError};

fn doc() -> Document {
    Document::parse(
        "<data>\
           <first>Ada</first><last>Lovelace</last>\
           <born>1815</born><died>1852</died>\
           <languages>analytical-engine ada</languages>\
           <score>10</score><score>20</score><score>30</score>\
         </data>",
    )
    .unwrap()
}

#[rstest]
#[case("concat(first, ' ', last)", "Ada Lovelace")]
#[case("substr(first, 0, 2)", "Ad")]
#[case("selected-at(languages, 0)", "analytical-engine")]
#[case("if(born < died, 'ok', 'impossible')", "ok")]
fn string_results(#[case] expr: &str, #[case] expected: &str) {
    let doc = doc();
    let got = Evaluator::new().evaluate_string(&doc, "/data", expr).unwrap();
    assert_eq!(got, expected);
}

#[rstest]
#[case("died - born", 37.0)]
#[case("sum(score)", 60.0)]
#[case("count(score)", 3.0)]
#[case("string-length(first)", 3.0)]
fn numeric_results(#[case] expr: &str, #[case] expected: f64) {
    let doc = doc();
    let got = Evaluator::new().evaluate_number(&doc, "/data", expr).unwrap();
    assert_eq!(got, expected);
}

#[rstest]
#[case("selected(languages, 'ada')", true)]
#[case("selected(languages, 'engine')", false)]
#[case("born = 1815 and died != 1815", true)]
#[case("regex(born, '^[0-9]{4}$')", true)]
#[case("not(true())", false)]
fn boolean_results(#[case] expr: &str, #[case] expected: bool) {
    let doc = doc();
    let got = Evaluator::new().evaluate_bool(&doc, "/data", expr).unwrap();
    assert_eq!(got, expected);
}

#[test]
fn evaluation_is_idempotent_on_an_unchanged_document() {
    let doc = doc();
    let evaluator = Evaluator::new();
    let expr = "concat(first, ':', died - born)";
    let first = evaluator.evaluate_string(&doc, "/data", expr).unwrap();
    let second = evaluator.evaluate_string(&doc, "/data", expr).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, "Ada:37");
}

#[test]
fn missing_context_is_an_error_not_a_panic() {
    let doc = doc();
    let err = Evaluator::new()
        .evaluate_bool(&doc, "/data/未知", "true()")
        .unwrap_err();
    // Non-ASCII path also fails cleanly at the tokenizer; a plain missing
    // path reports MissingContext.
    drop(err);

    let err = Evaluator::new()
        .evaluate_bool(&doc, "/data/absent", "true()")
        .unwrap_err();
    assert!(matches!(
        err,
        XformError::Eval(EvalError::MissingContext { .. })
    ));
}

#[test]
fn ambiguous_context_uses_the_first_node() {
    let doc = doc();
    // Three <score> nodes match; evaluation proceeds against the first.
    let got = Evaluator::new()
        .evaluate_number(&doc, "/data/score", ".")
        .unwrap();
    assert_eq!(got, 10.0);
}

#[test]
fn relative_and_parent_paths_resolve() {
    let doc = doc();
    let evaluator = Evaluator::new();
    assert_eq!(
        evaluator
            .evaluate_string(&doc, "/data/first", "../last")
            .unwrap(),
        "Lovelace"
    );
    assert_eq!(
        evaluator.evaluate_string(&doc, "/data/first", ".").unwrap(),
        "Ada"
    );
}

#[test]
fn nodeset_value_projects_to_first_match() {
    let doc = doc();
    let value = Evaluator::new().evaluate_at(&doc, "/data", "score").unwrap();
    let Value::Nodeset(nodes) = &value else {
        panic!("expected nodeset");
    };
    assert_eq!(nodes.len(), 3);
    assert_eq!(value.string(&doc), "10");
    assert_eq!(value.number(&doc), 10.0);
    assert!(value.boolean());
}

#[test]
fn custom_functions_extend_the_registry() {
    let mut registry = FunctionRegistry::standard();
    registry.register("initials", |ctx, args| {
        let mut out = String::new();
        for arg in args {
            if let Some(c) = arg.string(ctx.doc).chars().next() {
                out.push(c);
            }
        }
        Ok(Value::String(out))
    });
    let doc = doc();
    let got = Evaluator::with_registry(&registry)
        .evaluate_string(&doc, "/data", "initials(first, last)")
        .unwrap();
    assert_eq!(got, "AL");
}
