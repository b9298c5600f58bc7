use std::sync::Arc;

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rstest::rstest;
use rustc_hash::FxHashMap;

use super::*;
use crate::config::EvalOptions;
use crate::sandbox::ImportResolver;

struct Tables(FxHashMap<String, Arc<ExportTable>>);

impl ImportResolver for Tables {
	fn import(&self, specifier: &str) -> Result<Arc<ExportTable>, EvaluationError> {
		self.0
			.get(specifier)
			.cloned()
			.ok_or_else(|| EvaluationError::UnresolvedImport(specifier.to_string()))
	}
}

fn colors() -> Tables {
	let mut colors = ExportTable::new();
	colors.insert("default", Value::from("black"));
	colors.insert("red", Value::from("#f00"));
	colors.insert("blue", Value::from("#00f"));
	let mut tables = FxHashMap::default();
	tables.insert("./colors.x".to_string(), Arc::new(colors));
	Tables(tables)
}

fn parse(source: &str) -> Result<ParsedModule, ParseError> {
	let uri = CanonicalUri::parse("/test.x").unwrap();
	futures::executor::block_on(ScriptStrategy.parse(&uri, source))
}

fn run(source: &str, imports: &Tables) -> Result<ExportTable, EvaluationError> {
	let parsed = parse(source).unwrap();
	let uri = CanonicalUri::parse("/test.x").unwrap();
	let mut scope = ModuleScope::new(&uri, imports, &EvalOptions::default());
	parsed.compiled.evaluate(&mut scope)?;
	Ok(scope.exports().clone())
}

#[test]
fn collects_specifiers_in_source_order() {
	let parsed = parse(
		"import './b.x'\n\
		 // import './commented.x'\n\
		 import c from './c.x'; import { d } from 'pkg/d'\n\
		 import * as e from './e.x'\n\
		 import './b.x'",
	)
	.unwrap();
	assert_eq!(parsed.specifiers, vec!["./b.x", "./c.x", "pkg/d", "./e.x", "./b.x"]);
}

#[test]
fn default_export_of_literal() {
	let exports = run("export default 1", &colors()).unwrap();
	assert_eq!(exports.default_export(), Some(&Value::Int(1)));
}

#[test]
fn bare_import_reexports_everything() {
	let exports = run("import './colors.x'", &colors()).unwrap();
	assert_eq!(exports.names().collect::<Vec<_>>(), vec!["default", "red", "blue"]);
}

#[test]
fn import_forms_bind_locals() {
	let source = "\
		import base from './colors.x'
		import { red, blue as b } from './colors.x'
		import * as all from './colors.x'
		export const pair = [red, b]
		export const fallback = base
		export default all.red + '/' + all.blue
	";
	let exports = run(source, &colors()).unwrap();
	assert_eq!(exports.get("pair"), Some(&Value::List(vec![Value::from("#f00"), Value::from("#00f")])));
	assert_eq!(exports.get("fallback"), Some(&Value::from("black")));
	assert_eq!(exports.default_export(), Some(&Value::from("#f00/#00f")));
}

#[test]
fn const_is_private_until_exported() {
	let exports = run("const a = 2\nexport const b = a + 3", &colors()).unwrap();
	assert_eq!(exports.get("a"), None);
	assert_eq!(exports.get("b"), Some(&Value::Int(5)));
}

#[test]
fn records_lists_and_members() {
	let source = "\
		const card = {
			size: 4,
			tags: ['a', 'b'],
		}
		export default [card.size + 0.5, card.tags.length, -card.size]
	";
	let exports = run(source, &colors()).unwrap();
	assert_eq!(
		exports.default_export(),
		Some(&Value::List(vec![Value::Float(4.5), Value::Int(2), Value::Int(-4)]))
	);
}

#[rstest]
#[case("throw 'nope'", EvaluationError::Thrown("nope".into()))]
#[case("export default missing", EvaluationError::Undefined("missing".into()))]
#[case("export default 1 + null", EvaluationError::Type("cannot add int and null".into()))]
#[case("import { green } from './colors.x'", EvaluationError::Undefined("`green` in `./colors.x`".into()))]
#[case("import './absent.x'", EvaluationError::UnresolvedImport("./absent.x".into()))]
#[case("export default 9223372036854775807 + 1", EvaluationError::Type("integer overflow".into()))]
fn runtime_errors(#[case] source: &str, #[case] expected: EvaluationError) {
	assert_eq!(run(source, &colors()).unwrap_err(), expected);
}

#[test]
fn exports_before_a_throw_are_not_kept_by_the_caller() {
	let parsed = parse("export const a = 1\nthrow 'late'").unwrap();
	let uri = CanonicalUri::parse("/test.x").unwrap();
	let imports = colors();
	let mut scope = ModuleScope::new(&uri, &imports, &EvalOptions::default());
	assert!(parsed.compiled.evaluate(&mut scope).is_err());
	assert_eq!(scope.exports().len(), 1);
}

#[rstest]
#[case("export default", 1)]
#[case("import from './a.x'", 1)]
#[case("\n\nexport const = 1", 3)]
#[case("export default 'open", 1)]
#[case("const a = 1 2", 1)]
#[case("export default [1, 2", 1)]
#[case("let a = 1", 1)]
#[case("export default #", 1)]
fn syntax_errors_carry_line(#[case] source: &str, #[case] line: usize) {
	let err = parse(source).unwrap_err();
	assert_eq!(err.line, line, "{err}");
}

#[test]
fn deep_nesting_is_rejected() {
	let source = format!("export default {}1{}", "[".repeat(100), "]".repeat(100));
	assert!(parse(&source).unwrap_err().message.contains("nested too deeply"));
}

proptest! {
	#[test]
	fn integer_sums_match_host_arithmetic(a in 0..=i64::from(i32::MAX), b in 0..=i64::from(i32::MAX)) {
		let exports = run(&format!("export const a = {a}\nexport default a + {b}"), &Tables(FxHashMap::default())).unwrap();
		prop_assert_eq!(exports.get("a"), Some(&Value::Int(a)));
		prop_assert_eq!(exports.default_export(), Some(&Value::Int(a + b)));
	}
}
