use std::time::Duration;

use pretty_assertions::assert_eq;
use tandem_fs::MemoryFileSystem;

use super::*;
use crate::error::Severity;
use crate::graph::GraphEvent;
use crate::value::Value;

fn uri(input: &str) -> CanonicalUri {
	CanonicalUri::parse(input).unwrap()
}

fn workspace_over(files: &[(&str, &str)]) -> (MemoryFileSystem, Workspace) {
	let fs = MemoryFileSystem::from_files(files.iter().copied()).unwrap();
	let workspace = Workspace::new(Arc::new(fs.clone()), SandboxConfig::default(), uri("/"));
	(fs, workspace)
}

#[test]
fn locate_joins_relative_specifiers_onto_the_base() {
	let fs = MemoryFileSystem::new();
	let workspace = Workspace::new(Arc::new(fs), SandboxConfig::default(), uri("/project"));
	assert_eq!(workspace.base(), &uri("/project/"));
	assert_eq!(workspace.locate("src/a.x").unwrap(), uri("/project/src/a.x"));
	assert_eq!(workspace.locate("/elsewhere/a.x").unwrap(), uri("/elsewhere/a.x"));
	assert_eq!(workspace.locate("memory:///a.x").unwrap(), uri("memory:///a.x"));
}

#[tokio::test]
async fn open_returns_exports_and_subgraph_diagnostics() {
	let (_fs, workspace) = workspace_over(&[
		("/a.x", "import './ok.x'\nimport './bad.x'\nexport default 1"),
		("/ok.x", "export const ok = true"),
		("/bad.x", "throw 'nope'"),
	]);
	let module = workspace.open("a.x").await.unwrap();

	assert_eq!(module.uri, uri("/a.x"));
	assert_eq!(module.exports.default_export(), Some(&Value::Int(1)));
	assert_eq!(module.exports.get("ok"), Some(&Value::Bool(true)));
	assert_eq!(module.diagnostics.len(), 1);
	assert_eq!(module.diagnostics[0].uri, uri("/bad.x"));
	assert_eq!(module.diagnostics[0].severity, Severity::Error);
}

#[tokio::test]
async fn cyclic_import_reports_partial_exports() {
	let (_fs, workspace) = workspace_over(&[
		("/a.x", "import './b.x'\nexport const a = 1"),
		("/b.x", "import './a.x'\nexport const b = 2"),
	]);
	let a = workspace.open("/a.x").await.unwrap();
	assert_eq!(a.exports.names().collect::<Vec<_>>(), vec!["b", "a"]);

	let b = workspace.open("/b.x").await.unwrap();
	assert_eq!(b.exports.names().collect::<Vec<_>>(), vec!["b"]);
	let warnings: Vec<_> = b.diagnostics.iter().filter(|d| d.severity == Severity::Warning).collect();
	assert_eq!(warnings.len(), 1);
	assert_eq!(warnings[0].uri, uri("/b.x"));
	assert_eq!(&*warnings[0].message, "import of `./a.x` is cyclic; partial exports");
	assert!(a.diagnostics.iter().any(|d| d.uri == uri("/b.x")));
}

#[tokio::test]
async fn reload_picks_up_changed_imports() {
	let (fs, workspace) = workspace_over(&[("/a.x", "import './b.x'"), ("/b.x", "export default 1")]);
	assert_eq!(workspace.open("/a.x").await.unwrap().exports.default_export(), Some(&Value::Int(1)));

	fs.insert(&uri("/b.x"), "export default 2");
	let module = workspace.reload("/a.x").await.unwrap();
	assert_eq!(module.exports.default_export(), Some(&Value::Int(2)));
}

#[tokio::test]
async fn reload_of_a_child_reevaluates_open_roots() {
	let (fs, workspace) = workspace_over(&[("/a.x", "import b from './b.x'\nexport default b"), ("/b.x", "export default 1")]);
	workspace.open("/a.x").await.unwrap();

	fs.insert(&uri("/b.x"), "export default 5");
	workspace.reload("/b.x").await.unwrap();

	let a = workspace.graph().get(&uri("/a.x")).unwrap();
	assert_eq!(a.state(), DependencyState::Evaluated);
	assert_eq!(a.exports().unwrap().default_export(), Some(&Value::Int(5)));
}

#[tokio::test]
async fn remove_refuses_imported_modules() {
	let (_fs, workspace) = workspace_over(&[("/a.x", "import './b.x'"), ("/b.x", "export default 1")]);
	workspace.open("/a.x").await.unwrap();

	let err = workspace.remove("/b.x").unwrap_err();
	assert!(matches!(err, SandboxError::DependencyInUse { ref dependents, .. } if dependents == &vec![uri("/a.x")]));
	assert_eq!(workspace.remove("/a.x").unwrap(), vec![uri("/a.x"), uri("/b.x")]);
}

#[tokio::test]
async fn module_exports_serialize_as_plain_json() {
	let (_fs, workspace) = workspace_over(&[("/a.x", "export const name = 'x'\nexport default [1, 2.5, null]")]);
	let module = workspace.open("/a.x").await.unwrap();
	let json = serde_json::to_value(&module).unwrap();
	assert_eq!(
		json,
		serde_json::json!({
			"uri": "file:///a.x",
			"exports": { "name": "x", "default": [1, 2.5, null] },
			"diagnostics": [],
		})
	);
}

#[tokio::test(start_paused = true)]
async fn watch_forwards_file_changes() {
	let (fs, workspace) = workspace_over(&[("/a.x", "import b from './b.x'\nexport default b"), ("/b.x", "export default 1")]);
	workspace.open("/a.x").await.unwrap();
	let mut events = workspace.graph().subscribe();
	workspace.watch().unwrap();
	assert!(workspace.is_watching());

	fs.insert(&uri("/b.x"), "export default 9");
	tokio::time::timeout(Duration::from_secs(5), async {
		while let Ok(event) = events.recv().await {
			if matches!(event, GraphEvent::Evaluated { ref uri, .. } if uri.as_str() == "file:///a.x") {
				break;
			}
		}
	})
	.await
	.unwrap();

	let a = workspace.graph().get(&uri("/a.x")).unwrap();
	assert_eq!(a.exports().unwrap().default_export(), Some(&Value::Int(9)));
}

#[tokio::test]
async fn dispose_stops_everything() {
	let (_fs, workspace) = workspace_over(&[("/a.x", "export default 1")]);
	workspace.open("/a.x").await.unwrap();
	workspace.watch().unwrap();
	workspace.dispose();

	assert!(!workspace.is_watching());
	assert!(matches!(workspace.open("/a.x").await, Err(SandboxError::Disposed)));
	assert!(matches!(workspace.watch(), Err(SandboxError::Disposed)));
}
