//! End-to-end behavior through the public API only.

use std::sync::Arc;
use std::time::Duration;

use futures::executor::block_on;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use tandem_fs::{CanonicalUri, FileSystem, MemoryFileSystem};
use tandem_sandbox::{
	ChangePipeline, DependencyGraph, DependencyState, FileResolver, GraphConfig, GraphEvent, RemoveMode, ResolverOptions,
	SandboxConfig, SandboxError, Value, Workspace,
};
use tokio_util::sync::CancellationToken;

fn uri(input: &str) -> CanonicalUri {
	CanonicalUri::parse(input).unwrap()
}

fn graph_over(files: &[(&str, &str)]) -> (MemoryFileSystem, DependencyGraph) {
	let fs = MemoryFileSystem::from_files(files.iter().copied()).unwrap();
	let graph = DependencyGraph::new(GraphConfig::from_config(Arc::new(fs.clone()), &SandboxConfig::default()));
	(fs, graph)
}

fn default_of(graph: &DependencyGraph, path: &str) -> Option<Value> {
	graph.get(&uri(path))?.exports()?.default_export().cloned()
}

#[tokio::test]
async fn importer_sees_child_default_after_child_evaluates() {
	let (_fs, graph) = graph_over(&[("/a.x", "import './b.x'"), ("/b.x", "export default 1")]);
	let mut events = graph.subscribe();
	graph.evaluate(&uri("/a.x")).await.unwrap();

	let mut order = Vec::new();
	while let Ok(event) = events.try_recv() {
		if let GraphEvent::Evaluated { uri, .. } = event {
			order.push(uri);
		}
	}
	assert_eq!(order, vec![uri("/b.x"), uri("/a.x")]);
	assert_eq!(default_of(&graph, "/a.x"), Some(Value::Int(1)));
}

#[tokio::test]
async fn changed_child_is_visible_after_reload() {
	let (_fs, graph) = graph_over(&[("/a.x", "import './b.x'"), ("/b.x", "export default 1")]);
	graph.evaluate(&uri("/a.x")).await.unwrap();

	graph.cache().write(&uri("/b.x"), "export default 2").await.unwrap();
	graph.reload(&uri("/a.x")).await.unwrap();
	assert_eq!(default_of(&graph, "/a.x"), Some(Value::Int(2)));
}

#[tokio::test]
async fn imported_dependency_cannot_be_removed_strictly() {
	let (_fs, graph) = graph_over(&[("/a.x", "import './b.x'"), ("/b.x", "export default 1")]);
	graph.open(&uri("/a.x")).await.unwrap();

	let err = graph.remove(&uri("/b.x"), RemoveMode::Strict).unwrap_err();
	assert!(matches!(err, SandboxError::DependencyInUse { .. }), "{err}");
	assert!(graph.contains(&uri("/b.x")));
}

#[tokio::test]
async fn invalidation_leaves_unrelated_branches_alone() {
	let (_fs, graph) = graph_over(&[
		("/a.x", "import './b.x'\nimport './d.x'"),
		("/b.x", "import './c.x'"),
		("/c.x", "export default 1"),
		("/d.x", "export default 2"),
	]);
	graph.evaluate(&uri("/a.x")).await.unwrap();

	let mut stale = graph.invalidate(&uri("/c.x"));
	stale.sort();
	assert_eq!(stale, vec![uri("/a.x"), uri("/b.x"), uri("/c.x")]);
	assert_eq!(graph.get(&uri("/d.x")).unwrap().state(), DependencyState::Evaluated);
}

#[tokio::test]
async fn removed_then_reopened_uri_starts_over() {
	let (_fs, graph) = graph_over(&[("/a.x", "export default 1")]);
	let first = graph.evaluate(&uri("/a.x")).await.unwrap();
	graph.remove(&uri("/a.x"), RemoveMode::Strict).unwrap();
	assert!(first.is_disposed());

	let second = graph.evaluate(&uri("/a.x")).await.unwrap();
	assert!(!Arc::ptr_eq(&first, &second));
	assert_eq!(second.state(), DependencyState::Evaluated);
}

#[tokio::test(start_paused = true)]
async fn debounced_edits_reach_open_modules() {
	let fs = MemoryFileSystem::from_files([("/a.x", "import b from './b.x'\nexport default b + 1"), ("/b.x", "export default 1")]).unwrap();
	let workspace = Workspace::new(Arc::new(fs.clone()), SandboxConfig::default(), uri("/"));
	assert_eq!(workspace.open("a.x").await.unwrap().exports.default_export(), Some(&Value::Int(2)));
	let mut events = workspace.graph().subscribe();
	workspace.watch().unwrap();

	for n in 10..15 {
		fs.insert(&uri("/b.x"), format!("export default {n}"));
	}
	tokio::time::timeout(Duration::from_secs(5), async {
		loop {
			if let Ok(GraphEvent::Evaluated { uri, .. }) = events.recv().await {
				if uri.as_str() == "file:///a.x" {
					break;
				}
			}
		}
	})
	.await
	.unwrap();

	assert_eq!(fs.read_count(&uri("/b.x")), 2);
	let a = workspace.graph().get(&uri("/a.x")).unwrap();
	assert_eq!(a.exports().unwrap().default_export(), Some(&Value::Int(16)));
	workspace.dispose();
}

#[tokio::test(start_paused = true)]
async fn pipeline_stops_on_cancellation() {
	let (fs, graph) = graph_over(&[]);
	let pipeline = ChangePipeline::new(graph, &SandboxConfig::default().watch);
	let cancel = CancellationToken::new();
	let task = tokio::spawn(pipeline.run(fs.watch(&[]).unwrap(), cancel.clone()));

	cancel.cancel();
	tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
}

const SEGMENTS: &[&str] = &["a", "b", "lib", "util", "index", "missing"];

fn specifier() -> impl Strategy<Value = String> {
	let prefix = prop_oneof![Just("./"), Just("../"), Just("/")];
	let segments = prop::collection::vec(prop::sample::select(SEGMENTS), 1..4);
	let ext = prop_oneof![Just(""), Just(".x"), Just(".js")];
	(prefix, segments, ext).prop_map(|(prefix, segments, ext)| format!("{prefix}{}{ext}", segments.join("/")))
}

proptest! {
	#[test]
	fn resolution_is_idempotent(spec in specifier(), base in prop::sample::select(vec!["/", "/lib/", "/lib/util/"])) {
		let fs = MemoryFileSystem::from_files([
			("/a.x", ""),
			("/b.js", ""),
			("/lib/util.x", ""),
			("/lib/util/index.x", ""),
			("/lib/a/index.js", ""),
		])
		.unwrap();
		let memoized = FileResolver::new(Arc::new(fs.clone()), ResolverOptions::default());
		let fresh = FileResolver::new(Arc::new(fs), ResolverOptions::default());
		let base = uri(base);

		let first = block_on(memoized.resolve(&spec, &base)).ok();
		let second = block_on(memoized.resolve(&spec, &base)).ok();
		let uncached = block_on(fresh.resolve(&spec, &base)).ok();
		prop_assert_eq!(&first, &second);
		prop_assert_eq!(&first, &uncached);
		if let Some(resolved) = first {
			let again = block_on(fresh.resolve(resolved.as_str(), &base)).ok();
			prop_assert_eq!(again, Some(resolved));
		}
	}
}
