use std::sync::Arc;

use pretty_assertions::assert_eq;
use rstest::rstest;
use tandem_fs::MemoryFileSystem;

use super::*;

fn uri(input: &str) -> CanonicalUri {
	CanonicalUri::parse(input).unwrap()
}

fn fixture() -> (MemoryFileSystem, FileResolver) {
	let fs = MemoryFileSystem::from_files([
		("memory:///a.x", ""),
		("memory:///b.x", ""),
		("memory:///lib/util.js", ""),
		("memory:///lib/widgets/index.x", ""),
		("memory:///lib/plain", ""),
		("memory:///modules/pkg/index.js", ""),
		("memory:///src/deep/modules/local.x", ""),
		("memory:///styles/site.css", ""),
	])
	.unwrap();
	let resolver = FileResolver::new(Arc::new(fs.clone()), ResolverOptions::default());
	(fs, resolver)
}

#[rstest]
#[case("./b.x", "memory:///", "memory:///b.x")]
#[case("./b", "memory:///", "memory:///b.x")]
#[case("../a", "memory:///lib/", "memory:///a.x")]
#[case("./util", "memory:///lib/", "memory:///lib/util.js")]
#[case("./widgets", "memory:///lib/", "memory:///lib/widgets/index.x")]
#[case("./plain", "memory:///lib/", "memory:///lib/plain")]
#[case("/lib/util", "memory:///src/deep/", "memory:///lib/util.js")]
#[case("pkg", "memory:///src/deep/", "memory:///modules/pkg/index.js")]
#[case("local", "memory:///src/deep/", "memory:///src/deep/modules/local.x")]
#[case("memory:///styles/./site.css", "memory:///lib/", "memory:///styles/site.css")]
#[case("./b.x", "memory:///a.x", "memory:///b.x")]
#[tokio::test]
async fn resolves(#[case] specifier: &str, #[case] base: &str, #[case] expected: &str) {
	let (_fs, resolver) = fixture();
	assert_eq!(resolver.resolve(specifier, &uri(base)).await.unwrap(), uri(expected));
}

#[rstest]
#[case("./missing")]
#[case("nopkg")]
#[case("memory:///styles/site")]
#[tokio::test]
async fn reports_missing(#[case] specifier: &str) {
	let (_fs, resolver) = fixture();
	let err = resolver.resolve(specifier, &uri("memory:///lib/")).await.unwrap_err();
	let ResolutionError::NotFound { tried, .. } = err else {
		panic!("expected NotFound, got {err:?}");
	};
	assert!(!tried.is_empty());
}

#[tokio::test]
async fn not_found_lists_candidates_in_probe_order() {
	let (_fs, resolver) = fixture();
	let err = resolver.resolve("./c", &uri("memory:///")).await.unwrap_err();
	let ResolutionError::NotFound { tried, .. } = err else {
		panic!("expected NotFound");
	};
	let tried: Vec<_> = tried.iter().map(|u| u.as_str().to_string()).collect();
	assert_eq!(
		tried,
		vec![
			"memory:///c",
			"memory:///c.x",
			"memory:///c.js",
			"memory:///c/index",
			"memory:///c/index.x",
			"memory:///c/index.js",
		]
	);
}

#[tokio::test]
async fn protocol_qualified_specifier_is_not_probed() {
	let (_fs, resolver) = fixture();
	let err = resolver.resolve("memory:///a", &uri("memory:///")).await.unwrap_err();
	let ResolutionError::NotFound { tried, .. } = err else {
		panic!("expected NotFound");
	};
	assert_eq!(tried, vec![uri("memory:///a")]);
}

#[tokio::test]
async fn resolution_is_idempotent() {
	let (_fs, resolver) = fixture();
	let base = uri("memory:///lib/");
	let first = resolver.resolve("./widgets", &base).await.unwrap();
	let second = resolver.resolve("./widgets", &base).await.unwrap();
	let unmemoized = resolver.resolve_with("./widgets", &base, &ResolverOptions::default()).await.unwrap();
	assert_eq!(first, second);
	assert_eq!(first, unmemoized);
}

#[tokio::test]
async fn memo_survives_until_cleared() {
	let (fs, resolver) = fixture();
	let base = uri("memory:///");
	assert_eq!(resolver.resolve("./b", &base).await.unwrap(), uri("memory:///b.x"));

	fs.insert(&uri("memory:///b"), "");
	assert_eq!(resolver.resolve("./b", &base).await.unwrap(), uri("memory:///b.x"));

	resolver.clear();
	assert_eq!(resolver.resolve("./b", &base).await.unwrap(), uri("memory:///b"));
}

#[tokio::test]
async fn custom_options_change_probe_set() {
	let (_fs, resolver) = fixture();
	let options = ResolverOptions {
		extensions: vec![".css".into()],
		index_files: vec![],
		module_directories: vec![],
	};
	let found = resolver.resolve_with("./site", &uri("memory:///styles/"), &options).await.unwrap();
	assert_eq!(found, uri("memory:///styles/site.css"));
	assert!(resolver.resolve_with("./widgets", &uri("memory:///lib/"), &options).await.is_err());
}

#[tokio::test]
async fn empty_specifier_is_invalid() {
	let (_fs, resolver) = fixture();
	let err = resolver.resolve("", &uri("memory:///")).await.unwrap_err();
	assert!(matches!(err, ResolutionError::InvalidSpecifier { .. }));
}
