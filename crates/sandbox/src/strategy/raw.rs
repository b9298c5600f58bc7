use std::sync::Arc;

use async_trait::async_trait;
use tandem_fs::CanonicalUri;

use super::{CompiledModule, DependencyGraphStrategy, ParsedModule};
use crate::error::{EvaluationError, ParseError};
use crate::sandbox::ModuleScope;
use crate::value::{ExportTable, Value};

/// Treats the file as an opaque asset: no children, `default` is the text.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawStrategy;

#[derive(Debug)]
struct RawModule {
	content: Arc<str>,
}

impl CompiledModule for RawModule {
	fn evaluate(&self, scope: &mut ModuleScope<'_>) -> Result<(), EvaluationError> {
		scope.step()?;
		scope.export(ExportTable::DEFAULT, Value::String(self.content.to_string()));
		Ok(())
	}
}

#[async_trait]
impl DependencyGraphStrategy for RawStrategy {
	fn name(&self) -> &'static str {
		"raw"
	}

	async fn parse(&self, _uri: &CanonicalUri, content: &str) -> Result<ParsedModule, ParseError> {
		Ok(ParsedModule {
			specifiers: Vec::new(),
			compiled: Arc::new(RawModule { content: content.into() }),
		})
	}
}
