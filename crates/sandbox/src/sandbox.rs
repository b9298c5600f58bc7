//! Isolated evaluation of one dependency's compiled form.
//!
//! A module only sees a [`ModuleScope`]: it can `import` the export table of
//! a specifier it declared, and `export` values. Imports are answered from
//! children the graph already evaluated, never by I/O.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use tandem_fs::CanonicalUri;

use crate::config::EvalOptions;
use crate::dependency::Dependency;
use crate::error::{Diagnostic, EvaluationError};
use crate::strategy::CompiledModule;
use crate::value::{ExportTable, Value};

/// Answers a module's imports.
pub trait ImportResolver {
	/// Export table behind `specifier`, as declared by the importing module.
	fn import(&self, specifier: &str) -> Result<Arc<ExportTable>, EvaluationError>;
}

/// Everything a running module may touch.
pub struct ModuleScope<'a> {
	uri: &'a CanonicalUri,
	imports: &'a dyn ImportResolver,
	exports: ExportTable,
	steps: usize,
	max_steps: usize,
}

impl<'a> ModuleScope<'a> {
	pub fn new(uri: &'a CanonicalUri, imports: &'a dyn ImportResolver, options: &EvalOptions) -> Self {
		Self {
			uri,
			imports,
			exports: ExportTable::new(),
			steps: 0,
			max_steps: options.max_steps,
		}
	}

	/// URI of the running module.
	pub fn uri(&self) -> &CanonicalUri {
		self.uri
	}

	pub fn import(&self, specifier: &str) -> Result<Arc<ExportTable>, EvaluationError> {
		self.imports.import(specifier)
	}

	pub fn export(&mut self, name: impl Into<String>, value: Value) {
		self.exports.insert(name, value);
	}

	/// Re-exports every entry of `table`.
	pub fn export_all(&mut self, table: &ExportTable) {
		self.exports.extend_from(table);
	}

	pub fn exports(&self) -> &ExportTable {
		&self.exports
	}

	/// Charges one unit of work against the step budget.
	pub fn step(&mut self) -> Result<(), EvaluationError> {
		self.steps += 1;
		if self.steps > self.max_steps {
			return Err(EvaluationError::BudgetExhausted(self.max_steps));
		}
		Ok(())
	}

	fn into_exports(self) -> ExportTable {
		self.exports
	}
}

/// Execution context owned by one dependency.
///
/// Every run starts from an empty export table and diagnostics list.
#[derive(Debug)]
pub struct Sandbox {
	owner: Weak<Dependency>,
	uri: CanonicalUri,
	exports: Arc<ExportTable>,
	diagnostics: Vec<Diagnostic>,
}

impl Sandbox {
	pub fn new(owner: &Arc<Dependency>) -> Self {
		Self {
			owner: Arc::downgrade(owner),
			uri: owner.uri().clone(),
			exports: Arc::new(ExportTable::new()),
			diagnostics: Vec::new(),
		}
	}

	/// The dependency this sandbox belongs to, if it is still alive.
	pub fn owner(&self) -> Option<Arc<Dependency>> {
		self.owner.upgrade()
	}

	pub fn exports(&self) -> &Arc<ExportTable> {
		&self.exports
	}

	pub fn diagnostics(&self) -> &[Diagnostic] {
		&self.diagnostics
	}

	pub(crate) fn push_diagnostic(&mut self, diagnostic: Diagnostic) {
		self.diagnostics.push(diagnostic);
	}

	/// Runs `module` and returns its export table.
	///
	/// Failures, panics included, end up in [`Self::diagnostics`] and leave an
	/// empty table.
	pub fn evaluate(
		&mut self,
		module: Option<&Arc<dyn CompiledModule>>,
		imports: &dyn ImportResolver,
		options: &EvalOptions,
	) -> Arc<ExportTable> {
		self.exports = Arc::new(ExportTable::new());
		self.diagnostics.clear();

		let outcome = match module {
			Some(module) => {
				let mut scope = ModuleScope::new(&self.uri, imports, options);
				match std::panic::catch_unwind(AssertUnwindSafe(|| module.evaluate(&mut scope))) {
					Ok(Ok(())) => Ok(scope.into_exports()),
					Ok(Err(error)) => Err(error),
					Err(_) => Err(EvaluationError::Panicked),
				}
			}
			None => Err(EvaluationError::NotCompiled),
		};

		match outcome {
			Ok(exports) => {
				tracing::trace!(uri = %self.uri, exports = exports.len(), "sandbox.evaluate");
				self.exports = Arc::new(exports);
			}
			Err(error) => {
				tracing::debug!(uri = %self.uri, %error, "sandbox.error");
				self.diagnostics.push(Diagnostic::error(self.uri.clone(), error.to_string()));
			}
		}
		Arc::clone(&self.exports)
	}
}
