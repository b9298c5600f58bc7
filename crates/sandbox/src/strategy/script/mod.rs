//! A small line-oriented module language.
//!
//! ```text
//! import './theme.x'                 // re-export everything
//! import colors from './colors.x'    // default export
//! import { red, blue as b } from './colors.x'
//! import * as palette from 'palette'
//! const base = 4
//! export const size = base + 2
//! export default { size: size, name: 'card' }
//! ```
//!
//! Statements end at a newline or `;`. Expressions cover literals, names,
//! member access, lists, records and `+`.

mod lexer;
mod parser;

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use tandem_fs::CanonicalUri;

use self::parser::{Expr, ImportClause, Program, Statement};
use super::{CompiledModule, DependencyGraphStrategy, ParsedModule};
use crate::error::{EvaluationError, ParseError};
use crate::sandbox::ModuleScope;
use crate::value::{ExportTable, Value};

#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptStrategy;

#[async_trait]
impl DependencyGraphStrategy for ScriptStrategy {
	fn name(&self) -> &'static str {
		"script"
	}

	async fn parse(&self, uri: &CanonicalUri, content: &str) -> Result<ParsedModule, ParseError> {
		let tokens = lexer::tokenize(content)?;
		let program = parser::parse(&tokens)?;
		let specifiers = program.specifiers();
		tracing::trace!(uri = %uri, statements = program.statements.len(), imports = specifiers.len(), "script.parse");
		Ok(ParsedModule {
			specifiers,
			compiled: Arc::new(ScriptModule { program }),
		})
	}
}

#[derive(Debug)]
struct ScriptModule {
	program: Program,
}

impl CompiledModule for ScriptModule {
	fn evaluate(&self, scope: &mut ModuleScope<'_>) -> Result<(), EvaluationError> {
		let mut env: FxHashMap<String, Value> = FxHashMap::default();
		for statement in &self.program.statements {
			scope.step()?;
			match statement {
				Statement::Import { specifier, clause } => {
					let table = scope.import(specifier)?;
					bind_import(scope, &mut env, specifier, clause, &table)?;
				}
				Statement::ExportDefault(expr) => {
					let value = eval(expr, &env, scope)?;
					scope.export(ExportTable::DEFAULT, value);
				}
				Statement::ExportConst { name, value } => {
					let value = eval(value, &env, scope)?;
					env.insert(name.clone(), value.clone());
					scope.export(name.clone(), value);
				}
				Statement::Const { name, value } => {
					let value = eval(value, &env, scope)?;
					env.insert(name.clone(), value);
				}
				Statement::Throw(expr) => {
					return Err(EvaluationError::Thrown(eval(expr, &env, scope)?.to_string()));
				}
			}
		}
		Ok(())
	}
}

fn bind_import(
	scope: &mut ModuleScope<'_>,
	env: &mut FxHashMap<String, Value>,
	specifier: &str,
	clause: &ImportClause,
	table: &ExportTable,
) -> Result<(), EvaluationError> {
	match clause {
		ImportClause::Bare => scope.export_all(table),
		ImportClause::Default(local) => {
			let value = table
				.default_export()
				.ok_or_else(|| EvaluationError::Undefined(format!("default export of `{specifier}`")))?;
			env.insert(local.clone(), value.clone());
		}
		ImportClause::Named(names) => {
			for (imported, local) in names {
				let value = table
					.get(imported)
					.ok_or_else(|| EvaluationError::Undefined(format!("`{imported}` in `{specifier}`")))?;
				env.insert(local.clone(), value.clone());
			}
		}
		ImportClause::Namespace(local) => {
			env.insert(local.clone(), table.to_record());
		}
	}
	Ok(())
}

fn eval(expr: &Expr, env: &FxHashMap<String, Value>, scope: &mut ModuleScope<'_>) -> Result<Value, EvaluationError> {
	scope.step()?;
	match expr {
		Expr::Literal(value) => Ok(value.clone()),
		Expr::Ident(name) => env.get(name).cloned().ok_or_else(|| EvaluationError::Undefined(name.clone())),
		Expr::Member(target, name) => member(eval(target, env, scope)?, name),
		Expr::List(items) => Ok(Value::List(
			items.iter().map(|item| eval(item, env, scope)).collect::<Result<_, _>>()?,
		)),
		Expr::Record(fields) => {
			let mut record = IndexMap::with_capacity(fields.len());
			for (key, value) in fields {
				record.insert(key.clone(), eval(value, env, scope)?);
			}
			Ok(Value::Record(record))
		}
		Expr::Neg(operand) => match eval(operand, env, scope)? {
			Value::Int(i) => i.checked_neg().map(Value::Int).ok_or_else(|| EvaluationError::Type("integer overflow".into())),
			Value::Float(x) => Ok(Value::Float(-x)),
			other => Err(EvaluationError::Type(format!("cannot negate {}", other.type_name()))),
		},
		Expr::Add(lhs, rhs) => add(eval(lhs, env, scope)?, eval(rhs, env, scope)?),
	}
}

fn member(target: Value, name: &str) -> Result<Value, EvaluationError> {
	match (target, name) {
		(Value::Record(mut fields), _) => fields
			.shift_remove(name)
			.ok_or_else(|| EvaluationError::Undefined(format!("property `{name}`"))),
		(Value::List(items), "length") => Ok(Value::Int(items.len() as i64)),
		(Value::String(s), "length") => Ok(Value::Int(s.chars().count() as i64)),
		(other, _) => Err(EvaluationError::Type(format!("cannot read `{name}` of {}", other.type_name()))),
	}
}

fn add(lhs: Value, rhs: Value) -> Result<Value, EvaluationError> {
	match (lhs, rhs) {
		(Value::Int(a), Value::Int(b)) => a.checked_add(b).map(Value::Int).ok_or_else(|| EvaluationError::Type("integer overflow".into())),
		(Value::Int(a), Value::Float(b)) => Ok(Value::Float(a as f64 + b)),
		(Value::Float(a), Value::Int(b)) => Ok(Value::Float(a + b as f64)),
		(Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
		(Value::String(a), b) => Ok(Value::String(format!("{a}{b}"))),
		(a, Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
		(Value::List(mut a), Value::List(b)) => {
			a.extend(b);
			Ok(Value::List(a))
		}
		(a, b) => Err(EvaluationError::Type(format!("cannot add {} and {}", a.type_name(), b.type_name()))),
	}
}

#[cfg(test)]
mod tests;
