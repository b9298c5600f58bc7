//! Values produced by evaluation and the export tables that carry them.

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;

/// A value a module can bind, export or import.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
	Null,
	Bool(bool),
	Int(i64),
	Float(f64),
	String(String),
	List(Vec<Value>),
	Record(IndexMap<String, Value>),
}

impl Value {
	pub const fn type_name(&self) -> &'static str {
		match self {
			Self::Null => "null",
			Self::Bool(_) => "bool",
			Self::Int(_) => "int",
			Self::Float(_) => "float",
			Self::String(_) => "string",
			Self::List(_) => "list",
			Self::Record(_) => "record",
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			Self::String(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_int(&self) -> Option<i64> {
		match self {
			Self::Int(i) => Some(*i),
			_ => None,
		}
	}
}

impl From<i64> for Value {
	fn from(value: i64) -> Self {
		Self::Int(value)
	}
}

impl From<&str> for Value {
	fn from(value: &str) -> Self {
		Self::String(value.to_string())
	}
}

impl From<String> for Value {
	fn from(value: String) -> Self {
		Self::String(value)
	}
}

impl From<bool> for Value {
	fn from(value: bool) -> Self {
		Self::Bool(value)
	}
}

impl fmt::Display for Value {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Null => f.write_str("null"),
			Self::Bool(b) => write!(f, "{b}"),
			Self::Int(i) => write!(f, "{i}"),
			Self::Float(x) => write!(f, "{x}"),
			Self::String(s) => f.write_str(s),
			Self::List(items) => {
				f.write_str("[")?;
				for (i, item) in items.iter().enumerate() {
					if i > 0 {
						f.write_str(", ")?;
					}
					write!(f, "{item}")?;
				}
				f.write_str("]")
			}
			Self::Record(fields) => {
				f.write_str("{")?;
				for (i, (name, value)) in fields.iter().enumerate() {
					if i > 0 {
						f.write_str(", ")?;
					}
					write!(f, "{name}: {value}")?;
				}
				f.write_str("}")
			}
		}
	}
}

/// Named values a module exposes after evaluation, in export order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ExportTable {
	entries: IndexMap<String, Value>,
}

impl ExportTable {
	/// Name under which `export default` binds.
	pub const DEFAULT: &'static str = "default";

	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, name: &str) -> Option<&Value> {
		self.entries.get(name)
	}

	/// Binds `name`, replacing any earlier export of the same name.
	pub fn insert(&mut self, name: impl Into<String>, value: Value) {
		self.entries.insert(name.into(), value);
	}

	pub fn default_export(&self) -> Option<&Value> {
		self.get(Self::DEFAULT)
	}

	/// Copies every entry of `other` into `self`.
	pub fn extend_from(&mut self, other: &Self) {
		for (name, value) in &other.entries {
			self.entries.insert(name.clone(), value.clone());
		}
	}

	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.entries.keys().map(String::as_str)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
		self.entries.iter().map(|(k, v)| (k.as_str(), v))
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// The table as a record value, for namespace imports.
	pub fn to_record(&self) -> Value {
		Value::Record(self.entries.clone())
	}
}

impl FromIterator<(String, Value)> for ExportTable {
	fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
		Self {
			entries: iter.into_iter().collect(),
		}
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn later_export_replaces_earlier_in_place() {
		let mut table = ExportTable::new();
		table.insert("a", Value::Int(1));
		table.insert("b", Value::Int(2));
		table.insert("a", Value::Int(3));
		assert_eq!(table.names().collect::<Vec<_>>(), vec!["a", "b"]);
		assert_eq!(table.get("a"), Some(&Value::Int(3)));
	}

	#[test]
	fn serializes_as_plain_json() {
		let mut table = ExportTable::new();
		table.insert(ExportTable::DEFAULT, Value::List(vec![Value::Int(1), Value::from("x"), Value::Null]));
		let json = serde_json::to_string(&table).unwrap();
		assert_eq!(json, r#"{"default":[1,"x",null]}"#);
	}

	#[test]
	fn display_renders_nested_values() {
		let mut fields = IndexMap::new();
		fields.insert("n".to_string(), Value::Float(1.5));
		fields.insert("ok".to_string(), Value::Bool(true));
		assert_eq!(Value::Record(fields).to_string(), "{n: 1.5, ok: true}");
	}
}
