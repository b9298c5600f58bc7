use super::lexer::{Spanned, Token};
use crate::error::ParseError;
use crate::value::Value;

const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Program {
	pub statements: Vec<Statement>,
}

impl Program {
	/// Import specifiers in source order.
	pub fn specifiers(&self) -> Vec<String> {
		self.statements
			.iter()
			.filter_map(|stmt| match stmt {
				Statement::Import { specifier, .. } => Some(specifier.clone()),
				_ => None,
			})
			.collect()
	}
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Statement {
	Import { specifier: String, clause: ImportClause },
	ExportDefault(Expr),
	ExportConst { name: String, value: Expr },
	Const { name: String, value: Expr },
	Throw(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum ImportClause {
	/// `import 'spec'`: re-exports everything.
	Bare,
	/// `import name from 'spec'`
	Default(String),
	/// `import { a, b as c } from 'spec'`: `(imported, local)` pairs.
	Named(Vec<(String, String)>),
	/// `import * as ns from 'spec'`
	Namespace(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Expr {
	Literal(Value),
	Ident(String),
	Member(Box<Expr>, String),
	List(Vec<Expr>),
	Record(Vec<(String, Expr)>),
	Neg(Box<Expr>),
	Add(Box<Expr>, Box<Expr>),
}

pub(super) fn parse(tokens: &[Spanned]) -> Result<Program, ParseError> {
	let mut parser = Parser { tokens, pos: 0, depth: 0 };
	let mut statements = Vec::new();
	loop {
		parser.skip_breaks();
		if parser.at_end() {
			break;
		}
		statements.push(parser.statement()?);
		parser.end_of_statement()?;
	}
	Ok(Program { statements })
}

struct Parser<'a> {
	tokens: &'a [Spanned],
	pos: usize,
	depth: usize,
}

impl Parser<'_> {
	fn at_end(&self) -> bool {
		self.pos >= self.tokens.len()
	}

	fn peek(&self) -> Option<&Token> {
		self.tokens.get(self.pos).map(|t| &t.token)
	}

	fn line(&self) -> usize {
		self.tokens
			.get(self.pos)
			.or_else(|| self.tokens.last())
			.map_or(1, |t| t.line)
	}

	fn next(&mut self) -> Option<&Token> {
		let token = self.tokens.get(self.pos).map(|t| &t.token);
		self.pos += 1;
		token
	}

	fn error(&self, message: impl Into<String>) -> ParseError {
		ParseError::new(self.line(), message)
	}

	fn skip_breaks(&mut self) {
		while self.peek() == Some(&Token::Break) {
			self.pos += 1;
		}
	}

	fn end_of_statement(&mut self) -> Result<(), ParseError> {
		match self.peek() {
			None | Some(Token::Break) => Ok(()),
			Some(other) => Err(self.error(format!("expected end of statement, found {}", describe(other)))),
		}
	}

	fn is_keyword(&self, keyword: &str) -> bool {
		matches!(self.peek(), Some(Token::Ident(name)) if name == keyword)
	}

	fn keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
		if self.is_keyword(keyword) {
			self.pos += 1;
			return Ok(());
		}
		Err(self.error(format!("expected `{keyword}`")))
	}

	fn punct(&mut self, c: char) -> Result<(), ParseError> {
		if self.eat_punct(c) {
			return Ok(());
		}
		Err(self.error(format!("expected `{c}`")))
	}

	fn eat_punct(&mut self, c: char) -> bool {
		if self.peek() == Some(&Token::Punct(c)) {
			self.pos += 1;
			return true;
		}
		false
	}

	fn ident(&mut self) -> Result<String, ParseError> {
		match self.peek() {
			Some(Token::Ident(name)) if !is_reserved(name) => {
				let name = name.clone();
				self.pos += 1;
				Ok(name)
			}
			Some(other) => Err(self.error(format!("expected identifier, found {}", describe(other)))),
			None => Err(self.error("expected identifier, found end of input")),
		}
	}

	fn string(&mut self) -> Result<String, ParseError> {
		match self.peek() {
			Some(Token::Str(text)) => {
				let text = text.clone();
				self.pos += 1;
				Ok(text)
			}
			_ => Err(self.error("expected string literal")),
		}
	}

	fn statement(&mut self) -> Result<Statement, ParseError> {
		if self.is_keyword("import") {
			self.pos += 1;
			return self.import();
		}
		if self.is_keyword("export") {
			self.pos += 1;
			if self.is_keyword("default") {
				self.pos += 1;
				return Ok(Statement::ExportDefault(self.expr()?));
			}
			self.keyword("const")?;
			let (name, value) = self.binding()?;
			return Ok(Statement::ExportConst { name, value });
		}
		if self.is_keyword("const") {
			self.pos += 1;
			let (name, value) = self.binding()?;
			return Ok(Statement::Const { name, value });
		}
		if self.is_keyword("throw") {
			self.pos += 1;
			return Ok(Statement::Throw(self.expr()?));
		}
		match self.peek() {
			Some(token) => Err(self.error(format!("unexpected {}", describe(token)))),
			None => Err(self.error("unexpected end of input")),
		}
	}

	fn binding(&mut self) -> Result<(String, Expr), ParseError> {
		let name = self.ident()?;
		self.punct('=')?;
		Ok((name, self.expr()?))
	}

	fn import(&mut self) -> Result<Statement, ParseError> {
		if let Some(Token::Str(_)) = self.peek() {
			let specifier = self.string()?;
			return Ok(Statement::Import {
				specifier,
				clause: ImportClause::Bare,
			});
		}
		let clause = if self.eat_punct('*') {
			self.keyword("as")?;
			ImportClause::Namespace(self.ident()?)
		} else if self.eat_punct('{') {
			let mut names = Vec::new();
			while !self.eat_punct('}') {
				let imported = self.ident_or_default()?;
				let local = if self.is_keyword("as") {
					self.pos += 1;
					self.ident()?
				} else {
					imported.clone()
				};
				names.push((imported, local));
				if !self.eat_punct(',') {
					self.punct('}')?;
					break;
				}
			}
			ImportClause::Named(names)
		} else {
			ImportClause::Default(self.ident()?)
		};
		self.keyword("from")?;
		let specifier = self.string()?;
		Ok(Statement::Import { specifier, clause })
	}

	fn ident_or_default(&mut self) -> Result<String, ParseError> {
		if self.is_keyword("default") {
			self.pos += 1;
			return Ok("default".to_string());
		}
		self.ident()
	}

	fn expr(&mut self) -> Result<Expr, ParseError> {
		self.depth += 1;
		if self.depth > MAX_NESTING {
			return Err(self.error("expression nested too deeply"));
		}
		let mut lhs = self.unary()?;
		while self.eat_punct('+') {
			let rhs = self.unary()?;
			lhs = Expr::Add(Box::new(lhs), Box::new(rhs));
		}
		self.depth -= 1;
		Ok(lhs)
	}

	fn unary(&mut self) -> Result<Expr, ParseError> {
		if self.eat_punct('-') {
			self.depth += 1;
			if self.depth > MAX_NESTING {
				return Err(self.error("expression nested too deeply"));
			}
			let operand = self.unary()?;
			self.depth -= 1;
			return Ok(Expr::Neg(Box::new(operand)));
		}
		let mut expr = self.primary()?;
		while self.eat_punct('.') {
			let Some(Token::Ident(name)) = self.next().cloned() else {
				return Err(self.error("expected property name after `.`"));
			};
			expr = Expr::Member(Box::new(expr), name);
		}
		Ok(expr)
	}

	fn primary(&mut self) -> Result<Expr, ParseError> {
		let line = self.line();
		let Some(token) = self.next().cloned() else {
			return Err(ParseError::new(line, "expected expression, found end of input"));
		};
		match token {
			Token::Int(i) => Ok(Expr::Literal(Value::Int(i))),
			Token::Float(x) => Ok(Expr::Literal(Value::Float(x))),
			Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
			Token::Ident(name) => {
				let literal = match name.as_str() {
					"true" => Some(Value::Bool(true)),
					"false" => Some(Value::Bool(false)),
					"null" => Some(Value::Null),
					_ => None,
				};
				if let Some(value) = literal {
					return Ok(Expr::Literal(value));
				}
				if is_reserved(&name) {
					return Err(ParseError::new(line, format!("unexpected keyword `{name}`")));
				}
				Ok(Expr::Ident(name))
			}
			Token::Punct('(') => {
				let inner = self.expr()?;
				self.punct(')')?;
				Ok(inner)
			}
			Token::Punct('[') => {
				let mut items = Vec::new();
				while !self.eat_punct(']') {
					items.push(self.expr()?);
					if !self.eat_punct(',') {
						self.punct(']')?;
						break;
					}
				}
				Ok(Expr::List(items))
			}
			Token::Punct('{') => {
				let mut fields = Vec::new();
				while !self.eat_punct('}') {
					let key = match self.next().cloned() {
						Some(Token::Ident(name)) | Some(Token::Str(name)) => name,
						_ => return Err(self.error("expected record key")),
					};
					self.punct(':')?;
					fields.push((key, self.expr()?));
					if !self.eat_punct(',') {
						self.punct('}')?;
						break;
					}
				}
				Ok(Expr::Record(fields))
			}
			other => Err(ParseError::new(line, format!("expected expression, found {}", describe(&other)))),
		}
	}
}

fn is_reserved(name: &str) -> bool {
	matches!(
		name,
		"import" | "export" | "from" | "default" | "const" | "throw" | "true" | "false" | "null"
	)
}

fn describe(token: &Token) -> String {
	match token {
		Token::Ident(name) => format!("`{name}`"),
		Token::Str(_) => "string literal".to_string(),
		Token::Int(_) | Token::Float(_) => "number".to_string(),
		Token::Punct(c) => format!("`{c}`"),
		Token::Break => "end of statement".to_string(),
	}
}
