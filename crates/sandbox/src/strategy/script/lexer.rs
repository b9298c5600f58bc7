use crate::error::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Token {
	Ident(String),
	Str(String),
	Int(i64),
	Float(f64),
	Punct(char),
	/// Statement break: a newline outside brackets, or `;`.
	Break,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Spanned {
	pub token: Token,
	pub line: usize,
}

const PUNCT: &[char] = &['{', '}', '[', ']', '(', ')', ',', '*', '=', '+', '-', '.', ':'];

pub(super) fn tokenize(source: &str) -> Result<Vec<Spanned>, ParseError> {
	let mut tokens = Vec::new();
	let mut chars = source.chars().peekable();
	let mut line = 1;
	let mut depth = 0usize;

	while let Some(c) = chars.next() {
		match c {
			'\n' => {
				if depth == 0 {
					tokens.push(Spanned { token: Token::Break, line });
				}
				line += 1;
			}
			';' => tokens.push(Spanned { token: Token::Break, line }),
			c if c.is_whitespace() => {}
			'/' if chars.peek() == Some(&'/') => {
				while chars.peek().is_some_and(|&c| c != '\n') {
					chars.next();
				}
			}
			'\'' | '"' => {
				let mut text = String::new();
				loop {
					match chars.next() {
						Some(q) if q == c => break,
						Some('\\') => {
							let escaped = match chars.next() {
								Some('n') => '\n',
								Some('t') => '\t',
								Some('r') => '\r',
								Some('0') => '\0',
								Some(other @ ('\\' | '\'' | '"')) => other,
								Some(other) => return Err(ParseError::new(line, format!("unknown escape `\\{other}`"))),
								None => return Err(ParseError::new(line, "unterminated string")),
							};
							text.push(escaped);
						}
						Some('\n') | None => return Err(ParseError::new(line, "unterminated string")),
						Some(other) => text.push(other),
					}
				}
				tokens.push(Spanned { token: Token::Str(text), line });
			}
			c if c.is_ascii_digit() => {
				let mut text = String::from(c);
				while let Some(&d) = chars.peek().filter(|d| d.is_ascii_digit() || **d == '_') {
					text.push(d);
					chars.next();
				}
				let mut is_float = false;
				if chars.peek() == Some(&'.') {
					let mut ahead = chars.clone();
					ahead.next();
					if ahead.peek().is_some_and(char::is_ascii_digit) {
						is_float = true;
						text.push('.');
						chars.next();
						while let Some(&d) = chars.peek().filter(|d| d.is_ascii_digit() || **d == '_') {
							text.push(d);
							chars.next();
						}
					}
				}
				let digits = text.replace('_', "");
				let token = if is_float {
					Token::Float(digits.parse().map_err(|_| ParseError::new(line, format!("invalid number `{text}`")))?)
				} else {
					Token::Int(digits.parse().map_err(|_| ParseError::new(line, format!("integer `{text}` out of range")))?)
				};
				tokens.push(Spanned { token, line });
			}
			c if c.is_alphabetic() || c == '_' || c == '$' => {
				let mut text = String::from(c);
				while let Some(&d) = chars.peek().filter(|d| d.is_alphanumeric() || **d == '_' || **d == '$') {
					text.push(d);
					chars.next();
				}
				tokens.push(Spanned { token: Token::Ident(text), line });
			}
			c if PUNCT.contains(&c) => {
				match c {
					'{' | '[' | '(' => depth += 1,
					'}' | ']' | ')' => depth = depth.saturating_sub(1),
					_ => {}
				}
				tokens.push(Spanned { token: Token::Punct(c), line });
			}
			other => return Err(ParseError::new(line, format!("unexpected character `{other}`"))),
		}
	}
	Ok(tokens)
}
