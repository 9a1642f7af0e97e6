use std::ops::Range;

use float_cmp::approx_eq;
use logos::Logos;
use serde::Deserialize;
use serde_json::Value;
use snailquote::unescape;
use thiserror::Error;
use tracing::warn;

use crate::StencilResult;
use crate::state::ProcessorState;
use crate::token::TokenConfig;
use crate::trie::TokenTrie;
use crate::variables::VariableCollection;
use crate::variables::format_value;

/// Decides whether a conditional branch is taken.
///
/// The evaluator is called with the cursor right after an `if` or `elseif`
/// token and is expected to consume its expression from the input.
pub trait ConditionEvaluator: Send + Sync {
	fn evaluate(&self, state: &mut ProcessorState<'_>) -> StencilResult<bool>;
}

impl<F> ConditionEvaluator for F
where
	F: Fn(&mut ProcessorState<'_>) -> StencilResult<bool> + Send + Sync,
{
	fn evaluate(&self, state: &mut ProcessorState<'_>) -> StencilResult<bool> {
		self(state)
	}
}

/// Declarative settings for [`BooleanExpressionEvaluator`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ExpressionEvaluatorConfig {
	/// Tokens that end an expression. Empty means the end of the line.
	#[serde(default)]
	pub terminators: Vec<TokenConfig>,
	/// Whether the terminator is consumed along with the expression.
	#[serde(default)]
	pub consume_terminator: bool,
}

/// Reads an expression such as `name == "demo" && !(draft)` from the input
/// and evaluates it against the run's variables.
///
/// Expressions that fail to parse are logged and evaluate to `false`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BooleanExpressionEvaluator {
	terminators: Vec<TokenConfig>,
	consume_terminator: bool,
}

impl BooleanExpressionEvaluator {
	pub fn new<T: Into<TokenConfig>>(terminators: impl IntoIterator<Item = T>) -> Self {
		Self {
			terminators: terminators.into_iter().map(Into::into).collect(),
			consume_terminator: false,
		}
	}

	/// Evaluate up to the end of the line.
	pub fn line() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn consuming_terminator(mut self) -> Self {
		self.consume_terminator = true;
		self
	}

	pub fn from_config(config: &ExpressionEvaluatorConfig) -> Self {
		Self {
			terminators: config.terminators.clone(),
			consume_terminator: config.consume_terminator,
		}
	}
}

impl ConditionEvaluator for BooleanExpressionEvaluator {
	fn evaluate(&self, state: &mut ProcessorState<'_>) -> StencilResult<bool> {
		let (bytes, _) = if self.terminators.is_empty() {
			let encoding_config = state.encoding_config();
			state.read_until(&encoding_config.line_endings, false)?
		} else {
			let mut trie = TokenTrie::new();
			for terminator in &self.terminators {
				trie.add_token(terminator.to_token(state.encoding())?);
			}
			state.read_until(&trie, self.consume_terminator)?
		};

		let text = match state.encoding().decode(&bytes) {
			Ok(text) => text,
			Err(e) => {
				warn!(error = %e, "condition is not valid text, treating it as false");
				return Ok(false);
			}
		};

		match evaluate_expression(&text, state.variables()) {
			Ok(result) => Ok(result),
			Err(e) => {
				warn!(expression = %text.trim(), error = %e, "condition failed to evaluate, treating it as false");
				Ok(false)
			}
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
	#[error("empty expression")]
	Empty,
	#[error("unexpected `{0}`")]
	UnexpectedToken(String),
	#[error("unexpected end of expression")]
	UnexpectedEnd,
	#[error("invalid string literal {0}")]
	InvalidString(String),
	#[error("invalid number `{0}`")]
	InvalidNumber(String),
}

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n]+")]
enum ExpressionToken {
	#[token("(")]
	Open,
	#[token(")")]
	Close,
	#[token("!")]
	Not,
	#[token("&&")]
	And,
	#[token("||")]
	Or,
	#[token("==")]
	Equal,
	#[token("!=")]
	NotEqual,
	#[regex(r"[a-zA-Z_][a-zA-Z0-9_.]*")]
	Ident,
	#[regex(r"-?[0-9]+(\.[0-9]+)?")]
	Number,
	#[regex(r#""([^"\\]|\\.)*""#)]
	DoubleQuotedString,
	#[regex(r"'([^'\\]|\\.)*'")]
	SingleQuotedString,
}

/// Evaluate a boolean expression against `variables`.
///
/// Supports `!`, `&&`, `||`, `==`, `!=`, parentheses, `true`, `false`,
/// numbers, quoted strings and variable names. A bare operand is truthy when
/// it is `true`, a non-zero number, a non-empty string other than `"false"`
/// or a non-empty collection. Unknown variables are `null`, which is falsy.
pub fn evaluate_expression(text: &str, variables: &VariableCollection) -> Result<bool, ExpressionError> {
	let mut tokens = Vec::new();
	for (token, span) in ExpressionToken::lexer(text).spanned() {
		let token = token.map_err(|()| ExpressionError::UnexpectedToken(text[span.clone()].to_string()))?;
		tokens.push((token, span));
	}

	if tokens.is_empty() {
		return Err(ExpressionError::Empty);
	}

	let mut parser = ExpressionParser {
		source: text,
		tokens,
		cursor: 0,
		variables,
	};
	let value = parser.or()?;

	match parser.peek() {
		Some((_, span)) => Err(ExpressionError::UnexpectedToken(text[span].to_string())),
		None => Ok(is_truthy(&value)),
	}
}

struct ExpressionParser<'a> {
	source: &'a str,
	tokens: Vec<(ExpressionToken, Range<usize>)>,
	cursor: usize,
	variables: &'a VariableCollection,
}

impl ExpressionParser<'_> {
	fn peek(&self) -> Option<(ExpressionToken, Range<usize>)> {
		self.tokens.get(self.cursor).cloned()
	}

	fn eat(&mut self, expected: ExpressionToken) -> bool {
		match self.tokens.get(self.cursor) {
			Some((token, _)) if *token == expected => {
				self.cursor += 1;
				true
			}
			_ => false,
		}
	}

	fn or(&mut self) -> Result<Value, ExpressionError> {
		let mut value = self.and()?;
		while self.eat(ExpressionToken::Or) {
			let right = self.and()?;
			value = Value::Bool(is_truthy(&value) || is_truthy(&right));
		}

		Ok(value)
	}

	fn and(&mut self) -> Result<Value, ExpressionError> {
		let mut value = self.unary()?;
		while self.eat(ExpressionToken::And) {
			let right = self.unary()?;
			value = Value::Bool(is_truthy(&value) && is_truthy(&right));
		}

		Ok(value)
	}

	fn unary(&mut self) -> Result<Value, ExpressionError> {
		if self.eat(ExpressionToken::Not) {
			let value = self.unary()?;
			return Ok(Value::Bool(!is_truthy(&value)));
		}

		self.comparison()
	}

	fn comparison(&mut self) -> Result<Value, ExpressionError> {
		let left = self.primary()?;

		if self.eat(ExpressionToken::Equal) {
			let right = self.primary()?;
			return Ok(Value::Bool(values_equal(&left, &right)));
		}

		if self.eat(ExpressionToken::NotEqual) {
			let right = self.primary()?;
			return Ok(Value::Bool(!values_equal(&left, &right)));
		}

		Ok(left)
	}

	fn primary(&mut self) -> Result<Value, ExpressionError> {
		let Some((token, span)) = self.peek() else {
			return Err(ExpressionError::UnexpectedEnd);
		};
		self.cursor += 1;
		let source = self.source;
		let slice = &source[span];

		match token {
			ExpressionToken::Open => {
				let value = self.or()?;
				if self.eat(ExpressionToken::Close) {
					Ok(value)
				} else {
					Err(self.unexpected())
				}
			}
			ExpressionToken::Ident => {
				Ok(match slice {
					"true" => Value::Bool(true),
					"false" => Value::Bool(false),
					"null" => Value::Null,
					name => self.variables.get(name).cloned().unwrap_or(Value::Null),
				})
			}
			ExpressionToken::Number => {
				slice
					.parse::<f64>()
					.ok()
					.and_then(serde_json::Number::from_f64)
					.map(Value::Number)
					.ok_or_else(|| ExpressionError::InvalidNumber(slice.to_string()))
			}
			ExpressionToken::DoubleQuotedString | ExpressionToken::SingleQuotedString => {
				unescape(slice)
					.map(Value::String)
					.map_err(|_| ExpressionError::InvalidString(slice.to_string()))
			}
			_ => Err(ExpressionError::UnexpectedToken(slice.to_string())),
		}
	}

	fn unexpected(&self) -> ExpressionError {
		match self.peek() {
			Some((_, span)) => ExpressionError::UnexpectedToken(self.source[span].to_string()),
			None => ExpressionError::UnexpectedEnd,
		}
	}
}

fn is_truthy(value: &Value) -> bool {
	match value {
		Value::Null => false,
		Value::Bool(value) => *value,
		Value::Number(number) => number.as_f64().is_some_and(|number| number != 0.0),
		Value::String(text) => !text.is_empty() && !text.eq_ignore_ascii_case("false"),
		Value::Array(items) => !items.is_empty(),
		Value::Object(entries) => !entries.is_empty(),
	}
}

fn values_equal(left: &Value, right: &Value) -> bool {
	match (left, right) {
		(Value::Number(left), Value::Number(right)) => {
			match (left.as_f64(), right.as_f64()) {
				(Some(left), Some(right)) => approx_eq!(f64, left, right, ulps = 2),
				_ => left == right,
			}
		}
		(Value::String(left), Value::String(right)) => left == right,
		(Value::Null, Value::Null) => true,
		(Value::Null, _) | (_, Value::Null) => false,
		_ => format_value(Some(left)).eq_ignore_ascii_case(&format_value(Some(right))),
	}
}
