use serde::Deserialize;

use crate::Encoding;
use crate::StencilError;
use crate::StencilResult;

/// An immutable byte sequence registered for matching.
///
/// The whole of [`Token::value`] must match, but only `start..end` is the
/// token itself. Bytes before `start` and after `end` are context: the
/// processor copies leading context to the output and leaves trailing context
/// in the input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
	value: Vec<u8>,
	start: usize,
	end: usize,
}

impl Token {
	/// Create a token without context.
	pub fn new(value: impl Into<Vec<u8>>) -> StencilResult<Self> {
		let value = value.into();
		let end = value.len();
		Self::with_context(value, 0, end)
	}

	/// Create a token whose literal part is `value[start..end]`.
	pub fn with_context(value: impl Into<Vec<u8>>, start: usize, end: usize) -> StencilResult<Self> {
		let value = value.into();

		if start >= end || end > value.len() {
			return Err(StencilError::InvalidToken(format!(
				"literal range {start}..{end} is empty or outside a {} byte token",
				value.len()
			)));
		}

		Ok(Self { value, start, end })
	}

	/// The full byte sequence that must be present in the input, context
	/// included.
	pub fn value(&self) -> &[u8] {
		&self.value
	}

	/// The bytes that belong to the token itself.
	pub fn literal(&self) -> &[u8] {
		&self.value[self.start..self.end]
	}

	pub fn start(&self) -> usize {
		self.start
	}

	/// Exclusive end of the literal part within [`Token::value`].
	pub fn end(&self) -> usize {
		self.end
	}

	pub fn len(&self) -> usize {
		self.value.len()
	}

	pub fn is_empty(&self) -> bool {
		self.value.is_empty()
	}
}

/// Encoding-independent description of a token, optionally surrounded by
/// required context.
///
/// Deserializes either from a plain string or from a table:
///
/// ```toml
/// start = "<!--"
/// end = { before = "--", value = ">" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "TokenConfigRepr")]
pub struct TokenConfig {
	pub before: Option<String>,
	pub value: String,
	pub after: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TokenConfigRepr {
	Literal(String),
	Detailed {
		#[serde(default)]
		before: Option<String>,
		value: String,
		#[serde(default)]
		after: Option<String>,
	},
}

impl From<TokenConfigRepr> for TokenConfig {
	fn from(repr: TokenConfigRepr) -> Self {
		match repr {
			TokenConfigRepr::Literal(value) => Self::literal(value),
			TokenConfigRepr::Detailed {
				before,
				value,
				after,
			} => {
				Self {
					before,
					value,
					after,
				}
			}
		}
	}
}

impl TokenConfig {
	pub fn literal(value: impl Into<String>) -> Self {
		Self {
			before: None,
			value: value.into(),
			after: None,
		}
	}

	#[must_use]
	pub fn with_before(mut self, before: impl Into<String>) -> Self {
		self.before = Some(before.into());
		self
	}

	#[must_use]
	pub fn with_after(mut self, after: impl Into<String>) -> Self {
		self.after = Some(after.into());
		self
	}

	pub fn to_token(&self, encoding: Encoding) -> StencilResult<Token> {
		let before = self
			.before
			.as_deref()
			.map(|before| encoding.encode(before))
			.unwrap_or_default();
		let value = encoding.encode(&self.value);
		let after = self
			.after
			.as_deref()
			.map(|after| encoding.encode(after))
			.unwrap_or_default();

		if value.is_empty() {
			return Err(StencilError::InvalidToken(format!(
				"`{}` has an empty value",
				self.display()
			)));
		}

		let start = before.len();
		let end = start + value.len();
		let mut bytes = before;
		bytes.extend(value);
		bytes.extend(after);

		Token::with_context(bytes, start, end)
	}

	fn display(&self) -> String {
		format!(
			"{}{}{}",
			self.before.as_deref().unwrap_or_default(),
			self.value,
			self.after.as_deref().unwrap_or_default()
		)
	}
}

impl From<&str> for TokenConfig {
	fn from(value: &str) -> Self {
		Self::literal(value)
	}
}

impl From<String> for TokenConfig {
	fn from(value: String) -> Self {
		Self::literal(value)
	}
}
