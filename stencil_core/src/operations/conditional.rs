use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde::Deserializer;
use tracing::warn;

use super::Operation;
use super::OperationProvider;
use super::apply_initial_state;
use super::emit_literal;
use super::is_enabled;
use crate::StencilError;
use crate::StencilResult;
use crate::evaluator::BooleanExpressionEvaluator;
use crate::evaluator::ConditionEvaluator;
use crate::evaluator::ExpressionEvaluatorConfig;
use crate::state::ProcessorState;
use crate::token::Token;
use crate::token::TokenConfig;
use crate::trie::TokenTrie;

const OPERATION: &str = "conditional";

/// Spellings for each kind of control token. Every kind accepts any number
/// of spellings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConditionalTokens {
	#[serde(default, rename = "if", deserialize_with = "one_or_many")]
	pub if_tokens: Vec<TokenConfig>,
	#[serde(default, rename = "else_if", deserialize_with = "one_or_many")]
	pub else_if_tokens: Vec<TokenConfig>,
	#[serde(default, rename = "else", deserialize_with = "one_or_many")]
	pub else_tokens: Vec<TokenConfig>,
	#[serde(default, rename = "end_if", deserialize_with = "one_or_many")]
	pub end_if_tokens: Vec<TokenConfig>,
	#[serde(default, rename = "actionable_if", deserialize_with = "one_or_many")]
	pub actionable_if_tokens: Vec<TokenConfig>,
	#[serde(default, rename = "actionable_else_if", deserialize_with = "one_or_many")]
	pub actionable_else_if_tokens: Vec<TokenConfig>,
	#[serde(default, rename = "actionable_else", deserialize_with = "one_or_many")]
	pub actionable_else_tokens: Vec<TokenConfig>,
	/// Flags switched on while an actionable branch is live.
	#[serde(default)]
	pub actionable_operations: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
	One(TokenConfig),
	Many(Vec<TokenConfig>),
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<TokenConfig>, D::Error> {
	Ok(match OneOrMany::deserialize(deserializer)? {
		OneOrMany::One(token) => vec![token],
		OneOrMany::Many(tokens) => tokens,
	})
}

impl ConditionalTokens {
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn with_if(mut self, token: impl Into<TokenConfig>) -> Self {
		self.if_tokens.push(token.into());
		self
	}

	#[must_use]
	pub fn with_else_if(mut self, token: impl Into<TokenConfig>) -> Self {
		self.else_if_tokens.push(token.into());
		self
	}

	#[must_use]
	pub fn with_else(mut self, token: impl Into<TokenConfig>) -> Self {
		self.else_tokens.push(token.into());
		self
	}

	#[must_use]
	pub fn with_end_if(mut self, token: impl Into<TokenConfig>) -> Self {
		self.end_if_tokens.push(token.into());
		self
	}

	#[must_use]
	pub fn with_actionable_if(mut self, token: impl Into<TokenConfig>) -> Self {
		self.actionable_if_tokens.push(token.into());
		self
	}

	#[must_use]
	pub fn with_actionable_else_if(mut self, token: impl Into<TokenConfig>) -> Self {
		self.actionable_else_if_tokens.push(token.into());
		self
	}

	#[must_use]
	pub fn with_actionable_else(mut self, token: impl Into<TokenConfig>) -> Self {
		self.actionable_else_tokens.push(token.into());
		self
	}

	#[must_use]
	pub fn with_actionable_operation(mut self, flag: impl Into<String>) -> Self {
		self.actionable_operations.push(flag.into());
		self
	}

	fn by_kind(&self) -> [(TokenKind, &[TokenConfig]); 7] {
		[
			(TokenKind::If, self.if_tokens.as_slice()),
			(TokenKind::ElseIf, self.else_if_tokens.as_slice()),
			(TokenKind::Else, self.else_tokens.as_slice()),
			(TokenKind::EndIf, self.end_if_tokens.as_slice()),
			(TokenKind::ActionableIf, self.actionable_if_tokens.as_slice()),
			(TokenKind::ActionableElseIf, self.actionable_else_if_tokens.as_slice()),
			(TokenKind::ActionableElse, self.actionable_else_tokens.as_slice()),
		]
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
	If,
	ElseIf,
	Else,
	EndIf,
	ActionableIf,
	ActionableElseIf,
	ActionableElse,
}

impl TokenKind {
	fn opens_scope(self) -> bool {
		matches!(self, Self::If | Self::ActionableIf)
	}

	fn is_actionable(self) -> bool {
		matches!(
			self,
			Self::ActionableIf | Self::ActionableElseIf | Self::ActionableElse
		)
	}
}

/// Nested `if` / `elseif` / `else` / `endif` blocks.
///
/// Conditions are read by a [`ConditionEvaluator`] straight from the input.
/// Untaken branches are skipped with a depth-counting scan over the control
/// tokens only, so nothing inside them needs to be well formed.
#[derive(Clone)]
pub struct Conditional {
	tokens: ConditionalTokens,
	evaluator: Arc<dyn ConditionEvaluator>,
	whole_line: bool,
	trim_whitespace: bool,
	id: Option<String>,
	initial_state: Option<bool>,
}

impl std::fmt::Debug for Conditional {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Conditional")
			.field("tokens", &self.tokens)
			.field("whole_line", &self.whole_line)
			.field("trim_whitespace", &self.trim_whitespace)
			.field("id", &self.id)
			.field("initial_state", &self.initial_state)
			.finish_non_exhaustive()
	}
}

impl Conditional {
	pub fn new(tokens: ConditionalTokens, evaluator: impl ConditionEvaluator + 'static) -> Self {
		Self {
			tokens,
			evaluator: Arc::new(evaluator),
			whole_line: false,
			trim_whitespace: false,
			id: None,
			initial_state: None,
		}
	}

	/// Drop the whole line of every control marker.
	#[must_use]
	pub fn with_whole_line(mut self, whole_line: bool) -> Self {
		self.whole_line = whole_line;
		self
	}

	/// Drop whitespace adjacent to control markers.
	#[must_use]
	pub fn with_trim_whitespace(mut self, trim_whitespace: bool) -> Self {
		self.trim_whitespace = trim_whitespace;
		self
	}

	#[must_use]
	pub fn with_id(mut self, id: impl Into<String>) -> Self {
		self.id = Some(id.into());
		self
	}

	#[must_use]
	pub fn with_initial_state(mut self, initial_state: bool) -> Self {
		self.initial_state = Some(initial_state);
		self
	}
}

impl OperationProvider for Conditional {
	fn id(&self) -> Option<&str> {
		self.id.as_deref()
	}

	fn get_operation(&self, state: &mut ProcessorState<'_>) -> StencilResult<Option<Box<dyn Operation>>> {
		if self.tokens.if_tokens.is_empty() && self.tokens.actionable_if_tokens.is_empty() {
			return Err(StencilError::invalid_operation(OPERATION, "at least one `if` token is required"));
		}

		if self.tokens.end_if_tokens.is_empty() {
			return Err(StencilError::invalid_operation(OPERATION, "at least one `end_if` token is required"));
		}

		let mut trie = TokenTrie::new();
		let mut kinds = Vec::new();
		let mut seen: HashMap<Vec<u8>, TokenKind> = HashMap::new();

		for (kind, configs) in self.tokens.by_kind() {
			for config in configs {
				let token = config.to_token(state.encoding())?;

				if let Some(existing) = seen.insert(token.value().to_vec(), kind) {
					if existing != kind {
						return Err(StencilError::invalid_operation(
							OPERATION,
							format!("`{}` is registered as both {existing:?} and {kind:?}", config.value),
						));
					}
				}

				trie.add_token(token);
				kinds.push(kind);
			}
		}

		apply_initial_state(state, self.id.as_deref(), self.initial_state);

		Ok(Some(Box::new(ConditionalOperation {
			id: self.id.clone(),
			trie,
			kinds,
			evaluator: Arc::clone(&self.evaluator),
			actionable_operations: self.tokens.actionable_operations.clone(),
			whole_line: self.whole_line,
			trim_whitespace: self.trim_whitespace,
			current: None,
			pending: Vec::new(),
		})))
	}
}

/// One open `if` scope.
#[derive(Debug, Clone, Copy, Default)]
struct EvaluationState {
	branch_taken: bool,
	actionable_enabled: bool,
}

struct ConditionalOperation {
	id: Option<String>,
	trie: TokenTrie,
	kinds: Vec<TokenKind>,
	evaluator: Arc<dyn ConditionEvaluator>,
	actionable_operations: Vec<String>,
	whole_line: bool,
	trim_whitespace: bool,
	current: Option<EvaluationState>,
	/// Enclosing scopes of `current`, innermost last.
	pending: Vec<EvaluationState>,
}

impl ConditionalOperation {
	fn literal(&self, token: usize) -> String {
		self.trie
			.token(token)
			.map(|token| String::from_utf8_lossy(token.literal()).into_owned())
			.unwrap_or_default()
	}

	fn whitespace(&self, state: &mut ProcessorState<'_>) -> StencilResult<()> {
		state.whitespace_handler(self.whole_line, self.trim_whitespace)
	}

	fn toggle_actionable(&mut self, state: &mut ProcessorState<'_>, enabled: bool) {
		if let Some(current) = self.current.as_mut() {
			current.actionable_enabled = enabled;
		}

		for flag in &self.actionable_operations {
			state.flags_mut().set(flag.as_str(), enabled);
		}
	}

	/// Leave the innermost scope and restore the actionable flags of the
	/// enclosing one.
	fn close_scope(&mut self, state: &mut ProcessorState<'_>) {
		self.current = self.pending.pop();
		let enabled = self
			.current
			.is_some_and(|parent| parent.actionable_enabled);

		for flag in &self.actionable_operations {
			state.flags_mut().set(flag.as_str(), enabled);
		}
	}

	/// Find the next control token belonging to the current scope, treating
	/// nested `if ... endif` blocks as opaque. The cursor ends after the
	/// token. `None` means the input ended first.
	fn next_token_at_same_level(&self, state: &mut ProcessorState<'_>) -> StencilResult<Option<usize>> {
		let mut depth = 0usize;

		loop {
			let Some(found) = state.seek_forward_through(&self.trie)? else {
				return Ok(None);
			};

			match self.kinds[found] {
				kind if kind.opens_scope() => depth += 1,
				TokenKind::EndIf if depth > 0 => depth -= 1,
				_ if depth > 0 => {}
				_ => return Ok(Some(found)),
			}
		}
	}

	/// Skip the rest of a scope whose branch has been taken. The cursor ends
	/// after its `endif`.
	fn skip_to_matching_end_if(&self, state: &mut ProcessorState<'_>) -> StencilResult<bool> {
		loop {
			match self.next_token_at_same_level(state)? {
				Some(found) if self.kinds[found] == TokenKind::EndIf => return Ok(true),
				Some(_) => {}
				None => return Ok(false),
			}
		}
	}
}

impl Operation for ConditionalOperation {
	fn id(&self) -> Option<&str> {
		self.id.as_deref()
	}

	fn tokens(&self) -> &[Token] {
		self.trie.tokens()
	}

	fn handle_match(&mut self, state: &mut ProcessorState<'_>, token: usize) -> StencilResult<usize> {
		if !is_enabled(state, self.id.as_deref()) {
			return emit_literal(state, &self.trie.tokens()[token]);
		}

		let mut token = token;
		let mut kind = self.kinds[token];

		if kind.opens_scope() {
			if let Some(current) = self.current.take() {
				self.pending.push(current);
			}
			self.current = Some(EvaluationState::default());
		}

		loop {
			let Some(current) = self.current else {
				warn!(token = %self.literal(token), "conditional token without an open `if`, emitting it unchanged");
				return emit_literal(state, &self.trie.tokens()[token]);
			};

			match kind {
				TokenKind::EndIf => {
					self.close_scope(state);
					self.whitespace(state)?;
					return Ok(0);
				}
				_ if current.branch_taken => {
					if !self.skip_to_matching_end_if(state)? {
						warn!("conditional block is missing its `endif`, closing it at the end of input");
					}
					self.close_scope(state);
					self.whitespace(state)?;
					return Ok(0);
				}
				TokenKind::Else | TokenKind::ActionableElse => {
					self.take_branch(state, kind);
					self.whitespace(state)?;
					return Ok(0);
				}
				TokenKind::If | TokenKind::ElseIf | TokenKind::ActionableIf | TokenKind::ActionableElseIf => {
					if self.evaluator.evaluate(state)? {
						self.take_branch(state, kind);
						self.whitespace(state)?;
						return Ok(0);
					}

					match self.next_token_at_same_level(state)? {
						Some(next) => {
							token = next;
							kind = self.kinds[next];
						}
						None => {
							warn!("conditional block is missing its `endif`, closing it at the end of input");
							self.close_scope(state);
							return Ok(0);
						}
					}
				}
			}
		}
	}
}

impl ConditionalOperation {
	fn take_branch(&mut self, state: &mut ProcessorState<'_>, kind: TokenKind) {
		if let Some(current) = self.current.as_mut() {
			current.branch_taken = true;
		}

		if kind.is_actionable() {
			self.toggle_actionable(state, true);
		}
	}
}

/// `[[operations]]` form of [`Conditional`] using the built-in expression
/// evaluator.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConditionalConfig {
	#[serde(flatten)]
	pub tokens: ConditionalTokens,
	#[serde(default)]
	pub whole_line: bool,
	#[serde(default)]
	pub trim_whitespace: bool,
	#[serde(default)]
	pub id: Option<String>,
	#[serde(default)]
	pub initial_state: Option<bool>,
	#[serde(default)]
	pub expression: ExpressionEvaluatorConfig,
}

impl ConditionalConfig {
	pub fn to_conditional(&self) -> Conditional {
		let mut conditional = Conditional::new(
			self.tokens.clone(),
			BooleanExpressionEvaluator::from_config(&self.expression),
		)
		.with_whole_line(self.whole_line)
		.with_trim_whitespace(self.trim_whitespace);
		conditional.id = self.id.clone();
		conditional.initial_state = self.initial_state;
		conditional
	}
}
