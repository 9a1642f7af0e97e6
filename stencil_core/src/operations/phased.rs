use std::collections::HashMap;

use serde::Deserialize;

use super::Operation;
use super::OperationProvider;
use super::apply_initial_state;
use super::emit_literal;
use super::is_enabled;
use crate::StencilError;
use crate::StencilResult;
use crate::state::ProcessorState;
use crate::token::Token;
use crate::token::TokenConfig;

const OPERATION: &str = "phased";

/// One step of a [`PhasedOperation`]. Reaching it writes `replacement`
/// (or the matched token when there is none) and narrows the expected tokens
/// to `next`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Phase {
	#[serde(rename = "match")]
	pub pattern: TokenConfig,
	#[serde(default)]
	pub replacement: Option<String>,
	#[serde(default)]
	pub next: Vec<Phase>,
	/// Tokens that abandon the sequence while this phase is current.
	#[serde(default)]
	pub resets_with: Vec<TokenConfig>,
}

impl Phase {
	pub fn new(pattern: impl Into<TokenConfig>) -> Self {
		Self {
			pattern: pattern.into(),
			replacement: None,
			next: Vec::new(),
			resets_with: Vec::new(),
		}
	}

	#[must_use]
	pub fn with_replacement(mut self, replacement: impl Into<String>) -> Self {
		self.replacement = Some(replacement.into());
		self
	}

	#[must_use]
	pub fn with_next(mut self, phase: Phase) -> Self {
		self.next.push(phase);
		self
	}

	#[must_use]
	pub fn with_reset(mut self, token: impl Into<TokenConfig>) -> Self {
		self.resets_with.push(token.into());
		self
	}
}

/// Rewrites tokens that appear in a fixed order. Any token outside the
/// expected set resets the sequence.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PhasedOperation {
	pub phases: Vec<Phase>,
	#[serde(default)]
	pub id: Option<String>,
	#[serde(default)]
	pub initial_state: Option<bool>,
}

impl PhasedOperation {
	pub fn new(phases: impl IntoIterator<Item = Phase>) -> Self {
		Self {
			phases: phases.into_iter().collect(),
			id: None,
			initial_state: None,
		}
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

#[derive(Debug)]
struct PhaseNode {
	token: usize,
	replacement: Option<Vec<u8>>,
	next: Vec<usize>,
	resets_with: Vec<usize>,
}

/// Flattens the phase tree into an arena, sharing one token id per distinct
/// token.
#[derive(Default)]
struct PhaseArena {
	tokens: Vec<Token>,
	ids: HashMap<Token, usize>,
	nodes: Vec<PhaseNode>,
	entry_points: Vec<usize>,
}

impl PhaseArena {
	fn token_id(&mut self, token: Token) -> usize {
		if let Some(&id) = self.ids.get(&token) {
			return id;
		}

		let id = self.tokens.len();
		self.ids.insert(token.clone(), id);
		self.tokens.push(token);
		id
	}
}

impl OperationProvider for PhasedOperation {
	fn id(&self) -> Option<&str> {
		self.id.as_deref()
	}

	fn get_operation(&self, state: &mut ProcessorState<'_>) -> StencilResult<Option<Box<dyn Operation>>> {
		if self.phases.is_empty() {
			return Err(StencilError::invalid_operation(OPERATION, "no phases configured"));
		}

		let encoding = state.encoding();
		let mut arena = PhaseArena::default();
		let mut pending: Vec<(Option<usize>, &Phase)> = self.phases.iter().rev().map(|phase| (None, phase)).collect();

		while let Some((parent, phase)) = pending.pop() {
			let token = arena.token_id(phase.pattern.to_token(encoding)?);
			let mut resets_with = Vec::with_capacity(phase.resets_with.len());
			for reset in &phase.resets_with {
				resets_with.push(arena.token_id(reset.to_token(encoding)?));
			}

			let node = arena.nodes.len();
			arena.nodes.push(PhaseNode {
				token,
				replacement: phase.replacement.as_deref().map(|text| encoding.encode(text)),
				next: Vec::new(),
				resets_with,
			});

			match parent {
				Some(parent) => arena.nodes[parent].next.push(node),
				None => arena.entry_points.push(node),
			}

			pending.extend(phase.next.iter().rev().map(|child| (Some(node), child)));
		}

		apply_initial_state(state, self.id.as_deref(), self.initial_state);

		Ok(Some(Box::new(PhasedRun {
			id: self.id.clone(),
			tokens: arena.tokens,
			nodes: arena.nodes,
			entry_points: arena.entry_points,
			current: None,
		})))
	}
}

struct PhasedRun {
	id: Option<String>,
	tokens: Vec<Token>,
	nodes: Vec<PhaseNode>,
	entry_points: Vec<usize>,
	current: Option<usize>,
}

impl PhasedRun {
	fn find(&self, candidates: &[usize], token: usize) -> Option<usize> {
		candidates
			.iter()
			.copied()
			.find(|&node| self.nodes[node].token == token)
	}

	fn enter(&mut self, state: &mut ProcessorState<'_>, node: usize) -> StencilResult<usize> {
		let phase = &self.nodes[node];
		match &phase.replacement {
			Some(replacement) => state.write(replacement)?,
			None => state.write(self.tokens[phase.token].literal())?,
		}

		self.current = if phase.next.is_empty() { None } else { Some(node) };
		Ok(0)
	}
}

impl Operation for PhasedRun {
	fn id(&self) -> Option<&str> {
		self.id.as_deref()
	}

	fn tokens(&self) -> &[Token] {
		&self.tokens
	}

	fn handle_match(&mut self, state: &mut ProcessorState<'_>, token: usize) -> StencilResult<usize> {
		if !is_enabled(state, self.id.as_deref()) {
			return emit_literal(state, &self.tokens[token]);
		}

		if let Some(current) = self.current {
			if self.nodes[current].resets_with.contains(&token) {
				self.current = None;
				return emit_literal(state, &self.tokens[token]);
			}

			if let Some(next) = self.find(&self.nodes[current].next, token) {
				return self.enter(state, next);
			}

			self.current = None;
		}

		match self.find(&self.entry_points, token) {
			Some(entry) => self.enter(state, entry),
			None => emit_literal(state, &self.tokens[token]),
		}
	}
}
