use std::collections::BTreeMap;

use tracing::debug;

use crate::token::Token;

const ROOT: usize = 0;

#[derive(Debug, Clone, Default)]
struct TrieNode {
	children: BTreeMap<u8, usize>,
	terminal: Option<usize>,
}

/// A multi-pattern matcher over byte sequences.
///
/// Tokens are stored in an arena of nodes keyed by byte. Every token gets the
/// id it was registered with, even when an earlier token has the same bytes;
/// in that case the earlier token wins all matches.
#[derive(Debug, Clone)]
pub struct TokenTrie {
	nodes: Vec<TrieNode>,
	tokens: Vec<Token>,
	min_length: usize,
	max_length: usize,
}

impl Default for TokenTrie {
	fn default() -> Self {
		Self::new()
	}
}

impl TokenTrie {
	pub fn new() -> Self {
		Self {
			nodes: vec![TrieNode::default()],
			tokens: Vec::new(),
			min_length: 0,
			max_length: 0,
		}
	}

	pub fn from_tokens(tokens: impl IntoIterator<Item = Token>) -> Self {
		let mut trie = Self::new();
		for token in tokens {
			trie.add_token(token);
		}

		trie
	}

	/// Register a token and return its id.
	pub fn add_token(&mut self, token: Token) -> usize {
		let id = self.tokens.len();
		let mut node = ROOT;

		for &byte in token.value() {
			node = match self.nodes[node].children.get(&byte) {
				Some(&next) => next,
				None => {
					let next = self.nodes.len();
					self.nodes.push(TrieNode::default());
					self.nodes[node].children.insert(byte, next);
					next
				}
			};
		}

		match self.nodes[node].terminal {
			Some(existing) => {
				debug!(id, existing, "duplicate token registered, the earlier id takes precedence");
			}
			None => self.nodes[node].terminal = Some(id),
		}

		let length = token.len();
		self.min_length = if self.tokens.is_empty() {
			length
		} else {
			self.min_length.min(length)
		};
		self.max_length = self.max_length.max(length);
		self.tokens.push(token);

		id
	}

	pub fn len(&self) -> usize {
		self.tokens.len()
	}

	pub fn is_empty(&self) -> bool {
		self.tokens.is_empty()
	}

	/// Length of the shortest registered token, `0` when empty.
	pub fn min_length(&self) -> usize {
		self.min_length
	}

	/// Length of the longest registered token, `0` when empty.
	pub fn max_length(&self) -> usize {
		self.max_length
	}

	pub fn token(&self, id: usize) -> Option<&Token> {
		self.tokens.get(id)
	}

	pub fn tokens(&self) -> &[Token] {
		&self.tokens
	}

	/// The longest token that starts exactly at `position` in `buffer`.
	pub fn match_at(&self, buffer: &[u8], position: usize) -> Option<usize> {
		let mut node = ROOT;
		let mut found = None;

		for byte in buffer.get(position..)? {
			let Some(&next) = self.nodes[node].children.get(byte) else {
				break;
			};

			node = next;
			if let Some(id) = self.nodes[node].terminal {
				found = Some(id);
			}
		}

		found
	}

	/// Match at `position` and move `position` past the matched token.
	pub fn get_operation(&self, buffer: &[u8], position: &mut usize) -> Option<usize> {
		let id = self.match_at(buffer, *position)?;
		*position += self.tokens[id].len();
		Some(id)
	}

	/// The longest token that `buffer` ends with.
	pub fn match_suffix(&self, buffer: &[u8]) -> Option<usize> {
		self.tokens
			.iter()
			.enumerate()
			.filter(|(id, token)| {
				buffer.ends_with(token.value()) && self.match_at(token.value(), 0) == Some(*id)
			})
			.max_by_key(|(_, token)| token.len())
			.map(|(id, _)| id)
	}

	pub fn evaluator(&self) -> TrieEvaluator<'_> {
		TrieEvaluator {
			trie: self,
			active: Vec::new(),
			pending: None,
		}
	}
}

/// A confirmed match reported by [`TrieEvaluator`]. Offsets are absolute
/// stream sequence numbers; `end` is exclusive and covers the token's context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrieMatch {
	pub token: usize,
	pub start: u64,
	pub end: u64,
}

#[derive(Debug, Clone, Copy)]
struct Path {
	start: u64,
	node: usize,
}

/// Incremental matcher fed one byte at a time.
///
/// Matches are leftmost first and then longest. A match is only reported
/// once no token that could still produce an earlier or longer match remains
/// viable, so callers must keep every byte from
/// [`TrieEvaluator::oldest_required_sequence`] onwards when refilling.
#[derive(Debug)]
pub struct TrieEvaluator<'a> {
	trie: &'a TokenTrie,
	active: Vec<Path>,
	pending: Option<TrieMatch>,
}

impl TrieEvaluator<'_> {
	/// Feed the byte at absolute offset `sequence`.
	pub fn accept(&mut self, byte: u8, sequence: u64) -> Option<TrieMatch> {
		if self.trie.is_empty() {
			return None;
		}

		let trie = self.trie;
		let nodes = &trie.nodes;
		let mut pending = self.pending;

		self.active.push(Path {
			start: sequence,
			node: ROOT,
		});
		self.active.retain_mut(|path| {
			let Some(&next) = nodes[path.node].children.get(&byte) else {
				return false;
			};

			path.node = next;
			if let Some(token) = nodes[next].terminal {
				let candidate = TrieMatch {
					token,
					start: path.start,
					end: sequence + 1,
				};
				pending = Some(match pending {
					Some(current) if current.start < candidate.start => current,
					Some(current) if current.start == candidate.start && current.end >= candidate.end => {
						current
					}
					_ => candidate,
				});
			}

			!nodes[next].children.is_empty()
		});
		self.pending = pending;

		let found = self.pending?;
		if self.active.iter().any(|path| path.start <= found.start) {
			return None;
		}

		self.reset();
		Some(found)
	}

	/// Resolve whatever is in flight because no more bytes will arrive.
	pub fn try_finalize(&mut self) -> Option<TrieMatch> {
		self.active.clear();
		self.pending.take()
	}

	/// The earliest absolute offset that a pending or partial match still
	/// depends on.
	pub fn oldest_required_sequence(&self) -> Option<u64> {
		self.active
			.iter()
			.map(|path| path.start)
			.chain(self.pending.map(|found| found.start))
			.min()
	}

	/// How many bytes before `next_sequence` must survive a buffer refill.
	pub fn bytes_to_keep_in_buffer(&self, next_sequence: u64) -> usize {
		self.oldest_required_sequence()
			.map_or(0, |oldest| next_sequence.saturating_sub(oldest) as usize)
	}

	pub fn reset(&mut self) {
		self.active.clear();
		self.pending = None;
	}
}
