use std::io::ErrorKind;
use std::io::Read;
use std::io::Write;
use std::sync::Arc;

use memchr::memmem;
use tracing::debug;

use crate::Encoding;
use crate::EncodingConfig;
use crate::StencilResult;
use crate::config::EngineConfig;
use crate::config::FlagTable;
use crate::encoding::MAX_PREAMBLE_LENGTH;
use crate::trie::TokenTrie;
use crate::trie::TrieMatch;
use crate::variables::VariableCollection;

/// Initial size of the input window.
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Bytes of written output that stay retractable by backward seeks.
pub const OUTPUT_TAIL_LENGTH: usize = 4 * 1024;

/// Output stream that holds back a bounded tail so that whitespace written
/// before a control marker can still be removed.
pub(crate) struct OutputSink<'a> {
	inner: Box<dyn Write + 'a>,
	tail: Vec<u8>,
	flushed: u64,
}

impl<'a> OutputSink<'a> {
	fn new(inner: Box<dyn Write + 'a>) -> Self {
		Self {
			inner,
			tail: Vec::new(),
			flushed: 0,
		}
	}

	fn write(&mut self, bytes: &[u8]) -> StencilResult<()> {
		self.tail.extend_from_slice(bytes);

		if self.tail.len() > 2 * OUTPUT_TAIL_LENGTH {
			let drain = self.tail.len() - OUTPUT_TAIL_LENGTH;
			self.inner.write_all(&self.tail[..drain])?;
			self.tail.drain(..drain);
			self.flushed += drain as u64;
		}

		Ok(())
	}

	fn position(&self) -> u64 {
		self.flushed + self.tail.len() as u64
	}

	fn tail(&self) -> &[u8] {
		&self.tail
	}

	/// Whether the retained tail starts at the beginning of the output.
	fn holds_everything(&self) -> bool {
		self.flushed == 0
	}

	fn truncate_back(&mut self, count: usize) {
		let keep = self.tail.len().saturating_sub(count);
		self.tail.truncate(keep);
	}

	fn finish(&mut self) -> StencilResult<u64> {
		self.inner.write_all(&self.tail)?;
		self.flushed += self.tail.len() as u64;
		self.tail.clear();
		self.inner.flush()?;

		Ok(self.flushed)
	}
}

/// Per-run state handed to every operation.
///
/// The input is held in a window (`buffer[..length]`) whose first byte sits at
/// absolute stream offset `sequence`. Operations move `position` through the
/// window and call the seek primitives, which refill the window as needed.
pub struct ProcessorState<'a> {
	config: EngineConfig,
	encoding_config: Arc<EncodingConfig>,
	source: Box<dyn Read + 'a>,
	target: OutputSink<'a>,
	buffer: Vec<u8>,
	length: usize,
	position: usize,
	sequence: u64,
	exhausted: bool,
}

impl<'a> ProcessorState<'a> {
	/// Prime the window, sniff a byte-order mark and copy it to the target.
	pub fn new(
		source: impl Read + 'a,
		target: impl Write + 'a,
		config: EngineConfig,
		buffer_size: usize,
	) -> StencilResult<Self> {
		let mut state = Self {
			encoding_config: Arc::new(EncodingConfig::new(&config, config.encoding)?),
			config,
			source: Box::new(source),
			target: OutputSink::new(Box::new(target)),
			buffer: vec![0; buffer_size.max(MAX_PREAMBLE_LENGTH)],
			length: 0,
			position: 0,
			sequence: 0,
			exhausted: false,
		};

		while state.length < MAX_PREAMBLE_LENGTH {
			if !state.advance_buffer(0)? {
				break;
			}
		}

		if let Some((encoding, preamble)) = Encoding::detect(&state.buffer[..state.length]) {
			debug!(%encoding, "byte-order mark detected");
			if encoding != state.encoding_config.encoding {
				state.encoding_config = Arc::new(EncodingConfig::new(&state.config, encoding)?);
			}

			state.target.write(&state.buffer[..preamble])?;
			state.position = preamble;
		}

		Ok(state)
	}

	pub fn config(&self) -> &EngineConfig {
		&self.config
	}

	pub fn flags(&self) -> &FlagTable {
		&self.config.flags
	}

	pub fn flags_mut(&mut self) -> &mut FlagTable {
		&mut self.config.flags
	}

	pub fn variables(&self) -> &VariableCollection {
		&self.config.variables
	}

	pub fn variables_mut(&mut self) -> &mut VariableCollection {
		&mut self.config.variables
	}

	/// The encoding of the stream, after byte-order mark detection.
	pub fn encoding(&self) -> Encoding {
		self.encoding_config.encoding
	}

	pub fn encoding_config(&self) -> Arc<EncodingConfig> {
		Arc::clone(&self.encoding_config)
	}

	pub fn buffer(&self) -> &[u8] {
		&self.buffer[..self.length]
	}

	pub fn position(&self) -> usize {
		self.position
	}

	pub fn set_position(&mut self, position: usize) {
		self.position = position.min(self.length);
	}

	pub fn length(&self) -> usize {
		self.length
	}

	/// Absolute stream offset of `buffer()[0]`.
	pub fn sequence_number(&self) -> u64 {
		self.sequence
	}

	/// Absolute stream offset of the cursor.
	pub fn absolute_position(&self) -> u64 {
		self.sequence + self.position as u64
	}

	pub(crate) fn set_absolute_position(&mut self, position: u64) {
		self.set_position(position.saturating_sub(self.sequence) as usize);
	}

	/// Number of bytes written to the output so far.
	pub fn output_position(&self) -> u64 {
		self.target.position()
	}

	pub fn write(&mut self, bytes: &[u8]) -> StencilResult<()> {
		self.target.write(bytes)
	}

	/// Refill the window, keeping `buffer[keep_from..length]` at the front.
	/// The window doubles when the kept bytes already fill it. Returns `false`
	/// once the source is exhausted.
	pub fn advance_buffer(&mut self, keep_from: usize) -> StencilResult<bool> {
		if self.exhausted {
			return Ok(false);
		}

		let keep_from = keep_from.min(self.length);
		self.buffer.copy_within(keep_from..self.length, 0);
		self.length -= keep_from;
		self.position = self.position.saturating_sub(keep_from);
		self.sequence += keep_from as u64;

		if self.length == self.buffer.len() {
			let grown = self.buffer.len() * 2;
			self.buffer.resize(grown, 0);
		}

		loop {
			match self.source.read(&mut self.buffer[self.length..]) {
				Ok(0) => {
					self.exhausted = true;
					return Ok(false);
				}
				Ok(read) => {
					self.length += read;
					return Ok(true);
				}
				Err(e) if e.kind() == ErrorKind::Interrupted => {}
				Err(e) => return Err(e.into()),
			}
		}
	}

	/// Make sure at least `count` bytes are readable from the cursor. Returns
	/// `false` when the source ends first.
	pub fn ensure_available(&mut self, count: usize) -> StencilResult<bool> {
		while self.length - self.position < count {
			if !self.advance_buffer(self.position)? {
				return Ok(false);
			}
		}

		Ok(true)
	}

	/// Move the cursor forward by `count` bytes, refilling as needed.
	pub fn advance_cursor(&mut self, mut count: usize) -> StencilResult<()> {
		while count > 0 {
			let available = self.length - self.position;
			if available == 0 {
				if !self.advance_buffer(self.position)? {
					break;
				}
				continue;
			}

			let step = available.min(count);
			self.position += step;
			count -= step;
		}

		Ok(())
	}

	/// Scan forward from the cursor for the next token of `trie`, dropping the
	/// bytes skipped over. The cursor ends up past the last byte fed to the
	/// evaluator; callers reposition it from the returned match.
	fn scan_forward(
		&mut self,
		trie: &TokenTrie,
		mut collected: Option<&mut Vec<u8>>,
	) -> StencilResult<Option<TrieMatch>> {
		let mut evaluator = trie.evaluator();

		loop {
			if self.position >= self.length {
				let keep = evaluator
					.oldest_required_sequence()
					.unwrap_or_else(|| self.absolute_position());
				let keep_from = keep.saturating_sub(self.sequence) as usize;

				if !self.advance_buffer(keep_from)? {
					return Ok(evaluator.try_finalize());
				}

				continue;
			}

			let sequence = self.absolute_position();
			let byte = self.buffer[self.position];
			self.position += 1;

			if let Some(bytes) = collected.as_deref_mut() {
				bytes.push(byte);
			}

			if let Some(found) = evaluator.accept(byte, sequence) {
				return Ok(Some(found));
			}
		}
	}

	/// Absolute offsets of the literal part of a match.
	fn literal_bounds(trie: &TokenTrie, found: TrieMatch) -> (u64, u64) {
		trie.token(found.token).map_or((found.start, found.end), |token| {
			(
				found.start + token.start() as u64,
				found.start + token.end() as u64,
			)
		})
	}

	/// Move the cursor to just before the next token of `trie`. At the end of
	/// input the cursor rests at the end and `None` is returned.
	pub fn seek_forward_until(&mut self, trie: &TokenTrie) -> StencilResult<Option<usize>> {
		let Some(found) = self.scan_forward(trie, None)? else {
			return Ok(None);
		};

		let (start, _) = Self::literal_bounds(trie, found);
		self.set_absolute_position(start);
		Ok(Some(found.token))
	}

	/// Move the cursor to just after the next token of `trie`.
	pub fn seek_forward_through(&mut self, trie: &TokenTrie) -> StencilResult<Option<usize>> {
		let Some(found) = self.scan_forward(trie, None)? else {
			return Ok(None);
		};

		let (_, end) = Self::literal_bounds(trie, found);
		self.set_absolute_position(end);
		Ok(Some(found.token))
	}

	/// Skip consecutive tokens of `trie` starting at the cursor.
	pub fn seek_forward_while(&mut self, trie: &TokenTrie) -> StencilResult<usize> {
		let mut skipped = 0;

		loop {
			self.ensure_available(trie.max_length())?;
			let mut position = self.position;
			if trie.get_operation(&self.buffer[..self.length], &mut position).is_none() {
				break;
			}

			skipped += position - self.position;
			self.position = position;
		}

		Ok(skipped)
	}

	/// Skip forward past the first occurrence of `needle`, comparing raw bytes
	/// without a trie. Returns `false` and rests at the end of input when the
	/// needle never appears.
	pub fn seek_forward_past(&mut self, needle: &[u8]) -> StencilResult<bool> {
		if needle.is_empty() {
			return Ok(true);
		}

		loop {
			if let Some(index) = memmem::find(&self.buffer[self.position..self.length], needle) {
				self.position += index + needle.len();
				return Ok(true);
			}

			let keep_from = self
				.length
				.saturating_sub(needle.len() - 1)
				.max(self.position);
			if !self.advance_buffer(keep_from)? {
				self.position = self.length;
				return Ok(false);
			}
		}
	}

	/// Collect raw bytes from the cursor up to the next token of `trie`. The
	/// cursor ends after the token when `consume` is set, before it
	/// otherwise. Without a token the rest of the input is returned.
	pub fn read_until(
		&mut self,
		trie: &TokenTrie,
		consume: bool,
	) -> StencilResult<(Vec<u8>, Option<usize>)> {
		let origin = self.absolute_position();
		let mut bytes = Vec::new();
		let Some(found) = self.scan_forward(trie, Some(&mut bytes))? else {
			return Ok((bytes, None));
		};

		let (start, end) = Self::literal_bounds(trie, found);
		bytes.truncate(start.saturating_sub(origin) as usize);
		self.set_absolute_position(if consume { end } else { start });

		Ok((bytes, Some(found.token)))
	}

	/// Retract trailing output made only of tokens from `trie`. Returns the
	/// number of bytes removed.
	pub fn seek_back_while(&mut self, trie: &TokenTrie) -> usize {
		let mut end = self.target.tail().len();

		while let Some(id) = trie.match_suffix(&self.target.tail()[..end]) {
			end -= trie.token(id).map_or(end, |token| token.len());
		}

		let removed = self.target.tail().len() - end;
		self.target.truncate_back(removed);
		removed
	}

	/// Retract output back to the most recent token of `trie`, removing the
	/// token too when `consume` is set. When the retained output holds no such
	/// token the output start counts as the boundary, provided nothing has been
	/// flushed yet.
	pub fn seek_back_until(&mut self, trie: &TokenTrie, consume: bool) -> bool {
		let tail = self.target.tail();
		let found = (0..=tail.len())
			.rev()
			.find_map(|end| trie.match_suffix(&tail[..end]).map(|id| (end, id)));

		let keep = match found {
			Some((end, id)) => {
				if consume {
					end - trie.token(id).map_or(0, |token| token.len())
				} else {
					end
				}
			}
			None if self.target.holds_everything() => 0,
			None => {
				debug!("no boundary within the retained output");
				return false;
			}
		};

		let removed = self.target.tail().len() - keep;
		self.target.truncate_back(removed);
		found.is_some()
	}

	/// Drop the line the cursor sits on: retracted output back to the previous
	/// line ending and input through the next one.
	pub fn consume_whole_line(&mut self) -> StencilResult<()> {
		let encoding_config = self.encoding_config();
		self.seek_back_until(&encoding_config.line_endings, false);
		self.seek_forward_through(&encoding_config.line_endings)?;

		Ok(())
	}

	/// Remove whitespace before the cursor from the output and whitespace plus
	/// one line ending after it from the input.
	pub fn trim_whitespace(&mut self, forward: bool, backward: bool) -> StencilResult<()> {
		let encoding_config = self.encoding_config();

		if backward {
			self.seek_back_while(&encoding_config.whitespace);
		}

		if forward {
			self.seek_forward_while(&encoding_config.whitespace)?;
			self.ensure_available(encoding_config.line_endings.max_length())?;
			let mut position = self.position;
			if encoding_config
				.line_endings
				.get_operation(&self.buffer[..self.length], &mut position)
				.is_some()
			{
				self.position = position;
			}
		}

		Ok(())
	}

	/// Apply a whitespace policy around a control marker the cursor has just
	/// passed. `whole_line` takes precedence over `trim`.
	pub fn whitespace_handler(&mut self, whole_line: bool, trim: bool) -> StencilResult<()> {
		if whole_line {
			self.consume_whole_line()
		} else if trim {
			self.trim_whitespace(true, true)
		} else {
			Ok(())
		}
	}

	/// Copy input between two absolute offsets to the output.
	pub(crate) fn flush_range(&mut self, from: u64, to: u64) -> StencilResult<()> {
		if to <= from {
			return Ok(());
		}

		let start = from.saturating_sub(self.sequence) as usize;
		let end = (to.saturating_sub(self.sequence) as usize).min(self.length);
		if start < end {
			self.target.write(&self.buffer[start..end])?;
		}

		Ok(())
	}

	/// Write out everything still held back and hand back the final config.
	pub(crate) fn finish(mut self) -> StencilResult<(EngineConfig, Encoding, u64)> {
		let written = self.target.finish()?;
		let encoding = self.encoding();

		Ok((self.config, encoding, written))
	}
}
