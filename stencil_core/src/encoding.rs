use std::fmt::Display;
use std::str::FromStr;

use serde::Deserialize;

use crate::StencilError;
use crate::StencilResult;
use crate::config::EngineConfig;
use crate::token::TokenConfig;
use crate::trie::TokenTrie;

/// The longest byte-order mark any supported encoding uses.
pub const MAX_PREAMBLE_LENGTH: usize = 4;

/// Text encodings the engine can scan and emit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
pub enum Encoding {
	#[default]
	#[serde(rename = "utf-8", alias = "utf8")]
	Utf8,
	#[serde(rename = "utf-16le", alias = "utf-16", alias = "unicode")]
	Utf16Le,
	#[serde(rename = "utf-16be")]
	Utf16Be,
	#[serde(rename = "utf-32le", alias = "utf-32")]
	Utf32Le,
	#[serde(rename = "utf-32be")]
	Utf32Be,
}

impl Encoding {
	pub fn name(self) -> &'static str {
		match self {
			Self::Utf8 => "utf-8",
			Self::Utf16Le => "utf-16le",
			Self::Utf16Be => "utf-16be",
			Self::Utf32Le => "utf-32le",
			Self::Utf32Be => "utf-32be",
		}
	}

	/// The byte-order mark written at the start of a stream in this encoding.
	pub fn preamble(self) -> &'static [u8] {
		match self {
			Self::Utf8 => &[0xEF, 0xBB, 0xBF],
			Self::Utf16Le => &[0xFF, 0xFE],
			Self::Utf16Be => &[0xFE, 0xFF],
			Self::Utf32Le => &[0xFF, 0xFE, 0x00, 0x00],
			Self::Utf32Be => &[0x00, 0x00, 0xFE, 0xFF],
		}
	}

	/// Sniff a byte-order mark at the start of `bytes`. Returns the encoding and
	/// the length of the mark.
	///
	/// UTF-32LE is checked before UTF-16LE since its mark starts with the
	/// UTF-16LE one.
	pub fn detect(bytes: &[u8]) -> Option<(Self, usize)> {
		[
			Self::Utf32Le,
			Self::Utf32Be,
			Self::Utf8,
			Self::Utf16Le,
			Self::Utf16Be,
		]
		.into_iter()
		.find(|encoding| bytes.starts_with(encoding.preamble()))
		.map(|encoding| (encoding, encoding.preamble().len()))
	}

	pub fn encode(self, text: &str) -> Vec<u8> {
		match self {
			Self::Utf8 => text.as_bytes().to_vec(),
			Self::Utf16Le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
			Self::Utf16Be => text.encode_utf16().flat_map(u16::to_be_bytes).collect(),
			Self::Utf32Le => text.chars().flat_map(|ch| u32::from(ch).to_le_bytes()).collect(),
			Self::Utf32Be => text.chars().flat_map(|ch| u32::from(ch).to_be_bytes()).collect(),
		}
	}

	pub fn decode(self, bytes: &[u8]) -> StencilResult<String> {
		let decoded = match self {
			Self::Utf8 => String::from_utf8(bytes.to_vec()).ok(),
			Self::Utf16Le => decode_utf16(bytes, u16::from_le_bytes),
			Self::Utf16Be => decode_utf16(bytes, u16::from_be_bytes),
			Self::Utf32Le => decode_utf32(bytes, u32::from_le_bytes),
			Self::Utf32Be => decode_utf32(bytes, u32::from_be_bytes),
		};

		decoded.ok_or_else(|| {
			StencilError::Decode {
				encoding: self.name().to_string(),
			}
		})
	}
}

fn decode_utf16(bytes: &[u8], read: fn([u8; 2]) -> u16) -> Option<String> {
	if bytes.len() % 2 != 0 {
		return None;
	}

	let units = bytes.chunks_exact(2).map(|pair| read([pair[0], pair[1]]));
	char::decode_utf16(units)
		.collect::<Result<String, _>>()
		.ok()
}

fn decode_utf32(bytes: &[u8], read: fn([u8; 4]) -> u32) -> Option<String> {
	if bytes.len() % 4 != 0 {
		return None;
	}

	bytes
		.chunks_exact(4)
		.map(|quad| char::from_u32(read([quad[0], quad[1], quad[2], quad[3]])))
		.collect()
}

impl Display for Encoding {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.name())
	}
}

impl FromStr for Encoding {
	type Err = StencilError;

	fn from_str(value: &str) -> Result<Self, Self::Err> {
		let normalized = value.trim().to_ascii_lowercase().replace('_', "-");
		match normalized.as_str() {
			"utf-8" | "utf8" => Ok(Self::Utf8),
			"utf-16" | "utf-16le" | "utf16" | "utf16le" | "unicode" => Ok(Self::Utf16Le),
			"utf-16be" | "utf16be" | "bigendianunicode" => Ok(Self::Utf16Be),
			"utf-32" | "utf-32le" | "utf32" | "utf32le" => Ok(Self::Utf32Le),
			"utf-32be" | "utf32be" => Ok(Self::Utf32Be),
			_ => Err(StencilError::UnsupportedEncoding(value.to_string())),
		}
	}
}

/// The whitespace and line-ending token sets of one run, encoded for the
/// stream being processed.
#[derive(Debug, Clone)]
pub struct EncodingConfig {
	pub encoding: Encoding,
	pub whitespace: TokenTrie,
	pub line_endings: TokenTrie,
}

impl EncodingConfig {
	pub fn new(config: &EngineConfig, encoding: Encoding) -> StencilResult<Self> {
		let mut whitespace = TokenTrie::new();
		let mut line_endings = TokenTrie::new();

		for value in &config.whitespaces {
			whitespace.add_token(TokenConfig::literal(value.as_str()).to_token(encoding)?);
		}

		for value in &config.line_endings {
			line_endings.add_token(TokenConfig::literal(value.as_str()).to_token(encoding)?);
		}

		Ok(Self {
			encoding,
			whitespace,
			line_endings,
		})
	}
}
