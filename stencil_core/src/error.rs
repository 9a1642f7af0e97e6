use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum StencilError {
	#[error(transparent)]
	#[diagnostic(code(stencil::io_error))]
	Io(#[from] std::io::Error),

	#[error("invalid token: {0}")]
	#[diagnostic(
		code(stencil::invalid_token),
		help("tokens must contain at least one byte once encoded")
	)]
	InvalidToken(String),

	#[error("invalid `{operation}` operation: {reason}")]
	#[diagnostic(code(stencil::invalid_operation))]
	InvalidOperation { operation: String, reason: String },

	#[error("unsupported encoding: `{0}`")]
	#[diagnostic(
		code(stencil::unsupported_encoding),
		help("supported encodings: utf-8, utf-16le, utf-16be, utf-32le, utf-32be")
	)]
	UnsupportedEncoding(String),

	#[error("content is not valid {encoding}")]
	#[diagnostic(code(stencil::decode))]
	Decode { encoding: String },

	#[error("failed to read include source `{location}`: {source}")]
	#[diagnostic(
		code(stencil::include_source),
		help("include paths are resolved relative to the include root")
	)]
	IncludeSource {
		location: String,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse config file: {0}")]
	#[diagnostic(
		code(stencil::config_parse),
		help("check that stencil.toml is valid TOML and every [[operations]] entry has a `type`")
	)]
	ConfigParse(String),
}

impl StencilError {
	pub(crate) fn invalid_operation(operation: &str, reason: impl Into<String>) -> Self {
		Self::InvalidOperation {
			operation: operation.to_string(),
			reason: reason.into(),
		}
	}
}

pub type StencilResult<T> = Result<T, StencilError>;
pub type AnyError = Box<dyn std::error::Error>;
pub type AnyEmptyResult = Result<(), AnyError>;
pub type AnyResult<T> = Result<T, AnyError>;
