use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use serde_json::Value;
use stencil_core::Encoding;

#[derive(Parser)]
#[command(
	author,
	version,
	about = "Stream files through token-driven template operations.",
	long_about = "stencil scans a file for the tokens registered by the operations in \
	              `stencil.toml` and rewrites them on the fly: conditional blocks, regions, \
	              replacements, includes, variable expansion and more.\n\nQuick start:\n  \
	              stencil render template.txt --var name=demo\n  stencil validate    Check that \
	              every configured operation is well formed"
)]
pub struct StencilCli {
	#[command(subcommand)]
	pub command: Option<Commands>,

	/// Directory searched for `stencil.toml`. Defaults to the current
	/// directory.
	#[arg(long, short, global = true)]
	pub path: Option<PathBuf>,

	/// Log what the engine is doing to stderr.
	#[arg(long, short, global = true, default_value_t = false)]
	pub verbose: bool,

	/// Disable colored output.
	#[arg(long, global = true, default_value_t = false)]
	pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
	/// Transform one file.
	///
	/// Operations come from the discovered (or `--config`) configuration
	/// file. Variables and flags given on the command line override the ones
	/// in the configuration.
	Render(RenderArgs),
	/// Realize every configured operation against an empty input.
	///
	/// Reports invalid tokens, ambiguous conditional spellings and other
	/// configuration errors without processing any file.
	Validate {
		/// Configuration file to validate instead of the discovered one.
		#[arg(long, short)]
		config: Option<PathBuf>,
	},
}

#[derive(Args, Debug, Clone)]
pub struct RenderArgs {
	/// The file to transform.
	pub input: PathBuf,

	/// Write the result here instead of stdout.
	#[arg(long, short)]
	pub output: Option<PathBuf>,

	/// Configuration file to use instead of the discovered one.
	#[arg(long, short)]
	pub config: Option<PathBuf>,

	/// Set a variable, `key=value`. Values are read as JSON when possible
	/// (`count=3`, `enabled=true`) and as plain text otherwise.
	#[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_variable)]
	pub variables: Vec<(String, Value)>,

	/// Set a flag, `name=true` or `name=false`.
	#[arg(long = "flag", value_name = "NAME=BOOL", value_parser = parse_flag)]
	pub flags: Vec<(String, bool)>,

	/// Encoding assumed when the input has no byte-order mark.
	#[arg(long, value_parser = parse_encoding)]
	pub encoding: Option<Encoding>,

	/// Print the final variables as JSON to stderr, including offsets
	/// recorded by position trackers.
	#[arg(long, default_value_t = false)]
	pub print_variables: bool,
}

fn split_assignment(raw: &str) -> Result<(&str, &str), String> {
	match raw.split_once('=') {
		Some((key, value)) if !key.trim().is_empty() => Ok((key.trim(), value)),
		_ => Err(format!("expected `key=value`, got `{raw}`")),
	}
}

/// Parse a `--var` argument.
pub fn parse_variable(raw: &str) -> Result<(String, Value), String> {
	let (key, value) = split_assignment(raw)?;
	Ok((key.to_string(), parse_variable_value(value)))
}

/// JSON scalars and arrays are kept typed; anything else is a string.
pub fn parse_variable_value(raw: &str) -> Value {
	serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Parse a `--flag` argument.
pub fn parse_flag(raw: &str) -> Result<(String, bool), String> {
	let (name, value) = split_assignment(raw)?;
	let value = match value.trim().to_ascii_lowercase().as_str() {
		"true" | "on" | "yes" | "1" => true,
		"false" | "off" | "no" | "0" => false,
		other => return Err(format!("expected a boolean for flag `{name}`, got `{other}`")),
	};

	Ok((name.to_string(), value))
}

pub fn parse_encoding(raw: &str) -> Result<Encoding, String> {
	raw.parse::<Encoding>().map_err(|e| e.to_string())
}
