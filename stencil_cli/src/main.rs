use std::fs::File;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use owo_colors::OwoColorize;
use stencil_cli::Commands;
use stencil_cli::RenderArgs;
use stencil_cli::StencilCli;
use stencil_core::AnyEmptyResult;
use stencil_core::AnyResult;
use stencil_core::StencilConfig;
use stencil_core::StencilError;
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn main() {
	let args = StencilCli::parse();

	// Respect NO_COLOR env var and --no-color flag.
	let use_color = !args.no_color && std::env::var_os("NO_COLOR").is_none();
	init_tracing(args.verbose, use_color);

	miette::set_hook(Box::new(move |_| {
		Box::new(
			miette::MietteHandlerOpts::new()
				.color(use_color)
				.unicode(use_color)
				.build(),
		)
	}))
	.ok();

	let result = match &args.command {
		Some(Commands::Render(render)) => run_render(&args, render),
		Some(Commands::Validate { config }) => run_validate(&args, config.as_deref()),
		None => {
			eprintln!("No subcommand specified. Run `stencil --help` for usage.");
			process::exit(1);
		}
	};

	if let Err(e) = result {
		match e.downcast::<StencilError>() {
			Ok(stencil_err) => {
				let report: miette::Report = (*stencil_err).into();
				eprintln!("{report:?}");
			}
			Err(e) => {
				if use_color {
					eprintln!("{} {e}", "error:".red());
				} else {
					eprintln!("error: {e}");
				}
			}
		}
		process::exit(2);
	}
}

fn init_tracing(verbose: bool, use_color: bool) {
	let default_level = if verbose { "debug" } else { "warn" };
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_ansi(use_color)
		.with_target(false)
		.init();
}

fn resolve_root(args: &StencilCli) -> PathBuf {
	args.path
		.clone()
		.unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

/// The configuration plus the directory include paths resolve against.
fn load_config(root: &Path, explicit: Option<&Path>) -> AnyResult<(StencilConfig, PathBuf, Option<PathBuf>)> {
	let path = match explicit {
		Some(path) => Some(path.to_path_buf()),
		None => StencilConfig::resolve_path(root),
	};

	let Some(path) = path else {
		return Ok((StencilConfig::default(), root.to_path_buf(), None));
	};

	let config = StencilConfig::from_file(&path)?;
	let include_root = path
		.parent()
		.filter(|parent| !parent.as_os_str().is_empty())
		.map_or_else(|| root.to_path_buf(), Path::to_path_buf);
	debug!(path = %path.display(), operations = config.operations.len(), "loaded configuration");

	Ok((config, include_root, Some(path)))
}

fn run_render(args: &StencilCli, render: &RenderArgs) -> AnyEmptyResult {
	let root = resolve_root(args);
	let (mut config, include_root, _) = load_config(&root, render.config.as_deref())?;

	for (key, value) in &render.variables {
		config.variables.set(key.as_str(), value.clone());
	}

	for (name, value) in &render.flags {
		config.flags.set(name.as_str(), *value);
	}

	if let Some(encoding) = render.encoding {
		config.encoding = encoding;
	}

	let processor = config.processor(&include_root);
	let input = BufReader::new(File::open(&render.input)?);

	let outcome = match &render.output {
		Some(path) => {
			let mut writer = BufWriter::new(File::create(path)?);
			let outcome = processor.run(input, &mut writer)?;
			writer.flush()?;
			outcome
		}
		None => processor.run(input, std::io::stdout().lock())?,
	};

	debug!(
		encoding = %outcome.encoding,
		bytes = outcome.bytes_written,
		"render finished"
	);

	if render.print_variables {
		eprintln!("{}", serde_json::to_string_pretty(&outcome.variables)?);
	}

	Ok(())
}

fn run_validate(args: &StencilCli, explicit: Option<&Path>) -> AnyEmptyResult {
	let root = resolve_root(args);
	let (config, include_root, path) = load_config(&root, explicit)?;

	let Some(path) = path else {
		println!("No configuration file found in {}.", root.display());
		return Ok(());
	};

	config.processor(&include_root).process_bytes(b"")?;
	println!(
		"{} is valid ({} operations).",
		path.display(),
		config.operations.len()
	);

	Ok(())
}
