//! The `cocasm` command-line front-end (`SPEC_FULL.md` §4.11): reads a JSON-encoded
//! [`cocasm::ast::ProgramTree`] and lowers it with the crate's own toy [`cocasm::demo::DemoTarget`],
//! printing the resulting object module as JSON. Real downstream users are expected to link against
//! the library directly with their own `TargetInstructions` implementation; this binary exists to
//! give the crate something runnable, and to exercise the library from outside its own test suite.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use cocasm::ast::ProgramTree;
use cocasm::demo::DemoTarget;
use miette::IntoDiagnostic;

/// Lowers a structured-assembly program tree into a relocatable object module.
#[derive(Parser, Debug)]
#[command(name = "cocasm", version, about)]
struct Args {
	/// Path to a JSON-encoded program tree. Reads from standard input if omitted.
	input:  Option<PathBuf>,
	/// Pretty-prints the output JSON instead of emitting it compactly.
	#[arg(long)]
	pretty: bool,
}

fn main() -> miette::Result<()> {
	human_panic::setup_panic!();
	env_logger::init();
	let args = Args::parse();

	let source = match &args.input {
		Some(path) => fs::read_to_string(path).into_diagnostic()?,
		None => std::io::read_to_string(std::io::stdin()).into_diagnostic()?,
	};
	log::debug!("read {} bytes of program tree JSON", source.len());

	let program: ProgramTree = serde_json::from_str(&source).into_diagnostic()?;
	let target = DemoTarget::new();
	let module = cocasm::assemble(&program, &target)?;

	let rendered =
		if args.pretty { serde_json::to_string_pretty(&module).into_diagnostic()? } else { serde_json::to_string(&module).into_diagnostic()? };
	println!("{rendered}");
	Ok(())
}
