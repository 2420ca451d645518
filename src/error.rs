//! The error taxonomy produced by every stage of the lowering pipeline.

use flexstr::SharedStr;
use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

use crate::location::CodeLocation;

/// Every way in which lowering a program tree into an object module can fail.
///
/// This is a taxonomy, not a type hierarchy: each stage of the pipeline (template evaluation,
/// code-block lowering, varying-length resolution, object assembly) raises one of these variants
/// and aborts the current section. Sections are not independently recoverable in this core; a
/// caller that wants partial results on error needs to retry at a higher level.
#[derive(Error, Diagnostic, Debug, Clone, PartialEq)]
pub enum AssemblyError {
	/// Passed through verbatim from the upstream lexer/parser, which is outside this crate's
	/// responsibility. The core never constructs this variant itself.
	#[error("parse error: {message}")]
	#[diagnostic(code(cocasm::parse))]
	ParseError {
		/// The upstream parser's own message.
		message: SharedStr,
	},

	/// A template section contained something other than a label declaration or an allowed
	/// directive, or declared an entry/external label, or redeclared a label.
	#[error("template error: {reason}")]
	#[diagnostic(code(cocasm::template))]
	TemplateError {
		/// Human-readable description of the violation.
		reason:   SharedStr,
		/// Location of the offending line, if the AST line carried one.
		location: CodeLocation,
	},

	/// A label name collided with an existing label/entry/external in the same section, was
	/// declared both `entry` and `external`, or a user label illegally started with `$`.
	#[error("label error: {reason}")]
	#[diagnostic(code(cocasm::label))]
	LabelError {
		/// Human-readable description of the violation.
		reason:   SharedStr,
		/// Location of the offending declaration.
		location: CodeLocation,
	},

	/// `break`/`continue` was used outside any enclosing loop, or a compound condition used a
	/// conjunction other than `"and"`/`"or"`.
	#[error("control flow error: {reason}")]
	#[diagnostic(code(cocasm::control_flow))]
	ControlFlowError {
		/// Human-readable description of the violation.
		reason:   SharedStr,
		/// Location of the offending statement. `CodeLocation::synthetic()` for synthetic lines
		/// such as a bare `break`/`continue` that never carried a source location to begin with.
		location: CodeLocation,
	},

	/// The target rejected a mnemonic/operand combination during instruction or branch encoding.
	#[error("instruction error: {reason}")]
	#[diagnostic(code(cocasm::instruction))]
	InstructionError {
		/// The target's own rejection message.
		reason:   SharedStr,
		/// Location of the rejected instruction.
		location: CodeLocation,
	},

	/// The target's `finish` hook reported left-over state (e.g. an unpaired multi-line
	/// instruction). Attributed to the last line of the enclosing block, per §4.2.
	#[error("unfinished assembly state at end of block: {reason}")]
	#[diagnostic(code(cocasm::finish))]
	FinishError {
		/// The target's own message.
		reason:   SharedStr,
		/// Location of the last line of the block.
		location: CodeLocation,
	},

	/// A varying-length segment referenced an undefined label, or failed to converge within the
	/// bounded number of resolution passes.
	#[error("resolution error: {reason}")]
	#[diagnostic(code(cocasm::resolution))]
	ResolutionError {
		/// Human-readable description.
		reason:   SharedStr,
		/// Location of the segment's originating line, if known.
		location: CodeLocation,
	},

	/// The bounded varying-length fixed-point loop exhausted its iteration cap without segment
	/// sizes settling. See `SPEC_FULL.md` §3/§7 for why this is a distinct, documented case of
	/// `ResolutionError` rather than a silent wrong answer.
	#[error("varying-length segments did not converge after {passes} passes")]
	#[diagnostic(code(cocasm::resolution::not_converged))]
	NotConverged {
		/// Number of passes attempted before giving up.
		passes: usize,
	},
}

impl AssemblyError {
	/// Returns the best-known `SourceSpan` for this error, for `miette` rendering. Synthetic
	/// locations render as a zero-length span at offset zero.
	#[must_use]
	pub fn source_span(&self) -> SourceSpan {
		self.code_location().as_source_span()
	}

	/// Returns the `CodeLocation` attached to this error, if the variant carries one.
	#[must_use]
	pub fn code_location(&self) -> CodeLocation {
		match self {
			Self::TemplateError { location, .. }
			| Self::LabelError { location, .. }
			| Self::ControlFlowError { location, .. }
			| Self::InstructionError { location, .. }
			| Self::FinishError { location, .. }
			| Self::ResolutionError { location, .. } => location.clone(),
			Self::ParseError { .. } | Self::NotConverged { .. } => CodeLocation::synthetic(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn synthetic_errors_have_null_location() {
		let err = AssemblyError::ControlFlowError {
			reason:   "break not allowed outside of a loop".into(),
			location: CodeLocation::synthetic(),
		};
		assert_eq!(err.code_location(), CodeLocation::synthetic());
	}

	#[test]
	fn display_messages_are_human_readable() {
		let err = AssemblyError::LabelError {
			reason:   "cannot be both external and entry".into(),
			location: CodeLocation::synthetic(),
		};
		assert!(err.to_string().contains("cannot be both external and entry"));
	}
}
