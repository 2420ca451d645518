//! The AST model consumed by the lowering pipeline (`spec.md` §3.1).
//!
//! This is the input contract: an external lexer/parser produces these types (or, for the CLI
//! front-end, they are read straight from JSON), and nothing in this module performs any lowering
//! itself.

use flexstr::SharedStr;
use serde::{Deserialize, Serialize};

use crate::location::CodeLocation;

/// An ordered collection of the three section kinds a program tree can contain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgramTree {
	/// Sections bound to a fixed load address, in source order (not yet address-sorted).
	pub absolute_sections:   Vec<AbsoluteSection>,
	/// Sections whose base address is assigned at link time.
	pub relocatable_sections: Vec<RelocatableSection>,
	/// Record-layout definitions that emit no bytes of their own.
	pub template_sections:   Vec<TemplateSection>,
}

/// A section bound to a fixed load address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbsoluteSection {
	/// The fixed load address.
	pub address: i64,
	/// The section's structured lines, in source order.
	pub lines:   Vec<Line>,
}

/// A section whose base address will be assigned at link time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelocatableSection {
	/// The section's link-time name.
	pub name:  SharedStr,
	/// The section's structured lines, in source order.
	pub lines: Vec<Line>,
}

/// A record-layout definition. Contributes only field offsets; the template evaluator (§4.1)
/// never emits bytes for one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSection {
	/// The template's name, as referenced by template-field expressions elsewhere.
	pub name:  SharedStr,
	/// The template's lines: only label declarations and directive instructions are legal here.
	pub lines: Vec<Line>,
}

/// One line of a section or nested block, per `spec.md` §3.1.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Line {
	/// A label declaration, optionally marked `entry` and/or `external`.
	LabelDecl {
		/// The label's name.
		name:     SharedStr,
		/// Whether this label is exported to the linker as an entry point.
		entry:    bool,
		/// Whether this label refers to a symbol defined elsewhere.
		external: bool,
	},
	/// A single target instruction or directive.
	Instruction {
		/// The mnemonic, looked up in the target's instruction/directive tables.
		mnemonic: SharedStr,
		/// The raw, target-interpreted argument list.
		args:     Vec<SharedStr>,
		/// Source location, if the parser provided one.
		location: Option<CodeLocation>,
	},
	/// An `if`/`elif`/`else` construct.
	Conditional {
		/// The compound condition; the last entry's `conjunction` is always `None`.
		conditions: Vec<Condition>,
		/// Lines to lower when the condition is true.
		then_lines: Vec<Line>,
		/// Lines to lower when the condition is false; empty means no `else` clause.
		else_lines: Vec<Line>,
	},
	/// A pre-condition loop: the condition is (re-)evaluated before every iteration.
	WhileLoop {
		/// Lines that compute the loop condition, evaluated before every iteration.
		condition_lines: Vec<Line>,
		/// The branch mnemonic that decides whether to keep looping.
		branch_mnemonic: SharedStr,
		/// The loop body.
		body:            Vec<Line>,
		/// Location of the branch mnemonic, for error attribution.
		location:        Option<CodeLocation>,
	},
	/// A post-condition loop: the body runs at least once before the condition is checked.
	UntilLoop {
		/// The loop body, run before the condition is ever checked.
		body:            Vec<Line>,
		/// The branch mnemonic that decides whether to loop again.
		branch_mnemonic: SharedStr,
		/// Location of the branch mnemonic, for error attribution.
		location:        Option<CodeLocation>,
	},
	/// Wraps a body in a target-defined register save/restore pair.
	SaveRestore {
		/// The register saved on entry.
		saved_reg:    SharedStr,
		/// The wrapped body.
		body:         Vec<Line>,
		/// The register restored on exit; defaults to `saved_reg` when absent.
		restored_reg: Option<SharedStr>,
	},
	/// Exits the nearest enclosing loop.
	Break,
	/// Jumps to the next iteration check of the nearest enclosing loop.
	Continue,
}

impl Line {
	/// The source location attached to this line, if any. Only `Instruction` lines carry one in
	/// this AST; structured constructs carry locations on their constituent parts instead (e.g.
	/// `Condition::branch_location`).
	#[must_use]
	pub fn location(&self) -> Option<&CodeLocation> {
		match self {
			Self::Instruction { location, .. } => location.as_ref(),
			_ => None,
		}
	}
}

/// One condition of a (possibly compound) `Conditional`, per `spec.md` §3.1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
	/// Lines that compute this condition's expression.
	pub lines:           Vec<Line>,
	/// The branch mnemonic testing the computed condition.
	pub branch_mnemonic: SharedStr,
	/// How this condition combines with the next one. The last condition of a compound always
	/// has `None` here.
	pub conjunction:     Option<Conjunction>,
	/// Location of the branch mnemonic itself, used to attribute any branch-encoding error.
	pub location:        Option<CodeLocation>,
}

/// The two ways adjacent conditions in a compound condition can combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Conjunction {
	/// All conditions must hold.
	And,
	/// Any condition may hold.
	Or,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn only_instruction_lines_carry_a_location() {
		let loc = CodeLocation::new("a.s", 3, 0);
		let instr = Line::Instruction { mnemonic: "nop".into(), args: vec![], location: Some(loc.clone()) };
		assert_eq!(instr.location(), Some(&loc));
		assert_eq!(Line::Break.location(), None);
	}

	#[test]
	fn program_tree_defaults_to_empty() {
		let tree = ProgramTree::default();
		assert!(tree.absolute_sections.is_empty());
		assert!(tree.relocatable_sections.is_empty());
		assert!(tree.template_sections.is_empty());
	}
}
