//! The `TargetInstructions` capability (`spec.md` §2.3/§4.5) and the per-block scratch storage
//! threaded through it.
//!
//! Everything in this module is a capability boundary: the core lowering pipeline depends only on
//! these traits, never on any concrete instruction set. A real downstream user supplies their own
//! implementation; this crate's `demo` module supplies a toy one for its own tests and CLI.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use flexstr::SharedStr;

use crate::error::AssemblyError;
use crate::location::CodeLocation;
use crate::segment::SegmentSlot;

/// A single instruction or directive line, as handed to the target for encoding. This is a
/// narrower view of `ast::Line::Instruction` so that the target capability surface doesn't depend
/// on the full AST shape.
#[derive(Debug, Clone)]
pub struct InstructionRef {
	/// The mnemonic being assembled.
	pub mnemonic: SharedStr,
	/// The raw argument list, still in whatever textual form the parser produced.
	pub args:     Vec<SharedStr>,
	/// Source location of this instruction, for error attribution.
	pub location: CodeLocation,
}

/// A small closed set of scratch values a target can stash in `TempStorage` between lines of the
/// same block, plus an escape hatch for anything that doesn't fit the common cases.
///
/// `spec.md` §9 suggests modelling this as "a map from a string key to a small enumerated-variant
/// value" rather than a fully dynamic bag; `Other` exists only because a capability boundary can't
/// anticipate every target's needs, not as the primary mechanism.
pub enum TempValue {
	/// A boolean flag (e.g. "are we mid-way through a paired instruction").
	Flag(bool),
	/// A small counter.
	Count(u32),
	/// Raw bytes the target wants to remember (e.g. a pending operand).
	Bytes(Vec<u8>),
	/// A label or mnemonic name the target wants to remember.
	Name(SharedStr),
	/// Anything else a pluggable target needs to carry between lines.
	Other(Box<dyn Any + Send>),
}

impl fmt::Debug for TempValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Flag(value) => f.debug_tuple("Flag").field(value).finish(),
			Self::Count(value) => f.debug_tuple("Count").field(value).finish(),
			Self::Bytes(value) => f.debug_tuple("Bytes").field(value).finish(),
			Self::Name(value) => f.debug_tuple("Name").field(value).finish(),
			// The boxed value itself isn't required to implement `Debug`.
			Self::Other(_) => f.write_str("Other(..)"),
		}
	}
}

/// The per-`CodeBlock` scratch map passed to the target while lowering one block's lines.
///
/// Owned by the `CodeBlock` for the duration of its construction and handed out only as `&mut
/// TempStorage`; a target implementation must never retain a reference to it past the call that
/// received it (`spec.md` §5).
pub type TempStorage = BTreeMap<SharedStr, TempValue>;

/// The pluggable encoder and directive table a concrete assembly target provides.
///
/// # Errors
/// Every method that can reject input returns `AssemblyError::InstructionError` (or, for
/// `finish`, `AssemblyError::FinishError`) carrying a target-supplied message.
pub trait TargetInstructions {
	/// Mnemonics usable inside a template section (conventionally `"dc"`/`"ds"`, i.e. "declare
	/// constant"/"declare space", but the exact set is entirely up to the target).
	fn assembly_directives(&self) -> &BTreeSet<SharedStr>;

	/// Encodes one instruction or directive line into zero or more segments. May mutate
	/// `temp_storage` to carry state forward into the next line of the same block (e.g. a pending
	/// operand for a multi-line pseudo-instruction).
	fn assemble_instruction(
		&self,
		instruction: &InstructionRef,
		temp_storage: &mut TempStorage,
	) -> Result<Vec<SegmentSlot>, AssemblyError>;

	/// Lowers a branch to one or more segments. `mnemonic` may be the pseudo-mnemonic
	/// `"anything"`, denoting an unconditional branch that every target must support regardless of
	/// its real instruction set. `inverse` requests the logical inverse of the named branch
	/// condition (used when the lowering needs to "skip past" a block on failure).
	fn make_branch_instruction(
		&self,
		location: &CodeLocation,
		mnemonic: &str,
		target_label: &str,
		inverse: bool,
	) -> Result<Vec<SegmentSlot>, AssemblyError>;

	/// Validates that nothing is left pending in `temp_storage` at the end of a block. Called once
	/// per `CodeBlock` after all of its lines have been lowered.
	fn finish(&self, temp_storage: &mut TempStorage) -> Result<(), AssemblyError>;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn temp_storage_holds_heterogeneous_values() {
		let mut storage: TempStorage = TempStorage::new();
		storage.insert("pending".into(), TempValue::Flag(true));
		storage.insert("count".into(), TempValue::Count(3));
		assert!(matches!(storage.get("pending"), Some(TempValue::Flag(true))));
		assert!(matches!(storage.get("count"), Some(TempValue::Count(3))));
	}
}
