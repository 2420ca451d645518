//! A finished section: the result of lowering one `AbsoluteSection`/`RelocatableSection`'s lines
//! into a `CodeBlock`, still carrying its own segment-indexed labels, entry/external sets and
//! segment run so the varying-length resolver (`spec.md` §4.7) and object builder (`spec.md` §4.8)
//! can each consult it.
//!
//! Labels and source locations are stored by *segment index*, not baked-in byte offset, because a
//! varying segment earlier in the run can still grow or shrink during resolution: `resolve_labels`
//! and `resolved_code_locations` fold over the segments' current sizes every time they're called,
//! so they always reflect however much resolution has happened so far.

use std::collections::{BTreeMap, BTreeSet};

use flexstr::SharedStr;

use crate::ast::{AbsoluteSection, RelocatableSection};
use crate::codeblock::CodeBlock;
use crate::error::AssemblyError;
use crate::location::CodeLocation;
use crate::segment::SegmentSlot;
use crate::target::TargetInstructions;
use crate::types::{LabelTable, MemoryAddress};

/// One section of the final object module, after lowering but before (or during) varying-length
/// resolution. Absolute sections are always named `"$abs"`; relocatable sections keep their
/// source-given name.
#[derive(Debug)]
pub struct Section {
	/// `"$abs"` for an absolute section; the source name for a relocatable one.
	pub name:            SharedStr,
	/// Load address; `0` for a relocatable section until the linker assigns one.
	pub address:         MemoryAddress,
	/// The section's flattened segment run.
	pub segments:        Vec<SegmentSlot>,
	/// Every label (user or synthetic) to the segment index it was declared at.
	pub label_positions: BTreeMap<SharedStr, usize>,
	/// User labels declared `entry`.
	pub ents:            BTreeSet<SharedStr>,
	/// User labels declared `external`, resolved against other sections at link time.
	pub exts:            BTreeSet<SharedStr>,
	/// Segment index to the source location of the instruction starting there.
	pub code_locations:  BTreeMap<usize, CodeLocation>,
}

impl Section {
	/// Lowers an absolute section. Always named `"$abs"`, per `spec.md` §3.1/§6.2.
	///
	/// # Errors
	/// Propagates any `AssemblyError` raised while lowering the section's lines.
	pub fn lower_absolute(ast_section: &AbsoluteSection, target: &dyn TargetInstructions) -> Result<Self, AssemblyError> {
		let block = CodeBlock::build(ast_section.address, &ast_section.lines, target)?;
		Ok(Self::from_block("$abs".into(), ast_section.address, block))
	}

	/// Lowers a relocatable section at provisional address `0`; the linker assigns its real base
	/// later and every reference into it is carried as a relocation rather than a resolved address.
	///
	/// # Errors
	/// Propagates any `AssemblyError` raised while lowering the section's lines.
	pub fn lower_relocatable(ast_section: &RelocatableSection, target: &dyn TargetInstructions) -> Result<Self, AssemblyError> {
		let block = CodeBlock::build(0, &ast_section.lines, target)?;
		Ok(Self::from_block(ast_section.name.clone(), 0, block))
	}

	fn from_block(name: SharedStr, address: MemoryAddress, block: CodeBlock) -> Self {
		Self {
			name,
			address,
			segments: block.segments,
			label_positions: block.label_positions,
			ents: block.ents,
			exts: block.exts,
			code_locations: block.code_locations,
		}
	}

	/// Total size in bytes of every segment's *current* size.
	#[must_use]
	pub fn total_size(&self) -> usize {
		self.segments.iter().map(SegmentSlot::size).sum()
	}

	/// The byte offset each segment starts at, one entry per segment plus a trailing entry for the
	/// section's total size. `prefix[i]` is the address, relative to `self.address`, of segment `i`.
	fn prefix_offsets(&self) -> Vec<usize> {
		let mut offsets = Vec::with_capacity(self.segments.len() + 1);
		let mut running = 0;
		offsets.push(running);
		for segment in &self.segments {
			running += segment.size();
			offsets.push(running);
		}
		offsets
	}

	/// Resolves every label this section declared to its address, given the segments' current
	/// sizes. Safe to call repeatedly across resolution passes; each call reflects whatever sizes
	/// the segments hold right now.
	#[must_use]
	pub fn resolve_labels(&self) -> LabelTable {
		let offsets = self.prefix_offsets();
		self.label_positions
			.iter()
			.map(|(name, &index)| (name.clone(), self.address + offsets[index] as MemoryAddress))
			.collect()
	}

	/// Converts the segment-indexed `code_locations` map into a byte-offset-keyed one, using the
	/// segments' current sizes. Intended to be called once, after resolution has finished, when
	/// building the final `ObjectSectionRecord`.
	#[must_use]
	pub fn resolved_code_locations(&self) -> BTreeMap<usize, CodeLocation> {
		let offsets = self.prefix_offsets();
		self.code_locations.iter().map(|(&index, location)| (offsets[index], location.clone())).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ast::Line;
	use crate::demo::DemoTarget;

	#[test]
	fn absolute_section_is_named_dollar_abs() {
		let target = DemoTarget::new();
		let ast_section = AbsoluteSection { address: 0x200, lines: vec![] };
		let section = Section::lower_absolute(&ast_section, &target).unwrap();
		assert_eq!(section.name.as_str(), "$abs");
		assert_eq!(section.address, 0x200);
	}

	#[test]
	fn relocatable_section_keeps_its_source_name() {
		let target = DemoTarget::new();
		let ast_section = RelocatableSection { name: "TEXT".into(), lines: vec![] };
		let section = Section::lower_relocatable(&ast_section, &target).unwrap();
		assert_eq!(section.name.as_str(), "TEXT");
		assert_eq!(section.address, 0);
	}

	#[test]
	fn resolve_labels_reflects_segment_sizes() {
		let target = DemoTarget::new();
		let ast_section = AbsoluteSection {
			address: 0x10,
			lines:   vec![
				Line::Instruction { mnemonic: "nop".into(), args: vec![], location: None },
				Line::LabelDecl { name: "here".into(), entry: false, external: false },
			],
		};
		let section = Section::lower_absolute(&ast_section, &target).unwrap();
		let labels = section.resolve_labels();
		assert_eq!(labels.get("here"), Some(&0x11));
	}
}
