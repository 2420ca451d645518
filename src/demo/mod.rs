//! A toy reference target (`SPEC_FULL.md` §4.10): a one-byte-opcode machine with a handful of
//! fixed-width instructions and a branch family whose displacement grows from one byte to two once
//! its target turns out to live past address 255. Exists to exercise the pipeline's own tests and
//! the CLI front-end; it is not meant to model any real instruction set.

use std::collections::BTreeSet;

use flexstr::SharedStr;

use crate::error::AssemblyError;
use crate::location::CodeLocation;
use crate::object::ObjectSectionRecord;
use crate::section::Section;
use crate::segment::{CodeSegment, SegmentSlot, VaryingSegment};
use crate::target::{InstructionRef, TargetInstructions, TempStorage};
use crate::types::{LabelTable, MemoryAddress, TemplateTable};

/// The toy target itself. Holds only its directive set; every other piece of state needed during
/// assembly lives in the `TempStorage` the pipeline threads through, or the segments it hands back.
#[derive(Debug)]
pub struct DemoTarget {
	directives: BTreeSet<SharedStr>,
}

impl DemoTarget {
	/// Builds the target with its fixed `"dc"`/`"ds"` directive set.
	#[must_use]
	pub fn new() -> Self {
		let mut directives = BTreeSet::new();
		directives.insert(SharedStr::from("dc"));
		directives.insert(SharedStr::from("ds"));
		Self { directives }
	}
}

impl Default for DemoTarget {
	fn default() -> Self {
		Self::new()
	}
}

impl TargetInstructions for DemoTarget {
	fn assembly_directives(&self) -> &BTreeSet<SharedStr> {
		&self.directives
	}

	fn assemble_instruction(&self, instruction: &InstructionRef, _temp_storage: &mut TempStorage) -> Result<Vec<SegmentSlot>, AssemblyError> {
		let bytes = match instruction.mnemonic.as_str() {
			"nop" => vec![0x00],
			"mov" => vec![0x20, parse_byte(instruction, 0)?],
			"add" => vec![0x21, parse_byte(instruction, 0)?],
			"cmp" => vec![0x22, parse_byte(instruction, 0)?],
			"push" => vec![0x30, register_code(instruction, 0)?],
			"pop" => vec![0x31, register_code(instruction, 0)?],
			"dc" => instruction.args.iter().map(|arg| parse_literal(arg, instruction)).collect::<Result<Vec<u8>, _>>()?,
			"ds" => {
				let count = instruction
					.args
					.first()
					.and_then(|arg| arg.parse::<usize>().ok())
					.ok_or_else(|| instruction_error("\"ds\" requires one numeric byte-count argument", instruction))?;
				vec![0u8; count]
			},
			other => return Err(instruction_error(format!("unknown mnemonic \"{other}\""), instruction)),
		};
		Ok(vec![SegmentSlot::Fixed(Box::new(FixedBytes(bytes)))])
	}

	fn make_branch_instruction(
		&self,
		location: &CodeLocation,
		mnemonic: &str,
		target_label: &str,
		inverse: bool,
	) -> Result<Vec<SegmentSlot>, AssemblyError> {
		// Validate the mnemonic eagerly so a typo is reported at lowering time rather than at
		// resolution time, even though the final opcode byte isn't written until `fill`.
		opcode_for(mnemonic, inverse, location)?;
		Ok(vec![SegmentSlot::Varying(Box::new(BranchSegment {
			mnemonic: mnemonic.into(),
			target_label: target_label.into(),
			inverse,
			location: location.clone(),
			width: 1,
		}))])
	}

	fn finish(&self, temp_storage: &mut TempStorage) -> Result<(), AssemblyError> {
		if temp_storage.is_empty() {
			Ok(())
		} else {
			Err(AssemblyError::FinishError { reason: "unexpected leftover scratch state".into(), location: CodeLocation::synthetic() })
		}
	}
}

fn parse_byte(instruction: &InstructionRef, index: usize) -> Result<u8, AssemblyError> {
	let arg = instruction
		.args
		.get(index)
		.ok_or_else(|| instruction_error(format!("\"{}\" requires an operand", instruction.mnemonic), instruction))?;
	parse_literal(arg, instruction)
}

fn parse_literal(arg: &str, instruction: &InstructionRef) -> Result<u8, AssemblyError> {
	arg.parse::<u8>().map_err(|_| instruction_error(format!("\"{arg}\" is not a valid byte literal"), instruction))
}

fn register_code(instruction: &InstructionRef, index: usize) -> Result<u8, AssemblyError> {
	let arg = instruction
		.args
		.get(index)
		.ok_or_else(|| instruction_error(format!("\"{}\" requires a register operand", instruction.mnemonic), instruction))?;
	match arg.as_str() {
		"a" => Ok(0),
		"b" => Ok(1),
		"c" => Ok(2),
		"d" => Ok(3),
		other => Err(instruction_error(format!("unknown register \"{other}\""), instruction)),
	}
}

fn instruction_error(reason: impl Into<SharedStr>, instruction: &InstructionRef) -> AssemblyError {
	AssemblyError::InstructionError { reason: reason.into(), location: instruction.location.clone() }
}

fn opcode_for(mnemonic: &str, inverse: bool, location: &CodeLocation) -> Result<u8, AssemblyError> {
	match mnemonic {
		"anything" => Ok(0x14),
		"beq" => Ok(if inverse { 0x11 } else { 0x10 }),
		"bne" => Ok(if inverse { 0x10 } else { 0x11 }),
		"bcc" => Ok(if inverse { 0x13 } else { 0x12 }),
		"bcs" => Ok(if inverse { 0x12 } else { 0x13 }),
		other => Err(AssemblyError::InstructionError { reason: format!("unknown branch mnemonic \"{other}\"").into(), location: location.clone() }),
	}
}

/// A run of literal bytes with no relocation of its own: directive data and instruction immediates.
#[derive(Debug)]
struct FixedBytes(Vec<u8>);

impl CodeSegment for FixedBytes {
	fn size(&self) -> usize {
		self.0.len()
	}

	fn fill(&self, record: &mut ObjectSectionRecord, _section: &Section, _labels: &LabelTable, _templates: &TemplateTable) -> Result<(), AssemblyError> {
		record.data.extend_from_slice(&self.0);
		Ok(())
	}
}

/// A conditional or unconditional branch. Starts at the narrowest width (a one-byte direct address,
/// valid for targets in `0..=255`) and widens to a two-byte absolute address once resolution shows
/// the target doesn't fit — the varying-length fixup `spec.md` §4.6/§4.7 describes.
#[derive(Debug)]
struct BranchSegment {
	mnemonic:     SharedStr,
	target_label: SharedStr,
	inverse:      bool,
	location:     CodeLocation,
	width:        u8,
}

impl CodeSegment for BranchSegment {
	fn size(&self) -> usize {
		1 + self.width as usize
	}

	fn fill(&self, record: &mut ObjectSectionRecord, section: &Section, labels: &LabelTable, _templates: &TemplateTable) -> Result<(), AssemblyError> {
		let opcode = opcode_for(&self.mnemonic, self.inverse, &self.location)?;
		record.data.push(opcode);
		let offset = record.data.len();
		// Relocation is only needed when the referenced label's own value is relative to this
		// section's not-yet-assigned base, i.e. it's a label this section itself declared. A
		// reference from a relocatable section to an already-fixed absolute label is just as final
		// as one from an absolute section and must not be flagged for link-time adjustment.
		let is_relocatable = section.resolve_labels().contains_key(&self.target_label);

		match labels.get(&self.target_label) {
			Some(&address) =>
				if self.width == 1 {
					record.data.push(low_byte(address));
					if is_relocatable {
						record.rell.insert(offset);
					}
				} else {
					record.data.extend_from_slice(&address_bytes(address));
					if is_relocatable {
						record.rell.insert(offset);
						record.relh.insert((offset, high_byte(address)));
					}
				},
			None if section.exts.contains(&self.target_label) =>
				if self.width == 1 {
					record.data.push(0);
					record.xtrl.entry(self.target_label.clone()).or_default().push(offset);
				} else {
					record.data.extend_from_slice(&[0, 0]);
					record.xtrl.entry(self.target_label.clone()).or_default().push(offset);
					record.xtrh.entry(self.target_label.clone()).or_default().push((offset, 0));
				},
			None =>
				return Err(AssemblyError::ResolutionError {
					reason:   format!("undefined label \"{}\"", self.target_label).into(),
					location: self.location.clone(),
				}),
		}
		Ok(())
	}
}

impl VaryingSegment for BranchSegment {
	fn update_varying_length(
		&mut self,
		_pos: MemoryAddress,
		section: &Section,
		labels: &LabelTable,
		_templates: &TemplateTable,
	) -> Result<bool, AssemblyError> {
		let needs_wide = match labels.get(&self.target_label) {
			Some(&address) => !(0 ..= 0xFF).contains(&address),
			None if section.exts.contains(&self.target_label) => true,
			None => false,
		};
		let new_width = if needs_wide { 2 } else { 1 };
		let changed = new_width != self.width;
		self.width = new_width;
		Ok(changed)
	}
}

fn low_byte(address: MemoryAddress) -> u8 {
	(address & 0xFF) as u8
}

fn high_byte(address: MemoryAddress) -> u8 {
	((address >> 8) & 0xFF) as u8
}

fn address_bytes(address: MemoryAddress) -> [u8; 2] {
	[low_byte(address), high_byte(address)]
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeMap;

	use super::*;

	#[test]
	fn nop_encodes_to_a_single_byte() {
		let target = DemoTarget::new();
		let mut temp = TempStorage::new();
		let instruction = InstructionRef { mnemonic: "nop".into(), args: vec![], location: CodeLocation::synthetic() };
		let segments = target.assemble_instruction(&instruction, &mut temp).unwrap();
		assert_eq!(segments.iter().map(SegmentSlot::size).sum::<usize>(), 1);
	}

	#[test]
	fn unknown_mnemonic_is_an_instruction_error() {
		let target = DemoTarget::new();
		let mut temp = TempStorage::new();
		let instruction = InstructionRef { mnemonic: "xyz".into(), args: vec![], location: CodeLocation::synthetic() };
		assert!(matches!(target.assemble_instruction(&instruction, &mut temp), Err(AssemblyError::InstructionError { .. })));
	}

	#[test]
	fn branch_starts_narrow_and_widens_past_255() {
		let target = DemoTarget::new();
		let segments = target.make_branch_instruction(&CodeLocation::synthetic(), "beq", "far", false).unwrap();
		let SegmentSlot::Varying(mut branch) = segments.into_iter().next().unwrap() else { panic!("expected a varying segment") };
		assert_eq!(branch.size(), 2);

		let ast_section = crate::ast::AbsoluteSection { address: 0, lines: vec![] };
		let section = Section::lower_absolute(&ast_section, &target).unwrap();
		let mut labels = LabelTable::new();
		labels.insert("far".into(), 0x300);
		let changed = branch.update_varying_length(0, &section, &labels, &TemplateTable::new()).unwrap();
		assert!(changed);
		assert_eq!(branch.size(), 3);
	}

	#[test]
	fn branch_to_this_sections_own_label_sets_rell() {
		let target = DemoTarget::new();
		let segments = target.make_branch_instruction(&CodeLocation::synthetic(), "beq", "here", false).unwrap();
		let mut label_positions = BTreeMap::new();
		label_positions.insert(SharedStr::from("here"), 0usize);
		let section =
			Section { name: "R".into(), address: 0, segments, label_positions, ents: BTreeSet::new(), exts: BTreeSet::new(), code_locations: BTreeMap::new() };
		let labels = section.resolve_labels();
		let record = ObjectSectionRecord::build(&section, &labels, &TemplateTable::new()).unwrap();
		assert!(!record.rell.is_empty(), "a branch to a label this relocatable section itself declares needs relocation");
	}

	#[test]
	fn branch_to_external_label_sets_xtrl() {
		let target = DemoTarget::new();
		let segments = target.make_branch_instruction(&CodeLocation::synthetic(), "beq", "ext_sym", false).unwrap();
		let mut exts = BTreeSet::new();
		exts.insert(SharedStr::from("ext_sym"));
		let section =
			Section { name: "R".into(), address: 0, segments, label_positions: BTreeMap::new(), ents: BTreeSet::new(), exts, code_locations: BTreeMap::new() };
		let record = ObjectSectionRecord::build(&section, &LabelTable::new(), &TemplateTable::new()).unwrap();
		assert!(record.xtrl.contains_key("ext_sym"), "a branch to an external symbol needs an xtrl entry");
	}

	#[test]
	fn branch_from_relocatable_section_to_an_absolute_label_does_not_set_rell() {
		let target = DemoTarget::new();
		let segments = target.make_branch_instruction(&CodeLocation::synthetic(), "beq", "abs_entry", false).unwrap();
		let section = Section {
			name: "R".into(),
			address: 0,
			segments,
			label_positions: BTreeMap::new(),
			ents: BTreeSet::new(),
			exts: BTreeSet::new(),
			code_locations: BTreeMap::new(),
		};
		// "abs_entry" is not a label of this section; it's threaded in from the already-resolved,
		// link-independent absolute label table, the way `assembler.rs` merges labels for every
		// relocatable section. Referencing it needs no relocation even though the referencing
		// section is itself relocatable.
		let mut labels = LabelTable::new();
		labels.insert("abs_entry".into(), 0x40);
		let record = ObjectSectionRecord::build(&section, &labels, &TemplateTable::new()).unwrap();
		assert!(record.rell.is_empty(), "a reference to an already-fixed absolute label must not be flagged for relocation");
	}
}
