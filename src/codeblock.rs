//! The `CodeBlock` lowering engine (`spec.md` §4.2–§4.4): turns one section's (or nested
//! construct's) structured lines into a flat run of segments plus synthetic labels, resolving
//! every `if`/`while`/`until`/`break`/`continue` into ordinary conditional branches.
//!
//! This is the largest single stage of the pipeline. It never inspects varying-length segments'
//! final byte sizes (that's the resolver's job, §4.7) and never emits object bytes (that's
//! `object.rs`) — it only decides *which* segments exist, in *which* order, and *where* (by segment
//! index, not yet by byte address) each label sits relative to them.
//!
//! A label's final address depends on the sizes of every varying segment before it, and those sizes
//! can still change during resolution. So a label is recorded here as the segment index at which it
//! was declared rather than a baked-in byte address; `Section::resolve_labels` turns that index back
//! into an address by folding over the segments' *current* sizes, which stays correct across
//! resolution passes that grow or shrink a branch's displacement width.

use std::collections::{BTreeMap, BTreeSet};

use flexstr::SharedStr;

use crate::ast::{Condition, Conjunction, Line};
use crate::error::AssemblyError;
use crate::location::CodeLocation;
use crate::segment::SegmentSlot;
use crate::target::{InstructionRef, TargetInstructions, TempStorage};
use crate::types::MemoryAddress;

/// The result of lowering one section's lines: a flat segment run plus every label's declaration
/// point (as a segment index), the entry/external name sets, and a source-location map (also
/// segment-index keyed, for the same reason labels are).
#[derive(Debug)]
pub struct CodeBlock {
	/// This block's base address.
	pub address:         MemoryAddress,
	/// The flattened segment run, in emission order.
	pub segments:         Vec<SegmentSlot>,
	/// Every label (user or synthetic) to the segment index it was declared at: its address is
	/// `address + sum(segments[..index].size())`.
	pub label_positions:  BTreeMap<SharedStr, usize>,
	/// User labels declared `entry`.
	pub ents:             BTreeSet<SharedStr>,
	/// User labels declared `external`.
	pub exts:             BTreeSet<SharedStr>,
	/// Segment index to the source location of the instruction starting there.
	pub code_locations:   BTreeMap<usize, CodeLocation>,
	loop_stack: Vec<(SharedStr, SharedStr)>,
	nonce_seq:  u64,
}

impl CodeBlock {
	/// Lowers `lines` (a whole section's lines, addressed starting at `address`) into a finished
	/// `CodeBlock`, including the target's `finish` validation.
	///
	/// # Errors
	/// Any `AssemblyError` raised while lowering a line, or an `AssemblyError::FinishError` if the
	/// target reports unfinished state at the end, attributed to the last instruction-bearing line
	/// reachable from `lines`.
	pub fn build(address: MemoryAddress, lines: &[Line], target: &dyn TargetInstructions) -> Result<Self, AssemblyError> {
		let mut block = Self {
			address,
			segments: Vec::new(),
			label_positions: BTreeMap::new(),
			ents: BTreeSet::new(),
			exts: BTreeSet::new(),
			code_locations: BTreeMap::new(),
			loop_stack: Vec::new(),
			nonce_seq: 0,
		};
		let mut temp_storage = TempStorage::new();
		block.assemble_lines(lines, &mut temp_storage, target)?;

		if let Err(error) = target.finish(&mut temp_storage) {
			let reason = match error {
				AssemblyError::FinishError { reason, .. } => reason,
				other => return Err(other),
			};
			return Err(AssemblyError::FinishError { reason, location: last_location(lines) });
		}

		Ok(block)
	}

	fn assemble_lines(&mut self, lines: &[Line], temp_storage: &mut TempStorage, target: &dyn TargetInstructions) -> Result<(), AssemblyError> {
		for line in lines {
			if let Some(location) = line.location() {
				self.code_locations.insert(self.segments.len(), location.clone());
			}
			match line {
				Line::LabelDecl { name, entry, external } => self.assemble_label_decl(name, *entry, *external)?,
				Line::Instruction { mnemonic, args, location } => self.assemble_instruction(mnemonic, args, location.clone(), temp_storage, target)?,
				Line::Conditional { conditions, then_lines, else_lines } =>
					self.assemble_conditional(conditions, then_lines, else_lines, temp_storage, target)?,
				Line::WhileLoop { condition_lines, branch_mnemonic, body, location } =>
					self.assemble_while(condition_lines, branch_mnemonic, body, location.clone(), temp_storage, target)?,
				Line::UntilLoop { body, branch_mnemonic, location } => self.assemble_until(body, branch_mnemonic, location.clone(), temp_storage, target)?,
				Line::SaveRestore { saved_reg, body, restored_reg } =>
					self.assemble_save_restore(saved_reg, body, restored_reg.as_ref(), temp_storage, target)?,
				Line::Break => self.assemble_break(target)?,
				Line::Continue => self.assemble_continue(target)?,
			}
		}
		Ok(())
	}

	fn assemble_label_decl(&mut self, name: &SharedStr, entry: bool, external: bool) -> Result<(), AssemblyError> {
		if entry && external {
			return Err(label_error(format!("label \"{name}\" cannot be both entry and external")));
		}
		if name.starts_with('$') {
			return Err(label_error(format!("label \"{name}\" may not start with '$', which is reserved for synthetic labels")));
		}
		if self.label_positions.contains_key(name) || self.ents.contains(name) || self.exts.contains(name) {
			return Err(label_error(format!("duplicate label \"{name}\" declaration")));
		}
		if external {
			self.exts.insert(name.clone());
		} else {
			self.append_label(name.clone());
		}
		if entry {
			self.ents.insert(name.clone());
		}
		Ok(())
	}

	fn assemble_instruction(
		&mut self,
		mnemonic: &SharedStr,
		args: &[SharedStr],
		location: Option<CodeLocation>,
		temp_storage: &mut TempStorage,
		target: &dyn TargetInstructions,
	) -> Result<(), AssemblyError> {
		let instruction = InstructionRef { mnemonic: mnemonic.clone(), args: args.to_vec(), location: location.unwrap_or_else(CodeLocation::synthetic) };
		let segments = target.assemble_instruction(&instruction, temp_storage)?;
		self.push_segments(segments);
		Ok(())
	}

	/// Lowers a (possibly compound) `if`/`elif`/`else` per the and/or chain algorithm: each
	/// condition in turn either branches straight to `then` (`or`), branches past the remaining
	/// `and` chain to the next `or` group on failure (`and`), or — for the final condition, whose
	/// `conjunction` is always `None` — branches straight to `else` on failure.
	fn assemble_conditional(
		&mut self,
		conditions: &[Condition],
		then_lines: &[Line],
		else_lines: &[Line],
		temp_storage: &mut TempStorage,
		target: &dyn TargetInstructions,
	) -> Result<(), AssemblyError> {
		let base = self.next_label_base();
		let then_label: SharedStr = format!("${base}_then").into();
		let else_label: SharedStr = format!("${base}_else").into();
		let finally_label: SharedStr = format!("${base}_finally").into();
		let or_prefix = format!("${base}_or");

		let mut next_or = 0u32;
		let mut next_or_label: SharedStr = format!("{or_prefix}{next_or}").into();

		for condition in conditions {
			self.assemble_lines(&condition.lines, temp_storage, target)?;
			let location = condition.location.clone().unwrap_or_else(CodeLocation::synthetic);
			match condition.conjunction {
				None => self.append_branch(&location, &condition.branch_mnemonic, &else_label, true, target)?,
				Some(Conjunction::Or) => {
					self.append_branch(&location, &condition.branch_mnemonic, &then_label, false, target)?;
					self.append_label(next_or_label.clone());
					next_or += 1;
					next_or_label = format!("{or_prefix}{next_or}").into();
				},
				Some(Conjunction::And) => self.append_branch(&location, &condition.branch_mnemonic, &next_or_label, true, target)?,
			}
		}

		self.append_label(next_or_label);
		self.append_label(then_label);
		self.assemble_lines(then_lines, temp_storage, target)?;

		if else_lines.is_empty() {
			self.append_label(else_label);
		} else {
			let skip_else_location = last_location(then_lines);
			self.append_branch(&skip_else_location, "anything", &finally_label, false, target)?;
			self.append_label(else_label);
			self.assemble_lines(else_lines, temp_storage, target)?;
			self.append_label(finally_label);
		}
		Ok(())
	}

	fn assemble_while(
		&mut self,
		condition_lines: &[Line],
		branch_mnemonic: &SharedStr,
		body: &[Line],
		location: Option<CodeLocation>,
		temp_storage: &mut TempStorage,
		target: &dyn TargetInstructions,
	) -> Result<(), AssemblyError> {
		let base = self.next_label_base();
		let cond_label: SharedStr = format!("${base}_cond").into();
		let finally_label: SharedStr = format!("${base}_finally").into();
		let location = location.unwrap_or_else(CodeLocation::synthetic);

		self.loop_stack.push((cond_label.clone(), finally_label.clone()));
		self.append_label(cond_label.clone());
		self.assemble_lines(condition_lines, temp_storage, target)?;
		self.append_branch(&location, branch_mnemonic, &finally_label, true, target)?;
		self.assemble_lines(body, temp_storage, target)?;
		self.append_branch(&location, "anything", &cond_label, false, target)?;
		self.append_label(finally_label);
		self.loop_stack.pop();
		Ok(())
	}

	fn assemble_until(
		&mut self,
		body: &[Line],
		branch_mnemonic: &SharedStr,
		location: Option<CodeLocation>,
		temp_storage: &mut TempStorage,
		target: &dyn TargetInstructions,
	) -> Result<(), AssemblyError> {
		let base = self.next_label_base();
		let loop_body_label: SharedStr = format!("${base}_loop_body").into();
		let cond_label: SharedStr = format!("${base}_cond").into();
		let finally_label: SharedStr = format!("${base}_finally").into();
		let location = location.unwrap_or_else(CodeLocation::synthetic);

		self.loop_stack.push((cond_label.clone(), finally_label.clone()));
		self.append_label(loop_body_label.clone());
		self.assemble_lines(body, temp_storage, target)?;
		self.append_label(cond_label);
		self.append_branch(&location, branch_mnemonic, &loop_body_label, true, target)?;
		self.append_label(finally_label);
		self.loop_stack.pop();
		Ok(())
	}

	/// Wraps `body` in the target's save/restore mechanism. Modelled as two ordinary instructions
	/// (mnemonics `"push"`/`"pop"`, routed through the same `assemble_instruction` capability as
	/// any other line) rather than a dedicated target method, since saving and restoring a register
	/// is, from the target's point of view, just another instruction pair.
	fn assemble_save_restore(
		&mut self,
		saved_reg: &SharedStr,
		body: &[Line],
		restored_reg: Option<&SharedStr>,
		temp_storage: &mut TempStorage,
		target: &dyn TargetInstructions,
	) -> Result<(), AssemblyError> {
		let push = InstructionRef { mnemonic: "push".into(), args: vec![saved_reg.clone()], location: CodeLocation::synthetic() };
		let segments = target.assemble_instruction(&push, temp_storage)?;
		self.push_segments(segments);

		self.assemble_lines(body, temp_storage, target)?;

		let restore_name = restored_reg.unwrap_or(saved_reg).clone();
		let pop = InstructionRef { mnemonic: "pop".into(), args: vec![restore_name], location: CodeLocation::synthetic() };
		let segments = target.assemble_instruction(&pop, temp_storage)?;
		self.push_segments(segments);
		Ok(())
	}

	fn assemble_break(&mut self, target: &dyn TargetInstructions) -> Result<(), AssemblyError> {
		let (_, finally_label) = self
			.loop_stack
			.last()
			.cloned()
			.ok_or_else(|| control_flow_error("break statement outside of any enclosing loop"))?;
		// A bare `break` never had a source location of its own in this AST; it is attributed to
		// the synthetic null location, per `spec.md` §7.
		self.append_branch(&CodeLocation::synthetic(), "anything", &finally_label, false, target)
	}

	fn assemble_continue(&mut self, target: &dyn TargetInstructions) -> Result<(), AssemblyError> {
		let (cond_label, _) = self
			.loop_stack
			.last()
			.cloned()
			.ok_or_else(|| control_flow_error("continue statement outside of any enclosing loop"))?;
		self.append_branch(&CodeLocation::synthetic(), "anything", &cond_label, false, target)
	}

	fn append_branch(
		&mut self,
		location: &CodeLocation,
		mnemonic: &str,
		target_label: &str,
		inverse: bool,
		target: &dyn TargetInstructions,
	) -> Result<(), AssemblyError> {
		let segments = target.make_branch_instruction(location, mnemonic, target_label, inverse)?;
		self.push_segments(segments);
		Ok(())
	}

	fn append_label(&mut self, name: SharedStr) {
		self.label_positions.insert(name, self.segments.len());
	}

	fn push_segments(&mut self, segments: Vec<SegmentSlot>) {
		self.segments.extend(segments);
	}

	/// A fresh, unique base string for a structured construct's synthetic labels. Combines the
	/// construct's current segment-index position with a monotonic counter so that two constructs
	/// lowered back-to-back with no segments emitted between them (e.g. an empty condition) never
	/// collide — the resolution of the nonce-uniqueness open question in `spec.md` §9.
	fn next_label_base(&mut self) -> String {
		let position = self.segments.len();
		self.nonce_seq += 1;
		format!("{position}_{}", self.nonce_seq)
	}
}

fn label_error(reason: impl Into<SharedStr>) -> AssemblyError {
	AssemblyError::LabelError { reason: reason.into(), location: CodeLocation::synthetic() }
}

fn control_flow_error(reason: impl Into<SharedStr>) -> AssemblyError {
	AssemblyError::ControlFlowError { reason: reason.into(), location: CodeLocation::synthetic() }
}

/// Finds the location of the last instruction reachable from `lines`, descending into the last
/// branch of whatever structured construct ends the slice. Used to attribute a `FinishError` (which
/// has no line of its own) to something more useful than the null location.
fn last_location(lines: &[Line]) -> CodeLocation {
	lines.last().map_or_else(CodeLocation::synthetic, deepest_location)
}

fn deepest_location(line: &Line) -> CodeLocation {
	match line {
		Line::Instruction { location, .. } => location.clone().unwrap_or_else(CodeLocation::synthetic),
		Line::Conditional { then_lines, else_lines, .. } =>
			if else_lines.is_empty() {
				last_location(then_lines)
			} else {
				last_location(else_lines)
			},
		Line::WhileLoop { body, .. } | Line::UntilLoop { body, .. } | Line::SaveRestore { body, .. } => last_location(body),
		Line::LabelDecl { .. } | Line::Break | Line::Continue => CodeLocation::synthetic(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::demo::DemoTarget;

	#[test]
	fn empty_block_has_no_segments() {
		let target = DemoTarget::new();
		let block = CodeBlock::build(0, &[], &target).unwrap();
		assert!(block.segments.is_empty());
	}

	#[test]
	fn label_declaration_records_its_segment_position() {
		let target = DemoTarget::new();
		let lines = vec![
			Line::Instruction { mnemonic: "nop".into(), args: vec![], location: None },
			Line::LabelDecl { name: "here".into(), entry: false, external: false },
		];
		let block = CodeBlock::build(0x10, &lines, &target).unwrap();
		assert_eq!(block.label_positions.get("here"), Some(&1));
	}

	#[test]
	fn entry_and_external_together_is_rejected() {
		let target = DemoTarget::new();
		let lines = vec![Line::LabelDecl { name: "x".into(), entry: true, external: true }];
		assert!(matches!(CodeBlock::build(0, &lines, &target), Err(AssemblyError::LabelError { .. })));
	}

	#[test]
	fn duplicate_label_is_rejected() {
		let target = DemoTarget::new();
		let lines = vec![
			Line::LabelDecl { name: "x".into(), entry: false, external: false },
			Line::LabelDecl { name: "x".into(), entry: false, external: false },
		];
		assert!(matches!(CodeBlock::build(0, &lines, &target), Err(AssemblyError::LabelError { .. })));
	}

	#[test]
	fn break_outside_loop_is_rejected() {
		let target = DemoTarget::new();
		let lines = vec![Line::Break];
		assert!(matches!(CodeBlock::build(0, &lines, &target), Err(AssemblyError::ControlFlowError { .. })));
	}

	#[test]
	fn continue_outside_loop_is_rejected() {
		let target = DemoTarget::new();
		let lines = vec![Line::Continue];
		assert!(matches!(CodeBlock::build(0, &lines, &target), Err(AssemblyError::ControlFlowError { .. })));
	}

	#[test]
	fn break_inside_while_loop_resolves_against_loop_stack() {
		let target = DemoTarget::new();
		let lines = vec![Line::WhileLoop {
			condition_lines: vec![],
			branch_mnemonic:  "beq".into(),
			body:             vec![Line::Break],
			location:         None,
		}];
		assert!(CodeBlock::build(0, &lines, &target).is_ok());
	}

	#[test]
	fn conditional_declares_then_and_else_labels() {
		let target = DemoTarget::new();
		let lines = vec![Line::Conditional {
			conditions: vec![Condition { lines: vec![], branch_mnemonic: "beq".into(), conjunction: None, location: None }],
			then_lines: vec![Line::Instruction { mnemonic: "nop".into(), args: vec![], location: None }],
			else_lines: vec![],
		}];
		let block = CodeBlock::build(0, &lines, &target).unwrap();
		let then_count = block.label_positions.keys().filter(|name| name.ends_with("_then")).count();
		let else_count = block.label_positions.keys().filter(|name| name.ends_with("_else")).count();
		assert_eq!(then_count, 1);
		assert_eq!(else_count, 1);
	}

	#[test]
	fn save_restore_wraps_body_with_push_and_pop() {
		let target = DemoTarget::new();
		let lines = vec![Line::SaveRestore {
			saved_reg:    "a".into(),
			body:         vec![Line::Instruction { mnemonic: "nop".into(), args: vec![], location: None }],
			restored_reg: None,
		}];
		let block = CodeBlock::build(0, &lines, &target).unwrap();
		assert!(block.segments.len() >= 2);
	}
}
