//! The varying-length resolver and top-level lowering orchestration (`spec.md` §4.7), mirroring the
//! pass structure of the source `assemble()` entry point: templates first, then every section is
//! lowered once (§4.2–§4.4), then absolute sections are resolved in address order — each one's
//! *local* (non-synthetic) labels feed into the next, so later absolute sections can reference
//! earlier ones — and finally every relocatable section is resolved against the complete set of
//! absolute labels (but never against another relocatable section: cross-relocatable references are
//! a linker concern, outside this crate's scope).

use crate::ast::ProgramTree;
use crate::error::AssemblyError;
use crate::object::{ObjectModule, ObjectSectionRecord};
use crate::section::Section;
use crate::target::TargetInstructions;
use crate::template::Template;
use crate::types::{LabelTable, MemoryAddress, TemplateTable};

/// Upper bound on how many times the fixed-point loop re-examines a section's varying segments
/// before giving up. `spec.md` §9 leaves the exact bound to the implementation; four passes covers
/// every growth chain this crate's segment model can produce (a segment can only ever widen once,
/// from its narrowest encoding to its widest, so in practice two passes suffice — the extra margin
/// is headroom, not an observed requirement).
pub const MAX_RESOLUTION_PASSES: usize = 4;

/// Lowers a complete program tree into its object module.
///
/// # Errors
/// Any `AssemblyError` raised by template evaluation, section lowering, or varying-length
/// resolution aborts the whole assembly.
pub fn assemble(program: &ProgramTree, target: &dyn TargetInstructions) -> Result<ObjectModule, AssemblyError> {
	log::debug!(
		"assembling {} absolute, {} relocatable, {} template section(s)",
		program.absolute_sections.len(),
		program.relocatable_sections.len(),
		program.template_sections.len()
	);
	let mut templates = TemplateTable::new();
	for template_section in &program.template_sections {
		let template = Template::evaluate(template_section, target)?;
		templates.insert(template.name.clone(), template.labels);
	}

	let mut absolute_sections: Vec<Section> =
		program.absolute_sections.iter().map(|section| Section::lower_absolute(section, target)).collect::<Result<_, _>>()?;
	let mut relocatable_sections: Vec<Section> =
		program.relocatable_sections.iter().map(|section| Section::lower_relocatable(section, target)).collect::<Result<_, _>>()?;
	log::debug!("pass 1 (structured lowering) complete; starting pass 2 (varying-length resolution)");

	let absolute_labels = resolve_absolute_sections(&mut absolute_sections, &templates)?;
	resolve_relocatable_sections(&mut relocatable_sections, &absolute_labels, &templates)?;

	let asects = absolute_sections
		.iter()
		.map(|section| ObjectSectionRecord::build(section, &merge_labels(&absolute_labels, &section.resolve_labels()), &templates))
		.collect::<Result<_, _>>()?;
	let rsects = relocatable_sections
		.iter()
		.map(|section| ObjectSectionRecord::build(section, &merge_labels(&absolute_labels, &section.resolve_labels()), &templates))
		.collect::<Result<_, _>>()?;
	log::debug!("assembly finished: {} absolute, {} relocatable object section record(s)", asects.len(), rsects.len());

	Ok(ObjectModule { asects, rsects })
}

/// Resolves every absolute section's varying segments, in ascending address order, threading each
/// section's local labels forward so a later absolute section can branch into an earlier one.
/// Returns the accumulated cross-section label set (local labels only — synthetic, `$`-prefixed
/// ones never leave the section that declared them).
///
/// # Errors
/// `AssemblyError::NotConverged` if any section's varying segments don't reach a fixed point within
/// `MAX_RESOLUTION_PASSES`, or any segment's own resolution error (e.g. an undefined label).
pub fn resolve_absolute_sections(sections: &mut [Section], templates: &TemplateTable) -> Result<LabelTable, AssemblyError> {
	sections.sort_by_key(|section| section.address);
	log::debug!("resolving {} absolute section(s) in address order", sections.len());
	let mut accumulated = LabelTable::new();
	for section in sections.iter_mut() {
		log::trace!("lowering absolute section at address {:#x}", section.address);
		resolve_section(section, &accumulated, templates)?;
		gather_local_labels(section, &mut accumulated);
	}
	log::debug!("absolute sections resolved; {} label(s) visible to relocatable sections", accumulated.len());
	Ok(accumulated)
}

/// Resolves every relocatable section's varying segments against the complete absolute label set.
/// Relocatable sections never see each other's labels: a reference from one relocatable section
/// into another is necessarily external and resolved by the linker, not by this crate.
///
/// # Errors
/// Same as `resolve_absolute_sections`.
pub fn resolve_relocatable_sections(sections: &mut [Section], absolute_labels: &LabelTable, templates: &TemplateTable) -> Result<(), AssemblyError> {
	log::debug!("resolving {} relocatable section(s)", sections.len());
	for section in sections.iter_mut() {
		log::trace!("lowering relocatable section \"{}\"", section.name);
		resolve_section(section, absolute_labels, templates)?;
	}
	Ok(())
}

fn resolve_section(section: &mut Section, global_labels: &LabelTable, templates: &TemplateTable) -> Result<(), AssemblyError> {
	for pass in 0 .. MAX_RESOLUTION_PASSES {
		if !resolve_section_once(section, global_labels, templates)? {
			log::trace!("section \"{}\" converged after {} pass(es)", section.name, pass + 1);
			return Ok(());
		}
	}
	log::debug!("section \"{}\" did not converge within {} pass(es)", section.name, MAX_RESOLUTION_PASSES);
	Err(AssemblyError::NotConverged { passes: MAX_RESOLUTION_PASSES })
}

/// Runs one resolution pass over `section`'s segments, returning whether any segment's size
/// changed. Segments are taken out of the section for the duration of the pass so each one can be
/// handed an (immutable) view of the rest of the section alongside its own `&mut self`.
fn resolve_section_once(section: &mut Section, global_labels: &LabelTable, templates: &TemplateTable) -> Result<bool, AssemblyError> {
	let labels = merge_labels(global_labels, &section.resolve_labels());
	let mut segments = std::mem::take(&mut section.segments);
	let mut changed = false;
	let mut pos = section.address;
	for slot in &mut segments {
		if slot.update_varying_length(pos, section, &labels, templates)? {
			changed = true;
		}
		pos += slot.size() as MemoryAddress;
	}
	section.segments = segments;
	Ok(changed)
}

/// Folds a section's non-synthetic labels into the accumulated cross-section table. Synthetic
/// labels (the `$`-prefixed ones the code-block lowerer invents for structured constructs) are
/// section-local by construction and must never leak into another section's resolution.
fn gather_local_labels(section: &Section, accumulated: &mut LabelTable) {
	for (name, address) in section.resolve_labels() {
		if !name.starts_with('$') {
			accumulated.insert(name, address);
		}
	}
}

fn merge_labels(base: &LabelTable, overrides: &LabelTable) -> LabelTable {
	let mut merged: LabelTable = base.clone();
	merged.extend(overrides.iter().map(|(name, address)| (name.clone(), *address)));
	merged
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ast::{AbsoluteSection, Line, ProgramTree, RelocatableSection};
	use crate::demo::DemoTarget;

	#[test]
	fn empty_program_yields_empty_module() {
		let target = DemoTarget::new();
		let program = ProgramTree::default();
		let module = assemble(&program, &target).unwrap();
		assert!(module.asects.is_empty());
		assert!(module.rsects.is_empty());
	}

	#[test]
	fn absolute_section_labels_are_visible_to_a_later_absolute_section() {
		let target = DemoTarget::new();
		let program = ProgramTree {
			absolute_sections:   vec![
				AbsoluteSection {
					address: 0,
					lines:   vec![Line::LabelDecl { name: "start".into(), entry: true, external: false }],
				},
				AbsoluteSection {
					address: 0x10,
					lines:   vec![Line::Instruction {
						mnemonic: "nop".into(),
						args: vec![],
						location: None,
					}],
				},
			],
			relocatable_sections: vec![],
			template_sections:   vec![],
		};
		let module = assemble(&program, &target).unwrap();
		assert_eq!(module.asects.len(), 2);
		assert_eq!(module.asects[0].ents.get("start"), Some(&0));
	}

	#[test]
	fn branch_past_255_widens_during_resolution() {
		let target = DemoTarget::new();
		let program = ProgramTree {
			absolute_sections:   vec![AbsoluteSection {
				address: 0,
				lines:   vec![
					Line::Conditional {
						conditions: vec![crate::ast::Condition {
							lines:       vec![],
							branch_mnemonic: "beq".into(),
							conjunction: None,
							location:    None,
						}],
						then_lines: vec![Line::Instruction { mnemonic: "ds".into(), args: vec!["300".into()], location: None }],
						else_lines: vec![],
					},
					Line::LabelDecl { name: "tail".into(), entry: false, external: false },
				],
			}],
			relocatable_sections: vec![],
			template_sections:   vec![],
		};
		let module = assemble(&program, &target).unwrap();
		assert_eq!(module.asects.len(), 1);
		assert!(module.asects[0].data.len() > 300);
	}

	#[test]
	fn relocatable_section_does_not_see_another_relocatable_sections_labels() {
		let target = DemoTarget::new();
		let program = ProgramTree {
			absolute_sections:   vec![],
			relocatable_sections: vec![
				RelocatableSection {
					name:  "A".into(),
					lines: vec![Line::LabelDecl { name: "only_in_a".into(), entry: false, external: false }],
				},
				RelocatableSection {
					name:  "B".into(),
					lines: vec![Line::Instruction { mnemonic: "nop".into(), args: vec![], location: None }],
				},
			],
			template_sections:   vec![],
		};
		assert!(assemble(&program, &target).is_ok());
	}
}
