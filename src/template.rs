//! The template evaluator (`spec.md` §4.1): computes field offsets for a record template.
//! Emits no bytes; a `TemplateError` is raised on any disallowed construct.

use flexstr::SharedStr;

use crate::ast::{Line, TemplateSection};
use crate::error::AssemblyError;
use crate::location::CodeLocation;
use crate::target::{InstructionRef, TargetInstructions, TempStorage};
use crate::types::LabelTable;

/// A record-layout definition: field name to byte offset, plus the synthetic `"_"` field holding
/// the template's total size.
#[derive(Debug, Clone)]
pub struct Template {
	/// This template's name, as referenced by template-field expressions.
	pub name:   SharedStr,
	/// Field name to byte offset, including `labels["_"] == total_size`.
	pub labels: LabelTable,
}

impl Template {
	/// Evaluates a `TemplateSection` into its field-offset table.
	///
	/// # Errors
	/// `AssemblyError::TemplateError` if the section declares an external or entry label,
	/// redeclares a label, or uses an instruction mnemonic outside
	/// `target.assembly_directives()`, or contains any line kind other than a label declaration
	/// or an instruction.
	pub fn evaluate(section: &TemplateSection, target: &dyn TargetInstructions) -> Result<Self, AssemblyError> {
		let mut labels = LabelTable::new();
		let mut size: i64 = 0;
		let mut temp_storage = TempStorage::new();

		for line in &section.lines {
			match line {
				Line::LabelDecl { name, entry, external } => {
					if labels.contains_key(name) {
						return Err(template_error(format!("duplicate label \"{name}\" declaration"), None));
					}
					if *external {
						return Err(template_error(format!("external labels not allowed in templates (label \"{name}\")"), None));
					}
					if *entry {
						return Err(template_error(format!("entry labels not allowed in templates (label \"{name}\")"), None));
					}
					labels.insert(name.clone(), size);
				},
				Line::Instruction { mnemonic, args, location } => {
					if !target.assembly_directives().contains(mnemonic) {
						return Err(template_error(
							format!("mnemonic \"{mnemonic}\" is not an assembly directive allowed in templates"),
							location.clone(),
						));
					}
					let instruction = InstructionRef {
						mnemonic: mnemonic.clone(),
						args: args.clone(),
						location: location.clone().unwrap_or_else(CodeLocation::synthetic),
					};
					let segments = target.assemble_instruction(&instruction, &mut temp_storage)?;
					size += segments.iter().map(|segment| segment.size() as i64).sum::<i64>();
				},
				other => return Err(template_error(format!("{} is not allowed in a template section", line_kind_name(other)), None)),
			}
		}

		labels.insert("_".into(), size);
		Ok(Self { name: section.name.clone(), labels })
	}
}

fn template_error(reason: impl Into<flexstr::SharedStr>, location: Option<CodeLocation>) -> AssemblyError {
	AssemblyError::TemplateError { reason: reason.into(), location: location.unwrap_or_else(CodeLocation::synthetic) }
}

fn line_kind_name(line: &Line) -> &'static str {
	match line {
		Line::LabelDecl { .. } => "a label declaration",
		Line::Instruction { .. } => "an instruction",
		Line::Conditional { .. } => "a conditional",
		Line::WhileLoop { .. } => "a while loop",
		Line::UntilLoop { .. } => "an until loop",
		Line::SaveRestore { .. } => "a save/restore statement",
		Line::Break => "a break statement",
		Line::Continue => "a continue statement",
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::demo::DemoTarget;

	#[test]
	fn empty_template_has_only_total_size() {
		let target = DemoTarget::new();
		let section = TemplateSection { name: "T".into(), lines: vec![] };
		let template = Template::evaluate(&section, &target).unwrap();
		assert_eq!(template.labels.get("_"), Some(&0));
	}

	#[test]
	fn label_after_directives_gets_running_offset() {
		let target = DemoTarget::new();
		let section = TemplateSection {
			name:  "T".into(),
			lines: vec![
				Line::Instruction { mnemonic: "ds".into(), args: vec!["2".into()], location: None },
				Line::LabelDecl { name: "mid".into(), entry: false, external: false },
				Line::Instruction { mnemonic: "ds".into(), args: vec!["4".into()], location: None },
			],
		};
		let template = Template::evaluate(&section, &target).unwrap();
		assert_eq!(template.labels.get("mid"), Some(&2));
		assert_eq!(template.labels.get("_"), Some(&6));
	}

	#[test]
	fn external_label_is_rejected() {
		let target = DemoTarget::new();
		let section =
			TemplateSection { name: "T".into(), lines: vec![Line::LabelDecl { name: "x".into(), entry: false, external: true }] };
		assert!(matches!(Template::evaluate(&section, &target), Err(AssemblyError::TemplateError { .. })));
	}

	#[test]
	fn non_directive_mnemonic_is_rejected() {
		let target = DemoTarget::new();
		let section = TemplateSection {
			name:  "T".into(),
			lines: vec![Line::Instruction { mnemonic: "mov".into(), args: vec![], location: None }],
		};
		assert!(matches!(Template::evaluate(&section, &target), Err(AssemblyError::TemplateError { .. })));
	}

	#[test]
	fn structured_construct_is_rejected() {
		let target = DemoTarget::new();
		let section = TemplateSection { name: "T".into(), lines: vec![Line::Break] };
		assert!(matches!(Template::evaluate(&section, &target), Err(AssemblyError::TemplateError { .. })));
	}
}
