//! The object module builder (`spec.md` §2.8/§4.7 step 4): walks a finalized `Section`'s segments
//! and produces the relocatable record the linker will eventually consume.

use std::collections::{BTreeMap, BTreeSet};

use flexstr::SharedStr;
use serde::{Deserialize, Serialize};

use crate::error::AssemblyError;
use crate::location::CodeLocation;
use crate::section::Section;
use crate::types::{LabelTable, TemplateTable};

/// One section's contribution to the final object module (`spec.md` §3.1/§6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectSectionRecord {
	/// `"$abs"` for absolute sections; the source-supplied name for relocatable ones.
	pub name:           SharedStr,
	/// Load address; `0` for relocatable sections.
	pub address:        i64,
	/// The section's final, fully-resolved byte contents.
	pub data:           Vec<u8>,
	/// Byte offsets requiring low-part relocation.
	pub rell:           BTreeSet<usize>,
	/// `(offset, high_bits)` pairs requiring high-part relocation.
	pub relh:           BTreeSet<(usize, u8)>,
	/// Entry labels exported to the linker, with their byte offsets.
	pub ents:           BTreeMap<SharedStr, i64>,
	/// External symbol name to the low-part offsets that reference it.
	pub xtrl:           BTreeMap<SharedStr, Vec<usize>>,
	/// External symbol name to the `(offset, high_bits)` pairs that reference it.
	pub xtrh:           BTreeMap<SharedStr, Vec<(usize, u8)>>,
	/// Byte offset to the source location that produced the instruction starting there.
	pub code_locations: BTreeMap<usize, CodeLocation>,
}

impl ObjectSectionRecord {
	/// Builds the final object record for a section that has already been lowered and resolved.
	///
	/// # Errors
	/// Any segment's `fill` failing (typically an undefined-label `ResolutionError`) aborts the
	/// whole record.
	pub fn build(section: &Section, labels: &LabelTable, templates: &TemplateTable) -> Result<Self, AssemblyError> {
		let local_labels = section.resolve_labels();
		let ents = local_labels
			.iter()
			.filter(|(name, _)| section.ents.contains(*name))
			.map(|(name, address)| (name.clone(), *address))
			.collect();

		let mut record = Self {
			name: section.name.clone(),
			address: section.address,
			data: Vec::with_capacity(section.total_size()),
			rell: BTreeSet::new(),
			relh: BTreeSet::new(),
			ents,
			xtrl: BTreeMap::new(),
			xtrh: BTreeMap::new(),
			code_locations: section.resolved_code_locations(),
		};

		for slot in &section.segments {
			slot.fill(&mut record, section, labels, templates)?;
		}

		Ok(record)
	}
}

/// The complete lowering result for one program tree (`spec.md` §6.2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectModule {
	/// Absolute sections, sorted by ascending address.
	pub asects: Vec<ObjectSectionRecord>,
	/// Relocatable sections, in the order their sections were assembled.
	pub rsects: Vec<ObjectSectionRecord>,
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ast::AbsoluteSection;
	use crate::demo::DemoTarget;
	use crate::section::Section;

	#[test]
	fn empty_section_yields_empty_record() {
		let target = DemoTarget::new();
		let ast_section = AbsoluteSection { address: 0x100, lines: vec![] };
		let section = Section::lower_absolute(&ast_section, &target).unwrap();
		let record = ObjectSectionRecord::build(&section, &LabelTable::new(), &TemplateTable::new()).unwrap();
		assert_eq!(record.address, 0x100);
		assert_eq!(record.name.as_str(), "$abs");
		assert!(record.data.is_empty());
		assert!(record.rell.is_empty());
	}
}
