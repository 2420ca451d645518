//! Small shared type aliases used across the lowering pipeline.

use std::collections::BTreeMap;

use flexstr::SharedStr;

/// A byte address or byte count. Signed so that relative/negative offsets (e.g. branch
/// displacements) can be represented with the same type before they're narrowed to their final
/// encoded width by a target.
pub type MemoryAddress = i64;

/// Label name to address. A `BTreeMap` rather than a `HashMap` so that iterating it (as the
/// varying-length resolver and object builder both do) is deterministic, which `spec.md` §5
/// requires of the pipeline as a whole.
pub type LabelTable = BTreeMap<SharedStr, MemoryAddress>;

/// Template name to that template's own `name -> offset` field table (plus the synthetic `"_"`
/// total-size field).
pub type TemplateTable = BTreeMap<SharedStr, LabelTable>;
