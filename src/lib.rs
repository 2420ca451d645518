//! `cocasm`: the lowering half of a structured-assembly toolchain.
//!
//! This crate takes a parsed [`ast::ProgramTree`] — produced by an external lexer/parser, or read
//! straight from JSON by this crate's own CLI front-end — and turns it into a relocatable
//! [`object::ObjectModule`] a linker can consume. Three stages do the work:
//!
//! 1. [`template`] evaluates record-layout definitions into field-offset tables.
//! 2. [`codeblock`] lowers each section's structured `if`/`while`/`until`/`break`/`continue`/
//!    `save`/`restore` constructs into a flat run of target-defined [`segment`]s and synthetic
//!    labels.
//! 3. [`assembler`] resolves varying-length segments (e.g. a branch whose displacement width
//!    depends on how far away its target turns out to be) to a fixed point, then builds the final
//!    per-section [`object::ObjectSectionRecord`]s.
//!
//! None of this crate knows about any particular instruction set: the [`target::TargetInstructions`]
//! trait is the capability boundary a real downstream user implements. [`demo`] is a toy
//! implementation of that trait, used by this crate's own tests and its CLI front-end.
//!
//! Concrete encoding, lexing/parsing, object-file serialization, and CLI diagnostic formatting are
//! all out of scope for the library; only the lowering pipeline in between lives here.

pub mod assembler;
pub mod ast;
pub mod codeblock;
pub mod demo;
pub mod error;
pub mod location;
pub mod object;
pub mod section;
pub mod segment;
pub mod target;
pub mod template;
pub mod types;

#[doc(inline)]
pub use assembler::assemble;
#[doc(inline)]
pub use error::AssemblyError;
#[doc(inline)]
pub use object::ObjectModule;
