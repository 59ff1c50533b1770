//! Class-load transformers for adapting a closed, obfuscated JVM binary:
//! an access-widening transformer driven by a line-oriented rule config,
//! and a deobfuscation remapper driven by an SRG mapping table, chained
//! over the same byte stream for every class a loader defines.

pub mod access;
pub mod classfile;
pub mod mappings;
pub mod opcodes;
pub mod pipeline;
pub mod remap;

#[cfg(test)]
pub(crate) mod testutil;
