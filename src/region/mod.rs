//! Code-region domain types.
//!
//! A code region identifies one tunable location emitted by the compiler.
//! Full identity is the whole attribute tuple; the `(hash, region type,
//! pass name)` triple additionally serves as the equivalence-class key,
//! deliberately ignoring name/function/location so structurally identical
//! regions in different files can share a configuration.

mod param;
mod task;

pub use param::{ParamAssignment, ParamDomain, ParamValue, TunableParam};
pub use task::{Task, TaskMap};

use std::fmt;

use serde::{Deserialize, Serialize};

/// The kinds of code region the compiler can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegionType {
    #[serde(rename = "loop")]
    Loop,
    #[serde(rename = "callsite")]
    CallSite,
    #[serde(rename = "machine_basic_block")]
    MachineBasicBlock,
    /// Whole-module region ("other" on the wire).
    #[serde(rename = "other")]
    Other,
    #[serde(rename = "llvm-param")]
    LlvmParam,
    #[serde(rename = "program-param")]
    ProgramParam,
}

impl RegionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegionType::Loop => "loop",
            RegionType::CallSite => "callsite",
            RegionType::MachineBasicBlock => "machine_basic_block",
            RegionType::Other => "other",
            RegionType::LlvmParam => "llvm-param",
            RegionType::ProgramParam => "program-param",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "loop" => Some(RegionType::Loop),
            "callsite" => Some(RegionType::CallSite),
            "machine_basic_block" => Some(RegionType::MachineBasicBlock),
            "other" | "module" => Some(RegionType::Other),
            "llvm-param" => Some(RegionType::LlvmParam),
            "program-param" => Some(RegionType::ProgramParam),
            _ => None,
        }
    }

    /// True for the program-global parameter kind, which is deduplicated
    /// across files without consulting stored optimal configurations.
    pub fn is_program_param(&self) -> bool {
        matches!(self, RegionType::ProgramParam)
    }
}

impl fmt::Display for RegionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source location from debug info; present only when the program was
/// compiled with debug metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLoc {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// One tunable location in a program.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeRegion {
    pub name: String,
    pub pass_name: String,
    pub func_name: String,
    pub region_type: RegionType,
    /// IR-structural content hash, stable across otherwise-identical
    /// occurrences of the same region.
    pub hash: String,
    /// Ordinal distinguishing duplicate occurrences of an otherwise
    /// identical region (e.g. the same header included by several
    /// translation units).
    pub invocation: u32,
    pub source_loc: Option<SourceLoc>,
}

impl CodeRegion {
    pub fn new(
        name: impl Into<String>,
        pass_name: impl Into<String>,
        func_name: impl Into<String>,
        region_type: RegionType,
        hash: impl Into<String>,
        invocation: u32,
    ) -> Self {
        Self {
            name: name.into(),
            pass_name: pass_name.into(),
            func_name: func_name.into(),
            region_type,
            hash: hash.into(),
            invocation,
            source_loc: None,
        }
    }

    pub fn with_source_loc(mut self, loc: SourceLoc) -> Self {
        self.source_loc = Some(loc);
        self
    }

    /// The equivalence-class key: regions sharing it are interchangeable
    /// for configuration reuse.
    pub fn class_key(&self) -> (&str, RegionType, &str) {
        (&self.hash, self.region_type, &self.pass_name)
    }
}
