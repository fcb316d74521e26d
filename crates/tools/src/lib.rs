//! Auxiliary toolsets for agents: skills and code execution.

pub mod code_mode;
pub mod skill_toolset;

pub use {
    code_mode::{CodeModeConfig, CodeModeToolset},
    skill_toolset::SkillsToolset,
};
