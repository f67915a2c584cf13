// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod agents;
mod instructions;

pub use agents::{
    bundled_agents, discover_agents, AgentRegistry, AgentSource, SubAgentDefinition,
};
pub use instructions::{concat_instructions, discover_instruction_files, instruction_preamble};
