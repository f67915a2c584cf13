// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! System prompt assembly.
//!
//! The core does not interpret instruction markdown — it concatenates the
//! aggregated instruction files and the (sub-)agent's own system prompt
//! into one preamble, in that order.

/// Build the system prompt preamble for a run.
///
/// `instructions` is the concatenated instruction-file text (may be empty);
/// `agent_prompt` is the agent definition's system prompt, if the run
/// belongs to a sub-agent or a custom profile.
pub fn system_preamble(instructions: &str, agent_prompt: Option<&str>) -> Option<String> {
    let mut sections: Vec<&str> = Vec::new();
    if let Some(p) = agent_prompt {
        let p = p.trim();
        if !p.is_empty() {
            sections.push(p);
        }
    }
    let instructions = instructions.trim();
    if !instructions.is_empty() {
        sections.push(instructions);
    }
    if sections.is_empty() {
        None
    } else {
        Some(sections.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_inputs_yield_none() {
        assert_eq!(system_preamble("", None), None);
        assert_eq!(system_preamble("  \n", Some("   ")), None);
    }

    #[test]
    fn agent_prompt_comes_first() {
        let preamble = system_preamble("project rules", Some("You are a reviewer.")).unwrap();
        let agent_pos = preamble.find("reviewer").unwrap();
        let rules_pos = preamble.find("project rules").unwrap();
        assert!(agent_pos < rules_pos);
    }

    #[test]
    fn instructions_alone_are_kept() {
        assert_eq!(
            system_preamble("only rules", None).as_deref(),
            Some("only rules")
        );
    }
}
