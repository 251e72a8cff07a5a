//! Policy prompt registry.
//!
//! Prompts are opaque policy strings keyed by `(agent type, version)`;
//! authoring happens upstream. The worker ships a built-in `v1` set and
//! deployments may layer replacements on top.

use std::collections::HashMap;

use sh_domain::AgentType;

const TRANSCRIPT_V1: &str = include_str!("prompts/transcript_v1.txt");
const CARDS_V1: &str = include_str!("prompts/cards_v1.txt");
const FACTS_V1: &str = include_str!("prompts/facts_v1.txt");

pub struct PromptLibrary {
    prompts: HashMap<(AgentType, String), String>,
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptLibrary {
    /// The built-in `v1` policy set.
    pub fn builtin() -> Self {
        let mut prompts = HashMap::new();
        prompts.insert(
            (AgentType::Transcript, "v1".to_owned()),
            TRANSCRIPT_V1.to_owned(),
        );
        prompts.insert((AgentType::Cards, "v1".to_owned()), CARDS_V1.to_owned());
        prompts.insert((AgentType::Facts, "v1".to_owned()), FACTS_V1.to_owned());
        Self { prompts }
    }

    /// Register or replace a policy string.
    pub fn insert(&mut self, agent_type: AgentType, version: &str, prompt: String) {
        self.prompts.insert((agent_type, version.to_owned()), prompt);
    }

    /// Look up the policy for `(agent_type, version)`, falling back to
    /// the agent's `v1` policy when the version is unknown.
    pub fn policy(&self, agent_type: AgentType, version: &str) -> &str {
        self.prompts
            .get(&(agent_type, version.to_owned()))
            .or_else(|| self.prompts.get(&(agent_type, "v1".to_owned())))
            .map(String::as_str)
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_covers_all_agent_types() {
        let lib = PromptLibrary::builtin();
        for t in AgentType::ALL {
            assert!(!lib.policy(t, "v1").is_empty(), "missing policy for {t}");
        }
    }

    #[test]
    fn unknown_version_falls_back_to_v1() {
        let lib = PromptLibrary::builtin();
        assert_eq!(lib.policy(AgentType::Cards, "v99"), lib.policy(AgentType::Cards, "v1"));
    }

    #[test]
    fn insert_overrides() {
        let mut lib = PromptLibrary::builtin();
        lib.insert(AgentType::Facts, "v2", "custom".into());
        assert_eq!(lib.policy(AgentType::Facts, "v2"), "custom");
    }
}
