//! Agent-type tag → processor constructor. Built once at orchestrator
//! construction; every lookup hands out a fresh instance so per-connection
//! processor state is never shared. Unknown tags fall through to
//! [`DefaultProcessor`].

use std::collections::BTreeMap;

use super::claude::ClaudeProcessor;
use super::codex::CodexProcessor;
use super::{AgentProcessor, DefaultProcessor};

type Constructor = fn() -> Box<dyn AgentProcessor>;

fn make_claude() -> Box<dyn AgentProcessor> {
    Box::new(ClaudeProcessor::default())
}

fn make_codex() -> Box<dyn AgentProcessor> {
    Box::new(CodexProcessor::default())
}

#[derive(Debug)]
pub struct ProcessorRegistry {
    constructors: BTreeMap<&'static str, Constructor>,
}

impl ProcessorRegistry {
    /// The built-in adapter set.
    pub fn builtin() -> Self {
        let mut constructors: BTreeMap<&'static str, Constructor> = BTreeMap::new();
        constructors.insert("claude", make_claude);
        constructors.insert("codex", make_codex);
        ProcessorRegistry { constructors }
    }

    /// Fresh processor for the given type tag; the Default Processor when
    /// the tag is unknown.
    pub fn create(&self, agent_type: &str) -> Box<dyn AgentProcessor> {
        match self.constructors.get(agent_type) {
            Some(ctor) => ctor(),
            None => Box::new(DefaultProcessor),
        }
    }
}
