//! System prompt assembly
//!
//! The session's system prompt is the base protocol template plus one
//! snippet per installed skill. Skills also contribute globals that the
//! interpreter injects into the shared context at construction.

use serde_json::Value;
use std::collections::HashMap;

/// Base template teaching the model the markdown wire protocol
pub const BASE_SYSTEM_PROMPT: &str = r#"You are an assistant whose replies are rendered by an agentic runtime.

Reply in markdown. Two fence types are special:

- A fence opened with ```tsx agent.run contains TypeScript statements that
  the runtime executes as they stream, in a context shared across your
  whole session. Console output (and any execution error) is fed back to
  you as the next turn's input; when you have nothing left to run, reply
  without code fences to end the exchange.
- A fence opened with ```json agent.data => "<id>" streams its JSON body
  into the client-side target named <id>. The target must already have
  been created in code with StreamedData("<id>"). A new data fence for the
  same id replaces the previous contents entirely.

In code you can call Data(initial) for a reactive record, StreamedData(id)
for a streamed target, and mount({ui, data, streamedData, outputSchema,
callbacks}) to show a UI panel; await the mount's .result to receive what
the user submits. Any other fence type is passed through to the client as
plain markdown.
"#;

/// A skill: a prompt snippet plus globals injected into the interpreter
#[derive(Debug, Clone, Default)]
pub struct SkillDefinition {
    pub name: String,
    /// Snippet appended to the system prompt
    pub prompt: String,
    /// Globals exposed to executed code under their given names
    pub globals: HashMap<String, Value>,
}

impl SkillDefinition {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            globals: HashMap::new(),
        }
    }

    pub fn with_global(mut self, name: impl Into<String>, value: Value) -> Self {
        self.globals.insert(name.into(), value);
        self
    }
}

/// Assembles the base template with per-skill snippets
#[derive(Debug, Clone, Default)]
pub struct SystemPromptBuilder {
    base: Option<String>,
    skills: Vec<SkillDefinition>,
}

impl SystemPromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the base template
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn skill(mut self, skill: SkillDefinition) -> Self {
        self.skills.push(skill);
        self
    }

    pub fn skills(mut self, skills: impl IntoIterator<Item = SkillDefinition>) -> Self {
        self.skills.extend(skills);
        self
    }

    /// Render the full system prompt
    pub fn build(&self) -> String {
        let mut prompt = self
            .base
            .clone()
            .unwrap_or_else(|| BASE_SYSTEM_PROMPT.to_string());
        for skill in &self.skills {
            if skill.prompt.is_empty() {
                continue;
            }
            prompt.push_str("\n## Skill: ");
            prompt.push_str(&skill.name);
            prompt.push('\n');
            prompt.push_str(&skill.prompt);
            prompt.push('\n');
        }
        prompt
    }

    /// Merge all skill globals for interpreter construction
    pub fn collect_globals(&self) -> HashMap<String, Value> {
        let mut globals = HashMap::new();
        for skill in &self.skills {
            for (name, value) in &skill.globals {
                globals.insert(name.clone(), value.clone());
            }
        }
        globals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn base_alone() {
        let prompt = SystemPromptBuilder::new().build();
        assert!(prompt.contains("tsx agent.run"));
        assert!(!prompt.contains("## Skill:"));
    }

    #[test]
    fn skills_append_snippets_and_globals() {
        let builder = SystemPromptBuilder::new()
            .skill(
                SkillDefinition::new("weather", "Use fetchWeather(city) for forecasts.")
                    .with_global("fetchWeatherBase", json!("https://wx.example")),
            )
            .skill(SkillDefinition::new("silent", ""));

        let prompt = builder.build();
        assert!(prompt.contains("## Skill: weather"));
        assert!(prompt.contains("fetchWeather(city)"));
        assert!(!prompt.contains("## Skill: silent"));

        let globals = builder.collect_globals();
        assert_eq!(globals["fetchWeatherBase"], json!("https://wx.example"));
    }
}
