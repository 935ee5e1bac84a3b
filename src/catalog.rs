// src/catalog.rs
use regex::Regex;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

use crate::errors::{EvalError, Result};
use crate::models::{Agent, AssertionKind, ModelConfig, Scenario, Skill, TargetGroup};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("placeholder pattern is valid"));

/// Substitutes `{{key}}` placeholders with string values from `data`.
/// Placeholders without a matching key are left as they are.
pub fn render_template(template: &str, data: &serde_json::Value) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            match data.get(key) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(serde_json::Value::Number(n)) => n.to_string(),
                Some(serde_json::Value::Bool(b)) => b.to_string(),
                _ => caps[0].to_string(),
            }
        })
        .to_string()
}

/// Resolves catalog entities by id. The runner only ever reads through this.
pub trait EntityLookup: Send + Sync {
    fn scenario(&self, id: &str) -> Option<Scenario>;
    fn skill(&self, id: &str) -> Option<Skill>;
    fn agent(&self, id: &str) -> Option<Agent>;
    fn target_group(&self, id: &str) -> Option<TargetGroup>;
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    skills: Vec<Skill>,
    #[serde(default)]
    agents: Vec<Agent>,
    #[serde(default)]
    scenarios: Vec<Scenario>,
    #[serde(default)]
    target_groups: Vec<TargetGroup>,
}

/// Skills, scenarios and agents of one project, kept in file order.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    project_id: Option<String>,
    skills: Vec<Skill>,
    agents: Vec<Agent>,
    scenarios: Vec<Scenario>,
    target_groups: Vec<TargetGroup>,
    skill_index: HashMap<String, usize>,
    agent_index: HashMap<String, usize>,
    scenario_index: HashMap<String, usize>,
    group_index: HashMap<String, usize>,
}

impl Catalog {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let file: CatalogFile = toml::from_str(raw)?;
        Self::build(
            file.project_id,
            file.skills,
            file.agents,
            file.scenarios,
            file.target_groups,
        )
    }

    pub fn new(skills: Vec<Skill>, agents: Vec<Agent>, scenarios: Vec<Scenario>) -> Result<Self> {
        Self::build(None, skills, agents, scenarios, Vec::new())
    }

    pub fn with_target_groups(mut self, groups: Vec<TargetGroup>) -> Result<Self> {
        self.group_index = validate_groups(&groups, &self.agent_index)?;
        self.target_groups = groups;
        Ok(self)
    }

    fn build(
        project_id: Option<String>,
        skills: Vec<Skill>,
        agents: Vec<Agent>,
        scenarios: Vec<Scenario>,
        target_groups: Vec<TargetGroup>,
    ) -> Result<Self> {
        let skill_index = index_by_id("skill", skills.iter().map(|s| s.id.as_str()))?;
        let agent_index = index_by_id("agent", agents.iter().map(|a| a.id.as_str()))?;
        let scenario_index = index_by_id("scenario", scenarios.iter().map(|s| s.id.as_str()))?;
        let group_index = validate_groups(&target_groups, &agent_index)?;

        for agent in &agents {
            if let Some(model) = &agent.model {
                validate_model(&format!("agent '{}'", agent.id), model)?;
            }
        }

        for scenario in &scenarios {
            if let Some(skill_id) = &scenario.skill_id {
                if !skill_index.contains_key(skill_id) {
                    return Err(EvalError::InvalidCatalog(format!(
                        "scenario '{}' references unknown skill '{}'",
                        scenario.id, skill_id
                    )));
                }
            }

            let mut seen = HashSet::new();
            for assertion in &scenario.assertions {
                if !seen.insert(assertion.id.as_str()) {
                    return Err(EvalError::InvalidCatalog(format!(
                        "scenario '{}' has duplicate assertion id '{}'",
                        scenario.id, assertion.id
                    )));
                }
                if let AssertionKind::ContentMatches { pattern, .. } = &assertion.check {
                    Regex::new(pattern).map_err(|e| {
                        EvalError::InvalidCatalog(format!(
                            "assertion '{}' in scenario '{}' has an invalid pattern: {}",
                            assertion.id, scenario.id, e
                        ))
                    })?;
                }
            }
        }

        Ok(Self {
            project_id,
            skills,
            agents,
            scenarios,
            target_groups,
            skill_index,
            agent_index,
            scenario_index,
            group_index,
        })
    }

    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    pub fn skills(&self) -> &[Skill] {
        &self.skills
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn scenarios(&self) -> &[Scenario] {
        &self.scenarios
    }

    pub fn target_groups(&self) -> &[TargetGroup] {
        &self.target_groups
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty() && self.agents.is_empty() && self.scenarios.is_empty()
    }
}

impl EntityLookup for Catalog {
    fn scenario(&self, id: &str) -> Option<Scenario> {
        self.scenario_index.get(id).map(|&i| self.scenarios[i].clone())
    }

    fn skill(&self, id: &str) -> Option<Skill> {
        self.skill_index.get(id).map(|&i| self.skills[i].clone())
    }

    fn agent(&self, id: &str) -> Option<Agent> {
        self.agent_index.get(id).map(|&i| self.agents[i].clone())
    }

    fn target_group(&self, id: &str) -> Option<TargetGroup> {
        self.group_index.get(id).map(|&i| self.target_groups[i].clone())
    }
}

fn validate_groups(
    groups: &[TargetGroup],
    agent_index: &HashMap<String, usize>,
) -> Result<HashMap<String, usize>> {
    let group_index = index_by_id("target group", groups.iter().map(|g| g.id.as_str()))?;
    for group in groups {
        if group.agent_ids.is_empty() {
            return Err(EvalError::InvalidCatalog(format!(
                "target group '{}' has no agents",
                group.id
            )));
        }
        let missing = group.agent_ids.iter().find(|id| !agent_index.contains_key(*id));
        if let Some(missing) = missing {
            return Err(EvalError::InvalidCatalog(format!(
                "target group '{}' references unknown agent '{}'",
                group.id, missing
            )));
        }
    }
    Ok(group_index)
}

fn index_by_id<'a>(
    kind: &str,
    ids: impl Iterator<Item = &'a str>,
) -> Result<HashMap<String, usize>> {
    let mut index = HashMap::new();
    for (position, id) in ids.enumerate() {
        if id.trim().is_empty() {
            return Err(EvalError::InvalidCatalog(format!(
                "{} at position {} has an empty id",
                kind, position
            )));
        }
        if index.insert(id.to_string(), position).is_some() {
            return Err(EvalError::InvalidCatalog(format!("duplicate {} id '{}'", kind, id)));
        }
    }
    Ok(index)
}

pub(crate) fn validate_model(owner: &str, model: &ModelConfig) -> Result<()> {
    if !(0.0..=2.0).contains(&model.temperature) {
        return Err(EvalError::InvalidCatalog(format!(
            "{} has temperature {} outside 0.0..=2.0",
            owner, model.temperature
        )));
    }
    if model.max_tokens == 0 {
        return Err(EvalError::InvalidCatalog(format!("{} has max_tokens = 0", owner)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AgentKind;
    use serde_json::json;

    const CATALOG: &str = r#"
project_id = "demo"

[[skills]]
id = "rust-style"
name = "Rust style guide"
instructions = "Prefer iterators."

[[agents]]
id = "claude"
name = "Claude CLI"
kind = { type = "cli", command = "claude", args = ["-p"] }

[[agents]]
id = "gpt"
name = "GPT"
kind = { type = "model" }
model = { provider = "openai", model = "gpt-4o", temperature = 0.2, max_tokens = 2048 }

[[scenarios]]
id = "add-fn"
name = "Add a function"
skill_id = "rust-style"
trigger_prompt = "Add a {{name}} function"
expected_files = ["src/lib.rs"]
metadata = { name = "sum" }

[[scenarios.assertions]]
id = "exists"
name = "lib exists"
check = { kind = "file_exists", path = "src/lib.rs" }

[[scenarios.assertions]]
id = "has-fn"
name = "defines sum"
check = { kind = "content_matches", path = "src/lib.rs", pattern = "fn sum\\(" }
"#;

    #[test]
    fn test_parse_catalog() {
        let catalog = Catalog::from_toml(CATALOG).unwrap();

        assert_eq!(catalog.project_id(), Some("demo"));
        assert_eq!(catalog.skills().len(), 1);
        assert_eq!(catalog.agents().len(), 2);

        let claude = catalog.agent("claude").unwrap();
        assert_eq!(
            claude.kind,
            AgentKind::Cli {
                command: "claude".to_string(),
                args: vec!["-p".to_string()]
            }
        );
        assert!(claude.model.is_none());

        let gpt = catalog.agent("gpt").unwrap();
        assert_eq!(gpt.model.unwrap().model, "gpt-4o");

        let scenario = catalog.scenario("add-fn").unwrap();
        assert_eq!(scenario.assertions.len(), 2);
        assert_eq!(scenario.rendered_prompt(), "Add a sum function");
        assert!(catalog.scenario("missing").is_none());
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let raw = r#"
[[agents]]
id = "a"
name = "one"
kind = { type = "model" }

[[agents]]
id = "a"
name = "two"
kind = { type = "model" }
"#;
        let err = Catalog::from_toml(raw).unwrap_err();
        assert!(matches!(
            err,
            EvalError::InvalidCatalog(msg) if msg.contains("duplicate agent id 'a'")
        ));
    }

    #[test]
    fn test_unknown_skill_reference_is_rejected() {
        let raw = r#"
[[scenarios]]
id = "s"
name = "s"
skill_id = "ghost"
trigger_prompt = "go"
"#;
        let err = Catalog::from_toml(raw).unwrap_err();
        assert!(matches!(err, EvalError::InvalidCatalog(msg) if msg.contains("ghost")));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let raw = r#"
[[scenarios]]
id = "s"
name = "s"
trigger_prompt = "go"

[[scenarios.assertions]]
id = "bad"
name = "bad"
check = { kind = "content_matches", path = "a.txt", pattern = "(unclosed" }
"#;
        assert!(matches!(Catalog::from_toml(raw), Err(EvalError::InvalidCatalog(_))));
    }

    #[test]
    fn test_out_of_range_temperature_is_rejected() {
        let raw = r#"
[[agents]]
id = "hot"
name = "hot"
kind = { type = "model" }
model = { provider = "openai", model = "gpt-4o", temperature = 3.5 }
"#;
        assert!(matches!(Catalog::from_toml(raw), Err(EvalError::InvalidCatalog(_))));
    }

    #[test]
    fn test_target_groups() {
        let raw = format!(
            "{}\n{}",
            CATALOG,
            r#"
[[target_groups]]
id = "all"
name = "All agents"
agent_ids = ["claude", "gpt"]
"#
        );
        let catalog = Catalog::from_toml(&raw).unwrap();
        assert_eq!(catalog.target_groups().len(), 1);
        let group = catalog.target_group("all").unwrap();
        assert_eq!(group.agent_ids, vec!["claude".to_string(), "gpt".to_string()]);
        assert!(catalog.target_group("none").is_none());
    }

    #[test]
    fn test_target_group_with_unknown_agent_is_rejected() {
        let raw = r#"
[[agents]]
id = "a"
name = "a"
kind = { type = "model" }

[[target_groups]]
id = "g"
name = "g"
agent_ids = ["a", "ghost"]
"#;
        let err = Catalog::from_toml(raw).unwrap_err();
        assert!(matches!(
            err,
            EvalError::InvalidCatalog(msg) if msg.contains("unknown agent 'ghost'")
        ));

        let empty = r#"
[[target_groups]]
id = "g"
name = "g"
agent_ids = []
"#;
        assert!(matches!(Catalog::from_toml(empty), Err(EvalError::InvalidCatalog(_))));
    }

    #[test]
    fn test_render_template_keeps_unknown_placeholders() {
        let data = json!({ "lang": "Rust", "count": 3 });
        assert_eq!(
            render_template("Write {{ count }} {{lang}} tests for {{module}}", &data),
            "Write 3 Rust tests for {{module}}"
        );
    }
}
