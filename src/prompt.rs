//! Prompt assembly.
//!
//! Each [`Mode`] maps to a [`PromptTemplate`] held by a
//! [`TemplateRegistry`]. Templates are plain minijinja strings with three
//! slots (`topic`, `context`, `label`) and live in TOML so they can be
//! edited without touching pipeline code. The built-in set is compiled in
//! from `templates/default.toml`; a user file may override any subset of
//! modes.
//!
//! Rendering uses strict undefined behaviour: a template that references
//! anything other than the three slots fails instead of leaving a hole in
//! the prompt.

use minijinja::{context, Environment, UndefinedBehavior};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::completion::ChatMessage;
use crate::error::{Error, Result};

const BUILTIN_TEMPLATES: &str = include_str!("../templates/default.toml");

/// Generation mode, selecting one prompt template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Free-text question answered from the retrieved context.
    Question,
    JobDescription,
    /// Case study including the implemented solution and its results.
    CaseStudy,
    /// Case study for candidate evaluation; the solution is withheld.
    CaseStudyAssessment,
}

impl Mode {
    pub const ALL: [Mode; 4] = [
        Mode::Question,
        Mode::JobDescription,
        Mode::CaseStudy,
        Mode::CaseStudyAssessment,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Question => "question",
            Mode::JobDescription => "job-description",
            Mode::CaseStudy => "case-study",
            Mode::CaseStudyAssessment => "case-study-assessment",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = Error;

    /// Accepts canonical ids and UI labels such as `"Job Description"`.
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s
            .trim()
            .to_lowercase()
            .replace([' ', '_'], "-");

        match normalized.as_str() {
            "question" | "free-question" | "ask" => Ok(Mode::Question),
            "job-description" | "jd" => Ok(Mode::JobDescription),
            "case-study" => Ok(Mode::CaseStudy),
            "case-study-assessment" => Ok(Mode::CaseStudyAssessment),
            _ => Err(Error::InvalidMode(s.to_string())),
        }
    }
}

/// Template strings for one mode.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PromptTemplate {
    pub label: String,
    pub system: String,
    #[serde(default)]
    pub user: Option<String>,
}

/// Partial template as it may appear in a user override file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TemplateOverride {
    label: Option<String>,
    system: Option<String>,
    user: Option<String>,
}

/// A rendered prompt, ready for the completion client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub mode: Mode,
    pub messages: Vec<ChatMessage>,
}

impl Prompt {
    /// All message contents joined by a blank line.
    pub fn text(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Mapping from [`Mode`] to its template, compiled for rendering.
pub struct TemplateRegistry {
    templates: BTreeMap<Mode, PromptTemplate>,
    env: Environment<'static>,
}

impl fmt::Debug for TemplateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateRegistry")
            .field("templates", &self.templates)
            .finish()
    }
}

impl TemplateRegistry {
    /// The templates shipped with the binary.
    pub fn builtin() -> Result<Self> {
        let raw = parse_template_file(BUILTIN_TEMPLATES, "built-in templates")?;
        let mut templates = BTreeMap::new();
        for (mode, entry) in raw {
            let template = PromptTemplate {
                label: entry.label.unwrap_or_default(),
                system: entry.system.ok_or_else(|| {
                    Error::Config(format!("built-in template '{}' has no system prompt", mode))
                })?,
                user: entry.user,
            };
            templates.insert(mode, template);
        }
        Self::from_templates(templates)
    }

    /// Built-in templates overlaid with the tables found in `path`.
    ///
    /// Fields left out of an override table keep their built-in value.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read templates {}: {}", path.display(), e))
        })?;
        let overrides = parse_template_file(&content, &path.display().to_string())?;

        let mut templates = Self::builtin()?.templates;
        for (mode, entry) in overrides {
            let template = templates.get_mut(&mode).ok_or_else(|| {
                Error::Config(format!("no built-in template for mode '{}'", mode))
            })?;
            if let Some(label) = entry.label {
                template.label = label;
            }
            if let Some(system) = entry.system {
                template.system = system;
            }
            if let Some(user) = entry.user {
                template.user = (!user.trim().is_empty()).then_some(user);
            }
        }
        Self::from_templates(templates)
    }

    /// Load from `path` when given, otherwise the built-in set.
    pub fn from_path(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Self::builtin(),
        }
    }

    /// Compile `templates` into a registry.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when a mode is missing or a template does not parse.
    pub fn from_templates(templates: BTreeMap<Mode, PromptTemplate>) -> Result<Self> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);

        for mode in Mode::ALL {
            let template = templates.get(&mode).ok_or_else(|| {
                Error::Config(format!("no template defined for mode '{}'", mode))
            })?;
            env.add_template_owned(system_name(mode), template.system.clone())
                .map_err(|e| Error::Config(format!("template '{}': {}", mode, e)))?;
            if let Some(user) = &template.user {
                env.add_template_owned(user_name(mode), user.clone())
                    .map_err(|e| Error::Config(format!("template '{}': {}", mode, e)))?;
            }
        }

        Ok(Self { templates, env })
    }

    pub fn get(&self, mode: Mode) -> Option<&PromptTemplate> {
        self.templates.get(&mode)
    }

    pub fn templates(&self) -> impl Iterator<Item = (Mode, &PromptTemplate)> {
        self.templates.iter().map(|(mode, t)| (*mode, t))
    }

    /// Substitute `topic` and `context` into the template for `mode`.
    ///
    /// Produces one system message, plus a user message when the template
    /// defines one.
    pub fn render(&self, mode: Mode, topic: &str, context: &str) -> Result<Prompt> {
        let template = self
            .templates
            .get(&mode)
            .ok_or_else(|| Error::InvalidMode(mode.to_string()))?;
        let ctx = context! {
            topic => topic,
            context => context,
            label => template.label.as_str(),
        };

        let mut messages = vec![ChatMessage::system(self.render_named(&system_name(mode), &ctx)?)];
        if template.user.is_some() {
            messages.push(ChatMessage::user(self.render_named(&user_name(mode), &ctx)?));
        }

        Ok(Prompt { mode, messages })
    }

    /// Parse `mode` and render; an unknown mode fails before any rendering.
    pub fn render_str(&self, mode: &str, topic: &str, context: &str) -> Result<Prompt> {
        self.render(mode.parse()?, topic, context)
    }

    fn render_named(&self, name: &str, ctx: &minijinja::Value) -> Result<String> {
        self.env
            .get_template(name)
            .and_then(|t| t.render(ctx))
            .map_err(|e| Error::Template(format!("{}: {}", name, e)))
    }
}

fn system_name(mode: Mode) -> String {
    format!("{}.system", mode)
}

fn user_name(mode: Mode) -> String {
    format!("{}.user", mode)
}

fn parse_template_file(content: &str, origin: &str) -> Result<Vec<(Mode, TemplateOverride)>> {
    let tables: HashMap<String, TemplateOverride> = toml::from_str(content)
        .map_err(|e| Error::Config(format!("failed to parse {}: {}", origin, e)))?;

    tables
        .into_iter()
        .map(|(key, entry)| {
            let mode = Mode::from_str(&key).map_err(|_| {
                Error::Config(format!("{}: unknown mode '{}'", origin, key))
            })?;
            Ok((mode, entry))
        })
        .collect()
}

/// Print the available modes and their labels.
pub fn run_templates(registry: &TemplateRegistry) {
    println!("{:<24} {:<12} MESSAGES", "MODE", "LABEL");
    for (mode, template) in registry.templates() {
        let messages = if template.user.is_some() {
            "system + user"
        } else {
            "system"
        };
        println!("{:<24} {:<12} {}", mode, template.label, messages);
    }
}
