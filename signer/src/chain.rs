//! Command chains and the templates they are rendered from.
//!
//! Template syntax: `{input}` and `{output}` are the workspace paths,
//! `{tmp:name}` registers (once) and names an intermediate file, any other
//! `{name}` is looked up in the profile variables. `{{` and `}}` are literal
//! braces. Substituted values are shell-quoted; template text is not.

use std::borrow::Cow;
use std::collections::BTreeMap;

use shared_types::StepTemplate;

use crate::workspace::Workspace;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("chain has no steps")]
    EmptyChain,

    #[error("unterminated placeholder in step {step}")]
    Unterminated { step: usize },

    #[error("invalid placeholder '{{{name}}}' in step {step}")]
    InvalidPlaceholder { step: usize, name: String },

    #[error("unknown placeholder '{{{name}}}' in step {step}")]
    UnknownPlaceholder { step: usize, name: String },
}

/// One shell command line of a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStep {
    command_line: String,
    requires_auth: bool,
}

impl CommandStep {
    pub fn new(command_line: impl Into<String>, requires_auth: bool) -> Self {
        Self {
            command_line: command_line.into(),
            requires_auth,
        }
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn requires_auth(&self) -> bool {
        self.requires_auth
    }
}

/// Ordered steps; index order is execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandChain {
    steps: Vec<CommandStep>,
}

impl CommandChain {
    pub fn new(steps: Vec<CommandStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[CommandStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CommandStep> {
        self.steps.iter()
    }
}

impl FromIterator<CommandStep> for CommandChain {
    fn from_iter<I: IntoIterator<Item = CommandStep>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Placeholder {
    Input,
    Output,
    Tmp(String),
    Var(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Slot(Placeholder),
}

/// Unrendered chain as loaded from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTemplate {
    steps: Vec<StepTemplate>,
}

impl ChainTemplate {
    pub fn new(steps: Vec<StepTemplate>) -> Result<Self, TemplateError> {
        if steps.is_empty() {
            return Err(TemplateError::EmptyChain);
        }
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[StepTemplate] {
        &self.steps
    }

    pub fn interactive_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.requires_auth).count()
    }

    /// Check syntax and that every variable placeholder is defined.
    pub fn validate(&self, vars: &BTreeMap<String, String>) -> Result<(), TemplateError> {
        for (idx, step) in self.steps.iter().enumerate() {
            for segment in parse(&step.command, idx + 1)? {
                if let Segment::Slot(Placeholder::Var(name)) = segment {
                    if !vars.contains_key(&name) {
                        return Err(TemplateError::UnknownPlaceholder {
                            step: idx + 1,
                            name,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Substitute workspace paths and `vars` into every step.
    ///
    /// `{tmp:*}` placeholders register intermediates on `workspace`, so they
    /// are cleaned up with it.
    pub fn render(
        &self,
        workspace: &mut Workspace,
        vars: &BTreeMap<String, String>,
    ) -> Result<CommandChain, TemplateError> {
        let mut steps = Vec::with_capacity(self.steps.len());
        for (idx, step) in self.steps.iter().enumerate() {
            let mut line = String::with_capacity(step.command.len() + 64);
            for segment in parse(&step.command, idx + 1)? {
                match segment {
                    Segment::Literal(text) => line.push_str(&text),
                    Segment::Slot(slot) => {
                        let value: Cow<'_, str> = match &slot {
                            Placeholder::Input => workspace.input_path().to_string_lossy(),
                            Placeholder::Output => workspace.output_path().to_string_lossy(),
                            Placeholder::Tmp(name) => Cow::Owned(
                                workspace
                                    .register_intermediate(name)
                                    .to_string_lossy()
                                    .into_owned(),
                            ),
                            Placeholder::Var(name) => match vars.get(name) {
                                Some(v) => Cow::Borrowed(v.as_str()),
                                None => {
                                    return Err(TemplateError::UnknownPlaceholder {
                                        step: idx + 1,
                                        name: name.clone(),
                                    })
                                }
                            },
                        };
                        line.push_str(&shell_words::quote(&value));
                    }
                }
            }
            steps.push(CommandStep::new(line, step.requires_auth));
        }
        Ok(CommandChain::new(steps))
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn parse(template: &str, step: usize) -> Result<Vec<Segment>, TemplateError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for n in chars.by_ref() {
                    if n == '}' {
                        closed = true;
                        break;
                    }
                    name.push(n);
                }
                if !closed {
                    return Err(TemplateError::Unterminated { step });
                }
                let slot = match name.as_str() {
                    "input" => Placeholder::Input,
                    "output" => Placeholder::Output,
                    other => match other.strip_prefix("tmp:") {
                        Some(tmp) if valid_name(tmp) => Placeholder::Tmp(tmp.to_string()),
                        None if valid_name(other) => Placeholder::Var(other.to_string()),
                        _ => return Err(TemplateError::InvalidPlaceholder { step, name }),
                    },
                };
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Slot(slot));
            }
            other => literal.push(other),
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}
