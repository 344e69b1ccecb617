//! Sequential multi-agent workflows.
//!
//! Each step fills its prompt template with the running context, calls a
//! model, and appends its output to the context seen by the next step.
//! Steps never overlap: step `i + 1` starts only after step `i` returned.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::models::DEFAULT_MODEL;

/// Something that can turn a prompt into text using a named model.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, model: &str, prompt: &str) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStep {
    pub name: String,
    pub model: String,
    /// Supports `{task}` and `{context}` placeholders.
    pub template: String,
}

impl PipelineStep {
    pub fn new(name: impl Into<String>, model: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            template: template.into(),
        }
    }
}

/// Reported to the caller after every completed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutput {
    pub index: usize,
    pub name: String,
    pub output: String,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("workflow has no steps")]
    EmptyWorkflow,
    #[error("step {step} ({name}) failed: {source}", step = .index + 1)]
    Step {
        index: usize,
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Run `steps` in order and return the last step's output.
///
/// The first failing step aborts the run; nothing after it is invoked and
/// no partial result is returned.
pub async fn run_sequential_pipeline<X, F>(
    executor: &X,
    steps: &[PipelineStep],
    task: &str,
    mut on_step: F,
) -> Result<String, PipelineError>
where
    X: StepExecutor + ?Sized,
    F: FnMut(&StepOutput),
{
    if steps.is_empty() {
        return Err(PipelineError::EmptyWorkflow);
    }

    let mut context = format!("Task: {}", task);
    let mut last = String::new();

    for (index, step) in steps.iter().enumerate() {
        let prompt = render_template(&step.template, task, &context);
        info!("running step {} ({}) on {}", index + 1, step.name, step.model);

        let output = executor
            .execute(&step.model, &prompt)
            .await
            .map_err(|source| {
                warn!("step {} ({}) failed: {:#}", index + 1, step.name, source);
                PipelineError::Step {
                    index,
                    name: step.name.clone(),
                    source,
                }
            })?;

        context.push_str(&format!("\n\n### {}\n{}", step.name, output));
        on_step(&StepOutput {
            index,
            name: step.name.clone(),
            output: output.clone(),
        });
        last = output;
    }

    Ok(last)
}

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{([a-z_]+)\}").expect("placeholder pattern is valid"))
}

/// Substitute `{task}` and `{context}`; anything else is left verbatim.
pub fn render_template(template: &str, task: &str, context: &str) -> String {
    placeholder()
        .replace_all(template, |caps: &Captures| match &caps[1] {
            "task" => task.to_string(),
            "context" => context.to_string(),
            _ => caps[0].to_string(),
        })
        .into_owned()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuperagentModels {
    pub researcher: String,
    pub writer: String,
    pub editor: String,
}

impl Default for SuperagentModels {
    fn default() -> Self {
        Self {
            researcher: DEFAULT_MODEL.to_string(),
            writer: DEFAULT_MODEL.to_string(),
            editor: "llama-3.1-8b-instant".to_string(),
        }
    }
}

const RESEARCHER_TEMPLATE: &str = "You are a meticulous research analyst. \
Collect the key facts, constraints and open questions needed to address the task. \
Answer with concise bullet points only.\n\n{context}";

const WRITER_TEMPLATE: &str = "You are a skilled writer. \
Using the research notes below, write a complete, well-structured answer to the task.\n\n{context}";

const EDITOR_TEMPLATE: &str = "You are an exacting editor. \
Revise the draft below for accuracy and clarity, keeping the author's intent. \
Reply with the final text only.\n\n{context}";

/// The research, write, edit workflow behind superagent mode.
pub fn superagent_workflow(models: &SuperagentModels) -> Vec<PipelineStep> {
    vec![
        PipelineStep::new("Researcher", &models.researcher, RESEARCHER_TEMPLATE),
        PipelineStep::new("Writer", &models.writer, WRITER_TEMPLATE),
        PipelineStep::new("Editor", &models.editor, EDITOR_TEMPLATE),
    ]
}
