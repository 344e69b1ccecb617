use std::sync::Mutex;

use anyhow::anyhow;
use async_trait::async_trait;
use zev_core::pipeline::{run_sequential_pipeline, PipelineError, PipelineStep, StepExecutor};

/// Answers from a script, recording every prompt it was given.
struct ScriptedExecutor {
    replies: Vec<Result<&'static str, &'static str>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedExecutor {
    fn new(replies: Vec<Result<&'static str, &'static str>>) -> Self {
        Self {
            replies,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl StepExecutor for ScriptedExecutor {
    async fn execute(&self, model: &str, prompt: &str) -> anyhow::Result<String> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((model.to_string(), prompt.to_string()));
            calls.len() - 1
        };
        match self.replies[index] {
            Ok(text) => Ok(text.to_string()),
            Err(msg) => Err(anyhow!(msg)),
        }
    }
}

fn three_steps() -> Vec<PipelineStep> {
    vec![
        PipelineStep::new("Researcher", "model-1", "research: {context}"),
        PipelineStep::new("Writer", "model-2", "write: {context}"),
        PipelineStep::new("Editor", "model-3", "edit {task}: {context}"),
    ]
}

#[tokio::test]
async fn each_step_sees_all_prior_outputs() {
    let executor = ScriptedExecutor::new(vec![Ok("A"), Ok("B"), Ok("C")]);
    let mut reported = Vec::new();

    let result = run_sequential_pipeline(&executor, &three_steps(), "summarise rust", |step| {
        reported.push((step.index, step.name.clone(), step.output.clone()));
    })
    .await
    .unwrap();

    assert_eq!(result, "C");

    let calls = executor.calls();
    assert_eq!(calls.len(), 3);
    let models: Vec<_> = calls.iter().map(|(m, _)| m.as_str()).collect();
    assert_eq!(models, vec!["model-1", "model-2", "model-3"]);

    assert!(calls[0].1.starts_with("research: Task: summarise rust"));
    assert!(!calls[0].1.contains("### "));
    assert!(calls[1].1.contains("### Researcher\nA"));
    assert!(calls[2].1.contains("### Researcher\nA"));
    assert!(calls[2].1.contains("### Writer\nB"));
    assert!(calls[2].1.starts_with("edit summarise rust: "));

    assert_eq!(
        reported,
        vec![
            (0, "Researcher".to_string(), "A".to_string()),
            (1, "Writer".to_string(), "B".to_string()),
            (2, "Editor".to_string(), "C".to_string()),
        ]
    );
}

#[tokio::test]
async fn failing_step_aborts_the_rest() {
    let executor = ScriptedExecutor::new(vec![Ok("A"), Err("rate limited"), Ok("C")]);
    let mut callbacks = 0;

    let err = run_sequential_pipeline(&executor, &three_steps(), "task", |_| callbacks += 1)
        .await
        .unwrap_err();

    assert_eq!(callbacks, 1);
    assert_eq!(executor.calls().len(), 2);
    match err {
        PipelineError::Step { index, name, source } => {
            assert_eq!(index, 1);
            assert_eq!(name, "Writer");
            assert_eq!(source.to_string(), "rate limited");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn empty_workflow_is_rejected() {
    let executor = ScriptedExecutor::new(Vec::new());
    let err = run_sequential_pipeline(&executor, &[], "task", |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::EmptyWorkflow));
    assert!(executor.calls().is_empty());
}

#[tokio::test]
async fn single_step_returns_its_output() {
    let executor = ScriptedExecutor::new(vec![Ok("only")]);
    let steps = vec![PipelineStep::new("Solo", "m", "{task}")];
    let result = run_sequential_pipeline(&executor, &steps, "do it", |_| {}).await.unwrap();
    assert_eq!(result, "only");
    assert_eq!(executor.calls()[0].1, "do it");
}
