//! Background tasks that talk to Groq and report back through the event loop.

use futures_util::{pin_mut, StreamExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;
use zev_core::groq::types::ChatRequest;
use zev_core::{batch, run_sequential_pipeline, FlushPolicy, GroqClient, GroqError, PipelineStep};

use crate::tui::{AppEvent, TaskEvent, TurnId};

fn report(tx: &UnboundedSender<AppEvent>, event: TaskEvent) -> bool {
    tx.send(AppEvent::Task(event)).is_ok()
}

/// Stream one assistant reply into `message`, one flushed batch at a time.
pub fn spawn_chat(
    client: GroqClient,
    request: ChatRequest,
    policy: FlushPolicy,
    turn: TurnId,
    conversation: Uuid,
    message: Uuid,
    tx: UnboundedSender<AppEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let event = match stream_reply(&client, &request, policy, conversation, message, &tx).await {
            Ok(()) => TaskEvent::Finished { turn },
            Err(e) => {
                warn!("generation failed: {}", e);
                TaskEvent::Failed {
                    turn,
                    error: e.to_string(),
                }
            }
        };
        report(&tx, event);
    })
}

async fn stream_reply(
    client: &GroqClient,
    request: &ChatRequest,
    policy: FlushPolicy,
    conversation: Uuid,
    message: Uuid,
    tx: &UnboundedSender<AppEvent>,
) -> Result<(), GroqError> {
    let fragments = client.stream(request).await?;
    let batches = batch(fragments, policy);
    pin_mut!(batches);

    let mut count = 0usize;
    while let Some(next) = batches.next().await {
        let flushed = next?;
        count += 1;
        if !report(tx, TaskEvent::Batch { conversation, message, batch: flushed }) {
            // UI is gone; dropping the stream closes the connection.
            break;
        }
    }
    info!("stream for {} finished after {} batches", request.model, count);
    Ok(())
}

/// Run a workflow, posting each step's output as it completes.
pub fn spawn_superagent(
    client: GroqClient,
    steps: Vec<PipelineStep>,
    task: String,
    turn: TurnId,
    conversation: Uuid,
    tx: UnboundedSender<AppEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let step_tx = tx.clone();
        let result = run_sequential_pipeline(&client, &steps, &task, |output| {
            report(
                &step_tx,
                TaskEvent::Step {
                    turn,
                    conversation,
                    output: output.clone(),
                },
            );
        })
        .await;

        let event = match result {
            Ok(_) => TaskEvent::Finished { turn },
            Err(e) => TaskEvent::Failed {
                turn,
                error: e.to_string(),
            },
        };
        report(&tx, event);
    })
}

pub fn spawn_model_listing(client: GroqClient, tx: UnboundedSender<AppEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match client.list_models().await {
            Ok(models) => {
                report(&tx, TaskEvent::Models(models));
            }
            Err(e) => warn!("could not list models, using built-in list: {}", e),
        }
    })
}
