//! Content pipeline example.
//!
//! This example demonstrates:
//! - Building an engine around a generation backend
//! - Driving an article workflow through the stages
//! - Regeneration after a failed validation
//! - Resuming a suspended workflow with reviewer feedback
//! - Observing workflow events and printing the report
//!
//! Run with: `RUST_LOG=folio=info cargo run --example content_pipeline`

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use folio::{
    Collaborator, CollaboratorError, CollaboratorOutput, EngineConfig, ReviewDecision, Stage,
    StageContext, StageKind, StepValidation, WorkflowEngine, WorkflowEvent, WorkflowSettings,
    WorkflowStatus,
};

/// A stand-in for the text generation service.
///
/// The outline is rejected until a reviewer has given feedback, so the
/// workflow regenerates it up to the ceiling and then stops for review.
#[derive(Debug, Default)]
struct DemoBackend {
    outline_calls: AtomicU32,
}

#[async_trait]
impl Collaborator for DemoBackend {
    async fn invoke(
        &self,
        stage: Stage,
        context: &StageContext,
        settings: &WorkflowSettings,
    ) -> Result<CollaboratorOutput, CollaboratorError> {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        match (stage, context.kind) {
            (Stage::OutlineValidation, _) => {
                let call = self.outline_calls.fetch_add(1, Ordering::SeqCst) + 1;
                println!("  🧾 Checking outline (attempt {})", context.attempt);
                if context.feedback.is_none() {
                    return Ok(CollaboratorOutput::Validation(
                        StepValidation::invalid([format!("outline {} skips the basics", call)])
                            .with_suggestion("add an introductory section"),
                    ));
                }
                Ok(CollaboratorOutput::Validation(StepValidation::valid()))
            }
            (_, StageKind::Generative) => {
                println!("  ✍️  Generating {} with {}", stage, settings.generation.ai_model);
                Ok(CollaboratorOutput::Artifact(serde_json::json!({
                    "stage": stage.as_str(),
                    "words": 1200,
                })))
            }
            (_, StageKind::Gated) => {
                println!("  🔎 Validating {}", stage);
                Ok(CollaboratorOutput::Validation(StepValidation::valid()))
            }
        }
    }
}

#[tokio::main]
async fn main() -> folio::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("╔═══════════════════════════════════════════╗");
    println!("║  Folio Content Pipeline Example           ║");
    println!("╚═══════════════════════════════════════════╝\n");

    let engine = WorkflowEngine::builder()
        .collaborator(Arc::new(DemoBackend::default()))
        .config(EngineConfig::default())
        .build()?;

    println!("📋 Stages: {:?}\n", engine.registry().stages());

    let mut event_receiver = engine.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = event_receiver.recv().await {
            match event {
                WorkflowEvent::StageCompleted { stage, .. } => {
                    println!("   [Event] Stage '{}' completed", stage);
                }
                WorkflowEvent::StageRegenerating { stage, errors, .. } => {
                    println!("   [Event] Regenerating '{}': {}", stage, errors.join("; "));
                }
                WorkflowEvent::ReviewRequired { stage, reason, .. } => {
                    println!("   [Event] Review required at '{}' ({})", stage, reason);
                }
                WorkflowEvent::WorkflowCompleted { workflow_id, .. } => {
                    println!("   [Event] Workflow '{}' completed", workflow_id);
                }
                _ => {}
            }
        }
    });

    let id = "article-rust-async";
    engine.start(id, WorkflowSettings::default()).await?;

    println!("▶️  Driving workflow '{}'", id);
    println!("─────────────────────────────────────────");
    let outcome = engine.drive(id).await?;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    println!("\n📊 Status after first drive:");
    println!("─────────────────────────────────────────");
    println!("{}", engine.report(id).await?);

    if outcome.state.status == WorkflowStatus::NeedsReview {
        println!("👤 Reviewer asks for another outline with feedback\n");
        engine
            .resume(
                id,
                ReviewDecision::Retry,
                Some("start with an overview of futures".to_string()),
            )
            .await?;
    }

    println!("▶️  Driving remaining stages");
    println!("─────────────────────────────────────────");
    engine.drive(id).await?;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    println!("\n📊 Final Status:");
    println!("─────────────────────────────────────────");
    let report = engine.report(id).await?;
    println!("{}", report);

    if report.is_complete() {
        println!("🎉 Article ready for publishing!\n");
    }

    Ok(())
}
