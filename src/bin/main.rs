use sidekick::{
    agent::Sidekick,
    config::AppConfig,
    evaluator::LlmEvaluator,
    models::{RunOutcome, RunStatus},
    tools::ToolboxProvider,
    worker::LlmWorker,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: sidekick <request> [success criteria]";

fn print_outcome(outcome: &RunOutcome) {
    println!("\n=== RUN RESULT ===");
    println!("Run ID: {}", outcome.run_id);
    println!("Status: {:?}", outcome.status);
    println!("Rounds: {}", outcome.rounds);
    if let Some(feedback) = &outcome.feedback {
        println!("Evaluator: {}", feedback);
    }
    println!("\nTrace:");
    for (i, step) in outcome.trace.iter().enumerate() {
        println!("  {}: {}", i + 1, step);
    }
    if let Some(answer) = &outcome.answer {
        println!("\n{}", answer);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let Some(request) = args.next() else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };
    let criteria = args.collect::<Vec<_>>().join(" ");

    let config = AppConfig::from_env()?;
    let service = config.completion_service()?;
    let provider = Arc::new(ToolboxProvider::new(config.toolbox_config(), config.notifier()?));

    let mut sidekick = Sidekick::start(
        Arc::new(LlmWorker::new(service.clone())),
        Arc::new(LlmEvaluator::new(service)),
        provider,
        config.loop_config(),
    )
    .await?;

    info!(session_id = %sidekick.session_id(), "Running sidekick");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    let mut outcome = sidekick.submit(&request, &criteria).await;
    loop {
        let current = match outcome {
            Ok(current) => current,
            Err(e) => {
                eprintln!("Run failed: {}", e);
                sidekick.shutdown().await?;
                return Err(e.into());
            }
        };

        print_outcome(&current);
        if current.status != RunStatus::ClarificationNeeded {
            break;
        }

        stdout.write_all(b"\nClarification> ").await?;
        stdout.flush().await?;
        let Some(answer) = stdin.next_line().await? else {
            break;
        };
        outcome = sidekick.clarify(&answer).await;
    }

    sidekick.shutdown().await?;
    Ok(())
}
