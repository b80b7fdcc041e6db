use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use contactiq::analytics::{load_summary, InteractionFilter};
use contactiq::testing::StaticRetriever;
use contactiq::{
    AssistantMode, ConversationTurn, EvidenceRetriever, HttpRetriever, JudgeSettings, MemoryStore,
    OpenAiJudge, Pipeline, PipelineConfig, PipelineResponse, RetrieverSettings,
};

const HELP: &str = "Commands: /mode <customer|banker>, /metrics, /reset, /quit";

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG wins; LOG_LEVEL is the plain fallback
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
                )
            }),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = PipelineConfig::from_env().context("Invalid pipeline configuration")?;
    config.validate().context("Invalid pipeline configuration")?;

    let judge_settings = JudgeSettings::from_env();
    let missing = judge_settings.missing_keys();
    if !missing.is_empty() {
        tracing::warn!(missing = ?missing, "Judge configuration incomplete; calls will fail and escalate");
    }
    let judge = Arc::new(
        OpenAiJudge::new(judge_settings, config.call_timeout).context("Failed to build judge client")?,
    );

    let retriever: Arc<dyn EvidenceRetriever> = match RetrieverSettings::from_env().url {
        Some(url) => {
            tracing::info!(url = %url, "Using HTTP evidence retriever");
            Arc::new(HttpRetriever::new(url, config.call_timeout)?)
        }
        None => {
            tracing::warn!("RETRIEVER_URL not set; every grounded question will escalate");
            Arc::new(StaticRetriever::empty())
        }
    };

    let store = Arc::new(MemoryStore::new());
    let pipeline = Pipeline::new(config, judge, retriever, store.clone());

    let mut mode = AssistantMode::Customer;
    let mut history: Vec<ConversationTurn> = Vec::new();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    stdout
        .write_all(format!("ContactIQ ({} mode). {}\n", mode, HELP).as_bytes())
        .await?;

    loop {
        stdout.write_all(format!("{}> ", mode).as_bytes()).await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            let mut parts = command.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("quit" | "exit"), _) => break,
                (Some("mode"), Some(name)) => match name.parse::<AssistantMode>() {
                    Ok(new_mode) => {
                        mode = new_mode;
                        history.clear();
                        stdout.write_all(format!("Switched to {} mode\n", mode).as_bytes()).await?;
                    }
                    Err(e) => stdout.write_all(format!("{}\n", e).as_bytes()).await?,
                },
                (Some("reset"), _) => {
                    history.clear();
                    stdout.write_all(b"Conversation cleared\n").await?;
                }
                (Some("metrics"), _) => {
                    let summary = load_summary(store.as_ref(), &InteractionFilter::default()).await?;
                    let stats = pipeline.logger().stats();
                    let report = serde_json::json!({ "summary": summary, "logger": stats });
                    stdout
                        .write_all(format!("{}\n", serde_json::to_string_pretty(&report)?).as_bytes())
                        .await?;
                }
                _ => stdout.write_all(format!("{}\n", HELP).as_bytes()).await?,
            }
            continue;
        }

        let response = pipeline.run(line, mode, Some(history.as_slice())).await;
        stdout.write_all(render(&response).as_bytes()).await?;

        history.push(ConversationTurn::user(line));
        history.push(ConversationTurn::assistant(
            response.response_text.clone(),
            response.escalated,
        ));
    }

    pipeline.logger().shutdown();
    Ok(())
}

fn render(response: &PipelineResponse) -> String {
    let mut out = format!("\n{}\n", response.response_text);
    if !response.citations.is_empty() {
        out.push_str("\nSources:\n");
        for citation in &response.citations {
            match &citation.url {
                Some(url) => out.push_str(&format!("  [{}] {} ({})\n", citation.number, citation.source, url)),
                None => out.push_str(&format!("  [{}] {}\n", citation.number, citation.source)),
            }
        }
    }
    match (response.escalated, response.confidence_score) {
        (true, _) => out.push_str(&format!(
            "\n(escalated: {})\n",
            response.trigger_type.map(|t| t.as_str()).unwrap_or("pipeline_error")
        )),
        (false, Some(score)) => out.push_str(&format!("\n(confidence {:.2})\n", score)),
        (false, None) => {}
    }
    out.push('\n');
    out
}
