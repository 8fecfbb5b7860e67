//! Scribe - 论文协作演示
//!
//! 创建一篇带若干章节的示例论文，把标准输入的每一行作为聊天消息交给 Supervisor，
//! 打印回复、任务状态与当前大纲。Ctrl+C 取消进行中的轮次。
//!
//! 命令：/outline  /move <n> <up|down|top|bottom|to_position> [pos]  /history <n>
//!       /target <n|none>  /agents  /papers  /quit

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use scribe::config::{load_config, AppConfig};
use scribe::paper::{MoveAction, NewSection, SectionStore};
use scribe::retrieval::KeywordRetriever;
use scribe::{ChatRequest, ScribeBuilder};
use tokio::io::{AsyncBufReadExt, BufReader};

const SEED_SECTIONS: &[(&str, &str)] = &[
    (
        "Introduction",
        "Citation networks encode how ideas propagate through the literature.",
    ),
    (
        "Method",
        "We train a graph neural network on the citation graph with attention over neighbours.",
    ),
    ("Results", ""),
    ("Discussion", ""),
];

const SEED_CORPUS: &[(&str, &str)] = &[
    (
        "Graph attention networks weight neighbour features with learned attention coefficients.",
        "velickovic_graph_attention_2018.pdf",
    ),
    (
        "Semi-supervised classification with graph convolutional networks on citation datasets.",
        "kipf_gcn_2017.pdf",
    ),
    (
        "Citation recommendation benefits from modelling both text and graph structure.",
        "citation_recommendation_survey_2020.pdf",
    ),
];

async fn print_outline(sections: &SectionStore, document_id: &str) -> anyhow::Result<()> {
    for entry in sections.outline(document_id).await? {
        println!(
            "  {:<6} {:<24} {:>4} words  [{}]",
            entry.hierarchy_path, entry.title, entry.word_count, entry.status
        );
    }
    Ok(())
}

/// 大纲中第 n 个（1 起）章节的 id
async fn nth_section(sections: &SectionStore, document_id: &str, n: &str) -> anyhow::Result<String> {
    let index: usize = n.parse().context("section number expected")?;
    let outline = sections.outline(document_id).await?;
    outline
        .get(index.saturating_sub(1))
        .map(|e| e.id.clone())
        .with_context(|| format!("no section {index}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    scribe::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let corpus = KeywordRetriever::new();
    for (text, source) in SEED_CORPUS {
        corpus.add(text, source, ["gnn"]);
    }
    let app = ScribeBuilder::new(config)
        .with_retriever(Arc::new(corpus))
        .build()
        .await
        .context("Failed to build scribe")?;

    let document = app
        .sections
        .create_document(
            "Graph Neural Networks for Citation Analysis",
            Some("Demo paper".to_string()),
        )
        .await?;
    for (title, content) in SEED_SECTIONS {
        app.sections
            .create(&document.id, NewSection::titled(*title).with_content(*content))
            .await?;
    }
    let session = app.chats.create_session(&document.id, "Demo").await?;

    {
        let supervisor = app.supervisor.clone();
        let session_id = session.id.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                supervisor.cancel(&session_id).await;
            }
        });
    }

    println!("Paper: {}", document.title);
    print_outline(&app.sections, &document.id).await?;
    println!("Type a message, or /quit.");

    let mut target: Option<String> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut words = line.split_whitespace();
        let result: anyhow::Result<()> = match words.next().unwrap_or_default() {
            "/quit" | "/exit" => break,
            "/outline" => print_outline(&app.sections, &document.id).await,
            "/papers" => {
                async {
                    for summary in app.sections.list_document_summaries().await? {
                        println!(
                            "  {:<48} {:>2} sections {:>6} words",
                            summary.document.title, summary.section_count, summary.total_words
                        );
                    }
                    Ok::<(), anyhow::Error>(())
                }
                .await
            }
            "/agents" => {
                for info in app.supervisor.agents() {
                    println!("  {}: {} ({})", info.name, info.description, info.task_types.join(", "));
                }
                Ok(())
            }
            "/target" => match words.next() {
                Some("none") | None => {
                    target = None;
                    Ok(())
                }
                Some(n) => nth_section(&app.sections, &document.id, n)
                    .await
                    .map(|id| target = Some(id)),
            },
            "/move" => {
                let section = words.next().unwrap_or_default();
                let action = words.next().unwrap_or_default();
                let position = words.next().and_then(|p| p.parse::<usize>().ok());
                async {
                    let id = nth_section(&app.sections, &document.id, section).await?;
                    let action = MoveAction::parse(action, position.map(|p| p.saturating_sub(1)))?;
                    app.sections.move_section(&id, action).await?;
                    print_outline(&app.sections, &document.id).await
                }
                .await
            }
            "/history" => {
                let section = words.next().unwrap_or_default();
                async {
                    let id = nth_section(&app.sections, &document.id, section).await?;
                    for entry in app.sections.history(&id).await?.collect().await? {
                        println!(
                            "  v{} {} ({} words) {}",
                            entry.version,
                            entry.created_at.format("%H:%M:%S"),
                            entry.word_count,
                            entry.title
                        );
                    }
                    Ok::<(), anyhow::Error>(())
                }
                .await
            }
            _ => {
                let mut request = ChatRequest::new(&session.id, line);
                if let Some(id) = &target {
                    request = request.with_target(id.clone());
                }
                async {
                    let response = app.supervisor.send_message(request).await?;
                    println!("\n{}\n", response.message.content);
                    for task in &response.todo_tasks {
                        println!("  [{}] {} / {}", task.status, task.agent_name, task.description);
                    }
                    for reference in &response.references {
                        println!("  ref: {}", reference.citation);
                    }
                    for suggestion in &response.suggestions {
                        println!("  next: {suggestion}");
                    }
                    print_outline(&app.sections, &document.id).await
                }
                .await
            }
        };
        if let Err(e) = result {
            println!("error: {e:#}");
        }
    }

    Ok(())
}
