mod app;
mod blobs;
mod config;
mod entity;
mod llm;
mod metadata;
mod store;
mod upstream;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use app::App;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;
    let app = App::new(&config).await?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.split_first() {
        Some((command, rest)) => run_command(&app, command, rest).await,
        None => {
            print_usage();
            Ok(())
        }
    }
}

async fn run_command(app: &App, command: &str, args: &[String]) -> Result<()> {
    match command {
        "generate" => {
            let prompt = args.join(" ");
            anyhow::ensure!(!prompt.trim().is_empty(), "usage: generate <prompt>");
            let id = app.generate(&prompt).await?;
            println!("Saved generation {}", id);
        }
        "edit" => {
            let id = parse_id(args.first(), "usage: edit <id> <change>")?;
            let prompt = args[1..].join(" ");
            anyhow::ensure!(!prompt.trim().is_empty(), "usage: edit <id> <change>");
            let new_id = app.edit(id, &prompt).await?;
            println!("Saved edit {} of generation {}", new_id, id);
        }
        "convert" => {
            let id = parse_id(args.first(), "usage: convert <id>")?;
            let new_id = app.convert(id).await?;
            println!("Saved 3D conversion {} of generation {}", new_id, id);
        }
        "list" => {
            let limit = args.first().and_then(|a| a.parse().ok()).unwrap_or(10);
            let recent = app.store().recent(limit).await;
            if recent.is_empty() {
                println!("No stored generations");
            }
            for generation in recent {
                print_generation(&generation);
            }
        }
        "search" => {
            let term = args.join(" ");
            let hits = app.store().search(&term).await;
            if hits.is_empty() {
                println!("No matching generations");
            }
            for generation in hits {
                print_generation(&generation);
            }
        }
        "delete" => {
            let id = parse_id(args.first(), "usage: delete <id>")?;
            if app.store().delete(id).await {
                println!("Deleted generation {}", id);
            } else {
                println!("No such generation: {}", id);
            }
        }
        "clear" => {
            if app.store().clear_all().await {
                println!("Cleared all generations");
            } else {
                println!("Failed to clear generations");
            }
        }
        "lineage" => {
            let id = parse_id(args.first(), "usage: lineage <id>")?;
            let lineage = app.store().edit_lineage(id).await;
            if lineage.is_empty() {
                println!("No such generation: {}", id);
            }
            for entry in lineage {
                let kind = match entry.kind {
                    store::LineageKind::Original => "original",
                    store::LineageKind::Edit => "edit",
                };
                println!("[{}] {} ({})", kind, entry.prompt, entry.timestamp.to_rfc3339());
                if let Some(previous) = entry.previous_enhanced_prompt {
                    println!("         edited from: {}", previous);
                }
            }
        }
        "context" => {
            let prompt = args.join(" ");
            match app.store().similar_context(&prompt).await {
                Some(generation) => print_generation(&generation),
                None => println!("No similar generation found"),
            }
        }
        "info" => {
            let info = app.store().introspect().await;
            println!("Total entries: {}", info.total_entries);
            println!("Schema:");
            for column in &info.schema {
                println!(
                    "  {} {}{}",
                    column.name,
                    column.column_type,
                    if column.required { " (required)" } else { "" }
                );
            }
            println!("Entries:");
            for entry in &info.entries {
                println!(
                    "  [{}] {} - {}",
                    entry.generation.id, entry.generation.prompt, entry.status
                );
            }
        }
        _ => print_usage(),
    }

    Ok(())
}

fn parse_id(arg: Option<&String>, usage: &str) -> Result<i64> {
    arg.context(usage.to_string())?
        .parse()
        .context(usage.to_string())
}

fn print_generation(generation: &store::Generation) {
    println!(
        "[{}] {} ({}, {})",
        generation.id,
        generation.prompt,
        generation.created_at.to_rfc3339(),
        generation.status()
    );
    if let Some(enhanced) = &generation.enhanced_prompt {
        println!("     enhanced: {}", enhanced);
    }
}

fn print_usage() {
    println!("Usage: forma <command> [args]");
    println!();
    println!("  generate <prompt>     generate an image from a prompt");
    println!("  edit <id> <change>    regenerate an image with a change");
    println!("  convert <id>          convert a generation's image to 3D");
    println!("  list [n]              show the n most recent generations");
    println!("  search <term>         search prompts");
    println!("  delete <id>           delete a generation and its files");
    println!("  clear                 delete all generations");
    println!("  lineage <id>          show a generation's edit history");
    println!("  context <prompt>      find the closest past generation");
    println!("  info                  show database structure and contents");
}
