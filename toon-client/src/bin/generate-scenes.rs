use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use toon::Strictness;
use toon_client::generation::{check_request, OpenAiChat, SceneGenerator};
use toon_client::{logging, Config};

/// Split an advertising script into 18 webtoon scenes and save them as JSON
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// The advertising script, or a path to it with --from-file
    prompt: String,
    /// Where to write the scenes
    output: PathBuf,
    /// Chat model to use (gpt-4o-mini, gpt-4o, gpt-3.5-turbo). Defaults to the configured one.
    #[arg(short, long)]
    model: Option<String>,
    /// Reject scenes that break the odd/even sentence convention instead of warning
    #[arg(long)]
    strict: bool,
    /// Read the script from the file named by <PROMPT>
    #[arg(short, long)]
    from_file: bool,
    /// YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Verbose logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    logging::init_tracing(args.debug);

    let config = Config::load(args.config.as_deref()).context("Loading configuration")?;
    let prompt = if args.from_file {
        tokio::fs::read_to_string(&args.prompt)
            .await
            .with_context(|| format!("Reading script from {}", args.prompt))?
    } else {
        args.prompt
    };
    let model = args
        .model
        .unwrap_or_else(|| config.chat_model.to_string());
    let strictness = if args.strict {
        Strictness::Strict
    } else {
        config.strictness
    };

    // Input problems are reported before a missing API key
    check_request(&prompt, &model)?;
    let generator = SceneGenerator::new(OpenAiChat::new(&config)?, strictness);
    let scenes = generator
        .generate(&prompt, &model)
        .await
        .context("Generating scenes")?;

    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&args.output, scenes.to_json_pretty()?)
        .await
        .with_context(|| format!("Writing {}", args.output.display()))?;

    for (position, scene) in scenes.iter() {
        println!("{:>2}. {} [{}]", position, scene.script, scene.main_keyword);
    }
    tracing::info!("Saved {} scenes to {}", scenes.len(), args.output.display());
    Ok(())
}
