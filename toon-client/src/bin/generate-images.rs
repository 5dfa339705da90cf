use std::path::PathBuf;

use anyhow::{bail, ensure, Context, Result};
use clap::Parser;
use toon::{SceneCollection, ScenePosition};
use toon_client::config::{ImageQuality, ImageSize, ImageStyle};
use toon_client::generation::{Dispatcher, OpenAiImages};
use toon_client::{logging, Config};

/// Draw one or all scenes of a storyboard, pacing requests to stay under the image API's rate limit
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// The scenes JSON written by generate-scenes
    scenes: PathBuf,
    /// [SCENE_INDEX] OUTPUT_DIR: give a scene number (1-18) to draw only that scene
    #[arg(num_args = 1..=2, required = true, value_names = ["SCENE_INDEX", "OUTPUT_DIR"])]
    target: Vec<String>,
    /// Image quality
    #[arg(long)]
    quality: Option<ImageQuality>,
    /// Image size: 1024x1024, 1792x1024 or 1024x1792
    #[arg(long)]
    size: Option<ImageSize>,
    /// Image style
    #[arg(long)]
    style: Option<ImageStyle>,
    /// After the batch, try failed scenes again up to this many times
    #[arg(long, default_value_t = 0)]
    retry_rounds: usize,
    /// YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Verbose logging
    #[arg(long)]
    debug: bool,
}

/// Tell `[SCENE_INDEX] OUTPUT_DIR` apart.
fn split_target(target: &[String]) -> Result<(Option<ScenePosition>, PathBuf)> {
    match target {
        [output_dir] => Ok((None, PathBuf::from(output_dir))),
        [index, output_dir] => Ok((Some(index.parse()?), PathBuf::from(output_dir))),
        _ => bail!("Expected [SCENE_INDEX] OUTPUT_DIR"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    logging::init_tracing(args.debug);

    let (position, output_dir) = split_target(&args.target)?;
    let mut config = Config::load(args.config.as_deref()).context("Loading configuration")?;
    if let Some(quality) = args.quality {
        config.image.quality = quality;
    }
    if let Some(size) = args.size {
        config.image.size = size;
    }
    if let Some(style) = args.style {
        config.image.style = style;
    }

    let json = tokio::fs::read_to_string(&args.scenes)
        .await
        .with_context(|| format!("Reading {}", args.scenes.display()))?;
    let scenes = SceneCollection::from_json(&json)
        .with_context(|| format!("Loading scenes from {}", args.scenes.display()))?;
    let dispatcher = Dispatcher::from_config(OpenAiImages::new(&config)?, &config);

    if let Some(position) = position {
        let image = dispatcher
            .dispatch_one(&scenes, position, &output_dir)
            .await
            .with_context(|| format!("Drawing scene {}", position))?;
        println!("Scene {}: {}", position, image.path.display());
        return Ok(());
    }

    let started = std::time::Instant::now();
    let mut report = dispatcher.dispatch_all(&scenes, &output_dir).await?;
    if args.retry_rounds > 0 {
        report = dispatcher
            .retry_failed(&scenes, &report, &output_dir, args.retry_rounds)
            .await?;
    }
    report.save(&output_dir).await?;

    let summary = report.summary();
    let elapsed = started.elapsed().as_secs();
    println!(
        "Results: {}/{} scenes generated in {}m {}s",
        summary.succeeded,
        summary.total,
        elapsed / 60,
        elapsed % 60
    );
    for (position, outcome) in &report.outcomes {
        match outcome {
            toon_client::generation::SceneOutcome::Generated { path } => {
                println!("  Scene {:>2}: ok     {}", position, path.display())
            }
            toon_client::generation::SceneOutcome::Failed { error } => {
                println!("  Scene {:>2}: FAILED {}", position, error)
            }
        }
    }
    ensure!(
        summary.failed == 0,
        "{} of {} scenes failed",
        summary.failed,
        summary.total
    );
    Ok(())
}
