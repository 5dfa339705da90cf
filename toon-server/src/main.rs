use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use clap::Parser;
use minijinja::context;
use serde::Deserialize;
use strum::VariantNames;
use toon::{SceneCollection, ScenePosition};
use toon_client::config::ChatModel;
use toon_client::generation::{
    DispatchReport, Dispatcher, OpenAiChat, OpenAiImages, SceneGenerator, SceneOutcome,
};
use toon_server::{
    config::Config,
    errors::{WebError, WebResult},
    jobs::BatchJobs,
    storage::{drawn_since, SceneStore},
};
use tracing_subscriber::EnvFilter;

lazy_static::lazy_static! {
    static ref TEMPLATES: minijinja::Environment<'static> = {
        let mut env = minijinja::Environment::new();
        for (name, template) in &[
            ("base.html.jinja", include_str!("../templates/base.html.jinja")),
            ("index.html.jinja", include_str!("../templates/index.html.jinja")),
            ("scenes.html.jinja", include_str!("../templates/scenes.html.jinja")),
        ] {
            env.add_template(name, template)
                .expect("Failed to register template");
        }
        env
    };
}

/// Shown in the prompt box the first time the page loads
const EXAMPLE_SCRIPT: &str = include_str!("../templates/example-script.txt");

#[derive(Parser, Debug)]
struct Args {
    /// YAML configuration file
    #[clap(long)]
    config: Option<PathBuf>,

    /// The address and optionally port to bind to, overriding the configuration
    #[clap(long)]
    address: Option<String>,
}

#[derive(Clone)]
struct AllStates {
    config: Arc<Config>,
    store: SceneStore,
    generator: Arc<SceneGenerator<OpenAiChat>>,
    dispatcher: Arc<Dispatcher<OpenAiImages>>,
    jobs: BatchJobs,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    // Parse command line arguments
    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref()).context("Loading configuration")?;
    if let Some(address) = args.address {
        config.server.address = address;
    }

    // initialize tracing
    let file_appender = tracing_appender::rolling::daily(
        match &config.server.log_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        },
        "access.log",
    );
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .json()
        .with_writer(non_blocking)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    tracing::info!("Starting with {:?}", config);

    let store = SceneStore::open(&config.server.data_dir)
        .await
        .context("Opening the data directory")?;
    let generator = SceneGenerator::new(
        OpenAiChat::new(&config.generation).context("Building the chat client")?,
        config.generation.strictness,
    );
    let dispatcher = Dispatcher::from_config(
        OpenAiImages::new(&config.generation).context("Building the image client")?,
        &config.generation,
    );

    // build our application with a route
    let app = Router::new()
        // `GET /` goes to `root`
        .route("/", get(root))
        // `GET /health` goes to `health`
        .route("/health", get(health))
        // `POST /scenes` goes to `generate_scenes`
        .route("/scenes", post(generate_scenes))
        // `GET /scenes/:id` goes to `get_scenes`
        .route("/scenes/:id", get(get_scenes))
        // `GET /scenes/:id/json` goes to `download_scenes`
        .route("/scenes/:id/json", get(download_scenes))
        // `GET /scenes/:id/images.zip` goes to `download_images`
        .route("/scenes/:id/images.zip", get(download_images))
        // `POST /scenes/:id/images` goes to `start_batch`
        .route("/scenes/:id/images", post(start_batch))
        // `POST /scenes/:id/images/retry` goes to `retry_batch`
        .route("/scenes/:id/images/retry", post(retry_batch))
        // `POST /scenes/:id/images/:position` goes to `draw_scene`
        .route("/scenes/:id/images/:position", post(draw_scene))
        // `GET /images/:id/:file` goes to `get_image`
        .route("/images/:id/:file", get(get_image))
        // serve static files from the `./static` directory
        .route("/static/*path", get(serve_static))
        .layer(
            tower_http::compression::CompressionLayer::new()
                .quality(tower_http::CompressionLevel::Fastest),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(AllStates {
            config: Arc::new(config.clone()),
            store,
            generator: Arc::new(generator),
            dispatcher: Arc::new(dispatcher),
            jobs: BatchJobs::new(),
        });

    // Plain HTTP unless a certificate is configured
    if let Some(tls) = &config.server.tls {
        rustls::crypto::ring::default_provider()
            .install_default()
            .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;
        let tls_config =
            axum_server::tls_rustls::RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
                .await
                .context("Loading TLS certificate")?;

        let addr = config.server.address.parse()?;
        tracing::info!("Listening on {}", addr);
        axum_server::bind_rustls(addr, tls_config)
            .serve(app.into_make_service())
            .await
            .context("Starting TLS server")?;
    } else {
        let listener = tokio::net::TcpListener::bind(&config.server.address).await?;
        tracing::info!("Listening on {}", config.server.address);
        axum::serve(listener, app).await?;
    }
    Ok(())
}

/// Render the prompt form, optionally with the last attempt and what went wrong with it
async fn render_index(
    allstates: &AllStates,
    prompt: &str,
    model: &str,
    error: Option<String>,
) -> WebResult<Html<String>> {
    Ok(Html(TEMPLATES.get_template("index.html.jinja")?.render(
        context! {
            prompt => prompt,
            model => model,
            models => ChatModel::VARIANTS,
            saved => allstates.store.list().await?,
            error => error,
        },
    )?))
}

// The prompt form and every saved collection
async fn root(State(allstates): State<AllStates>) -> WebResult<Html<String>> {
    let model = allstates.config.generation.chat_model.to_string();
    render_index(&allstates, EXAMPLE_SCRIPT, &model, None).await
}

// Just reply that everything is okay
async fn health() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
struct GenerateForm {
    prompt: String,
    model: String,
}

/// Generate and save a new collection. Anything that goes wrong is shown on the form.
async fn generate_scenes(
    State(allstates): State<AllStates>,
    Form(form): Form<GenerateForm>,
) -> WebResult<Response> {
    match allstates.generator.generate(&form.prompt, &form.model).await {
        Ok(scenes) => {
            let id = allstates.store.save(&scenes).await?;
            Ok(Redirect::to(&format!("/scenes/{}", id)).into_response())
        }
        Err(e) => {
            tracing::warn!("Scene generation failed: {}", e);
            let page = render_index(&allstates, &form.prompt, &form.model, Some(e.to_string()))
                .await?;
            Ok(page.into_response())
        }
    }
}

async fn load_collection(allstates: &AllStates, id: &str) -> WebResult<SceneCollection> {
    allstates.store.load(id).await?.ok_or(WebError::NotFound)
}

/// Render a collection with its latest images and the last batch report
async fn render_scenes(
    allstates: &AllStates,
    id: &str,
    scenes: &SceneCollection,
    error: Option<String>,
    notice: Option<String>,
) -> WebResult<Html<String>> {
    let images = allstates.store.latest_images(id).await?;
    let report = allstates.store.report(id).await;
    let rows = scenes
        .iter()
        .map(|(position, scene)| {
            let image = images.get(&position);
            // A redraw since the batch supersedes its failure
            let failure = report.as_ref().and_then(|r| match r.outcomes.get(&position) {
                Some(SceneOutcome::Failed { error })
                    if !image.is_some_and(|name| drawn_since(name, r)) =>
                {
                    Some(error.clone())
                }
                _ => None,
            });
            context! {
                position => position.get(),
                odd => position.is_odd(),
                script => &scene.script,
                main_keyword => &scene.main_keyword,
                image => image,
                failure => failure,
            }
        })
        .collect::<Vec<_>>();
    Ok(Html(TEMPLATES.get_template("scenes.html.jinja")?.render(
        context! {
            id => id,
            scenes => rows,
            running => allstates.jobs.is_running(id),
            has_images => !images.is_empty(),
            summary => report.as_ref().map(DispatchReport::summary),
            report_timestamp => report.as_ref().map(|r| r.timestamp.clone()),
            settings => allstates.dispatcher.settings(),
            error => error,
            notice => notice,
        },
    )?))
}

async fn get_scenes(
    State(allstates): State<AllStates>,
    Path(id): Path<String>,
) -> WebResult<Html<String>> {
    let scenes = load_collection(&allstates, &id).await?;
    render_scenes(&allstates, &id, &scenes, None, None).await
}

/// The collection as a JSON download, in the same layout the CLI writes
async fn download_scenes(
    State(allstates): State<AllStates>,
    Path(id): Path<String>,
) -> WebResult<impl IntoResponse> {
    let scenes = load_collection(&allstates, &id).await?;
    let json = scenes.to_json_pretty().context("Serializing scenes")?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/json; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"scenes_{}.json\"", id),
            ),
        ],
        json,
    ))
}

/// The latest image of every scene as one ZIP download
async fn download_images(
    State(allstates): State<AllStates>,
    Path(id): Path<String>,
) -> WebResult<impl IntoResponse> {
    let archive = allstates
        .store
        .images_zip(&id)
        .await?
        .ok_or(WebError::NotFound)?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"webtoon_{}.zip\"", id),
            ),
        ],
        archive,
    ))
}

/// Draw every scene in the background, one request at a time.
async fn start_batch(
    State(allstates): State<AllStates>,
    Path(id): Path<String>,
) -> WebResult<Response> {
    let scenes = load_collection(&allstates, &id).await?;
    let output_dir = allstates.store.images_dir(&id).ok_or(WebError::NotFound)?;
    let Some(guard) = allstates.jobs.try_start(&id) else {
        let notice = "A batch is already running for these scenes.".to_string();
        let page = render_scenes(&allstates, &id, &scenes, None, Some(notice)).await?;
        return Ok(page.into_response());
    };

    let dispatcher = allstates.dispatcher.clone();
    let batch_id = id.clone();
    tokio::spawn(async move {
        let _guard = guard;
        tracing::info!("Starting image batch for {}", batch_id);
        match dispatcher.dispatch_all(&scenes, &output_dir).await {
            Ok(report) => {
                if let Err(e) = report.save(&output_dir).await {
                    tracing::error!("Saving the report for {} failed: {}", batch_id, e);
                }
            }
            Err(e) => tracing::error!("Image batch for {} failed: {}", batch_id, e),
        }
    });
    Ok(Redirect::to(&format!("/scenes/{}", id)).into_response())
}

/// Draw again, in the background, only the scenes the last batch failed on.
async fn retry_batch(
    State(allstates): State<AllStates>,
    Path(id): Path<String>,
) -> WebResult<Response> {
    let scenes = load_collection(&allstates, &id).await?;
    let output_dir = allstates.store.images_dir(&id).ok_or(WebError::NotFound)?;
    let Some(previous) = allstates.store.report(&id).await else {
        let notice = "There is no finished batch to retry yet.".to_string();
        let page = render_scenes(&allstates, &id, &scenes, None, Some(notice)).await?;
        return Ok(page.into_response());
    };
    if previous.failed_positions().is_empty() {
        let notice = "Every scene of the last batch succeeded.".to_string();
        let page = render_scenes(&allstates, &id, &scenes, None, Some(notice)).await?;
        return Ok(page.into_response());
    }
    let Some(guard) = allstates.jobs.try_start(&id) else {
        let notice = "A batch is already running for these scenes.".to_string();
        let page = render_scenes(&allstates, &id, &scenes, None, Some(notice)).await?;
        return Ok(page.into_response());
    };

    let dispatcher = allstates.dispatcher.clone();
    let batch_id = id.clone();
    tokio::spawn(async move {
        let _guard = guard;
        tracing::info!(
            "Retrying {} failed scenes for {}",
            previous.failed_positions().len(),
            batch_id
        );
        match dispatcher
            .retry_failed(&scenes, &previous, &output_dir, 1)
            .await
        {
            Ok(report) => {
                if let Err(e) = report.save(&output_dir).await {
                    tracing::error!("Saving the report for {} failed: {}", batch_id, e);
                }
            }
            Err(e) => tracing::error!("Retry for {} failed: {}", batch_id, e),
        }
    });
    Ok(Redirect::to(&format!("/scenes/{}", id)).into_response())
}

/// Draw one scene now and show the result, or what went wrong, on the page.
async fn draw_scene(
    State(allstates): State<AllStates>,
    Path((id, position)): Path<(String, String)>,
) -> WebResult<Html<String>> {
    let scenes = load_collection(&allstates, &id).await?;
    let position: ScenePosition = position
        .parse()
        .map_err(|e: toon::ValidationError| WebError::BadRequest(e.to_string()))?;
    let output_dir = allstates.store.images_dir(&id).ok_or(WebError::NotFound)?;

    // A batch holds the request pacing for minutes; don't queue behind it
    if allstates.jobs.any_running() {
        let error = "An image batch is running. Try again when it finishes.".to_string();
        return render_scenes(&allstates, &id, &scenes, Some(error), None).await;
    }
    match allstates
        .dispatcher
        .dispatch_one(&scenes, position, &output_dir)
        .await
    {
        Ok(image) => {
            tracing::info!("Drew scene {} of {} at {}", position, id, image.path.display());
            let notice = format!("Scene {} redrawn.", position);
            render_scenes(&allstates, &id, &scenes, None, Some(notice)).await
        }
        Err(e) => {
            tracing::warn!("Drawing scene {} of {} failed: {}", position, id, e);
            let error = format!("Scene {}: {}", position, e);
            render_scenes(&allstates, &id, &scenes, Some(error), None).await
        }
    }
}

async fn get_image(
    State(allstates): State<AllStates>,
    Path((id, file)): Path<(String, String)>,
) -> WebResult<impl IntoResponse> {
    let path = allstates
        .store
        .image_path(&id, &file)
        .ok_or(WebError::NotFound)?;
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(WebError::NotFound),
        Err(e) => return Err(anyhow::Error::from(e).context("Reading image").into()),
    };
    Ok(([(header::CONTENT_TYPE, "image/png")], bytes))
}

/// Serve static files from in memory using `include_dir!`
async fn serve_static(Path(path): Path<String>) -> WebResult<impl IntoResponse> {
    let dir = include_dir::include_dir!("$CARGO_MANIFEST_DIR/static");
    let bytes = dir.get_file(&path).ok_or(WebError::NotFound)?.contents();
    let header = (
        "Content-Type",
        match path.split('.').last() {
            Some("css") => "text/css",
            Some("js") => "text/javascript",
            Some("png") => "image/png",
            Some("svg") => "image/svg+xml",
            _ => "application/octet-stream",
        },
    );
    Ok(([header], bytes).into_response())
}
