mod cli;

use ai::{
    moondream::{Moondream, MoondreamSource},
    AIModel, ImageCaptionModel,
};
use analytics_tracing::{init_tracing_to_file, init_tracing_to_stderr};
use caption_pipeline::{BatchRunner, CancellationToken, RunSummary};
use clap::Parser;
use cli::Cli;
use std::process::ExitCode;
use storage::Storage;
use tracing::{debug, info, warn};

const DEFAULT_LOG_DIRECTIVES: &str = "captioner=info,caption_pipeline=info,ai=info";
/// 128 + SIGINT
const INTERRUPTED_STATUS: u8 = 130;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // before parsing, so CAPTIONER_* values in .env are picked up
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();

    match &cli.log_dir {
        Some(log_dir) => init_tracing_to_file(log_dir.clone(), DEFAULT_LOG_DIRECTIVES),
        None => init_tracing_to_stderr(DEFAULT_LOG_DIRECTIVES),
    }
    match dotenv {
        Ok(path) => debug!(".env read successfully from {}", path.display()),
        Err(e) => debug!("Could not load .env file: {e}"),
    };

    let summary = run(&cli).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", summary);
    }

    Ok(ExitCode::from(exit_status(&summary)))
}

fn exit_status(summary: &RunSummary) -> u8 {
    if summary.interrupted {
        INTERRUPTED_STATUS
    } else {
        0
    }
}

async fn run(cli: &Cli) -> anyhow::Result<RunSummary> {
    let storage = Storage::new_fs(&cli.directory)?;
    let model = caption_model(cli).await?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let mut runner = BatchRunner::new(storage, model)
        .with_cancellation(cancel)
        .with_dry_run(cli.dry_run);
    if let Some(timeout) = cli.image_timeout() {
        runner = runner.with_image_timeout(timeout);
    }

    info!(
        "captioning {} with task {}",
        runner.storage().root().display(),
        cli.task
    );
    Ok(runner.run(cli.task).await?)
}

/// The model itself is only loaded when the first image needs a caption. Weights are
/// downloaded up front so a per-image timeout does not have to cover the download.
async fn caption_model(cli: &Cli) -> anyhow::Result<ImageCaptionModel> {
    let source = if cli.dry_run {
        cli.model_source()
    } else {
        let files = cli.model_source().resolve().await?;
        MoondreamSource {
            model_file: Some(files.model),
            tokenizer_file: Some(files.tokenizer),
            ..cli.model_source()
        }
    };
    let device = cli.device;
    let config = cli.generation_config();

    AIModel::new(
        "moondream",
        move || {
            let source = source.clone();
            let config = config.clone();
            async move {
                let files = source.resolve().await?;
                Moondream::load(&files, device.create()?, config)
            }
        },
        None,
    )
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupt received, stopping the run");
        cancel.cancel();
    }
}
