use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::Mutex,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_FILE_NAME: &str = "captioner.log";

/// `RUST_LOG` wins over `default_directives`.
fn init_env_layer(default_directives: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives))
}

pub fn init_tracing_to_stderr(default_directives: &str) {
    let env_layer = init_env_layer(default_directives);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_ansi(true)
        .with_writer(std::io::stderr);

    let _ = tracing_subscriber::registry()
        .with(env_layer)
        .with(stderr_layer)
        .try_init();
}

pub fn init_tracing_to_file(log_dir: PathBuf, default_directives: &str) {
    let env_layer = init_env_layer(default_directives);

    let file_log_layer = {
        let file = match create_log_file(&log_dir) {
            Ok(f) => f,
            Err(e) => {
                eprintln!("Failed to create log file in {}: {}", log_dir.display(), e);
                init_tracing_to_stderr(default_directives); // fallback to stderr tracing
                return;
            }
        };
        tracing_subscriber::fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
    };

    let _ = tracing_subscriber::registry()
        .with(env_layer)
        .with(file_log_layer)
        .try_init();
}

/// Appends to `<log_dir>/captioner.log`, so resumed runs keep the earlier history.
fn create_log_file(log_dir: &Path) -> std::io::Result<File> {
    std::fs::create_dir_all(log_dir)?;
    File::options()
        .create(true)
        .append(true)
        .open(log_dir.join(LOG_FILE_NAME))
}
