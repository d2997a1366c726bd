use std::process::ExitCode;

use cloudframe::config::Config;
use cloudframe::error::CoreError;
use cloudframe::runtime::{Runtime, RuntimeChannels};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(1);
        }
    };

    let level = config.log_level.parse().unwrap_or(log::LevelFilter::Info);
    env_logger::Builder::new().filter_level(level).init();

    let (runtime, channels) = match Runtime::start(config).await {
        Ok(started) => started,
        Err(CoreError::Authentication(msg)) => {
            log::error!("authentication failed: {msg}");
            return ExitCode::from(2);
        }
        Err(CoreError::StoreIntegrity(msg)) => {
            log::error!("unrecoverable store failure: {msg}");
            return ExitCode::from(3);
        }
        Err(e) => {
            log::error!("startup failed: {e}");
            return ExitCode::from(1);
        }
    };

    let RuntimeChannels { mut frames, mut status } = channels;
    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            log::trace!("frame ready for front-end: {} ({} bytes)", frame.photo_id, frame.bytes.len());
        }
    });
    tokio::spawn(async move {
        while let Some(msg) = status.recv().await {
            log::info!("status: {msg}");
        }
    });

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    if let Err(e) = runtime.run_until(shutdown).await {
        log::error!("runtime exited with error: {e}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}
