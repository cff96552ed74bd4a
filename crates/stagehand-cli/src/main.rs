use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use stagehand_core::app::{RelayService, ServiceBuilder};
use stagehand_core::config::Config;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "stagehand", about = "File lifecycle manager for a lip-sync synthesis engine")]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Command,
}

/// Durations are whole seconds.
#[derive(Debug, Args)]
struct Settings {
    /// Directory holding staged inputs and the engine's `temp` results.
    #[arg(long, env = "STAGEHAND_DATA_DIR", default_value = "/code/data", global = true)]
    data_dir: PathBuf,

    /// Path under which the engine sees the data dir.
    #[arg(long, env = "STAGEHAND_ENGINE_DATA_DIR", default_value = "/code/data", global = true)]
    engine_data_dir: String,

    #[arg(long, env = "STAGEHAND_ENGINE_URL", default_value = "http://localhost:8383", global = true)]
    engine_url: String,

    #[arg(long, env = "STAGEHAND_ENGINE_TIMEOUT", default_value_t = 30, global = true)]
    engine_timeout: u64,

    #[arg(long, env = "STAGEHAND_DOWNLOAD_TIMEOUT", default_value_t = 120, global = true)]
    download_timeout: u64,

    /// Delay between a result fetch and deletion of the job's files.
    #[arg(long, env = "STAGEHAND_CLEANUP_DELAY", default_value_t = 60, global = true)]
    cleanup_delay: u64,

    #[arg(long, env = "STAGEHAND_RECORD_MARGIN", default_value_t = 10, global = true)]
    record_margin: u64,

    #[arg(long, env = "STAGEHAND_SWEEP_INTERVAL", default_value_t = 300, global = true)]
    sweep_interval: u64,

    #[arg(long, env = "STAGEHAND_SWEEP_BACKOFF", default_value_t = 60, global = true)]
    sweep_backoff: u64,

    /// Minimum age of an untracked file before it is swept.
    /// Defaults to the larger of the cleanup delay and the download timeout plus a minute.
    #[arg(long, env = "STAGEHAND_GRACE", global = true)]
    grace: Option<u64>,

    #[arg(long, env = "STAGEHAND_MAX_FILE_AGE", default_value_t = 7200, global = true)]
    max_file_age: u64,
}

impl Settings {
    fn into_config(self) -> Config {
        let reclaim_delay = Duration::from_secs(self.cleanup_delay);
        let download_timeout = Duration::from_secs(self.download_timeout);
        Config {
            storage_dir: self.data_dir,
            engine_data_dir: self.engine_data_dir,
            engine_url: self.engine_url,
            engine_timeout: Duration::from_secs(self.engine_timeout),
            download_timeout,
            reclaim_delay,
            record_removal_margin: Duration::from_secs(self.record_margin),
            sweep_interval: Duration::from_secs(self.sweep_interval),
            sweep_error_backoff: Duration::from_secs(self.sweep_backoff),
            grace: self
                .grace
                .map(Duration::from_secs)
                .unwrap_or_else(|| Config::default_grace(reclaim_delay, download_timeout)),
            max_age: Duration::from_secs(self.max_file_age),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the reclaim worker and the periodic sweep until ctrl-c.
    Serve,

    /// Relay one job end to end and write its result to `--output`.
    Run {
        #[arg(long)]
        audio_url: String,

        #[arg(long)]
        video_url: String,

        #[arg(long)]
        output: PathBuf,

        /// Seconds between engine status queries.
        #[arg(long, default_value_t = 2)]
        poll_interval: u64,
    },

    /// Run a single sweep pass and print its report as JSON.
    Sweep,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let service = ServiceBuilder::new(cli.settings.into_config())
        .build()
        .context("failed to build service")?;

    match cli.command {
        Command::Serve => serve(&service).await,
        Command::Run {
            audio_url,
            video_url,
            output,
            poll_interval,
        } => {
            run_job(
                &service,
                &audio_url,
                &video_url,
                &output,
                Duration::from_secs(poll_interval.max(1)),
            )
            .await
        }
        Command::Sweep => {
            let report = service.sweeper().sweep_once().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

async fn serve(service: &RelayService) -> anyhow::Result<()> {
    let workers = service.start();
    tracing::info!("workers started, press ctrl-c to stop");

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    workers.shutdown_and_join().await;
    Ok(())
}

async fn run_job(
    service: &RelayService,
    audio_url: &str,
    video_url: &str,
    output: &Path,
    poll_interval: Duration,
) -> anyhow::Result<()> {
    let workers = service.start();

    let outcome = async {
        let job_id = service.submit_job(audio_url, video_url).await?;
        println!("submitted {job_id}");

        let status = loop {
            let status = service.query_job(&job_id).await?;
            if status.is_finished() || status.is_failed() {
                break status;
            }
            if let Some(progress) = status.progress() {
                tracing::info!(%job_id, progress, "synthesizing");
            }
            tokio::time::sleep(poll_interval).await;
        };

        if status.is_failed() {
            bail!(
                "engine reported failure for {job_id}: {}",
                status.message().unwrap_or("no message")
            );
        }
        let Some(name) = status.result_filename() else {
            bail!("engine finished {job_id} without naming a result");
        };

        let payload = service.fetch_result(&name, Some(&job_id)).await?;
        tokio::fs::write(output, &payload.data)
            .await
            .with_context(|| format!("cannot write {}", output.display()))?;
        println!("wrote {} bytes to {}", payload.size, output.display());
        Ok::<(), anyhow::Error>(())
    }
    .await;

    // 中断されなければ、予約済みの削除が予定どおり走るのを待つ
    if outcome.is_ok() {
        tokio::select! {
            _ = wait_for_drain(service) => {},
            _ = tokio::signal::ctrl_c() => tracing::info!("interrupted, reclaiming now"),
        }
    }
    workers.shutdown_and_join().await;
    outcome
}

async fn wait_for_drain(service: &RelayService) {
    while service.reclaimer().pending().await > 0 {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grace_defaults_past_the_download_timeout() {
        let cli = Cli::parse_from([
            "stagehand",
            "--cleanup-delay",
            "15",
            "--download-timeout",
            "30",
            "sweep",
        ]);
        let config = cli.settings.into_config();

        assert_eq!(config.reclaim_delay, Duration::from_secs(15));
        assert_eq!(config.grace, Duration::from_secs(90));
        assert_eq!(config.record_removal_delay(), Duration::from_secs(25));
        config.validate().unwrap();
    }

    #[test]
    fn run_requires_both_urls() {
        let result = Cli::try_parse_from(["stagehand", "run", "--audio-url", "http://a/x.mp3"]);
        assert!(result.is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["stagehand", "serve", "--max-file-age", "600", "--grace", "30"]);
        let config = cli.settings.into_config();

        assert_eq!(config.max_age, Duration::from_secs(600));
        assert_eq!(config.grace, Duration::from_secs(30));
        assert!(matches!(cli.command, Command::Serve));
    }
}
