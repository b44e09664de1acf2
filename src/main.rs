use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Error;

use crate::utils::progress_report::ProgressReporter;
use crate::ytdlp::{
    DownloadStage, MusicFetcher, ProgressUpdate, Quality, ToolUpdater, TrackMetadata, TrackSpan,
    TrackSplitter, ensure_downloader, find_ffmpeg,
};

mod config;
mod utils;
mod ytdlp;

const USAGE: &str = "usage:
  songfetcher <url> [quality] [--title T] [--artist A] [--album B] [--year Y] [--track N]
  songfetcher split <source> <tracks.json> [output_dir]
  songfetcher update-tool

quality is one of best, worst, audio (default) or a yt-dlp format code.";

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_logging()?;

    if let Err(e) = config::load_environment() {
        log::error!("Failed to load environment: {}", e);
        return Err(e);
    }
    let cfg = config::DownloadConfig::from_env();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() || args[0] == "--help" || args[0] == "-h" {
        eprintln!("{USAGE}");
        std::process::exit(2);
    }

    // The managed downloader binary must exist before anything else runs.
    let (yt_dlp_path, freshly_downloaded) = ensure_downloader(&cfg.libraries_dir).await?;
    log::info!("yt-dlp found at {:?}", yt_dlp_path);

    let updater = Arc::new(ToolUpdater::new(yt_dlp_path.clone()));
    if freshly_downloaded {
        // A just-fetched binary is the latest release already.
        updater.mark_attempted();
    }

    match args[0].as_str() {
        "update-tool" => {
            updater.reset();
            updater.update_if_needed().await;
            Ok(())
        }
        "split" => run_split(&args[1..]).await,
        _ => run_download(&cfg, yt_dlp_path, updater, &args).await,
    }
}

fn init_logging() -> Result<(), Error> {
    use log::LevelFilter;
    use std::fs::OpenOptions;
    use std::sync::Mutex;

    // Errors are mirrored to a file so failed overnight downloads can be
    // diagnosed after the fact.
    let error_log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("songfetcher_errors.log")?;
    let error_log_file = Arc::new(Mutex::new(error_log_file));

    let mut builder = pretty_env_logger::formatted_builder();
    builder
        .format(move |buf, record| {
            use std::io::Write;
            let output = format!(
                "{} [{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            );

            if record.level() == log::Level::Error {
                if let Ok(mut file) = error_log_file.try_lock() {
                    let _ = writeln!(file, "{}", &output);
                }
            }

            writeln!(buf, "{}", &output)
        })
        .filter(None, LevelFilter::Info)
        .init();
    Ok(())
}

async fn run_download(
    cfg: &config::DownloadConfig,
    yt_dlp_path: PathBuf,
    updater: Arc<ToolUpdater>,
    args: &[String],
) -> Result<(), Error> {
    let url = args[0].clone();
    let mut quality = Quality::Audio;
    let mut metadata = TrackMetadata::default();
    let mut has_metadata = false;

    let mut rest = args[1..].iter();
    let mut positional_seen = false;
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--title" | "--artist" | "--album" | "--year" | "--track" => {
                let Some(value) = rest.next() else {
                    anyhow::bail!("missing value for {arg}");
                };
                has_metadata = true;
                match arg.as_str() {
                    "--title" => metadata.title = Some(value.clone()),
                    "--artist" => metadata.artist = Some(value.clone()),
                    "--album" => metadata.album = Some(value.clone()),
                    "--year" => metadata.year = Some(value.parse()?),
                    _ => metadata.track_number = Some(value.parse()?),
                }
            }
            other if !positional_seen => {
                positional_seen = true;
                quality = Quality::from_str(other)?;
            }
            other => anyhow::bail!("unexpected argument: {other}"),
        }
    }

    if find_ffmpeg().is_none() {
        log::warn!("ffmpeg not found on PATH; audio extraction and splitting will fail");
    }

    let fetcher = MusicFetcher::new(
        yt_dlp_path,
        cfg.download_dir.clone(),
        cfg.retry_policy(),
        updater,
    )?;
    log::info!("download directory: {:?}", fetcher.download_dir());

    let mut reporter = ProgressReporter::new();
    let mut on_progress = move |update: &ProgressUpdate| {
        reporter.update(update);
    };

    let meta = has_metadata.then_some(&metadata);
    let result = match quality {
        Quality::Audio => {
            fetcher.download_audio(&url, meta, Some(&mut on_progress)).await
        }
        quality => {
            fetcher.download(&url, quality, false, meta, Some(&mut on_progress)).await
        }
    };

    match result {
        Ok(fetched) => {
            if fetched.already_existed {
                log::info!("already downloaded: {:?}", fetched.path);
            } else {
                log::info!("downloaded to {:?}", fetched.path);
            }
            println!("{}", fetched.path.display());
            Ok(())
        }
        Err(failure) => {
            log::error!("download failed: {}", failure);
            Err(Error::new(failure))
        }
    }
}

/// One entry of the split manifest: a time range plus its tag data.
#[derive(Debug, serde::Deserialize)]
struct TrackCut {
    start: f64,
    end: Option<f64>,
    #[serde(flatten)]
    metadata: TrackMetadata,
}

async fn run_split(args: &[String]) -> Result<(), Error> {
    let [source, manifest, rest @ ..] = args else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };
    let source = PathBuf::from(source);
    let output_dir = rest
        .first()
        .map(PathBuf::from)
        .or_else(|| source.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&output_dir)?;

    let cuts: Vec<TrackCut> = serde_json::from_str(&std::fs::read_to_string(manifest)?)?;
    let spans: Vec<TrackSpan> =
        cuts.iter().map(|c| TrackSpan { start: c.start, end: c.end }).collect();
    let metadata: Vec<TrackMetadata> = cuts.into_iter().map(|c| c.metadata).collect();

    let Some(ffmpeg_path) = find_ffmpeg() else {
        anyhow::bail!("ffmpeg not found on PATH; it is required for splitting");
    };

    let mut reporter = ProgressReporter::new();
    let mut on_progress = move |update: &ProgressUpdate| {
        if update.stage == DownloadStage::Skipped {
            log::info!("track already present ({:.0}%)", update.percent);
        } else {
            reporter.update(update);
        }
    };

    let splitter = TrackSplitter::new(ffmpeg_path);
    let outputs = splitter
        .split(&source, &spans, &output_dir, &metadata, Some(&mut on_progress))
        .await?;

    log::info!("split produced {} tracks", outputs.len());
    for path in outputs {
        println!("{}", path.display());
    }
    Ok(())
}
