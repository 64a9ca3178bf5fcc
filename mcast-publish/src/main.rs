//! mcast-publish - Publish prepared media to social video platforms

use std::io::{IsTerminal, Read};
use std::time::Duration;

use clap::{Parser, Subcommand};
use libmediacast::events::Event;
use libmediacast::logging::LoggingConfig;
use libmediacast::service::MediacastService;
use libmediacast::store::JobJournal;
use libmediacast::types::{FormatOptions, MediaSpec, MediaType, Privacy, PublishFormat};
use libmediacast::{Config, ErrorKind, MediacastError, PublishJob, PublishRequest, PublishResult, Result};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "mcast-publish")]
#[command(version, about = "Publish prepared media to social video platforms")]
#[command(long_about = "\
mcast-publish - Publish prepared media to social video platforms

DESCRIPTION:
    Uploads a video or image that is already hosted at a public URL, waits
    for the platform to finish processing it and publishes the result.
    Every job is journaled, so an interrupted run can be resumed and a job
    that timed out can be checked again later.

USAGE:
    # Publish a reel
    mcast-publish publish --account meta-17841400000000000 \\
        --media-url https://cdn.example.com/clip.mp4 --caption \"Launch day\"

    # Caption from stdin, JSON result for scripting
    echo \"Launch day\" | mcast-publish publish --account ID \\
        --media-url URL --format-out json | jq -r .result.post_id

    # YouTube Short, unlisted
    mcast-publish publish --account youtube-UC123 --format short \\
        --privacy unlisted --media-url URL --caption \"Sixty seconds\"

    # Continue jobs interrupted by a crash or shutdown
    mcast-publish resume

    # Ask the platform again about a job that timed out
    mcast-publish recheck 6f1c2e1a-...

SIGNALS:
    SIGTERM, SIGINT - Cancel the running job at the next safe point

EXIT CODES:
    0 - Success
    1 - Publishing failed
    2 - Authentication or token error
    3 - Invalid input
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Seconds between status checks (overrides config), e.g. 10s
    #[arg(long, global = true, value_name = "DURATION", value_parser = humantime::parse_duration)]
    poll_interval: Option<Duration>,

    /// Maximum number of status checks (overrides config)
    #[arg(long, global = true, value_name = "N")]
    max_polls: Option<u32>,

    /// Output format
    #[arg(long = "format-out", global = true, default_value = "text", value_name = "FORMAT")]
    #[arg(value_parser = ["text", "json"])]
    output: String,

    /// Print each status check to stderr
    #[arg(long, global = true)]
    progress: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Publish media to an account
    Publish {
        /// Account id (see mcast-accounts list)
        #[arg(short, long)]
        account: String,

        /// Publicly reachable URL of the prepared media
        #[arg(long, value_name = "URL")]
        media_url: String,

        /// Media type (video or image)
        #[arg(long, default_value = "video")]
        media_type: MediaType,

        /// Caption or description (reads from stdin if not provided)
        #[arg(short, long)]
        caption: Option<String>,

        /// Publishing format (reel, feed, story, short, video)
        #[arg(short, long, default_value = "reel")]
        format: PublishFormat,

        /// Video title (YouTube)
        #[arg(long)]
        title: Option<String>,

        /// Visibility once published (YouTube)
        #[arg(long)]
        privacy: Option<Privacy>,

        /// Comma-separated tags (YouTube)
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Also show the reel in the profile feed (Meta)
        #[arg(long)]
        share_to_feed: Option<bool>,
    },

    /// Continue every journaled job that did not reach a final state
    Resume,

    /// Check a timed-out job once more and publish it if it is ready
    Recheck {
        /// Job id printed by `publish`
        job_id: String,
    },

    /// Show recent jobs
    Jobs {
        /// Maximum number of jobs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Delete a published post
    Delete {
        #[arg(short, long)]
        account: String,

        post_id: String,
    },

    /// Fetch normalized metrics for a published post
    Insights {
        #[arg(short, long)]
        account: String,

        post_id: String,
    },
}

#[derive(Serialize)]
struct JobOutput<'a> {
    job_id: &'a str,
    state: &'a str,
    result: Option<&'a PublishResult>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::from_env(cli.verbose).init();

    match run(cli).await {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let mut config = Config::load()?;
    if let Some(interval) = cli.poll_interval {
        config.polling.interval = interval;
    }
    if let Some(max_polls) = cli.max_polls {
        config.polling.max_attempts = max_polls;
    }
    config.validate()?;

    let service = MediacastService::from_config(config).await?;
    let cancel = CancellationToken::new();
    setup_signal_handlers(cancel.clone())?;
    if cli.progress {
        spawn_progress_printer(&service);
    }
    let json = cli.output == "json";

    match cli.command {
        Commands::Publish {
            account,
            media_url,
            media_type,
            caption,
            format,
            title,
            privacy,
            tags,
            share_to_feed,
        } => {
            if !media_url.starts_with("https://") && !media_url.starts_with("http://") {
                return Err(MediacastError::InvalidInput(format!(
                    "Media URL must be http(s): {}",
                    media_url
                )));
            }
            let request = PublishRequest {
                account_id: account,
                media: MediaSpec {
                    url: media_url,
                    media_type,
                },
                caption: read_caption(caption)?,
                format,
                options: FormatOptions {
                    title,
                    tags,
                    share_to_feed,
                    privacy,
                    ..FormatOptions::default()
                },
            };

            let workflow = service.workflow();
            let job = workflow.run(workflow.create_job(request), &cancel).await;
            print_job(&job, json)?;
            Ok(job.result.as_ref().map(result_exit_code).unwrap_or(1))
        }
        Commands::Resume => {
            let jobs = service.workflow().resume_unfinished(&cancel).await?;
            if jobs.is_empty() {
                info!("No unfinished jobs");
            }
            let mut code = 0;
            for job in &jobs {
                print_job(job, json)?;
                code = code.max(job.result.as_ref().map(result_exit_code).unwrap_or(1));
            }
            Ok(code)
        }
        Commands::Recheck { job_id } => {
            let mut job = service.job(&job_id).await?;
            let result = service.workflow().check_again(&mut job).await?;
            print_job(&job, json)?;
            Ok(result_exit_code(&result))
        }
        Commands::Jobs { limit } => {
            let jobs = service.database().recent(limit).await?;
            if json {
                println!("{}", to_json(&jobs)?);
            } else {
                for job in &jobs {
                    println!(
                        "{}  {}  {:<20} {}",
                        job.updated_at.format("%Y-%m-%d %H:%M:%S"),
                        job.id,
                        job.state.as_str(),
                        job.account_id
                    );
                }
            }
            Ok(0)
        }
        Commands::Delete { account, post_id } => {
            service.delete_post(&account, &post_id).await?;
            if json {
                println!("{}", serde_json::json!({ "deleted": post_id }));
            } else {
                println!("Deleted {}", post_id);
            }
            Ok(0)
        }
        Commands::Insights { account, post_id } => {
            let snapshot = service.insights().get_insights(&account, &post_id).await?;
            if json {
                println!("{}", to_json(&snapshot)?);
            } else {
                println!("{} (fetched {})", snapshot.post_id, snapshot.fetched_at.to_rfc3339());
                let metrics = serde_json::to_value(&snapshot.metrics)?;
                if let Some(map) = metrics.as_object() {
                    for (name, value) in map {
                        match value.as_f64() {
                            Some(v) => println!("  {:<20} {}", name, v),
                            None => println!("  {:<20} -", name),
                        }
                    }
                }
            }
            Ok(0)
        }
    }
}

/// Caption from the flag, or from stdin when it is piped
fn read_caption(caption: Option<String>) -> Result<String> {
    if let Some(caption) = caption {
        return Ok(caption);
    }
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Ok(String::new());
    }
    let mut buffer = String::new();
    stdin
        .lock()
        .read_to_string(&mut buffer)
        .map_err(|e| MediacastError::InvalidInput(format!("Failed to read caption from stdin: {}", e)))?;
    Ok(buffer.trim_end().to_string())
}

fn result_exit_code(result: &PublishResult) -> i32 {
    match result.error_kind {
        None => 0,
        Some(ErrorKind::TokenError) => 2,
        Some(_) => 1,
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn print_job(job: &PublishJob, json: bool) -> Result<()> {
    if json {
        let output = JobOutput {
            job_id: &job.id,
            state: job.state.as_str(),
            result: job.result.as_ref(),
        };
        println!("{}", to_json(&output)?);
        return Ok(());
    }

    eprintln!("Job {}", job.id);
    match &job.result {
        Some(result) if result.success => {
            if let Some(post_id) = &result.post_id {
                println!("{}", post_id);
            }
            if let Some(url) = &result.post_url {
                println!("{}", url);
            }
        }
        Some(result) => {
            let kind = result.error_kind.map(|k| k.as_str()).unwrap_or("unknown");
            eprintln!(
                "Failed ({}): {}",
                kind,
                result.error_detail.as_deref().unwrap_or_default()
            );
        }
        None => eprintln!("Job stopped in state {}", job.state.as_str()),
    }
    Ok(())
}

fn spawn_progress_printer(service: &MediacastService) {
    let mut events = service.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::ContainerCreated { container_id, .. } => {
                    eprintln!("Container {} created", container_id)
                }
                Event::PollTick { attempt, status, .. } => eprintln!(
                    "Check {}: {}",
                    attempt,
                    status.map(|s| s.as_str()).unwrap_or("no answer")
                ),
                Event::StateChanged { to, .. } => eprintln!("-> {}", to.as_str()),
                _ => {}
            }
        }
    });
}

/// Cancel the running job on SIGINT or SIGTERM
#[cfg(unix)]
fn setup_signal_handlers(cancel: CancellationToken) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;

    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            warn!("Received shutdown signal, cancelling at the next safe point...");
            cancel.cancel();
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(cancel: CancellationToken) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl-C, cancelling at the next safe point...");
            cancel.cancel();
        }
    });
    Ok(())
}
