//! xpost - Publish one post to Bluesky and Twitter at once

use clap::Parser;
use libcrosspost::config::Config;
use libcrosspost::events::{Event, EventBus};
use libcrosspost::logging::{LogFormat, LoggingConfig};
use libcrosspost::types::parse_alt_texts;
use libcrosspost::{
    AggregateResponse, Crosspost, CrosspostError, HttpResponse, PostRequest, ResponseBody,
    TargetName, TargetRegistry, UploadStager,
};
use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "xpost")]
#[command(version)]
#[command(about = "Publish one post to several social platforms at once")]
#[command(long_about = "\
xpost - Publish one post to several social platforms at once

DESCRIPTION:
    xpost takes a text and up to four images, resizes the images to fit
    platform limits and publishes the post to every requested platform
    concurrently. Each platform succeeds or fails on its own; the command
    succeeds when at least one platform accepted the post.

    Every requested platform must be configured and able to log in,
    otherwise nothing is posted anywhere.

USAGE:
    # Post to the default platforms
    xpost \"Hello world\"

    # Read text from stdin, attach images with alt text
    echo \"New photos\" | xpost -i a.jpg -a \"A red kite\" -i b.png

    # Only Bluesky, JSON output
    xpost -t bluesky -f json \"Hello Bluesky\"

CONFIGURATION:
    Configuration file: ~/.config/crosspost/config.toml
    (override with --config or CROSSPOST_CONFIG)

    Credentials may come from the environment instead:
    BLUESKY_IDENTIFIER, BLUESKY_PASSWORD, BLUESKY_SERVICE,
    TWITTER_API_KEY, TWITTER_KEY_SECRET,
    TWITTER_ACCESS_TOKEN, TWITTER_ACCESS_TOKEN_SECRET

EXIT CODES:
    0 - Posted to at least one platform
    1 - Every platform failed, or an internal error
    2 - A platform is not configured or failed to authenticate
    3 - Invalid input
")]
struct Cli {
    /// Post text (reads from stdin if not provided)
    text: Option<String>,

    /// Image to attach (repeatable, up to 4)
    #[arg(short, long = "image", value_name = "PATH")]
    images: Vec<PathBuf>,

    /// Alt text for the image at the same position (repeatable)
    #[arg(short, long = "alt", value_name = "TEXT", conflicts_with = "alt_texts")]
    alt: Vec<String>,

    /// Alt texts as a JSON array of strings
    #[arg(long, value_name = "JSON")]
    alt_texts: Option<String>,

    /// Target platform(s), comma-separated (default from config)
    #[arg(short, long, value_name = "LIST")]
    targets: Option<String>,

    /// Path to the config file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Per-platform timeout in seconds (default from config)
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Print progress events to stderr
    #[arg(long)]
    progress: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log format (text, json, pretty)
    #[arg(long, env = "CROSSPOST_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Print a default configuration file and exit
    #[arg(long)]
    init_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::from_env()
        .with_format(cli.log_format.unwrap_or_default())
        .with_verbose(cli.verbose)
        .init();

    if cli.init_config {
        match Config::default_config().to_toml() {
            Ok(toml) => {
                print!("{}", toml);
                return;
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(e.exit_code());
            }
        }
    }

    let format = cli.format;
    let response = HttpResponse::from_result(run(cli).await);
    print_response(&response, format);
    std::process::exit(response.exit_code);
}

async fn run(cli: Cli) -> libcrosspost::Result<AggregateResponse> {
    let config = load_config(cli.config.as_deref())?;

    let text = match cli.text {
        Some(text) => text,
        None => read_stdin()?,
    };

    let alt_texts = match cli.alt_texts.as_deref() {
        Some(raw) => parse_alt_texts(Some(raw)),
        None => cli.alt,
    };

    let targets = match cli.targets.as_deref() {
        Some(list) => TargetName::parse_list(list).map_err(CrosspostError::Validation)?,
        None => config.default_targets()?,
    };

    let registry = TargetRegistry::from_config(&config)?;

    let stager = UploadStager::new(config.staging_dir()).with_limits(config.upload_limits());
    let images = stager.stage(&cli.images).await?;
    debug!(
        "Staged {} image(s) under {}",
        images.len(),
        stager.staging_root().display()
    );

    let timeout = cli
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.timeout());

    let mut crosspost = Crosspost::new(registry)
        .with_timeout(timeout)
        .with_limits(config.transcode_limits());

    let progress = if cli.progress {
        let events = EventBus::default();
        let printer = tokio::spawn(print_progress(events.subscribe()));
        crosspost = crosspost.with_events(events);
        Some(printer)
    } else {
        None
    };

    let request = PostRequest::new(text)
        .with_images(images)
        .with_alt_texts(alt_texts)
        .with_targets(targets);

    let result = crosspost.post(request).await;

    // Dropping the last bus handle closes the channel and lets the printer finish
    drop(crosspost);
    if let Some(printer) = progress {
        let _ = printer.await;
    }

    result
}

fn load_config(path: Option<&std::path::Path>) -> libcrosspost::Result<Config> {
    match path {
        Some(path) => {
            let mut config = Config::load_from_path(path)?;
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        }
        None => Config::load(),
    }
}

/// Read the post text from stdin unless it is a terminal
fn read_stdin() -> libcrosspost::Result<String> {
    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Ok(String::new());
    }

    let mut buffer = String::new();
    stdin.read_to_string(&mut buffer)?;
    Ok(buffer.trim_end_matches(['\n', '\r']).to_string())
}

async fn print_progress(mut receiver: libcrosspost::events::EventReceiver) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        match receiver.recv().await {
            Ok(event) => {
                let terminal = event.is_terminal();
                if let Some(line) = progress_line(&event) {
                    eprintln!("{}", line);
                }
                if terminal {
                    break;
                }
            }
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
}

fn progress_line(event: &Event) -> Option<String> {
    match event {
        Event::RequestStarted {
            targets,
            image_count,
            ..
        } => Some(format!(
            "Posting to {} ({} image(s))...",
            targets.join(", "),
            image_count
        )),
        Event::TargetStarted { target, .. } => Some(format!("  {}: uploading", target)),
        Event::TargetCompleted { target, .. } => Some(format!("  {}: posted", target)),
        Event::TargetFailed { target, error, .. } => Some(format!("  {}: failed ({})", target, error)),
        Event::RequestCompleted { .. } | Event::RequestFailed { .. } => None,
    }
}

fn print_response(response: &HttpResponse, format: OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(&response.body) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Error: failed to serialize response: {}", e),
        },
        OutputFormat::Text => print_text(response),
    }
}

fn print_text(response: &HttpResponse) {
    match &response.body {
        ResponseBody::Created {
            message,
            responses,
            image_count,
        } => {
            println!("{} ({} image(s))", message, image_count);
            for result in responses {
                match (&result.data, &result.error) {
                    (Some(data), _) if result.success => {
                        println!("  {}: ok {}", result.platform, receipt_summary(data))
                    }
                    (_, error) => println!(
                        "  {}: failed {}",
                        result.platform,
                        error.as_deref().unwrap_or("")
                    ),
                }
            }
        }
        ResponseBody::Error {
            error,
            errors,
            details,
        } => {
            eprintln!("Error: {}", error);
            for line in errors.iter().flatten() {
                eprintln!("  {}", line);
            }
            for result in details.iter().flatten() {
                eprintln!(
                    "  {}: {}",
                    result.platform,
                    result.error.as_deref().unwrap_or("failed")
                );
            }
        }
    }
}

/// Shortest useful identifier of a created post
fn receipt_summary(data: &serde_json::Value) -> String {
    ["uri", "id"]
        .iter()
        .find_map(|key| data.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
        .unwrap_or_else(|| data.to_string())
}
