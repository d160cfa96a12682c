use clap::Parser;
use logweave::cli::RunOptions;
use logweave::config::{ColorMode, OutputMode};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "logweave")]
#[command(about = "Merge and pretty-print JSON line logs", long_about = None)]
struct Cli {
    /// Read only this file from the input path
    filename: Option<String>,

    /// Directory holding the log files
    #[arg(long, default_value = ".")]
    input_path: PathBuf,

    /// Keep reading as files grow
    #[arg(short, long)]
    follow: bool,

    /// Output file (single mode) or directory (per mode)
    #[arg(long)]
    output_path: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = OutputMode::Per)]
    output_mode: OutputMode,

    /// Also write merged output to stdout (implies single mode)
    #[arg(long)]
    stdout: bool,

    /// Only read files whose name matches
    #[arg(long = "regex", value_name = "RE", conflicts_with = "exclude")]
    include: Option<String>,

    /// Skip files whose name matches
    #[arg(long = "no-regex", value_name = "RE")]
    exclude: Option<String>,

    #[arg(long, value_enum)]
    color: Option<ColorMode>,

    /// Keep at most this many trailing characters of the source name
    #[arg(long)]
    who_width: Option<usize>,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,

    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_directive = if cli.quiet { "logweave=error" } else { "logweave=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let options = RunOptions {
        input_path: cli.input_path,
        file_name: cli.filename,
        follow: cli.follow,
        output_path: cli.output_path,
        output_mode: cli.output_mode,
        stdout: cli.stdout,
        include: cli.include,
        exclude: cli.exclude,
        color: cli.color,
        who_width: cli.who_width,
        config_path: cli.config,
    };

    logweave::cli::run(options).await?;
    Ok(())
}
