use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use yt2mp3::{
    artifact::DEFAULT_TITLE,
    client::{ApiClient, DEFAULT_SERVER},
    flow::{ConversionFlow, FlowState, format_duration},
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Convert a YouTube video to MP3 through a yt2mp3 server")]
struct Args {
    /// Watch, youtu.be, shorts, embed or music URL
    url: String,

    /// Base URL of the yt2mp3 server
    #[arg(long, default_value = DEFAULT_SERVER)]
    server: String,

    /// Directory the MP3 is written to
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "yt2mp3=warn".to_string()),
        )
        .init();

    let args = Args::parse();
    let client = ApiClient::new(&args.server)?;
    let mut flow = ConversionFlow::new();

    client
        .run_flow(&mut flow, &args.url, render)
        .await
        .context("Conversion flow failed")?;

    match flow.state() {
        FlowState::Ready { download, .. } => {
            let path = args.output_dir.join(local_filename(&download.filename));
            tokio::fs::write(&path, &download.payload)
                .await
                .with_context(|| format!("Writing {}", path.display()))?;
            println!("Saved {} ({} bytes)", path.display(), download.payload.len());
        }
        FlowState::Failed { message } => bail!("{message}"),
        other => bail!("Flow stopped while {}", other.name()),
    }

    // Releases the payload.
    flow.reset()?;
    Ok(())
}

fn render(state: &FlowState) {
    match state {
        FlowState::Idle {
            validation_error: Some(message),
        } => eprintln!("{message}"),
        FlowState::Previewing {
            metadata: Some(metadata),
            ..
        } => {
            println!("{}", metadata.title);
            if let Some(channel) = &metadata.channel {
                println!("  {channel}");
            }
            println!("  {}", format_duration(metadata.duration));
        }
        FlowState::Converting { .. } => println!("Converting to MP3, this may take a moment..."),
        _ => {}
    }
}

// Never trust the server with directory components.
fn local_filename(name: &str) -> String {
    Path::new(name)
        .file_name()
        .and_then(|name| name.to_str())
        .map(ToString::to_string)
        .unwrap_or_else(|| format!("{DEFAULT_TITLE}.mp3"))
}
