//! CLI entry point for the WebDAV client.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::fs::OpenOptions;
use tracing::{debug, info};
use webdav_core::transport::{HttpTransport, TransportConfig};
use webdav_core::{Completion, ConnectionConfig, WebDavClient};

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Not `?args`: it carries the password.
    debug!(
        scheme = ?args.scheme,
        host = %args.host,
        port = args.port,
        root = %args.root,
        username = %args.username,
        command = ?args.command,
        "CLI arguments parsed"
    );

    let config = ConnectionConfig::new(args.scheme.into(), args.host.as_str())?
        .port(args.port)
        .root_path(args.root.as_str())
        .credentials(args.username.as_str(), args.password.as_str());
    let transport = HttpTransport::new(TransportConfig {
        connect_timeout: Duration::from_secs(args.connect_timeout),
        read_timeout: Duration::from_secs(args.read_timeout),
        ..TransportConfig::default()
    })
    .context("failed to build HTTP client")?;
    let client = WebDavClient::new(Arc::new(transport), config);
    info!(base_url = %client.config().base_url(), "WebDAV client ready");

    run(&client, args.command).await
}

async fn run(client: &WebDavClient, command: Command) -> Result<()> {
    match command {
        Command::Get {
            remote,
            output: Some(path),
            offset,
        } => {
            // Resuming appends to what is already on disk.
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .append(offset > 0)
                .truncate(offset == 0)
                .open(&path)
                .await
                .with_context(|| format!("cannot open {}", path.display()))?;
            let done = client.fetch_range(&remote, file, offset)?.completed().await?;
            report("fetched", &remote, &done);
        }
        Command::Get {
            remote,
            output: None,
            ..
        } => {
            let done = client
                .fetch_into(&remote, tokio::io::stdout())?
                .completed()
                .await?;
            report("fetched", &remote, &done);
        }
        Command::Put { local, remote } => {
            let file = tokio::fs::File::open(&local)
                .await
                .with_context(|| format!("cannot open {}", local.display()))?;
            let length = file.metadata().await?.len();
            let done = client
                .store_from(&remote, file, Some(length))?
                .completed()
                .await?;
            report("stored", &remote, &done);
        }
        Command::Mkcol { remote } => {
            let done = client.create_collection(&remote)?.completed().await?;
            report("created collection", &remote, &done);
        }
        Command::Copy {
            from,
            to,
            overwrite,
        } => {
            let done = client.copy(&from, &to, overwrite)?.completed().await?;
            report("copied", &from, &done);
        }
        Command::Move {
            from,
            to,
            overwrite,
        } => {
            let done = client.move_to(&from, &to, overwrite)?.completed().await?;
            report("moved", &from, &done);
        }
        Command::Delete { remote } => {
            let done = client.remove(&remote)?.completed().await?;
            report("deleted", &remote, &done);
        }
        Command::Demo => demo(client).await?,
    }
    Ok(())
}

/// Store, fetch, then shuffle the file through a fresh collection and clean up.
async fn demo(client: &WebDavClient) -> Result<()> {
    const CONTENT: &str = "hello, world!!!";

    let done = client.store("/demo.txt", CONTENT)?.completed().await?;
    report("stored", "/demo.txt", &done);

    let done = client.fetch("/demo.txt")?.completed().await?;
    let body = done.body.clone().unwrap_or_default();
    anyhow::ensure!(
        &body[..] == CONTENT.as_bytes(),
        "fetched content differs from what was stored ({} bytes)",
        body.len()
    );
    report("fetched", "/demo.txt", &done);

    let done = client.create_collection("/demo/")?.completed().await?;
    report("created collection", "/demo/", &done);

    let done = client
        .copy("/demo.txt", "/demo/copy.txt", true)?
        .completed()
        .await?;
    report("copied", "/demo.txt", &done);

    let done = client
        .move_to("/demo.txt", "/demo/moved.txt", true)?
        .completed()
        .await?;
    report("moved", "/demo.txt", &done);

    let done = client.remove("/demo/")?.completed().await?;
    report("deleted", "/demo/", &done);

    info!("Demo complete");
    Ok(())
}

fn report(action: &str, path: &str, done: &Completion) {
    info!(
        path,
        status = %done.status,
        bytes = done.bytes_received,
        "{action}"
    );
}
