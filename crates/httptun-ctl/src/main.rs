//! httptun-ctl — pipe stdin/stdout through an HTTP tunnel.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use httptun_client::TunnelConn;
use httptun_core::config::{ClientConfig, TunnelConfig};

// ── Connection ────────────────────────────────────────────────────────────────

async fn connect(config: &ClientConfig) -> Result<TunnelConn> {
    TunnelConn::from_config(config)
        .await
        .with_context(|| format!("failed to open tunnel at {} (is httptund running?)", config.endpoint))
}

// ── Subcommand handlers ───────────────────────────────────────────────────────

/// stdin → tunnel, tunnel → stdout. Stdin EOF closes the session.
async fn cmd_cat(config: &ClientConfig) -> Result<()> {
    let conn = connect(config).await?;
    let (mut rd, mut wr) = tokio::io::split(conn);

    let upload = async {
        let mut stdin = tokio::io::stdin();
        tokio::io::copy(&mut stdin, &mut wr).await?;
        wr.shutdown().await
    };
    let download = async {
        let mut stdout = tokio::io::stdout();
        tokio::io::copy(&mut rd, &mut stdout).await?;
        stdout.flush().await
    };

    tokio::try_join!(upload, download).context("tunnel copy failed")?;
    Ok(())
}

/// Send one line and print the first line that comes back.
async fn cmd_ping(config: &ClientConfig, text: &str) -> Result<()> {
    let mut conn = connect(config).await?;
    let line = format!("{}\n", text);

    let started = std::time::Instant::now();
    conn.write(line.as_bytes()).await.context("write failed")?;

    let mut reply = String::new();
    {
        let mut reader = BufReader::new(&mut conn);
        reader.read_line(&mut reply).await.context("read failed")?;
    }
    let elapsed = started.elapsed();

    conn.close().await.context("close failed")?;

    if reply.is_empty() {
        anyhow::bail!("tunnel closed before replying");
    }
    println!("{} ({:.1} ms)", reply.trim_end(), elapsed.as_secs_f64() * 1000.0);
    Ok(())
}

fn print_usage(default_url: &str) {
    println!("Usage: httptun-ctl [--url <url>] <command>");
    println!();
    println!("Commands:");
    println!("  cat           Pipe stdin to the tunnel and the tunnel to stdout");
    println!("  ping [text]   Send one line and print the reply");
    println!();
    println!("Options:");
    println!("  --url <url>   Tunnel endpoint (default: {})", default_url);
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut config = TunnelConfig::load().unwrap_or_default().client;

    // Parse --url option
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--url" {
            i += 1;
            config.endpoint = args.get(i).context("--url requires a value")?.clone();
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["cat"] | []                   => cmd_cat(&config).await,
        ["ping"]                       => cmd_ping(&config, "ping").await,
        ["ping", text @ ..]            => cmd_ping(&config, &text.join(" ")).await,
        ["help"] | ["--help"] | ["-h"] => { print_usage(&config.endpoint); Ok(()) }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage(&config.endpoint);
            std::process::exit(1);
        }
    }
}
