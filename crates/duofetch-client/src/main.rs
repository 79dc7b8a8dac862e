use std::io::Write;

use duofetch_client::{ClientConfig, Orchestrator};
use duofetch_protocol::Transport;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "duofetch_client=info,duofetch_protocol=info".into()),
        )
        .init();

    let config = ClientConfig::from_env()?;
    info!(
        "Config: server={} tcp={} udp={} download_dir={} files={}",
        config.server_host,
        config.tcp_port,
        config.udp_port,
        config.download_dir.display(),
        config.files.join(","),
    );

    // First argument skips the prompt.
    let choice = match std::env::args().nth(1) {
        Some(arg) => arg,
        None => prompt_transport()?,
    };
    let transport: Transport = match choice.parse() {
        Ok(t) => t,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };

    let summary = Orchestrator::new(config).run(transport).await?;

    println!();
    println!("{} transfer summary", summary.transport);
    for outcome in &summary.outcomes {
        match &outcome.result {
            Ok(report) => println!(
                "  {:<16} {:>10} bytes  {:>10.2} ms  {:<17} sha256={}",
                outcome.name,
                report.bytes,
                report.elapsed_ms(),
                report.completion,
                report.sha256
            ),
            Err(e) => println!("  {:<16} FAILED: {}", outcome.name, e),
        }
    }
    println!(
        "{} succeeded, {} failed",
        summary.succeeded(),
        summary.failed()
    );

    Ok(())
}

fn prompt_transport() -> anyhow::Result<String> {
    print!("Select transport (TCP/UDP): ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line)
}
