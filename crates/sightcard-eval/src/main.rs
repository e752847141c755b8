use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use sightcard_eval::{
    load_samples, run, write_results, HttpTransport, Summary, DEFAULT_API_URL, DEFAULT_EVAL_FILE,
    DEFAULT_RESULTS_FILE,
};

#[derive(Debug, Parser)]
#[command(name = "sightcard-eval", version, about = "Score the analysis API against labeled samples")]
struct Cli {
    /// Full URL of the analyze endpoint.
    #[arg(long, env = "SIGHTCARD_API_URL", default_value = DEFAULT_API_URL)]
    url: String,

    /// JSONL file of samples.
    #[arg(long, default_value = DEFAULT_EVAL_FILE)]
    eval_file: PathBuf,

    /// Run log destination. Overwritten on every run.
    #[arg(long, default_value = DEFAULT_RESULTS_FILE)]
    out: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let samples = load_samples(&cli.eval_file).await?;
    info!(samples = samples.len(), url = %cli.url, "starting evaluation");

    let records = run(&samples, &HttpTransport::new(&cli.url)).await;
    write_results(&cli.out, &records)?;
    info!("detailed evaluation results saved to {}", cli.out.display());

    println!("\n--- Evaluation Summary ---");
    print!("{}", Summary::from_records(&records));
    Ok(())
}
