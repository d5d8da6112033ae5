//! forge – command-line front end for the invoice → PDF pipeline.
//!
//! Usage:
//!   forge render --request <request.json> --output <out.pdf> [--config <forge.json>]
//!   forge resolve --family Standard --kind Receipt
//!   forge sweep [--config <forge.json>]
//!
//! `RUST_LOG` controls log verbosity. Ctrl-C shuts the engine down before exit.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use invoice_forge::{Forge, ForgeConfig, ForgeError, LogObserver, RenderRequest};

#[derive(Parser)]
#[command(name = "forge")]
#[command(about = "Render invoice-like documents to PDF")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON config file (environment overrides still apply)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Render one request to a PDF file
    Render {
        /// JSON render request
        #[arg(short, long)]
        request: PathBuf,

        /// Where to write the PDF
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print the slot set a family/kind pair resolves to
    Resolve {
        #[arg(short, long, default_value = "Standard")]
        family: String,

        #[arg(short, long, default_value = "Invoice")]
        kind: String,
    },

    /// Run one cleanup pass over the artifact directory
    Sweep,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    if let Commands::Resolve { family, kind } = &cli.command {
        return print_slots(family, kind);
    }

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let forge = match Forge::builder(config).observer(std::sync::Arc::new(LogObserver)).build() {
        Ok(forge) => forge,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let code = tokio::select! {
        code = run(&forge, cli.command) => code,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted, shutting down");
            ExitCode::from(130)
        }
    };
    forge.shutdown().await;
    code
}

async fn run(forge: &Forge, command: Commands) -> ExitCode {
    match command {
        Commands::Render { request, output } => render(forge, &request, &output).await,
        Commands::Sweep => match forge.sweep_now().await {
            Ok(report) => {
                eprintln!(
                    "Swept '{}': {} scanned, {} removed, {} failed",
                    forge.config().temp_dir.display(),
                    report.scanned,
                    report.removed,
                    report.failed
                );
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error sweeping '{}': {e}", forge.config().temp_dir.display());
                ExitCode::FAILURE
            }
        },
        Commands::Resolve { family, kind } => print_slots(&family, &kind),
    }
}

async fn render(forge: &Forge, request_path: &Path, output: &Path) -> ExitCode {
    let request = match tokio::fs::read_to_string(request_path)
        .await
        .map_err(|e| ForgeError::InvalidRequest(format!("{}: {e}", request_path.display())))
        .and_then(|json| RenderRequest::from_json(&json))
    {
        Ok(request) => request,
        Err(e) => {
            eprintln!("Error reading request: {e}");
            return ExitCode::from(2);
        }
    };

    let artifact = match forge.render_with_timeout(request).await {
        Ok(artifact) => artifact,
        Err(failure) => {
            eprintln!("Error: {failure}");
            return if failure.kind().is_client_error() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            };
        }
    };

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                eprintln!("Error creating output directory: {e}");
                let _ = artifact.remove().await;
                return ExitCode::FAILURE;
            }
        }
    }

    let stream = match artifact.open().await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let mut out = match tokio::fs::File::create(output).await {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Error writing '{}': {e}", output.display());
            return ExitCode::FAILURE;
        }
    };
    match stream.stream_to(&mut out).await {
        Ok(bytes) => {
            eprintln!("Wrote '{}' ({bytes} bytes)", output.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error writing '{}': {e}", output.display());
            ExitCode::FAILURE
        }
    }
}

fn print_slots(family: &str, kind: &str) -> ExitCode {
    let slots = invoice_forge::resolve(family, kind);
    let entry = |source: &invoice_forge::templates::SlotSource| {
        serde_json::json!({
            "slot": source.slot.as_str(),
            "source": source.id(),
        })
    };
    let json = serde_json::json!({
        "family": slots.family.to_string(),
        "kind": slots.kind.to_string(),
        "slots": slots.slots().map(entry).collect::<Vec<_>>(),
    });
    match serde_json::to_string_pretty(&json) {
        Ok(text) => {
            println!("{text}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&Path>) -> invoice_forge::Result<ForgeConfig> {
    match path {
        Some(path) => ForgeConfig::from_file(path),
        None => {
            let mut config = ForgeConfig::default();
            config.apply_env();
            config.validate()?;
            Ok(config)
        }
    }
}
