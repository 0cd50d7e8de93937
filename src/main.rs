//! stepchain コマンド
//!
//! - `serve`: HTTP サーバーを起動する
//! - `models`: モデルカタログを表示する
//! - `check-template`: テンプレートファイルを検証する

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use stepchain::config::{AppConfig, WorkflowTemplate};
use stepchain::provider::catalog;

#[derive(Debug, Parser)]
#[command(name = "stepchain", version, about = "Multi-step LLM workflow server")]
struct Cli {
    /// 設定ファイル（省略時は ./stepchain.toml、無ければ既定値）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// HTTP サーバーを起動する
    Serve,
    /// 利用可能なモデルを表示する
    Models,
    /// テンプレートファイルを検証する
    CheckTemplate {
        /// テンプレートの TOML ファイル
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    let _guard = stepchain::telemetry::init(&config.logging)?;

    match cli.command {
        Command::Serve => stepchain::server::serve(&config).await?,
        Command::Models => {
            for (provider, models) in catalog::grouped() {
                println!("{provider}");
                for model in models {
                    let mode = if model.api.stream { "stream" } else { "buffered" };
                    println!("  {:<40} {:<8} {}", model.key(), mode, model.name);
                }
            }
        }
        Command::CheckTemplate { path } => {
            let template = WorkflowTemplate::from_file(&path)?;
            println!(
                "{}: {} ({} steps, model {})",
                path.display(),
                template.name(),
                template.steps().len(),
                template.model()
            );
        }
    }
    Ok(())
}
