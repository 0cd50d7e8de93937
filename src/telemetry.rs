//! ログ出力の初期化
//!
//! # 責務
//!
//! - `tracing-subscriber` のレジストリに次のレイヤーを組み立てて登録する
//!   - `EnvFilter`（既定レベルは設定から、`RUST_LOG` が優先）
//!   - コンソール出力
//!   - ログディレクトリが設定されている場合、日次ローテーションのファイル出力（JSON 形式も可）
//!
//! ファイル出力は非ブロッキングです。返された [`WorkerGuard`] を `main` で保持しないと、
//! 終了時に未書き込みのログが失われます。

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::LoggingConfig;
use crate::error::TelemetryError;

/// ログファイル名の接頭辞
pub const LOG_FILE_PREFIX: &str = "stepchain.log";

/// ロガーを初期化する
///
/// ```rust,no_run
/// use stepchain::config::LoggingConfig;
///
/// let _guard = stepchain::telemetry::init(&LoggingConfig::default())?;
/// tracing::info!("started");
/// # Ok::<(), stepchain::error::TelemetryError>(())
/// ```
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>, TelemetryError> {
    let (file_layer, guard) = match &config.directory {
        Some(dir) => {
            let (writer, guard) = tracing_appender::non_blocking(file_appender(dir)?);
            let layer = if config.json {
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false)
                    .boxed()
            } else {
                fmt::layer().with_writer(writer).with_ansi(false).boxed()
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter(&config.level))
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()?;
    Ok(guard)
}

/// `RUST_LOG` があればそれを、無ければ `default_level` を使うフィルター
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// 日次ローテーションのファイル出力先
pub fn file_appender(dir: &Path) -> Result<RollingFileAppender, TelemetryError> {
    Ok(RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .build(dir)?)
}
