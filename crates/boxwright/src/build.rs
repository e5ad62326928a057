use crate::remote;
use anyhow::Context;
use boxwright_build::{BuildEngine, BuildOutcome, BuildProgress};
use boxwright_container::RuntimeClient;
use boxwright_core::{SpecSource, load_build_spec};
use colored::Colorize;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 標準入力から読み込む指定
const STDIN_SPEC: &str = "-";

pub struct BuildOptions {
    pub spec: String,
    pub context: PathBuf,
    pub keep: bool,
    pub remote: String,
    pub show_progress: bool,
}

/// ビルドを実行し、成功したかを返す
///
/// 実行前の致命的エラー（定義・接続）は Err として返す。
pub async fn handle(options: BuildOptions) -> anyhow::Result<bool> {
    if !options.context.is_dir() {
        anyhow::bail!(
            "ビルドコンテキストが見つかりません: {}",
            options.context.display()
        );
    }

    let source = if options.spec == STDIN_SPEC {
        let mut content = String::new();
        std::io::stdin()
            .read_to_string(&mut content)
            .context("標準入力を読み込めません")?;
        SpecSource::Raw(content)
    } else {
        SpecSource::Path(PathBuf::from(&options.spec))
    };
    let spec = load_build_spec(source)
        .with_context(|| format!("ビルド定義を読み込めません: {}", options.spec))?;

    println!(
        "{} {} を {} から作成します ({} ステップ)",
        "→".blue(),
        spec.output.name.cyan(),
        spec.base_image.cyan(),
        spec.steps.len()
    );

    let resolved = remote::resolve(&options.remote)?;
    let runtime = remote::connect(&resolved).await?;
    let client: Arc<dyn RuntimeClient> = Arc::new(runtime);

    let token = CancellationToken::new();
    let progress = options
        .show_progress
        .then(|| BuildProgress::new(&spec.output.name));

    let mut engine = BuildEngine::new(spec, client, resolved.name.clone())?
        .with_context(&options.context)
        .with_cancellation(token.clone());
    if let Some(progress) = progress {
        engine = engine.with_progress(progress);
    }

    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, cancelling build");
            signal_token.cancel();
        }
    });

    let outcome = engine.execute(options.keep).await;
    Ok(report(&outcome))
}

fn report(outcome: &BuildOutcome) -> bool {
    match &outcome.result {
        Ok(reference) => {
            println!();
            println!("{} イメージを作成しました: {}", "✓".green(), reference);
        }
        Err(e) => {
            eprintln!();
            eprintln!("{} {}", "Error:".red().bold(), e.user_message());
        }
    }

    if outcome.retained {
        if let Some(container) = &outcome.container {
            println!(
                "  作業コンテナを残しました: {} (remote: {}, 状態: {})",
                container.name.cyan(),
                container.remote,
                container.state()
            );
        }
    }

    if let Some(cleanup) = &outcome.cleanup_error {
        eprintln!("{} {}", "Warning:".yellow().bold(), cleanup);
        eprintln!("  手動で削除してください: docker rm -f {}", cleanup.container);
    }

    outcome.is_success()
}
