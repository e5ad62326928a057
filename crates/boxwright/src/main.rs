mod build;
mod remote;

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "boxwright", version)]
#[command(
    about = "ベースイメージから使い捨てコンテナを立ち上げ、イメージを組み立てる",
    long_about = None
)]
struct Cli {
    /// ビルド定義（"-" で標準入力から読み込む）
    #[arg(value_name = "SPEC")]
    spec: Option<String>,

    /// ビルド定義ファイル
    #[arg(short = 'f', long = "file", default_value = "boxfile.yml")]
    file: PathBuf,

    /// copy ステップのソースを解決するディレクトリ
    #[arg(short = 'c', long = "context", default_value = ".")]
    context: PathBuf,

    /// ビルド後も作業コンテナを残す
    #[arg(short = 'k', long = "keep")]
    keep: bool,

    /// 詳細なログを出力
    #[arg(long)]
    verbose: bool,

    /// 使用するリモート（config.yml の名前またはアドレス）
    #[arg(long, env = "BOXWRIGHT_REMOTE", default_value = "local")]
    remote: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ログは stderr に出力
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    let options = build::BuildOptions {
        spec: cli.spec.unwrap_or_else(|| cli.file.display().to_string()),
        context: cli.context,
        keep: cli.keep,
        remote: cli.remote,
        show_progress: !cli.verbose,
    };

    if !build::handle(options).await? {
        std::process::exit(1);
    }
    Ok(())
}
