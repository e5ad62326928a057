use anyhow::Context;
use boxwright_config::{RemotesConfig, ResolvedRemote};
use boxwright_container::DockerRuntime;
use colored::Colorize;

/// config.yml を読み込み、リモート名を接続先に解決する
pub fn resolve(identifier: &str) -> anyhow::Result<ResolvedRemote> {
    let config = RemotesConfig::load_default();
    config
        .resolve(identifier)
        .with_context(|| format!("リモート '{}' を解決できません", identifier))
}

/// 信頼された接続だけを返す
pub async fn connect(remote: &ResolvedRemote) -> anyhow::Result<DockerRuntime> {
    println!(
        "{} リモート {} に接続中...",
        "→".blue(),
        remote.name.cyan()
    );
    let runtime = DockerRuntime::connect_trusted(remote).await?;
    Ok(runtime)
}
