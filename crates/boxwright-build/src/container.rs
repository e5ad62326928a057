//! 作業コンテナとそのライフサイクル
//!
//! ```text
//! absent -> created -> provisioning -> provisioned -> published
//!              \             \              \             \
//!               +-------------+--------------+-------------+--> destroyed
//! ```

use crate::error::{BuildError, BuildResult};
use boxwright_container::ContainerHandle;
use std::fmt;

/// 作業コンテナ名のプレフィックス
pub const CONTAINER_PREFIX: &str = "boxwright";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Absent,
    Created,
    Provisioning,
    Provisioned,
    Published,
    Destroyed,
}

impl ContainerState {
    pub fn can_transition_to(self, next: ContainerState) -> bool {
        use ContainerState::*;
        matches!(
            (self, next),
            (Absent, Created)
                | (Created, Provisioning)
                | (Provisioning, Provisioning)
                | (Provisioning, Provisioned)
                | (Provisioned, Published)
                | (Created | Provisioning | Provisioned | Published, Destroyed)
        )
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerState::Absent => "absent",
            ContainerState::Created => "created",
            ContainerState::Provisioning => "provisioning",
            ContainerState::Provisioned => "provisioned",
            ContainerState::Published => "published",
            ContainerState::Destroyed => "destroyed",
        };
        write!(f, "{}", s)
    }
}

/// 1回のビルドが専有する作業コンテナ
///
/// state を書き換えるのは所有するエンジンだけ。
#[derive(Debug, Clone)]
pub struct BuildContainer {
    pub name: String,
    pub remote: String,
    state: ContainerState,
    handle: Option<ContainerHandle>,
    /// リモートが作成を応答したか（false なら名前だけの仮ハンドル）
    confirmed: bool,
}

impl BuildContainer {
    pub fn new(name: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            remote: remote.into(),
            state: ContainerState::Absent,
            handle: None,
            confirmed: false,
        }
    }

    /// ビルドごとに一意なコンテナ名
    pub fn generate_name() -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-{}", CONTAINER_PREFIX, &id[..12])
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    pub fn handle(&self) -> Option<&ContainerHandle> {
        self.handle.as_ref()
    }

    /// 作成が確認できたコンテナか
    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    /// リモートに作成されたコンテナを紐付ける（absent -> created）
    pub(crate) fn attach(&mut self, handle: ContainerHandle) -> BuildResult<()> {
        self.advance(ContainerState::Created)?;
        self.handle = Some(handle);
        self.confirmed = true;
        Ok(())
    }

    /// 作成要求の応答を待たずに中断したとき、名前で削除を試みるための仮ハンドル
    pub(crate) fn attach_unconfirmed(&mut self) -> BuildResult<()> {
        self.advance(ContainerState::Created)?;
        self.handle = Some(ContainerHandle {
            name: self.name.clone(),
            id: self.name.clone(),
            remote: self.remote.clone(),
        });
        Ok(())
    }

    pub(crate) fn advance(&mut self, next: ContainerState) -> BuildResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(BuildError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(container = %self.name, "{} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }
}
