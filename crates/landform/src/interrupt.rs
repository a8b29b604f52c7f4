//! ステートロック保持中の Ctrl-C 処理
//!
//! ロック取得直後にハンドラーを登録する。変更を始める前の割り込みは
//! コマンドを中断し、呼び出し側でロックを解放する。
//! 実行開始後は新しいステップのスケジュールだけを止める。

use colored::Colorize;
use landform_cloud::CancelToken;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::warn;

pub struct Interrupt {
    cancel: CancelToken,
    watcher: JoinHandle<()>,
}

impl Interrupt {
    pub fn watch() -> Self {
        let cancel = CancelToken::new();
        let on_interrupt = cancel.clone();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, finishing running steps");
                eprintln!(
                    "{}",
                    "Interrupted: waiting for running operations to finish...".yellow()
                );
                on_interrupt.cancel();
            }
        });
        Self { cancel, watcher }
    }

    /// エグゼキューターに渡すトークン
    pub fn token(&self) -> &CancelToken {
        &self.cancel
    }

    /// 変更を伴わない処理を実行し、Ctrl-C で中断する
    pub async fn abandon_on_interrupt<F, T>(&self, work: F) -> anyhow::Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        if self.cancel.is_cancelled() {
            anyhow::bail!("interrupted, no changes were made");
        }

        tokio::select! {
            result = work => result,
            _ = tokio::signal::ctrl_c() => {
                self.cancel.cancel();
                anyhow::bail!("interrupted, no changes were made")
            }
        }
    }
}

impl Drop for Interrupt {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}
