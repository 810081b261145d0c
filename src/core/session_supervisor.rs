//! 会话监管：取消与暂停
//!
//! 持有根 CancellationToken；每次运行取子 token 向下传给编排器、ReAct 循环与流协调器，
//! 取消后正在进行的推理调用会在 select! 中立刻中止。

use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

/// 会话级生命周期管理：取消令牌与暂停状态
#[derive(Debug, Default)]
pub struct SessionSupervisor {
    cancel_token: CancellationToken,
    /// 暂停后编排器在下一步之前停下等待输入
    paused: AtomicBool,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// 触发取消（用户 Ctrl+C）
    pub fn cancel(&self) {
        tracing::info!("session cancelled");
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    /// 创建子 token（用于单次运行）
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}
