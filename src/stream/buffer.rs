//! 待刷新的文本缓冲

/// 累积文本增量，按阈值或换行判定是否该刷新
#[derive(Debug, Default)]
pub struct StreamBuffer {
    pending: String,
    threshold_chars: usize,
}

impl StreamBuffer {
    pub fn new(threshold_chars: usize) -> Self {
        Self {
            pending: String::new(),
            threshold_chars: threshold_chars.max(1),
        }
    }

    pub fn push(&mut self, text: &str) {
        self.pending.push_str(text);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// 达到字符阈值，或以换行结尾（一行已完整）
    pub fn should_flush(&self) -> bool {
        self.pending.chars().count() >= self.threshold_chars || self.pending.ends_with('\n')
    }

    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }
}
