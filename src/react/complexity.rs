//! 任务复杂度估算：关键词 + 长度打分，给出分步目标与步数上限

use serde::Serialize;

/// 每个关键词加分
const COMPLEX_KEYWORDS: &[(&str, u32)] = &[
    ("system", 2),
    ("manager", 2),
    ("multiplayer", 3),
    ("network", 3),
    ("inventory", 2),
    ("ai", 2),
    ("save", 1),
    ("load", 1),
    ("animation", 1),
    ("physics", 1),
    ("ui", 1),
    ("level", 1),
    ("multiple", 1),
    ("and", 1),
    ("then", 1),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

/// 估算结果
#[derive(Debug, Clone, Serialize)]
pub struct ComplexityEstimate {
    pub complexity: Complexity,
    pub score: u32,
    /// 按顺序的阶段性目标
    pub strategy: Vec<String>,
    pub max_steps: usize,
}

impl ComplexityEstimate {
    /// 第 index 步的目标；超出时沿用最后一个
    pub fn objective(&self, index: usize) -> &str {
        self.strategy
            .get(index)
            .or_else(|| self.strategy.last())
            .map(String::as_str)
            .unwrap_or("Complete the task")
    }
}

pub fn estimate(task: &str) -> ComplexityEstimate {
    let lower = task.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let keyword_score: u32 = COMPLEX_KEYWORDS
        .iter()
        .filter(|(k, _)| words.contains(k))
        .map(|(_, w)| *w)
        .sum();
    let length_score = match words.len() {
        0..=12 => 0,
        13..=30 => 1,
        _ => 2,
    };
    let score = keyword_score + length_score;

    let (complexity, max_steps, strategy) = match score {
        0..=2 => (
            Complexity::Simple,
            5,
            vec!["Understand the request", "Perform the operation", "Verify the result"],
        ),
        3..=5 => (
            Complexity::Moderate,
            10,
            vec![
                "Analyze the requirements",
                "Create the required objects",
                "Add components and scripts",
                "Configure properties",
                "Verify the result",
            ],
        ),
        _ => (
            Complexity::Complex,
            15,
            vec![
                "Analyze the requirements and break them down",
                "Create the core objects",
                "Implement the main scripts",
                "Wire up components and references",
                "Add supporting systems",
                "Configure properties",
                "Test and verify the result",
            ],
        ),
    };

    ComplexityEstimate {
        complexity,
        score,
        strategy: strategy.iter().map(|s| s.to_string()).collect(),
        max_steps,
    }
}
