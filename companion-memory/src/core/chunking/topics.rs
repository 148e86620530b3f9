//! Keyword-based topic segmentation
//!
//! Only user messages can open a new topic. Categories are tried in the
//! order of [`TopicCategory::ALL`] and the first match wins.

use serde::{Deserialize, Serialize};

use crate::models::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicCategory {
    Health,
    Family,
    Hobbies,
    Weather,
    Food,
    Farewell,
}

impl TopicCategory {
    pub const ALL: [TopicCategory; 6] = [
        TopicCategory::Health,
        TopicCategory::Family,
        TopicCategory::Hobbies,
        TopicCategory::Weather,
        TopicCategory::Food,
        TopicCategory::Farewell,
    ];

    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            TopicCategory::Health => &["健康", "医院", "医生", "药", "身体", "health", "doctor"],
            TopicCategory::Family => &[
                "家人", "儿子", "女儿", "孙子", "老伴", "family", "son", "daughter",
            ],
            TopicCategory::Hobbies => &["爱好", "兴趣", "喜欢", "爱做", "hobby", "like"],
            TopicCategory::Weather => &["天气", "下雨", "晴天", "冷", "热", "weather"],
            TopicCategory::Food => &["吃", "喝", "饭", "菜", "food", "eat"],
            TopicCategory::Farewell => &["再见", "拜拜", "bye", "goodbye", "不聊了"],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TopicCategory::Health => "health",
            TopicCategory::Family => "family",
            TopicCategory::Hobbies => "hobbies",
            TopicCategory::Weather => "weather",
            TopicCategory::Food => "food",
            TopicCategory::Farewell => "farewell",
        }
    }

    /// `lowered` must already be lowercased.
    fn matches(self, lowered: &str) -> bool {
        self.keywords().iter().any(|k| lowered.contains(k))
    }
}

/// First category whose keywords occur in `content`.
pub fn classify(content: &str) -> Option<TopicCategory> {
    let lowered = content.to_lowercase();
    TopicCategory::ALL
        .into_iter()
        .find(|category| category.matches(&lowered))
}

/// Most frequent category among the user messages, ties broken by category order.
pub fn dominant_topic(messages: &[Message]) -> Option<TopicCategory> {
    let mut counts = [0usize; TopicCategory::ALL.len()];
    for category in messages
        .iter()
        .filter(|m| m.is_user())
        .filter_map(|m| classify(&m.content))
    {
        if let Some(slot) = TopicCategory::ALL.iter().position(|c| *c == category) {
            counts[slot] += 1;
        }
    }

    let best = counts.iter().copied().max().unwrap_or(0);
    if best == 0 {
        return None;
    }
    counts
        .iter()
        .position(|&n| n == best)
        .map(|slot| TopicCategory::ALL[slot])
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TopicBoundaryDetector;

impl TopicBoundaryDetector {
    pub fn new() -> Self {
        Self
    }

    /// Cut indices into `messages`, always starting with 0 and strictly increasing.
    pub fn detect(&self, messages: &[Message]) -> Vec<usize> {
        let mut boundaries = vec![0];
        let mut current: Option<TopicCategory> = None;

        for (index, message) in messages.iter().enumerate() {
            if !message.is_user() {
                continue;
            }
            let Some(detected) = classify(&message.content) else {
                continue;
            };
            if let Some(previous) = current
                && previous != detected
            {
                boundaries.push(index);
            }
            current = Some(detected);
        }

        boundaries
    }
}
