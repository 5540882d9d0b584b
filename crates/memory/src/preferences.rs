//! Preference learning from user messages.
//!
//! Rules are evaluated in order; each rule that matches contributes one
//! key. Phrasings are recognised in English and Chinese.

use regex_lite::Regex;
use std::collections::BTreeMap;
use tracing::warn;

/// Learned preferences, keyed by preference name.
pub type Preferences = BTreeMap<String, String>;

const WORD: &str = r"([^\s,，。.!！?？;；]+)";

fn rule_table() -> Vec<(&'static str, String)> {
    vec![
        (
            "favorite_food",
            format!(r"(?i)(?:喜欢吃|爱吃|喜欢的食物是?|偏好的食物是?|favou?rite food is|i love eating|i like eating)\s*{WORD}"),
        ),
        (
            "favorite_color",
            format!(r"(?i)(?:喜欢的颜色是?|偏好的颜色是?|favou?rite colou?r is)\s*{WORD}"),
        ),
        (
            "favorite_sport",
            format!(r"(?i)(?:喜欢的运动是?|偏好的运动是?|favou?rite sport is)\s*{WORD}"),
        ),
        (
            "language",
            r"(?i)(?:使用|说|用|偏好|speak|prefer|use)\s*(中文|英文|英语|chinese|english)".to_string(),
        ),
        (
            "time_format",
            r"(?i)(?:喜欢的时间格式|时间格式|time format)\s*(?:是|用|is)?\s*(24小时制|12小时制|24h|12h)".to_string(),
        ),
        (
            "temperature_unit",
            r"(?i)(?:温度单位|气温单位|温度|气温|temperatures? (?:unit )?(?:is |in )?)\s*(?:是|用)?\s*(摄氏度|华氏度|°C|°F|celsius|fahrenheit)".to_string(),
        ),
        (
            "currency_unit",
            r"(?i)(?:货币单位|货币|钱|currency (?:is |in )?)\s*(?:是|用)?\s*(人民币|美元|欧元|CNY|USD|EUR)".to_string(),
        ),
        (
            "length_unit",
            r"(?i)(?:长度单位|距离单位|长度|距离|lengths? (?:unit )?(?:is |in )?)\s*(?:是|用)?\s*(米|英尺|英寸|meters|feet|inches)".to_string(),
        ),
    ]
}

/// Ordered regex rules that extract preferences from free text.
pub struct PreferenceLearner {
    rules: Vec<(&'static str, Regex)>,
}

impl PreferenceLearner {
    pub fn new() -> Self {
        let rules = rule_table()
            .into_iter()
            .filter_map(|(key, pattern)| match Regex::new(&pattern) {
                Ok(re) => Some((key, re)),
                Err(e) => {
                    warn!(key, error = %e, "Skipping invalid preference rule");
                    None
                }
            })
            .collect();
        Self { rules }
    }

    /// Preferences stated in `text`. Empty when nothing matched.
    pub fn learn(&self, text: &str) -> Preferences {
        let mut learned = Preferences::new();
        for (key, re) in &self.rules {
            if let Some(value) = re.captures(text).and_then(|c| c.get(1)) {
                learned.insert((*key).to_string(), value.as_str().to_string());
            }
        }
        learned
    }
}

impl Default for PreferenceLearner {
    fn default() -> Self {
        Self::new()
    }
}
