//! 工具函数集合

use uuid::Uuid;

/// 生成唯一 ID
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// 首字母大写，其余字母小写（"assistant" -> "Assistant"）
pub fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// 当前 Unix 时间戳（秒）
pub fn unix_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}
