//! Topic 名称校验

/// Topic 最大长度（字节）
pub const MAX_TOPIC_LEN: usize = 256;

/// 校验 topic 名称，无效时返回原因
pub fn validate_topic(topic: &str) -> Option<String> {
    if topic.is_empty() {
        return Some("Empty topic".to_string());
    }

    if topic.len() > MAX_TOPIC_LEN {
        return Some(format!("Topic longer than {} bytes", MAX_TOPIC_LEN));
    }

    if topic.chars().any(char::is_control) {
        return Some("Topic contains control characters".to_string());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_topic() {
        assert!(validate_topic("room1").is_none());
        assert!(validate_topic("chat.room-1/general").is_none());
        assert!(validate_topic("").is_some());
        assert!(validate_topic("bad\ntopic").is_some());
        assert!(validate_topic(&"x".repeat(MAX_TOPIC_LEN)).is_none());
        assert!(validate_topic(&"x".repeat(MAX_TOPIC_LEN + 1)).is_some());
    }
}
