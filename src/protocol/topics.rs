//! Topic names used on the broker and their validation

use crate::config::TopicsSection;
use thiserror::Error;

/// Topic construction for one cabin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicBuilder {
    tag_events: String,
    heartbeat: String,
    display: String,
}

impl TopicBuilder {
    pub fn new(topics: &TopicsSection, cabin_id: u32) -> Self {
        Self {
            tag_events: topics.tag_events.clone(),
            heartbeat: topics.heartbeat.clone(),
            display: Self::build_display_topic(&topics.display_prefix, cabin_id),
        }
    }

    /// Per-cabin display topic: `{prefix}.cabin{N}`
    pub fn build_display_topic(prefix: &str, cabin_id: u32) -> String {
        format!("{prefix}.cabin{cabin_id}")
    }

    pub fn tag_events(&self) -> &str {
        &self.tag_events
    }

    pub fn heartbeat(&self) -> &str {
        &self.heartbeat
    }

    pub fn display(&self) -> &str {
        &self.display
    }
}

/// Reject topic names a broker would refuse for publishing
pub fn validate_publish_topic(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if let Some(ch) = topic.chars().find(|c| matches!(c, '+' | '#' | '\0')) {
        return Err(TopicError::InvalidChar(ch));
    }
    Ok(())
}

#[derive(Debug, Error, PartialEq)]
pub enum TopicError {
    #[error("Topic cannot be empty")]
    Empty,
    #[error("Topic contains invalid character: '{0:?}'")]
    InvalidChar(char),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_topics() {
        let topics = TopicBuilder::new(&TopicsSection::default(), 2);
        assert_eq!(topics.tag_events(), "test_queue");
        assert_eq!(topics.heartbeat(), "system/heartbeat");
        assert_eq!(topics.display(), "target_queue.cabin2");
    }

    #[test]
    fn test_validate_publish_topic() {
        assert!(validate_publish_topic("system/heartbeat").is_ok());
        assert_eq!(validate_publish_topic(""), Err(TopicError::Empty));
        assert_eq!(validate_publish_topic("a/+/b"), Err(TopicError::InvalidChar('+')));
        assert_eq!(validate_publish_topic("a/#"), Err(TopicError::InvalidChar('#')));
    }

    proptest! {
        #[test]
        fn display_topic_ends_with_cabin_id(cabin in any::<u32>()) {
            let topic = TopicBuilder::build_display_topic("target_queue", cabin);
            let expected_suffix = format!(".cabin{}", cabin);
            prop_assert!(topic.ends_with(&expected_suffix));
            prop_assert!(validate_publish_topic(&topic).is_ok());
        }
    }
}
