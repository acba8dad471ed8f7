//! Log topic naming

/// Topic patterns
pub struct Topics;

impl Topics {
    /// Prefix shared by every build log topic
    pub const LOG_PREFIX: &'static str = "logs-";

    /// Build log topic for a deployment
    pub fn logs(slug: &str) -> String {
        format!("{}{}", Self::LOG_PREFIX, slug)
    }

    /// Check if topic is a build log topic
    pub fn is_log_topic(topic: &str) -> bool {
        Self::parse_slug(topic).is_some()
    }

    /// Extract the deployment slug from a build log topic
    pub fn parse_slug(topic: &str) -> Option<&str> {
        topic
            .strip_prefix(Self::LOG_PREFIX)
            .filter(|slug| !slug.is_empty())
    }
}
