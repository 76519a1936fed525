//! Log bus topic and viewer room naming

/// Topic patterns
pub struct Topics;

impl Topics {
    /// Wildcard filter covering every deployment's log topic
    pub const ALL_LOGS: &'static str = "shipyard/logs/+";

    /// Log topic of one deployment
    pub fn logs(deployment_id: &str) -> String {
        format!("shipyard/logs/{}", deployment_id)
    }

    /// Parse a log topic to extract the deployment ID
    pub fn parse_deployment_id(topic: &str) -> Option<String> {
        let parts: Vec<&str> = topic.split('/').collect();
        if parts.len() == 3 && parts[0] == "shipyard" && parts[1] == "logs" && !parts[2].is_empty() {
            Some(parts[2].to_string())
        } else {
            None
        }
    }

    /// Whether `topic` matches an MQTT-style `filter` (`+` one level, `#` the rest)
    pub fn matches(filter: &str, topic: &str) -> bool {
        let mut filter_levels = filter.split('/');
        let mut topic_levels = topic.split('/');

        loop {
            match (filter_levels.next(), topic_levels.next()) {
                (Some("#"), _) => return true,
                (Some("+"), Some(_)) => {}
                (Some(f), Some(t)) if f == t => {}
                (None, None) => return true,
                _ => return false,
            }
        }
    }

    /// Viewer room joined to follow one deployment
    pub fn room(deployment_id: &str) -> String {
        format!("logs:{}", deployment_id)
    }

    /// Parse a `logs:{id}` room name
    pub fn parse_room(room: &str) -> Option<&str> {
        room.strip_prefix("logs:").filter(|id| !id.is_empty() && !id.contains('/'))
    }
}
