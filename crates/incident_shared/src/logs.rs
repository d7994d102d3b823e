//! Log lines and the aggregated, per-service labeled timeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use indexmap::IndexMap;

/// A single log line owned by one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub service_name: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub raw_text: String,
}

impl LogLine {
    /// Parse a runtime log line, taking a leading RFC 3339 token as its timestamp.
    pub fn parse(service_name: &str, raw: &str) -> Self {
        let raw = raw.trim_end();
        let timestamp = raw
            .split_once(' ')
            .map(|(head, _)| head)
            .or(Some(raw))
            .and_then(|head| DateTime::parse_from_rfc3339(head).ok())
            .map(|ts| ts.with_timezone(&Utc));

        Self {
            service_name: service_name.to_string(),
            timestamp,
            raw_text: raw.to_string(),
        }
    }

    /// Synthetic line recording a failed fetch for this service.
    pub fn fetch_error(service_name: &str, detail: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            timestamp: None,
            raw_text: format!("[ERROR] {}", detail),
        }
    }

    /// `[service] raw text`
    pub fn labeled(&self) -> String {
        format!("[{}] {}", self.service_name, self.raw_text)
    }
}

/// Lines of one service, most recent last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceLogs {
    pub service: String,
    pub lines: Vec<LogLine>,
}

/// Aggregated logs in whitelist order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogTimeline {
    pub collected_at: DateTime<Utc>,
    pub services: Vec<ServiceLogs>,
}

impl LogTimeline {
    pub fn new(collected_at: DateTime<Utc>) -> Self {
        Self {
            collected_at,
            services: Vec::new(),
        }
    }

    pub fn push(&mut self, service: &str, lines: Vec<LogLine>) {
        self.services.push(ServiceLogs {
            service: service.to_string(),
            lines,
        });
    }

    pub fn get(&self, service: &str) -> Option<&[LogLine]> {
        self.services
            .iter()
            .find(|s| s.service == service)
            .map(|s| s.lines.as_slice())
    }

    pub fn line_count(&self) -> usize {
        self.services.iter().map(|s| s.lines.len()).sum()
    }

    /// Labeled lines concatenated service by service. Not re-sorted.
    pub fn flatten(&self) -> Vec<String> {
        self.services
            .iter()
            .flat_map(|s| s.lines.iter().map(LogLine::labeled))
            .collect()
    }

    /// Every line across services ordered by timestamp.
    ///
    /// Stable: ties keep aggregation order, untimestamped lines go last.
    pub fn merged(&self) -> Vec<&LogLine> {
        let mut lines: Vec<&LogLine> = self.services.iter().flat_map(|s| s.lines.iter()).collect();
        lines.sort_by_key(|line| (line.timestamp.is_none(), line.timestamp));
        lines
    }

    /// `service -> labeled lines` in aggregation order, as served by the latest-logs endpoint.
    pub fn labeled_by_service(&self) -> IndexMap<String, Vec<String>> {
        self.services
            .iter()
            .map(|s| (s.service.clone(), s.lines.iter().map(LogLine::labeled).collect()))
            .collect()
    }
}

/// Envelope returned when fetching the latest logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestLogs {
    pub timestamp: DateTime<Utc>,
    pub logs: IndexMap<String, Vec<String>>,
}

impl From<&LogTimeline> for LatestLogs {
    fn from(timeline: &LogTimeline) -> Self {
        Self {
            timestamp: timeline.collected_at,
            logs: timeline.labeled_by_service(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamped_line() {
        let line = LogLine::parse(
            "health_checker",
            "2024-05-01T10:00:02.123456789Z [HEALTH CHECK] [ERROR] Service is OFFLINE\n",
        );
        assert!(line.timestamp.is_some());
        assert_eq!(
            line.labeled(),
            "[health_checker] 2024-05-01T10:00:02.123456789Z [HEALTH CHECK] [ERROR] Service is OFFLINE"
        );
    }

    #[test]
    fn test_parse_line_without_timestamp() {
        let line = LogLine::parse("postgres_db", "database system is ready");
        assert!(line.timestamp.is_none());
        assert_eq!(line.raw_text, "database system is ready");
    }

    #[test]
    fn test_flatten_keeps_service_order_and_merged_sorts() {
        let mut timeline = LogTimeline::new(Utc::now());
        timeline.push(
            "b",
            vec![LogLine::parse("b", "2024-05-01T10:00:05Z later")],
        );
        timeline.push(
            "a",
            vec![
                LogLine::parse("a", "2024-05-01T10:00:01Z earlier"),
                LogLine::fetch_error("a", "boom"),
            ],
        );

        assert_eq!(
            timeline.flatten(),
            vec![
                "[b] 2024-05-01T10:00:05Z later",
                "[a] 2024-05-01T10:00:01Z earlier",
                "[a] [ERROR] boom",
            ]
        );

        let merged: Vec<String> = timeline.merged().iter().map(|l| l.labeled()).collect();
        assert_eq!(merged[0], "[a] 2024-05-01T10:00:01Z earlier");
        assert_eq!(merged[1], "[b] 2024-05-01T10:00:05Z later");
        assert_eq!(merged[2], "[a] [ERROR] boom");
        assert_eq!(timeline.line_count(), 3);
    }

    #[test]
    fn test_latest_logs_keep_aggregation_order() {
        let mut timeline = LogTimeline::new(Utc::now());
        for service in ["user_service_victim", "health_checker", "postgres_db"] {
            timeline.push(service, vec![LogLine::parse(service, "up")]);
        }

        let envelope = LatestLogs::from(&timeline);
        let keys: Vec<&str> = envelope.logs.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["user_service_victim", "health_checker", "postgres_db"]);

        let json = serde_json::to_string(&envelope).unwrap();
        let victim = json.find("\"user_service_victim\":").unwrap();
        let health = json.find("\"health_checker\":").unwrap();
        let db = json.find("\"postgres_db\":").unwrap();
        assert!(victim < health && health < db);
    }
}
