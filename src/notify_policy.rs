//! Per-task notification policy evaluation (§7).

use crate::store::{TaskLog, TaskLogStatus, TaskNotificationConfig};

const TRUNCATE_AT: usize = 500;

/// Decide whether and how to notify for a completed task execution. `None`
/// means "do not notify".
pub fn format_notification(
    config: Option<&TaskNotificationConfig>,
    log: &TaskLog,
) -> Option<(String, String, String)> {
    let config = config?;
    let channel = config.channel.as_ref()?;

    if config.error_only && log.status == TaskLogStatus::Success {
        return None;
    }

    if !config.keywords.is_empty() {
        let combined = format!("{}{}", log.output, log.error_output);
        if !config.keywords.iter().any(|kw| combined.contains(kw)) {
            return None;
        }
    }

    let duration = log
        .end_time
        .map(|end| (end - log.start_time).num_milliseconds())
        .unwrap_or(0);

    let title = format!("{} — {}", log.task_name, log.status);
    let body = format!(
        "task: {}\nstatus: {}\nstart: {}\nend: {}\nduration: {}ms\nexit_code: {}\noutput: {}\nerror_output: {}",
        log.task_name,
        log.status,
        log.start_time,
        log.end_time
            .map(|e| e.to_string())
            .unwrap_or_else(|| "-".to_string()),
        duration,
        log.exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string()),
        truncate(&log.output),
        truncate(&log.error_output),
    );

    Some((channel.clone(), title, body))
}

fn truncate(s: &str) -> String {
    if s.chars().count() <= TRUNCATE_AT {
        s.to_string()
    } else {
        let mut truncated: String = s.chars().take(TRUNCATE_AT).collect();
        truncated.push('…');
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_log(status: TaskLogStatus) -> TaskLog {
        let now = Utc::now().naive_utc();
        TaskLog {
            id: "log1".into(),
            task_id: "t1".into(),
            task_name: "hello".into(),
            status,
            start_time: now,
            end_time: Some(now + chrono::Duration::seconds(1)),
            output: "hi\n".into(),
            error_output: String::new(),
            exit_code: Some(0),
        }
    }

    #[test]
    fn no_config_means_no_notification() {
        assert!(format_notification(None, &sample_log(TaskLogStatus::Success)).is_none());
    }

    #[test]
    fn no_channel_means_no_notification() {
        let config = TaskNotificationConfig {
            task_id: "t1".into(),
            channel: None,
            error_only: false,
            keywords: vec![],
        };
        assert!(format_notification(Some(&config), &sample_log(TaskLogStatus::Success)).is_none());
    }

    #[test]
    fn error_only_suppresses_success() {
        let config = TaskNotificationConfig {
            task_id: "t1".into(),
            channel: Some("c1".into()),
            error_only: true,
            keywords: vec![],
        };
        assert!(format_notification(Some(&config), &sample_log(TaskLogStatus::Success)).is_none());
        assert!(format_notification(Some(&config), &sample_log(TaskLogStatus::Failed)).is_some());
    }

    #[test]
    fn keyword_filter_requires_match_in_combined_output() {
        let config = TaskNotificationConfig {
            task_id: "t1".into(),
            channel: Some("c1".into()),
            error_only: false,
            keywords: vec!["boom".into()],
        };
        assert!(format_notification(Some(&config), &sample_log(TaskLogStatus::Success)).is_none());

        let mut log = sample_log(TaskLogStatus::Success);
        log.output = "boom\n".into();
        assert!(format_notification(Some(&config), &log).is_some());
    }
}
