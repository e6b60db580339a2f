use anyhow::Result;
use serde::Serialize;
use std::io::Write;

/// Writes any report as JSON, one document per call.
pub fn export_json<T: Serialize + ?Sized>(
    value: &T,
    pretty: bool,
    output: &mut dyn Write,
) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    writeln!(output, "{json}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::definition::Trigger;
    use crate::report::{RunReport, RunStatus};
    use chrono::Utc;

    fn report() -> RunReport {
        RunReport {
            id: 3,
            pipeline: "delivery".to_string(),
            trigger: Trigger::PullRequest,
            status: RunStatus::Rejected,
            started_at: Utc::now(),
            finished_at: None,
            duration_secs: 0.5,
            stages: vec![],
        }
    }

    #[test]
    fn test_export_json_compact() {
        let mut buf = Vec::new();
        export_json(&report(), false, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert_eq!(text.lines().count(), 1);
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["status"], "rejected");
        assert_eq!(parsed["trigger"], "pull_request");
    }

    #[test]
    fn test_export_json_pretty() {
        let mut buf = Vec::new();
        export_json(&[report()], true, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.lines().count() > 1);
        assert!(text.contains("\"pipeline\": \"delivery\""));
    }
}
