//! Built-in tools.

use async_trait::async_trait;
use serde_json::{json, Value};

use chrono::Utc;

use research_agent_core::{traits::Tool, types::ToolOutput, Result};

// =============================================================================
// Echo Tool
// =============================================================================

/// Simple echo tool for testing.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes the input message back"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The message to echo"
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let message = args
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("No message provided");

        Ok(ToolOutput::text(format!("Echo: {}", message)))
    }
}

// =============================================================================
// Current Time Tool
// =============================================================================

/// Reports the current time as a unix timestamp and a UTC calendar date.
pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Returns the current UTC date and unix timestamp"
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value) -> Result<ToolOutput> {
        let now = Utc::now();
        let unix = now.timestamp();
        let date = now.format("%Y-%m-%d").to_string();
        Ok(ToolOutput::text(format!("Current time: {} UTC (unix {})", date, unix))
            .with_data(json!({ "unix": unix, "date": date })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo() {
        let out = EchoTool.execute(json!({"message": "hi"})).await.unwrap();
        assert_eq!(out.content, "Echo: hi");

        let out = EchoTool.execute(json!({})).await.unwrap();
        assert_eq!(out.content, "Echo: No message provided");
    }

    #[tokio::test]
    async fn test_current_time_has_data() {
        let out = CurrentTimeTool.execute(json!({})).await.unwrap();
        assert!(out.success);
        let data = out.data.unwrap();
        let unix = data["unix"].as_i64().unwrap();
        assert!(unix > 1_600_000_000);

        let date = chrono::NaiveDate::parse_from_str(data["date"].as_str().unwrap(), "%Y-%m-%d").unwrap();
        let reported = chrono::DateTime::from_timestamp(unix, 0).unwrap().date_naive();
        assert_eq!(date, reported);
    }
}
