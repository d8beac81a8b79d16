//! Current date tool.
//!
//! The model is told to check today's date before any market analysis, so
//! this is the first tool most turns call.

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use stockwise_core::error::ToolError;
use stockwise_core::tool::{Tool, ToolOutput};

pub struct CurrentDateTool;

/// `YYYY-MM-DD Weekday`, e.g. `2024-05-01 Wednesday`.
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d %A").to_string()
}

#[async_trait]
impl Tool for CurrentDateTool {
    fn name(&self) -> &str {
        "get_current_date"
    }

    fn description(&self) -> &str {
        "오늘의 현재 날짜와 요일 정보를 반환합니다. \
         최신 뉴스 검색이나 주식 시장 데이터 분석 시 기준 날짜로 활용하세요. 입력은 무시됩니다."
    }

    async fn invoke(&self, _input: &str) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::text(format_date(Local::now().date_naive())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_date_and_weekday() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(format_date(date), "2024-05-01 Wednesday");
        let date = NaiveDate::from_ymd_opt(2025, 1, 5).unwrap();
        assert_eq!(format_date(date), "2025-01-05 Sunday");
    }

    #[tokio::test]
    async fn returns_today_ignoring_input() {
        let tool = CurrentDateTool;
        let output = tool.invoke("anything").await.unwrap();
        assert_eq!(output.text, format_date(Local::now().date_naive()));
        assert!(output.artifact.is_none());

        let (date, weekday) = output.text.split_once(' ').unwrap();
        assert_eq!(date.len(), 10);
        assert!(weekday.ends_with("day"));
    }
}
