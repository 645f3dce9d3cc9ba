//! SBAR (Situation, Background, Assessment, Recommendation) consultation summary.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::time::Duration;

use crate::message::{Message, Role};

pub const REPORT_DISCLAIMER: &str = "This report is generated by an AI assistant and is not a \
medical diagnosis. Please share this report with a licensed healthcare provider for \
professional medical advice.";

const SECTION_LIMIT: usize = 500;

/// Summary of a consultation, computed once from the transcript. Never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SbarReport {
    pub situation: String,
    pub background: String,
    pub assessment: String,
    pub recommendation: String,
    /// `MM:SS` of the active call time.
    pub duration: String,
    pub timestamp: DateTime<Local>,
    pub message_count: usize,
}

impl SbarReport {
    pub fn generate(messages: &[Message], elapsed: Duration) -> Self {
        Self::generate_at(messages, elapsed, Local::now())
    }

    pub fn generate_at(messages: &[Message], elapsed: Duration, timestamp: DateTime<Local>) -> Self {
        let user: Vec<&str> = texts(messages, Role::User);
        let ai: Vec<&str> = texts(messages, Role::Assistant);

        let situation = user
            .first()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "Patient initiated consultation with AI Doctor.".to_string());

        let background = if user.len() > 1 {
            user[1..user.len().min(3)].join(" ")
        } else {
            "No additional background provided.".to_string()
        };

        let assessment = if ai.len() > 1 {
            truncate(&ai[ai.len() - 2..].join(" "), SECTION_LIMIT)
        } else {
            "AI assessment based on described symptoms.".to_string()
        };

        let recommendation = ai
            .last()
            .map(|s| truncate(s, SECTION_LIMIT))
            .unwrap_or_else(|| {
                "Continue monitoring symptoms and consult a healthcare provider if symptoms persist."
                    .to_string()
            });

        Self {
            situation,
            background,
            assessment,
            recommendation,
            duration: format_duration(elapsed),
            timestamp,
            message_count: messages.len(),
        }
    }

    /// Suggested file name for a saved report.
    pub fn file_name(&self) -> String {
        format!("CareConnect_Report_{}.txt", self.timestamp.format("%Y-%m-%d"))
    }

    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format("%B %-d, %Y, %I:%M %p").to_string()
    }

    pub fn to_plain_text(&self) -> String {
        format!(
            "CARE CONNECT - CONSULTATION REPORT (SBAR)\n\
             Date: {}\n\
             Call duration: {}\n\
             Messages exchanged: {}\n\
             \n\
             SITUATION\n{}\n\
             \n\
             BACKGROUND\n{}\n\
             \n\
             ASSESSMENT\n{}\n\
             \n\
             RECOMMENDATION\n{}\n\
             \n\
             {}\n",
            self.formatted_timestamp(),
            self.duration,
            self.message_count,
            self.situation,
            self.background,
            self.assessment,
            self.recommendation,
            REPORT_DISCLAIMER,
        )
    }
}

fn texts(messages: &[Message], role: Role) -> Vec<&str> {
    messages
        .iter()
        .filter(|m| m.role == role)
        .map(|m| m.text.as_str())
        .collect()
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// `MM:SS`, minutes not wrapped at the hour.
pub fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
