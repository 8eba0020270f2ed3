//! Closed set of task types.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    ResumeAnalysis,
    BurnoutAssessment,
}

impl TaskKind {
    pub const ALL: [TaskKind; 2] = [TaskKind::ResumeAnalysis, TaskKind::BurnoutAssessment];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::ResumeAnalysis => "resume_analysis",
            TaskKind::BurnoutAssessment => "burnout_assessment",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("Unknown task type: {}", s))
    }
}
