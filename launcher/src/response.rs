use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// job id recorded when the scheduler response could not be parsed
pub const FAILED_JOB_ID: &str = "Failed";

static SUBMITTED_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"with ID (\d+)\.").expect("job id pattern is valid"));

/// Scheduler assigned identifier, opaque apart from being digits when present
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn failed() -> Self {
        Self(FAILED_JOB_ID.to_string())
    }

    pub fn is_failed(&self) -> bool {
        self.0 == FAILED_JOB_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extracts a job id from what the scheduler printed
pub trait ResponseParser: fmt::Debug {
    fn job_id(&self, stdout: &str) -> Option<JobId>;

    /// the parsed id or the "Failed" sentinel
    fn parse(&self, stdout: &str) -> JobId {
        self.job_id(stdout).unwrap_or_else(JobId::failed)
    }
}

/// Matches `with ID <digits>.` anywhere in the output
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmittedIdParser;

impl ResponseParser for SubmittedIdParser {
    fn job_id(&self, stdout: &str) -> Option<JobId> {
        SUBMITTED_ID
            .captures(stdout)
            .and_then(|captures| captures.get(1))
            .map(|id| JobId::new(id.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_id() {
        let parser = SubmittedIdParser;

        assert_eq!(
            parser.parse("Job submitted with ID 12345.\n").as_str(),
            "12345"
        );
        assert_eq!(
            parser.job_id("queue: DSML\nJob train_0 submitted with ID 7.\nbye\n"),
            Some(JobId::new("7"))
        );
    }

    #[test]
    fn falls_back_to_sentinel() {
        let parser = SubmittedIdParser;
        let id = parser.parse("Submission queued\n");

        assert_eq!(id.as_str(), "Failed");
        assert!(id.is_failed());
        // the trailing dot is part of the contract
        assert!(parser.job_id("submitted with ID 12345").is_none());
        assert!(parser.job_id("submitted with ID abc.").is_none());
    }
}
