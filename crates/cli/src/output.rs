//! Plain text rendering of command results.

use std::fmt::Write;

use jobloom_jobs::{Job, JobHistoryEntry, JobType, JobTypeMode};

const RULE: &str = "==========================================================";

pub fn mode_name(mode: JobTypeMode) -> &'static str {
    match mode {
        JobTypeMode::SingleShot => "single-shot",
        JobTypeMode::SelfRestarting => "self-restarting",
    }
}

/// One block per job, framed by rules.
pub fn jobs(job_type: &JobType, jobs: &[Job]) -> String {
    let mut out = String::new();
    if jobs.is_empty() {
        let _ = writeln!(out, "No open jobs for job type `{}`", job_type.name);
        return out;
    }

    for job in jobs {
        let _ = writeln!(out, "{RULE}");
        let _ = writeln!(out, "Job:       {}", job.id);
        let _ = writeln!(out, "Type:      {}", job_type.name);
        let _ = writeln!(out, "Status:    {}", job.status);
        let _ = writeln!(out, "Attempt:   {}/{}", job.attempt, job_type.max_retries);
        let _ = writeln!(out, "Created:   {}", job.created_at.to_rfc3339());
        let _ = writeln!(out, "Payload:   {}", job.payload);
        let _ = writeln!(out, "Parameter: {}", job.parameter);
    }
    let _ = writeln!(out, "{RULE}");
    out
}

pub fn job_types(job_types: &[JobType]) -> String {
    let mut out = String::new();
    if job_types.is_empty() {
        let _ = writeln!(out, "No job types registered");
        return out;
    }

    let _ = writeln!(
        out,
        "{:<36}  {:<24}  {:<15}  {:>7}  {}",
        "ID", "NAME", "MODE", "RETRIES", "LOCATOR"
    );
    for t in job_types {
        let _ = writeln!(
            out,
            "{:<36}  {:<24}  {:<15}  {:>7}  {}",
            t.id,
            t.name,
            mode_name(t.mode),
            t.max_retries,
            t.locator
        );
    }
    out
}

pub fn history(entries: &[JobHistoryEntry]) -> String {
    let mut out = String::new();
    if entries.is_empty() {
        let _ = writeln!(out, "No history");
        return out;
    }

    for entry in entries {
        let _ = write!(out, "{}  {}", entry.created_at.to_rfc3339(), entry.message);
        if let Some(data) = &entry.additional_data {
            let _ = write!(out, "  {data}");
        }
        let _ = writeln!(out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobloom_jobs::NewJobType;
    use serde_json::json;

    fn job_type() -> JobType {
        NewJobType::new("mailer", JobTypeMode::SelfRestarting, "builtin.noop")
            .max_retries(3)
            .build()
            .unwrap()
    }

    #[test]
    fn jobs_are_framed_by_rules() {
        let t = job_type();
        let job = Job::new(t.id, json!({"to": "x"}), json!({}));
        let text = jobs(&t, &[job]);

        assert!(text.starts_with(RULE));
        assert!(text.trim_end().ends_with(RULE));
        assert!(text.contains("Type:      mailer"));
        assert!(text.contains("Status:    Open"));
        assert!(text.contains("Attempt:   0/3"));
        assert!(text.contains(r#"Payload:   {"to":"x"}"#));
    }

    #[test]
    fn empty_results_say_so() {
        assert!(jobs(&job_type(), &[]).contains("No open jobs"));
        assert_eq!(job_types(&[]), "No job types registered\n");
        assert_eq!(history(&[]), "No history\n");
    }

    #[test]
    fn job_type_table_has_one_row_per_type() {
        let text = job_types(&[job_type()]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("self-restarting"));
    }

    #[test]
    fn history_includes_additional_data() {
        let entry = JobHistoryEntry::new(jobloom_core::JobId::new(), "Job failed : boom", Some(json!({"k": 1})));
        let text = history(&[entry]);
        assert!(text.contains(r#"Job failed : boom  {"k":1}"#));
    }
}
