//! Text reports for `certlane analyze`.

use std::fmt::Write;

use crate::problem::Problem;
use crate::session::SessionState;

/// Section title centered in an 80-column rule.
pub fn banner(title: &str) -> String {
    format!("{:=^80}", format!("[{}]", title))
}

fn format_duration(seconds: Option<f64>) -> String {
    match seconds {
        None => "unknown".to_string(),
        Some(secs) => {
            let total = secs.round() as u64;
            format!("{}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
        }
    }
}

pub fn general_stats(session: &SessionState) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", banner("General Statistics"));
    let _ = writeln!(out, "Known jobs: {}", session.job_list().len());
    let _ = writeln!(out, "Selected jobs: {}", session.run_list_names().len());
    let (automated, manual) = session.estimated_duration();
    let _ = writeln!(
        out,
        "Estimated duration: {} automated, {} interactive",
        format_duration(automated),
        format_duration(manual)
    );
    out
}

pub fn dependency_report(problems: &[Problem]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", banner("Dependency Report"));
    if problems.is_empty() {
        let _ = writeln!(out, "Selected jobs have no dependency problems");
    }
    for problem in problems {
        let _ = writeln!(out, " * {}", problem);
    }
    out
}

/// One line per run-list job; empty when nothing is selected.
pub fn interactivity_report(session: &SessionState) -> String {
    let run_list = session.run_list();
    if run_list.is_empty() {
        return String::new();
    }
    let width = run_list.iter().map(|job| job.name().len()).max().unwrap_or(0);
    let mut out = String::new();
    let _ = writeln!(out, "{}", banner("Interactivity Report"));
    for job in run_list {
        let kind = if job.plugin().is_interactive() {
            "interactive"
        } else {
            "automatic"
        };
        let _ = writeln!(out, "{:<width$} : {}", job.name(), kind, width = width);
    }
    out
}

/// Run-list names in execution order, one per line.
pub fn run_list_report(session: &SessionState) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", banner("Run List"));
    for name in session.run_list_names() {
        let _ = writeln!(out, "{}", name);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use certlane_model::load_catalog;

    fn session(catalog: &str, desired: &[&str]) -> SessionState {
        let mut session = SessionState::new(load_catalog(catalog, "test").unwrap()).unwrap();
        let desired: Vec<String> = desired.iter().map(|s| s.to_string()).collect();
        session.update_desired_job_list(&desired);
        session
    }

    #[test]
    fn test_banner_width() {
        let line = banner("General Statistics");
        assert_eq!(line.len(), 80);
        assert!(line.starts_with("=========="));
        assert!(line.contains("[General Statistics]"));
    }

    #[test]
    fn test_general_stats() {
        let s = session(
            "name: a\ncommand: true\nestimated_duration: 30\n\nname: b\ncommand: true\n",
            &["a"],
        );
        let report = general_stats(&s);
        assert!(report.contains("Known jobs: 2"));
        assert!(report.contains("Selected jobs: 1"));
        assert!(report.contains("0:00:30 automated"));
        assert!(report.contains("0:00:00 interactive"));
    }

    #[test]
    fn test_dependency_report() {
        let s = session("name: a\ncommand: true\ndepends: ghost\n", &["a"]);
        let report = dependency_report(s.problems());
        assert!(report.contains(" * "));
        assert!(report.contains("ghost"));

        let clean = session("name: a\ncommand: true\n", &["a"]);
        assert!(dependency_report(clean.problems())
            .contains("Selected jobs have no dependency problems"));
    }

    #[test]
    fn test_interactivity_report() {
        let s = session(
            "name: a\ncommand: true\n\nname: check/screen\nplugin: manual\n",
            &["a", "check/screen"],
        );
        let report = interactivity_report(&s);
        assert!(report.contains("a            : automatic"));
        assert!(report.contains("check/screen : interactive"));

        let empty = session("name: a\ncommand: true\n", &[]);
        assert!(interactivity_report(&empty).is_empty());
    }
}
