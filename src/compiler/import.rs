//! Reading an existing crontab back into drafts.

use crate::core::environment::Environment;
use crate::core::job::JobDraft;
use crate::core::schedule::{MACROS, is_field_token};

/// Contents of a parsed crontab.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportedCrontab {
    /// Assignment lines, in file order.
    pub environment: Environment,
    /// One draft per schedule line.
    pub drafts: Vec<JobDraft>,
    /// 1-based line numbers that were neither assignments nor jobs.
    pub unrecognized: Vec<usize>,
}

/// Parse crontab text.
///
/// Comments and blank lines are skipped. A line is a job when it starts with
/// a macro or with 5 (or 6) tokens that fit the cron field grammar, followed
/// by a command; the command keeps its original spacing.
pub fn parse_crontab(text: &str) -> ImportedCrontab {
    let mut env_lines = Vec::new();
    let mut drafts = Vec::new();
    let mut unrecognized = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(draft) = parse_job_line(line) {
            drafts.push(draft);
        } else if is_assignment(line) {
            env_lines.push(line);
        } else {
            tracing::debug!(line = index + 1, "ignoring unrecognized crontab line");
            unrecognized.push(index + 1);
        }
    }

    ImportedCrontab {
        environment: Environment::new(env_lines.join("\n")),
        drafts,
        unrecognized,
    }
}

fn parse_job_line(line: &str) -> Option<JobDraft> {
    if line.starts_with('@') {
        let (schedule, command) = split_tokens(line, 1)?;
        let schedule = schedule.first()?;
        if !MACROS.contains(schedule) {
            return None;
        }
        return Some(JobDraft::new(command, *schedule));
    }

    if let Some((tokens, command)) = split_tokens(line, 6) {
        let six_field = is_field_token(tokens[0], 0)
            && tokens[1..]
                .iter()
                .enumerate()
                .all(|(position, token)| is_field_token(token, position));
        if six_field {
            return Some(JobDraft::new(command, tokens.join(" ")));
        }
    }

    let (tokens, command) = split_tokens(line, 5)?;
    let five_field = tokens
        .iter()
        .enumerate()
        .all(|(position, token)| is_field_token(token, position));
    five_field.then(|| JobDraft::new(command, tokens.join(" ")))
}

/// Take `count` whitespace-separated tokens off the front of `line` and
/// return them with the untouched remainder, which must be non-empty.
fn split_tokens(line: &str, count: usize) -> Option<(Vec<&str>, &str)> {
    let mut tokens = Vec::with_capacity(count);
    let mut rest = line;

    for _ in 0..count {
        rest = rest.trim_start();
        let end = rest.find(char::is_whitespace)?;
        tokens.push(&rest[..end]);
        rest = &rest[end..];
    }

    let command = rest.trim();
    if command.is_empty() {
        None
    } else {
        Some((tokens, command))
    }
}

fn is_assignment(line: &str) -> bool {
    match line.split_once('=') {
        Some((name, _)) => {
            let name = name.trim_end();
            let mut chars = name.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_crontab() {
        let text = "# m h dom mon dow command\nSHELL=/bin/bash\nMAILTO=ops@example.com\n\n0 2 * * * /usr/local/bin/backup.sh  --full\n@reboot   echo booted\n*/10 0 * * * * echo every ten seconds\nnot a job\n";
        let imported = parse_crontab(text);

        assert_eq!(
            imported.environment.as_str(),
            "SHELL=/bin/bash\nMAILTO=ops@example.com"
        );
        assert_eq!(imported.drafts.len(), 3);

        assert_eq!(imported.drafts[0].schedule, "0 2 * * *");
        assert_eq!(imported.drafts[0].command, "/usr/local/bin/backup.sh  --full");
        assert_eq!(imported.drafts[1].schedule, "@reboot");
        assert_eq!(imported.drafts[1].command, "echo booted");
        assert_eq!(imported.drafts[2].schedule, "*/10 0 * * * *");
        assert_eq!(imported.drafts[2].command, "echo every ten seconds");

        assert_eq!(imported.unrecognized, vec![8]);
    }

    #[test]
    fn test_five_fields_followed_by_numeric_command_word() {
        let imported = parse_crontab("30 4 * * 1 7z a /srv/archive.7z /srv/data");
        assert_eq!(imported.drafts[0].schedule, "30 4 * * 1");
        assert_eq!(imported.drafts[0].command, "7z a /srv/archive.7z /srv/data");
    }

    #[test]
    fn test_schedule_without_command_is_unrecognized() {
        let imported = parse_crontab("0 2 * * *\n@daily");
        assert!(imported.drafts.is_empty());
        assert_eq!(imported.unrecognized, vec![1, 2]);
    }

    #[test]
    fn test_unknown_macro_is_unrecognized() {
        let imported = parse_crontab("@often echo hi");
        assert!(imported.drafts.is_empty());
    }

    #[test]
    fn test_assignment_detection() {
        assert!(is_assignment("PATH=/bin"));
        assert!(is_assignment("_X = 1"));
        assert!(!is_assignment("1X=2"));
        assert!(!is_assignment("echo a=b"));
    }
}
