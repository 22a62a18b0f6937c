//! Classification of playbook output lines
//!
//! Rules are evaluated top to bottom; the first match wins. Lines matching
//! nothing are forwarded verbatim as `output`.

use crate::transport::message::{EventKind, ExecutionEvent};

#[derive(Debug, Clone, Copy)]
enum Matcher {
    Contains(&'static str),
    StartsWith(&'static str),
}

impl Matcher {
    /// Byte offset just past the matched marker
    fn find(&self, line: &str) -> Option<usize> {
        match self {
            Matcher::Contains(marker) => line.find(marker).map(|at| at + marker.len()),
            Matcher::StartsWith(marker) => line.starts_with(marker).then_some(marker.len()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Rule {
    matcher: Matcher,
    kind: EventKind,
}

const RULES: &[Rule] = &[
    Rule { matcher: Matcher::Contains("TASK ["), kind: EventKind::Task },
    Rule { matcher: Matcher::StartsWith("RUNNING HANDLER ["), kind: EventKind::Task },
    Rule { matcher: Matcher::Contains("PLAY ["), kind: EventKind::Play },
    Rule { matcher: Matcher::Contains("ok: ["), kind: EventKind::Ok },
    Rule { matcher: Matcher::Contains("changed: ["), kind: EventKind::Changed },
    Rule { matcher: Matcher::Contains("failed: ["), kind: EventKind::Failed },
    Rule { matcher: Matcher::Contains("fatal: ["), kind: EventKind::Failed },
    Rule { matcher: Matcher::Contains("skipping: ["), kind: EventKind::Skipped },
];

/// Match a single line against the rule table
pub fn classify(line: &str) -> (EventKind, Option<String>) {
    for rule in RULES {
        let Some(end) = rule.matcher.find(line) else {
            continue;
        };
        if rule.kind != EventKind::Task {
            return (rule.kind, None);
        }
        // Task lines without a usable name are not tasks
        match task_name(&line[end..]) {
            Some(name) => return (EventKind::Task, Some(name)),
            None => return (EventKind::Output, None),
        }
    }
    (EventKind::Output, None)
}

/// Name inside the bracket opened by the task marker, up to its last `]`
fn task_name(rest: &str) -> Option<String> {
    let close = rest.rfind(']')?;
    let name = rest[..close].trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Stateful classifier for one execution: numbers tasks and tags outcomes
/// with the task they belong to.
#[derive(Debug, Default)]
pub struct LineClassifier {
    current_task: Option<String>,
    task_count: u32,
}

impl LineClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_count(&self) -> u32 {
        self.task_count
    }

    pub fn event(&mut self, line: &str) -> ExecutionEvent {
        let (kind, name) = classify(line);
        let mut event = ExecutionEvent::new(kind, line);
        match kind {
            EventKind::Task => {
                self.task_count += 1;
                self.current_task = name;
                event.task_name = self.current_task.clone();
                event.task_number = Some(self.task_count);
            }
            EventKind::Play => {
                self.current_task = None;
            }
            EventKind::Ok | EventKind::Changed | EventKind::Failed | EventKind::Skipped => {
                event.task_name = self.current_task.clone();
            }
            _ => {}
        }
        event
    }
}
