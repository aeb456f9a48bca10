//! Task generator: synthesizes disposable tasks from configured templates.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use minijinja::{Environment, context};
use rand::seq::SliceRandom;
use tracing::debug;

use crate::core::artifact::DisposableTask;
use crate::io::pending::PendingQueue;

/// Render one task body from a randomly chosen template.
pub fn render_task<R: rand::Rng + ?Sized>(templates: &[String], rng: &mut R) -> Result<String> {
    let Some(template) = templates.choose(rng) else {
        bail!("no task templates configured");
    };
    let env = Environment::new();
    env.render_str(
        template,
        context! { now => Utc::now().format("%H:%M:%S").to_string() },
    )
    .context("render task template")
}

/// Write `count` new disposable tasks into the pending queue.
pub fn generate_tasks(
    queue: &PendingQueue,
    templates: &[String],
    count: usize,
) -> Result<Vec<DisposableTask>> {
    let mut rng = rand::thread_rng();
    let mut tasks = Vec::with_capacity(count);
    for _ in 0..count {
        let code = render_task(templates, &mut rng)?;
        let task = queue.create_task_now(&code)?;
        debug!(task = %task.file_name, "generated task");
        tasks.push(task);
    }
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn renders_now_placeholder() {
        let templates = vec!["echo at {{ now }}".to_string()];
        let code = render_task(&templates, &mut rand::thread_rng()).expect("render");
        assert!(code.starts_with("echo at "));
        assert!(!code.contains("{{"));
        assert_eq!(code.len(), "echo at 00:00:00".len());
    }

    #[test]
    fn empty_template_set_is_an_error() {
        assert!(render_task(&[], &mut rand::thread_rng()).is_err());
    }

    #[test]
    fn generates_distinct_task_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let queue = PendingQueue::new(temp.path(), ".sh");
        let templates = vec!["echo one".to_string(), "echo two".to_string()];
        let tasks = generate_tasks(&queue, &templates, 3).expect("generate");
        assert_eq!(tasks.len(), 3);
        assert_eq!(queue.list_tasks().expect("list").len(), 3);
        for task in &tasks {
            let body = fs::read_to_string(&task.path).expect("read");
            assert!(templates.contains(&body));
        }
    }
}
