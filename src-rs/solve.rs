//! Downstream solver: sends the cropped problem to a vision model CLI and
//! reads back a structured solution.

use crate::convert::EncodedImage;
use crate::error::SolveError;
use crate::util::{truncate_text, write_bytes};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SolutionStep {
    pub title: String,
    #[serde(default)]
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Solution {
    #[serde(default)]
    pub problem: String,
    #[serde(default)]
    pub steps: Vec<SolutionStep>,
    #[serde(default, alias = "answer", alias = "finalAnswer")]
    pub final_answer: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SolveRequest<'a> {
    pub text: Option<&'a str>,
    pub image: Option<&'a EncodedImage>,
}

pub trait Solver {
    fn solve(&self, request: &SolveRequest<'_>) -> Result<Solution, SolveError>;
}

pub fn build_solve_prompt(text: Option<&str>, has_image: bool) -> String {
    let mut out = String::new();
    out.push_str("You are a patient math tutor.\n");
    if has_image {
        out.push_str("The attached image is a photographed problem cropped by the student.\n");
    }
    out.push_str("Solve the problem step by step.\n\n");
    out.push_str("Reply with exactly one JSON object and nothing else, shaped as:\n");
    out.push_str(
        r#"{"problem": "...", "topic": "...", "steps": [{"title": "...", "detail": "..."}], "final_answer": "...", "notes": ["..."]}"#,
    );
    out.push_str("\n\nIf part of the problem is unreadable, say so in notes.\n");
    if let Some(extra) = text.map(str::trim).filter(|t| !t.is_empty()) {
        out.push_str("\nStudent's note:\n");
        out.push_str(extra);
        out.push('\n');
    }
    out
}

/// Extracts the solution object from a model reply, tolerating Markdown
/// code fences and surrounding prose.
pub fn parse_solution(reply: &str) -> Result<Solution, SolveError> {
    let trimmed = reply.trim();
    if trimmed.is_empty() {
        return Err(SolveError::EmptyResponse);
    }
    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    let body = match (start, end) {
        (Some(s), Some(e)) if e > s => &trimmed[s..=e],
        _ => {
            return Err(SolveError::MalformedResponse(
                "no JSON object in reply".to_string(),
            ))
        }
    };
    let solution: Solution = serde_json::from_str(body)
        .map_err(|err| SolveError::MalformedResponse(err.to_string()))?;
    if solution.final_answer.trim().is_empty() && solution.steps.is_empty() {
        return Err(SolveError::MalformedResponse(
            "reply has neither steps nor a final answer".to_string(),
        ));
    }
    Ok(solution)
}

pub fn render_markdown(solution: &Solution) -> String {
    let mut lines = vec!["# Solution".to_string(), String::new()];
    if let Some(topic) = solution.topic.as_deref().filter(|t| !t.trim().is_empty()) {
        lines.push(format!("- Topic: {topic}"));
    }
    if !solution.problem.trim().is_empty() {
        lines.push(format!("- Problem: {}", solution.problem.trim()));
    }
    if !solution.steps.is_empty() {
        lines.push(String::new());
        lines.push("## Steps".to_string());
        for (idx, step) in solution.steps.iter().enumerate() {
            lines.push(format!("{}. **{}**", idx + 1, step.title.trim()));
            if !step.detail.trim().is_empty() {
                lines.push(format!("   {}", step.detail.trim()));
            }
        }
    }
    lines.push(String::new());
    lines.push("## Final answer".to_string());
    lines.push(solution.final_answer.trim().to_string());
    if !solution.notes.is_empty() {
        lines.push(String::new());
        lines.push("## Notes".to_string());
        for note in &solution.notes {
            lines.push(format!("- {note}"));
        }
    }
    lines.join("\n") + "\n"
}

/// Report written when no solution could be produced.
pub fn render_fallback_report(reason: &str, text: Option<&str>, crop_path: Option<&Path>) -> String {
    let mut lines = vec![
        "# Solution (unavailable)".to_string(),
        String::new(),
        format!("- Generated at: {}", crate::util::timestamp_iso()),
    ];
    if let Some(path) = crop_path {
        lines.push(format!("- Cropped image: {}", path.display()));
    }
    if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
        lines.push(format!("- Note: {}", text.trim()));
    }
    lines.push(String::new());
    lines.push("## Why no solution was produced".to_string());
    lines.push(reason.to_string());
    lines.push(String::new());
    lines.push("The cropped image was kept; re-run `solve` to retry without re-selecting.".to_string());
    lines.join("\n") + "\n"
}

/// Runs `<bin> exec --output-last-message <reply> --image <crop> [--model m] -`
/// with the prompt on stdin.
#[derive(Debug, Clone)]
pub struct CommandSolver {
    pub bin: String,
    pub model: Option<String>,
    pub timeout: Duration,
    /// Where the crop, reply and log files of each call are written.
    pub work_dir: PathBuf,
    /// Base name shared by the files of one call.
    pub run_name: String,
}

impl CommandSolver {
    pub fn new(bin: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            model: None,
            timeout: Duration::from_secs(300),
            work_dir: work_dir.into(),
            run_name: "solve".to_string(),
        }
    }

    pub fn image_path(&self, image: &EncodedImage) -> PathBuf {
        self.work_dir
            .join(format!("{}-crop.{}", self.run_name, image.format.extension()))
    }

    pub fn reply_path(&self) -> PathBuf {
        self.work_dir.join(format!("{}-reply.md", self.run_name))
    }

    pub fn log_path(&self) -> PathBuf {
        self.work_dir.join(format!("{}-solver.log", self.run_name))
    }
}

impl Solver for CommandSolver {
    fn solve(&self, request: &SolveRequest<'_>) -> Result<Solution, SolveError> {
        let prompt = build_solve_prompt(request.text, request.image.is_some());
        let reply_path = self.reply_path();
        match fs::remove_file(&reply_path) {
            Ok(()) => debug!(path = %reply_path.display(), "removed stale reply"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        let image_path = match request.image {
            Some(image) => {
                let path = self.image_path(image);
                write_bytes(&path, &image.bytes)?;
                Some(path)
            }
            None => None,
        };

        let mut cmd = Command::new(&self.bin);
        cmd.arg("exec").arg("--output-last-message").arg(&reply_path);
        if let Some(path) = &image_path {
            cmd.arg("--image").arg(path);
        }
        if let Some(model) = &self.model {
            cmd.arg("--model").arg(model);
        }
        cmd.arg("-");
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        info!(bin = %self.bin, image = ?image_path, "starting solver");
        let mut child = cmd.spawn().map_err(|source| SolveError::Spawn {
            bin: self.bin.clone(),
            source,
        })?;

        // Pipes are drained while the child runs so a chatty solver never
        // blocks on a full pipe.
        let stdout_reader = child.stdout.take().map(drain_pipe);
        let stderr_reader = child.stderr.take().map(drain_pipe);

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(err) = stdin.write_all(prompt.as_bytes()) {
                debug!(error = %err, "solver closed stdin early");
            }
        }

        let timeout = self.timeout.max(Duration::from_secs(10));
        let status = match child.wait_timeout(timeout)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                warn!(secs = timeout.as_secs(), "solver timed out");
                return Err(SolveError::Timeout(timeout.as_secs()));
            }
        };

        let stdout = join_pipe(stdout_reader);
        let stderr = join_pipe(stderr_reader);
        let code = status.code().unwrap_or(1);
        let log_text = format!(
            "command: {} exec --output-last-message {} ...\nreturncode: {}\n\nstdout:\n{}\n\nstderr:\n{}\n",
            self.bin,
            reply_path.display(),
            code,
            truncate_text(&stdout, 2400),
            truncate_text(&stderr, 2400)
        );
        write_bytes(&self.log_path(), log_text.as_bytes())?;

        if !status.success() {
            return Err(SolveError::Failed { code });
        }
        let reply = fs::read_to_string(&reply_path).unwrap_or_default();
        parse_solution(&reply)
    }
}

fn drain_pipe<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(err) = pipe.read_to_end(&mut buf) {
            debug!(error = %err, "solver pipe read failed");
        }
        buf
    })
}

fn join_pipe(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default()
}
