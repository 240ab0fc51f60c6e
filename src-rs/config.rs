//! Runtime settings resolved from the environment. CLI flags override them.

use crate::convert::{ScaleMode, DEFAULT_JPEG_QUALITY};
use crate::util::command_exists;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_OUT_DIR: &str = ".snap-solver";
pub const DEFAULT_USER: &str = "local";
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
pub const LOG_ENV: &str = "SNAP_SOLVER_LOG";

/// Solver executables probed on PATH when none is configured.
const SOLVER_CANDIDATES: [&str; 2] = ["codex", "codex-auto"];

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub out_dir: PathBuf,
    pub solver_bin: Option<String>,
    pub model: Option<String>,
    pub user_id: String,
    pub jpeg_quality: f32,
    pub timeout_secs: u64,
    pub scale_mode: ScaleMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from(DEFAULT_OUT_DIR),
            solver_bin: None,
            model: None,
            user_id: DEFAULT_USER.to_string(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            scale_mode: ScaleMode::Uniform,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds settings from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();
        Self {
            out_dir: get("SNAP_SOLVER_OUT_DIR")
                .or_else(|| get("SNAP_SOLVER_TMP_DIR"))
                .map(PathBuf::from)
                .unwrap_or(defaults.out_dir),
            solver_bin: get("SNAP_SOLVER_BIN"),
            model: get("SNAP_SOLVER_MODEL"),
            user_id: get("SNAP_SOLVER_USER").unwrap_or(defaults.user_id),
            jpeg_quality: get("SNAP_SOLVER_QUALITY")
                .and_then(|v| v.parse::<f32>().ok())
                .filter(|q| (0.0..=1.0).contains(q))
                .unwrap_or(defaults.jpeg_quality),
            timeout_secs: get("SNAP_SOLVER_TIMEOUT")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.timeout_secs),
            scale_mode: match get("SNAP_SOLVER_SCALE_MODE").as_deref() {
                Some("per-axis") | Some("per_axis") => ScaleMode::PerAxis,
                _ => defaults.scale_mode,
            },
        }
    }

    pub fn crop_dir(&self) -> PathBuf {
        self.out_dir.join("crop")
    }

    pub fn solve_dir(&self) -> PathBuf {
        self.out_dir.join("solve")
    }

    pub fn store_dir(&self) -> PathBuf {
        self.out_dir.join("history")
    }

    /// Configured solver, else the first known solver found on PATH.
    pub fn resolve_solver_bin(&self) -> Option<String> {
        if let Some(bin) = self.solver_bin.as_deref() {
            return Some(bin.to_string());
        }
        SOLVER_CANDIDATES
            .iter()
            .find(|name| command_exists(name))
            .map(|name| name.to_string())
    }
}
