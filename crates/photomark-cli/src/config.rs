use std::path::PathBuf;

/// Runtime defaults, loaded from environment variables. CLI flags override them.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing `det_10g.onnx` and `w600k_r50.onnx`.
    pub model_dir: PathBuf,
    /// Matcher threshold; `None` keeps the metric's own default.
    pub match_threshold: Option<f32>,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
}

impl Config {
    /// Load configuration from `PHOTOMARK_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let model_dir = lookup("PHOTOMARK_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_model_dir(&lookup));

        Self {
            model_dir,
            match_threshold: lookup("PHOTOMARK_MATCH_THRESHOLD").and_then(|v| v.parse().ok()),
            intra_threads: parse_or(lookup("PHOTOMARK_INTRA_THREADS"), 2),
        }
    }
}

fn default_model_dir<F>(lookup: &F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    lookup("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("photomark/models")
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}
