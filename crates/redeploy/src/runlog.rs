//! Per-run log sink.
//!
//! Every line goes to the run's own log file (served back by id) and to the
//! process log, tagged with the run id.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;

pub struct RunLog {
    run_id: Option<String>,
    path: Option<PathBuf>,
    file: Option<Mutex<File>>,
}

impl RunLog {
    /// Creates `<logs_dir>/<run_id>.log`, truncating any previous content.
    pub fn create(logs_dir: &Path, run_id: &str) -> std::io::Result<Self> {
        std::fs::create_dir_all(logs_dir)?;
        let path = logs_dir.join(format!("{}.log", run_id));
        let file = File::create(&path)?;

        Ok(Self {
            run_id: Some(run_id.to_string()),
            path: Some(path),
            file: Some(Mutex::new(file)),
        })
    }

    /// A sink that only writes to the process log.
    pub fn process() -> Self {
        Self {
            run_id: None,
            path: None,
            file: None,
        }
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn line(&self, message: impl AsRef<str>) {
        let message = message.as_ref();

        if let Some(file) = &self.file {
            let stamp = Utc::now().format("%Y/%m/%d %H:%M:%S");
            match file.lock() {
                Ok(mut file) => {
                    if let Err(e) = writeln!(file, "{} {}", stamp, message) {
                        tracing::warn!("failed to write build log: {}", e);
                    }
                }
                Err(_) => tracing::warn!("build log lock poisoned"),
            }
        }

        match &self.run_id {
            Some(id) => tracing::info!(run = %id, "{}", message),
            None => tracing::info!("{}", message),
        }
    }
}

impl std::fmt::Debug for RunLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLog")
            .field("run_id", &self.run_id)
            .field("path", &self.path)
            .finish()
    }
}
