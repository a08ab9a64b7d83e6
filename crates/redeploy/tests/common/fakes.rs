//! In-memory stand-ins for the container engine, registry and chat hook.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use redeploy::engine::{BuildRequest, ContainerEngine, EngineError, LocalImage, ScriptRequest};
use redeploy::{Notifier, PublishError, Publisher, RunLog};

/// Records builds and keeps a local image list; deploy scripts run on the
/// host with `sh` instead of inside a container. Exports write the
/// configured files as an image tarball.
#[derive(Default)]
pub struct FakeEngine {
    images: Mutex<Vec<LocalImage>>,
    builds: Mutex<Vec<BuildRequest>>,
    removed: Mutex<Vec<String>>,
    scripts: Mutex<Vec<ScriptRequest>>,
    events: Mutex<Vec<String>>,
    build_delay: Option<Duration>,
    export: Option<Vec<(String, Vec<u8>)>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every build take `delay`, to observe overlapping runs.
    pub fn with_build_delay(mut self, delay: Duration) -> Self {
        self.build_delay = Some(delay);
        self
    }

    /// Makes `save` write `files` (path, content) as the exported tarball.
    pub fn with_export(mut self, files: Vec<(String, Vec<u8>)>) -> Self {
        self.export = Some(files);
        self
    }

    pub fn add_image(&self, reference: &str, created: DateTime<Utc>) {
        self.images.lock().unwrap().push(LocalImage {
            reference: reference.to_string(),
            id: format!("sha256:{:x}", created.timestamp()),
            created,
        });
    }

    pub fn image_references(&self) -> Vec<String> {
        let mut refs: Vec<String> = self
            .images
            .lock()
            .unwrap()
            .iter()
            .map(|i| i.reference.clone())
            .collect();
        refs.sort();
        refs
    }

    pub fn builds(&self) -> Vec<BuildRequest> {
        self.builds.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    pub fn scripts(&self) -> Vec<ScriptRequest> {
        self.scripts.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn image_exists(&self, reference: &str) -> Result<bool, EngineError> {
        Ok(self
            .images
            .lock()
            .unwrap()
            .iter()
            .any(|i| i.reference == reference))
    }

    async fn build(&self, request: &BuildRequest, log: &RunLog) -> Result<(), EngineError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("start {}", request.image));
        log.line(format!("fake build {}", request.image));

        if let Some(delay) = self.build_delay {
            tokio::time::sleep(delay).await;
        }

        self.builds.lock().unwrap().push(request.clone());
        self.add_image(&request.image, Utc::now());
        self.events
            .lock()
            .unwrap()
            .push(format!("end {}", request.image));
        Ok(())
    }

    async fn save(&self, reference: &str, path: &Path, log: &RunLog) -> Result<(), EngineError> {
        let Some(files) = &self.export else {
            return Err(EngineError::CommandFailed {
                command: format!("save {}", reference),
                message: "no export configured".to_string(),
            });
        };
        log.line(format!("fake save {}", reference));

        let mut builder = tar::Builder::new(std::fs::File::create(path).unwrap());
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, content.as_slice())
                .unwrap();
        }
        builder.finish().unwrap();
        Ok(())
    }

    async fn list_images(&self, repository: &str) -> Result<Vec<LocalImage>, EngineError> {
        let prefix = format!("{}:", repository);
        Ok(self
            .images
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.reference.starts_with(&prefix))
            .cloned()
            .collect())
    }

    async fn remove_image(&self, reference: &str) -> Result<(), EngineError> {
        self.images
            .lock()
            .unwrap()
            .retain(|i| i.reference != reference);
        self.removed.lock().unwrap().push(reference.to_string());
        Ok(())
    }

    async fn run_script(&self, request: &ScriptRequest, log: &RunLog) -> Result<(), EngineError> {
        self.scripts.lock().unwrap().push(request.clone());

        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&request.script)
            .current_dir(&request.workdir)
            .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .output()
            .await
            .map_err(|source| EngineError::Spawn {
                program: "sh".to_string(),
                source,
            })?;
        log.line(String::from_utf8_lossy(&output.stdout));

        if output.status.success() {
            Ok(())
        } else {
            Err(EngineError::CommandFailed {
                command: format!("sh -c {}", request.script),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// Records published images.
#[derive(Default)]
pub struct FakePublisher {
    published: Mutex<Vec<String>>,
    fail: bool,
}

impl FakePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn published(&self) -> Vec<String> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn publish(&self, image: &str, _scratch_dir: &Path, log: &RunLog) -> Result<(), PublishError> {
        if self.fail {
            return Err(PublishError::Registry {
                method: "PUT".to_string(),
                url: format!("https://registry.local/v2/{}", image),
                status: 500,
                message: "registry unavailable".to_string(),
            });
        }
        log.line(format!("fake publish {}", image));
        self.published.lock().unwrap().push(image.to_string());
        Ok(())
    }
}

/// Keeps every notification.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}
