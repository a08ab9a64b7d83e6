pub mod build;
pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod gitsync;
pub mod notify;
pub mod process;
pub mod publish;
pub mod runlog;
pub mod tagging;
pub mod yamlpatch;

pub use build::{BuildError, BuildRun, Executor, RunOutcome, RunReport};
pub use catalog::{App, BranchInfo, Build, Catalog, CatalogError, CatalogLoader, DeployUpdate, RepoRef, YamlSet};
pub use config::{CatalogSource, CommitAuthor, Settings, TagMode};
pub use dispatch::{match_trigger, BuildMatch, Dispatcher};
pub use engine::{ContainerEngine, DockerCli, EngineError, LocalImage};
pub use error::ConfigError;
pub use gitsync::{GitCredentials, GitError, GitSync};
pub use notify::{LogNotifier, Notifier, SlackNotifier};
pub use publish::{ImageReference, PublishError, Publisher, RegistryPublisher};
pub use runlog::RunLog;
pub use tagging::{ImageTags, TagResolver};
pub use yamlpatch::{YamlDocument, YamlPatchError};
