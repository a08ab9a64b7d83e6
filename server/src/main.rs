use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use redeploy::{CatalogSource, CommitAuthor, Settings, TagMode};
use redeploy_server::AppState;
use secrecy::SecretString;

#[derive(Parser)]
#[command(
    name = "redeploy",
    about = "Build container images on git push and roll the new tag into a deployment repository",
    version
)]
struct Cli {
    /// HTTP bind address for triggers
    #[arg(long, env = "REDEPLOY_BIND", default_value = "0.0.0.0:80")]
    bind: String,

    /// Work directory
    #[arg(long, env = "REDEPLOY_WORK_DIR", default_value = "work")]
    work_dir: PathBuf,

    /// Git repository prefix (ie: "git@git.myorg:", "https://git.myorg/")
    #[arg(long, env = "REDEPLOY_GIT_PREFIX", default_value = "")]
    git_prefix: String,

    /// Additional git prefix accepted on triggers
    #[arg(long = "git-allow-prefix", env = "REDEPLOY_GIT_ALLOW_PREFIX", value_delimiter = ',')]
    git_allowed_prefixes: Vec<String>,

    /// Prefix of produced docker images
    #[arg(long, env = "REDEPLOY_DOCKER_PREFIX", default_value = "")]
    docker_prefix: String,

    /// Extra KEY=VALUE build argument for every build
    #[arg(long = "docker-arg", env = "REDEPLOY_DOCKER_ARGS", value_delimiter = ',')]
    docker_args: Vec<String>,

    /// Apps repository path
    #[arg(long, env = "REDEPLOY_APPS_REPO", default_value = "")]
    apps_repo: String,

    /// Apps repository branch
    #[arg(long, env = "REDEPLOY_APPS_BRANCH", default_value = "main")]
    apps_branch: String,

    /// Apps file path in repository
    #[arg(long, env = "REDEPLOY_APPS_FILE", default_value = "apps.yaml")]
    apps_file: String,

    /// How the source part of image tags is derived
    #[arg(long, env = "REDEPLOY_TAG_MODE", value_enum, default_value_t = TagModeArg::Commit)]
    tag_mode: TagModeArg,

    /// Use an annotated tag sitting exactly on the branch tip as image tag
    #[arg(long, env = "REDEPLOY_EXACT_TAG")]
    exact_tag: bool,

    /// Public URL of this service, for build log links
    #[arg(long, env = "REDEPLOY_BUILDER_URL", default_value = "")]
    builder_url: String,

    /// Image running deploy update scripts
    #[arg(long, env = "REDEPLOY_SCRIPT_IMAGE", default_value = "alpine:3.18")]
    script_image: String,

    /// Local images kept per image repository
    #[arg(long, env = "REDEPLOY_RETENTION", default_value_t = 5)]
    retention: usize,

    /// Registry publish timeout, in seconds
    #[arg(long, env = "REDEPLOY_PUBLISH_TIMEOUT", default_value_t = 600)]
    publish_timeout: u64,

    /// Registry spoken to over plain http
    #[arg(long = "plain-http-registry", env = "REDEPLOY_PLAIN_HTTP_REGISTRIES", value_delimiter = ',')]
    plain_http_registries: Vec<String>,

    /// Author name of deploy commits
    #[arg(long, env = "REDEPLOY_COMMIT_AUTHOR_NAME", default_value = "builder")]
    commit_author_name: String,

    /// Author email of deploy commits
    #[arg(long, env = "REDEPLOY_COMMIT_AUTHOR_EMAIL", default_value = "builder@localhost")]
    commit_author_email: String,

    /// Slack notification hook
    #[arg(long, env = "REDEPLOY_SLACK_HOOK")]
    slack_hook: Option<String>,

    /// Run a single trigger for this git URL, then exit
    #[arg(long)]
    trigger_git: Option<String>,

    /// Branch of the single trigger
    #[arg(long, default_value = "main")]
    trigger_branch: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum TagModeArg {
    Commit,
    Describe,
}

impl From<TagModeArg> for TagMode {
    fn from(mode: TagModeArg) -> Self {
        match mode {
            TagModeArg::Commit => TagMode::Commit,
            TagModeArg::Describe => TagMode::Describe,
        }
    }
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            work_dir: self.work_dir.clone(),
            git_prefix: self.git_prefix.clone(),
            git_allowed_prefixes: self.git_allowed_prefixes.clone(),
            image_prefix: self.docker_prefix.clone(),
            docker_args: self.docker_args.clone(),
            tag_mode: self.tag_mode.into(),
            exact_tag: self.exact_tag,
            builder_url: self.builder_url.clone(),
            script_image: self.script_image.clone(),
            retention: self.retention,
            publish_timeout_secs: self.publish_timeout,
            plain_http_registries: self.plain_http_registries.clone(),
            commit_author: CommitAuthor {
                name: self.commit_author_name.clone(),
                email: self.commit_author_email.clone(),
            },
            catalog: CatalogSource {
                repo: self.apps_repo.clone(),
                branch: self.apps_branch.clone(),
                file: self.apps_file.clone(),
            },
        }
    }
}

fn init_logging() -> anyhow::Result<()> {
    tracing_log::LogTracer::init()?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    let settings = cli.settings();
    settings.validate()?;
    settings.ensure_work_dir()?;

    let webhook_secret = std::env::var("WEBHOOK_SECRET")
        .ok()
        .map(SecretString::from);

    let logs_dir = settings.logs_dir();
    let dispatcher = Arc::new(redeploy_server::build_dispatcher(
        settings,
        cli.slack_hook.clone(),
    )?);

    if let Err(e) = dispatcher.reload().await {
        tracing::error!("failed to load catalog: {}", e);
    }

    if let Some(url) = &cli.trigger_git {
        // Single trigger run mode
        if !dispatcher.trigger_from_url(url, &cli.trigger_branch).await {
            anyhow::bail!("trigger URL {} matches no allowed git prefix", url);
        }
        return Ok(());
    }

    let listener = tokio::net::TcpListener::bind(&cli.bind)
        .await
        .with_context(|| format!("failed to bind {}", cli.bind))?;
    let state = AppState::new(dispatcher, logs_dir).with_webhook_secret(webhook_secret);

    redeploy_server::serve(listener, state).await
}
