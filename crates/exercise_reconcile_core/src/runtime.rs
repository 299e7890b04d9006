use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::config::{ReconcileConfig, load_config};
use crate::overrides::embedded_overrides;

pub const STATE_DIR_NAME: &str = ".exercise-reconcile";
pub const CONFIG_FILENAME: &str = "config.toml";
pub const OVERRIDES_FILENAME: &str = "overrides.toml";
pub const DEFAULT_DOCUMENT_PATH: &str = "src/data/workoutTemplates.ts";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Config,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Config => "config",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub document: Option<PathBuf>,
    pub overrides: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
    pub executable_dir: Option<PathBuf>,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        let executable_dir = env::current_exe()
            .ok()
            .and_then(|path| path.parent().map(Path::to_path_buf));
        Ok(Self {
            cwd,
            executable_dir,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub document_path: PathBuf,
    /// `None` means the embedded override table is used.
    pub overrides_path: Option<PathBuf>,
    pub root_source: ValueSource,
    pub config_source: ValueSource,
    pub document_source: ValueSource,
    pub overrides_source: ValueSource,
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub project_root_exists: bool,
    pub state_dir_exists: bool,
    pub config_exists: bool,
    pub document_exists: bool,
    pub document_size_bytes: Option<u64>,
    pub overrides_exists: bool,
    pub warnings: Vec<String>,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\nstate_dir={}\nconfig_path={} ({})\ndocument_path={} ({})\noverrides_path={} ({})",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.state_dir),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
            normalize_for_display(&self.document_path),
            self.document_source.as_str(),
            self.overrides_display(),
            self.overrides_source.as_str(),
        )
    }

    pub fn overrides_display(&self) -> String {
        self.overrides_path
            .as_deref()
            .map(normalize_for_display)
            .unwrap_or_else(|| "<embedded>".to_string())
    }
}

pub fn inspect_runtime(paths: &ResolvedPaths) -> Result<RuntimeStatus> {
    let project_root_exists = paths.project_root.exists();
    let state_dir_exists = paths.state_dir.exists();
    let config_exists = paths.config_path.exists();
    let overrides_exists = paths
        .overrides_path
        .as_deref()
        .is_some_and(Path::exists);
    let document_exists = paths.document_path.is_file();
    let document_size_bytes = if document_exists {
        let metadata = fs::metadata(&paths.document_path)
            .with_context(|| format!("failed to inspect {}", paths.document_path.display()))?;
        Some(metadata.len())
    } else {
        None
    };

    let mut warnings = Vec::new();
    if !state_dir_exists {
        warnings.push(format!(
            "{STATE_DIR_NAME}/ is missing; run `exercise-reconcile init` to materialize config and overrides"
        ));
    }
    if !document_exists {
        warnings.push(format!(
            "template document {} does not exist; set [template].path or pass --document",
            normalize_for_display(&paths.document_path)
        ));
    }
    if paths.overrides_path.is_some() && !overrides_exists {
        warnings.push(format!(
            "override file {} does not exist",
            paths.overrides_display()
        ));
    }

    Ok(RuntimeStatus {
        project_root_exists,
        state_dir_exists,
        config_exists,
        document_exists,
        document_size_bytes,
        overrides_exists,
        warnings,
    })
}

pub fn ensure_document_ready(paths: &ResolvedPaths, status: &RuntimeStatus) -> Result<()> {
    if !status.document_exists {
        bail!(
            "Template document not found: {}\nSet [template].path in {} or pass --document <PATH>.",
            normalize_for_display(&paths.document_path),
            normalize_for_display(&paths.config_path)
        );
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    pub force: bool,
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
    pub wrote_overrides: bool,
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) = resolve_project_root(context, overrides, &lookup_env);
    let state_dir = project_root.join(STATE_DIR_NAME);

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (
            absolutize(path, &project_root),
            ValueSource::Flag,
        )
    } else if let Some(value) = env_path(&lookup_env, "EXERCISE_RECONCILE_CONFIG") {
        (absolutize(&value, &project_root), ValueSource::Env)
    } else {
        (state_dir.join(CONFIG_FILENAME), ValueSource::Default)
    };
    let config = load_config(&config_path)?;

    let (document_path, document_source) =
        resolve_document_path(overrides, &lookup_env, &config, &project_root);

    let default_overrides = state_dir.join(OVERRIDES_FILENAME);
    let (overrides_path, overrides_source) = if let Some(path) = overrides.overrides.as_deref() {
        (Some(absolutize(path, &project_root)), ValueSource::Flag)
    } else if let Some(value) = env_path(&lookup_env, "EXERCISE_RECONCILE_OVERRIDES") {
        (Some(absolutize(&value, &project_root)), ValueSource::Env)
    } else if default_overrides.exists() {
        (Some(default_overrides), ValueSource::Heuristic)
    } else {
        (None, ValueSource::Default)
    };

    Ok(ResolvedPaths {
        project_root,
        state_dir,
        config_path,
        document_path,
        overrides_path,
        root_source,
        config_source,
        document_source,
        overrides_source,
    })
}

fn resolve_document_path<F>(
    overrides: &PathOverrides,
    lookup_env: &F,
    config: &ReconcileConfig,
    project_root: &Path,
) -> (PathBuf, ValueSource)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.document.as_deref() {
        return (absolutize(path, project_root), ValueSource::Flag);
    }
    if let Some(value) = env_path(lookup_env, "EXERCISE_RECONCILE_DOCUMENT") {
        return (absolutize(&value, project_root), ValueSource::Env);
    }
    if let Some(value) = config
        .template
        .path
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return (absolutize(Path::new(value), project_root), ValueSource::Config);
    }
    (project_root.join(DEFAULT_DOCUMENT_PATH), ValueSource::Default)
}

pub fn init_layout(paths: &ResolvedPaths, options: &InitOptions) -> Result<InitReport> {
    let mut created_dirs = Vec::new();
    if !paths.state_dir.exists() {
        fs::create_dir_all(&paths.state_dir)
            .with_context(|| format!("failed to create {}", paths.state_dir.display()))?;
        created_dirs.push(paths.state_dir.clone());
    }

    let wrote_config = materialize(
        &paths.config_path,
        &render_materialized_config(paths),
        options.force,
    )?;
    let overrides_target = paths
        .overrides_path
        .clone()
        .unwrap_or_else(|| paths.state_dir.join(OVERRIDES_FILENAME));
    let wrote_overrides = materialize(&overrides_target, embedded_overrides(), options.force)?;

    Ok(InitReport {
        created_dirs,
        wrote_config,
        wrote_overrides,
    })
}

pub fn render_materialized_config(paths: &ResolvedPaths) -> String {
    let document = paths
        .document_path
        .strip_prefix(&paths.project_root)
        .unwrap_or(&paths.document_path);
    let document = normalize_for_display(document);

    format!(
        "# exercise-reconcile configuration (materialized by `exercise-reconcile init`)\n# Environment variables (CATALOG_URL, CATALOG_TABLE, ...) override these values.\n\n[catalog]\n# url = \"https://your-project.example.org/rest/v1\"\ntable = \"exercises\"\n# user_agent = \"exercise-reconcile/0.1\"\n\n[catalog.columns]\nid = \"id\"\nname = \"name\"\ndisplay_name = \"display_name\"\nmedia_url = \"media_url\"\nthumbnail_url = \"thumbnail_url\"\n\n[template]\npath = \"{document}\"\nid_key = \"exerciseId\"\nname_key = \"name\"\nmedia_key = \"mediaUrl\"\nthumbnail_key = \"thumbnailUrl\"\n",
    )
}

fn resolve_project_root<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: &F,
) -> (PathBuf, ValueSource)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.project_root.as_deref() {
        return (absolutize(path, &context.cwd), ValueSource::Flag);
    }
    if let Some(value) = env_path(lookup_env, "EXERCISE_RECONCILE_PROJECT_ROOT") {
        return (absolutize(&value, &context.cwd), ValueSource::Env);
    }

    let root = detect_project_root_heuristic(&context.cwd, context.executable_dir.as_deref());
    (root, ValueSource::Heuristic)
}

/// Nearest ancestor of `cwd` (then of the executable) holding a state directory.
fn detect_project_root_heuristic(cwd: &Path, executable_dir: Option<&Path>) -> PathBuf {
    cwd.ancestors()
        .chain(executable_dir.into_iter().flat_map(Path::ancestors))
        .find(|candidate| candidate.join(STATE_DIR_NAME).is_dir())
        .unwrap_or(cwd)
        .to_path_buf()
}

fn env_path<F>(lookup_env: &F, key: &str) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup_env(key)?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(PathBuf::from(trimmed))
    }
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    base.join(path)
}

/// Materialize one layout file; existing files are kept unless `force`.
fn materialize(path: &Path, content: &str, force: bool) -> Result<bool> {
    if !force && path.is_file() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
