use anyhow::{Context, Result};
use clap::Parser;
use pkgpatch_core::filter::{DEFAULT_EXCLUDE, DEFAULT_INCLUDE};
use pkgpatch_core::workflow::{DEFAULT_PATCH_DIR, DEFAULT_STATE_DIR};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "pkgpatch.toml";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub patch_dir: String,
    pub state_dir: String,
    pub include: String,
    pub exclude: String,
    pub case_sensitive_path_filtering: bool,
    pub error_on_warn: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            patch_dir: DEFAULT_PATCH_DIR.to_string(),
            state_dir: DEFAULT_STATE_DIR.to_string(),
            include: DEFAULT_INCLUDE.to_string(),
            exclude: DEFAULT_EXCLUDE.to_string(),
            case_sensitive_path_filtering: false,
            error_on_warn: false,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "pkgpatch",
    version,
    about = "Create, apply and rebase patch series for installed npm packages"
)]
pub struct Args {
    #[arg(help = "Packages to create patches for; apply all patches when empty")]
    pub packages: Vec<String>,

    #[arg(long, help = "Directory holding patch files, relative to the project root [default: patches]")]
    pub patch_dir: Option<String>,

    #[arg(long, help = "Un-apply all patches")]
    pub reverse: bool,

    #[arg(long, help = "Apply what can be applied and write pkgpatch-rejects.json for the rest")]
    pub partial: bool,

    #[arg(long, help = "Exit with a non-zero code when there were warnings")]
    pub error_on_warn: bool,

    #[arg(
        long,
        num_args = 0..=1,
        default_missing_value = "",
        value_name = "NAME",
        help = "Add a new patch to the end of the series instead of updating the last one"
    )]
    pub append: Option<String>,

    #[arg(long, value_name = "TARGET", help = "Un-apply patches after TARGET (a file, sequence name or number, or 0) to edit the series")]
    pub rebase: Option<String>,

    #[arg(long, help = "Regex of package-relative paths to include in the patch [default: .*]")]
    pub include: Option<String>,

    #[arg(long, help = "Regex of package-relative paths to exclude from the patch [default: ^package\\.json$]")]
    pub exclude: Option<String>,

    #[arg(long, help = "Match --include and --exclude case-sensitively")]
    pub case_sensitive_path_filtering: bool,

    #[arg(long, value_name = "DIR", help = "Create a manual patch from a package copy outside node_modules")]
    pub target_dir: Option<PathBuf>,

    #[arg(short, long, help = "Path to config file [default: <project root>/pkgpatch.toml]")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Use built-in defaults, ignore config file")]
    pub ignore_config: bool,

    #[arg(short, long, action = clap::ArgAction::Count, help = "More log output (-v info, -vv debug)")]
    pub verbose: u8,
}

/// Reads the project config. A missing default config file means defaults; a
/// missing explicit `--config` file is an error.
pub fn load_config(args: &Args, app_root: &Path) -> Result<Config> {
    if args.ignore_config {
        return Ok(Config::default());
    }

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => {
            let path = app_root.join(CONFIG_FILE_NAME);
            if !path.exists() {
                return Ok(Config::default());
            }
            path
        }
    };

    let content = std::fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config file at {:?}", config_path))?;

    toml::from_str(&content).with_context(|| format!("Failed to parse config file {:?}", config_path))
}

/// Command-line values win over the config file.
pub fn apply_overrides(mut config: Config, args: &Args) -> Config {
    if let Some(patch_dir) = &args.patch_dir {
        config.patch_dir = patch_dir.clone();
    }
    if let Some(include) = &args.include {
        config.include = include.clone();
    }
    if let Some(exclude) = &args.exclude {
        config.exclude = exclude.clone();
    }
    config.case_sensitive_path_filtering |= args.case_sensitive_path_filtering;
    config.error_on_warn |= args.error_on_warn;
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn parse_args(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("pkgpatch").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: Config = toml::from_str("patch_dir = \"fixes\"\nerror_on_warn = true\n").unwrap();
        assert_eq!(config.patch_dir, "fixes");
        assert!(config.error_on_warn);
        assert_eq!(config.exclude, "^package\\.json$");
        assert_eq!(config.state_dir, "node_modules/.pkgpatch-state");
    }

    #[test]
    fn test_missing_default_config_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = load_config(&parse_args(&[]), dir.path()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_project_config_is_read() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "include = \"^lib/\"\n").unwrap();

        let config = load_config(&parse_args(&[]), dir.path()).unwrap();
        assert_eq!(config.include, "^lib/");

        let ignored = load_config(&parse_args(&["--ignore-config"]), dir.path()).unwrap();
        assert_eq!(ignored.include, ".*");
    }

    #[test]
    fn test_explicit_config_must_exist() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let args = parse_args(&["--config", missing.to_str().unwrap()]);
        assert!(load_config(&args, dir.path()).is_err());
    }

    #[test]
    fn test_cli_overrides_config() {
        let args = parse_args(&["left-pad", "--patch-dir", "my-patches", "--exclude", "^test/"]);
        let config = apply_overrides(Config::default(), &args);
        assert_eq!(config.patch_dir, "my-patches");
        assert_eq!(config.exclude, "^test/");
        assert_eq!(config.include, ".*");
    }

    #[test]
    fn test_append_takes_optional_name() {
        assert_eq!(parse_args(&["a"]).append, None);
        assert_eq!(parse_args(&["a", "--append"]).append.as_deref(), Some(""));
        assert_eq!(
            parse_args(&["a", "--append", "fix docs"]).append.as_deref(),
            Some("fix docs")
        );
        assert_eq!(parse_args(&["-vv"]).verbose, 2);
    }
}
