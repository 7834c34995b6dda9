mod config;

use anyhow::{bail, Context, Result};
use clap::Parser;
use config::{apply_overrides, load_config, Args, Config};
use log::{debug, info};
use pkgpatch_core::diff_producer::TreeDiffProducer;
use pkgpatch_core::fetcher::NpmPackFetcher;
use pkgpatch_core::filter::PathFilter;
use pkgpatch_core::resolver::NodeModulesResolver;
use pkgpatch_core::workflow::apply_all::{apply_patches_for_app, ApplySettings};
use pkgpatch_core::workflow::make_patch::{make_patch, CreateMode, MakePatchOptions};
use pkgpatch_core::workflow::rebase::rebase;
use pkgpatch_core::workflow::{Collaborators, Project};
use std::env;
use std::path::{Path, PathBuf};
use std::process;

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

/// The nearest directory at or above `start` holding a `package.json`.
fn find_app_root(start: &Path) -> Result<PathBuf> {
    let root = start
        .ancestors()
        .find(|dir| dir.join("package.json").is_file())
        .with_context(|| format!("No package.json found in {:?} or any parent directory", start))?;

    if root.join(".pnp.cjs").exists() {
        bail!(
            "pkgpatch does not support Yarn Plug'n'Play projects: {:?} has a .pnp.cjs file.\n\n  \
             Patches are applied to an installed node_modules tree.",
            root
        );
    }
    Ok(root.to_path_buf())
}

fn validate_args(args: &Args, config: &Config) -> Result<()> {
    if Path::new(&config.patch_dir).is_absolute() {
        bail!(
            "--patch-dir must be a relative path to the project root, got {:?}",
            config.patch_dir
        );
    }
    if args.rebase.is_some() {
        if args.append.is_some() {
            bail!("--append cannot be used together with --rebase");
        }
        if args.packages.len() != 1 {
            bail!("--rebase requires exactly one package name");
        }
    }
    if args.target_dir.is_some() && args.packages.len() > 1 {
        bail!("--target-dir creates one manual patch; name at most one package");
    }
    Ok(())
}

fn create_mode(args: &Args) -> CreateMode {
    match &args.append {
        Some(name) if name.trim().is_empty() => CreateMode::Append { name: None },
        Some(name) => CreateMode::Append {
            name: Some(name.clone()),
        },
        None => CreateMode::OverwriteLast,
    }
}

/// Returns whether the run ended without errors (and without warnings when
/// `error_on_warn` is set).
fn run(args: Args) -> Result<bool> {
    let cwd = env::current_dir().context("Failed to read the current directory")?;
    let app_root = find_app_root(&cwd)?;
    let config = apply_overrides(load_config(&args, &app_root)?, &args);
    validate_args(&args, &config)?;
    debug!("Project root {:?}, config {:?}", app_root, config);

    let project = Project::new(&app_root, &config.patch_dir, Path::new(&config.state_dir));

    if let (Some(target), [package]) = (&args.rebase, args.packages.as_slice()) {
        rebase(&project, package, target)?;
        return Ok(true);
    }

    let resolver = NodeModulesResolver::new(&app_root);

    if !args.packages.is_empty() || args.target_dir.is_some() {
        let fetcher = NpmPackFetcher::new(&app_root);
        let differ = TreeDiffProducer;
        let tools = Collaborators {
            resolver: &resolver,
            fetcher: &fetcher,
            differ: &differ,
        };
        let options = MakePatchOptions {
            mode: create_mode(&args),
            filter: PathFilter::new(
                &config.include,
                &config.exclude,
                config.case_sensitive_path_filtering,
            )?,
            manual_target_dir: args.target_dir.clone(),
        };

        if args.packages.is_empty() {
            make_patch(&project, &tools, "", &options)?;
        }
        for package in &args.packages {
            info!("Creating patch for {}", package);
            make_patch(&project, &tools, package, &options)?;
        }
        return Ok(true);
    }

    let settings = ApplySettings {
        reverse: args.reverse,
        best_effort: args.partial,
    };
    let summary = apply_patches_for_app(&project, &resolver, settings)?;

    for applied in &summary.applied {
        debug!("applied {}", applied);
    }
    for error in &summary.errors {
        eprintln!("\nERROR {}", error);
    }
    if !summary.warnings.is_empty() {
        println!(
            "\n{} warning{} printed above.",
            summary.warnings.len(),
            if summary.warnings.len() == 1 { "" } else { "s" }
        );
    }

    let warned = config.error_on_warn && !summary.warnings.is_empty();
    Ok(summary.is_success() && !warned)
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}
