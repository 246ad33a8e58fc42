//! Generates the layer sources from the Vulkan registry.
//!
//! Every target is a template expanded against `vk.xml` or `video.xml`. The resolved registry is
//! cached for the duration of the run.

use self::{
    output::{Mode, Outcome},
    targets::{Source, Target},
};
use clap::{ArgGroup, Parser};
use layergen::{Registry, RegistryCache, TemplateError};
use log::{error, info};
use std::{
    collections::BTreeMap,
    error::Error as StdError,
    fmt::{Display, Error as FmtError, Formatter},
    io,
    path::PathBuf,
    process::ExitCode,
    thread,
};

mod logging;
mod output;
mod targets;

#[derive(Parser)]
#[command(
    name = "autogen",
    version,
    about = "Generates Vulkan layer sources from the API registry"
)]
#[command(group(ArgGroup::new("mode").args(["verify", "incremental"])))]
struct Cli {
    /// Directory holding vk.xml and video.xml
    #[arg(long, env = "LAYERGEN_REGISTRY", default_value = "registry")]
    registry: PathBuf,

    /// Directory the generated files are written to
    #[arg(long, env = "LAYERGEN_OUTPUT", default_value = "generated")]
    output: PathBuf,

    /// Compare the generated files with the ones on disk instead of writing them
    #[arg(long)]
    verify: bool,

    /// Only write the files whose content changed
    #[arg(long)]
    incremental: bool,

    /// Don't run clang-format over the generated files
    #[arg(long)]
    no_format: bool,

    /// Files to generate. All of them when none are given
    targets: Vec<String>,
}

impl Cli {
    fn mode(&self) -> Mode {
        if self.verify {
            Mode::Verify
        } else if self.incremental {
            Mode::Incremental
        } else {
            Mode::Generate
        }
    }
}

fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

/// Generates every requested target. Returns whether all of them succeeded.
fn run(cli: &Cli) -> Result<bool, AutogenError> {
    let mut by_source: BTreeMap<Source, Vec<&Target>> = BTreeMap::new();

    if cli.targets.is_empty() {
        for target in targets::TARGETS {
            by_source.entry(target.source).or_default().push(target);
        }
    } else {
        for name in &cli.targets {
            let target =
                targets::find(name).ok_or_else(|| AutogenError::UnknownTarget(name.clone()))?;
            by_source.entry(target.source).or_default().push(target);
        }
    }

    let config = targets::config();
    let cache = RegistryCache::new();
    let mut success = true;

    for (source, targets) in by_source {
        let path = cli.registry.join(source.file_name());

        if !path.is_file() {
            return Err(AutogenError::MissingRegistry(path));
        }

        // The first target of a source builds the snapshot, the others read it back.
        let jobs = targets
            .into_iter()
            .map(|target| {
                let registry = cache
                    .load_or_build(&path, &config)
                    .map_err(|err| AutogenError::Registry(path.clone(), err))?;

                Ok((target, registry))
            })
            .collect::<Result<Vec<_>, AutogenError>>()?;

        success &= generate_all(cli, source, &jobs);
    }

    Ok(success)
}

/// Expands the targets of one registry source in parallel, reporting each result.
fn generate_all(cli: &Cli, source: Source, jobs: &[(&Target, Registry)]) -> bool {
    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = jobs
            .iter()
            .map(|(target, registry)| {
                (
                    *target,
                    scope.spawn(move || generate(cli, source, registry, target)),
                )
            })
            .collect();

        handles
            .into_iter()
            .map(|(target, handle)| (target, handle.join()))
            .collect()
    });

    let mut success = true;

    for (target, result) in results {
        match result {
            Ok(Ok(Outcome::Written)) => info!("wrote {}", target.name),
            Ok(Ok(Outcome::Unchanged)) => info!("{} is up to date", target.name),
            Ok(Ok(Outcome::Mismatch(diff))) => {
                error!("{} is out of date", target.name);
                print!("--- {0}\n+++ {0} (generated)\n{diff}", target.name);
                success = false;
            }
            Ok(Err(err)) => {
                error!("failed to generate {}: {}", target.name, err);
                success = false;
            }
            Err(_) => {
                error!("generating {} panicked", target.name);
                success = false;
            }
        }
    }

    success
}

fn generate(
    cli: &Cli,
    source: Source,
    registry: &Registry,
    target: &Target,
) -> Result<Outcome, TargetError> {
    let expanded = layergen::expand(target.template, registry)?;
    let mut content = output::with_header(source.file_name(), &expanded);

    if !cli.no_format {
        content = output::clang_format(target.name, content);
    }

    Ok(output::write(
        &cli.output.join(target.name),
        &content,
        cli.mode(),
    )?)
}

/// Error that stops the whole run.
#[derive(Debug)]
enum AutogenError {
    UnknownTarget(String),
    MissingRegistry(PathBuf),
    Registry(PathBuf, layergen::Error),
}

impl StdError for AutogenError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Registry(_, err) => Some(err),
            _ => None,
        }
    }
}

impl Display for AutogenError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Self::UnknownTarget(name) => {
                let known: Vec<_> = targets::TARGETS.iter().map(|target| target.name).collect();
                write!(f, "unknown target `{name}`, expected one of: {}", known.join(", "))
            }
            Self::MissingRegistry(path) => {
                write!(f, "registry file {} does not exist", path.display())
            }
            Self::Registry(path, err) => write!(f, "failed to load {}: {}", path.display(), err),
        }
    }
}

/// Error that fails a single target.
#[derive(Debug)]
enum TargetError {
    Template(TemplateError),
    Io(io::Error),
}

impl StdError for TargetError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Template(err) => Some(err),
            Self::Io(err) => Some(err),
        }
    }
}

impl Display for TargetError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Self::Template(err) => write!(f, "template error at {err}"),
            Self::Io(err) => write!(f, "{err}"),
        }
    }
}

impl From<TemplateError> for TargetError {
    fn from(err: TemplateError) -> Self {
        Self::Template(err)
    }
}

impl From<io::Error> for TargetError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn verify_and_incremental_conflict() {
        assert!(Cli::try_parse_from(["autogen", "--verify", "--incremental"]).is_err());
    }

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["autogen", "--registry", "xml", "vk_dispatch_table.h"])
            .unwrap();

        assert_eq!(cli.registry, Path::new("xml"));
        assert_eq!(cli.targets, ["vk_dispatch_table.h"]);
        assert_eq!(cli.mode(), Mode::Generate);
        assert!(!cli.no_format);
    }

    #[test]
    fn unknown_target() {
        let cli = Cli::try_parse_from(["autogen", "vk_nothing.h"]).unwrap();

        assert!(matches!(
            run(&cli),
            Err(AutogenError::UnknownTarget(name)) if name == "vk_nothing.h",
        ));
    }

    #[test]
    fn missing_registry() {
        let cli = Cli::try_parse_from([
            "autogen",
            "--registry",
            "/nonexistent/registry",
            "vk_video_types.h",
        ])
        .unwrap();

        assert!(matches!(run(&cli), Err(AutogenError::MissingRegistry(_))));
    }
}
