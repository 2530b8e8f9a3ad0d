//! cairn - compliance validation engine CLI
//!
//! ## Commands
//!
//! - `validate`: run every validation linked from a component definition
//! - `resolve`: resolve one validation link and print it
//! - `checksum`: print a digest for pinning a validation link
//! - `merge`: merge one OSCAL document into another

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use cairn_core::obs::RunSpan;
use cairn_core::{
    assessment_results, new_run_id, Aggregation, Algorithm, CairnConfig, RemarksTarget,
    RequirementStore, ResolveContext, Resolver, RunReport, StoreOptions,
};
use cairn_model::CancellationToken;
use cairn_oscal::{read_model, write_merged, write_model, OscalModel};

#[derive(Parser)]
#[command(name = "cairn")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    about = "Validate OSCAL control implementations against live infrastructure",
    long_about = None
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the validations linked from a component definition
    Validate {
        /// Component definition (YAML or JSON)
        #[arg(short = 'f', long = "file")]
        file: PathBuf,

        /// Assessment results file to create or merge into
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// How several validations on one requirement combine
        #[arg(long, default_value = "any")]
        aggregation: Aggregation,

        /// Where remarks are written back: statement, requirement or both
        #[arg(long, default_value = "requirement")]
        remarks: RemarksTarget,

        /// Write remarks back into the component definition
        #[arg(long)]
        write_remarks: bool,

        /// Allow validations that create resources or send side-effecting requests
        #[arg(long)]
        confirm_execution: bool,

        /// Config file (default: cairn-config.yaml when present)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override a variable or constant: var.<key>=<value> or const.<path>=<value>
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },

    /// Resolve a validation link and print the rendered document
    Resolve {
        /// `#<uuid>`, path, file:// or http(s):// link, optionally with @<checksum>
        link: String,

        /// Directory relative links resolve against
        #[arg(long, default_value = ".")]
        context: PathBuf,

        /// Component definition whose back-matter holds embedded validations
        #[arg(long)]
        component: Option<PathBuf>,

        /// Config file (default: cairn-config.yaml when present)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print a digest suitable for an @<checksum> suffix
    Checksum {
        file: PathBuf,

        /// md5, sha1, sha256 or sha512
        #[arg(long, default_value = "sha256")]
        algorithm: Algorithm,
    },

    /// Merge an OSCAL document into an existing one, in place
    Merge {
        existing: PathBuf,
        incoming: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    cairn_core::init_tracing(cli.json, level);

    let status = match cli.command {
        Commands::Validate {
            file,
            output,
            aggregation,
            remarks,
            write_remarks,
            confirm_execution,
            config,
            set,
        } => {
            let config = load_config(config.as_deref(), &set)?;
            let options = StoreOptions {
                aggregation,
                remarks_target: remarks,
                max_concurrency: config.max_concurrency,
            };
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    trigger.cancel();
                }
            });
            cmd_validate(
                &file,
                output.as_deref(),
                &config,
                options,
                write_remarks,
                confirm_execution,
                &cancel,
            )
            .await?
        }
        Commands::Resolve {
            link,
            context,
            component,
            config,
        } => {
            let config = load_config(config.as_deref(), &[])?;
            cmd_resolve(&link, &context, component.as_deref(), &config).await?;
            0
        }
        Commands::Checksum { file, algorithm } => {
            println!("{}", cmd_checksum(&file, algorithm)?);
            0
        }
        Commands::Merge { existing, incoming } => {
            cmd_merge(&existing, &incoming)?;
            0
        }
    };

    Ok(ExitCode::from(status))
}

fn load_config(path: Option<&Path>, overrides: &[String]) -> Result<CairnConfig> {
    let mut config = CairnConfig::load(path).context("Failed to load configuration")?;
    for pair in overrides {
        config.apply_override(pair)?;
    }
    Ok(config)
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Run every validation of `file`; returns the process exit status.
async fn cmd_validate(
    file: &Path,
    output: Option<&Path>,
    config: &CairnConfig,
    options: StoreOptions,
    write_remarks: bool,
    confirm_execution: bool,
    cancel: &CancellationToken,
) -> Result<u8> {
    let mut model =
        read_model(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let definition = model
        .component_definition
        .take()
        .with_context(|| format!("{} holds no component-definition", file.display()))?;

    let store = RequirementStore::from_component_definition(
        &definition,
        Resolver::from_config(config),
        parent_dir(file),
    )?
    .with_options(options);

    let run_id = new_run_id();
    {
        let _span = RunSpan::enter(&run_id);
        info!(
            requirements = store.requirements().len(),
            "validating {}",
            file.display()
        );
    }
    let report = store.run_as(run_id, cancel, confirm_execution).await?;

    // Output writes log under the same run.
    let _span = RunSpan::enter(&report.run_id);
    print_summary(&store, &report);

    if let Some(output) = output {
        let results = assessment_results(&report, store.requirements());
        write_merged(output, OscalModel::from_assessment_results(results)).with_context(|| {
            format!("Failed to write assessment results to {}", output.display())
        })?;
        println!("Assessment results written to {}", output.display());
    }

    if write_remarks {
        let mut definition = definition;
        store.annotate(&report, &mut definition);
        model.component_definition = Some(definition);
        write_model(file, &model)
            .with_context(|| format!("Failed to write remarks to {}", file.display()))?;
        println!("Remarks written to {}", file.display());
    }

    Ok(if report.exit_status() == 0 { 0 } else { 1 })
}

fn print_summary(store: &RequirementStore, report: &RunReport) {
    println!(
        "{}/{} requirements satisfied ({} validations)",
        report.satisfied_count(),
        report.requirements.len(),
        report.validations().len()
    );
    for req in store.requirements() {
        let Some(outcome) = report.requirements.get(&req.uuid) else {
            continue;
        };
        println!("  [{}] {} ({})", outcome.status, req.control_id, req.uuid);
        if !outcome.status.is_satisfied() {
            for line in outcome.remarks.lines() {
                println!("      {line}");
            }
        }
    }
}

async fn cmd_resolve(
    link: &str,
    context: &Path,
    component: Option<&Path>,
    config: &CairnConfig,
) -> Result<()> {
    let ctx = match component {
        Some(path) => {
            let model =
                read_model(path).with_context(|| format!("Failed to read {}", path.display()))?;
            let back_matter = model.component_definition.and_then(|d| d.back_matter);
            ResolveContext::new(context).with_back_matter(back_matter)
        }
        None => ResolveContext::new(context),
    };

    let resolved = Resolver::from_config(config)
        .resolve(link, &ctx, &CancellationToken::new())
        .await
        .with_context(|| format!("Failed to resolve {link}"))?;

    let validation = &resolved.validation;
    println!("# identity: {}", validation.identity);
    println!("# executable: {}", validation.is_executable());
    print!("{}", serde_yaml::to_string(&resolved.document)?);
    Ok(())
}

fn cmd_checksum(file: &Path, algorithm: Algorithm) -> Result<String> {
    let data = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    Ok(algorithm.digest_hex(&data))
}

fn cmd_merge(existing: &Path, incoming: &Path) -> Result<()> {
    let incoming_model =
        read_model(incoming).with_context(|| format!("Failed to read {}", incoming.display()))?;
    write_merged(existing, incoming_model)
        .with_context(|| format!("Failed to merge into {}", existing.display()))?;
    println!("Merged {} into {}", incoming.display(), existing.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPONENT: &str = r#"
component-definition:
  uuid: 5c1e0c55-0000-4000-8000-000000000001
  metadata:
    title: CLI fixture
  components:
    - uuid: comp-1
      type: software
      title: app
      description: app
      control-implementations:
        - uuid: ci-1
          source: catalog.json
          description: baseline
          implemented-requirements:
            - uuid: req-1
              control-id: ac-1
              description: access control
              links:
                - href: file://missing.yaml
                  rel: lula
"#;

    #[test]
    fn test_cli_parses_validate_flags() {
        let cli = Cli::try_parse_from([
            "cairn",
            "validate",
            "-f",
            "component.yaml",
            "--aggregation",
            "all",
            "--remarks",
            "both",
            "--set",
            "var.region=eu",
            "--confirm-execution",
        ])
        .unwrap();
        match cli.command {
            Commands::Validate {
                aggregation,
                remarks,
                set,
                confirm_execution,
                ..
            } => {
                assert_eq!(aggregation, Aggregation::All);
                assert_eq!(remarks, RemarksTarget::Both);
                assert_eq!(set, vec!["var.region=eu".to_string()]);
                assert!(confirm_execution);
            }
            _ => panic!("expected validate"),
        }
    }

    #[test]
    fn test_checksum_matches_algorithm() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.yaml");
        std::fs::write(&path, "hello world").unwrap();
        assert_eq!(
            cmd_checksum(&path, Algorithm::Md5).unwrap(),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
    }

    #[tokio::test]
    async fn test_validate_writes_results_and_fails_exit() {
        let dir = tempfile::tempdir().unwrap();
        let component = dir.path().join("component.yaml");
        let output = dir.path().join("assessment-results.yaml");
        std::fs::write(&component, COMPONENT).unwrap();

        let status = cmd_validate(
            &component,
            Some(&output),
            &CairnConfig::default(),
            StoreOptions::default(),
            true,
            false,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(status, 1);

        let results = read_model(&output).unwrap().assessment_results.unwrap();
        let finding = &results.results[0].findings[0];
        assert_eq!(finding.target.status.state, "not-satisfied");

        let annotated = read_model(&component).unwrap().component_definition.unwrap();
        let req = &annotated.components[0].control_implementations[0].implemented_requirements[0];
        assert!(req.remarks.as_deref().unwrap().contains("missing.yaml"));
    }

    #[test]
    fn test_merge_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("existing.yaml");
        let incoming = dir.path().join("incoming.json");
        std::fs::write(&existing, COMPONENT).unwrap();
        std::fs::write(
            &incoming,
            r#"{"component-definition": {"uuid": "other", "metadata": {"title": "renamed"}}}"#,
        )
        .unwrap();

        cmd_merge(&existing, &incoming).unwrap();
        let merged = read_model(&existing).unwrap().component_definition.unwrap();
        assert_eq!(merged.metadata.title, "renamed");
        assert_eq!(merged.uuid, "5c1e0c55-0000-4000-8000-000000000001");
        assert_eq!(merged.components.len(), 1);
    }
}
