use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::{Config, OutputFormat};
use crate::history::RunHistory;
use crate::output;
use crate::pipeline::definition::RunCondition;
use crate::pipeline::{
    PipelineDefinition, PipelineRunner, PresetApprover, RunnerOptions, SecretStore,
    ShellExecutor, StageGraph, Trigger,
};
use crate::report::RunStatus;

#[derive(Parser)]
#[command(name = "stagegate")]
#[command(author, version, about = "Pipeline runner with stage gates", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ./stagegate.{toml,json,yaml,yml})
    #[arg(short, long, global = true, env = "STAGEGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Write the JSON report to this file
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[arg(short, long, global = true, value_enum)]
    format: Option<OutputFormat>,

    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline
    Run {
        pipeline: PathBuf,

        #[arg(short, long, value_enum, default_value_t = Trigger::Manual)]
        trigger: Trigger,

        /// Approve the gate of this stage up front (repeatable)
        #[arg(short, long = "approve", value_name = "STAGE")]
        approve: Vec<String>,

        /// Approve every gate
        #[arg(long, default_value_t = false)]
        auto_approve: bool,

        /// TOML file of NAME = "value" secrets; the environment overrides it
        #[arg(short, long, env = "STAGEGATE_SECRETS_FILE")]
        secrets_file: Option<PathBuf>,

        /// Do not record this run in history
        #[arg(long, default_value_t = false)]
        no_history: bool,
    },

    /// Validate a pipeline definition
    Validate {
        pipeline: PathBuf,

        #[arg(short, long, env = "STAGEGATE_SECRETS_FILE")]
        secrets_file: Option<PathBuf>,

        /// Also check that every declared secret resolves
        #[arg(long, default_value_t = false)]
        check_secrets: bool,
    },

    /// Show the execution order without running anything
    Plan { pipeline: PathBuf },

    /// List or clear recorded runs of a pipeline
    History {
        pipeline: String,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        #[arg(long, default_value_t = false)]
        clear: bool,
    },
}

/// One row of `plan --format json`.
#[derive(Serialize)]
struct PlannedStage<'a> {
    name: &'a str,
    needs: &'a [String],
    when: RunCondition,
    approval: bool,
    commands: &'a [String],
}

impl Cli {
    fn format(&self, config: &Config) -> OutputFormat {
        self.format.unwrap_or(config.output.format)
    }

    fn pretty(&self, config: &Config) -> bool {
        self.pretty || config.output.pretty
    }

    /// Writes JSON to `--output` when given, otherwise to stdout.
    fn emit_json<T: Serialize + ?Sized>(&self, value: &T, pretty: bool) -> Result<()> {
        if let Some(output_path) = &self.output {
            let mut file = std::fs::File::create(output_path)
                .with_context(|| format!("Failed to create {}", output_path.display()))?;
            output::export_json(value, pretty, &mut file)?;
            file.flush()?;
            info!("Report written to: {}", output_path.display());
        } else {
            output::export_json(value, pretty, &mut std::io::stdout())?;
        }
        Ok(())
    }

    fn load_definition(path: &Path) -> Result<PipelineDefinition> {
        PipelineDefinition::load(path)
            .with_context(|| format!("Failed to load pipeline: {}", path.display()))
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_run(
        &self,
        config: &Config,
        pipeline: &Path,
        trigger: Trigger,
        approve: &[String],
        auto_approve: bool,
        secrets_file: Option<&Path>,
        no_history: bool,
    ) -> Result<bool> {
        let definition = Self::load_definition(pipeline)?;

        for stage in approve {
            if definition.stage(stage).is_none() {
                warn!("--approve {stage}: no such stage in '{}'", definition.name);
            }
        }

        let history = RunHistory::new(
            config.history.dir.as_deref(),
            config.history.enabled && !no_history,
        )?;
        let run_id = history.next_run_id(&definition.name);

        let secrets = SecretStore::load(secrets_file)?;
        let approver =
            PresetApprover::new(approve.iter().cloned(), auto_approve, config.approvals.mode);
        let executor = ShellExecutor::new(
            config.runner.shell.clone(),
            config.runner.shell_args.clone(),
        );

        let format = self.format(config);
        let options = RunnerOptions {
            default_timeout_secs: config.runner.default_timeout_secs,
            log_tail_lines: config.runner.log_tail_lines,
            base_dir: pipeline
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .map(Path::to_path_buf),
            show_progress: format == OutputFormat::Summary,
        };

        let runner = PipelineRunner::new(executor, approver, secrets, options);
        let report = runner.run(&definition, trigger, run_id).await?;

        history.record(&report)?;

        match format {
            OutputFormat::Summary => {
                output::print_run_summary(&report);
                if self.output.is_some() {
                    self.emit_json(&report, self.pretty(config))?;
                }
            }
            OutputFormat::Json => self.emit_json(&report, self.pretty(config))?,
        }

        Ok(report.status == RunStatus::Succeeded)
    }

    fn execute_validate(
        &self,
        pipeline: &Path,
        secrets_file: Option<&Path>,
        check_secrets: bool,
    ) -> Result<bool> {
        let definition = Self::load_definition(pipeline)?;
        let graph = StageGraph::build(&definition)
            .with_context(|| format!("Invalid stage graph in {}", pipeline.display()))?;

        if check_secrets {
            SecretStore::load(secrets_file)?.resolve(&definition.secrets)?;
        }

        let gates = definition
            .stages
            .iter()
            .filter(|s| s.approval.is_some())
            .count();

        println!(
            "✓ Pipeline '{}' is valid: {} stages, {} approval gates, {} secrets",
            definition.name,
            graph.len(),
            gates,
            definition.secrets.len()
        );

        Ok(true)
    }

    fn execute_plan(&self, config: &Config, pipeline: &Path) -> Result<bool> {
        let definition = Self::load_definition(pipeline)?;
        let graph = StageGraph::build(&definition)?;

        match self.format(config) {
            OutputFormat::Summary => output::print_plan(&definition, &graph),
            OutputFormat::Json => {
                let planned: Vec<PlannedStage<'_>> = graph
                    .order()
                    .iter()
                    .filter_map(|name| definition.stage(name))
                    .map(|stage| PlannedStage {
                        name: &stage.name,
                        needs: graph.parents(&stage.name),
                        when: stage.when,
                        approval: stage.approval.is_some(),
                        commands: &stage.commands,
                    })
                    .collect();
                self.emit_json(&planned, self.pretty(config))?;
            }
        }

        Ok(true)
    }

    fn execute_history(
        &self,
        config: &Config,
        pipeline: &str,
        limit: usize,
        clear: bool,
    ) -> Result<bool> {
        let history = RunHistory::new(config.history.dir.as_deref(), true)?;

        if clear {
            history.clear(pipeline)?;
            return Ok(true);
        }

        let runs = history.list(pipeline, limit);
        match self.format(config) {
            OutputFormat::Summary => output::print_history(pipeline, &runs),
            OutputFormat::Json => self.emit_json(&runs, self.pretty(config))?,
        }

        Ok(true)
    }

    /// Runs the selected command. `Ok(false)` means it completed but the
    /// pipeline did not succeed.
    pub async fn execute(&self) -> Result<bool> {
        let config = Config::load(self.config.as_deref())?;

        match &self.command {
            Commands::Run {
                pipeline,
                trigger,
                approve,
                auto_approve,
                secrets_file,
                no_history,
            } => {
                self.execute_run(
                    &config,
                    pipeline,
                    *trigger,
                    approve,
                    *auto_approve,
                    secrets_file.as_deref(),
                    *no_history,
                )
                .await
            }
            Commands::Validate {
                pipeline,
                secrets_file,
                check_secrets,
            } => self.execute_validate(pipeline, secrets_file.as_deref(), *check_secrets),
            Commands::Plan { pipeline } => self.execute_plan(&config, pipeline),
            Commands::History {
                pipeline,
                limit,
                clear,
            } => self.execute_history(&config, pipeline, *limit, *clear),
        }
    }
}
