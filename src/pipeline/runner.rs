use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::Utc;
use indexmap::IndexMap;
use log::{debug, error, info, warn};

use super::definition::{PipelineDefinition, StageDefinition, Trigger};
use super::executor::{CommandSpec, Executor};
use super::gate::{evaluate, ApprovalRequest, Approver, GateDecision};
use super::graph::StageGraph;
use super::secrets::{interpolate, InterpolationContext, ResolvedSecrets, SecretStore};
use crate::error::{Result, StagegateError};
use crate::output::RunProgress;
use crate::report::{CommandReport, RunReport, RunStatus, StageReport, StageStatus};

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Timeout for stages that do not set their own
    pub default_timeout_secs: Option<u64>,
    /// Lines of stdout/stderr kept per command
    pub log_tail_lines: usize,
    /// Directory relative stage `working_dir`s resolve against
    pub base_dir: Option<PathBuf>,
    pub show_progress: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            default_timeout_secs: None,
            log_tail_lines: 200,
            base_dir: None,
            show_progress: false,
        }
    }
}

/// Drives a pipeline run: walks the stage graph in order, evaluates gates,
/// asks for approvals and hands commands to the executor.
pub struct PipelineRunner<E, A> {
    executor: E,
    approver: A,
    secrets: SecretStore,
    options: RunnerOptions,
}

/// Per-run values shared by every stage.
struct RunContext<'a> {
    definition: &'a PipelineDefinition,
    secrets: ResolvedSecrets,
    trigger: Trigger,
    run_id: u64,
}

impl<E: Executor, A: Approver> PipelineRunner<E, A> {
    pub fn new(executor: E, approver: A, secrets: SecretStore, options: RunnerOptions) -> Self {
        Self {
            executor,
            approver,
            secrets,
            options,
        }
    }

    /// Runs `definition` once and returns the finished report.
    ///
    /// Stages run one at a time in graph order. A failing stage does not
    /// abort the loop: its dependents are skipped by their gates while
    /// `always`/`on_failure` stages still get their turn.
    ///
    /// # Errors
    ///
    /// Returns an error before any stage starts if the trigger is not
    /// accepted, the stage graph is invalid, or a declared secret is missing.
    /// Approval failures and spawn failures also abort the run.
    pub async fn run(
        &self,
        definition: &PipelineDefinition,
        trigger: Trigger,
        run_id: u64,
    ) -> Result<RunReport> {
        if !definition.accepts(trigger) {
            return Err(StagegateError::TriggerNotAccepted {
                pipeline: definition.name.clone(),
                trigger: trigger.to_string(),
            });
        }

        let graph = StageGraph::build(definition)?;
        let secrets = self.secrets.resolve(&definition.secrets)?;
        if !secrets.is_empty() {
            debug!("Resolved {} secrets", secrets.len());
        }

        info!(
            "Starting run #{run_id} of pipeline '{}' ({} stages, trigger: {trigger})",
            definition.name,
            graph.len()
        );

        let started = Instant::now();
        let mut report = RunReport {
            id: run_id,
            pipeline: definition.name.clone(),
            trigger,
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            duration_secs: 0.0,
            stages: Vec::with_capacity(graph.len()),
        };

        let mut stage_defs: HashMap<&str, &StageDefinition> = HashMap::new();
        for stage in &definition.stages {
            stage_defs.insert(stage.name.as_str(), stage);
        }

        for name in graph.order() {
            let Some(stage) = stage_defs.get(name.as_str()) else {
                continue;
            };
            report.stages.push(StageReport::pending(
                name,
                graph.parents(name).to_vec(),
                stage.when,
                stage.continue_on_error,
            ));
        }

        let ctx = RunContext {
            definition,
            secrets,
            trigger,
            run_id,
        };
        let progress = RunProgress::new(self.options.show_progress, graph.len());

        for (idx, name) in graph.order().iter().enumerate() {
            let Some(stage) = stage_defs.get(name.as_str()).copied() else {
                continue;
            };

            let decision = {
                let parents: Vec<&StageReport> = graph
                    .parents(name)
                    .iter()
                    .filter_map(|p| report.stage(p))
                    .collect();
                debug_assert!(parents.iter().all(|p| p.status.is_terminal()));
                evaluate(stage.when, &parents)
            };

            if let GateDecision::Skip(reason) = decision {
                info!("Skipping stage '{name}': {reason}");
                progress.skipped(name, idx, &reason);
                let entry = &mut report.stages[idx];
                entry.status = StageStatus::Skipped;
                entry.skip_reason = Some(reason);
                continue;
            }

            if let Some(gate) = &stage.approval {
                let request = ApprovalRequest {
                    pipeline: definition.name.clone(),
                    stage: name.clone(),
                    run_id,
                    message: gate.message.clone(),
                };
                let approval = self.approver.approve(&request).await?;
                let approved = approval.approved();
                info!(
                    "Stage '{name}' {} by {}",
                    if approved { "approved" } else { "rejected" },
                    approval.decided_by
                );

                let entry = &mut report.stages[idx];
                entry.approval = Some(approval);
                if !approved {
                    let held = graph.descendants(name);
                    if !held.is_empty() {
                        info!("Gate '{name}' holds back: {}", held.join(", "));
                    }
                    progress.rejected(name, idx);
                    entry.status = StageStatus::Rejected;
                    entry.skip_reason = Some("manual approval was rejected".to_string());
                    continue;
                }
            }

            let spinner = progress.start(name, idx);
            let entry = &mut report.stages[idx];
            self.run_stage(&ctx, stage, entry).await?;
            spinner.finish(entry.status, entry.duration_secs);
        }

        report.status = report.final_status();
        report.finished_at = Some(Utc::now());
        report.duration_secs = started.elapsed().as_secs_f64();

        match report.status {
            RunStatus::Succeeded => info!("Run #{run_id} succeeded"),
            RunStatus::Rejected => warn!("Run #{run_id} stopped at a rejected approval"),
            _ => error!("Run #{run_id} finished with status {}", report.status.as_str()),
        }

        Ok(report)
    }

    async fn run_stage(
        &self,
        ctx: &RunContext<'_>,
        stage: &StageDefinition,
        entry: &mut StageReport,
    ) -> Result<()> {
        let started = Instant::now();
        entry.status = StageStatus::Running;
        entry.started_at = Some(Utc::now());

        let max_attempts = stage.retries + 1;
        for attempt in 1..=max_attempts {
            entry.attempts = attempt;
            let (status, commands) = self.run_commands(ctx, stage).await?;
            entry.status = status;
            entry.commands = commands;

            if status == StageStatus::Succeeded {
                break;
            }
            if attempt < max_attempts {
                warn!(
                    "Stage '{}' {} on attempt {attempt}/{max_attempts}, retrying",
                    stage.name,
                    status.as_str()
                );
            }
        }

        entry.finished_at = Some(Utc::now());
        entry.duration_secs = started.elapsed().as_secs_f64();

        if entry.status.is_failure() && entry.continue_on_error {
            warn!("Stage '{}' failed but continues on error", stage.name);
        }

        Ok(())
    }

    /// Runs a stage's commands in order, stopping at the first failure.
    async fn run_commands(
        &self,
        ctx: &RunContext<'_>,
        stage: &StageDefinition,
    ) -> Result<(StageStatus, Vec<CommandReport>)> {
        let mut reports = Vec::with_capacity(stage.commands.len());

        let env = match self.stage_env(ctx, stage) {
            Ok(env) => env,
            Err(e) => {
                error!("Stage '{}': {e}", stage.name);
                reports.push(failed_before_start(&ctx.secrets.mask(&e.to_string())));
                return Ok((StageStatus::Failed, reports));
            }
        };

        let interp_ctx = InterpolationContext {
            secrets: &ctx.secrets,
            env: &env,
            run_id: ctx.run_id,
            pipeline: &ctx.definition.name,
            trigger: &ctx.trigger.to_string(),
        };

        let timeout = stage
            .timeout_secs
            .or(self.options.default_timeout_secs)
            .map(Duration::from_secs);

        for raw in &stage.commands {
            let command = match interpolate(raw, &interp_ctx) {
                Ok(command) => command,
                Err(e) => {
                    error!("Stage '{}': {e}", stage.name);
                    reports.push(failed_before_start(&ctx.secrets.mask(&e.to_string())));
                    return Ok((StageStatus::Failed, reports));
                }
            };

            let mut spec_env = env.clone();
            for (name, secret) in ctx.secrets.iter() {
                if !is_builtin_var(name) {
                    spec_env.insert(name.clone(), secret.expose().to_string());
                }
            }

            let spec = CommandSpec {
                command: command.clone(),
                env: spec_env,
                working_dir: self.working_dir(stage),
                timeout,
            };

            debug!("Stage '{}' running: {}", stage.name, ctx.secrets.mask(&command));
            let outcome = self.executor.execute(&spec).await?;

            let tail = self.options.log_tail_lines;
            reports.push(CommandReport {
                command: ctx.secrets.mask(&command),
                exit_code: outcome.exit_code,
                timed_out: outcome.timed_out,
                duration_secs: outcome.duration.as_secs_f64(),
                stdout: tail_lines(&ctx.secrets.mask(&outcome.stdout), tail),
                stderr: tail_lines(&ctx.secrets.mask(&outcome.stderr), tail),
            });

            if outcome.timed_out {
                return Ok((StageStatus::TimedOut, reports));
            }
            if !outcome.success() {
                return Ok((StageStatus::Failed, reports));
            }
        }

        Ok((StageStatus::Succeeded, reports))
    }

    /// Builtin variables, then pipeline env, then stage env; values are
    /// interpolated so they may reference secrets and run fields.
    ///
    /// `STAGEGATE_*` names are reserved and cannot be overridden.
    fn stage_env(
        &self,
        ctx: &RunContext<'_>,
        stage: &StageDefinition,
    ) -> Result<IndexMap<String, String>> {
        let trigger = ctx.trigger.to_string();
        let mut env = IndexMap::new();
        env.insert("STAGEGATE_PIPELINE".to_string(), ctx.definition.name.clone());
        env.insert("STAGEGATE_RUN_ID".to_string(), ctx.run_id.to_string());
        env.insert("STAGEGATE_STAGE".to_string(), stage.name.clone());
        env.insert("STAGEGATE_TRIGGER".to_string(), trigger.clone());

        for (key, raw) in ctx.definition.env.iter().chain(stage.env.iter()) {
            if is_builtin_var(key) {
                warn!("Stage '{}': {key} is reserved, ignoring it", stage.name);
                continue;
            }
            let value = {
                let interp_ctx = InterpolationContext {
                    secrets: &ctx.secrets,
                    env: &env,
                    run_id: ctx.run_id,
                    pipeline: &ctx.definition.name,
                    trigger: &trigger,
                };
                interpolate(raw, &interp_ctx)?
            };
            env.insert(key.clone(), value);
        }

        Ok(env)
    }

    fn working_dir(&self, stage: &StageDefinition) -> Option<PathBuf> {
        let dir = stage.working_dir.as_ref().map(PathBuf::from);
        match (dir, &self.options.base_dir) {
            (Some(dir), Some(base)) if dir.is_relative() => Some(base.join(dir)),
            (Some(dir), _) => Some(dir),
            (None, base) => base.clone(),
        }
    }
}

const BUILTIN_PREFIX: &str = "STAGEGATE_";

fn is_builtin_var(name: &str) -> bool {
    name.starts_with(BUILTIN_PREFIX)
}

fn failed_before_start(message: &str) -> CommandReport {
    CommandReport {
        command: String::new(),
        exit_code: None,
        timed_out: false,
        duration_secs: 0.0,
        stdout: String::new(),
        stderr: message.to_string(),
    }
}

/// Keeps the last `limit` lines of `text`; `0` keeps everything.
pub fn tail_lines(text: &str, limit: usize) -> String {
    if limit == 0 {
        return text.to_string();
    }

    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= limit {
        return text.to_string();
    }

    lines[lines.len() - limit..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StagegateError;
    use crate::pipeline::executor::CommandOutcome;
    use crate::pipeline::gate::{ApprovalMode, PresetApprover};
    use std::sync::Mutex;

    /// Executor that records commands and fails any command containing a
    /// scripted marker.
    #[derive(Default)]
    struct ScriptedExecutor {
        seen: Mutex<Vec<CommandSpec>>,
        failures: Vec<(&'static str, Option<i32>)>,
        flaky: Mutex<HashMap<String, u32>>,
    }

    impl ScriptedExecutor {
        fn failing(failures: Vec<(&'static str, Option<i32>)>) -> Self {
            Self {
                failures,
                ..Default::default()
            }
        }

        fn commands(&self) -> Vec<String> {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .map(|s| s.command.clone())
                .collect()
        }
    }

    impl Executor for ScriptedExecutor {
        async fn execute(&self, spec: &CommandSpec) -> Result<CommandOutcome> {
            self.seen.lock().unwrap().push(spec.clone());

            if let Some(remaining) = spec.command.strip_prefix("flaky:") {
                let mut flaky = self.flaky.lock().unwrap();
                let count = flaky.entry(spec.command.clone()).or_insert(0);
                *count += 1;
                let needed: u32 = remaining.parse().unwrap_or(0);
                let code = if *count > needed { 0 } else { 1 };
                return Ok(CommandOutcome {
                    exit_code: Some(code),
                    ..Default::default()
                });
            }

            for (marker, code) in &self.failures {
                if spec.command.contains(marker) {
                    return Ok(CommandOutcome {
                        exit_code: *code,
                        timed_out: code.is_none(),
                        stderr: format!("{marker} failed"),
                        ..Default::default()
                    });
                }
            }

            Ok(CommandOutcome {
                exit_code: Some(0),
                stdout: format!("ran {}", spec.command),
                ..Default::default()
            })
        }
    }

    fn definition(yaml: &str) -> PipelineDefinition {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn runner(
        executor: ScriptedExecutor,
        approved: &[&str],
        secrets: SecretStore,
    ) -> PipelineRunner<ScriptedExecutor, PresetApprover> {
        let approver = PresetApprover::new(
            approved.iter().map(|s| (*s).to_string()),
            false,
            ApprovalMode::Deny,
        );
        PipelineRunner::new(executor, approver, secrets, RunnerOptions::default())
    }

    const DELIVERY: &str = r#"
name: delivery
secrets: [DOCKER_PASSWORD]
env:
  IMAGE: demo/app
stages:
  - name: build
    commands: ["mvn -B verify"]
  - name: scan
    commands: ["gitleaks detect"]
  - name: package
    commands: ["docker build -t ${{ env.IMAGE }}:${{ run.id }} .", "echo ${{ secrets.DOCKER_PASSWORD }} | docker login"]
  - name: deploy
    commands: ["ssh deploy"]
    approval:
      message: Deploy to production?
"#;

    #[tokio::test]
    async fn test_linear_run_succeeds_with_approval() {
        let secrets = SecretStore::from_pairs([("DOCKER_PASSWORD", "s3cr3t")]);
        let runner = runner(ScriptedExecutor::default(), &["deploy"], secrets);

        let report = runner
            .run(&definition(DELIVERY), Trigger::Push, 4)
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Succeeded);
        assert_eq!(report.id, 4);
        assert!(report.finished_at.is_some());
        assert!(report.stages.iter().all(|s| s.status == StageStatus::Succeeded));
        assert!(report.stage("deploy").unwrap().approval.as_ref().unwrap().approved());

        let commands = runner.executor.commands();
        assert_eq!(commands[0], "mvn -B verify");
        assert_eq!(commands[2], "docker build -t demo/app:4 .");
        assert_eq!(commands.len(), 5);

        let package = report.stage("package").unwrap();
        assert_eq!(package.commands[1].command, "echo *** | docker login");
        assert!(!package.commands[1].stdout.contains("s3cr3t"));
    }

    #[tokio::test]
    async fn test_commands_receive_env_and_secrets() {
        let secrets = SecretStore::from_pairs([("DOCKER_PASSWORD", "s3cr3t")]);
        let runner = runner(ScriptedExecutor::default(), &["deploy"], secrets);
        runner
            .run(&definition(DELIVERY), Trigger::Manual, 2)
            .await
            .unwrap();

        let seen = runner.executor.seen.lock().unwrap();
        let env = &seen[0].env;
        assert_eq!(env.get("STAGEGATE_PIPELINE").unwrap(), "delivery");
        assert_eq!(env.get("STAGEGATE_RUN_ID").unwrap(), "2");
        assert_eq!(env.get("STAGEGATE_STAGE").unwrap(), "build");
        assert_eq!(env.get("STAGEGATE_TRIGGER").unwrap(), "manual");
        assert_eq!(env.get("IMAGE").unwrap(), "demo/app");
        assert_eq!(env.get("DOCKER_PASSWORD").unwrap(), "s3cr3t");
    }

    #[tokio::test]
    async fn test_failure_skips_downstream_stages() {
        let secrets = SecretStore::from_pairs([("DOCKER_PASSWORD", "x")]);
        let executor = ScriptedExecutor::failing(vec![("gitleaks", Some(1))]);
        let runner = runner(executor, &["deploy"], secrets);

        let report = runner
            .run(&definition(DELIVERY), Trigger::Push, 1)
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.stage("scan").unwrap().status, StageStatus::Failed);
        assert_eq!(report.stage("package").unwrap().status, StageStatus::Skipped);
        let deploy = report.stage("deploy").unwrap();
        assert_eq!(deploy.status, StageStatus::Skipped);
        assert!(deploy.approval.is_none(), "gate must not be asked for skipped stages");
        assert_eq!(runner.executor.commands().len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_approval_stops_deploy() {
        let secrets = SecretStore::from_pairs([("DOCKER_PASSWORD", "x")]);
        let runner = runner(ScriptedExecutor::default(), &[], secrets);

        let report = runner
            .run(&definition(DELIVERY), Trigger::Push, 1)
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Rejected);
        let deploy = report.stage("deploy").unwrap();
        assert_eq!(deploy.status, StageStatus::Rejected);
        assert!(deploy.commands.is_empty());
        assert!(!runner.executor.commands().contains(&"ssh deploy".to_string()));
    }

    #[tokio::test]
    async fn test_missing_secret_aborts_before_any_stage() {
        let runner = runner(ScriptedExecutor::default(), &["deploy"], SecretStore::default());

        let err = runner
            .run(&definition(DELIVERY), Trigger::Push, 1)
            .await
            .unwrap_err();

        assert!(matches!(err, StagegateError::MissingSecrets(_)));
        assert!(runner.executor.commands().is_empty());
    }

    #[tokio::test]
    async fn test_trigger_not_accepted() {
        let def = definition(
            "name: p\ntriggers: [schedule]\nstages:\n  - {name: a, commands: [x]}\n",
        );
        let runner = runner(ScriptedExecutor::default(), &[], SecretStore::default());

        let err = runner.run(&def, Trigger::Push, 1).await.unwrap_err();
        assert!(matches!(err, StagegateError::TriggerNotAccepted { .. }));
    }

    #[tokio::test]
    async fn test_on_failure_and_always_stages() {
        let def = definition(
            r"
name: p
stages:
  - {name: test, commands: [unit-tests]}
  - {name: notify, commands: [notify], needs: [test], when: on_failure}
  - {name: cleanup, commands: [cleanup], needs: [test], when: always}
  - {name: publish, commands: [publish], needs: [test]}
",
        );
        let executor = ScriptedExecutor::failing(vec![("unit-tests", Some(2))]);
        let runner = runner(executor, &[], SecretStore::default());

        let report = runner.run(&def, Trigger::Manual, 1).await.unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.stage("notify").unwrap().status, StageStatus::Succeeded);
        assert_eq!(report.stage("cleanup").unwrap().status, StageStatus::Succeeded);
        assert_eq!(report.stage("publish").unwrap().status, StageStatus::Skipped);
        assert_eq!(report.stage("test").unwrap().commands[0].exit_code, Some(2));
    }

    #[tokio::test]
    async fn test_continue_on_error_keeps_pipeline_green() {
        let def = definition(
            r"
name: p
stages:
  - {name: lint, commands: [checkstyle], continue_on_error: true}
  - {name: build, commands: [build]}
",
        );
        let executor = ScriptedExecutor::failing(vec![("checkstyle", Some(1))]);
        let runner = runner(executor, &[], SecretStore::default());

        let report = runner.run(&def, Trigger::Manual, 1).await.unwrap();

        assert_eq!(report.status, RunStatus::Succeeded);
        assert_eq!(report.stage("lint").unwrap().status, StageStatus::Failed);
        assert_eq!(report.stage("build").unwrap().status, StageStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_retries_rerun_the_stage() {
        let def = definition(
            "name: p\nstages:\n  - {name: flaky, commands: ['flaky:2'], retries: 2}\n",
        );
        let runner = runner(ScriptedExecutor::default(), &[], SecretStore::default());

        let report = runner.run(&def, Trigger::Manual, 1).await.unwrap();

        let stage = report.stage("flaky").unwrap();
        assert_eq!(stage.status, StageStatus::Succeeded);
        assert_eq!(stage.attempts, 3);
        assert_eq!(stage.commands.len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_marks_stage_timed_out() {
        let def = definition(
            "name: p\nstages:\n  - {name: slow, commands: [hang], timeout_secs: 1}\n  - {name: next, commands: [x]}\n",
        );
        let executor = ScriptedExecutor::failing(vec![("hang", None)]);
        let runner = runner(executor, &[], SecretStore::default());

        let report = runner.run(&def, Trigger::Manual, 1).await.unwrap();

        assert_eq!(report.stage("slow").unwrap().status, StageStatus::TimedOut);
        assert_eq!(report.stage("next").unwrap().status, StageStatus::Skipped);
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(
            runner.executor.seen.lock().unwrap()[0].timeout,
            Some(Duration::from_secs(1))
        );
    }

    #[tokio::test]
    async fn test_bad_interpolation_fails_stage() {
        let def = definition(
            "name: p\nstages:\n  - {name: a, commands: ['echo ${{ secrets.UNDECLARED }}']}\n",
        );
        let runner = runner(ScriptedExecutor::default(), &[], SecretStore::default());

        let report = runner.run(&def, Trigger::Manual, 1).await.unwrap();

        let stage = report.stage("a").unwrap();
        assert_eq!(stage.status, StageStatus::Failed);
        assert!(stage.commands[0].stderr.contains("UNDECLARED"));
        assert!(runner.executor.commands().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_gate_holds_back_downstream_stages() {
        let def = definition(
            r"
name: p
stages:
  - {name: build, commands: [build]}
  - {name: approve-release, commands: [release-notes], approval: {message: ship it}}
  - {name: package, commands: [package]}
  - {name: deploy, commands: [deploy]}
  - {name: rollback, commands: [rollback], needs: [approve-release], when: on_failure}
  - {name: cleanup, commands: [cleanup], needs: [approve-release], when: always}
",
        );
        let runner = runner(ScriptedExecutor::default(), &[], SecretStore::default());

        let report = runner.run(&def, Trigger::Manual, 1).await.unwrap();

        assert_eq!(report.status, RunStatus::Rejected);
        assert_eq!(
            report.stage("approve-release").unwrap().status,
            StageStatus::Rejected
        );
        for name in ["package", "deploy", "rollback"] {
            let stage = report.stage(name).unwrap();
            assert_eq!(stage.status, StageStatus::Skipped, "{name}");
            assert!(stage.commands.is_empty(), "{name}");
        }
        assert_eq!(report.stage("cleanup").unwrap().status, StageStatus::Succeeded);
        assert_eq!(runner.executor.commands(), vec!["build", "cleanup"]);
    }

    #[tokio::test]
    async fn test_stage_env_overrides_pipeline_env() {
        let def = definition(
            r#"
name: p
secrets: [REGISTRY_TOKEN, STAGEGATE_RUN_ID]
env:
  REGION: eu-west-1
  TAG: "build-${{ run.id }}"
  STAGEGATE_STAGE: hijacked
stages:
  - name: deploy
    commands: [deploy]
    env:
      REGION: us-east-1
      AUTH: "Bearer ${{ secrets.REGISTRY_TOKEN }}"
      TARGET: "${{ env.REGION }}/${{ env.TAG }}"
"#,
        );
        let secrets =
            SecretStore::from_pairs([("REGISTRY_TOKEN", "tok"), ("STAGEGATE_RUN_ID", "99")]);
        let runner = runner(ScriptedExecutor::default(), &[], secrets);

        runner.run(&def, Trigger::Manual, 7).await.unwrap();

        let seen = runner.executor.seen.lock().unwrap();
        let env = &seen[0].env;
        assert_eq!(env.get("REGION").unwrap(), "us-east-1");
        assert_eq!(env.get("TAG").unwrap(), "build-7");
        assert_eq!(env.get("AUTH").unwrap(), "Bearer tok");
        assert_eq!(env.get("TARGET").unwrap(), "us-east-1/build-7");
        assert_eq!(env.get("STAGEGATE_STAGE").unwrap(), "deploy");
        assert_eq!(env.get("STAGEGATE_RUN_ID").unwrap(), "7");
    }

    #[tokio::test]
    async fn test_multiline_secret_masked_before_tailing() {
        let key = "-----BEGIN KEY-----\nAAAAsecretline1\nBBBBsecretline2\n-----END KEY-----";
        let def = definition(
            r#"
name: p
secrets: [EC2_SSH_KEY]
stages:
  - {name: deploy, commands: ["printf '%s' '${{ secrets.EC2_SSH_KEY }}'"]}
"#,
        );
        let options = RunnerOptions {
            log_tail_lines: 2,
            ..Default::default()
        };
        let runner = PipelineRunner::new(
            ScriptedExecutor::default(),
            PresetApprover::default(),
            SecretStore::from_pairs([("EC2_SSH_KEY", key)]),
            options,
        );

        let report = runner.run(&def, Trigger::Manual, 1).await.unwrap();

        let command = &report.stage("deploy").unwrap().commands[0];
        assert_eq!(command.stdout, "ran printf '%s' '***'");
        assert!(!command.stdout.contains("secretline"));
        assert!(!command.stdout.contains("END KEY"));
    }

    #[test]
    fn test_tail_lines() {
        assert_eq!(tail_lines("a\nb\nc", 2), "b\nc");
        assert_eq!(tail_lines("a\nb", 5), "a\nb");
        assert_eq!(tail_lines("a\nb\nc", 0), "a\nb\nc");
    }

    #[test]
    fn test_working_dir_resolution() {
        let options = RunnerOptions {
            base_dir: Some(PathBuf::from("/repo")),
            ..Default::default()
        };
        let runner = PipelineRunner::new(
            ScriptedExecutor::default(),
            PresetApprover::default(),
            SecretStore::default(),
            options,
        );
        let mut stage: StageDefinition =
            serde_yaml::from_str("{name: a, commands: [x], working_dir: app}").unwrap();

        assert_eq!(runner.working_dir(&stage), Some(PathBuf::from("/repo/app")));
        stage.working_dir = Some("/abs".to_string());
        assert_eq!(runner.working_dir(&stage), Some(PathBuf::from("/abs")));
        stage.working_dir = None;
        assert_eq!(runner.working_dir(&stage), Some(PathBuf::from("/repo")));
    }
}
