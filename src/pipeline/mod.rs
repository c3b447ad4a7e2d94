// ABOUTME: Composite pipeline executor: prepare:<kind> [run:<kind>] as one operation
// ABOUTME: Validates and normalizes every step up front, hands the instance over, cleans up

pub mod cleanup;
pub mod steps;

use tracing::info;

use crate::args::{
    normalize_liquibase_args, normalize_psql_args, normalize_work_dir, Converter, NormalizedArgs,
    PathEnv, StdinProvider,
};
use crate::config::ExecutionContext;
use crate::console::Console;
use crate::error::CliError;
use crate::prepare::{print_detached, print_result, PrepareJobClient, WatchOptions, WatchOutcome};
use crate::remote::models::{PrepareRequest, RunRequest};
use crate::remote::EngineApi;
use crate::run::execute_run;

use cleanup::{run_with_cleanup, PreparedHandoff};
pub use steps::{parse_steps, PipelineStep, PrepareKind, RunKind};
use steps::{prepare_options, run_options};

struct PreparePlan {
    request: PrepareRequest,
    watch: bool,
}

struct RunPlan {
    kind: RunKind,
    /// `None` when the instance comes from the preceding prepare step.
    instance: Option<String>,
    args: NormalizedArgs,
    work_dir: String,
}

enum Plan {
    Prepare(PreparePlan),
    Run(RunPlan, String),
    PrepareThenRun(PreparePlan, RunPlan),
}

/// Steps that passed validation and normalization, ready to execute.
pub struct PlannedPipeline(Plan);

pub struct PipelineExecutor<'a> {
    api: &'a dyn EngineApi,
    ctx: &'a ExecutionContext,
    console: &'a Console,
    stdin: &'a dyn StdinProvider,
    convert: Option<&'a Converter>,
}

impl<'a> PipelineExecutor<'a> {
    pub fn new(
        api: &'a dyn EngineApi,
        ctx: &'a ExecutionContext,
        console: &'a Console,
        stdin: &'a dyn StdinProvider,
        convert: Option<&'a Converter>,
    ) -> Self {
        Self {
            api,
            ctx,
            console,
            stdin,
            convert,
        }
    }

    /// Runs the steps and returns the process exit code. Every usage,
    /// path, and stdin error is raised before the first engine call.
    pub async fn execute(&self, steps: Vec<PipelineStep>) -> Result<i32, CliError> {
        let planned = self.plan(steps)?;
        self.run(planned).await
    }

    /// Validates and normalizes `steps` without contacting the engine.
    pub fn plan(&self, steps: Vec<PipelineStep>) -> Result<PlannedPipeline, CliError> {
        self.build_plan(steps).map(PlannedPipeline)
    }

    pub async fn run(&self, planned: PlannedPipeline) -> Result<i32, CliError> {
        match planned.0 {
            Plan::Prepare(prepare) => self.prepare_only(prepare).await,
            Plan::Run(run, instance) => {
                execute_run(self.api, self.console, &run_request(run, instance)).await
            }
            Plan::PrepareThenRun(prepare, run) => self.prepare_then_run(prepare, run).await,
        }
    }

    fn build_plan(&self, steps: Vec<PipelineStep>) -> Result<Plan, CliError> {
        let mut steps = steps.into_iter();
        match (steps.next(), steps.next(), steps.next()) {
            (Some(PipelineStep::Prepare { kind, args }), None, None) => {
                Ok(Plan::Prepare(self.plan_prepare(kind, &args)?))
            }
            (Some(PipelineStep::Run { kind, args }), None, None) => {
                let run = self.plan_run(kind, &args)?;
                let instance = run.instance.clone().ok_or_else(|| {
                    CliError::Usage(format!(
                        "run:{} needs --instance <id> or a preceding prepare step",
                        kind.as_str()
                    ))
                })?;
                Ok(Plan::Run(run, instance))
            }
            (
                Some(PipelineStep::Prepare {
                    kind: prepare_kind,
                    args: prepare_args,
                }),
                Some(PipelineStep::Run {
                    kind: run_kind,
                    args: run_args,
                }),
                None,
            ) => {
                // Checked before any argument is read or normalized.
                if let Some(instance) = run_options(&run_args)?.instance {
                    return Err(CliError::ConflictingInstanceReference(format!(
                        "run:{} follows prepare:{} and also names --instance {}; drop one of them",
                        run_kind.as_str(),
                        prepare_kind.as_str(),
                        instance
                    )));
                }
                let prepare = self.plan_prepare(prepare_kind, &prepare_args)?;
                if !prepare.watch {
                    return Err(CliError::Usage(
                        "--no-watch cannot be used when a run step follows prepare".to_string(),
                    ));
                }
                let run = self.plan_run(run_kind, &run_args)?;
                Ok(Plan::PrepareThenRun(prepare, run))
            }
            _ => Err(CliError::Usage(
                "expected prepare:<kind>, run:<kind>, or prepare:<kind> ... run:<kind> ...".to_string(),
            )),
        }
    }

    fn path_env(&self) -> PathEnv<'_> {
        PathEnv {
            cwd: &self.ctx.cwd,
            workspace_root: self.ctx.workspace_root.as_deref(),
            convert: self.convert,
        }
    }

    fn work_dir(&self) -> Result<String, CliError> {
        normalize_work_dir(&self.ctx.cwd, self.convert)
    }

    fn plan_prepare(&self, kind: PrepareKind, args: &[String]) -> Result<PreparePlan, CliError> {
        let options = prepare_options(args)?;
        let env = self.path_env();
        let normalized = match kind {
            PrepareKind::Psql => normalize_psql_args(&options.tool_args, &env, self.stdin)?,
            PrepareKind::Liquibase => NormalizedArgs {
                args: normalize_liquibase_args(&options.tool_args, &env)?,
                stdin: None,
            },
        };
        Ok(PreparePlan {
            request: PrepareRequest {
                prepare_kind: kind.as_str().to_string(),
                image_id: options.image,
                args: normalized.args,
                stdin: normalized.stdin,
                work_dir: Some(self.work_dir()?),
            },
            watch: options.watch,
        })
    }

    fn plan_run(&self, kind: RunKind, args: &[String]) -> Result<RunPlan, CliError> {
        let options = run_options(args)?;
        let args = match kind {
            RunKind::Psql => normalize_psql_args(&options.tool_args, &self.path_env(), self.stdin)?,
            RunKind::Pgbench => NormalizedArgs {
                args: options.tool_args,
                stdin: None,
            },
        };
        Ok(RunPlan {
            kind,
            instance: options.instance,
            args,
            work_dir: self.work_dir()?,
        })
    }

    fn prepare_client(&self) -> PrepareJobClient<'_> {
        PrepareJobClient::new(self.api, self.console, WatchOptions::from_context(self.ctx))
    }

    async fn prepare_only(&self, prepare: PreparePlan) -> Result<i32, CliError> {
        let client = self.prepare_client();
        if !prepare.watch {
            let job = client.submit(&prepare.request).await?;
            print_detached(self.console, &job);
            return Ok(0);
        }
        match client.run(&prepare.request).await? {
            WatchOutcome::Succeeded(result) => print_result(self.console, &result),
            WatchOutcome::Detached(job) => print_detached(self.console, &job),
        }
        Ok(0)
    }

    async fn prepare_then_run(&self, prepare: PreparePlan, run: RunPlan) -> Result<i32, CliError> {
        let handoff = match self.prepare_client().run(&prepare.request).await? {
            WatchOutcome::Succeeded(result) => PreparedHandoff::new(result.instance_id),
            WatchOutcome::Detached(job) => {
                print_detached(self.console, &job);
                self.console.err_line(format_args!(
                    "run:{} skipped: the prepare job has not finished",
                    run.kind.as_str()
                ));
                return Ok(0);
            }
        };

        info!("Handing instance {} to run:{}", handoff.instance_id(), run.kind.as_str());
        let request = run_request(run, handoff.instance_id().to_string());
        let step = execute_run(self.api, self.console, &request);
        run_with_cleanup(handoff, self.api, self.console, self.ctx.verbose, step).await
    }
}

fn run_request(run: RunPlan, instance: String) -> RunRequest {
    RunRequest {
        kind: run.kind.as_str().to_string(),
        instance_ref: instance,
        args: run.args.args,
        stdin: run.args.stdin,
        work_dir: Some(run.work_dir),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::test_support::{strings, FixedStdin};
    use crate::config::{FileConfig, Mode, Overrides};
    use crate::console::capture::captured;
    use crate::remote::models::{JobStatus, RunEvent};
    use crate::testing::{blocked, job, EventScript, FakeEngine};
    use std::path::PathBuf;
    use std::time::Duration;

    fn context(mode: Mode) -> ExecutionContext {
        let overrides = Overrides {
            mode: Some(mode),
            workspace: Some(PathBuf::from("/ws")),
            watch_timeout_secs: Some(5),
            ..Default::default()
        };
        ExecutionContext::resolve(FileConfig::default(), overrides, PathBuf::from("/ws")).unwrap()
    }

    fn succeeding_engine() -> FakeEngine {
        let mut done = crate::testing::status_event(JobStatus::Succeeded);
        done.result = Some(crate::testing::sample_result());
        FakeEngine::new().with_events(EventScript::Finite(vec![done]))
    }

    async fn execute(
        engine: &FakeEngine,
        ctx: &ExecutionContext,
        console: &Console,
        tokens: &[&str],
    ) -> Result<i32, CliError> {
        let stdin = FixedStdin("select 42;\n");
        let executor = PipelineExecutor::new(engine, ctx, console, &stdin, None);
        executor.execute(parse_steps(&strings(tokens))?).await
    }

    #[tokio::test]
    async fn test_conflicting_instance_reference_before_any_call() {
        let engine = FakeEngine::new();
        let (console, _, _) = captured();
        let err = execute(
            &engine,
            &context(Mode::Local),
            &console,
            &[
                "prepare:psql", "--image", "pg16", "-f", "-", "run:psql", "--instance", "X", "-c",
                "select 1",
            ],
        )
        .await
        .unwrap_err();

        assert!(matches!(err, CliError::ConflictingInstanceReference(_)));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_normalization_error_before_any_call() {
        let engine = FakeEngine::new();
        let (console, _, _) = captured();
        let err = execute(
            &engine,
            &context(Mode::Local),
            &console,
            &["prepare:psql", "--image", "pg16", "run:psql", "-f", "/etc/passwd"],
        )
        .await
        .unwrap_err();

        assert!(matches!(err, CliError::PathOutsideWorkspace { .. }));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_handoff_blocked_cleanup_still_succeeds() {
        let engine = succeeding_engine()
            .with_run(vec![
                RunEvent::Stdout { data: "42\n".into() },
                RunEvent::Exit { exit_code: 0 },
            ])
            .with_delete(Ok(blocked(200, Some(1))));
        let (console, out, err) = captured();

        let code = execute(
            &engine,
            &context(Mode::Local),
            &console,
            &["prepare:psql", "--image", "pg16", "-f", "init.sql", "run:psql", "-c", "select 42"],
        )
        .await
        .unwrap();

        assert_eq!(code, 0);
        assert_eq!(engine.calls(), vec!["submit", "events", "run", "delete:inst-1"]);
        assert_eq!(engine.runs()[0].instance_ref, "inst-1");
        // The prepare result is not printed inside a pipeline.
        assert_eq!(out.contents(), "42\n");
        let stderr = err.contents();
        assert_eq!(stderr.lines().filter(|l| l.starts_with("warning:")).count(), 1);
        assert!(stderr.contains("blocked: active connections (1 active connection(s))"));
    }

    #[tokio::test]
    async fn test_run_failure_still_cleans_up_and_keeps_exit_code() {
        let engine = succeeding_engine().with_run(vec![RunEvent::Exit { exit_code: 3 }]);
        let (console, _, err) = captured();

        let code = execute(
            &engine,
            &context(Mode::Local),
            &console,
            &["prepare:lb", "--image", "pg16", "--searchPath", "db", "run:pgbench", "-c", "4"],
        )
        .await
        .unwrap();

        assert_eq!(code, 3);
        assert_eq!(engine.count("delete:inst-1"), 1);
        assert!(!err.contents().contains("warning:"));
        assert_eq!(engine.submitted()[0].args, strings(&["--searchPath", "/ws/db"]));
    }

    #[tokio::test]
    async fn test_run_error_is_not_masked_by_cleanup_failure() {
        let engine = succeeding_engine()
            .with_run(vec![RunEvent::Error { message: "connection refused".into() }])
            .with_delete(Err(CliError::remote_status(500, "engine down")));
        let (console, _, err) = captured();

        let result = execute(
            &engine,
            &context(Mode::Local),
            &console,
            &["prepare:psql", "--image", "pg16", "run:psql"],
        )
        .await;

        assert!(matches!(result, Err(CliError::Remote { status: None, .. })));
        assert!(err.contents().contains("warning: cleanup of instance inst-1 failed"));
    }

    #[tokio::test]
    async fn test_standalone_prepare_prints_result_and_keeps_instance() {
        let engine = succeeding_engine();
        let (console, out, _) = captured();

        let code = execute(
            &engine,
            &context(Mode::Local),
            &console,
            &["prepare:psql", "--image", "pg16", "-f", "-"],
        )
        .await
        .unwrap();

        assert_eq!(code, 0);
        assert!(out.contents().contains("instance_id: inst-1"));
        assert_eq!(engine.calls(), vec!["submit", "events"]);
        let submitted = &engine.submitted()[0];
        assert_eq!(submitted.args, strings(&["-f", "-"]));
        assert_eq!(submitted.stdin.as_deref(), Some("select 42;\n"));
        assert_eq!(submitted.work_dir.as_deref(), Some("/ws"));
    }

    #[tokio::test]
    async fn test_no_watch_prints_follow_up() {
        let engine = FakeEngine::new();
        let (console, out, _) = captured();

        let code = execute(
            &engine,
            &context(Mode::Local),
            &console,
            &["prepare:psql", "--image", "pg16", "--no-watch"],
        )
        .await
        .unwrap();

        assert_eq!(code, 0);
        assert_eq!(engine.calls(), vec!["submit"]);
        assert!(out.contents().contains("sqlrs watch job-1"));
    }

    #[tokio::test]
    async fn test_detached_prepare_skips_run_without_failing() {
        let engine = FakeEngine::new()
            .with_events(EventScript::Hang(vec![crate::testing::status_event(JobStatus::Running)]));
        let mut ctx = context(Mode::Local);
        ctx.watch_timeout = Some(Duration::from_millis(30));
        let (console, out, _) = captured();

        let code = execute(&engine, &ctx, &console, &["prepare:psql", "--image", "pg16", "run:psql"])
            .await
            .unwrap();

        assert_eq!(code, 0);
        assert_eq!(engine.count("run"), 0);
        assert!(out.contents().contains("events: http://engine/v1/prepare-jobs/job-1/events"));
    }

    #[tokio::test]
    async fn test_job_failure_aborts_before_run() {
        let engine = FakeEngine::new().with_polls(vec![job(JobStatus::Failed)]);
        let (console, _, _) = captured();

        let err = execute(
            &engine,
            &context(Mode::Local),
            &console,
            &["prepare:psql", "--image", "pg16", "run:psql"],
        )
        .await
        .unwrap_err();

        assert!(matches!(err, CliError::JobFailed { .. }));
        assert_eq!(engine.count("run"), 0);
        assert!(engine.calls().iter().all(|c| !c.starts_with("delete")));
    }

    #[tokio::test]
    async fn test_standalone_run_requires_instance() {
        let engine = FakeEngine::new();
        let (console, _, _) = captured();
        let err = execute(&engine, &context(Mode::Local), &console, &["run:psql", "-c", "select 1"])
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::Usage(_)));

        let code = execute(
            &engine,
            &context(Mode::Local),
            &console,
            &["run:psql", "--instance", "inst-7", "-c", "select 1"],
        )
        .await
        .unwrap();
        assert_eq!(code, 0);
        assert_eq!(engine.runs()[0].instance_ref, "inst-7");
        assert!(engine.calls().iter().all(|c| !c.starts_with("delete")));
    }

    #[tokio::test]
    async fn test_remote_mode_sends_workspace_relative_paths() {
        let engine = succeeding_engine();
        let (console, _, _) = captured();
        let ctx = context(Mode::Remote);
        let root = ctx.workspace_root.clone().unwrap();
        let relativize = move |p: &str| -> Result<String, CliError> {
            Ok(crate::args::relativize_to_root(&root, p))
        };
        let stdin = FixedStdin("");
        let executor = PipelineExecutor::new(&engine, &ctx, &console, &stdin, Some(&relativize));

        let steps =
            parse_steps(&strings(&["prepare:psql", "--image", "pg16", "-f", "sql/init.sql"])).unwrap();
        executor.execute(steps).await.unwrap();

        let submitted = &engine.submitted()[0];
        assert_eq!(submitted.args, strings(&["-f", "sql/init.sql"]));
        assert_eq!(submitted.work_dir.as_deref(), Some("."));
    }
}
