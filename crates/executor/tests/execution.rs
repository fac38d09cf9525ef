//! Integration tests for the GPU executor against a real database and a
//! scripted GPU host.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use cosmos_core::command::RemoteCommand;
use cosmos_core::descriptor::InvocationSpec;
use cosmos_core::exit::FailureKind;
use cosmos_core::outputs::OutputStatus;
use cosmos_db::models::prompt::{CreatePrompt, Prompt};
use cosmos_db::models::run::{CreateRun, Run};
use cosmos_db::models::status::RunStatus;
use cosmos_db::repositories::{ProgressRepo, PromptRepo, RunRepo};
use cosmos_executor::mock::{test_config, Behavior, FakeGateway, KillRecord};
use cosmos_executor::{GpuExecutor, Termination};
use cosmos_remote::{CommandOutput, GatewayError, RemoteGateway};
use serde_json::json;
use sqlx::PgPool;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Harness {
    _root: TempDir,
    media: std::path::PathBuf,
    gateway: Arc<FakeGateway>,
    executor: GpuExecutor,
}

fn harness(pool: &PgPool) -> Harness {
    harness_with(pool, |_| {})
}

fn harness_with(pool: &PgPool, tweak: impl FnOnce(&mut cosmos_executor::ExecutorConfig)) -> Harness {
    let root = tempfile::tempdir().unwrap();
    let media = root.path().join("media");
    std::fs::create_dir_all(&media).unwrap();
    let mut config = test_config(root.path());
    tweak(&mut config);
    let gateway = Arc::new(FakeGateway::new());
    let executor = GpuExecutor::new(pool.clone(), gateway.clone(), config);
    Harness {
        _root: root,
        media,
        gateway,
        executor,
    }
}

async fn seed_prompt(pool: &PgPool, media: &Path, text: &str) -> Prompt {
    let video = media.join(format!("{}.mp4", text.replace(' ', "_")));
    std::fs::write(&video, b"source video").unwrap();
    PromptRepo::create(
        pool,
        &CreatePrompt {
            description: text.to_string(),
            negative_prompt: Some("blurry".to_string()),
            inputs: json!({"video": video.display().to_string()}),
            parameters: json!({}),
            parent_prompt_id: None,
        },
    )
    .await
    .unwrap()
}

async fn seed_inference_run(pool: &PgPool, prompt_id: i64, config: serde_json::Value) -> i64 {
    let parsed = cosmos_core::execution_config::ExecutionConfig::parse(
        cosmos_core::model_type::ModelType::Inference,
        &config,
    )
    .unwrap();
    RunRepo::create(
        pool,
        &CreateRun {
            prompt_id,
            model_type: "inference".to_string(),
            execution_config: parsed.to_value(),
            batch_key: parsed.batch_key(),
            retry_of_run_id: None,
        },
    )
    .await
    .unwrap()
    .id
}

async fn claim(pool: &PgPool, max_batch: usize) -> Vec<Run> {
    let mut conn = pool.acquire().await.unwrap();
    RunRepo::claim_next(&mut conn, max_batch).await.unwrap()
}

async fn reload(pool: &PgPool, run_id: i64) -> Run {
    RunRepo::find_by_id(pool, run_id).await.unwrap().unwrap()
}

// ---------------------------------------------------------------------------
// Single runs
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_single_run_completes_with_outputs(pool: PgPool) {
    let h = harness(&pool);
    let prompt = seed_prompt(&pool, &h.media, "a robot arm").await;
    let run_id = seed_inference_run(&pool, prompt.id, json!({"num_steps": 20})).await;
    let runs = claim(&pool, 8).await;

    let outcome = h.executor.execute_single(&runs[0], &prompt).await.unwrap();
    assert_eq!(outcome.run_id, run_id);
    assert_eq!(outcome.status, RunStatus::Completed);

    let run = reload(&pool, run_id).await;
    assert_eq!(run.status(), Some(RunStatus::Completed));
    let outputs = run.typed_outputs().expect("outputs document");
    let primary = outputs.primary_output_path().expect("primary output");
    assert!(Path::new(primary).is_file());
    assert!(Path::new(outputs.log_path()).is_file());
    assert_eq!(outputs.summary().exit_code, Some(0));

    // The contract the container saw.
    let invocations = h.gateway.invocations();
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].name, format!("cosmos-run-{run_id}"));
    assert_matches!(invocations[0].spec, InvocationSpec::Inference { num_steps: 20, .. });
    let record = &invocations[0].records[0];
    assert_eq!(record.prompt, "a robot arm");
    assert_eq!(record.negative_prompt.as_deref(), Some("blurry"));
    assert!(record
        .input_video_path
        .as_deref()
        .unwrap()
        .ends_with(&format!("media/run_{run_id}/video_a_robot_arm.mp4")));

    // Progress went through every stage.
    let stages: Vec<String> = ProgressRepo::list_for_run(&pool, run_id)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.stage)
        .collect();
    assert!(stages.contains(&"uploading".to_string()));
    assert!(stages.contains(&"executing".to_string()));
    assert!(stages.contains(&"downloading".to_string()));

    // Remote and staging directories are cleaned up.
    let remote_inputs = Path::new(&h.executor.config().remote_root)
        .join("inputs")
        .join(format!("cosmos-run-{run_id}"));
    assert!(!remote_inputs.exists());
    assert!(h.gateway.live_containers().is_empty());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_nonzero_exit_fails_with_synthesized_log(pool: PgPool) {
    let h = harness(&pool);
    let prompt = seed_prompt(&pool, &h.media, "crash").await;
    let run_id = seed_inference_run(&pool, prompt.id, json!({})).await;
    let runs = claim(&pool, 8).await;
    h.gateway.push_behavior(Behavior::Fail {
        exit_code: 1,
        stderr: "RuntimeError: CUDA out of memory".to_string(),
    });

    let outcome = h.executor.execute_single(&runs[0], &prompt).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.failure_kind, Some(FailureKind::Execution));

    let run = reload(&pool, run_id).await;
    assert_eq!(run.status(), Some(RunStatus::Failed));
    assert!(run.error_message.as_deref().unwrap().contains("exited with code 1"));
    let details = run.error_details.unwrap();
    assert_eq!(details["kind"], "execution");
    assert_eq!(details["exit_code"], 1);
    assert!(details["stderr_tail"].as_str().unwrap().contains("CUDA out of memory"));

    let outputs = run.outputs.as_ref().and_then(cosmos_core::outputs::RunOutputs::from_value).unwrap();
    assert_eq!(outputs.summary().status, OutputStatus::Failed);
    assert!(outputs.primary_output_path().is_none());
    let log = std::fs::read_to_string(outputs.log_path()).unwrap();
    assert!(log.contains("CUDA out of memory"));
    assert!(log.contains(&format!("cosmos-run-{run_id}")));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_error_marker_fails_despite_zero_exit(pool: PgPool) {
    let h = harness(&pool);
    let prompt = seed_prompt(&pool, &h.media, "marker").await;
    let run_id = seed_inference_run(&pool, prompt.id, json!({})).await;
    let runs = claim(&pool, 8).await;
    h.gateway.push_behavior(Behavior::ErrorMarker {
        message: "guardrail blocked prompt".to_string(),
    });

    h.executor.execute_single(&runs[0], &prompt).await.unwrap();

    let run = reload(&pool, run_id).await;
    assert_eq!(run.status(), Some(RunStatus::Failed));
    assert!(run.error_message.as_deref().unwrap().contains("guardrail blocked prompt"));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_upload_failure_is_a_transport_failure(pool: PgPool) {
    let h = harness(&pool);
    let prompt = seed_prompt(&pool, &h.media, "upload").await;
    let run_id = seed_inference_run(&pool, prompt.id, json!({})).await;
    let runs = claim(&pool, 8).await;
    h.gateway.set_fail_uploads(true);

    let outcome = h.executor.execute_single(&runs[0], &prompt).await.unwrap();
    assert_eq!(outcome.failure_kind, Some(FailureKind::Transport));
    assert!(h.gateway.invocations().is_empty(), "container must not start");

    let run = reload(&pool, run_id).await;
    assert_eq!(run.status(), Some(RunStatus::Failed));
    let outputs = run.typed_outputs().unwrap();
    assert!(Path::new(outputs.log_path()).is_file());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_missing_media_fails_before_invocation(pool: PgPool) {
    let h = harness(&pool);
    let prompt = seed_prompt(&pool, &h.media, "vanishing").await;
    let run_id = seed_inference_run(&pool, prompt.id, json!({})).await;
    std::fs::remove_file(h.media.join("vanishing.mp4")).unwrap();
    let runs = claim(&pool, 8).await;

    h.executor.execute_single(&runs[0], &prompt).await.unwrap();

    let run = reload(&pool, run_id).await;
    assert_eq!(run.status(), Some(RunStatus::Failed));
    assert!(run.error_message.as_deref().unwrap().contains("does not exist"));
    assert!(h.gateway.invocations().is_empty());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_invocation_timeout_kills_container(pool: PgPool) {
    let h = harness_with(&pool, |c| c.invocation_timeout = Duration::from_millis(300));
    let prompt = seed_prompt(&pool, &h.media, "slow").await;
    let run_id = seed_inference_run(&pool, prompt.id, json!({})).await;
    let runs = claim(&pool, 8).await;
    h.gateway.push_behavior(Behavior::HangUntilKilled);

    let outcome = h.executor.execute_single(&runs[0], &prompt).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.failure_kind, Some(FailureKind::Timeout));
    assert!(h.gateway.kills().contains(&KillRecord {
        name: format!("cosmos-run-{run_id}"),
        signal: None,
    }));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_cancelled_before_start_never_invokes(pool: PgPool) {
    let h = harness(&pool);
    let prompt = seed_prompt(&pool, &h.media, "early cancel").await;
    let run_id = seed_inference_run(&pool, prompt.id, json!({})).await;
    let runs = claim(&pool, 8).await;
    assert!(RunRepo::request_cancel(&pool, run_id).await.unwrap());

    let outcome = h.executor.execute_single(&runs[0], &prompt).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Cancelled);
    assert!(h.gateway.invocations().is_empty());

    let run = reload(&pool, run_id).await;
    assert_eq!(run.status(), Some(RunStatus::Cancelled));
    assert!(Path::new(run.typed_outputs().unwrap().log_path()).is_file());
}

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_batch_yields_distinct_outputs_in_claim_order(pool: PgPool) {
    let h = harness(&pool);
    let mut prompts = Vec::new();
    let mut ids = Vec::new();
    for (i, text) in ["first", "second", "third"].iter().enumerate() {
        let prompt = seed_prompt(&pool, &h.media, text).await;
        let weight = 0.2 + i as f64 * 0.1;
        ids.push(seed_inference_run(&pool, prompt.id, json!({"weights": {"edge": weight}})).await);
        prompts.push(prompt);
    }
    let runs = claim(&pool, 8).await;
    assert_eq!(runs.len(), 3);
    let batch_id = runs[0].batch_id.unwrap();

    let outcomes = h.executor.execute_batch(&runs, &prompts).await.unwrap();
    assert!(outcomes.iter().all(|o| o.status == RunStatus::Completed));

    let invocation = &h.gateway.invocations()[0];
    assert_eq!(invocation.name, format!("cosmos-batch-{batch_id}"));
    let record_ids: Vec<i64> = invocation.records.iter().map(|r| r.run_id).collect();
    assert_eq!(record_ids, ids);

    let mut primaries = Vec::new();
    for (index, run_id) in ids.iter().enumerate() {
        let run = reload(&pool, *run_id).await;
        assert_eq!(run.status(), Some(RunStatus::Completed));
        let outputs = run.typed_outputs().unwrap();
        let primary = outputs.primary_output_path().unwrap().to_string();
        assert!(Path::new(&primary).is_file());
        assert!(primary.contains(&format!("run_{run_id}")));
        assert!(primary.ends_with(&format!("output_{index}.mp4")));
        match outputs {
            cosmos_core::outputs::RunOutputs::Inference(o) => assert_eq!(o.batch_index, Some(index)),
            other => panic!("unexpected outputs {other:?}"),
        }
        primaries.push(primary);
    }
    primaries.sort();
    primaries.dedup();
    assert_eq!(primaries.len(), 3);
}

/// Requests cancellation of one run while the first upload is in flight.
struct CancelDuringUpload {
    inner: Arc<FakeGateway>,
    pool: PgPool,
    target: i64,
    fired: AtomicBool,
}

#[async_trait]
impl RemoteGateway for CancelDuringUpload {
    fn describe(&self) -> String {
        self.inner.describe()
    }

    async fn execute_command(
        &self,
        cmd: &RemoteCommand,
        timeout: Duration,
    ) -> Result<CommandOutput, GatewayError> {
        self.inner.execute_command(cmd, timeout).await
    }

    async fn upload_path(
        &self,
        local: &Path,
        remote: &str,
        timeout: Duration,
    ) -> Result<(), GatewayError> {
        if !self.fired.swap(true, Ordering::SeqCst) {
            RunRepo::request_cancel(&self.pool, self.target).await.unwrap();
        }
        self.inner.upload_path(local, remote, timeout).await
    }

    async fn download_path(
        &self,
        remote: &str,
        local: &Path,
        timeout: Duration,
    ) -> Result<(), GatewayError> {
        self.inner.download_path(remote, local, timeout).await
    }
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_cancel_during_upload_drops_only_that_batch_member(pool: PgPool) {
    let root = tempfile::tempdir().unwrap();
    let media = root.path().join("media");
    std::fs::create_dir_all(&media).unwrap();

    let mut prompts = Vec::new();
    let mut ids = Vec::new();
    for (i, text) in ["kept", "dropped"].iter().enumerate() {
        let prompt = seed_prompt(&pool, &media, text).await;
        let weight = 0.4 + i as f64 * 0.1;
        ids.push(seed_inference_run(&pool, prompt.id, json!({"weights": {"edge": weight}})).await);
        prompts.push(prompt);
    }
    let runs = claim(&pool, 8).await;
    assert_eq!(runs.len(), 2);

    let fake = Arc::new(FakeGateway::new());
    let gateway = Arc::new(CancelDuringUpload {
        inner: fake.clone(),
        pool: pool.clone(),
        target: ids[1],
        fired: AtomicBool::new(false),
    });
    let executor = GpuExecutor::new(pool.clone(), gateway, test_config(root.path()));

    let outcomes = executor.execute_batch(&runs, &prompts).await.unwrap();
    let summary: Vec<(i64, RunStatus)> = outcomes.iter().map(|o| (o.run_id, o.status)).collect();
    assert_eq!(
        summary,
        vec![(ids[0], RunStatus::Completed), (ids[1], RunStatus::Cancelled)]
    );

    // Only the surviving run reached the container.
    let invocations = fake.invocations();
    assert_eq!(invocations.len(), 1);
    let record_ids: Vec<i64> = invocations[0].records.iter().map(|r| r.run_id).collect();
    assert_eq!(record_ids, vec![ids[0]]);

    let kept = reload(&pool, ids[0]).await;
    assert_eq!(kept.status(), Some(RunStatus::Completed));
    assert!(Path::new(kept.typed_outputs().unwrap().primary_output_path().unwrap()).is_file());

    let dropped = reload(&pool, ids[1]).await;
    assert_eq!(dropped.status(), Some(RunStatus::Cancelled));
    assert!(Path::new(dropped.typed_outputs().unwrap().log_path()).is_file());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_count_mismatch_fails_only_unmatched_runs(pool: PgPool) {
    let h = harness(&pool);
    let prompt = seed_prompt(&pool, &h.media, "shared").await;
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(seed_inference_run(&pool, prompt.id, json!({})).await);
    }
    let runs = claim(&pool, 8).await;
    h.gateway.push_behavior(Behavior::SucceedPartially { produce: vec![0, 2] });

    let outcomes = h
        .executor
        .execute_batch(&runs, std::slice::from_ref(&prompt))
        .await
        .unwrap();
    let statuses: Vec<RunStatus> = outcomes.iter().map(|o| o.status).collect();
    assert_eq!(
        statuses,
        vec![RunStatus::Completed, RunStatus::Failed, RunStatus::Completed]
    );
    assert_eq!(outcomes[1].failure_kind, Some(FailureKind::Reconciliation));

    let failed = reload(&pool, ids[1]).await;
    assert!(failed.error_message.as_deref().unwrap().contains("output not found"));
    let outputs = failed.typed_outputs().unwrap();
    assert!(outputs.primary_output_path().is_none());
    assert!(Path::new(outputs.log_path()).is_file());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_terminate_cancels_flagged_run_and_fails_sibling(pool: PgPool) {
    let h = harness(&pool);
    let prompt = seed_prompt(&pool, &h.media, "long batch").await;
    let cancelled_id = seed_inference_run(&pool, prompt.id, json!({})).await;
    let sibling_id = seed_inference_run(&pool, prompt.id, json!({})).await;
    let runs = claim(&pool, 8).await;
    let name = format!("cosmos-batch-{}", runs[0].batch_id.unwrap());
    h.gateway.push_behavior(Behavior::HangUntilKilled);

    let executor = h.executor.clone();
    let prompts = vec![prompt.clone()];
    let task = tokio::spawn(async move { executor.execute_batch(&runs, &prompts).await });

    assert!(h.gateway.wait_until_live(&name, Duration::from_secs(5)).await);
    RunRepo::request_cancel(&pool, cancelled_id).await.unwrap();
    assert_eq!(h.executor.terminate(&name).await.unwrap(), Termination::Graceful);

    let outcomes = task.await.unwrap().unwrap();
    assert_eq!(outcomes[0].status, RunStatus::Cancelled);
    assert_eq!(outcomes[1].status, RunStatus::Failed);

    assert_eq!(reload(&pool, cancelled_id).await.status(), Some(RunStatus::Cancelled));
    let sibling = reload(&pool, sibling_id).await;
    assert_eq!(sibling.status(), Some(RunStatus::Failed));
    assert!(sibling.error_message.as_deref().unwrap().contains("terminated by a signal"));
}

// ---------------------------------------------------------------------------
// Probing and termination
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_active_invocations_sees_foreign_containers(pool: PgPool) {
    let h = harness(&pool);
    assert!(h.executor.active_invocations().await.unwrap().is_empty());

    h.gateway.add_external_container("cosmos-run-99");
    assert_eq!(
        h.executor.active_invocations().await.unwrap(),
        vec!["cosmos-run-99".to_string()]
    );
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_terminate_escalates_to_kill(pool: PgPool) {
    let h = harness(&pool);
    assert_eq!(
        h.executor.terminate("cosmos-run-1").await.unwrap(),
        Termination::NotRunning
    );

    h.gateway.add_external_container("cosmos-run-2");
    h.gateway.set_ignore_term(false);
    assert_eq!(
        h.executor.terminate("cosmos-run-2").await.unwrap(),
        Termination::Graceful
    );

    let prompt = seed_prompt(&pool, &h.media, "stubborn").await;
    let run_id = seed_inference_run(&pool, prompt.id, json!({})).await;
    let runs = claim(&pool, 8).await;
    let name = format!("cosmos-run-{run_id}");
    h.gateway.set_ignore_term(true);
    h.gateway.push_behavior(Behavior::HangUntilKilled);

    let executor = h.executor.clone();
    let task = tokio::spawn(async move { executor.execute_single(&runs[0], &prompt).await });
    assert!(h.gateway.wait_until_live(&name, Duration::from_secs(5)).await);

    assert_eq!(h.executor.terminate(&name).await.unwrap(), Termination::Forced);
    let signals: Vec<Option<String>> = h
        .gateway
        .kills()
        .into_iter()
        .filter(|k| k.name == name)
        .map(|k| k.signal)
        .collect();
    assert_eq!(signals, vec![Some("TERM".to_string()), None]);

    // Killed without a cancel request: failed, not cancelled.
    let outcome = task.await.unwrap().unwrap();
    assert_eq!(outcome.status, RunStatus::Failed);
}

// ---------------------------------------------------------------------------
// Upscale
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_upscale_uses_source_run_output(pool: PgPool) {
    let h = harness(&pool);
    let prompt = seed_prompt(&pool, &h.media, "upscale me").await;
    let source_id = seed_inference_run(&pool, prompt.id, json!({})).await;
    let runs = claim(&pool, 8).await;
    h.executor.execute_single(&runs[0], &prompt).await.unwrap();

    let upscale_id = RunRepo::create(
        &pool,
        &CreateRun {
            prompt_id: prompt.id,
            model_type: "upscale".to_string(),
            execution_config: json!({"source_run_id": source_id, "control_weight": 0.5}),
            batch_key: None,
            retry_of_run_id: None,
        },
    )
    .await
    .unwrap()
    .id;
    let runs = claim(&pool, 8).await;
    assert_eq!(runs.len(), 1);

    let outcome = h.executor.execute_single(&runs[0], &prompt).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Completed);

    let invocation = h.gateway.invocations().pop().unwrap();
    assert_matches!(invocation.spec, InvocationSpec::Upscale { .. });
    assert!(invocation.records[0]
        .input_video_path
        .as_deref()
        .unwrap()
        .contains(&format!("media/run_{upscale_id}/source_")));

    match reload(&pool, upscale_id).await.typed_outputs().unwrap() {
        cosmos_core::outputs::RunOutputs::Upscale(o) => assert_eq!(o.source_run_id, source_id),
        other => panic!("unexpected outputs {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Orphans
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_recover_orphan_fails_or_cancels(pool: PgPool) {
    let h = harness(&pool);
    let prompt = seed_prompt(&pool, &h.media, "orphan").await;
    let failed_id = seed_inference_run(&pool, prompt.id, json!({"seed": 1})).await;
    let cancelled_id = seed_inference_run(&pool, prompt.id, json!({"seed": 2})).await;
    let first = claim(&pool, 8).await.remove(0);
    let second = claim(&pool, 8).await.remove(0);
    RunRepo::request_cancel(&pool, cancelled_id).await.unwrap();

    let outcome = h.executor.recover_orphan(&first).await.unwrap();
    assert_eq!(outcome.failure_kind, Some(FailureKind::Orphaned));
    let outcome = h.executor.recover_orphan(&second).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Cancelled);

    let failed = reload(&pool, failed_id).await;
    assert_eq!(failed.status(), Some(RunStatus::Failed));
    assert_eq!(failed.error_details.as_ref().unwrap()["kind"], "orphaned");
    assert!(Path::new(failed.typed_outputs().unwrap().log_path()).is_file());
    assert_eq!(reload(&pool, cancelled_id).await.status(), Some(RunStatus::Cancelled));
    assert!(h.gateway.invocations().is_empty());
}
