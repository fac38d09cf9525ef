//! The worker loop drains the queue on its own timer.

use std::sync::Arc;
use std::time::Duration;

use cosmos_db::models::status::RunStatus;
use cosmos_executor::mock::{test_config, FakeGateway};
use cosmos_executor::GpuExecutor;
use cosmos_orchestrator::{NewPrompt, NewRun, Orchestrator, TickOutcome};
use cosmos_worker::TickLoop;
use serde_json::json;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

async fn setup(pool: &PgPool, root: &std::path::Path) -> (Orchestrator, Vec<i64>) {
    let gateway = Arc::new(FakeGateway::new());
    let executor = GpuExecutor::new(pool.clone(), gateway, test_config(root));
    let orchestrator = Orchestrator::with_executor(pool.clone(), executor, 8);

    let video = root.join("clip.mp4");
    std::fs::write(&video, b"source").unwrap();
    let prompt = orchestrator
        .create_prompt(NewPrompt {
            description: "a robot arm".to_string(),
            inputs: json!({"video": video.display().to_string()}),
            ..Default::default()
        })
        .await
        .unwrap();

    let mut ids = Vec::new();
    for seed in [1, 2] {
        let run = orchestrator
            .create_run(NewRun {
                prompt_id: prompt.id,
                model_type: "inference".to_string(),
                execution_config: json!({"seed": seed}),
            })
            .await
            .unwrap();
        ids.push(run.id);
    }
    (orchestrator, ids)
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn tick_once_reports_the_outcome(pool: PgPool) {
    let root = tempfile::tempdir().unwrap();
    let (orchestrator, ids) = setup(&pool, root.path()).await;
    let worker = TickLoop::new(orchestrator, Duration::from_millis(10));

    let outcome = worker.tick_once().await;
    assert_eq!(
        outcome,
        Some(TickOutcome::Executed {
            run_ids: vec![ids[0]],
            statuses: vec![RunStatus::Completed],
        })
    );
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn loop_drains_the_queue_until_cancelled(pool: PgPool) {
    let root = tempfile::tempdir().unwrap();
    let (orchestrator, ids) = setup(&pool, root.path()).await;
    let worker = TickLoop::new(orchestrator.clone(), Duration::from_millis(10));

    let cancel = CancellationToken::new();
    let handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { worker.run(cancel).await })
    };

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let mut done = true;
        for id in &ids {
            if orchestrator.get_run(*id).await.unwrap().status != RunStatus::Completed {
                done = false;
            }
        }
        if done {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "queue was not drained");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker stops on cancel")
        .unwrap();
}
