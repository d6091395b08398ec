//! PostgreSQL store tests.
//!
//! Run with `DATABASE_URL=postgres://... cargo test -p jobloom-infra -- --ignored`.

use std::sync::Arc;

use serde_json::json;

use jobloom_infra::jobs::{
    JobConsumer, JobHistoryRepository, JobProducer, JobRepository, JobTypeRegistry,
    PostgresJobStore,
};
use jobloom_jobs::{HandlingResult, JobStatus, JobTypeMode, NewJobType};

fn connect(runtime: &tokio::runtime::Runtime) -> Arc<PostgresJobStore> {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let store = PostgresJobStore::connect(&url, 4, runtime.handle().clone()).unwrap();
    store.migrate_blocking().unwrap();
    Arc::new(store)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

fn unique_name(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::now_v7())
}

#[test]
#[ignore = "requires DATABASE_URL"]
fn retry_scenario_against_postgres() {
    let runtime = runtime();
    let store = connect(&runtime);

    let job_type = JobTypeRegistry::new(store.clone())
        .try_add_job_type(
            NewJobType::new(unique_name("retry"), JobTypeMode::SingleShot, "builtin.noop")
                .max_retries(2),
        )
        .unwrap();
    let producer = JobProducer::new(store.clone());
    let consumer = JobConsumer::new(store.clone());

    let job = producer
        .try_add_job(&job_type, json!({"n": 1}), json!({}))
        .unwrap();
    let candidates = consumer.get_jobs_for_processing_by_type(&job_type, 10).unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].job_id, job.id);

    for expected in [(JobStatus::Open, 1), (JobStatus::Failed, 2)] {
        let claimed = consumer
            .get_job_for_handling(job.id, &job_type)
            .unwrap()
            .unwrap();
        let after = consumer
            .process_job_handling_result(&claimed, &job_type, &HandlingResult::failed("nope"))
            .unwrap();
        assert_eq!((after.status, after.attempt), expected);
    }

    assert!(consumer.get_job_for_handling(job.id, &job_type).unwrap().is_none());
    assert_eq!(store.history_for_job(job.id).unwrap().len(), 5);
}

#[test]
#[ignore = "requires DATABASE_URL"]
fn concurrent_claims_on_postgres_have_one_winner() {
    let runtime = runtime();
    let store = connect(&runtime);

    let job_type = JobTypeRegistry::new(store.clone())
        .try_add_job_type(NewJobType::new(unique_name("race"), JobTypeMode::SingleShot, "builtin.noop"))
        .unwrap();
    let job = JobProducer::new(store.clone())
        .try_add_job(&job_type, json!({}), json!({}))
        .unwrap();

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let store = store.clone();
            let (job_id, type_id, max) = (job.id, job_type.id, job_type.max_retries);
            std::thread::spawn(move || store.claim_job(job_id, type_id, max).unwrap().is_some())
        })
        .collect();
    let winners = handles
        .into_iter()
        .filter_map(|h| h.join().ok())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);

    let claimed = store.find_job(job.id).unwrap().unwrap();
    let reset = JobConsumer::new(store.clone())
        .reset_job_to_open_by_graceful_shutdown(&claimed)
        .unwrap()
        .unwrap();
    assert_eq!((reset.status, reset.attempt), (JobStatus::Open, 0));
}

#[test]
#[ignore = "requires DATABASE_URL"]
fn duplicate_job_type_name_is_rejected() {
    let runtime = runtime();
    let store = connect(&runtime);
    let registry = JobTypeRegistry::new(store);
    let name = unique_name("dup");

    registry
        .try_add_job_type(NewJobType::new(name.clone(), JobTypeMode::SingleShot, "x"))
        .unwrap();
    assert!(registry
        .add_job_type(NewJobType::new(name.clone(), JobTypeMode::SingleShot, "x"))
        .is_none());
    assert_eq!(registry.resolve(&name).unwrap().name, name);
}
