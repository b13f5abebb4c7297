//! Stuck-job sweep: lost chunk work is re-requested at a bumped priority and
//! lost pack requests are reissued.

use pepflow::runtime::SweepReport;
use pepflow::*;
use pepflow_testkit::{TestPipeline, sample_submission, timed_chunk};

const NOW: f64 = 1_700_010_000.0;

async fn job_in(pipeline: &TestPipeline, status: JobStatus, started_pack_at: f64) -> Job {
    let mut job = pipeline
        .dispatcher
        .lifecycle()
        .create(sample_submission(pipeline.datafile.id, pipeline.parameter_file_id, 2))
        .await
        .unwrap();
    job.advance(status).unwrap();
    job.started_pack_at = started_pack_at;
    pipeline.store.put_job(&job);
    job
}

#[tokio::test]
async fn stuck_chunks_are_resent_with_bumped_priority() {
    let pipeline = TestPipeline::new(1).unwrap();
    let job = job_in(&pipeline, JobStatus::Processing, 0.0).await;
    pipeline.store.put_chunk(timed_chunk(job.id, 0, 3, NOW - 2000.0, NOW - 1900.0));
    pipeline.store.put_chunk(timed_chunk(job.id, 1, 3, NOW - 2000.0, 0.0));
    pipeline.store.put_chunk(timed_chunk(job.id, 2, 3, 0.0, 0.0));

    let report = pipeline.dispatcher.sweep_stuck_jobs(NOW).await.unwrap();

    assert_eq!(report.stuck_chunks, 1);
    assert_eq!(report.chunks_resent, 2);
    assert_eq!(pipeline.job(job.id).unwrap().priority, 50);

    let resent = pipeline.queue.sent_of(MessageType::Process);
    assert_eq!(resent.len(), 2);
    assert!(resent.iter().all(|record| record.priority == 50));
}

#[tokio::test]
async fn recent_finish_is_not_stuck() {
    let pipeline = TestPipeline::new(1).unwrap();
    let job = job_in(&pipeline, JobStatus::Processing, 0.0).await;
    pipeline.store.put_chunk(timed_chunk(job.id, 0, 2, NOW - 100.0, NOW - 60.0));
    pipeline.store.put_chunk(timed_chunk(job.id, 1, 2, NOW - 100.0, 0.0));

    let report = pipeline.dispatcher.sweep_stuck_jobs(NOW).await.unwrap();

    assert_eq!(
        report,
        SweepReport {
            examined: 1,
            ..SweepReport::default()
        }
    );
    assert_eq!(pipeline.job(job.id).unwrap().priority, job.priority);
}

#[tokio::test]
async fn nothing_finished_is_not_stuck() {
    let pipeline = TestPipeline::new(1).unwrap();
    let job = job_in(&pipeline, JobStatus::Processing, 0.0).await;
    pipeline.store.put_chunk(timed_chunk(job.id, 0, 2, NOW - 5000.0, 0.0));
    pipeline.store.put_chunk(timed_chunk(job.id, 1, 2, 0.0, 0.0));

    let report = pipeline.dispatcher.sweep_stuck_jobs(NOW).await.unwrap();

    assert_eq!(report.stuck_chunks, 0);
    assert!(pipeline.queue.sent_of(MessageType::Process).is_empty());
}

#[tokio::test]
async fn stuck_packing_reissues_pack_and_keeps_status() {
    let pipeline = TestPipeline::new(1).unwrap();
    let job = job_in(&pipeline, JobStatus::Packing, NOW - 1500.0).await;
    pipeline.store.put_chunk(timed_chunk(job.id, 0, 1, NOW - 3000.0, NOW - 2900.0));

    let report = pipeline.dispatcher.sweep_stuck_jobs(NOW).await.unwrap();

    assert_eq!(report.stuck_packing, 1);
    assert_eq!(report.packs_reissued, 1);
    assert_eq!(pipeline.queue.sent_of(MessageType::Pack).len(), 1);

    let swept = pipeline.job(job.id).unwrap();
    assert_eq!(swept.status, JobStatus::Packing);
    assert!(swept.started_pack_at > NOW - 1500.0);
}

#[tokio::test]
async fn manifest_failure_defers_pack_without_change() {
    let pipeline = TestPipeline::new(1).unwrap();
    let job = job_in(&pipeline, JobStatus::RequestedPacking, NOW - 1500.0).await;
    pipeline.store.put_chunk(timed_chunk(job.id, 0, 1, NOW - 3000.0, NOW - 2900.0));
    pipeline.objects.fail_puts_under(job.hash_key().as_str());

    let report = pipeline.dispatcher.sweep_stuck_jobs(NOW).await.unwrap();

    assert_eq!(report.stuck_packing, 1);
    assert_eq!(report.packs_reissued, 0);
    assert_eq!(report.errors, 0);
    assert!(pipeline.queue.sent_of(MessageType::Pack).is_empty());

    let unchanged = pipeline.job(job.id).unwrap();
    assert_eq!(unchanged.status, JobStatus::RequestedPacking);
    assert_eq!(unchanged.started_pack_at, NOW - 1500.0);

    pipeline.objects.clear_failures();
    let retried = pipeline.dispatcher.sweep_stuck_jobs(NOW).await.unwrap();
    assert_eq!(retried.packs_reissued, 1);
    assert_eq!(pipeline.queue.sent_node().len(), 1);
}

#[tokio::test]
async fn failing_job_does_not_stop_the_sweep() {
    let pipeline = TestPipeline::new(1).unwrap();
    let broken = job_in(&pipeline, JobStatus::Processing, 0.0).await;
    pipeline.store.put_chunk(timed_chunk(broken.id, 0, 2, NOW - 3000.0, NOW - 2900.0));
    pipeline.store.put_chunk(timed_chunk(broken.id, 1, 2, NOW - 3000.0, 0.0));
    let packing = job_in(&pipeline, JobStatus::Packing, NOW - 1500.0).await;
    pipeline.store.fail_job_saves(true);

    let report = pipeline.dispatcher.sweep_stuck_jobs(NOW).await.unwrap();

    assert_eq!(report.examined, 2);
    assert_eq!(report.errors, 2);
    pipeline.reporter.assert_report_count_eq(2);
    assert_eq!(pipeline.job(packing.id).unwrap().status, JobStatus::Packing);
}

#[tokio::test]
async fn complete_jobs_are_not_examined() {
    let pipeline = TestPipeline::new(1).unwrap();
    job_in(&pipeline, JobStatus::Complete, NOW - 5000.0).await;

    let report = pipeline.dispatcher.sweep_stuck_jobs(NOW).await.unwrap();

    assert_eq!(report, SweepReport::default());
}
