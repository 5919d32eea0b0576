//! Task-engine subprocess body: accepts one job assignment at a time from
//! the job manager, drives the assigned [`Task`] over the ring wire, and
//! publishes its own `{STARTED, STATUS, DONE, FAIL, CANCELED, BOMB}` result
//! stream. Consecutive-failure tracking and the `BOMB` exit live here, not
//! in the job manager, since only the engine executes jobs one at a time.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use sentinelcam_types::{
    EngineEnvelope, FrameResult, JobId, JobRequest, RingCtrl, StatusPayload,
};
use sentinelcam_wire::pubsub::Publisher;
use sentinelcam_wire::reqrep::{serve, ReqClient};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::job_manager::{Ack, JobAssignment};
use crate::ring::RingBufferReader;
use crate::task::{build_task, TaskDescriptor};
use crate::wire::{RingReply, RingRequest};

pub struct EngineOptions {
    pub name: String,
    pub job_addr: SocketAddr,
    pub ring_addr: SocketAddr,
    pub result_addr: SocketAddr,
    pub failure_limit: u32,
    pub task_catalog: Arc<HashMap<String, TaskDescriptor>>,
}

pub async fn run(opts: EngineOptions) -> anyhow::Result<()> {
    let result_pub: Publisher<EngineEnvelope> = Publisher::new(256);
    let result_listener = TcpListener::bind(opts.result_addr).await?;
    let serving_pub = result_pub.clone();
    tokio::spawn(async move {
        serving_pub.serve(result_listener).await.ok();
    });

    let (tx, mut rx) = mpsc::channel::<JobAssignment>(1);
    let job_listener = TcpListener::bind(opts.job_addr).await?;
    tokio::spawn(async move {
        serve(job_listener, move |assignment: JobAssignment| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(assignment).await;
                Ack
            }
        })
        .await
        .ok();
    });

    let mut consecutive_failures: u32 = 0;
    while let Some(assignment) = rx.recv().await {
        result_pub.publish(
            "".to_string(),
            EngineEnvelope::Started {
                jobid: assignment.jobid,
            },
        );

        let outcome = run_job(&opts, assignment.jobid, &assignment.request, &result_pub).await;
        match outcome {
            Ok(image_count) => {
                consecutive_failures = 0;
                result_pub.publish(
                    "".to_string(),
                    EngineEnvelope::Done {
                        jobid: assignment.jobid,
                        image_count,
                    },
                );
            }
            Err(reason) => {
                consecutive_failures += 1;
                result_pub.publish(
                    "".to_string(),
                    EngineEnvelope::Fail {
                        jobid: assignment.jobid,
                        reason,
                    },
                );
                if consecutive_failures >= opts.failure_limit {
                    result_pub.publish(
                        "".to_string(),
                        EngineEnvelope::Bomb {
                            engine: opts.name.clone(),
                        },
                    );
                    tracing::error!(engine = %opts.name, "consecutive failure limit reached, exiting");
                    std::process::exit(1);
                }
            }
        }
    }
    Ok(())
}

fn ringctrl_for(opts: &EngineOptions, task_name: &str) -> Result<RingCtrl, String> {
    match opts.task_catalog.get(task_name).and_then(|d| d.ringctrl.as_deref()) {
        Some(s) => RingCtrl::try_from(s.to_string()).map_err(|e| e.to_string()),
        None => Ok(RingCtrl::Full),
    }
}

async fn run_job(
    opts: &EngineOptions,
    jobid: JobId,
    request: &JobRequest,
    result_pub: &Publisher<EngineEnvelope>,
) -> Result<u64, String> {
    let mut task = build_task(&request.task).map_err(|e| e.to_string())?;

    let Some(event_id) = request.event.clone() else {
        task.pipeline(None).map_err(|e| e.to_string())?;
        task.finalize().map_err(|e| e.to_string())?;
        return Ok(0);
    };

    let ringctrl = ringctrl_for(opts, &request.task)?;
    let mut ring_client = ReqClient::new(opts.ring_addr, std::time::Duration::from_secs(10));

    let reply: RingReply = ring_client
        .call(&RingRequest::Start {
            frame_ts: None,
            new_event: Some((request.date.clone(), event_id)),
            ringctrl,
        })
        .await
        .map_err(|e| e.to_string())?;

    let (shmem_name, slot_bytes, mut bucket) = match reply {
        RingReply::Started {
            shmem_name,
            slot_bytes,
            bucket,
            ..
        } => (shmem_name, slot_bytes, bucket),
        RingReply::Error(e) => return Err(e),
        RingReply::Eof => return Ok(0),
        RingReply::Bucket(_) => return Err("unexpected Bucket reply to START".into()),
    };
    let reader = RingBufferReader::open(&shmem_name, slot_bytes).map_err(|e| e.to_string())?;

    let mut image_count: u64 = 0;
    loop {
        let Some(idx) = bucket else { break };
        let frame = reader.read_slot(idx);
        let (keep_going, outcome) = task.pipeline(Some(frame)).map_err(|e| e.to_string())?;
        image_count += 1;
        if let Some(outcome) = outcome {
            result_pub.publish(
                "".to_string(),
                EngineEnvelope::Status {
                    jobid,
                    payload: StatusPayload::Frame(FrameResult {
                        jobid,
                        refkey: ringctrl.type_tag(),
                        ringctrl,
                        start: chrono::Utc::now(),
                        offset: (image_count - 1) as u32,
                        clas: outcome.clas,
                        rect: outcome.rect,
                    }),
                },
            );
        }
        if !keep_going {
            break;
        }

        let reply: RingReply = ring_client
            .call(&RingRequest::Next)
            .await
            .map_err(|e| e.to_string())?;
        bucket = match reply {
            RingReply::Bucket(idx) => Some(idx),
            RingReply::Eof => None,
            RingReply::Error(e) => return Err(e),
            RingReply::Started { .. } => return Err("unexpected START reply to NEXT".into()),
        };
    }

    task.finalize().map_err(|e| e.to_string())?;
    Ok(image_count)
}
