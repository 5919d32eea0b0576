//! The scheduler's two exposed sockets: a control REP accepting job
//! submissions and the two introspection meta-tasks, and the unified result
//! PUB that camwatcher's analytics subscriber (and anyone else) watches.

use std::sync::Arc;

use sentinelcam_wire::reqrep::serve;
use tokio::net::TcpListener;

use crate::job_manager::JobManager;
use crate::wire::{SchedulerReply, SchedulerRequest};

pub async fn run_control(listener: TcpListener, job_manager: Arc<JobManager>) -> anyhow::Result<()> {
    serve(listener, move |req: SchedulerRequest| {
        let job_manager = Arc::clone(&job_manager);
        async move {
            match req {
                SchedulerRequest::Submit(request) => match job_manager.submit(request).await {
                    Ok(jobid) => SchedulerReply::JobId(jobid),
                    Err(e) => SchedulerReply::Error(e),
                },
                SchedulerRequest::Status => SchedulerReply::Status(job_manager.status().await),
                SchedulerRequest::History => SchedulerReply::History(job_manager.history().await),
            }
        }
    })
    .await?;
    Ok(())
}
