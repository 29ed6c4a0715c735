//! Job queue API endpoints

use crate::QueueClient;
use crate::error::Result;
use reqwest::Method;
use splice_core::domain::job::{Job, JobState};
use splice_core::domain::patch::Patch;
use splice_core::dto::job::{JobStateResponse, ReportState};
use splice_core::dto::log::AppendLog;
use uuid::Uuid;

impl QueueClient {
    // =============================================================================
    // Job Acquisition
    // =============================================================================

    /// Acquire the next queued job for a runner
    ///
    /// The queue hands a job to at most one runner at a time.
    ///
    /// # Arguments
    /// * `runner_id` - The ID of the runner asking for work
    ///
    /// # Returns
    /// The job, or `None` if the queue is empty
    pub async fn pull_job(&self, runner_id: &str) -> Result<Option<Job>> {
        let url = format!("{}/api/runners/{}/jobs/pull", self.base_url, runner_id);
        let response = self.request(Method::POST, &url).send().await?;

        self.handle_optional_response(response).await
    }

    // =============================================================================
    // Job Reporting
    // =============================================================================

    /// Report a state transition for a job
    ///
    /// # Arguments
    /// * `job_id` - The ID of the job
    /// * `state` - The state the job entered
    /// * `patch` - The produced patch, only for `COMPLETED`
    pub async fn report_state(
        &self,
        job_id: Uuid,
        state: JobState,
        patch: Option<Patch>,
    ) -> Result<()> {
        let url = format!("{}/api/jobs/{}/state", self.base_url, job_id);
        tracing::debug!("Reporting state {} for job {}", state, job_id);

        let response = self
            .request(Method::PUT, &url)
            .json(&ReportState { state, patch })
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    /// Append a chunk of log output to a job
    ///
    /// # Arguments
    /// * `job_id` - The ID of the job these logs belong to
    /// * `content` - Rendered log lines
    pub async fn append_log(&self, job_id: Uuid, content: String) -> Result<()> {
        if content.is_empty() {
            return Ok(());
        }

        let url = format!("{}/api/jobs/{}/logs", self.base_url, job_id);
        let response = self
            .request(Method::POST, &url)
            .json(&AppendLog { content })
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    // =============================================================================
    // Job Query
    // =============================================================================

    /// Get the current state of a job as seen by the queue
    ///
    /// # Arguments
    /// * `job_id` - The job UUID
    pub async fn get_job_state(&self, job_id: Uuid) -> Result<JobState> {
        let url = format!("{}/api/jobs/{}/state", self.base_url, job_id);
        let response = self.request(Method::GET, &url).send().await?;

        let body: JobStateResponse = self.handle_response(response).await?;
        Ok(body.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::{Path, State},
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Response},
        routing::{get, post},
    };
    use splice_core::domain::action::{Action, Step};
    use splice_core::domain::repository::Repository;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeQueue {
        pending: VecDeque<Job>,
        reports: Vec<(Uuid, ReportState)>,
        logs: Vec<(Uuid, String)>,
        auth: Vec<Option<String>>,
        state: Option<JobState>,
    }

    type Shared = Arc<Mutex<FakeQueue>>;

    async fn pull(State(queue): State<Shared>, headers: HeaderMap, Path(_runner): Path<String>) -> Response {
        let mut queue = queue.lock().unwrap();
        queue.auth.push(
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        );
        match queue.pending.pop_front() {
            Some(job) => Json(job).into_response(),
            None => StatusCode::NO_CONTENT.into_response(),
        }
    }

    async fn report(
        State(queue): State<Shared>,
        Path(id): Path<Uuid>,
        Json(body): Json<ReportState>,
    ) -> StatusCode {
        queue.lock().unwrap().reports.push((id, body));
        StatusCode::OK
    }

    async fn state(State(queue): State<Shared>, Path(_id): Path<Uuid>) -> Response {
        match queue.lock().unwrap().state {
            Some(state) => Json(JobStateResponse { state }).into_response(),
            None => (StatusCode::NOT_FOUND, "no such job").into_response(),
        }
    }

    async fn logs(
        State(queue): State<Shared>,
        Path(id): Path<Uuid>,
        Json(body): Json<AppendLog>,
    ) -> StatusCode {
        queue.lock().unwrap().logs.push((id, body.content));
        StatusCode::NO_CONTENT
    }

    async fn serve(queue: Shared) -> String {
        let app = Router::new()
            .route("/api/runners/{runner_id}/jobs/pull", post(pull))
            .route("/api/jobs/{id}/state", get(state).put(report))
            .route("/api/jobs/{id}/logs", post(logs))
            .with_state(queue);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn sample_job() -> Job {
        Job {
            id: Uuid::new_v4(),
            repository: Repository::new("UmVwbzox", "github.com/acme/app"),
            base_revision: "main".to_string(),
            action: Action::new(vec![Step::command(["true"])]),
            env: Default::default(),
            state: JobState::Preparing,
        }
    }

    #[tokio::test]
    async fn test_pull_job_returns_none_when_queue_empty() {
        let queue = Shared::default();
        let client = QueueClient::new(serve(queue).await);

        let job = client.pull_job("runner-1").await.unwrap();
        assert!(job.is_none());
    }

    #[tokio::test]
    async fn test_pull_job_returns_queued_job_with_auth() {
        let queue = Shared::default();
        let job = sample_job();
        queue.lock().unwrap().pending.push_back(job.clone());
        let client = QueueClient::new(serve(queue.clone()).await).with_access_token("abc");

        let pulled = client.pull_job("runner-1").await.unwrap().unwrap();
        assert_eq!(pulled.id, job.id);
        assert_eq!(pulled.repository, job.repository);

        let queue = queue.lock().unwrap();
        assert_eq!(queue.auth, vec![Some("token abc".to_string())]);
    }

    #[tokio::test]
    async fn test_report_state_sends_patch() {
        let queue = Shared::default();
        let client = QueueClient::new(serve(queue.clone()).await);
        let job_id = Uuid::new_v4();

        client
            .report_state(job_id, JobState::Running, None)
            .await
            .unwrap();
        client
            .report_state(
                job_id,
                JobState::Completed,
                Some(Patch::new("UmVwbzox", "main", "--- a\n+++ a\n")),
            )
            .await
            .unwrap();

        let queue = queue.lock().unwrap();
        assert_eq!(queue.reports.len(), 2);
        assert_eq!(queue.reports[0].1.state, JobState::Running);
        assert!(queue.reports[0].1.patch.is_none());
        assert_eq!(queue.reports[1].1.state, JobState::Completed);
        assert_eq!(
            queue.reports[1].1.patch.as_ref().unwrap().diff,
            "--- a\n+++ a\n"
        );
    }

    #[tokio::test]
    async fn test_append_log_skips_empty_content() {
        let queue = Shared::default();
        let client = QueueClient::new(serve(queue.clone()).await);
        let job_id = Uuid::new_v4();

        client.append_log(job_id, String::new()).await.unwrap();
        client
            .append_log(job_id, "line one\n".to_string())
            .await
            .unwrap();

        let queue = queue.lock().unwrap();
        assert_eq!(queue.logs, vec![(job_id, "line one\n".to_string())]);
    }

    #[tokio::test]
    async fn test_get_job_state() {
        let queue = Shared::default();
        queue.lock().unwrap().state = Some(JobState::Canceled);
        let client = QueueClient::new(serve(queue).await);

        let state = client.get_job_state(Uuid::new_v4()).await.unwrap();
        assert_eq!(state, JobState::Canceled);
    }

    #[tokio::test]
    async fn test_api_error_carries_status() {
        let queue = Shared::default();
        let client = QueueClient::new(serve(queue).await);

        let err = client.get_job_state(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
