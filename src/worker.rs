use std::{future::Future, path::PathBuf, time::Duration};

use tokio::time::{sleep, timeout};
use tokio_retry::strategy::FixedInterval;

use crate::{
    capture::{self, CaptureEngine},
    extractor::extract_metadata,
    persist::ArchiveWriter,
    queue::{QueueError, QueueStore},
    settings::{CaptureSettings, DEFAULT_CAPTURE_SETTINGS},
    types::{CaptureRequest, CaptureResult},
    utils::{jitter, REQUEST_QUEUE_KEY, RESULT_QUEUE_KEY},
};

/// Sequential capture pipeline: one request is dequeued, captured, persisted,
/// inspected and reported before the next one is fetched.
pub struct Worker<Q, E> {
    queue: Q,
    engine: E,
    writer: ArchiveWriter,
    options: WorkerOptions,
}

#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct WorkerOptions {
    // directory the archives are written to
    output_dir: PathBuf,
    // settings handed to the capture engine for every request
    #[builder(default = "DEFAULT_CAPTURE_SETTINGS.clone()")]
    capture_settings: CaptureSettings,
    #[builder(default = "self.default_request_queue()")]
    request_queue: String,
    #[builder(default = "self.default_result_queue()")]
    result_queue: String,
    // how long a single pop may block, zero blocks forever
    #[builder(default = "Duration::ZERO")]
    dequeue_timeout: Duration,
    // pause between attempts after a queue store failure
    #[builder(default = "1000")]
    retry_interval_ms: u64,
    // how long an in-flight dequeue may still complete once shutdown is requested
    #[builder(default = "2000")]
    shutdown_grace_ms: u64,
}

impl WorkerOptions {
    pub fn default_builder() -> WorkerOptionsBuilder {
        WorkerOptionsBuilder::default()
    }

    pub fn capture_settings(&self) -> &CaptureSettings {
        &self.capture_settings
    }
}

impl WorkerOptionsBuilder {
    fn default_request_queue(&self) -> String {
        REQUEST_QUEUE_KEY.into()
    }
    fn default_result_queue(&self) -> String {
        RESULT_QUEUE_KEY.into()
    }
}

impl<Q: QueueStore, E: CaptureEngine> Worker<Q, E> {
    pub fn new(queue: Q, engine: E, options: WorkerOptions) -> Self {
        let writer = ArchiveWriter::new(&options.output_dir);
        Worker {
            queue,
            engine,
            writer,
            options,
        }
    }

    /// Processes requests until `shutdown` resolves. Shutdown is only observed
    /// while waiting for work. A dequeue already in flight gets a grace period
    /// to deliver, and whatever it delivers is processed and reported before
    /// the worker stops.
    pub async fn run<F: Future<Output = ()>>(&mut self, shutdown: F) {
        info!(
            "worker listening on {}, reporting to {}, writing to {:?}",
            self.options.request_queue,
            self.options.result_queue,
            self.writer.output_dir()
        );
        tokio::pin!(shutdown);
        let grace = Duration::from_millis(self.options.shutdown_grace_ms);
        let mut stopping = false;
        loop {
            if stopping {
                info!("shutdown requested, worker stopping");
                return;
            }
            let request = {
                let fetch = self.await_request();
                tokio::pin!(fetch);
                let first = tokio::select! {
                    biased;
                    request = &mut fetch => Some(request),
                    _ = &mut shutdown => None,
                };
                match first {
                    Some(request) => Some(request),
                    None => {
                        stopping = true;
                        debug!("shutdown requested, waiting {:?} for an in-flight dequeue", grace);
                        timeout(grace, &mut fetch).await.ok()
                    }
                }
            };
            if let Some(request) = request {
                self.handle(request).await;
            }
        }
    }

    /// Waits for the next request, processes it and reports the result.
    pub async fn process_next(&mut self) -> CaptureResult {
        let request = self.await_request().await;
        self.handle(request).await
    }

    async fn handle(&mut self, request: CaptureRequest) -> CaptureResult {
        let result = self.process(&request).await;
        if let Err(e) = self.report(&result).await {
            error!(
                "could not report result for {} to {}: {}",
                result.seed_shadow_id, self.options.result_queue, e
            );
        }
        result
    }

    /// Blocks until a usable request is dequeued. Store failures are logged
    /// and retried; payloads without a usable shadow id are dropped since no
    /// result could ever be correlated with them.
    pub async fn await_request(&mut self) -> CaptureRequest {
        let mut backoff = FixedInterval::from_millis(self.options.retry_interval_ms).map(jitter);
        loop {
            match self.fetch_request().await {
                Ok(Some(request)) => return request,
                Ok(None) => {
                    debug!(
                        "no request on {} within {:?}",
                        self.options.request_queue, self.options.dequeue_timeout
                    );
                }
                Err(e @ QueueError::Codec(_)) => {
                    error!("dropping request from {}: {}", self.options.request_queue, e);
                }
                Err(e) => {
                    error!(
                        "could not dequeue from {}: {}",
                        self.options.request_queue, e
                    );
                    if let Some(delay) = backoff.next() {
                        debug!("retrying dequeue in {:?}", delay);
                        sleep(delay).await;
                    }
                }
            }
        }
    }

    async fn fetch_request(&mut self) -> Result<Option<CaptureRequest>, QueueError> {
        let data = match self
            .queue
            .dequeue(&self.options.request_queue, self.options.dequeue_timeout)
            .await?
        {
            Some(d) => d,
            None => return Ok(None),
        };
        let request: CaptureRequest = serde_json::from_slice(&data)
            .map_err(|e| QueueError::Codec(format!("undecodable request: {}", e)))?;
        if request.seed_shadow_id.is_empty() {
            return Err(QueueError::Codec(format!(
                "request for {:?} has no SeedShadowID",
                request.seed_url
            )));
        }
        Ok(Some(request))
    }

    /// Runs capture, persistence and extraction for one request. Failures are
    /// collected in the result in stage order and never abort the worker.
    pub async fn process(&self, request: &CaptureRequest) -> CaptureResult {
        let id = &request.seed_shadow_id;
        let mut result = CaptureResult::new(id);
        info!("capturing {} for {}", request.seed_url, id);

        match capture::capture(&self.engine, &request.seed_url, &self.options.capture_settings)
            .await
        {
            Err(e) => {
                error!("[{}] {}", id, e);
                result.error_messages.push(e.to_string());
            }
            Ok(archive) => {
                // a failed write does not stop extraction, it works on the bytes in memory
                match self.writer.write(id, &archive).await {
                    Ok(path) => debug!("[{}] archive stored at {:?}", id, path),
                    Err(e) => {
                        error!("[{}] {}", id, e);
                        result.error_messages.push(e.to_string());
                    }
                }

                match extract_metadata(&archive) {
                    Ok(metadata) => {
                        debug!("[{}] metadata {:?}", id, metadata);
                        result.capture_metadata = Some(metadata);
                    }
                    Err(e) => {
                        error!("[{}] {}", id, e);
                        result.error_messages.push(e.to_string());
                    }
                }
            }
        }

        result.done = true;
        if result.is_success() {
            info!("capture of {} for {} succeeded", request.seed_url, id);
        } else {
            warn!(
                "capture of {} for {} finished with {} error(s)",
                request.seed_url,
                id,
                result.error_messages.len()
            );
        }
        result
    }

    /// Pushes `result` to the result queue. Store failures are retried until
    /// the push goes through, since the request is already gone from the
    /// request queue and this result is its only trace.
    pub async fn report(&mut self, result: &CaptureResult) -> Result<(), QueueError> {
        let payload =
            serde_json::to_vec(result).map_err(|e| QueueError::Codec(e.to_string()))?;
        let mut backoff = FixedInterval::from_millis(self.options.retry_interval_ms).map(jitter);
        loop {
            match self
                .queue
                .enqueue(&self.options.result_queue, &payload)
                .await
            {
                Ok(()) => {
                    debug!("reported result for {}", result.seed_shadow_id);
                    return Ok(());
                }
                Err(e) => {
                    error!(
                        "could not report result for {} to {}: {}",
                        result.seed_shadow_id, self.options.result_queue, e
                    );
                    if let Some(delay) = backoff.next() {
                        debug!("retrying report in {:?}", delay);
                        sleep(delay).await;
                    }
                }
            }
        }
    }
}
