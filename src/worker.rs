//! Background worker for file parsing, quality scoring and pipeline replays.
//!
//! The caller talks to one worker thread over a request/response channel pair. Every request
//! carries a sequence number and [`Session`] drops responses that a newer submission has
//! superseded, so the latest submission wins. Runs are never cancelled.

use color_eyre::eyre::eyre;
use color_eyre::Result;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::analysis::{build_sample, AnalysisSample, SAMPLE_CHAR_BUDGET, SAMPLE_ROWS_PER_PART};
use crate::cli::FileFormat;
use crate::error_display::user_message_from_load_error;
use crate::quality::{assess_quality_with_options, QualityOptions, QualityReport};
use crate::source::{load_bytes, LoadOptions};
use crate::transform::{apply_transformations, Pipeline, Transformation};
use crate::value::Dataset;

/// Progress checkpoints reported while a file is loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadPhase {
    Parsing,
    Validating,
    Sampling,
}

impl LoadPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parsing => "Parsing",
            Self::Validating => "Validating",
            Self::Sampling => "Sampling",
        }
    }

    /// Rough completion percentage at the start of the phase.
    pub fn percent(&self) -> u8 {
        match self {
            Self::Parsing => 10,
            Self::Validating => 60,
            Self::Sampling => 85,
        }
    }
}

/// Everything the worker needs to turn file bytes into a dataset and its report.
#[derive(Debug, Clone)]
pub struct LoadJob {
    pub bytes: Vec<u8>,
    pub format: FileFormat,
    pub options: LoadOptions,
    pub quality: QualityOptions,
    pub sample_rows_per_part: usize,
    pub sample_char_budget: usize,
}

impl LoadJob {
    pub fn new(bytes: Vec<u8>, format: FileFormat) -> Self {
        Self {
            bytes,
            format,
            options: LoadOptions::default(),
            quality: QualityOptions::default(),
            sample_rows_per_part: SAMPLE_ROWS_PER_PART,
            sample_char_budget: SAMPLE_CHAR_BUDGET,
        }
    }

    pub fn with_options(mut self, options: LoadOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_quality(mut self, quality: QualityOptions) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_sample(mut self, rows_per_part: usize, char_budget: usize) -> Self {
        self.sample_rows_per_part = rows_per_part;
        self.sample_char_budget = char_budget;
        self
    }
}

pub enum WorkerRequest {
    Load {
        seq: u64,
        job: Box<LoadJob>,
    },
    Transform {
        seq: u64,
        raw: Arc<Dataset>,
        steps: Vec<Transformation>,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Load,
    Transform,
}

#[derive(Debug)]
pub enum WorkerEvent {
    Progress {
        seq: u64,
        phase: LoadPhase,
    },
    Loaded {
        seq: u64,
        dataset: Arc<Dataset>,
        report: Box<QualityReport>,
        sample: Box<AnalysisSample>,
    },
    Transformed {
        seq: u64,
        dataset: Arc<Dataset>,
        elapsed: Duration,
    },
    Failed {
        seq: u64,
        kind: JobKind,
        message: String,
    },
}

impl WorkerEvent {
    pub fn seq(&self) -> u64 {
        match self {
            Self::Progress { seq, .. }
            | Self::Loaded { seq, .. }
            | Self::Transformed { seq, .. }
            | Self::Failed { seq, .. } => *seq,
        }
    }
}

/// Handle to the worker thread. Dropping it shuts the thread down after the current job.
pub struct Worker {
    requests: Sender<WorkerRequest>,
    events: Receiver<WorkerEvent>,
    handle: Option<JoinHandle<()>>,
    next_seq: u64,
}

impl Worker {
    pub fn spawn() -> Result<Self> {
        let (req_tx, req_rx) = mpsc::channel::<WorkerRequest>();
        let (event_tx, event_rx) = mpsc::channel::<WorkerEvent>();
        let handle = std::thread::Builder::new()
            .name("tablesight-worker".to_string())
            .spawn(move || run_worker(req_rx, event_tx))?;
        Ok(Self {
            requests: req_tx,
            events: event_rx,
            handle: Some(handle),
            next_seq: 0,
        })
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    pub fn submit_load(&mut self, job: LoadJob) -> Result<u64> {
        let seq = self.next_seq();
        self.requests
            .send(WorkerRequest::Load {
                seq,
                job: Box::new(job),
            })
            .map_err(|_| eyre!("Worker thread is not running"))?;
        Ok(seq)
    }

    pub fn submit_transform(&mut self, raw: Arc<Dataset>, steps: Vec<Transformation>) -> Result<u64> {
        let seq = self.next_seq();
        self.requests
            .send(WorkerRequest::Transform { seq, raw, steps })
            .map_err(|_| eyre!("Worker thread is not running"))?;
        Ok(seq)
    }

    /// Waits up to `timeout` for the next event. `Ok(None)` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<WorkerEvent>> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(eyre!("Worker thread exited")),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let _ = self.requests.send(WorkerRequest::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_worker(requests: Receiver<WorkerRequest>, events: Sender<WorkerEvent>) {
    for request in requests {
        let (seq, kind, outcome) = match request {
            WorkerRequest::Shutdown => break,
            WorkerRequest::Load { seq, job } => {
                let tx = events.clone();
                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| run_load(seq, *job, &tx)));
                (seq, JobKind::Load, outcome)
            }
            WorkerRequest::Transform { seq, raw, steps } => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    let start = Instant::now();
                    let dataset = apply_transformations(&raw, &steps);
                    Ok::<_, String>(WorkerEvent::Transformed {
                        seq,
                        dataset: Arc::new(dataset),
                        elapsed: start.elapsed(),
                    })
                }));
                (seq, JobKind::Transform, outcome)
            }
        };

        let event = match outcome {
            Ok(Ok(event)) => event,
            Ok(Err(message)) => WorkerEvent::Failed { seq, kind, message },
            Err(payload) => {
                let message = if let Some(s) = payload.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "worker panicked".to_string()
                };
                WorkerEvent::Failed {
                    seq,
                    kind,
                    message: format!("Internal error: {}", message),
                }
            }
        };
        if events.send(event).is_err() {
            break;
        }
    }
    debug!("worker thread exiting");
}

fn run_load(
    seq: u64,
    job: LoadJob,
    events: &Sender<WorkerEvent>,
) -> std::result::Result<WorkerEvent, String> {
    let progress = |phase: LoadPhase| {
        debug!(seq, phase = phase.as_str(), "load progress");
        let _ = events.send(WorkerEvent::Progress { seq, phase });
    };

    progress(LoadPhase::Parsing);
    let dataset = load_bytes(job.bytes, job.format, &job.options)
        .map_err(|e| user_message_from_load_error(&e))?;

    progress(LoadPhase::Validating);
    let report = assess_quality_with_options(&dataset, &job.quality);

    progress(LoadPhase::Sampling);
    let sample = build_sample(&dataset, job.sample_rows_per_part, job.sample_char_budget);

    info!(
        rows = dataset.len(),
        columns = dataset.column_count(),
        score = report.score,
        "loaded dataset"
    );
    Ok(WorkerEvent::Loaded {
        seq,
        dataset: Arc::new(dataset),
        report: Box::new(report),
        sample: Box::new(sample),
    })
}

/// What changed after [`Session::handle`] accepted an event.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Progress(LoadPhase),
    Loaded,
    Transformed,
    Failed(String),
}

/// Caller-side state: the raw dataset, the pipeline, and the last-known-good working dataset.
pub struct Session {
    worker: Worker,
    pipeline: Pipeline,
    raw: Option<Arc<Dataset>>,
    current: Option<Arc<Dataset>>,
    report: Option<QualityReport>,
    sample: Option<AnalysisSample>,
    last_error: Option<String>,
    latest_load: u64,
    latest_transform: u64,
    awaiting_load: bool,
    awaiting_transform: bool,
}

impl Session {
    pub fn new() -> Result<Self> {
        Ok(Self {
            worker: Worker::spawn()?,
            pipeline: Pipeline::new(),
            raw: None,
            current: None,
            report: None,
            sample: None,
            last_error: None,
            latest_load: 0,
            latest_transform: 0,
            awaiting_load: false,
            awaiting_transform: false,
        })
    }

    pub fn raw(&self) -> Option<&Arc<Dataset>> {
        self.raw.as_ref()
    }

    /// The working dataset: the last successful pipeline run over the current raw dataset.
    pub fn current(&self) -> Option<&Arc<Dataset>> {
        self.current.as_ref()
    }

    pub fn report(&self) -> Option<&QualityReport> {
        self.report.as_ref()
    }

    pub fn sample(&self) -> Option<&AnalysisSample> {
        self.sample.as_ref()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_busy(&self) -> bool {
        self.awaiting_load || self.awaiting_transform
    }

    pub fn load(&mut self, job: LoadJob) -> Result<u64> {
        let seq = self.worker.submit_load(job)?;
        self.latest_load = seq;
        self.awaiting_load = true;
        Ok(seq)
    }

    /// Replaces the pipeline and replays it over the raw dataset.
    pub fn set_pipeline(&mut self, pipeline: Pipeline) -> Result<()> {
        self.pipeline = pipeline;
        self.recompute()
    }

    /// Edits the pipeline in place and replays it.
    pub fn update_pipeline<F: FnOnce(&mut Pipeline)>(&mut self, edit: F) -> Result<()> {
        edit(&mut self.pipeline);
        self.recompute()
    }

    fn recompute(&mut self) -> Result<()> {
        let Some(raw) = self.raw.clone() else {
            return Ok(());
        };
        let seq = self
            .worker
            .submit_transform(raw, self.pipeline.steps().to_vec())?;
        self.latest_transform = seq;
        self.awaiting_transform = true;
        Ok(())
    }

    /// Applies one worker event. Stale responses are dropped and yield `None`.
    pub fn handle(&mut self, event: WorkerEvent) -> Result<Option<SessionUpdate>> {
        let seq = event.seq();
        match event {
            WorkerEvent::Progress { phase, .. } => {
                if seq != self.latest_load {
                    return Ok(None);
                }
                Ok(Some(SessionUpdate::Progress(phase)))
            }
            WorkerEvent::Loaded {
                dataset,
                report,
                sample,
                ..
            } => {
                if seq != self.latest_load {
                    debug!(seq, latest = self.latest_load, "discarding stale load");
                    return Ok(None);
                }
                self.awaiting_load = false;
                self.last_error = None;
                self.raw = Some(dataset.clone());
                self.current = Some(dataset);
                self.report = Some(*report);
                self.sample = Some(*sample);
                if !self.pipeline.is_empty() {
                    self.recompute()?;
                }
                Ok(Some(SessionUpdate::Loaded))
            }
            WorkerEvent::Transformed {
                dataset, elapsed, ..
            } => {
                if seq != self.latest_transform || seq < self.latest_load {
                    debug!(seq, latest = self.latest_transform, "discarding stale transform");
                    if seq == self.latest_transform {
                        self.awaiting_transform = false;
                    }
                    return Ok(None);
                }
                self.awaiting_transform = false;
                self.last_error = None;
                debug!(
                    seq,
                    rows = dataset.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "transform applied"
                );
                self.current = Some(dataset);
                Ok(Some(SessionUpdate::Transformed))
            }
            WorkerEvent::Failed { kind, message, .. } => {
                let latest = match kind {
                    JobKind::Load => self.latest_load,
                    JobKind::Transform => self.latest_transform,
                };
                if seq != latest {
                    debug!(seq, latest, "discarding stale failure");
                    return Ok(None);
                }
                match kind {
                    JobKind::Load => self.awaiting_load = false,
                    JobKind::Transform => self.awaiting_transform = false,
                }
                warn!(seq, ?kind, %message, "worker job failed");
                self.last_error = Some(message.clone());
                Ok(Some(SessionUpdate::Failed(message)))
            }
        }
    }

    /// Blocks until every outstanding submission has been answered, passing accepted updates
    /// to `on_update`.
    pub fn wait<F: FnMut(&SessionUpdate)>(&mut self, mut on_update: F) -> Result<()> {
        while self.is_busy() {
            if let Some(event) = self.worker.recv_timeout(Duration::from_millis(50))? {
                if let Some(update) = self.handle(event)? {
                    on_update(&update);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::SortDirection;

    fn csv_job(text: &str) -> LoadJob {
        LoadJob::new(text.as_bytes().to_vec(), FileFormat::Csv)
    }

    #[test]
    fn test_load_reports_phases_in_order() {
        let mut session = Session::new().unwrap();
        session.load(csv_job("a,b\n1,x\n2,y\n")).unwrap();
        let mut updates = Vec::new();
        session.wait(|u| updates.push(u.clone())).unwrap();
        assert_eq!(
            updates,
            vec![
                SessionUpdate::Progress(LoadPhase::Parsing),
                SessionUpdate::Progress(LoadPhase::Validating),
                SessionUpdate::Progress(LoadPhase::Sampling),
                SessionUpdate::Loaded,
            ]
        );
        assert_eq!(session.current().unwrap().len(), 2);
        assert_eq!(session.report().unwrap().row_count, 2);
    }

    #[test]
    fn test_latest_transform_wins() {
        let mut session = Session::new().unwrap();
        session.load(csv_job("n\n3\n1\n2\n")).unwrap();
        session.wait(|_| {}).unwrap();

        session
            .update_pipeline(|p| {
                p.push(Transformation::Sort {
                    column: "n".into(),
                    direction: SortDirection::Asc,
                })
            })
            .unwrap();
        session
            .set_pipeline(Pipeline::from_steps(vec![Transformation::Sort {
                column: "n".into(),
                direction: SortDirection::Desc,
            }]))
            .unwrap();

        let mut transformed = 0;
        session
            .wait(|u| {
                if *u == SessionUpdate::Transformed {
                    transformed += 1;
                }
            })
            .unwrap();
        assert_eq!(transformed, 1);
        let first = session.current().unwrap().rows[0][0].as_number();
        assert_eq!(first, Some(3.0));
        // Raw data is never reordered.
        assert_eq!(session.raw().unwrap().rows[0][0].as_number(), Some(3.0));
        assert_eq!(session.raw().unwrap().rows[1][0].as_number(), Some(1.0));
    }

    #[test]
    fn test_failed_load_keeps_last_good_dataset() {
        let mut session = Session::new().unwrap();
        session.load(csv_job("a\n1\n")).unwrap();
        session.wait(|_| {}).unwrap();

        session
            .load(LoadJob::new(b"not a workbook".to_vec(), FileFormat::Excel))
            .unwrap();
        let mut failures = Vec::new();
        session
            .wait(|u| {
                if let SessionUpdate::Failed(msg) = u {
                    failures.push(msg.clone());
                }
            })
            .unwrap();
        assert_eq!(failures.len(), 1);
        assert!(session.last_error().is_some());
        assert_eq!(session.current().unwrap().len(), 1);
    }

    #[test]
    fn test_stale_events_are_dropped() {
        let mut session = Session::new().unwrap();
        session.latest_load = 5;
        let stale = WorkerEvent::Progress {
            seq: 4,
            phase: LoadPhase::Parsing,
        };
        assert_eq!(session.handle(stale).unwrap(), None);
    }
}
