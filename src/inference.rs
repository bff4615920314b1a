//! Sample batching for an external inference service
//!
//! The inference service scores fixed-size windows of consecutive samples:
//! a safety classification over [`CLASSIFY_WINDOW`] samples and a CO
//! concentration regression over [`PREDICT_WINDOW`]. This module turns the
//! frame stream into such windows without ever blocking frame delivery.
//! Full windows go through a bounded channel; when the worker falls behind,
//! whole windows are dropped rather than queued without limit.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::TelemetryFrame;
use crate::sink::TelemetrySink;

/// Samples per classification request
pub const CLASSIFY_WINDOW: usize = 10;

/// Samples per regression request
pub const PREDICT_WINDOW: usize = 30;

/// Resistance readings of the metal-oxide sensor array in each sample
pub const SENSOR_RESISTANCES: usize = 14;

/// One sample as the inference service expects it.
///
/// The regression model also consumes the sensor array's resistances. The
/// 32-byte frame does not carry them, so they come from a
/// [`ResistanceSource`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorSample {
    pub temperature: f32,
    pub humidity: f32,
    pub flow_rate: f32,
    pub heater_voltage: f32,
    pub sensor_resistances: Vec<f32>,
    #[serde(rename = "COppm")]
    pub co_ppm: f32,
}

impl SensorSample {
    pub fn from_frame(frame: &TelemetryFrame, sensor_resistances: Vec<f32>) -> Self {
        Self {
            temperature: frame.temperature_c,
            humidity: frame.humidity_pct,
            flow_rate: frame.flow_rate,
            heater_voltage: frame.heater_voltage,
            sensor_resistances,
            co_ppm: frame.co_ppm,
        }
    }
}

/// Supplies the sensor-array resistances that accompany a frame.
pub trait ResistanceSource: Send + Sync + 'static {
    /// [`SENSOR_RESISTANCES`] readings in MOhm for the sample built from `frame`.
    fn resistances(&self, frame: &TelemetryFrame) -> Vec<f32>;
}

impl<F> ResistanceSource for F
where
    F: Fn(&TelemetryFrame) -> Vec<f32> + Send + Sync + 'static,
{
    fn resistances(&self, frame: &TelemetryFrame) -> Vec<f32> {
        self(frame)
    }
}

/// All-zero readings, for peripherals without a sensor array.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroResistances;

impl ResistanceSource for ZeroResistances {
    fn resistances(&self, _frame: &TelemetryFrame) -> Vec<f32> {
        vec![0.0; SENSOR_RESISTANCES]
    }
}

/// Which model a window is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceTask {
    Classify,
    PredictPpm,
}

impl InferenceTask {
    /// Every task the service serves
    pub const ALL: [InferenceTask; 2] = [InferenceTask::Classify, InferenceTask::PredictPpm];

    /// Number of consecutive samples the model consumes
    pub fn window(self) -> usize {
        match self {
            InferenceTask::Classify => CLASSIFY_WINDOW,
            InferenceTask::PredictPpm => PREDICT_WINDOW,
        }
    }
}

/// A full window of consecutive samples.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBatch {
    pub task: InferenceTask,
    pub samples: Vec<SensorSample>,
}

/// Accumulates samples and emits a batch each time `capacity` are collected.
#[derive(Debug)]
pub struct SampleBatcher {
    capacity: usize,
    buffer: Vec<SensorSample>,
}

impl SampleBatcher {
    /// A batcher emitting windows of `capacity` samples. A zero capacity is
    /// treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { capacity, buffer: Vec::with_capacity(capacity) }
    }

    /// Add a sample; returns the full window when this sample completed it.
    pub fn push(&mut self, sample: SensorSample) -> Option<Vec<SensorSample>> {
        self.buffer.push(sample);
        if self.buffer.len() < self.capacity {
            return None;
        }
        Some(std::mem::replace(&mut self.buffer, Vec::with_capacity(self.capacity)))
    }

    /// Samples buffered toward the next window
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Telemetry sink that batches frames for one or more inference tasks.
///
/// Every sample goes into each task's window and the windows fill
/// independently. Runs on the notification path, so handing off a full
/// window uses `try_send`: a full or closed channel drops the window with a
/// warning.
pub struct BatchingSink {
    batchers: Mutex<Vec<(InferenceTask, SampleBatcher)>>,
    resistances: Box<dyn ResistanceSource>,
    batches: mpsc::Sender<SampleBatch>,
}

impl BatchingSink {
    /// Batch frames for a single task.
    pub fn new(task: InferenceTask, batches: mpsc::Sender<SampleBatch>) -> Self {
        Self::for_tasks(&[task], batches)
    }

    pub fn for_tasks(tasks: &[InferenceTask], batches: mpsc::Sender<SampleBatch>) -> Self {
        let batchers =
            tasks.iter().map(|&task| (task, SampleBatcher::new(task.window()))).collect();
        Self { batchers: Mutex::new(batchers), resistances: Box::new(ZeroResistances), batches }
    }

    /// Take sensor-array resistances from `source` instead of zeros.
    pub fn with_resistances<R: ResistanceSource>(mut self, source: R) -> Self {
        self.resistances = Box::new(source);
        self
    }

    fn batchers(&self) -> MutexGuard<'_, Vec<(InferenceTask, SampleBatcher)>> {
        self.batchers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn hand_off(&self, batch: SampleBatch) {
        let task = batch.task;
        match self.batches.try_send(batch) {
            Ok(()) => debug!("Queued {:?} window", task),
            Err(TrySendError::Full(_)) => {
                warn!("Inference queue full, dropping {:?} window", task)
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Inference worker gone, dropping {:?} window", task)
            }
        }
    }
}

impl TelemetrySink for BatchingSink {
    fn report_frame(&self, frame: TelemetryFrame, _skew_ms: u64) {
        let sample = SensorSample::from_frame(&frame, self.resistances.resistances(&frame));

        let full: Vec<SampleBatch> = self
            .batchers()
            .iter_mut()
            .filter_map(|(task, batcher)| {
                batcher.push(sample.clone()).map(|samples| SampleBatch { task: *task, samples })
            })
            .collect();

        for batch in full {
            self.hand_off(batch);
        }
    }

    fn report_decode_error(&self, _length_observed: usize) {}

    fn report_command_error(&self, _detail: &str) {}
}

/// Client of the remote inference service.
#[async_trait::async_trait]
pub trait InferenceClient: Send + Sync + 'static {
    /// Submit one full window.
    async fn submit(&self, batch: SampleBatch) -> anyhow::Result<()>;
}

#[async_trait::async_trait]
impl<C: InferenceClient + ?Sized> InferenceClient for Arc<C> {
    async fn submit(&self, batch: SampleBatch) -> anyhow::Result<()> {
        (**self).submit(batch).await
    }
}

/// Feed windows from `batches` to `client` on a background task.
///
/// A failed submission is logged and the worker moves on to the next
/// window. The task ends once every sender of the channel is dropped.
pub fn spawn_inference_worker<C: InferenceClient>(
    client: C,
    mut batches: mpsc::Receiver<SampleBatch>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut submitted = 0u64;
        let mut failed = 0u64;

        while let Some(batch) = batches.recv().await {
            let task = batch.task;
            match client.submit(batch).await {
                Ok(()) => submitted += 1,
                Err(e) => {
                    failed += 1;
                    warn!("Inference submission for {:?} failed: {:#}", task, e);
                }
            }
        }

        info!("Inference worker stopped ({} submitted, {} failed)", submitted, failed);
    })
}
