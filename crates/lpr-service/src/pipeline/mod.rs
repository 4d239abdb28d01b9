//! Per-frame orchestration: recognise, gate, persist, publish, annotate.

pub mod annotate;
pub mod gate;
pub mod worker;

use crate::recognize::{CharsetError, FormattedPlate, PlateRecognizer, RecognizeError};
use crate::store::{InsertOutcome, PlateStore};
use chrono::{DateTime, Utc};
use common::plates::LatestPlateResponse;
use image::RgbImage;
use std::sync::Arc;
use telemetry::metrics::{LPR_CANDIDATES, LPR_FRAMES_PROCESSED, LPR_RECORDS};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

pub use annotate::Annotator;
pub use gate::{CooldownGate, CooldownState, GateDecision};
pub use worker::{FeedEnd, FeedWorker};

/// Errors that make every later frame fail the same way
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("character table misconfigured: {0}")]
    Configuration(#[from] CharsetError),

    /// The recognition task panicked and took the frame with it
    #[error("recognition task aborted: {0}")]
    Aborted(String),
}

/// Most recently recorded plate, read by the latest-plate query
#[derive(Debug, Default)]
pub struct LatestPlateSlot {
    plate: RwLock<Option<FormattedPlate>>,
}

impl LatestPlateSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish(&self, plate: FormattedPlate) {
        *self.plate.write().await = Some(plate);
    }

    pub async fn get(&self) -> Option<FormattedPlate> {
        self.plate.read().await.clone()
    }

    pub async fn response(&self) -> LatestPlateResponse {
        LatestPlateResponse {
            formatted_plate: self
                .get()
                .await
                .map(FormattedPlate::into_string)
                .unwrap_or_default(),
        }
    }
}

/// A candidate that made it through the cooldown gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedPlate {
    pub plate: FormattedPlate,
    pub outcome: InsertOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    /// Plate regions the localisation model found
    pub regions: usize,
    /// Regions whose characters formed a valid plate
    pub candidates: usize,
    pub accepted: Vec<AcceptedPlate>,
    /// Inference failed; the frame goes out unannotated
    pub inference_failed: bool,
}

impl FrameReport {
    pub fn annotated(&self) -> bool {
        self.accepted.iter().any(|a| a.outcome.is_recorded())
    }
}

pub struct ProcessedFrame {
    pub frame: RgbImage,
    pub report: FrameReport,
}

/// Everything one frame passes through after it is read.
///
/// The gate and the latest-plate slot are shared, so several feeds can run
/// the same pipeline without recording a plate twice.
pub struct PlatePipeline {
    recognizer: Arc<PlateRecognizer>,
    gate: Arc<Mutex<CooldownGate>>,
    store: Arc<dyn PlateStore>,
    latest: Arc<LatestPlateSlot>,
    annotator: Annotator,
}

impl PlatePipeline {
    pub fn new(
        recognizer: PlateRecognizer,
        gate: CooldownGate,
        store: Arc<dyn PlateStore>,
        latest: Arc<LatestPlateSlot>,
        annotator: Annotator,
    ) -> Self {
        Self {
            recognizer: Arc::new(recognizer),
            gate: Arc::new(Mutex::new(gate)),
            store,
            latest,
            annotator,
        }
    }

    pub fn latest(&self) -> &Arc<LatestPlateSlot> {
        &self.latest
    }

    pub fn store(&self) -> &Arc<dyn PlateStore> {
        &self.store
    }

    pub async fn cooldown_state(&self) -> CooldownState {
        self.gate.lock().await.state().clone()
    }

    /// Run one frame through the pipeline. An error here ends the feed;
    /// per-frame failures are contained in the report.
    pub async fn process(
        &self,
        frame: RgbImage,
        at: DateTime<Utc>,
    ) -> Result<ProcessedFrame, PipelineError> {
        LPR_FRAMES_PROCESSED.inc();

        let recognizer = Arc::clone(&self.recognizer);
        let (mut frame, readings) = tokio::task::spawn_blocking(move || {
            let readings = recognizer.recognize(&frame);
            (frame, readings)
        })
        .await
        .map_err(|e| PipelineError::Aborted(e.to_string()))?;

        let mut report = FrameReport::default();
        let readings = match readings {
            Ok(readings) => readings,
            Err(RecognizeError::Inference(e)) => {
                warn!(error = %e, "inference failed, emitting frame unannotated");
                report.inference_failed = true;
                return Ok(ProcessedFrame { frame, report });
            }
            Err(RecognizeError::Charset(e)) => return Err(e.into()),
        };

        report.regions = readings.len();
        for reading in readings {
            let Some(plate) = reading.reconstruction.candidate() else {
                LPR_CANDIDATES.with_label_values(&["unreadable"]).inc();
                continue;
            };
            report.candidates += 1;

            let decision = self.gate.lock().await.observe(plate, at);
            LPR_CANDIDATES
                .with_label_values(&[decision.as_str()])
                .inc();
            if decision == GateDecision::Reject {
                debug!(plate = %plate, "plate inside cooldown window");
                continue;
            }

            info!(plate = %plate, "plate accepted");
            let outcome = self.store.try_insert(plate, at).await;
            LPR_RECORDS.with_label_values(&[outcome.as_str()]).inc();

            if outcome.is_recorded() {
                self.latest.publish(plate.clone()).await;
                self.annotator
                    .draw_plate(&mut frame, &reading.bbox, plate.as_str());
            }

            report.accepted.push(AcceptedPlate {
                plate: plate.clone(),
                outcome,
            });
        }

        Ok(ProcessedFrame { frame, report })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use common::plates::PlateRecord;
    use std::sync::Mutex as StdMutex;

    /// Remembers every insert; answers with a fixed outcome
    pub struct RecordingStore {
        pub outcome: InsertOutcome,
        pub inserts: StdMutex<Vec<(FormattedPlate, DateTime<Utc>)>>,
    }

    impl RecordingStore {
        pub fn new(outcome: InsertOutcome) -> Self {
            Self {
                outcome,
                inserts: StdMutex::new(Vec::new()),
            }
        }

        pub fn count(&self) -> usize {
            self.inserts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PlateStore for RecordingStore {
        async fn try_insert(&self, plate: &FormattedPlate, at: DateTime<Utc>) -> InsertOutcome {
            self.inserts.lock().unwrap().push((plate.clone(), at));
            self.outcome
        }

        async fn recent(&self, _limit: u32) -> Result<Vec<PlateRecord>> {
            Ok(Vec::new())
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingStore;
    use super::*;
    use crate::recognize::testing::{plate_characters, FixedDetector};
    use crate::recognize::{CharacterMap, PlateFormat, PlateReconstructor};
    use chrono::TimeZone;
    use common::detections::{BoundingBox, Detection};
    use std::time::Duration;

    const PLATE: &str = "67ایران345ب12";

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    struct Harness {
        pipeline: PlatePipeline,
        chars: Arc<FixedDetector>,
        store: Arc<RecordingStore>,
    }

    fn harness(outcome: InsertOutcome) -> Harness {
        let map = CharacterMap::persian();
        let plates = Arc::new(FixedDetector::new(
            "plate",
            vec![Detection::new(BoundingBox::new(20.0, 20.0, 120.0, 50.0), 0.9, 0)],
        ));
        let chars = Arc::new(FixedDetector::new(
            "ocr",
            plate_characters(&map, ["1", "2", "ب", "3", "4", "5", "6", "7"]),
        ));
        let store = Arc::new(RecordingStore::new(outcome));
        let recognizer = PlateRecognizer::new(
            plates,
            chars.clone(),
            PlateReconstructor::new(Arc::new(map), PlateFormat::default()),
        );
        let pipeline = PlatePipeline::new(
            recognizer,
            CooldownGate::new(Duration::from_secs(10)),
            store.clone(),
            Arc::new(LatestPlateSlot::new()),
            Annotator::new(),
        );
        Harness {
            pipeline,
            chars,
            store,
        }
    }

    fn frame() -> RgbImage {
        RgbImage::new(160, 90)
    }

    #[tokio::test]
    async fn test_accepted_plate_is_recorded_published_and_drawn() {
        let h = harness(InsertOutcome::Inserted { id: 1 });

        let processed = h.pipeline.process(frame(), at(0)).await.unwrap();
        assert_eq!(processed.report.regions, 1);
        assert_eq!(processed.report.candidates, 1);
        assert!(processed.report.annotated());
        assert_eq!(processed.frame.get_pixel(20, 20), &image::Rgb([0, 255, 0]));

        assert_eq!(h.store.count(), 1);
        assert_eq!(
            h.pipeline.latest().response().await.formatted_plate,
            PLATE
        );
    }

    #[tokio::test]
    async fn test_repeat_inside_cooldown_skips_sink() {
        let h = harness(InsertOutcome::Inserted { id: 1 });

        for secs in 0..5 {
            h.pipeline.process(frame(), at(secs)).await.unwrap();
        }
        assert_eq!(h.store.count(), 1);

        let processed = h.pipeline.process(frame(), at(5)).await.unwrap();
        assert!(processed.report.accepted.is_empty());
        assert!(!processed.report.annotated());

        h.pipeline.process(frame(), at(11)).await.unwrap();
        assert_eq!(h.store.count(), 2);
    }

    #[tokio::test]
    async fn test_storage_duplicate_still_publishes() {
        let h = harness(InsertOutcome::Duplicate);

        let processed = h.pipeline.process(frame(), at(0)).await.unwrap();
        assert!(processed.report.annotated());
        assert_eq!(h.pipeline.latest().get().await.unwrap().as_str(), PLATE);
    }

    #[tokio::test]
    async fn test_storage_failure_does_not_publish_but_updates_gate() {
        let h = harness(InsertOutcome::Failed);

        let processed = h.pipeline.process(frame(), at(0)).await.unwrap();
        assert_eq!(processed.report.accepted.len(), 1);
        assert!(!processed.report.annotated());
        assert_eq!(processed.frame.get_pixel(20, 20), &image::Rgb([0, 0, 0]));
        assert_eq!(h.pipeline.latest().get().await, None);

        let state = h.pipeline.cooldown_state().await;
        assert_eq!(state.last_plate().unwrap().as_str(), PLATE);
        assert_eq!(state.last_time(), Some(at(0)));
    }

    #[tokio::test]
    async fn test_unreadable_plate_touches_nothing() {
        let h = harness(InsertOutcome::Inserted { id: 1 });
        h.chars.set(Vec::new());

        let processed = h.pipeline.process(frame(), at(0)).await.unwrap();
        assert_eq!(processed.report.regions, 1);
        assert_eq!(processed.report.candidates, 0);
        assert_eq!(h.store.count(), 0);
        assert_eq!(h.pipeline.cooldown_state().await, CooldownState::default());
    }

    #[tokio::test]
    async fn test_inference_failure_keeps_frame() {
        let h = harness(InsertOutcome::Inserted { id: 1 });
        *h.chars.detections.lock().unwrap() = Err("session lost".to_string());

        let mut input = frame();
        input.put_pixel(1, 1, image::Rgb([9, 9, 9]));
        let processed = h.pipeline.process(input, at(0)).await.unwrap();
        assert!(processed.report.inference_failed);
        assert_eq!(processed.frame.get_pixel(1, 1), &image::Rgb([9, 9, 9]));
        assert_eq!(h.store.count(), 0);
    }

    #[tokio::test]
    async fn test_unmapped_code_is_fatal() {
        let h = harness(InsertOutcome::Inserted { id: 1 });
        h.chars.set(vec![Detection::new(
            BoundingBox::new(0.0, 0.0, 5.0, 5.0),
            0.9,
            500,
        )]);

        assert!(matches!(
            h.pipeline.process(frame(), at(0)).await,
            Err(PipelineError::Configuration(_))
        ));
    }
}
