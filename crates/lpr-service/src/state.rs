use crate::config::LprServiceConfig;
use crate::inference::{Detector, OnnxYoloDetector, YoloConfig};
use crate::pipeline::{Annotator, CooldownGate, FeedWorker, LatestPlateSlot, PlatePipeline};
use crate::recognize::{CharacterMap, PlateReconstructor, PlateRecognizer};
use crate::source::{MediaOpener, SourceOpener, SourceSlot};
use crate::store::{DriverDirectory, PlateStore, SqlDriverDirectory, SqlitePlateStore};
use anyhow::{Context, Result};
use bytes::Bytes;
use common::plates::{LatestPlateResponse, PlateRecord};
use common::sources::{SourceDescriptor, SourceKind, SourceUpdateResponse};
use common::validation::sanitize_file_name;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Frames buffered between a worker and its HTTP body
const FEED_BUFFER: usize = 2;

#[derive(Clone)]
pub struct LprServiceState {
    inner: Arc<LprServiceStateInner>,
}

struct LprServiceStateInner {
    pipeline: Arc<PlatePipeline>,
    sources: Arc<SourceSlot>,
    opener: Arc<dyn SourceOpener>,
    directory: Option<Arc<dyn DriverDirectory>>,
    upload_dir: PathBuf,
    jpeg_quality: u8,
    shutdown: CancellationToken,
}

/// Optional collaborators and knobs of the service state
pub struct StateOptions {
    pub directory: Option<Arc<dyn DriverDirectory>>,
    pub upload_dir: PathBuf,
    pub jpeg_quality: u8,
}

impl Default for StateOptions {
    fn default() -> Self {
        Self {
            directory: None,
            upload_dir: PathBuf::from("uploads"),
            jpeg_quality: 80,
        }
    }
}

impl LprServiceState {
    pub fn new(
        pipeline: Arc<PlatePipeline>,
        sources: Arc<SourceSlot>,
        opener: Arc<dyn SourceOpener>,
        options: StateOptions,
    ) -> Self {
        Self {
            inner: Arc::new(LprServiceStateInner {
                pipeline,
                sources,
                opener,
                directory: options.directory,
                upload_dir: options.upload_dir,
                jpeg_quality: options.jpeg_quality,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Wire the production pipeline: ONNX models, SQLite store, ffmpeg sources
    pub async fn from_config(config: &LprServiceConfig) -> Result<Self> {
        let charset = match &config.charset_path {
            Some(path) => CharacterMap::load(path)?,
            None => CharacterMap::persian(),
        };
        info!(glyphs = charset.len(), "character table loaded");

        let reconstructor = PlateReconstructor::new(Arc::new(charset), config.plate_format()?);
        let recognizer = PlateRecognizer::new(
            detector("plate", &config.plate_model_path, config),
            detector("ocr", &config.ocr_model_path, config),
            reconstructor,
        );

        let directory: Option<Arc<dyn DriverDirectory>> = match &config.driver_database_url {
            Some(url) => {
                let directory = SqlDriverDirectory::connect(url)
                    .await
                    .context("failed to open driver directory")?;
                info!("driver directory enabled");
                Some(Arc::new(directory))
            }
            None => {
                info!("no driver directory configured, records store plate and time only");
                None
            }
        };

        let mut store = SqlitePlateStore::connect(&config.database_url, config.dedup_window)
            .await
            .context("failed to open plate store")?;
        if let Some(directory) = &directory {
            store = store.with_directory(Arc::clone(directory));
        }

        let annotator = match &config.font_path {
            Some(path) => Annotator::with_font_file(path)?,
            None => Annotator::new(),
        };

        let pipeline = PlatePipeline::new(
            recognizer,
            CooldownGate::new(config.cooldown),
            Arc::new(store),
            Arc::new(LatestPlateSlot::new()),
            annotator,
        );

        Ok(Self::new(
            Arc::new(pipeline),
            Arc::new(SourceSlot::new(config.initial_source.clone())),
            Arc::new(MediaOpener::new(config.frame_interval)),
            StateOptions {
                directory,
                upload_dir: config.upload_dir.clone(),
                jpeg_quality: config.jpeg_quality,
            },
        ))
    }

    pub fn pipeline(&self) -> &Arc<PlatePipeline> {
        &self.inner.pipeline
    }

    pub fn store(&self) -> &Arc<dyn PlateStore> {
        self.inner.pipeline.store()
    }

    pub fn directory(&self) -> Option<&Arc<dyn DriverDirectory>> {
        self.inner.directory.as_ref()
    }

    /// Start a streaming worker; frames arrive on the returned channel until
    /// it is dropped or the feed ends
    pub fn spawn_feed(&self) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        let worker = FeedWorker::new(
            Arc::clone(&self.inner.sources),
            Arc::clone(&self.inner.opener),
            Arc::clone(&self.inner.pipeline),
            self.inner.jpeg_quality,
            self.inner.shutdown.child_token(),
        );
        info!("video feed started");
        tokio::spawn(worker.run(tx));
        rx
    }

    pub async fn current_source(&self) -> SourceDescriptor {
        self.inner.sources.current().await.1
    }

    pub async fn configure_source(&self, descriptor: SourceDescriptor) -> Result<u64> {
        self.inner.sources.configure(descriptor).await
    }

    /// Store an uploaded image or video and make it the active source
    pub async fn install_upload(&self, file_name: &str, data: &[u8]) -> Result<SourceUpdateResponse> {
        let file_name = sanitize_file_name(file_name)?;
        let path = self
            .inner
            .upload_dir
            .join(format!("{}_{}", uuid::Uuid::new_v4().simple(), file_name));

        tokio::fs::create_dir_all(&self.inner.upload_dir)
            .await
            .with_context(|| format!("failed to create {}", self.inner.upload_dir.display()))?;
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;

        let descriptor =
            SourceDescriptor::new(SourceKind::for_path(&path), path.to_string_lossy());
        let generation = match self.configure_source(descriptor.clone()).await {
            Ok(generation) => generation,
            Err(e) => {
                if let Err(remove) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %remove, "failed to remove rejected upload");
                }
                return Err(e);
            }
        };

        info!(path = %path.display(), bytes = data.len(), "upload installed as source");
        Ok(SourceUpdateResponse {
            source: descriptor,
            generation,
        })
    }

    pub async fn latest_plate(&self) -> LatestPlateResponse {
        self.inner.pipeline.latest().response().await
    }

    pub async fn recent_plates(&self, limit: u32) -> Result<Vec<PlateRecord>> {
        self.store().recent(limit).await
    }

    pub async fn readiness(&self) -> Result<()> {
        self.store().health_check().await
    }

    pub async fn shutdown(&self) -> Result<()> {
        info!("stopping video feeds");
        self.inner.shutdown.cancel();
        Ok(())
    }
}

fn detector(name: &str, path: &Path, config: &LprServiceConfig) -> Arc<dyn Detector> {
    let mut yolo = YoloConfig::new(path.to_string_lossy());
    yolo.layout = config.model_layout;
    yolo.input_size = config.model_input_size;
    yolo.confidence_threshold = config.model_confidence;
    yolo.iou_threshold = config.model_iou;
    Arc::new(OnnxYoloDetector::new(name, yolo))
}
