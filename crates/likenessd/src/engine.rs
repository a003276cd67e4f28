use crate::config::Config;
use likeness_core::{
    ArtifactError, Comparison, ComparisonContext, ErrorKind, FaceDetect, FaceDetector, Failed, Pipeline, RawImage,
};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] likeness_core::detector::DetectorError),
    #[error(transparent)]
    Failed(#[from] Failed),
    #[error("engine unavailable: {0}")]
    Unavailable(String),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread panicked: {0}")]
    Panicked(String),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl EngineError {
    /// True when the failure means the models are missing rather than the
    /// request being bad.
    pub fn models_unavailable(&self) -> bool {
        match self {
            EngineError::Unavailable(_) => true,
            EngineError::Failed(f) => f.kind() == ErrorKind::ModelsUnavailable,
            _ => false,
        }
    }
}

/// What the daemon managed to load at startup.
#[derive(Debug, Clone, Default)]
pub struct EngineStatus {
    pub model_loaded: bool,
    pub model_type: Option<String>,
    pub scaler_type: Option<String>,
}

impl EngineStatus {
    fn from_context(context: Option<&ComparisonContext>) -> Self {
        match context {
            Some(ctx) => Self {
                model_loaded: true,
                model_type: Some(ctx.classifier().kind().to_string()),
                scaler_type: Some(format!("standard_scaler[{}]", ctx.scaler().n_features())),
            },
            None => Self::default(),
        }
    }
}

/// Messages sent from HTTP handlers to an engine thread.
enum EngineRequest {
    Compare {
        before: RawImage,
        after: RawImage,
        reply: oneshot::Sender<Result<Comparison, EngineError>>,
    },
}

/// Clone-safe handle to the engine threads.
#[derive(Clone)]
pub struct EngineHandle {
    workers: Arc<[mpsc::Sender<EngineRequest>]>,
    next: Arc<AtomicUsize>,
    status: Arc<EngineStatus>,
    reason: Option<Arc<str>>,
}

impl EngineHandle {
    /// A handle with no engine behind it; every comparison fails as unavailable.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            workers: Arc::from(Vec::new()),
            next: Arc::new(AtomicUsize::new(0)),
            status: Arc::new(EngineStatus::default()),
            reason: Some(Arc::from(reason.into())),
        }
    }

    pub fn status(&self) -> &EngineStatus {
        &self.status
    }

    /// Request a comparison from the next engine thread in turn.
    ///
    /// Threads whose queue has closed are skipped; the request only fails
    /// with `ChannelClosed` when no thread is left.
    pub async fn compare(&self, before: RawImage, after: RawImage) -> Result<Comparison, EngineError> {
        if self.workers.is_empty() {
            let reason = self.reason.as_deref().unwrap_or("no engine threads");
            return Err(EngineError::Unavailable(reason.to_string()));
        }
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        let mut request = EngineRequest::Compare {
            before,
            after,
            reply: reply_tx,
        };
        for offset in 0..self.workers.len() {
            let index = (start + offset) % self.workers.len();
            match self.workers[index].send(request).await {
                Ok(()) => return reply_rx.await.map_err(|_| EngineError::ChannelClosed)?,
                Err(mpsc::error::SendError(returned)) => {
                    tracing::warn!(worker = index, "engine thread is gone, trying the next one");
                    request = returned;
                }
            }
        }
        Err(EngineError::ChannelClosed)
    }
}

/// Load the artifacts and one detector per worker, then start the engine threads.
///
/// Missing classifier or scaler artifacts are logged and tolerated: the
/// engine still runs and answers every comparison with `ModelsUnavailable`.
/// A detector that cannot be loaded is fatal.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let artifacts = &config.artifacts;
    let context = match ComparisonContext::load_from(artifacts) {
        Ok(ctx) => {
            tracing::info!(
                classifier = %artifacts.classifier().display(),
                scaler = %artifacts.scaler().display(),
                kind = ctx.classifier().kind(),
                "comparison artifacts loaded"
            );
            Some(Arc::new(ctx))
        }
        Err(err) => {
            log_artifact_error(&err);
            None
        }
    };

    let detector_path = artifacts.detector();
    let mut pipelines = Vec::with_capacity(config.workers);
    for _ in 0..config.workers.max(1) {
        let detector = FaceDetector::load(&detector_path)?;
        pipelines.push(match &context {
            Some(ctx) => Pipeline::new(detector, Arc::clone(ctx)),
            None => Pipeline::without_models(detector),
        });
    }
    tracing::info!(path = %detector_path.display(), workers = pipelines.len(), "SCRFD detector loaded");

    let status = EngineStatus::from_context(context.as_deref());
    spawn_workers(pipelines, status)
}

fn log_artifact_error(err: &ArtifactError) {
    tracing::error!(error = %err, "failed to load comparison artifacts; comparisons will be refused");
}

/// Start one OS thread per pipeline, each draining its own request queue.
pub fn spawn_workers<D>(pipelines: Vec<Pipeline<D>>, status: EngineStatus) -> Result<EngineHandle, EngineError>
where
    D: FaceDetect + 'static,
{
    let mut senders = Vec::with_capacity(pipelines.len());
    for (i, mut pipeline) in pipelines.into_iter().enumerate() {
        let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
        std::thread::Builder::new()
            .name(format!("likeness-engine-{i}"))
            .spawn(move || {
                tracing::info!(worker = i, "engine thread started");
                while let Some(req) = rx.blocking_recv() {
                    match req {
                        EngineRequest::Compare { before, after, reply } => {
                            let attempt = AssertUnwindSafe(|| pipeline.compare(&before, &after));
                            let result = std::panic::catch_unwind(attempt)
                                .map_err(|payload| {
                                    let message = panic_message(payload.as_ref());
                                    tracing::error!(worker = i, panic = %message, "comparison panicked");
                                    EngineError::Panicked(message)
                                })
                                .and_then(|r| r.map_err(EngineError::from));
                            let _ = reply.send(result);
                        }
                    }
                }
                tracing::info!(worker = i, "engine thread exiting");
            })
            .map_err(EngineError::Spawn)?;
        senders.push(tx);
    }

    Ok(EngineHandle {
        workers: Arc::from(senders),
        next: Arc::new(AtomicUsize::new(0)),
        status: Arc::new(status),
        reason: None,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use likeness_core::classifier::LogisticRegression;
    use likeness_core::descriptor::FEATURE_LEN;
    use likeness_core::detector::DetectorError;
    use likeness_core::{BoundingBox, StandardScaler};

    /// Finds a face covering the whole image unless it is uniformly black.
    pub(crate) struct WholeImageDetector;

    impl FaceDetect for WholeImageDetector {
        fn detect(&mut self, image: &RawImage) -> Result<Vec<BoundingBox>, DetectorError> {
            if image.as_rgb().pixels().all(|p| p.0 == [0, 0, 0]) {
                return Ok(vec![]);
            }
            Ok(vec![BoundingBox {
                x: 0.0,
                y: 0.0,
                width: image.width() as f32,
                height: image.height() as f32,
                confidence: 0.9,
                landmarks: None,
            }])
        }
    }

    pub(crate) fn test_context() -> Arc<ComparisonContext> {
        let scaler = StandardScaler::new(vec![0.02; FEATURE_LEN], vec![0.5; FEATURE_LEN]).unwrap();
        let classifier = LogisticRegression { coef: vec![-0.05; FEATURE_LEN], intercept: 0.5, threshold: 0.5 };
        Arc::new(ComparisonContext::for_face_pairs(scaler, Box::new(classifier)).unwrap())
    }

    /// Two engine threads sharing one context.
    pub(crate) fn test_engine() -> EngineHandle {
        let ctx = test_context();
        let status = EngineStatus::from_context(Some(&ctx));
        let pipelines = (0..2).map(|_| Pipeline::new(WholeImageDetector, Arc::clone(&ctx))).collect();
        spawn_workers(pipelines, status).unwrap()
    }

    #[tokio::test]
    async fn test_compare_round_trip() {
        let engine = test_engine();
        let img = RawImage::filled(64, 64, [128, 128, 128]).unwrap();
        for _ in 0..4 {
            let result = engine.compare(img.clone(), img.clone()).await.unwrap();
            assert!(result.decision.same_person);
        }
        assert_eq!(engine.next.load(Ordering::Relaxed), 4);
        assert!(engine.status().model_loaded);
        assert_eq!(engine.status().model_type.as_deref(), Some("logistic_regression"));
    }

    #[tokio::test]
    async fn test_no_face_is_reported() {
        let engine = test_engine();
        let gray = RawImage::filled(64, 64, [128, 128, 128]).unwrap();
        let black = RawImage::filled(64, 64, [0, 0, 0]).unwrap();
        let err = engine.compare(gray, black).await.unwrap_err();
        match err {
            EngineError::Failed(f) => assert_eq!(f.kind(), ErrorKind::NoFaceDetected),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_without_models_is_unavailable() {
        let pipelines = vec![Pipeline::without_models(WholeImageDetector)];
        let engine = spawn_workers(pipelines, EngineStatus::default()).unwrap();
        let img = RawImage::filled(32, 32, [100, 100, 100]).unwrap();
        let err = engine.compare(img.clone(), img).await.unwrap_err();
        assert!(err.models_unavailable());
        assert!(!engine.status().model_loaded);
    }

    #[tokio::test]
    async fn test_unavailable_handle() {
        let engine = EngineHandle::unavailable("detector missing");
        let img = RawImage::filled(8, 8, [1, 2, 3]).unwrap();
        let err = engine.compare(img.clone(), img).await.unwrap_err();
        assert!(err.models_unavailable());
        assert!(err.to_string().contains("detector missing"));
    }

    /// Panics on any image exactly 13 pixels wide, finds a full-image face otherwise.
    struct FragileDetector;

    impl FaceDetect for FragileDetector {
        fn detect(&mut self, image: &RawImage) -> Result<Vec<BoundingBox>, DetectorError> {
            if image.width() == 13 {
                panic!("detector state corrupted");
            }
            WholeImageDetector.detect(image)
        }
    }

    #[tokio::test]
    async fn test_panic_is_reported_and_thread_survives() {
        let ctx = test_context();
        let status = EngineStatus::from_context(Some(&ctx));
        let engine = spawn_workers(vec![Pipeline::new(FragileDetector, ctx)], status).unwrap();

        let bad = RawImage::filled(13, 13, [128, 128, 128]).unwrap();
        let err = engine.compare(bad.clone(), bad).await.unwrap_err();
        assert!(matches!(&err, EngineError::Panicked(msg) if msg.contains("detector state corrupted")));
        assert!(!err.models_unavailable());

        let good = RawImage::filled(64, 64, [128, 128, 128]).unwrap();
        let result = engine.compare(good.clone(), good).await.unwrap();
        assert!(result.decision.same_person);
    }

    #[tokio::test]
    async fn test_dead_worker_is_skipped() {
        let live = test_engine();
        let (dead_tx, dead_rx) = mpsc::channel::<EngineRequest>(1);
        drop(dead_rx);
        let mut workers: Vec<mpsc::Sender<EngineRequest>> = vec![dead_tx];
        workers.extend(live.workers.iter().cloned());
        let engine = EngineHandle {
            workers: Arc::from(workers),
            next: Arc::new(AtomicUsize::new(0)),
            status: Arc::clone(&live.status),
            reason: None,
        };

        let img = RawImage::filled(64, 64, [128, 128, 128]).unwrap();
        for _ in 0..6 {
            assert!(engine.compare(img.clone(), img.clone()).await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_all_workers_dead() {
        let (dead_tx, dead_rx) = mpsc::channel::<EngineRequest>(1);
        drop(dead_rx);
        let engine = EngineHandle {
            workers: Arc::from(vec![dead_tx]),
            next: Arc::new(AtomicUsize::new(0)),
            status: Arc::new(EngineStatus::default()),
            reason: None,
        };
        let img = RawImage::filled(8, 8, [128, 128, 128]).unwrap();
        let err = engine.compare(img.clone(), img).await.unwrap_err();
        assert!(matches!(err, EngineError::ChannelClosed));
    }
}
