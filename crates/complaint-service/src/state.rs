use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::complaints::{
    CameraStartResponse, CaptureRequest, CaptureResponse, GeoLocation, ImageSourceKind, ModelInfo,
    SessionView, SubmissionReceipt, UpdateFieldsRequest, UploadRequest, ValidationReport,
};
use common::validation::{validate_coordinates, MAX_UPLOAD_BYTES};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::capture::camera::SharedCamera;
use crate::capture::{CaptureController, CapturedImage, ConfiguredGeolocator, Geolocator, ImageSource};
use crate::classifier::ImageClassifier;
use crate::error::{ComplaintError, ComplaintResult};
use crate::form::ComplaintDraft;
use crate::geocode::Geocoder;
use crate::validation::{self, ValidationPolicy};

/// One user's interaction with the complaint form
pub struct FormSession {
    id: Uuid,
    draft: ComplaintDraft,
    capture: CaptureController,
    /// Most recent user-visible error
    last_error: Option<String>,
    validating: Arc<AtomicBool>,
    /// Cancels background address lookups when the session ends
    background: CancellationToken,
    last_activity: Instant,
}

impl FormSession {
    fn new(id: Uuid, camera: SharedCamera) -> Self {
        Self {
            id,
            draft: ComplaintDraft::new(),
            capture: CaptureController::new(camera),
            last_error: None,
            validating: Arc::new(AtomicBool::new(false)),
            background: CancellationToken::new(),
            last_activity: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn is_idle(&self, now: Instant, ttl: Duration) -> bool {
        !self.validating.load(Ordering::SeqCst)
            && now.saturating_duration_since(self.last_activity) >= ttl
    }

    /// Store a failed outcome in the error slot and hand it back
    fn record<T>(&mut self, result: ComplaintResult<T>) -> ComplaintResult<T> {
        if let Err(e) = &result {
            if e.is_user_visible() {
                self.last_error = Some(e.to_string());
            }
        }
        result
    }

    /// Release the camera and stop background work
    fn close(&mut self) {
        self.background.cancel();
        self.capture.stop();
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            session_id: self.id,
            title: self.draft.title().to_string(),
            description: self.draft.description().to_string(),
            manual_address: self.draft.manual_address().to_string(),
            detected_address: self.draft.detected_address().map(str::to_string),
            location: self.draft.location(),
            images: self.draft.image_summaries(),
            valid: self.draft.is_valid(),
            result: self.draft.result().cloned(),
            last_error: self.last_error.clone(),
            camera: self.capture.state(),
            validating: self.validating.load(Ordering::SeqCst),
        }
    }
}

/// Marks a session as validating until dropped
struct ValidationGuard {
    flag: Arc<AtomicBool>,
}

impl ValidationGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { flag: flag.clone() })
    }
}

impl Drop for ValidationGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct ComplaintServiceState {
    inner: Arc<ComplaintServiceStateInner>,
}

struct ComplaintServiceStateInner {
    node_id: String,
    policy: ValidationPolicy,
    classifier: Option<Arc<dyn ImageClassifier>>,
    model_error: Option<ComplaintError>,
    camera: SharedCamera,
    geolocator: Arc<dyn Geolocator>,
    geocoder: Option<Arc<dyn Geocoder>>,
    sessions: RwLock<HashMap<Uuid, Arc<Mutex<FormSession>>>>,
    /// Stops the idle-session reaper
    reaper: CancellationToken,
}

pub struct ComplaintServiceStateBuilder {
    node_id: String,
    policy: ValidationPolicy,
    classifier: Option<Arc<dyn ImageClassifier>>,
    model_error: Option<ComplaintError>,
    camera: SharedCamera,
    geolocator: Arc<dyn Geolocator>,
    geocoder: Option<Arc<dyn Geocoder>>,
}

impl ComplaintServiceStateBuilder {
    pub fn policy(mut self, policy: ValidationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn ImageClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Why the classifier could not be loaded; shown to every new session
    pub fn model_error(mut self, error: ComplaintError) -> Self {
        self.model_error = Some(error);
        self
    }

    pub fn camera(mut self, camera: SharedCamera) -> Self {
        self.camera = camera;
        self
    }

    pub fn geolocator(mut self, geolocator: Arc<dyn Geolocator>) -> Self {
        self.geolocator = geolocator;
        self
    }

    pub fn geocoder(mut self, geocoder: Arc<dyn Geocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    pub fn build(self) -> ComplaintServiceState {
        ComplaintServiceState {
            inner: Arc::new(ComplaintServiceStateInner {
                node_id: self.node_id,
                policy: self.policy,
                classifier: self.classifier,
                model_error: self.model_error,
                camera: self.camera,
                geolocator: self.geolocator,
                geocoder: self.geocoder,
                sessions: RwLock::new(HashMap::new()),
                reaper: CancellationToken::new(),
            }),
        }
    }
}

impl ComplaintServiceState {
    pub fn builder(node_id: impl Into<String>) -> ComplaintServiceStateBuilder {
        ComplaintServiceStateBuilder {
            node_id: node_id.into(),
            policy: ValidationPolicy::default(),
            classifier: None,
            model_error: None,
            camera: SharedCamera::unsupported(),
            geolocator: Arc::new(ConfiguredGeolocator::new(None)),
            geocoder: None,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    pub fn policy(&self) -> &ValidationPolicy {
        &self.inner.policy
    }

    /// Ready once a classifier is loaded and reports healthy
    pub async fn is_ready(&self) -> bool {
        match &self.inner.classifier {
            Some(classifier) => classifier.health_check().await.unwrap_or(false),
            None => false,
        }
    }

    pub fn model_info(&self) -> ComplaintResult<ModelInfo> {
        match &self.inner.classifier {
            Some(classifier) => Ok(classifier.info()),
            None => Err(self
                .inner
                .model_error
                .clone()
                .unwrap_or_else(|| ComplaintError::ModelLoad("no classifier configured".to_string()))),
        }
    }

    pub async fn session_count(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    async fn session(&self, id: Uuid) -> ComplaintResult<Arc<Mutex<FormSession>>> {
        let sessions = self.inner.sessions.read().await;
        sessions
            .get(&id)
            .cloned()
            .ok_or(ComplaintError::SessionNotFound(id))
    }

    /// Lock a session and mark it as in use
    async fn lock(&self, id: Uuid) -> ComplaintResult<OwnedMutexGuard<FormSession>> {
        let session = self.session(id).await?;
        let mut session = session.lock_owned().await;
        session.touch();
        Ok(session)
    }

    pub async fn create_session(&self) -> Uuid {
        let id = Uuid::new_v4();
        let mut session = FormSession::new(id, self.inner.camera.clone());
        if let Some(error) = &self.inner.model_error {
            session.last_error = Some(error.to_string());
        }

        {
            let mut sessions = self.inner.sessions.write().await;
            sessions.insert(id, Arc::new(Mutex::new(session)));
        }
        telemetry::metrics::COMPLAINT_ACTIVE_SESSIONS.inc();

        info!(session_id = %id, "form session opened");
        id
    }

    /// Drop a session and release its camera
    pub async fn end_session(&self, id: Uuid) -> ComplaintResult<()> {
        let session = {
            let mut sessions = self.inner.sessions.write().await;
            sessions.remove(&id)
        }
        .ok_or(ComplaintError::SessionNotFound(id))?;

        session.lock().await.close();
        telemetry::metrics::COMPLAINT_ACTIVE_SESSIONS.dec();

        info!(session_id = %id, "form session ended");
        Ok(())
    }

    pub async fn session_view(&self, id: Uuid) -> ComplaintResult<SessionView> {
        let session = self.lock(id).await?;
        Ok(session.view())
    }

    pub async fn update_fields(
        &self,
        id: Uuid,
        request: UpdateFieldsRequest,
    ) -> ComplaintResult<SessionView> {
        let mut session = self.lock(id).await?;

        let outcome = session.draft.update_fields(
            request.title,
            request.description,
            request.manual_address,
        );
        session.record(outcome)?;
        Ok(session.view())
    }

    pub async fn start_camera(&self, id: Uuid) -> ComplaintResult<CameraStartResponse> {
        let mut session = self.lock(id).await?;

        let outcome = session.capture.start().await;
        let device = session.record(outcome)?;
        Ok(CameraStartResponse {
            device_id: device.id,
            label: device.label,
        })
    }

    pub async fn stop_camera(&self, id: Uuid) -> ComplaintResult<SessionView> {
        let mut session = self.lock(id).await?;
        session.capture.stop();
        Ok(session.view())
    }

    /// Grab a frame from the session's camera and try to locate it.
    ///
    /// Failing to obtain a position or an address never fails the capture;
    /// the problem is reported as a warning and through the error slot.
    pub async fn capture(&self, id: Uuid, request: CaptureRequest) -> ComplaintResult<CaptureResponse> {
        let mut session = self.lock(id).await?;

        if let Some(position) = request.position {
            let checked = validate_coordinates(position.lat, position.lng)
                .map_err(ComplaintError::invalid_input);
            session.record(checked)?;
        }

        let outcome = session.capture.capture().await;
        record_capture(ImageSourceKind::Camera, outcome.is_ok());
        let image = session.record(outcome)?;
        let index = session.draft.add_image(image);

        let position = match request.position {
            Some(position) => Ok(position),
            None => self.inner.geolocator.current_position().await,
        };
        let (location, warning) = match position {
            Ok(location) => (Some(location), self.locate(&mut session, location)),
            Err(e) => {
                warn!(session_id = %id, error = %e, "no position for capture");
                session.last_error = Some(e.to_string());
                (None, Some(e.to_string()))
            }
        };

        debug!(session_id = %id, index, "image captured");
        Ok(CaptureResponse {
            index,
            image_count: session.draft.images().len(),
            location,
            warning,
        })
    }

    /// Add an uploaded image file to the draft
    pub async fn upload(&self, id: Uuid, request: UploadRequest) -> ComplaintResult<CaptureResponse> {
        let mut session = self.lock(id).await?;

        let UploadRequest { data, position } = request;
        let outcome = tokio::task::spawn_blocking(move || decode_upload(&data, position))
            .await
            .map_err(|e| ComplaintError::Internal(format!("upload decoding task failed: {}", e)))
            .and_then(|decoded| decoded);
        record_capture(ImageSourceKind::Upload, outcome.is_ok());
        let image = session.record(outcome)?;
        let index = session.draft.add_image(image);

        let warning = match position {
            Some(location) => self.locate(&mut session, location),
            None => None,
        };

        debug!(session_id = %id, index, "image uploaded");
        Ok(CaptureResponse {
            index,
            image_count: session.draft.images().len(),
            location: position,
            warning,
        })
    }

    /// Store the position and start resolving its address in the background
    fn locate(&self, session: &mut FormSession, location: GeoLocation) -> Option<String> {
        session.draft.set_location(location);

        match &self.inner.geocoder {
            Some(geocoder) => {
                let state = self.clone();
                let geocoder = geocoder.clone();
                let id = session.id;
                let token = session.background.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = token.cancelled() => {
                            debug!(session_id = %id, "address lookup cancelled");
                        }
                        _ = state.resolve_address(id, location, geocoder) => {}
                    }
                });
                None
            }
            None => {
                let error = ComplaintError::Geocode("geocoding not configured".to_string());
                session.last_error = Some(error.to_string());
                Some(error.to_string())
            }
        }
    }

    async fn resolve_address(&self, id: Uuid, location: GeoLocation, geocoder: Arc<dyn Geocoder>) {
        let outcome = geocoder.reverse_geocode(location).await;

        let Ok(session) = self.session(id).await else {
            debug!(session_id = %id, "session ended before its address was resolved");
            return;
        };
        let mut session = session.lock().await;
        if session.draft.location() != Some(location) {
            debug!(session_id = %id, "discarding address for a superseded position");
            return;
        }

        match outcome {
            Ok(address) => {
                info!(session_id = %id, address = %address, "address detected");
                session.draft.set_detected_address(address);
            }
            Err(e) => {
                session.last_error = Some(e.to_string());
            }
        }
    }

    pub async fn image_png(&self, id: Uuid, index: usize) -> ComplaintResult<Vec<u8>> {
        let session = self.lock(id).await?;
        let image = session.draft.image(index)?;
        Ok(image.png_bytes().to_vec())
    }

    pub async fn remove_image(&self, id: Uuid, index: usize) -> ComplaintResult<SessionView> {
        let mut session = self.lock(id).await?;

        let outcome = session.draft.remove_image(index).map(|_| ());
        session.record(outcome)?;
        Ok(session.view())
    }

    /// Run the validation pipeline over the session's current images.
    ///
    /// The run happens on its own task so it always completes and applies
    /// its verdict, even if the caller goes away. The session stays usable
    /// while it runs; a verdict for an image set that changed meanwhile is
    /// discarded.
    pub async fn validate(&self, id: Uuid) -> ComplaintResult<ValidationReport> {
        let session = self.session(id).await?;

        let (images, generation, guard) = {
            let mut locked = session.lock().await;
            locked.touch();
            let Some(guard) = ValidationGuard::acquire(&locked.validating) else {
                record_validation("rejected");
                return locked.record(Err(ComplaintError::ValidationInProgress));
            };
            (locked.draft.images().to_vec(), locked.draft.generation(), guard)
        };

        let state = self.clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            let outcome = validation::validate(
                &images,
                state.inner.classifier.as_deref(),
                &state.inner.policy,
            )
            .await;

            let mut locked = session.lock().await;
            match outcome {
                Ok(report) => {
                    if locked.draft.apply_verdict(generation, &report) {
                        record_validation(if report.verdict.is_allowed() {
                            "allowed"
                        } else {
                            "invalid"
                        });
                        locked.last_error = None;
                        Ok(report)
                    } else {
                        record_validation("stale");
                        locked.record(Err(ComplaintError::ImagesChanged))
                    }
                }
                Err(e) => {
                    record_validation("error");
                    locked.record(Err(e))
                }
            }
        });

        task.await
            .map_err(|e| ComplaintError::Internal(format!("validation task failed: {}", e)))?
    }

    /// Submit a validated draft; the session ends on success
    pub async fn submit(&self, id: Uuid) -> ComplaintResult<SubmissionReceipt> {
        let session = self.session(id).await?;

        let receipt = {
            let mut locked = session.lock().await;
            let outcome = locked.draft.submit();
            let receipt = match locked.record(outcome) {
                Ok(receipt) => receipt,
                Err(e) => {
                    telemetry::metrics::COMPLAINT_SUBMISSIONS
                        .with_label_values(&["rejected"])
                        .inc();
                    return Err(e);
                }
            };
            locked.capture.stop();
            receipt
        };

        // the session may already be gone if it was ended concurrently
        if let Err(e) = self.end_session(id).await {
            debug!(session_id = %id, error = %e, "session already ended at submission");
        }
        telemetry::metrics::COMPLAINT_SUBMISSIONS
            .with_label_values(&["accepted"])
            .inc();

        info!(
            session_id = %id,
            complaint_id = %receipt.complaint_id,
            title = %receipt.title,
            address = %receipt.address,
            images = receipt.image_count,
            "complaint submitted"
        );
        Ok(receipt)
    }

    /// Close sessions that have not been used for `ttl`, releasing their
    /// camera. Sessions busy with a request or a validation run are kept.
    pub async fn reap_idle(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<(Uuid, Arc<Mutex<FormSession>>)> = {
            let mut sessions = self.inner.sessions.write().await;
            let stale: Vec<Uuid> = sessions
                .iter()
                .filter(|(_, session)| {
                    session
                        .try_lock()
                        .map(|session| session.is_idle(now, ttl))
                        .unwrap_or(false)
                })
                .map(|(id, _)| *id)
                .collect();
            stale
                .into_iter()
                .filter_map(|id| sessions.remove(&id).map(|session| (id, session)))
                .collect()
        };

        for (id, session) in &expired {
            session.lock().await.close();
            telemetry::metrics::COMPLAINT_ACTIVE_SESSIONS.dec();
            info!(session_id = %id, idle_secs = ttl.as_secs(), "idle form session closed");
        }
        expired.len()
    }

    /// Periodically close idle sessions until shutdown
    pub fn spawn_reaper(&self, ttl: Duration) -> JoinHandle<()> {
        let state = self.clone();
        let token = self.inner.reaper.clone();
        let interval = (ttl / 4).max(Duration::from_millis(10));

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("session reaper stopped");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        let closed = state.reap_idle(ttl).await;
                        if closed > 0 {
                            debug!(closed, "idle sessions reaped");
                        }
                    }
                }
            }
        })
    }

    /// End every session, releasing the camera
    pub async fn shutdown(&self) {
        self.inner.reaper.cancel();
        let drained = {
            let mut sessions = self.inner.sessions.write().await;
            std::mem::take(&mut *sessions)
        };
        for (id, session) in drained {
            session.lock().await.close();
            telemetry::metrics::COMPLAINT_ACTIVE_SESSIONS.dec();
            debug!(session_id = %id, "session closed on shutdown");
        }
        info!(node_id = %self.inner.node_id, "all form sessions closed");
    }
}

fn decode_upload(data: &str, position: Option<GeoLocation>) -> ComplaintResult<CapturedImage> {
    // accept both bare base64 and data URLs
    let encoded = match data.split_once(',') {
        Some((prefix, payload)) if prefix.starts_with("data:") => payload,
        _ => data,
    };
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| ComplaintError::InvalidInput(format!("upload is not valid base64: {}", e)))?;
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(ComplaintError::InvalidInput(format!(
            "upload exceeds maximum size of {} bytes (got {})",
            MAX_UPLOAD_BYTES,
            bytes.len()
        )));
    }
    if let Some(position) = position {
        validate_coordinates(position.lat, position.lng).map_err(ComplaintError::invalid_input)?;
    }
    CapturedImage::from_source(ImageSource::Upload(bytes))
}

fn record_capture(source: ImageSourceKind, ok: bool) {
    let source = match source {
        ImageSourceKind::Camera => "camera",
        ImageSourceKind::Upload => "upload",
    };
    telemetry::metrics::COMPLAINT_CAPTURES
        .with_label_values(&[source, if ok { "success" } else { "error" }])
        .inc();
}

fn record_validation(outcome: &str) {
    telemetry::metrics::COMPLAINT_VALIDATIONS
        .with_label_values(&[outcome])
        .inc();
}
