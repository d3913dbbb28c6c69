//! Application context and the four operator-facing operations.

use crate::config::Config;
use crate::error::WardenError;
use crate::terminal::{Key, Ui};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use warden_core::enrollment::{self, EnrollmentReport};
use warden_core::session::SessionSummary;
use warden_core::{
    FaceClassifier, FaceDetector, FaceRect, LabelStore, ModelStore, Person, RecognitionSession,
    ScrfdDetector, SessionEvent, Step, StoreError,
};
use warden_hw::{
    ActuationController, CameraError, DeactivationTimer, Delivery, FrameSource, HardwareLink,
};

/// Bounded wait for a key between frames.
const KEY_POLL: Duration = Duration::from_millis(1);

/// Result of an add-person run.
#[derive(Debug)]
pub struct CaptureReport {
    pub dir: PathBuf,
    pub captured: u32,
    /// Camera failure that ended capture after some images were saved.
    pub interrupted: Option<CameraError>,
    /// Retraining outcome; `None` when nothing was captured.
    pub training: Option<Result<EnrollmentReport, WardenError>>,
}

/// Everything a session needs, owned in one place.
pub struct App {
    config: Config,
    /// Loaded on first use.
    detector: Option<Box<dyn FaceDetector>>,
    classifier: Box<dyn FaceClassifier>,
    store: ModelStore,
    link: Arc<HardwareLink>,
    labels: Option<LabelStore>,
    pending: Vec<DeactivationTimer>,
}

impl App {
    pub fn new(
        config: Config,
        classifier: Box<dyn FaceClassifier>,
        link: Arc<HardwareLink>,
    ) -> Self {
        let store = ModelStore::new(&config.model_dir);
        Self {
            config,
            detector: None,
            classifier,
            store,
            link,
            labels: None,
            pending: Vec::new(),
        }
    }

    /// Use `detector` instead of loading the configured model.
    pub fn with_detector(mut self, detector: Box<dyn FaceDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Rebuild the model from the enrollment folder.
    pub fn run_enrollment(&mut self) -> Result<EnrollmentReport, WardenError> {
        // A failed run must not leave a half-trained classifier in use.
        self.labels = None;
        let detector = detector_in(&mut self.detector, &self.config)?;
        let report = warden_core::run_enrollment(
            &self.config.enrollment_root,
            detector,
            self.classifier.as_mut(),
            &self.store,
        )?;
        self.labels = Some(report.labels.clone());
        Ok(report)
    }

    /// Make sure a trained pair is loaded, training once if none exists.
    pub fn ensure_model(&mut self) -> Result<(), WardenError> {
        if self.labels.is_some() && self.classifier.is_trained() {
            return Ok(());
        }
        match self.store.load(self.classifier.as_mut()) {
            Ok(model) => {
                self.labels = Some(model.labels);
                Ok(())
            }
            Err(StoreError::NotTrained(dir)) => {
                tracing::warn!(
                    dir = %dir.display(),
                    "no trained model, training from enrollment folder"
                );
                println!(
                    "No trained model found. Training from {} ...",
                    self.config.enrollment_root.display()
                );
                self.run_enrollment().map(|_| ())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Run one live recognition session until the operator quits.
    pub fn run_recognition_session(
        &mut self,
        source: &mut dyn FrameSource,
        ui: &mut dyn Ui,
    ) -> Result<SessionSummary, WardenError> {
        self.reap_timers();
        self.ensure_model()?;
        let detector = detector_in(&mut self.detector, &self.config)?;
        let Some(labels) = self.labels.as_ref() else {
            return Err(WardenError::NotTrained(self.store.dir().to_path_buf()));
        };

        let delay = self.config.deactivate_after();
        let mut controller = ActuationController::new(Arc::clone(&self.link), delay);
        let mut session = RecognitionSession::new(
            detector,
            self.classifier.as_ref(),
            labels,
            self.config.confidence_threshold,
        );
        let result = drive_session(&mut session, source, ui, &mut |_: &Person| {
            controller.on_locked();
        });
        if let Some(timer) = controller.into_pending() {
            self.pending.push(timer);
        }

        if let Ok(summary) = &result {
            tracing::info!(
                frames = summary.frames,
                person = summary.person.as_ref().map(|p| p.name.as_str()),
                "recognition session ended"
            );
        }
        result
    }

    /// Capture frames of a new person, then retrain.
    ///
    /// A capture is accepted only while a face is in view. Images are
    /// stored as `<enrollment_root>/<name>/<n>.jpg`. A camera failure after
    /// the first capture ends the capture early but still retrains.
    pub fn add_person(
        &mut self,
        name: &str,
        source: &mut dyn FrameSource,
        ui: &mut dyn Ui,
    ) -> Result<CaptureReport, WardenError> {
        let dir = enrollment::person_dir(&self.config.enrollment_root, name)?;
        let mut index = enrollment::next_capture_index(&dir)?;
        let target = self.config.capture_count;
        let detector = detector_in(&mut self.detector, &self.config)?;
        let mut captured = 0;
        let mut interrupted = None;

        while captured < target {
            let frame = match source.next_frame() {
                Ok(frame) => frame,
                Err(e) if captured > 0 => {
                    tracing::warn!(error = %e, captured, "camera failed, keeping captured images");
                    interrupted = Some(e);
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            let faces = detector.detect_faces(&frame.image).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "detection failed during capture");
                Vec::new()
            });
            let face: Option<&FaceRect> = faces.iter().min_by_key(|r| (r.x, r.y));
            ui.show_capture(&frame.image, face, captured, target)?;

            match ui.poll_key(KEY_POLL)? {
                Some(Key::Capture) if face.is_some() => {
                    let path = enrollment::save_capture(&dir, index, &frame.image)?;
                    tracing::info!(path = %path.display(), n = captured + 1, "image captured");
                    index += 1;
                    captured += 1;
                }
                Some(Key::Capture) => tracing::debug!("capture ignored, no face in view"),
                Some(Key::Finish) | Some(Key::Quit) => break,
                None => {}
            }
        }

        let training = (captured > 0).then(|| self.run_enrollment());
        Ok(CaptureReport {
            dir,
            captured,
            interrupted,
            training,
        })
    }

    /// Switch the indicator on for the configured hold, then off.
    pub fn test_hardware_link(&self) -> Result<Delivery, WardenError> {
        Ok(self.link.self_test(self.config.link_test_hold())?)
    }

    fn reap_timers(&mut self) {
        self.pending.retain(|t| !t.is_finished());
    }

    /// Let pending deactivations fire, then release the link.
    pub fn shutdown(mut self) {
        self.reap_timers();
        if !self.pending.is_empty() {
            println!("Waiting for the indicator to switch off ...");
        }
        for timer in self.pending.drain(..) {
            timer.wait();
        }
        self.link.close();
    }
}

/// The detector in `slot`, loading the configured model if it is empty.
fn detector_in<'a>(
    slot: &'a mut Option<Box<dyn FaceDetector>>,
    config: &Config,
) -> Result<&'a mut dyn FaceDetector, WardenError> {
    let detector: Box<dyn FaceDetector> = match slot.take() {
        Some(detector) => detector,
        None => {
            let path = &config.detector_model;
            let detector = ScrfdDetector::load(path, config.min_face_size).map_err(|source| {
                WardenError::DetectorUnavailable {
                    path: path.clone(),
                    source,
                }
            })?;
            Box::new(detector)
        }
    };
    Ok(slot.insert(detector).as_mut())
}

/// Pump frames and key presses through the session until it stops.
fn drive_session(
    session: &mut RecognitionSession<'_>,
    source: &mut dyn FrameSource,
    ui: &mut dyn Ui,
    on_locked: &mut dyn FnMut(&Person),
) -> Result<SessionSummary, WardenError> {
    loop {
        if ui.poll_key(KEY_POLL)? == Some(Key::Quit) {
            match session.handle(SessionEvent::Cancel, on_locked) {
                Step::Stop(summary) => return Ok(summary),
                Step::Continue(_) => continue,
            }
        }

        let frame = source.next_frame()?;
        let event = SessionEvent::Frame {
            image: &frame.image,
            at: frame.timestamp,
        };
        match session.handle(event, on_locked) {
            Step::Continue(report) => {
                if let Some(person) = &report.locked_now {
                    tracing::info!(person = %person.name, "authorized person identified");
                }
                ui.show_recognition(&frame.image, &report)?;
            }
            Step::Stop(summary) => return Ok(summary),
        }
    }
}
