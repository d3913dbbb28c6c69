//! Live recognition state machine.
//!
//! A session starts `Idle` and moves to `Locked` on the first face whose
//! prediction is below the confidence threshold and whose label is known.
//! `Locked` is terminal: no further inference runs, no further lock
//! callbacks fire, and every later face is annotated with the locked name.
//! Only a [`SessionEvent::Cancel`] ends the session.

use crate::classifier::FaceClassifier;
use crate::detector::FaceDetector;
use crate::labels::LabelStore;
use crate::types::{FaceRect, Person};
use image::GrayImage;
use std::time::{Duration, Instant};

/// Default confidence threshold; predictions must be strictly below it.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 70.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Locked { person: Person, locked_at: Instant },
}

/// What to draw next to one detected face.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaceLabel {
    /// Evaluated and rejected. `strength` is `100 - confidence`.
    Unknown { strength: i64 },
    /// The face that caused the lock, in the frame where it happened.
    Recognized { name: String, strength: i64 },
    /// Session already locked; no inference was run for this face.
    Locked { name: String },
    /// The classifier failed on this crop.
    Unclassified,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FaceAnnotation {
    pub rect: FaceRect,
    pub label: FaceLabel,
}

impl FaceAnnotation {
    /// Whether the rectangle is drawn in the locked colour.
    pub fn is_locked(&self) -> bool {
        matches!(self.label, FaceLabel::Recognized { .. } | FaceLabel::Locked { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Awaiting,
    Identified { name: String, elapsed: Duration },
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Awaiting => write!(f, "awaiting recognition..."),
            Status::Identified { name, elapsed } => {
                write!(f, "identified: {name} ({}s ago)", elapsed.as_secs())
            }
        }
    }
}

impl std::fmt::Display for FaceLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FaceLabel::Unknown { strength } => write!(f, "Unknown ({strength}%)"),
            FaceLabel::Recognized { name, strength } => write!(f, "{name} ({strength}%)"),
            FaceLabel::Locked { name } => write!(f, "{name}"),
            FaceLabel::Unclassified => write!(f, "?"),
        }
    }
}

/// Everything the renderer needs for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub faces: Vec<FaceAnnotation>,
    pub status: Status,
    /// Set only on the frame where `Idle → Locked` happened.
    pub locked_now: Option<Person>,
}

pub enum SessionEvent<'f> {
    Frame { image: &'f GrayImage, at: Instant },
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub person: Option<Person>,
    pub frames: u64,
}

pub enum Step {
    Continue(FrameReport),
    Stop(SessionSummary),
}

/// One run of the live recognition loop.
pub struct RecognitionSession<'a> {
    detector: &'a mut dyn FaceDetector,
    classifier: &'a dyn FaceClassifier,
    labels: &'a LabelStore,
    threshold: f64,
    state: SessionState,
    frames: u64,
}

impl<'a> RecognitionSession<'a> {
    pub fn new(
        detector: &'a mut dyn FaceDetector,
        classifier: &'a dyn FaceClassifier,
        labels: &'a LabelStore,
        threshold: f64,
    ) -> Self {
        Self {
            detector,
            classifier,
            labels,
            threshold,
            state: SessionState::Idle,
            frames: 0,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn locked_person(&self) -> Option<&Person> {
        match &self.state {
            SessionState::Locked { person, .. } => Some(person),
            SessionState::Idle => None,
        }
    }

    /// Feed one event. `on_locked` runs synchronously, at most once per
    /// session, at the moment of the lock.
    pub fn handle(&mut self, event: SessionEvent<'_>, on_locked: &mut dyn FnMut(&Person)) -> Step {
        match event {
            SessionEvent::Frame { image, at } => {
                let faces = match self.detector.detect_faces(image) {
                    Ok(faces) => faces,
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            frame = self.frames,
                            "detection failed; frame skipped"
                        );
                        Vec::new()
                    }
                };
                Step::Continue(self.process_frame(image, faces, at, on_locked))
            }
            SessionEvent::Cancel => {
                tracing::info!(
                    frames = self.frames,
                    person = self.locked_person().map(|p| p.name.as_str()),
                    "session cancelled"
                );
                Step::Stop(SessionSummary {
                    person: self.locked_person().cloned(),
                    frames: self.frames,
                })
            }
        }
    }

    /// Evaluate detected faces for one frame.
    ///
    /// Faces are considered leftmost first (then topmost), so the winner
    /// among several simultaneous candidates does not depend on detector
    /// output order.
    pub fn process_frame(
        &mut self,
        image: &GrayImage,
        mut faces: Vec<FaceRect>,
        at: Instant,
        on_locked: &mut dyn FnMut(&Person),
    ) -> FrameReport {
        self.frames += 1;
        faces.sort_by_key(|r| (r.x, r.y));

        let mut locked_now = None;
        let mut annotations = Vec::with_capacity(faces.len());

        for rect in faces {
            if let Some(person) = self.locked_person() {
                let label = FaceLabel::Locked {
                    name: person.name.clone(),
                };
                annotations.push(FaceAnnotation { rect, label });
                continue;
            }

            let (label, matched) = self.evaluate(image, &rect);
            if let Some(person) = matched {
                tracing::info!(
                    person = %person.name,
                    label = person.label,
                    frame = self.frames,
                    "person locked"
                );
                self.state = SessionState::Locked {
                    person: person.clone(),
                    locked_at: at,
                };
                on_locked(&person);
                locked_now = Some(person);
            }
            annotations.push(FaceAnnotation { rect, label });
        }

        let status = match &self.state {
            SessionState::Idle => Status::Awaiting,
            SessionState::Locked { person, locked_at } => Status::Identified {
                name: person.name.clone(),
                elapsed: at.saturating_duration_since(*locked_at),
            },
        };

        FrameReport {
            faces: annotations,
            status,
            locked_now,
        }
    }

    /// Classify one face; the person is returned only when it is accepted.
    fn evaluate(&self, image: &GrayImage, rect: &FaceRect) -> (FaceLabel, Option<Person>) {
        let Some(crop) = rect.crop(image) else {
            return (FaceLabel::Unclassified, None);
        };
        let prediction = match self.classifier.predict(&crop) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "classification failed");
                return (FaceLabel::Unclassified, None);
            }
        };
        let strength = prediction.match_strength();
        match self.labels.person(prediction.label) {
            Some(person) if prediction.is_below(self.threshold) => {
                let label = FaceLabel::Recognized {
                    name: person.name.clone(),
                    strength,
                };
                (label, Some(person))
            }
            _ => {
                tracing::trace!(
                    label = prediction.label,
                    confidence = prediction.confidence,
                    "face rejected"
                );
                (FaceLabel::Unknown { strength }, None)
            }
        }
    }
}
