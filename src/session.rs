//! Review session controller.
//!
//! Owns the annotation under review and drives the store round trips:
//! load the next unverified record, fetch its image, submit the reviewer's
//! judgment and hand boxes. Every reply is handled in [`ReviewSession::poll`]
//! on the caller's thread, so the session is only ever mutated from one place.
//!
//! Successful submissions are merged into the local record instead of
//! re-fetching it. That keeps the prompt responsive at the cost of trusting
//! the store to have applied the update exactly as sent.

use std::collections::HashMap;

use image::RgbaImage;
use serde_json::json;
use thiserror::Error;

use crate::boxes::{
    decode_hand_boxes, decode_object_bounds, encode_hand_boxes, CanonicalBox, CornerPair,
    DecodeError, Provenance,
};
use crate::phase::{derive_phase, Action, Phase};
use crate::record::{AnnotationId, AnnotationPage, AnnotationRecord};
use crate::transport::{Payload, Reply, RequestId, Transport};

pub const UNVERIFIED_QUERY: &str = "/annotation?verified=False&LIMIT=1";

pub fn image_path(id: &AnnotationId) -> String {
    format!("annotation/{}/image", id.path_segment())
}

pub fn record_path(id: &AnnotationId) -> String {
    format!("annotation/{}", id.path_segment())
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ActionError {
    #[error("'{action}' is not available while {phase}")]
    NotAllowed { action: Action, phase: Phase },

    #[error("drawing is disabled while {phase}")]
    DrawingDisabled { phase: Phase },

    #[error("a submission for annotation {annotation} is still in flight")]
    InFlight { annotation: AnnotationId },
}

/// What to do with the reply to an outstanding request.
#[derive(Debug)]
enum Continuation {
    Annotation {
        generation: u64,
    },
    Image {
        generation: u64,
        annotation: AnnotationId,
    },
    Judgment {
        annotation: AnnotationId,
        is_valid: bool,
    },
    Hands {
        annotation: AnnotationId,
        pairs: Vec<CornerPair>,
    },
}

/// Everything that belongs to one loaded annotation. Replaced as a unit.
#[derive(Debug)]
struct Loaded {
    record: AnnotationRecord,
    hand_boxes: Vec<CanonicalBox>,
    object_boxes: Vec<CanonicalBox>,
    reviewer_boxes: Vec<CanonicalBox>,
    image: Option<RgbaImage>,
}

pub struct ReviewSession<T> {
    transport: T,
    pending: HashMap<RequestId, Continuation>,
    /// Bumped on every load; replies tagged with an older value are stale.
    generation: u64,
    loaded: Option<Loaded>,
}

impl<T: Transport> ReviewSession<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            pending: HashMap::new(),
            generation: 0,
            loaded: None,
        }
    }

    pub fn phase(&self) -> Phase {
        derive_phase(self.record())
    }

    pub fn record(&self) -> Option<&AnnotationRecord> {
        self.loaded.as_ref().map(|loaded| &loaded.record)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn hand_boxes(&self) -> &[CanonicalBox] {
        self.loaded
            .as_ref()
            .map(|l| l.hand_boxes.as_slice())
            .unwrap_or_default()
    }

    pub fn object_boxes(&self) -> &[CanonicalBox] {
        self.loaded
            .as_ref()
            .map(|l| l.object_boxes.as_slice())
            .unwrap_or_default()
    }

    pub fn reviewer_boxes(&self) -> &[CanonicalBox] {
        self.loaded
            .as_ref()
            .map(|l| l.reviewer_boxes.as_slice())
            .unwrap_or_default()
    }

    /// All boxes to draw, machine predictions first.
    pub fn overlay(&self) -> impl Iterator<Item = &CanonicalBox> {
        self.hand_boxes()
            .iter()
            .chain(self.object_boxes())
            .chain(self.reviewer_boxes())
    }

    pub fn image(&self) -> Option<&RgbaImage> {
        self.loaded.as_ref().and_then(|l| l.image.as_ref())
    }

    /// A load for the current generation has not answered yet.
    pub fn is_loading(&self) -> bool {
        self.pending.values().any(|c| {
            matches!(c, Continuation::Annotation { generation } if *generation == self.generation)
        })
    }

    /// A judgment or hand submission for the loaded record is outstanding.
    pub fn is_submitting(&self) -> bool {
        self.record()
            .is_some_and(|record| self.submission_in_flight(&record.id))
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Run a prompt action.
    pub fn perform(&mut self, action: Action) -> Result<(), ActionError> {
        match action {
            Action::Judge { is_valid } => self.submit_judgment(is_valid),
            Action::Clear => self.clear(),
            Action::Submit => self.submit_hand_boxes(),
            Action::Next => self.load_next(),
        }
    }

    /// Drop the current annotation and ask the store for the next unverified one.
    pub fn load_next(&mut self) -> Result<(), ActionError> {
        self.ensure_allowed(Action::Next)?;

        self.generation += 1;
        self.loaded = None;
        let id = self.transport.get_json(UNVERIFIED_QUERY);
        self.pending.insert(
            id,
            Continuation::Annotation {
                generation: self.generation,
            },
        );
        log::info!("Requesting next unverified annotation (load {})", self.generation);
        Ok(())
    }

    pub fn submit_judgment(&mut self, is_valid: bool) -> Result<(), ActionError> {
        let annotation = self.submittable(Action::Judge { is_valid })?;

        let id = self.transport.put(
            &record_path(&annotation),
            json!({ "verified": true, "is_valid": is_valid }),
        );
        log::info!("Submitting judgment is_valid={is_valid} for annotation {annotation}");
        self.pending.insert(
            id,
            Continuation::Judgment {
                annotation,
                is_valid,
            },
        );
        Ok(())
    }

    pub fn submit_hand_boxes(&mut self) -> Result<(), ActionError> {
        let annotation = self.submittable(Action::Submit)?;
        let pairs = encode_hand_boxes(self.reviewer_boxes());

        let id = self
            .transport
            .put(&record_path(&annotation), json!({ "verified_hands": pairs }));
        log::info!(
            "Submitting {} hand box(es) for annotation {annotation}",
            pairs.len()
        );
        self.pending
            .insert(id, Continuation::Hands { annotation, pairs });
        Ok(())
    }

    /// Record one box drawn on the canvas, in image coordinates.
    ///
    /// Refused while a submission is in flight, so the boxes shown are always
    /// the ones that were sent.
    pub fn on_box_drawn(
        &mut self,
        left: f64,
        right: f64,
        top: f64,
        bottom: f64,
    ) -> Result<(), ActionError> {
        let phase = self.phase();
        if phase.drawing_enabled() {
            self.ensure_idle()?;
        }
        match self.loaded.as_mut() {
            Some(loaded) if phase.drawing_enabled() => {
                loaded.reviewer_boxes.push(CanonicalBox {
                    x0: left,
                    x1: right,
                    y0: top,
                    y1: bottom,
                    provenance: Provenance::ReviewerHand,
                });
                Ok(())
            }
            _ => Err(ActionError::DrawingDisabled { phase }),
        }
    }

    /// Forget the reviewer's boxes. Nothing is sent.
    pub fn clear(&mut self) -> Result<(), ActionError> {
        self.ensure_allowed(Action::Clear)?;
        self.ensure_idle()?;
        if let Some(loaded) = self.loaded.as_mut() {
            loaded.reviewer_boxes.clear();
        }
        Ok(())
    }

    /// Handle every reply that has arrived. Returns how many were handled.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Some(reply) = self.transport.try_recv() {
            self.dispatch(reply);
            handled += 1;
        }
        handled
    }

    fn dispatch(&mut self, reply: Reply) {
        let Some(continuation) = self.pending.remove(&reply.id) else {
            log::debug!("Ignoring reply to unknown request {}", reply.id);
            return;
        };

        match (continuation, reply.outcome) {
            (Continuation::Annotation { generation }, Ok(payload)) => {
                self.on_annotation(generation, payload)
            }
            (Continuation::Annotation { .. }, Err(e)) => {
                log::error!("Failed to get annotations: {e}")
            }
            (
                Continuation::Image {
                    generation,
                    annotation,
                },
                Ok(payload),
            ) => self.on_image(generation, &annotation, payload),
            (Continuation::Image { annotation, .. }, Err(e)) => {
                log::warn!("Failed to get image for annotation {annotation}: {e}")
            }
            (
                Continuation::Judgment {
                    annotation,
                    is_valid,
                },
                Ok(_),
            ) => match self.active_record_mut(&annotation) {
                Some(record) => record.apply_judgment(is_valid),
                None => log::debug!(
                    "Judgment for annotation {annotation} landed after it was replaced"
                ),
            },
            (Continuation::Judgment { annotation, .. }, Err(e)) => {
                log::error!("Failed to submit judgment for annotation {annotation}: {e}")
            }
            (Continuation::Hands { annotation, pairs }, Ok(_)) => {
                match self.active_record_mut(&annotation) {
                    Some(record) => record.apply_verified_hands(&pairs),
                    None => log::debug!(
                        "Hand boxes for annotation {annotation} landed after it was replaced"
                    ),
                }
            }
            (Continuation::Hands { annotation, .. }, Err(e)) => {
                log::error!("Failed to submit hand boxes for annotation {annotation}: {e}")
            }
        }
    }

    fn on_annotation(&mut self, generation: u64, payload: Payload) {
        if generation != self.generation {
            log::info!("Discarding annotation from superseded load {generation}");
            return;
        }
        let Payload::Json(body) = payload else {
            log::error!("Annotation query returned binary data");
            return;
        };
        let page: AnnotationPage = match serde_json::from_value(body) {
            Ok(page) => page,
            Err(e) => {
                log::error!("Failed to read annotation page: {e}");
                return;
            }
        };
        let Some(first) = page.annotations.into_iter().next() else {
            log::info!("No unverified annotations left to review");
            return;
        };
        let record = match serde_json::from_value::<AnnotationRecord>(first) {
            Ok(record) => record,
            Err(e) => {
                log::error!("Failed to read annotation record: {e}");
                return;
            }
        };

        let hand_boxes = decoded_or_empty(
            "hand_boxes",
            &record.id,
            decode_hand_boxes(record.hand_boxes.as_deref()),
        );
        let object_boxes = decoded_or_empty(
            "obj_bounds",
            &record.id,
            decode_object_bounds(record.obj_bounds.as_deref()),
        );
        log::info!(
            "Loaded annotation {} with {} hand and {} object box(es)",
            record.id,
            hand_boxes.len(),
            object_boxes.len()
        );

        let annotation = record.id.clone();
        self.loaded = Some(Loaded {
            record,
            hand_boxes,
            object_boxes,
            reviewer_boxes: Vec::new(),
            image: None,
        });

        let id = self.transport.get_binary(&image_path(&annotation));
        self.pending.insert(
            id,
            Continuation::Image {
                generation,
                annotation,
            },
        );
    }

    fn on_image(&mut self, generation: u64, annotation: &AnnotationId, payload: Payload) {
        let loaded = match self.loaded.as_mut() {
            Some(loaded) if generation == self.generation && loaded.record.id == *annotation => {
                loaded
            }
            _ => {
                log::info!("Discarding image for superseded annotation {annotation}");
                return;
            }
        };
        let bytes = match payload {
            Payload::Binary(bytes) => bytes,
            Payload::Json(_) => {
                log::warn!("Image for annotation {annotation} came back as JSON");
                return;
            }
        };
        match image::load_from_memory(&bytes) {
            Ok(decoded) => {
                let rgba = decoded.to_rgba8();
                log::debug!(
                    "Decoded image for annotation {annotation}: {}x{}",
                    rgba.width(),
                    rgba.height()
                );
                loaded.image = Some(rgba);
            }
            Err(e) => log::warn!("Failed to decode image for annotation {annotation}: {e}"),
        }
    }

    fn active_record_mut(&mut self, annotation: &AnnotationId) -> Option<&mut AnnotationRecord> {
        self.loaded
            .as_mut()
            .map(|loaded| &mut loaded.record)
            .filter(|record| record.id == *annotation)
    }

    fn ensure_allowed(&self, action: Action) -> Result<(), ActionError> {
        let phase = self.phase();
        if phase.allows(action) {
            Ok(())
        } else {
            Err(ActionError::NotAllowed { action, phase })
        }
    }

    /// Check a submission may go out and return the record it is for.
    fn submittable(&self, action: Action) -> Result<AnnotationId, ActionError> {
        self.ensure_allowed(action)?;
        let phase = self.phase();
        let annotation = self
            .record()
            .map(|record| record.id.clone())
            .ok_or(ActionError::NotAllowed { action, phase })?;
        if self.submission_in_flight(&annotation) {
            return Err(ActionError::InFlight { annotation });
        }
        Ok(annotation)
    }

    /// Reviewer boxes are frozen while a submission for the record is out.
    fn ensure_idle(&self) -> Result<(), ActionError> {
        match self.record() {
            Some(record) if self.submission_in_flight(&record.id) => Err(ActionError::InFlight {
                annotation: record.id.clone(),
            }),
            _ => Ok(()),
        }
    }

    fn submission_in_flight(&self, annotation: &AnnotationId) -> bool {
        self.pending.values().any(|c| match c {
            Continuation::Judgment { annotation: a, .. } | Continuation::Hands { annotation: a, .. } => {
                a == annotation
            }
            _ => false,
        })
    }
}

fn decoded_or_empty(
    field: &str,
    annotation: &AnnotationId,
    decoded: Result<Vec<CanonicalBox>, DecodeError>,
) -> Vec<CanonicalBox> {
    decoded.unwrap_or_else(|e| {
        log::warn!("Ignoring {field} of annotation {annotation}: {e}");
        Vec::new()
    })
}
