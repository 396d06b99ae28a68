use eframe::egui;
use egui_extras::{Column, TableBuilder};

use crate::boxes::Provenance;
use crate::config::Config;
use crate::phase::{Action, Phase};
use crate::session::ReviewSession;
use crate::transport::{HttpTransport, TransportError};

/// Canvas extent used before the image arrives.
const PLACEHOLDER_SIZE: (f32, f32) = (800.0, 600.0);
/// Shorter drags are treated as clicks, not boxes.
const MIN_DRAG: f32 = 5.0;
const BOX_STROKE: f32 = 2.0;

fn provenance_color(provenance: Provenance) -> egui::Color32 {
    match provenance {
        Provenance::MachineHand => egui::Color32::from_rgb(0, 200, 0),
        Provenance::MachineObject => egui::Color32::from_rgb(40, 110, 255),
        Provenance::ReviewerHand => egui::Color32::from_rgb(230, 40, 40),
    }
}

// ── Interaction State ───────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug)]
enum DragState {
    None,
    Drawing { start: egui::Pos2 },
}

// ── App ─────────────────────────────────────────────────────────────────────

pub struct ReviewApp {
    session: ReviewSession<HttpTransport>,
    /// Uploaded image, tagged with the load generation it belongs to.
    texture: Option<(u64, egui::TextureHandle)>,
    view_generation: u64,

    drag: DragState,

    // pan & zoom
    pan: egui::Vec2,
    zoom: f32,
    panning: bool,
}

impl ReviewApp {
    pub fn new(cc: &eframe::CreationContext<'_>, config: &Config) -> Result<Self, TransportError> {
        let ctx = cc.egui_ctx.clone();
        let transport = HttpTransport::spawn(
            &config.base_url,
            config.timeout(),
            Some(Box::new(move || ctx.request_repaint())),
        )?;

        let mut session = ReviewSession::new(transport);
        if let Err(e) = session.load_next() {
            log::warn!("Initial load not started: {e}");
        }

        Ok(Self {
            session,
            texture: None,
            view_generation: 0,
            drag: DragState::None,
            pan: egui::Vec2::ZERO,
            zoom: 1.0,
            panning: false,
        })
    }

    fn perform(&mut self, action: Action) {
        if let Err(e) = self.session.perform(action) {
            log::debug!("Ignored '{action}': {e}");
        }
    }

    fn image_size(&self) -> (f32, f32) {
        self.session
            .image()
            .map(|img| (img.width() as f32, img.height() as f32))
            .unwrap_or(PLACEHOLDER_SIZE)
    }

    /// Convert image-space coords to screen-space
    fn image_to_screen(&self, canvas_rect: egui::Rect, img_pos: egui::Pos2) -> egui::Pos2 {
        let (w, h) = self.image_size();
        canvas_rect.center() + self.pan + (img_pos.to_vec2() - egui::vec2(w, h) * 0.5) * self.zoom
    }

    /// Convert screen-space coords to image-space
    fn screen_to_image(&self, canvas_rect: egui::Rect, screen_pos: egui::Pos2) -> egui::Pos2 {
        let (w, h) = self.image_size();
        let rel = screen_pos - canvas_rect.center() - self.pan;
        egui::pos2(rel.x / self.zoom + w * 0.5, rel.y / self.zoom + h * 0.5)
    }

    fn image_rect_on_screen(&self, canvas_rect: egui::Rect) -> egui::Rect {
        let (w, h) = self.image_size();
        egui::Rect::from_min_max(
            self.image_to_screen(canvas_rect, egui::Pos2::ZERO),
            self.image_to_screen(canvas_rect, egui::pos2(w, h)),
        )
    }

    /// Keep the texture and the view in step with the loaded annotation.
    fn sync_with_session(&mut self, ctx: &egui::Context) {
        let generation = self.session.generation();
        if generation != self.view_generation {
            self.view_generation = generation;
            self.pan = egui::Vec2::ZERO;
            self.zoom = 1.0;
            self.drag = DragState::None;
        }

        if self
            .texture
            .as_ref()
            .is_some_and(|(tagged, _)| *tagged != generation)
        {
            self.texture = None;
        }
        if self.texture.is_some() {
            return;
        }
        if let Some(rgba) = self.session.image() {
            let size = [rgba.width() as usize, rgba.height() as usize];
            let color_image = egui::ColorImage::from_rgba_unmultiplied(size, rgba.as_raw());
            let handle = ctx.load_texture(
                format!("annotation-{generation}"),
                color_image,
                egui::TextureOptions::LINEAR,
            );
            self.texture = Some((generation, handle));
        }
    }

    fn draw_boxes(&self, painter: &egui::Painter, canvas_rect: egui::Rect) {
        for b in self.session.overlay() {
            let rect = egui::Rect::from_two_pos(
                self.image_to_screen(canvas_rect, egui::pos2(b.x0 as f32, b.y0 as f32)),
                self.image_to_screen(canvas_rect, egui::pos2(b.x1 as f32, b.y1 as f32)),
            );
            painter.rect_stroke(
                rect,
                0.0,
                egui::Stroke::new(BOX_STROKE, provenance_color(b.provenance)),
                egui::StrokeKind::Middle,
            );
        }
    }

    fn handle_shortcuts(&mut self, ctx: &egui::Context) {
        // Buttons are disabled while a submission is pending; keys follow suit.
        if self.session.is_submitting() {
            return;
        }
        let phase = self.session.phase();
        let pressed = ctx.input(|i| {
            if i.key_pressed(egui::Key::Y) {
                Some(Action::Judge { is_valid: true })
            } else if i.key_pressed(egui::Key::N) {
                Some(Action::Judge { is_valid: false })
            } else if i.key_pressed(egui::Key::Enter) {
                Some(if phase == Phase::Complete {
                    Action::Next
                } else {
                    Action::Submit
                })
            } else if i.key_pressed(egui::Key::Escape) {
                Some(Action::Clear)
            } else {
                None
            }
        });
        if let Some(action) = pressed.filter(|action| phase.allows(*action)) {
            self.perform(action);
        }
    }

    fn prompt_banner(&mut self, ui: &mut egui::Ui) {
        let phase = self.session.phase();
        match phase.prompt() {
            Some(prompt) => {
                ui.label(egui::RichText::new(prompt.text).strong());
                let enabled = !self.session.is_submitting();
                for &action in prompt.actions {
                    if ui
                        .add_enabled(enabled, egui::Button::new(action.label()))
                        .clicked()
                    {
                        self.perform(action);
                    }
                }
                if phase.drawing_enabled() {
                    ui.separator();
                    ui.label(format!(
                        "{} box(es) drawn",
                        self.session.reviewer_boxes().len()
                    ));
                }
            }
            None if self.session.is_loading() => {
                ui.spinner();
                ui.label("Loading annotation...");
            }
            None => {
                ui.label("No annotation loaded.");
                if ui.button("Reload").clicked() {
                    self.perform(Action::Next);
                }
            }
        }
    }

    fn record_table(&self, ui: &mut egui::Ui) {
        let Some(record) = self.session.record() else {
            ui.weak("Nothing loaded.");
            return;
        };

        ui.label(format!(
            "{} hand, {} object, {} drawn",
            self.session.hand_boxes().len(),
            self.session.object_boxes().len(),
            self.session.reviewer_boxes().len()
        ));
        ui.separator();

        TableBuilder::new(ui)
            .striped(true)
            .resizable(true)
            .column(Column::auto().at_least(90.0))
            .column(Column::remainder())
            .header(20.0, |mut header| {
                header.col(|ui| {
                    ui.strong("Field");
                });
                header.col(|ui| {
                    ui.strong("Value");
                });
            })
            .body(|mut body| {
                for (field, value) in record.fields() {
                    body.row(18.0, |mut row| {
                        row.col(|ui| {
                            ui.label(field.as_str());
                        });
                        row.col(|ui| {
                            ui.label(value.as_str()).on_hover_text(value.as_str());
                        });
                    });
                }
            });
    }
}

// ── eframe App impl ────────────────────────────────────────────────────────

impl eframe::App for ReviewApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.session.poll();
        self.sync_with_session(ctx);
        self.handle_shortcuts(ctx);

        // Prompt banner
        egui::TopBottomPanel::top("prompt").show(ctx, |ui| {
            ui.horizontal(|ui| {
                self.prompt_banner(ui);
                ui.separator();
                ui.label(format!("Zoom: {:.0}%", self.zoom * 100.0));
            });
        });

        // Record fields
        egui::SidePanel::right("record")
            .resizable(true)
            .default_width(320.0)
            .show(ctx, |ui| {
                ui.heading("Annotation");
                self.record_table(ui);
            });

        // Canvas
        egui::CentralPanel::default().show(ctx, |ui| {
            let (response, painter) =
                ui.allocate_painter(ui.available_size(), egui::Sense::click_and_drag());
            let canvas_rect = response.rect;

            painter.rect_filled(canvas_rect, 0.0, egui::Color32::from_gray(40));

            if let Some((_, tex)) = &self.texture {
                painter.image(
                    tex.id(),
                    self.image_rect_on_screen(canvas_rect),
                    egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                    egui::Color32::WHITE,
                );
            } else if self.session.record().is_some() {
                let placeholder = self.image_rect_on_screen(canvas_rect);
                painter.rect_filled(placeholder, 0.0, egui::Color32::from_gray(60));
                painter.text(
                    placeholder.center(),
                    egui::Align2::CENTER_CENTER,
                    "loading image...",
                    egui::FontId::proportional(18.0),
                    egui::Color32::LIGHT_GRAY,
                );
            }

            self.draw_boxes(&painter, canvas_rect);

            // In-progress box preview
            if let DragState::Drawing { start } = self.drag {
                if let Some(current) = response.hover_pos() {
                    painter.rect_stroke(
                        egui::Rect::from_two_pos(start, current),
                        0.0,
                        egui::Stroke::new(BOX_STROKE, provenance_color(Provenance::ReviewerHand)),
                        egui::StrokeKind::Middle,
                    );
                }
            }

            // Pan (middle mouse button)
            if ctx.input(|i| i.pointer.middle_down()) {
                self.pan += ctx.input(|i| i.pointer.delta());
                self.panning = true;
            } else {
                self.panning = false;
            }

            // Zoom (scroll wheel), anchored at the cursor
            let scroll_delta = ctx.input(|i| i.smooth_scroll_delta.y);
            if scroll_delta != 0.0 && response.hovered() {
                let new_zoom = (self.zoom * (1.0 + scroll_delta * 0.002)).clamp(0.1, 10.0);
                if let Some(cursor) = response.hover_pos() {
                    let cursor_rel = cursor - canvas_rect.center() - self.pan;
                    self.pan -= cursor_rel * (new_zoom / self.zoom - 1.0);
                }
                self.zoom = new_zoom;
            }

            // Box drawing (primary button, only while the phase allows it)
            if self.panning
                || !self.session.phase().drawing_enabled()
                || self.session.is_submitting()
            {
                self.drag = DragState::None;
                return;
            }
            if response.drag_started_by(egui::PointerButton::Primary) {
                if let Some(pos) = response.hover_pos() {
                    self.drag = DragState::Drawing { start: pos };
                }
            }
            if response.drag_stopped_by(egui::PointerButton::Primary) {
                if let DragState::Drawing { start } = self.drag {
                    let end = response
                        .hover_pos()
                        .or(ctx.input(|i| i.pointer.latest_pos()));
                    if let Some(end) = end.filter(|end| (*end - start).length() > MIN_DRAG) {
                        let a = self.screen_to_image(canvas_rect, start);
                        let b = self.screen_to_image(canvas_rect, end);
                        if let Err(e) = self.session.on_box_drawn(
                            f64::from(a.x.min(b.x)),
                            f64::from(a.x.max(b.x)),
                            f64::from(a.y.min(b.y)),
                            f64::from(a.y.max(b.y)),
                        ) {
                            log::debug!("Dropped drawn box: {e}");
                        }
                    }
                }
                self.drag = DragState::None;
            }
        });
    }
}
