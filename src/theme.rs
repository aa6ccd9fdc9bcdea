use egui::{Color32, RichText, Stroke, Vec2};

// Color Palette
// Buttons
pub const PRIMARY_BUTTON_BG: Color32 = Color32::from_rgb(76, 154, 255); // Blue for the main action
pub const SECONDARY_BUTTON_BG: Color32 = Color32::from_rgb(228, 228, 234);
pub const DANGER_BUTTON_BG: Color32 = Color32::from_rgb(220, 53, 69); // Cancel and delete

// Surfaces
pub const INPUT_BG: Color32 = Color32::from_rgb(250, 250, 250);
pub const STATUS_BG: Color32 = Color32::from_rgb(248, 248, 248);
pub const BORDER_COLOR: Color32 = Color32::from_rgb(210, 210, 215);

// Text Colors
pub const BUTTON_MAIN_TEXT: Color32 = Color32::from_rgb(255, 255, 255);
pub const BUTTON_SECONDARY_TEXT: Color32 = Color32::from_rgb(36, 36, 36);
pub const MAIN_TEXT: Color32 = Color32::from_rgb(36, 36, 36);
pub const SECONDARY_TEXT: Color32 = Color32::from_rgb(138, 138, 143);
pub const TEXT_ERROR: Color32 = Color32::from_rgb(200, 30, 30);
pub const TEXT_SUCCESS: Color32 = Color32::from_rgb(30, 150, 60);

// Sizing & Spacing
pub const ROUNDING_FRAME: f32 = 4.0;
pub const ROUNDING_BUTTON: f32 = 6.0;
pub const MIN_SIZE_BUTTON: Vec2 = Vec2::new(120.0, 40.0);
pub const SMALL_BUTTON: Vec2 = Vec2::new(100.0, 36.0);
pub const INPUT_HEIGHT: f32 = 36.0;
pub const HISTORY_PANEL_WIDTH: f32 = 300.0;

pub const BUTTON_FONT_SIZE: f32 = 16.0;
pub const SMALL_FONT_SIZE: f32 = 12.0;

fn styled_button(text: String, fill: Color32, text_color: Color32, min_size: Vec2) -> egui::Button<'static> {
    egui::Button::new(RichText::new(text).size(BUTTON_FONT_SIZE).color(text_color))
        .min_size(min_size)
        .fill(fill)
        .rounding(ROUNDING_BUTTON)
        .stroke(Stroke::new(1.0, BORDER_COLOR))
}

pub fn primary_button(text: impl Into<String>) -> egui::Button<'static> {
    styled_button(text.into(), PRIMARY_BUTTON_BG, BUTTON_MAIN_TEXT, MIN_SIZE_BUTTON)
}

pub fn secondary_button(text: impl Into<String>) -> egui::Button<'static> {
    styled_button(text.into(), SECONDARY_BUTTON_BG, BUTTON_SECONDARY_TEXT, MIN_SIZE_BUTTON)
}

pub fn danger_button(text: impl Into<String>) -> egui::Button<'static> {
    styled_button(text.into(), DANGER_BUTTON_BG, BUTTON_MAIN_TEXT, MIN_SIZE_BUTTON)
}

/// Compact button used inside lists and dialogs.
pub fn small_button(text: impl Into<String>) -> egui::Button<'static> {
    egui::Button::new(RichText::new(text.into()).size(SMALL_FONT_SIZE).color(BUTTON_SECONDARY_TEXT))
        .fill(SECONDARY_BUTTON_BG)
        .rounding(ROUNDING_FRAME)
}
