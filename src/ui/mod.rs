use chrono::NaiveDateTime;
use eframe::egui::{self, RichText, Stroke};
use rfd::FileDialog;
use std::path::{Path, PathBuf};

use crate::file_utils::format_size;
use crate::history::DownloadHistory;
use crate::localizations::Localizations;
use crate::models::{AppState, Busy, OverwriteChoice, PendingOverwrite};
use crate::theme::*;

/// Entries shown per folder in the history panel.
pub const HISTORY_PER_FOLDER: usize = 10;

/// What the user clicked in the history panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryAction {
    Locate(PathBuf),
    OpenFolder(PathBuf),
    Delete(String),
    Refresh,
    Clear,
}

pub fn render_header(ui: &mut egui::Ui, localizer: &Localizations) {
    ui.heading(RichText::new(localizer.tr("app-title")).color(MAIN_TEXT));
    ui.label(RichText::new(localizer.tr("app-subtitle")).color(SECONDARY_TEXT));
}

pub fn render_url_input(ui: &mut egui::Ui, state: &mut AppState, localizer: &Localizations) -> egui::Response {
    ui.label(localizer.tr("url-label"));

    egui::Frame::group(ui.style())
        .fill(INPUT_BG)
        .stroke(Stroke::new(1.0, BORDER_COLOR))
        .rounding(ROUNDING_FRAME)
        .show(ui, |ui| {
            ui.add_sized(
                [ui.available_width(), INPUT_HEIGHT],
                egui::TextEdit::singleline(&mut state.url)
                    .hint_text(localizer.tr("url-placeholder"))
                    .font(egui::FontId::proportional(BUTTON_FONT_SIZE)),
            )
        })
        .inner
}

/// Quality picker plus the playlist toggle. Returns true when the user asked
/// for the quality list to be loaded.
pub fn render_format_selector(ui: &mut egui::Ui, state: &mut AppState, localizer: &Localizations) -> bool {
    let mut load_requested = false;

    ui.horizontal(|ui| {
        ui.label(localizer.tr("quality-label"));

        let selected = state.selected_format().label();
        egui::ComboBox::from_id_source("format-selector")
            .selected_text(selected)
            .width(220.0)
            .show_ui(ui, |ui| {
                for (index, format) in state.formats.iter().enumerate() {
                    ui.selectable_value(&mut state.selected_format, index, format.label());
                }
            });

        let loading = state.busy == Busy::LoadingFormats;
        if ui
            .add_enabled(!loading, small_button(localizer.tr("load-formats")))
            .clicked()
        {
            load_requested = true;
        }
        if loading {
            ui.spinner();
        }
    });

    ui.checkbox(&mut state.playlist, localizer.tr("playlist-checkbox"));

    load_requested
}

/// Returns true when the folder changed, either typed or picked.
pub fn render_download_dir_selector(ui: &mut egui::Ui, state: &mut AppState, localizer: &Localizations) -> bool {
    let mut changed = false;

    ui.vertical(|ui| {
        ui.label(localizer.tr("download-to"));

        ui.horizontal(|ui| {
            egui::Frame::none()
                .fill(ui.visuals().extreme_bg_color)
                .rounding(ROUNDING_FRAME)
                .stroke(ui.visuals().widgets.noninteractive.bg_stroke)
                .show(ui, |ui| {
                    ui.set_min_height(INPUT_HEIGHT);
                    let response = ui.add_sized(
                        [ui.available_width() - SMALL_BUTTON.x, INPUT_HEIGHT],
                        egui::TextEdit::singleline(&mut state.download_dir)
                            .frame(false)
                            .margin(egui::vec2(8.0, 8.0)),
                    );
                    changed = response.lost_focus();
                });

            let browse = egui::Button::new(RichText::new(localizer.tr("browse-button")).size(14.0))
                .min_size(SMALL_BUTTON)
                .fill(ui.visuals().widgets.inactive.bg_fill)
                .rounding(ROUNDING_FRAME);

            if ui.add(browse).clicked() {
                if let Some(path) = FileDialog::new()
                    .set_directory(picker_start(&state.download_dir))
                    .pick_folder()
                {
                    state.download_dir = path.to_string_lossy().to_string();
                    changed = true;
                }
            }
        });
    });

    changed
}

fn picker_start(current: &str) -> PathBuf {
    let current = Path::new(current);
    if current.is_dir() {
        current.to_path_buf()
    } else {
        current
            .parent()
            .filter(|p| p.is_dir())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

pub fn render_status(ui: &mut egui::Ui, state: &AppState, localizer: &Localizations) {
    egui::Frame::group(ui.style())
        .fill(STATUS_BG)
        .rounding(ROUNDING_FRAME * 2.0)
        .show(ui, |ui| {
            ui.set_width(ui.available_width());
            ui.vertical(|ui| {
                ui.add_space(10.0);

                let status_text = match &state.last_error {
                    Some(error) => RichText::new(localizer.tr_args("error-prefix", &[("message", error.as_str())]))
                        .color(TEXT_ERROR),
                    None => RichText::new(&state.status).color(MAIN_TEXT),
                };
                ui.label(status_text);

                if state.busy == Busy::Downloading {
                    ui.add_space(10.0);
                    ui.add(egui::ProgressBar::new(state.progress / 100.0).show_percentage());

                    ui.horizontal(|ui| {
                        if !state.download_speed.is_empty() {
                            ui.label(
                                RichText::new(
                                    localizer.tr_args("progress-speed", &[("speed", state.download_speed.as_str())]),
                                )
                                .color(SECONDARY_TEXT),
                            );
                        }
                        if !state.eta.is_empty() {
                            ui.label(
                                RichText::new(localizer.tr_args("progress-eta", &[("eta", state.eta.as_str())]))
                                    .color(SECONDARY_TEXT),
                            );
                        }
                    });
                } else if matches!(state.busy, Busy::CheckingVideo | Busy::Updating) {
                    ui.add_space(10.0);
                    ui.spinner();
                }

                if let Some(path) = &state.output_path {
                    ui.add_space(10.0);
                    let saved = path.display().to_string();
                    ui.label(RichText::new(localizer.tr_args("saved-to", &[("path", saved.as_str())])).color(TEXT_SUCCESS));
                }

                ui.add_space(10.0);
            });
        });
}

/// Downloads grouped by folder, newest first, at most
/// [`HISTORY_PER_FOLDER`] per folder.
pub fn render_history_panel(
    ui: &mut egui::Ui,
    history: &DownloadHistory,
    localizer: &Localizations,
) -> Option<HistoryAction> {
    let mut action = None;

    ui.horizontal(|ui| {
        ui.heading(localizer.tr("history-title"));
        if ui.add(small_button(localizer.tr("history-refresh"))).clicked() {
            action = Some(HistoryAction::Refresh);
        }
        if ui
            .add_enabled(!history.is_empty(), small_button(localizer.tr("history-clear")))
            .clicked()
        {
            action = Some(HistoryAction::Clear);
        }
    });
    ui.separator();

    if history.is_empty() {
        ui.label(RichText::new(localizer.tr("history-empty")).color(SECONDARY_TEXT));
        return action;
    }

    egui::ScrollArea::vertical()
        .auto_shrink([false; 2])
        .show(ui, |ui| {
            for (folder, entries) in history.grouped_by_folder() {
                let folder_name = folder
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| folder.display().to_string());

                egui::CollapsingHeader::new(format!("{} ({})", folder_name, entries.len()))
                    .id_source(&folder)
                    .default_open(true)
                    .show(ui, |ui| {
                        ui.label(
                            RichText::new(folder.display().to_string())
                                .size(SMALL_FONT_SIZE)
                                .color(SECONDARY_TEXT),
                        );
                        if ui.add(small_button(localizer.tr("open-folder-button"))).clicked() {
                            action = Some(HistoryAction::OpenFolder(folder.clone()));
                        }

                        for entry in entries.iter().take(HISTORY_PER_FOLDER) {
                            ui.group(|ui| {
                                ui.set_width(ui.available_width());
                                ui.label(RichText::new(&entry.title).strong().color(MAIN_TEXT));

                                let mut details = display_date(&entry.download_date);
                                if let Some(size) = entry.file_size {
                                    details.push_str(" · ");
                                    details.push_str(&format_size(size));
                                }
                                ui.label(RichText::new(details).size(SMALL_FONT_SIZE).color(SECONDARY_TEXT));

                                ui.horizontal(|ui| {
                                    if ui.add(small_button(localizer.tr("history-locate"))).clicked() {
                                        action = Some(HistoryAction::Locate(PathBuf::from(&entry.file_path)));
                                    }
                                    if ui.add(small_button(localizer.tr("history-delete"))).clicked() {
                                        action = Some(HistoryAction::Delete(entry.file_path.clone()));
                                    }
                                });
                            });
                        }
                    });
            }
        });

    action
}

/// `2024-05-01T13:45:10.123456` becomes `01/05/2024 13:45`; anything
/// unparseable is shown as stored.
pub fn display_date(iso: &str) -> String {
    NaiveDateTime::parse_from_str(iso, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|date| date.format("%d/%m/%Y %H:%M").to_string())
        .unwrap_or_else(|_| iso.to_string())
}

fn dialog(title: String) -> egui::Window<'static> {
    egui::Window::new(title)
        .collapsible(false)
        .resizable(false)
        .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
}

pub fn render_overwrite_dialog(
    ctx: &egui::Context,
    pending: &PendingOverwrite,
    localizer: &Localizations,
) -> Option<OverwriteChoice> {
    let mut choice = None;

    dialog(localizer.tr("overwrite-title")).show(ctx, |ui| {
        ui.label(localizer.tr_args("overwrite-body", &[("title", pending.title.as_str())]));
        ui.label(
            RichText::new(pending.existing.display().to_string())
                .size(SMALL_FONT_SIZE)
                .color(SECONDARY_TEXT),
        );
        ui.add_space(10.0);
        ui.horizontal(|ui| {
            if ui.add(primary_button(localizer.tr("overwrite-yes"))).clicked() {
                choice = Some(OverwriteChoice::Overwrite);
            }
            if ui.add(secondary_button(localizer.tr("overwrite-open"))).clicked() {
                choice = Some(OverwriteChoice::OpenExisting);
            }
            if ui.add(secondary_button(localizer.tr("cancel"))).clicked() {
                choice = Some(OverwriteChoice::Cancel);
            }
        });
    });

    choice
}

/// `Some(true)` deletes, `Some(false)` dismisses.
pub fn render_delete_dialog(ctx: &egui::Context, file_path: &str, localizer: &Localizations) -> Option<bool> {
    let mut confirmed = None;

    dialog(localizer.tr("delete-title")).show(ctx, |ui| {
        ui.label(localizer.tr("delete-body"));
        ui.label(RichText::new(file_path).size(SMALL_FONT_SIZE).color(SECONDARY_TEXT));
        ui.add_space(10.0);
        ui.horizontal(|ui| {
            if ui.add(danger_button(localizer.tr("delete-confirm"))).clicked() {
                confirmed = Some(true);
            }
            if ui.add(secondary_button(localizer.tr("cancel"))).clicked() {
                confirmed = Some(false);
            }
        });
    });

    confirmed
}

/// `Some(true)` installs, `Some(false)` skips.
pub fn render_ffmpeg_prompt(ctx: &egui::Context, localizer: &Localizations) -> Option<bool> {
    let mut answer = None;

    dialog(localizer.tr("ffmpeg-title")).show(ctx, |ui| {
        ui.label(localizer.tr("ffmpeg-body"));
        ui.add_space(10.0);
        ui.horizontal(|ui| {
            if ui.add(primary_button(localizer.tr("ffmpeg-install"))).clicked() {
                answer = Some(true);
            }
            if ui.add(secondary_button(localizer.tr("ffmpeg-skip"))).clicked() {
                answer = Some(false);
            }
        });
    });

    answer
}

pub fn render_install_progress(ctx: &egui::Context, state: &AppState, localizer: &Localizations) {
    dialog(localizer.tr("ffmpeg-installing")).show(ctx, |ui| {
        ui.set_min_width(320.0);
        ui.label(state.install_status.as_str());
        ui.add(egui::ProgressBar::new(state.progress / 100.0).show_percentage());
    });
}
