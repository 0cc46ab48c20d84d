use ratatui::style::{Color, Modifier, Style};

// Color palette
pub const BRAND: Color = Color::Rgb(88, 120, 200);
pub const OK: Color = Color::Rgb(96, 168, 112);
pub const WARN: Color = Color::Rgb(208, 168, 72);
pub const ALERT: Color = Color::Rgb(200, 72, 72);
pub const DIM: Color = Color::Rgb(120, 120, 132);
pub const FOCUS_BG: Color = Color::Rgb(44, 48, 68);
pub const BAR_BG: Color = Color::Rgb(28, 30, 40);

pub fn title_style() -> Style {
    Style::default().fg(BRAND).add_modifier(Modifier::BOLD)
}

/// Focused form field or button.
pub fn selected_style() -> Style {
    Style::default().bg(FOCUS_BG).add_modifier(Modifier::BOLD)
}

pub fn list_item_style() -> Style {
    Style::default().fg(Color::White)
}

pub fn muted_style() -> Style {
    Style::default().fg(DIM)
}

pub fn highlight_style() -> Style {
    Style::default().fg(WARN)
}

pub fn success_style() -> Style {
    Style::default().fg(OK)
}

pub fn error_style() -> Style {
    Style::default().fg(ALERT).add_modifier(Modifier::BOLD)
}

/// Green when a guard or state is in the desired position, red otherwise.
pub fn flag_style(good: bool) -> Style {
    if good {
        success_style()
    } else {
        error_style()
    }
}

pub fn border_style(focused: bool) -> Style {
    Style::default().fg(if focused { BRAND } else { DIM })
}

pub fn status_bar_style() -> Style {
    Style::default().bg(BAR_BG).fg(Color::White)
}

pub fn help_key_style() -> Style {
    Style::default().fg(WARN).add_modifier(Modifier::BOLD)
}

pub fn help_desc_style() -> Style {
    list_item_style()
}
