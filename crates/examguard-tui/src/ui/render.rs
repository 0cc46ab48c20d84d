use chrono::{DateTime, Local, Utc};
use examguard_core::host::PermissionState;
use examguard_core::session::SessionState;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
    Frame,
};

use crate::app::{App, AppState, LoginFocus};

use super::styles;

const LOGO: [&str; 3] = [
    "   ╔═╗═╗ ╦╔═╗╔╦╗╔═╗╦ ╦╔═╗╦═╗╔╦╗",
    "   ║╣ ╔╩╦╝╠═╣║║║║ ╦║ ║╠═╣╠╦╝ ║║",
    "   ╚═╝╩ ╚═╩ ╩╩ ╩╚═╝╚═╝╩ ╩╩╚══╩╝",
];

pub fn render(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Title bar
            Constraint::Min(10),   // Dashboard
            Constraint::Length(2), // Status bar
        ])
        .split(frame.area());

    render_title_bar(frame, app, chunks[0]);
    render_dashboard(frame, app, chunks[1]);
    render_status_bar(frame, app, chunks[2]);

    // Render overlays
    match app.state {
        AppState::ShowingHelp => render_help_overlay(frame),
        AppState::LoggingIn => render_login_overlay(frame, app),
        AppState::ConfirmingQuit => render_quit_overlay(frame),
        AppState::Normal | AppState::Quitting => {}
    }
}

fn render_title_bar(frame: &mut Frame, app: &App, area: Rect) {
    let title = "  examguard";
    let backend = format!("backend: {}", app.ctx.gateway().backend_name());
    let help_hint = "[?] Help";

    let used = title.len() + backend.len() + help_hint.len() + 6;
    let title_line = Line::from(vec![
        Span::styled(title, styles::title_style()),
        Span::raw(" ".repeat((area.width as usize).saturating_sub(used))),
        Span::styled(backend, styles::muted_style()),
        Span::raw("  "),
        Span::styled(help_hint, styles::muted_style()),
    ]);

    let block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(styles::muted_style());

    frame.render_widget(Paragraph::new(title_line).block(block), area);
}

fn render_dashboard(frame: &mut Frame, app: &App, area: Rect) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);
    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(6), Constraint::Min(6)])
        .split(columns[1]);

    render_session_panel(frame, app, columns[0]);
    render_connectivity_panel(frame, app, right[0]);
    render_guard_panel(frame, app, right[1]);
}

fn field<'a>(label: &'a str, value: impl Into<String>, style: Style) -> Line<'a> {
    Line::from(vec![
        Span::styled(format!(" {:<14}", label), styles::muted_style()),
        Span::styled(value.into(), style),
    ])
}

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn session_state_label(state: SessionState) -> (&'static str, Style) {
    match state {
        SessionState::Active => ("active", styles::success_style()),
        SessionState::Expiring => ("expiring", styles::highlight_style()),
        SessionState::Expired => ("expired", styles::error_style()),
        SessionState::Ended => ("logged out", styles::muted_style()),
        SessionState::NoSession => ("none", styles::muted_style()),
    }
}

fn render_session_panel(frame: &mut Frame, app: &App, area: Rect) {
    let mut lines = Vec::new();
    let (state, state_style) = session_state_label(app.session_state());
    lines.push(field("State", state, state_style));

    match app.current_session() {
        Some(session) => {
            lines.push(field("User", session.username.clone(), styles::list_item_style()));
            lines.push(field("Role", session.role.to_string(), styles::list_item_style()));
            lines.push(field("Session", session.session_id.clone(), styles::muted_style()));
            lines.push(field("Started", local_time(session.created_at), styles::list_item_style()));
            lines.push(field(
                "Remember me",
                if session.persistent { "yes" } else { "no" },
                styles::list_item_style(),
            ));
            if session.offline {
                lines.push(field("Login", "offline (cached)", styles::highlight_style()));
            }
            if let Some(countdown) = app.expiry_countdown() {
                let style = if app.session_state() == SessionState::Expiring {
                    styles::highlight_style()
                } else {
                    styles::list_item_style()
                };
                lines.push(field("Expires in", countdown, style));
            }
            if let Some(at) = app.ctx.session().last_activity() {
                lines.push(field("Last activity", local_time(at), styles::muted_style()));
            }
        }
        None => lines.push(Line::from(Span::styled(" Not logged in", styles::muted_style()))),
    }

    let block = Block::default()
        .title(Span::styled(" Session ", styles::title_style()))
        .borders(Borders::ALL)
        .border_style(styles::border_style(true));
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_connectivity_panel(frame: &mut Frame, app: &App, area: Rect) {
    let online = app.ctx.connectivity().is_online();
    let queued = app.ctx.queue().len();
    let mut lines = vec![
        field(
            "Backend",
            if online { "online" } else { "offline" },
            styles::flag_style(online),
        ),
        field(
            "Queued",
            format!("{} operation(s)", queued),
            if queued == 0 {
                styles::list_item_style()
            } else {
                styles::highlight_style()
            },
        ),
    ];
    if let Some(at) = app.ctx.connectivity().last_online() {
        lines.push(field("Last online", local_time(at), styles::muted_style()));
    }

    let block = Block::default()
        .title(Span::styled(" Connectivity ", styles::title_style()))
        .borders(Borders::ALL)
        .border_style(styles::border_style(false));
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_guard_panel(frame: &mut Frame, app: &App, area: Rect) {
    let mut lines = Vec::new();
    match app.guard_status {
        Some(ref status) => {
            lines.push(field(
                "Alt-tab block",
                if status.alt_tab_prevention { "on" } else { "off" },
                styles::flag_style(status.alt_tab_prevention),
            ));
            lines.push(field(
                "Host timer",
                if status.session_timer_armed { "armed" } else { "idle" },
                styles::list_item_style(),
            ));
            for (kind, state) in &status.permissions {
                let (label, style) = match state {
                    PermissionState::Granted => ("granted", styles::success_style()),
                    PermissionState::Denied => ("denied", styles::error_style()),
                    PermissionState::Prompt => ("not asked", styles::muted_style()),
                };
                lines.push(field(permission_label(*kind), label, style));
            }
            let recording = if status.recording_tools.is_empty() {
                field("Recording", "none detected", styles::success_style())
            } else {
                field("Recording", status.recording_tools.join(", "), styles::error_style())
            };
            lines.push(recording);
        }
        None => {
            lines.push(field(
                "Alt-tab block",
                if app.alt_tab.is_enabled() { "on (terminal only)" } else { "off" },
                styles::flag_style(app.alt_tab.is_enabled()),
            ));
            lines.push(Line::from(Span::styled(
                " Host guards not running (set EXAMGUARD_DESKTOP=true)",
                styles::muted_style(),
            )));
        }
    }

    let block = Block::default()
        .title(Span::styled(" Guards ", styles::title_style()))
        .borders(Borders::ALL)
        .border_style(styles::border_style(false));
    frame.render_widget(Paragraph::new(lines).block(block).wrap(Wrap { trim: false }), area);
}

fn permission_label(kind: examguard_core::host::PermissionKind) -> &'static str {
    use examguard_core::host::PermissionKind;
    match kind {
        PermissionKind::Camera => "Camera",
        PermissionKind::Microphone => "Microphone",
        PermissionKind::Screen => "Screen",
    }
}

fn render_status_bar(frame: &mut Frame, app: &App, area: Rect) {
    let shortcuts = "[l]ogout | [s]ync | [a]lt-tab | [q]uit";

    let left_text = match app.status_message {
        Some(ref msg) => format!(" {} ", msg),
        None => " Ready ".to_string(),
    };
    let right_text = format!(" {} ", shortcuts);

    let padding_len = (area.width as usize)
        .saturating_sub(left_text.chars().count())
        .saturating_sub(right_text.len());
    let left_style = if app.recording_alert.is_empty() {
        styles::muted_style()
    } else {
        styles::error_style()
    };
    let status_line = Line::from(vec![
        Span::styled(left_text, left_style),
        Span::raw(" ".repeat(padding_len)),
        Span::styled(right_text, styles::muted_style()),
    ]);
    frame.render_widget(
        Paragraph::new(status_line).style(styles::status_bar_style()),
        area,
    );
}

fn logo_lines() -> Vec<Line<'static>> {
    LOGO.iter()
        .map(|row| Line::from(Span::styled(*row, styles::title_style())))
        .collect()
}

fn help_line(key: &'static str, desc: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("  {:<10}", key), styles::help_key_style()),
        Span::styled(desc, styles::help_desc_style()),
    ])
}

fn render_help_overlay(frame: &mut Frame) {
    let area = centered_rect_fixed(50, 20, frame.area());
    frame.render_widget(Clear, area);

    let mut lines = logo_lines();
    lines.push(Line::from(Span::styled(
        format!("              version {}", env!("CARGO_PKG_VERSION")),
        styles::muted_style(),
    )));
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(" Session", styles::highlight_style())));
    lines.push(help_line("l", "Log out"));
    lines.push(help_line("s", "Replay queued operations"));
    lines.push(help_line("p", "Check backend reachability"));
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(" Guards", styles::highlight_style())));
    lines.push(help_line("a", "Toggle alt-tab prevention"));
    lines.push(help_line("g", "Refresh guard status"));
    lines.push(Line::from(""));
    lines.push(help_line("q", "Quit"));
    lines.push(Line::from(""));
    lines.push(Line::from(vec![
        Span::styled("       Press ", styles::muted_style()),
        Span::styled("?", styles::help_key_style()),
        Span::styled(" or ", styles::muted_style()),
        Span::styled("Esc", styles::help_key_style()),
        Span::styled(" to close", styles::muted_style()),
    ]));

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(styles::border_style(true));
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn focus_style(focused: bool) -> Style {
    if focused {
        styles::selected_style()
    } else {
        styles::list_item_style()
    }
}

fn render_login_overlay(frame: &mut Frame, app: &App) {
    let height = if app.login_error.is_some() { 16 } else { 14 };
    let area = centered_rect_fixed(46, height, frame.area());
    frame.render_widget(Clear, area);

    let mut lines = logo_lines();
    lines.push(Line::from(""));

    let username_focused = app.login_focus == LoginFocus::Username;
    let cursor = if username_focused { "▌" } else { "" };
    lines.push(Line::from(vec![
        Span::raw("      "),
        Span::styled("Username: [", styles::muted_style()),
        Span::styled(
            format!("{:<16}{}", app.login_username, cursor),
            focus_style(username_focused),
        ),
        Span::styled("]", styles::muted_style()),
    ]));

    let password_focused = app.login_focus == LoginFocus::Password;
    let cursor = if password_focused { "▌" } else { "" };
    let masked = "*".repeat(app.login_password.chars().count().min(16));
    lines.push(Line::from(vec![
        Span::raw("      "),
        Span::styled("Password: [", styles::muted_style()),
        Span::styled(format!("{:<16}{}", masked, cursor), focus_style(password_focused)),
        Span::styled("]", styles::muted_style()),
    ]));

    lines.push(Line::from(vec![
        Span::raw("      "),
        Span::styled("Role:      ", styles::muted_style()),
        Span::styled(
            format!("◀ {:<8} ▶", app.login_role.as_str()),
            focus_style(app.login_focus == LoginFocus::Role),
        ),
    ]));

    lines.push(Line::from(vec![
        Span::raw("      "),
        Span::styled(
            format!("[{}] Remember me", if app.login_remember { "x" } else { " " }),
            focus_style(app.login_focus == LoginFocus::RememberMe),
        ),
    ]));

    lines.push(Line::from(""));
    let button = if app.login_focus == LoginFocus::Button {
        " ▶ Login ◀ "
    } else {
        "   Login   "
    };
    lines.push(Line::from(vec![
        Span::raw("            ["),
        Span::styled(button, focus_style(app.login_focus == LoginFocus::Button)),
        Span::raw("]"),
    ]));

    if let Some(ref error) = app.login_error {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(format!(" {}", error), styles::error_style())));
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(styles::border_style(true));
    frame.render_widget(
        Paragraph::new(lines).block(block).wrap(Wrap { trim: false }),
        area,
    );
}

/// Create a centered rectangle with fixed dimensions
fn centered_rect_fixed(width: u16, height: u16, r: Rect) -> Rect {
    let x = r.x + (r.width.saturating_sub(width)) / 2;
    let y = r.y + (r.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width.min(r.width), height.min(r.height))
}

fn render_quit_overlay(frame: &mut Frame) {
    let area = centered_rect_fixed(46, 10, frame.area());
    frame.render_widget(Clear, area);

    let mut lines = logo_lines();
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "   Are you sure you want to quit?",
        styles::highlight_style(),
    )));
    lines.push(Line::from(""));
    lines.push(Line::from(vec![
        Span::styled("   Press ", styles::muted_style()),
        Span::styled("[Y]", styles::help_key_style()),
        Span::styled(" to quit, ", styles::muted_style()),
        Span::styled("[N]", styles::help_key_style()),
        Span::styled(" to cancel", styles::muted_style()),
    ]));

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(styles::border_style(true));
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centered_rect_fits_small_area() {
        let area = Rect::new(0, 0, 30, 8);
        let rect = centered_rect_fixed(46, 10, area);
        assert_eq!(rect.width, 30);
        assert_eq!(rect.height, 8);

        let rect = centered_rect_fixed(20, 4, Rect::new(0, 0, 40, 10));
        assert_eq!((rect.x, rect.y), (10, 3));
    }
}
