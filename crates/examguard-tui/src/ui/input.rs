//! Keyboard and mouse handling for the TUI.
//!
//! Every event is first reported to the activity tracker, then checked
//! against the alt-tab filter, then dispatched on the current app state.

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseEvent, MouseEventKind};
use examguard_core::activity::InputKind;
use examguard_core::auth::validation::{can_add_password_char, can_add_username_char};
use examguard_core::host::{ChordKey, ChordModifiers, KeyChord};
use tracing::debug;

use crate::app::{App, AppState, LoginFocus};

/// Translate a terminal key event into the chord vocabulary of the guard set.
pub fn chord_for(key: &KeyEvent) -> KeyChord {
    let chord_key = match key.code {
        KeyCode::Tab | KeyCode::BackTab => ChordKey::Tab,
        KeyCode::Esc => ChordKey::Escape,
        KeyCode::F(4) => ChordKey::F4,
        KeyCode::Char(c) => ChordKey::Char(c),
        _ => ChordKey::Other,
    };
    let modifiers = ChordModifiers {
        alt: key.modifiers.contains(KeyModifiers::ALT),
        ctrl: key.modifiers.contains(KeyModifiers::CONTROL),
        shift: key.modifiers.contains(KeyModifiers::SHIFT) || key.code == KeyCode::BackTab,
        meta: key.modifiers.intersects(KeyModifiers::SUPER | KeyModifiers::META),
    };
    KeyChord::new(chord_key, modifiers)
}

/// Mouse events that count as user activity.
pub fn input_kind_for_mouse(event: &MouseEvent) -> Option<InputKind> {
    match event.kind {
        MouseEventKind::Down(_) => Some(InputKind::PointerDown),
        MouseEventKind::ScrollUp
        | MouseEventKind::ScrollDown
        | MouseEventKind::ScrollLeft
        | MouseEventKind::ScrollRight => Some(InputKind::Scroll),
        _ => None,
    }
}

pub fn handle_mouse(app: &App, event: MouseEvent) {
    if let Some(kind) = input_kind_for_mouse(&event) {
        app.record_input(kind);
    }
}

/// Handle keyboard input. Returns true if the app should quit.
pub async fn handle_input(app: &mut App, key: KeyEvent) -> Result<bool> {
    if key.kind != KeyEventKind::Press {
        return Ok(false);
    }
    app.record_input(InputKind::KeyDown);

    if app.should_swallow(&chord_for(&key)) {
        debug!(code = ?key.code, "Window-switch chord swallowed");
        return Ok(false);
    }

    // Handle login overlay
    if matches!(app.state, AppState::LoggingIn) {
        return handle_login_input(app, key).await;
    }

    // Handle help overlay
    if matches!(app.state, AppState::ShowingHelp) {
        if matches!(key.code, KeyCode::Esc | KeyCode::Char('?') | KeyCode::Char('q')) {
            app.state = AppState::Normal;
        }
        return Ok(false);
    }

    // Handle quit confirmation
    if matches!(app.state, AppState::ConfirmingQuit) {
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => {
                app.state = AppState::Quitting;
                return Ok(true);
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                app.state = AppState::Normal;
            }
            _ => {}
        }
        return Ok(false);
    }

    match key.code {
        KeyCode::Char('q') => app.state = AppState::ConfirmingQuit,
        KeyCode::Char('?') => app.state = AppState::ShowingHelp,
        KeyCode::Char('l') => app.logout(),
        KeyCode::Char('s') => app.sync().await,
        KeyCode::Char('p') => app.probe_connectivity().await,
        KeyCode::Char('a') => app.toggle_alt_tab().await,
        KeyCode::Char('g') => {
            app.refresh_guard_status().await;
            if app.guard_status.is_none() {
                app.status_message = Some("Host guards are not running".to_string());
            }
        }
        KeyCode::Esc => app.status_message = None,
        _ => {}
    }
    Ok(false)
}

async fn handle_login_input(app: &mut App, key: KeyEvent) -> Result<bool> {
    match key.code {
        KeyCode::Esc => {
            // Quit if on login screen
            app.state = AppState::Quitting;
            return Ok(true);
        }
        KeyCode::Down | KeyCode::Tab => app.login_focus = app.login_focus.next(),
        KeyCode::Up | KeyCode::BackTab => app.login_focus = app.login_focus.prev(),
        KeyCode::Left | KeyCode::Right if app.login_focus == LoginFocus::Role => {
            app.login_role = app.login_role.toggle();
        }
        KeyCode::Enter => match app.login_focus {
            LoginFocus::Username | LoginFocus::Password | LoginFocus::Role => {
                app.login_focus = app.login_focus.next();
            }
            LoginFocus::RememberMe => app.login_remember = !app.login_remember,
            LoginFocus::Button => {
                app.attempt_login().await;
            }
        },
        KeyCode::Backspace => match app.login_focus {
            LoginFocus::Username => {
                app.login_username.pop();
            }
            LoginFocus::Password => {
                app.login_password.pop();
            }
            _ => {}
        },
        KeyCode::Char(' ') if app.login_focus == LoginFocus::Role => {
            app.login_role = app.login_role.toggle();
        }
        KeyCode::Char(' ') if app.login_focus == LoginFocus::RememberMe => {
            app.login_remember = !app.login_remember;
        }
        KeyCode::Char(c) => match app.login_focus {
            LoginFocus::Username => {
                if can_add_username_char(app.login_username.chars().count(), c) {
                    app.login_username.push(c);
                }
            }
            LoginFocus::Password => {
                if can_add_password_char(app.login_password.chars().count(), c) {
                    app.login_password.push(c);
                }
            }
            _ => {}
        },
        _ => {}
    }
    Ok(false)
}
