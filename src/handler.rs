use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;
use crate::app::{App, FocusPane, InputMode, Phase};
use crate::tui::AppEvent;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub async fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key)?,
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => {
            app.tick_animation();
        }

        AppEvent::AuthUrl(attempt, url) => app.on_auth_url(attempt, url),
        AppEvent::AuthFinished(attempt, result) => app.on_auth_finished(attempt, result),
        AppEvent::CredentialRefreshed(result) => app.on_credential_refreshed(result),
        AppEvent::SignedOut(result) => app.on_signed_out(result),

        AppEvent::Fragment(text) => app.on_fragment(text),
        AppEvent::ResponseFinished => app.on_response_finished(),
        AppEvent::ResponseFailed(message) => app.on_response_failed(message),
    }
    Ok(())
}

fn handle_key(app: &mut App, key: KeyEvent) -> Result<()> {
    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return Ok(());
    }

    // Popup first
    if app.show_api_key_input {
        handle_api_key_input(app, key);
        return Ok(());
    }

    match app.phase {
        Phase::Unauthenticated => handle_login(app, key),
        Phase::Authorizing { .. } => handle_authorizing(app, key),
        Phase::Chatting => match app.input_mode {
            InputMode::Normal => handle_chat_normal(app, key),
            InputMode::Editing => handle_prompt_editing(app, key),
        },
    }

    Ok(())
}

fn handle_login(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Enter | KeyCode::Char(' ') => app.start_sign_in(),
        KeyCode::Char('q') | KeyCode::Esc => app.should_quit = true,
        _ => {}
    }
}

fn handle_authorizing(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => app.cancel_sign_in(),
        KeyCode::Char('q') => app.should_quit = true,
        _ => {}
    }
}

fn handle_api_key_input(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.show_api_key_input = false;
            app.api_key_input.clear();
            app.api_key_input_cursor = 0;
        }
        KeyCode::Enter => app.submit_api_key(),
        KeyCode::Backspace => {
            if app.api_key_input_cursor > 0 {
                app.api_key_input_cursor -= 1;
                let byte_pos = char_to_byte_index(&app.api_key_input, app.api_key_input_cursor);
                app.api_key_input.remove(byte_pos);
            }
        }
        KeyCode::Char(c) => {
            let byte_pos = char_to_byte_index(&app.api_key_input, app.api_key_input_cursor);
            app.api_key_input.insert(byte_pos, c);
            app.api_key_input_cursor += 1;
        }
        KeyCode::Left => {
            app.api_key_input_cursor = app.api_key_input_cursor.saturating_sub(1);
        }
        KeyCode::Right => {
            let char_count = app.api_key_input.chars().count();
            app.api_key_input_cursor = (app.api_key_input_cursor + 1).min(char_count);
        }
        _ => {}
    }
}

fn handle_chat_normal(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => app.should_quit = true,

        // Tab cycles focus: Sidebar -> Transcript -> Input
        KeyCode::Tab => {
            app.focus = match app.focus {
                FocusPane::Sidebar => FocusPane::Transcript,
                FocusPane::Transcript => FocusPane::Input,
                FocusPane::Input => FocusPane::Sidebar,
            };
        }
        KeyCode::BackTab => {
            app.focus = match app.focus {
                FocusPane::Sidebar => FocusPane::Input,
                FocusPane::Transcript => FocusPane::Sidebar,
                FocusPane::Input => FocusPane::Transcript,
            };
        }

        KeyCode::Char('j') | KeyCode::Down => match app.focus {
            FocusPane::Sidebar => app.sidebar_nav_down(),
            _ => app.scroll_down(1),
        },
        KeyCode::Char('k') | KeyCode::Up => match app.focus {
            FocusPane::Sidebar => app.sidebar_nav_up(),
            _ => app.scroll_up(1),
        },
        KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_down(app.transcript_height / 2);
        }
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_up(app.transcript_height / 2);
        }
        KeyCode::Char('G') => app.scroll_transcript_to_bottom(),
        KeyCode::Char('g') => app.transcript_scroll = 0,

        // Sliders and model choice
        KeyCode::Char('h') | KeyCode::Left if app.focus == FocusPane::Sidebar => app.adjust_selected(-1),
        KeyCode::Char('l') | KeyCode::Right if app.focus == FocusPane::Sidebar => app.adjust_selected(1),
        KeyCode::Char('H') if app.focus == FocusPane::Sidebar => app.adjust_selected(-10),
        KeyCode::Char('L') if app.focus == FocusPane::Sidebar => app.adjust_selected(10),

        KeyCode::Enter => match app.focus {
            FocusPane::Sidebar => app.activate_selected(),
            _ => {
                if app.input_enabled() {
                    app.focus = FocusPane::Input;
                    app.input_mode = InputMode::Editing;
                }
            }
        },
        KeyCode::Char('i') | KeyCode::Char('a') => {
            if app.input_enabled() {
                app.focus = FocusPane::Input;
                app.input_mode = InputMode::Editing;
            }
        }

        KeyCode::Char('K') => app.open_api_key_input(),
        KeyCode::Char('C') => {
            app.clear_history();
        }
        KeyCode::Char('t') => app.show_token_panel = !app.show_token_panel,
        KeyCode::Char('R') => app.refresh_credential(),
        KeyCode::Char('O') => app.sign_out(),
        KeyCode::Esc => {
            app.show_token_panel = false;
            app.status = None;
        }

        _ => {}
    }
}

fn handle_prompt_editing(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.input_mode = InputMode::Normal;
        }
        KeyCode::Enter => {
            if app.submit_prompt() {
                app.input_mode = InputMode::Normal;
            }
        }
        KeyCode::Backspace => {
            if app.prompt_cursor > 0 {
                app.prompt_cursor -= 1;
                let byte_pos = char_to_byte_index(&app.prompt_input, app.prompt_cursor);
                app.prompt_input.remove(byte_pos);
            }
        }
        KeyCode::Delete => {
            let char_count = app.prompt_input.chars().count();
            if app.prompt_cursor < char_count {
                let byte_pos = char_to_byte_index(&app.prompt_input, app.prompt_cursor);
                app.prompt_input.remove(byte_pos);
            }
        }
        KeyCode::Left => {
            app.prompt_cursor = app.prompt_cursor.saturating_sub(1);
        }
        KeyCode::Right => {
            let char_count = app.prompt_input.chars().count();
            app.prompt_cursor = (app.prompt_cursor + 1).min(char_count);
        }
        KeyCode::Home => {
            app.prompt_cursor = 0;
        }
        KeyCode::End => {
            app.prompt_cursor = app.prompt_input.chars().count();
        }
        KeyCode::Char(c) => {
            let byte_pos = char_to_byte_index(&app.prompt_input, app.prompt_cursor);
            app.prompt_input.insert(byte_pos, c);
            app.prompt_cursor += 1;
        }
        _ => {}
    }
}

fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    if app.phase != Phase::Chatting {
        return;
    }

    let x = mouse.column;
    let y = mouse.row;

    let in_sidebar = app.sidebar_area.map(|r| point_in_rect(x, y, r)).unwrap_or(false);
    let in_transcript = app.transcript_area.map(|r| point_in_rect(x, y, r)).unwrap_or(false);

    match mouse.kind {
        MouseEventKind::ScrollDown => {
            if in_transcript {
                app.scroll_down(3);
            } else if in_sidebar {
                app.sidebar_nav_down();
            }
        }
        MouseEventKind::ScrollUp => {
            if in_transcript {
                app.scroll_up(3);
            } else if in_sidebar {
                app.sidebar_nav_up();
            }
        }
        MouseEventKind::Down(_) => {
            if in_sidebar {
                app.focus = FocusPane::Sidebar;
            } else if in_transcript {
                app.focus = FocusPane::Transcript;
            }
        }
        _ => {}
    }
}
