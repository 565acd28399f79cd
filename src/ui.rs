use ratatui::{
    Frame,
    layout::{Constraint, Flex, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};
use crate::app::{App, FocusPane, InputMode, Phase, SidebarItem};
use crate::api_token::TokenSource;
use crate::models::ChatRole;

const SIDEBAR_WIDTH: u16 = 36;

/// Parse a line of text and convert **bold** markdown to styled spans
fn parse_markdown_line<'a>(text: &str) -> Line<'a> {
    let mut spans: Vec<Span<'a>> = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find("**") {
        let after = &rest[start + 2..];
        let Some(len) = after.find("**").filter(|&len| len > 0) else {
            break;
        };
        if start > 0 {
            spans.push(Span::raw(rest[..start].to_string()));
        }
        spans.push(Span::styled(
            after[..len].to_string(),
            Style::default().add_modifier(Modifier::BOLD),
        ));
        rest = &after[len + 2..];
    }

    if !rest.is_empty() {
        spans.push(Span::raw(rest.to_string()));
    }

    Line::from(spans)
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, footer
    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);

    match app.phase {
        Phase::Chatting => render_chat_screen(app, frame, body_area),
        _ => render_login_screen(app, frame, body_area),
    }

    render_footer(app, frame, footer_area);

    // Popups
    if app.show_api_key_input {
        render_api_key_input(app, frame, area);
    } else if app.show_token_panel && app.phase == Phase::Chatting {
        render_token_panel(app, frame, body_area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let signed_in = if app.session.is_authenticated() {
        Span::styled(" signed in ", Style::default().fg(Color::Green))
    } else {
        Span::styled(" signed out ", Style::default().fg(Color::Gray))
    };

    let title = Line::from(vec![
        Span::styled(" 🦙💬 Llama 2 Chatbot ", Style::default().fg(Color::Cyan).bold()),
        signed_in,
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::Gray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let (mode_text, mode_style) = match (&app.phase, app.input_mode) {
        (Phase::Chatting, InputMode::Editing) => (" PROMPT ", Style::default().bg(Color::Yellow).fg(Color::Black)),
        (Phase::Chatting, InputMode::Normal) => (" CHAT ", Style::default().bg(Color::Blue).fg(Color::White)),
        _ => (" SIGN IN ", Style::default().bg(Color::Magenta).fg(Color::White)),
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);
    let hint = |key: &'static str, label: &'static str| {
        [Span::styled(key, key_style), Span::styled(label, label_style)]
    };

    let hints: Vec<Span> = if app.show_api_key_input {
        [hint(" Enter ", " save "), hint(" Esc ", " cancel ")].concat()
    } else {
        match (&app.phase, app.input_mode) {
            (Phase::Unauthenticated, _) => [hint(" Enter ", " continue with Descope "), hint(" q ", " quit ")].concat(),
            (Phase::Authorizing { .. }, _) => [hint(" Esc ", " cancel "), hint(" q ", " quit ")].concat(),
            (Phase::Chatting, InputMode::Editing) => [hint(" Enter ", " send "), hint(" Esc ", " done ")].concat(),
            (Phase::Chatting, InputMode::Normal) => {
                let mut hints = match app.focus {
                    FocusPane::Sidebar => [hint(" j/k ", " select "), hint(" h/l ", " adjust "), hint(" Enter ", " activate ")].concat(),
                    _ => [hint(" j/k ", " scroll "), hint(" i ", " type ")].concat(),
                };
                hints.extend(
                    [
                        hint(" Tab ", " focus "),
                        hint(" C ", " clear "),
                        hint(" t ", " token "),
                        hint(" R ", " refresh "),
                        hint(" O ", " sign out "),
                        hint(" q ", " quit "),
                    ]
                    .concat(),
                );
                hints
            }
        }
    };

    let mut spans = vec![Span::styled(mode_text, mode_style), Span::raw(" ")];
    spans.extend(hints);

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_login_screen(app: &App, frame: &mut Frame, area: Rect) {
    let box_width = 64.min(area.width.saturating_sub(4));
    let box_height = 11.min(area.height);
    let [box_area] = Layout::horizontal([Constraint::Length(box_width)])
        .flex(Flex::Center)
        .areas(area);
    let [box_area] = Layout::vertical([Constraint::Length(box_height)])
        .flex(Flex::Center)
        .areas(box_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(" 🦙💬 Llama 2 Chatbot ");

    let mut lines = vec![
        Line::default(),
        Line::from("Sign in to start chatting.").centered(),
        Line::default(),
    ];

    match &app.phase {
        Phase::Authorizing { url } => {
            lines.push(
                Line::from(Span::styled(
                    "Waiting for sign-in in your browser...",
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::ITALIC),
                ))
                .centered(),
            );
            if let Some(url) = url {
                lines.push(Line::default());
                lines.push(Line::from(Span::styled(
                    "If no browser opened, visit:",
                    Style::default().fg(Color::DarkGray),
                )));
                lines.push(Line::from(Span::styled(url.clone(), Style::default().fg(Color::Cyan))));
            }
        }
        _ => {
            lines.push(
                Line::from(Span::styled(
                    " Continue with Descope ",
                    Style::default()
                        .bg(Color::Blue)
                        .fg(Color::White)
                        .add_modifier(Modifier::BOLD),
                ))
                .centered(),
            );
            lines.push(Line::default());
            lines.push(
                Line::from(Span::styled("Press Enter", Style::default().fg(Color::DarkGray))).centered(),
            );
        }
    }

    let login = Paragraph::new(Text::from(lines))
        .block(block)
        .wrap(Wrap { trim: false });
    frame.render_widget(login, box_area);
}

fn render_chat_screen(app: &mut App, frame: &mut Frame, area: Rect) {
    let [sidebar_area, main_area] = Layout::horizontal([
        Constraint::Length(SIDEBAR_WIDTH.min(area.width / 2)),
        Constraint::Min(0),
    ])
    .areas(area);

    render_sidebar(app, frame, sidebar_area);

    let [transcript_area, status_area, input_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(1),
        Constraint::Length(3),
    ])
    .areas(main_area);

    render_transcript(app, frame, transcript_area);

    if let Some(status) = &app.status {
        let style = if status.starts_with("Error") {
            Style::default().fg(Color::Red)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        frame.render_widget(Paragraph::new(format!(" {}", status)).style(style), status_area);
    }

    render_input(app, frame, input_area);
}

fn render_sidebar(app: &mut App, frame: &mut Frame, area: Rect) {
    app.sidebar_area = Some(area);

    let focused = app.focus == FocusPane::Sidebar;
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if focused { Color::Cyan } else { Color::DarkGray }))
        .title(" Settings ");
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let [list_area, notice_area] = Layout::vertical([
        Constraint::Length(SidebarItem::all().len() as u16),
        Constraint::Min(0),
    ])
    .spacing(1)
    .areas(inner);

    let token_text = match &app.api_token {
        Some(token) if token.source() == TokenSource::Secrets => "from secrets",
        Some(_) if app.usable_token().is_ok() => "entered",
        Some(_) => "invalid",
        None => "not set",
    };
    let params = app.session.params;

    let items: Vec<ListItem> = SidebarItem::all()
        .iter()
        .map(|item| {
            let text = match item {
                SidebarItem::ApiToken => format!("Replicate token: {}", token_text),
                SidebarItem::Model => format!("Model: ◂ {} ▸", app.session.model.label()),
                SidebarItem::Temperature => format!("temperature: {:.2}", params.temperature),
                SidebarItem::TopP => format!("top_p: {:.2}", params.top_p),
                SidebarItem::MaxLength => format!("max_length: {}", params.max_length),
                SidebarItem::ClearHistory => "Clear Chat History".to_string(),
            };
            let style = if *item == SidebarItem::ClearHistory && app.is_generating() {
                Style::default().fg(Color::DarkGray)
            } else {
                Style::default()
            };
            ListItem::new(text).style(style)
        })
        .collect();

    let highlight = if focused {
        Style::default().bg(Color::Blue).fg(Color::White).add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    };
    let list = List::new(items)
        .highlight_style(highlight)
        .highlight_symbol(if focused { "> " } else { "  " });
    frame.render_stateful_widget(list, list_area, &mut app.sidebar_state);

    let notice = app.token_notice();
    let (icon, color) = if notice.is_ok() {
        ("✅ ", Color::Green)
    } else {
        ("⚠️ ", Color::Yellow)
    };
    let notice = Paragraph::new(Line::from(vec![
        Span::raw(icon),
        Span::styled(notice.message(), Style::default().fg(color)),
    ]))
    .wrap(Wrap { trim: true });
    frame.render_widget(notice, notice_area);
}

fn render_transcript(app: &mut App, frame: &mut Frame, area: Rect) {
    app.transcript_area = Some(area);
    app.transcript_height = area.height.saturating_sub(2);
    app.transcript_width = area.width.saturating_sub(2);

    let focused = app.focus == FocusPane::Transcript;
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if focused { Color::Cyan } else { Color::DarkGray }))
        .title(format!(" {} ", app.session.model.label()));

    let user_label = || Line::from(Span::styled("You:", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)));
    let assistant_label =
        || Line::from(Span::styled("Assistant:", Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)));

    let mut lines: Vec<Line> = Vec::new();
    for msg in app.session.messages() {
        match msg.role {
            ChatRole::User => {
                lines.push(user_label());
                lines.push(Line::from(msg.content.as_str()));
            }
            ChatRole::Assistant => {
                lines.push(assistant_label());
                for text in msg.content.lines() {
                    lines.push(parse_markdown_line(text));
                }
            }
        }
        lines.push(Line::default());
    }

    if let Some(pending) = &app.pending {
        lines.push(assistant_label());
        if pending.is_empty() {
            // Animated ellipsis: cycles through ".", "..", "..."
            let dots = ".".repeat((app.animation_frame as usize) + 1);
            lines.push(Line::from(Span::styled(
                format!("Thinking{}", dots),
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
            )));
        } else {
            let mut streamed: Vec<Line> = pending.lines().map(|text| parse_markdown_line(text)).collect();
            if pending.ends_with('\n') || streamed.is_empty() {
                streamed.push(Line::default());
            }
            if let Some(last) = streamed.last_mut() {
                last.push_span(Span::styled("▌", Style::default().fg(Color::Yellow)));
            }
            lines.extend(streamed);
        }
    }

    let transcript = Paragraph::new(Text::from(lines))
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((app.transcript_scroll, 0));

    frame.render_widget(transcript, area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let enabled = app.input_enabled();
    let editing = app.input_mode == InputMode::Editing;
    let border_color = if editing || app.focus == FocusPane::Input {
        Color::Yellow
    } else {
        Color::DarkGray
    };

    let title = if enabled || editing {
        " Your message "
    } else if app.is_generating() {
        " Waiting for the response... "
    } else {
        " Enter a Replicate API token to chat "
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    // Horizontal scrolling keeps the cursor visible
    let inner_width = area.width.saturating_sub(2) as usize;
    let cursor_pos = app.prompt_cursor;
    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    let visible_text: String = app.prompt_input
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let style = if enabled || editing {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    frame.render_widget(Paragraph::new(visible_text).style(style).block(block), area);

    if editing {
        let cursor_x = (cursor_pos - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

/// Centered popup rect, clamped to `area`
fn popup_rect(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width.saturating_sub(4));
    let height = height.min(area.height.saturating_sub(2));
    let x = area.x + (area.width.saturating_sub(width)) / 2;
    let y = area.y + (area.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width, height)
}

fn render_token_panel(app: &App, frame: &mut Frame, area: Rect) {
    let Some(credential) = app.session.credential() else {
        return;
    };

    let popup_area = popup_rect(area, 90, area.height.saturating_sub(4));
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta))
        .title(" Session token (t to close) ");

    let json = Paragraph::new(credential.to_pretty_json())
        .block(block)
        .wrap(Wrap { trim: false });
    frame.render_widget(json, popup_area);
}

fn render_api_key_input(app: &App, frame: &mut Frame, area: Rect) {
    let popup_area = popup_rect(area, 60, 7);
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Enter Replicate API token ");

    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let instructions = Paragraph::new("Paste your token below. Enter to use it for this session, Esc to cancel.")
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(instructions, Rect::new(inner.x, inner.y, inner.width, 1));

    let input_area = Rect::new(inner.x, inner.y + 2, inner.width, 1);

    // Mask the token with asterisks (show last 4 chars)
    let char_count = app.api_key_input.chars().count();
    let display_text = if char_count <= 4 {
        "*".repeat(char_count)
    } else {
        let masked_len = char_count - 4;
        let last_four: String = app.api_key_input.chars().skip(masked_len).collect();
        format!("{}...{}", "*".repeat(masked_len.min(20)), last_four)
    };
    frame.render_widget(Paragraph::new(display_text).style(Style::default().fg(Color::Cyan)), input_area);

    let cursor_x = app.api_key_input_cursor.min(input_area.width as usize) as u16;
    frame.set_cursor_position((input_area.x + cursor_x, input_area.y));

    let status = match crate::api_token::check_format(&app.api_key_input) {
        Ok(()) => Span::styled("looks like a Replicate token", Style::default().fg(Color::Green)),
        Err(e) => Span::styled(format!("{} ({} characters)", e, char_count), Style::default().fg(Color::DarkGray)),
    };
    frame.render_widget(Paragraph::new(Line::from(status)), Rect::new(inner.x, inner.y + 4, inner.width, 1));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_markdown_bold() {
        let line = parse_markdown_line("a **bold** move");
        let contents: Vec<&str> = line.spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(contents, vec!["a ", "bold", " move"]);
        assert!(line.spans[1].style.add_modifier.contains(Modifier::BOLD));
    }

    #[test]
    fn test_parse_markdown_unclosed_is_literal() {
        let line = parse_markdown_line("5 ** 2");
        let contents: Vec<&str> = line.spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(contents, vec!["5 ** 2"]);
    }

    #[test]
    fn test_chat_screen_renders_transcript() {
        use crate::auth::Credential;
        use crate::config::{IdentityProvider, Secrets, Settings};
        use ratatui::{backend::TestBackend, Terminal};

        let identity = IdentityProvider::descope("client", "auth.example.com", "http://127.0.0.1:0").unwrap();
        let settings = Settings::new(identity, "http://127.0.0.1:9", Some("r8_token".to_string()), Secrets::default());
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let mut app = App::new(settings, tx);
        app.session
            .set_credential(Credential::from_token_response(serde_json::json!({"access_token": "at"})).unwrap());
        app.phase = Phase::Chatting;
        app.session.push_user("hello llama");
        app.session.push_assistant("a **bold** reply\nsecond line");
        app.pending = Some("still typing".to_string());

        let mut terminal = Terminal::new(TestBackend::new(120, 40)).unwrap();
        terminal.draw(|frame| render(&mut app, frame)).unwrap();

        let screen: String = terminal.backend().buffer().content.iter().map(|cell| cell.symbol()).collect();
        assert!(screen.contains("hello llama"));
        assert!(screen.contains("a bold reply"));
        assert!(screen.contains("second line"));
        assert!(screen.contains("still typing"));
        assert_eq!(app.transcript_area.map(|a| a.width > 0), Some(true));
    }

    #[test]
    fn test_popup_rect_is_centered_and_clamped() {
        let area = Rect::new(0, 0, 100, 40);
        assert_eq!(popup_rect(area, 60, 10), Rect::new(20, 15, 60, 10));
        assert_eq!(popup_rect(Rect::new(0, 0, 30, 5), 60, 10), Rect::new(2, 1, 26, 3));
    }
}
