use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};
use zev_core::{models, ChatRole};

use crate::app::{App, FocusPane, InputMode};

/// Colors for the two display modes.
struct Theme {
    text: Color,
    muted: Color,
    accent: Color,
    user: Color,
    assistant: Color,
    bar_bg: Color,
    code: Color,
}

impl Theme {
    fn for_app(app: &App) -> Self {
        if app.dark_mode {
            Self {
                text: Color::White,
                muted: Color::DarkGray,
                accent: Color::Cyan,
                user: Color::Cyan,
                assistant: Color::Yellow,
                bar_bg: Color::Black,
                code: Color::Green,
            }
        } else {
            Self {
                text: Color::Black,
                muted: Color::Gray,
                accent: Color::Blue,
                user: Color::Blue,
                assistant: Color::Magenta,
                bar_bg: Color::White,
                code: Color::Red,
            }
        }
    }
}

/// Parse a line of text and convert **bold** and `code` markdown to styled spans
fn parse_markdown_line(text: &str, code_color: Color) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.chars().peekable();
    let mut current_text = String::new();

    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();

                let mut bold_text = String::new();
                let mut found_close = false;
                while let Some(c) = chars.next() {
                    if c == '*' && chars.peek() == Some(&'*') {
                        chars.next();
                        found_close = true;
                        break;
                    }
                    bold_text.push(c);
                }

                if found_close && !bold_text.is_empty() {
                    if !current_text.is_empty() {
                        spans.push(Span::raw(std::mem::take(&mut current_text)));
                    }
                    spans.push(Span::styled(
                        bold_text,
                        Style::default().add_modifier(Modifier::BOLD),
                    ));
                } else {
                    // No closing **, treat as literal
                    current_text.push_str("**");
                    current_text.push_str(&bold_text);
                }
            }
            '`' => {
                let mut code_text = String::new();
                let mut found_close = false;
                for c in chars.by_ref() {
                    if c == '`' {
                        found_close = true;
                        break;
                    }
                    code_text.push(c);
                }

                if found_close && !code_text.is_empty() {
                    if !current_text.is_empty() {
                        spans.push(Span::raw(std::mem::take(&mut current_text)));
                    }
                    spans.push(Span::styled(code_text, Style::default().fg(code_color)));
                } else {
                    current_text.push('`');
                    current_text.push_str(&code_text);
                    if found_close {
                        current_text.push('`');
                    }
                }
            }
            _ => current_text.push(c),
        }
    }

    if !current_text.is_empty() {
        spans.push(Span::raw(current_text));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

/// Render message content, showing fenced code blocks verbatim.
fn push_markdown(lines: &mut Vec<Line<'static>>, content: &str, theme: &Theme) {
    let mut in_fence = false;
    for line in content.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            lines.push(Line::from(Span::styled(
                line.to_string(),
                Style::default().fg(theme.muted),
            )));
        } else if in_fence {
            lines.push(Line::from(Span::styled(
                line.to_string(),
                Style::default().fg(theme.code),
            )));
        } else {
            lines.push(parse_markdown_line(line, theme.code));
        }
    }
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();
    let theme = Theme::for_app(app);

    // Main layout: header, body, footer
    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, &theme, frame, header_area);

    let [sidebar_area, main_area] = Layout::horizontal([
        Constraint::Length(30),
        Constraint::Min(0),
    ])
    .areas(body_area);

    // Store areas for mouse hit-testing
    app.sidebar_area = Some(sidebar_area);

    render_sidebar(app, &theme, frame, sidebar_area);
    render_chat(app, &theme, frame, main_area);
    render_footer(app, &theme, frame, footer_area);

    // Render popups (in order of priority)
    if app.show_api_key_input {
        render_api_key_input(app, &theme, frame, area);
    } else if app.show_model_picker {
        render_model_picker(app, &theme, frame, area);
    }
}

fn render_header(app: &App, theme: &Theme, frame: &mut Frame, area: Rect) {
    let mode = if app.superagent_mode {
        Span::styled(" [superagent] ", Style::default().fg(Color::Magenta).bold())
    } else {
        Span::raw("")
    };

    let title = Line::from(vec![
        Span::styled(" Zev ", Style::default().fg(theme.accent).bold()),
        mode,
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(theme.muted),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(theme.bar_bg));
    frame.render_widget(header, area);
}

fn render_footer(app: &App, theme: &Theme, frame: &mut Frame, area: Rect) {
    let mode_style = match app.input_mode {
        InputMode::Normal => Style::default().bg(Color::Blue).fg(Color::White),
        InputMode::Editing => Style::default().bg(Color::Yellow).fg(Color::Black),
    };
    let mode_text = match app.input_mode {
        InputMode::Normal => " NORMAL ",
        InputMode::Editing => " INSERT ",
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(theme.bar_bg).fg(theme.text);

    let mut hints = match app.input_mode {
        InputMode::Editing => vec![
            Span::styled(" Enter ", key_style),
            Span::styled(" send ", label_style),
            Span::styled(" Alt+Enter ", key_style),
            Span::styled(" newline ", label_style),
            Span::styled(" Esc ", key_style),
            Span::styled(" stop typing ", label_style),
        ],
        InputMode::Normal => vec![
            Span::styled(" i ", key_style),
            Span::styled(" type ", label_style),
            Span::styled(" n ", key_style),
            Span::styled(" new ", label_style),
            Span::styled(" M ", key_style),
            Span::styled(" model ", label_style),
            Span::styled(" S ", key_style),
            Span::styled(" superagent ", label_style),
            Span::styled(" D ", key_style),
            Span::styled(if app.dark_mode { " light " } else { " dark " }, label_style),
            Span::styled(" K ", key_style),
            Span::styled(" key ", label_style),
            Span::styled(" q ", key_style),
            Span::styled(" quit ", label_style),
        ],
    };
    if app.loading {
        hints.extend(vec![
            Span::styled(" Ctrl+S ", key_style),
            Span::styled(" stop ", label_style),
        ]);
    }

    let footer_content = Line::from(
        vec![
            Span::styled(mode_text, mode_style),
            Span::styled(" ", label_style),
        ]
        .into_iter()
        .chain(hints)
        .collect::<Vec<_>>(),
    );

    let footer = Paragraph::new(footer_content).style(Style::default().bg(theme.bar_bg));
    frame.render_widget(footer, area);
}

fn render_sidebar(app: &mut App, theme: &Theme, frame: &mut Frame, area: Rect) {
    let focused = app.focus == FocusPane::Sidebar;
    let border_color = if focused { theme.accent } else { theme.muted };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(" Chats ");

    let items: Vec<ListItem> = app
        .conversations
        .iter()
        .map(|c| {
            let marker = if c.is_streaming() { "~ " } else { "" };
            ListItem::new(format!(" {}{} ", marker, c.title))
                .style(Style::default().fg(theme.text))
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, area, &mut app.sidebar_state);
}

fn render_chat(app: &mut App, theme: &Theme, frame: &mut Frame, area: Rect) {
    let error_height = if app.error.is_some() { 3 } else { 0 };
    let input_height = (app.input.lines().count().max(1) as u16 + 2).min(8);

    let [chat_area, error_area, input_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(error_height),
        Constraint::Length(input_height),
    ])
    .areas(area);

    app.chat_area = Some(chat_area);

    // Store chat area dimensions for scroll calculations (inner size minus borders)
    app.chat_height = chat_area.height.saturating_sub(2);
    app.chat_width = chat_area.width.saturating_sub(2);

    let chat_focused = app.focus == FocusPane::Chat;
    let border_color = if chat_focused { theme.accent } else { theme.muted };

    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(format!(" {} ", models::display_name(&app.selected_model)));

    let conversation = app.active_conversation();
    let visible: Vec<_> = conversation
        .messages
        .iter()
        .filter(|m| m.role != ChatRole::System)
        .collect();

    let chat_text = if visible.is_empty() && !app.loading {
        Text::from(Span::styled(
            "Ask anything...",
            Style::default().fg(theme.muted),
        ))
    } else {
        let mut lines: Vec<Line<'static>> = Vec::new();

        for msg in &visible {
            match msg.role {
                ChatRole::User => {
                    lines.push(Line::from(Span::styled(
                        "You:",
                        Style::default().fg(theme.user).add_modifier(Modifier::BOLD),
                    )));
                    for line in msg.content.lines() {
                        lines.push(Line::from(line.to_string()));
                    }
                }
                _ => {
                    lines.push(Line::from(Span::styled(
                        "AI:",
                        Style::default().fg(theme.assistant).add_modifier(Modifier::BOLD),
                    )));
                    if let Some(reasoning) = msg.reasoning.as_deref() {
                        for line in reasoning.lines() {
                            lines.push(Line::from(Span::styled(
                                line.to_string(),
                                Style::default().fg(theme.muted).add_modifier(Modifier::ITALIC),
                            )));
                        }
                    }
                    if msg.streaming && msg.content.is_empty() {
                        // Animated ellipsis: cycles through ".", "..", "..."
                        let dots = ".".repeat((app.animation_frame as usize) + 1);
                        lines.push(Line::from(Span::styled(
                            format!("Thinking{}", dots),
                            Style::default().fg(theme.muted).add_modifier(Modifier::ITALIC),
                        )));
                    } else {
                        push_markdown(&mut lines, &msg.content, theme);
                    }
                }
            }
            lines.push(Line::default());
        }

        // Superagent steps arrive whole, so show progress between them
        let awaiting_step = app.loading
            && visible.last().map(|m| !m.streaming).unwrap_or(true);
        if awaiting_step {
            let dots = ".".repeat((app.animation_frame as usize) + 1);
            lines.push(Line::from(Span::styled(
                "AI:",
                Style::default().fg(theme.assistant).add_modifier(Modifier::BOLD),
            )));
            lines.push(Line::from(Span::styled(
                format!("Working{}", dots),
                Style::default().fg(theme.muted).add_modifier(Modifier::ITALIC),
            )));
        }

        Text::from(lines)
    };

    let chat = Paragraph::new(chat_text)
        .style(Style::default().fg(theme.text))
        .block(chat_block)
        .wrap(Wrap { trim: false })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, chat_area);

    if let Some(error) = &app.error {
        let banner = Paragraph::new(error.as_str())
            .style(Style::default().fg(Color::Red))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Red))
                    .title(" Error (Esc to dismiss) "),
            )
            .wrap(Wrap { trim: true });
        frame.render_widget(banner, error_area);
    }

    render_input(app, theme, frame, input_area);
}

fn render_input(app: &App, theme: &Theme, frame: &mut Frame, area: Rect) {
    let input_focused = app.focus == FocusPane::Input;
    let border_color = if input_focused || app.input_mode == InputMode::Editing {
        Color::Yellow
    } else {
        theme.muted
    };

    let title = if app.superagent_mode {
        " Task for the superagent "
    } else {
        " Message "
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    // Calculate visible portion of the cursor line with horizontal scrolling
    let inner_width = area.width.saturating_sub(2) as usize;
    let inner_height = area.height.saturating_sub(2) as usize;

    let before_cursor: String = app.input.chars().take(app.cursor).collect();
    let cursor_row = before_cursor.matches('\n').count();
    let cursor_col = before_cursor
        .rsplit('\n')
        .next()
        .map(|l| l.chars().count())
        .unwrap_or(0);

    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_col >= inner_width {
        cursor_col - inner_width + 1
    } else {
        0
    };
    let row_offset = (cursor_row + 1).saturating_sub(inner_height.max(1));

    let visible_text: Vec<Line> = app
        .input
        .split('\n')
        .skip(row_offset)
        .take(inner_height)
        .map(|l| Line::from(l.chars().skip(scroll_offset).take(inner_width).collect::<String>()))
        .collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(theme.user))
        .block(block);

    frame.render_widget(input, area);

    // Show cursor when editing
    if app.input_mode == InputMode::Editing && !app.show_api_key_input && !app.show_model_picker {
        let cursor_x = (cursor_col - scroll_offset) as u16;
        let cursor_y = (cursor_row - row_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + cursor_y + 1));
    }
}

fn render_model_picker(app: &mut App, theme: &Theme, frame: &mut Frame, area: Rect) {
    // Calculate popup size and position (centered)
    let popup_width = 50.min(area.width.saturating_sub(4));
    let popup_height = (app.available_models.len() as u16 + 2).min(area.height.saturating_sub(4));

    let popup_x = (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = (area.height.saturating_sub(popup_height)) / 2;

    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.accent))
        .title(" Select Model (Enter to select, Esc to cancel) ");

    let items: Vec<ListItem> = app
        .available_models
        .iter()
        .map(|model| {
            let style = if model == &app.selected_model {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(theme.text)
            };
            let thinking = if models::supports_reasoning(model) { " (reasoning)" } else { "" };
            ListItem::new(format!(" {}{} ", models::display_name(model), thinking)).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .style(Style::default().bg(theme.bar_bg))
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, popup_area, &mut app.model_picker_state);
}

fn render_api_key_input(app: &App, theme: &Theme, frame: &mut Frame, area: Rect) {
    // Calculate popup size and position (centered)
    let popup_width = 60.min(area.width.saturating_sub(4));
    let popup_height = 7;

    let popup_x = (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = (area.height.saturating_sub(popup_height)) / 2;

    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .style(Style::default().bg(theme.bar_bg))
        .title(" Enter Groq API Key ");

    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let instructions = Paragraph::new("Paste your API key below. Press Enter to save, Esc to cancel.")
        .style(Style::default().fg(theme.muted));

    let instructions_area = Rect::new(inner.x, inner.y, inner.width, 1);
    frame.render_widget(instructions, instructions_area);

    let input_area = Rect::new(inner.x, inner.y + 2, inner.width, 1);
    let display_text = mask_key(&app.api_key_input);

    let input = Paragraph::new(display_text)
        .style(Style::default().fg(theme.accent));

    frame.render_widget(input, input_area);

    let cursor_x = app.api_key_input_cursor.min(input_area.width as usize) as u16;
    frame.set_cursor_position((input_area.x + cursor_x, input_area.y));

    let status_text = match app.key_source() {
        Some("env") => "Currently using GROQ_API_KEY from the environment".to_string(),
        Some(_) => "A key is saved in the config file".to_string(),
        None => format!("{} characters", app.api_key_input.chars().count()),
    };
    let status = Paragraph::new(status_text)
        .style(Style::default().fg(theme.muted));

    let status_area = Rect::new(inner.x, inner.y + 4, inner.width, 1);
    frame.render_widget(status, status_area);
}

/// Mask the key with asterisks (show last 4 chars)
fn mask_key(key: &str) -> String {
    let len = key.chars().count();
    if len <= 4 {
        "*".repeat(len)
    } else {
        let masked_len = len - 4;
        let last_four: String = key.chars().skip(masked_len).collect();
        format!("{}...{}", "*".repeat(masked_len.min(20)), last_four)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(line: &Line) -> Vec<String> {
        line.spans.iter().map(|s| s.content.to_string()).collect()
    }

    #[test]
    fn bold_and_code_become_spans() {
        let line = parse_markdown_line("use **cargo** and `rustc` now", Color::Green);
        assert_eq!(texts(&line), vec!["use ", "cargo", " and ", "rustc", " now"]);
        assert!(line.spans[1].style.add_modifier.contains(Modifier::BOLD));
        assert_eq!(line.spans[3].style.fg, Some(Color::Green));
    }

    #[test]
    fn unclosed_markers_stay_literal() {
        let line = parse_markdown_line("a **b and `c", Color::Green);
        assert_eq!(texts(&line).concat(), "a **b and `c");
    }

    #[test]
    fn fenced_block_is_not_parsed() {
        let theme = Theme {
            text: Color::White,
            muted: Color::DarkGray,
            accent: Color::Cyan,
            user: Color::Cyan,
            assistant: Color::Yellow,
            bar_bg: Color::Black,
            code: Color::Green,
        };
        let mut lines = Vec::new();
        push_markdown(&mut lines, "```rust\nlet **x** = 1;\n```\n**done**", &theme);
        assert_eq!(lines.len(), 4);
        assert_eq!(texts(&lines[1]), vec!["let **x** = 1;"]);
        assert_eq!(texts(&lines[3]), vec!["done"]);
    }

    #[test]
    fn key_mask_keeps_last_four() {
        assert_eq!(mask_key(""), "");
        assert_eq!(mask_key("abc"), "***");
        assert_eq!(mask_key("gsk_123456"), "******...3456");
    }
}
