use crate::state::{App, FormField, ProcessForm};
use chrono::Utc;
use procdeck_core::ProcStatus;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, List, ListItem, Paragraph, Row, Table, Wrap},
    Frame,
};

#[derive(Clone, Copy)]
struct Theme {
    border: Color,
    title: Color,
    text: Color,
    muted: Color,
    accent: Color,
    ok: Color,
    warn: Color,
    critical: Color,
}

fn theme() -> Theme {
    Theme {
        border: Color::Rgb(71, 85, 105),
        title: Color::Rgb(191, 219, 254),
        text: Color::Rgb(226, 232, 240),
        muted: Color::Rgb(148, 163, 184),
        accent: Color::Rgb(56, 189, 248),
        ok: Color::Rgb(34, 197, 94),
        warn: Color::Rgb(245, 158, 11),
        critical: Color::Rgb(239, 68, 68),
    }
}

fn status_color(status: ProcStatus, theme: &Theme) -> Color {
    match status {
        ProcStatus::NotStarted => theme.muted,
        ProcStatus::Running => theme.ok,
        ProcStatus::Stopping => theme.warn,
        ProcStatus::Stopped => theme.critical,
    }
}

pub fn render(frame: &mut Frame, app: &App) {
    let theme = theme();
    let outer = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(1)])
        .split(frame.size());

    let overlay_open =
        app.form.is_some() || app.show_env || app.show_help || app.show_details;
    if overlay_open {
        let main = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(outer[0]);
        render_process_list(frame, app, &theme, main[0]);
        if let Some(form) = &app.form {
            render_form(frame, form, &theme, main[1]);
        } else if app.show_help {
            render_help(frame, &theme, main[1]);
        } else if app.show_env {
            render_env(frame, app, &theme, main[1]);
        } else {
            render_details(frame, app, &theme, main[1]);
        }
    } else {
        render_process_list(frame, app, &theme, outer[0]);
    }

    render_status_line(frame, app, &theme, outer[1]);
}

fn render_process_list(frame: &mut Frame, app: &App, theme: &Theme, area: Rect) {
    let records = app.mirror.procs().snapshot_ordered();
    let header = Row::new(vec!["num", "name", "status", "program"])
        .style(Style::default().fg(theme.muted).add_modifier(Modifier::BOLD));

    let rows: Vec<Row> = records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let row_style = if index == app.selected {
                Style::default()
                    .fg(theme.text)
                    .add_modifier(Modifier::REVERSED)
            } else {
                Style::default().fg(theme.text)
            };
            Row::new(vec![
                Cell::from(record.num.to_string()),
                Cell::from(record.name.clone()),
                Cell::from(record.status.as_str())
                    .style(Style::default().fg(status_color(record.status, theme))),
                Cell::from(record.program.clone()),
            ])
            .style(row_style)
        })
        .collect();

    let title = format!(" processes ({}) ", records.len());
    let table = Table::new(
        rows,
        [
            Constraint::Length(5),
            Constraint::Percentage(30),
            Constraint::Length(12),
            Constraint::Percentage(50),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(theme.border))
            .title(Span::styled(title, Style::default().fg(theme.title))),
    );
    frame.render_widget(table, area);
}

fn render_details(frame: &mut Frame, app: &App, theme: &Theme, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.border))
        .title(Span::styled(" details ", Style::default().fg(theme.title)));

    let Some(record) = app.selected_record() else {
        let empty = Paragraph::new(Line::from(Span::styled(
            "no process selected",
            Style::default().fg(theme.muted),
        )))
        .block(block);
        frame.render_widget(empty, area);
        return;
    };

    let mut lines = vec![
        detail_line("num", record.num.to_string(), theme),
        detail_line("name", record.name.clone(), theme),
        detail_line("program", record.program.clone(), theme),
        detail_line("dir", record.dir.clone(), theme),
        detail_line("args", record.args.join(" "), theme),
        detail_line("env", record.env.join(" "), theme),
        Line::from(vec![
            Span::styled("status   ", Style::default().fg(theme.muted)),
            Span::styled(
                record.status.as_str(),
                Style::default().fg(status_color(record.status, theme)),
            ),
        ]),
    ];
    if let Some(error) = &record.error {
        lines.push(detail_line("error", error.clone(), theme));
    }
    if let Some(stderr) = &record.stderr {
        lines.push(Line::from(Span::styled(
            "stderr",
            Style::default().fg(theme.muted),
        )));
        for tail_line in stderr.lines().rev().take(8).collect::<Vec<_>>().into_iter().rev() {
            lines.push(Line::from(Span::styled(
                format!("  {tail_line}"),
                Style::default().fg(theme.critical),
            )));
        }
    }

    let details = Paragraph::new(lines).wrap(Wrap { trim: false }).block(block);
    frame.render_widget(details, area);
}

fn detail_line(label: &str, value: String, theme: &Theme) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("{label:<9}"), Style::default().fg(theme.muted)),
        Span::styled(value, Style::default().fg(theme.text)),
    ])
}

fn render_env(frame: &mut Frame, app: &App, theme: &Theme, area: Rect) {
    let entries = app.mirror.env().entries();
    let items: Vec<ListItem> = entries
        .iter()
        .map(|entry| {
            ListItem::new(Line::from(vec![
                Span::styled(entry.key.clone(), Style::default().fg(theme.accent)),
                Span::styled("=", Style::default().fg(theme.muted)),
                Span::styled(entry.value.clone(), Style::default().fg(theme.text)),
            ]))
        })
        .collect();

    let title = format!(" environment ({}) ", entries.len());
    let list = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(theme.border))
            .title(Span::styled(title, Style::default().fg(theme.title))),
    );
    frame.render_widget(list, area);
}

fn render_form(frame: &mut Frame, form: &ProcessForm, theme: &Theme, area: Rect) {
    let mut lines = Vec::with_capacity(FormField::ALL.len() + 2);
    for field in FormField::ALL {
        let active = field == form.field;
        let marker = if active { "> " } else { "  " };
        let cursor = if active { "_" } else { "" };
        let value_style = if active {
            Style::default().fg(theme.accent)
        } else {
            Style::default().fg(theme.text)
        };
        lines.push(Line::from(vec![
            Span::styled(
                format!("{marker}{:<9}", field.label()),
                Style::default().fg(theme.muted),
            ),
            Span::styled(format!("{}{cursor}", form.buffer(field)), value_style),
        ]));
    }
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "enter submit · tab next field · esc cancel",
        Style::default().fg(theme.muted),
    )));

    let paragraph = Paragraph::new(lines).wrap(Wrap { trim: false }).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(theme.accent))
            .title(Span::styled(" new process ", Style::default().fg(theme.title))),
    );
    frame.render_widget(paragraph, area);
}

fn render_help(frame: &mut Frame, theme: &Theme, area: Rect) {
    let bindings = [
        ("j / k", "select next / previous process"),
        ("enter", "toggle details pane"),
        ("n", "define a new process"),
        ("e", "edit selected as a new definition"),
        ("c", "clone selected under a new name"),
        ("s", "start selected"),
        ("i", "interrupt selected"),
        ("x", "kill selected"),
        ("I", "interrupt and restart selected"),
        ("X", "kill and restart selected"),
        ("d", "delete selected"),
        ("r", "refresh process list"),
        ("g", "fetch and show global environment"),
        ("?", "toggle this help"),
        ("q", "quit"),
    ];
    let mut lines = vec![Line::from(Span::styled(
        "keys",
        Style::default().fg(theme.title).add_modifier(Modifier::BOLD),
    ))];
    for (key, what) in bindings {
        lines.push(Line::from(vec![
            Span::styled(format!("  {key:<7}"), Style::default().fg(theme.accent)),
            Span::styled(what, Style::default().fg(theme.text)),
        ]));
    }

    let help = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(theme.border))
            .title(Span::styled(" help ", Style::default().fg(theme.title))),
    );
    frame.render_widget(help, area);
}

fn render_status_line(frame: &mut Frame, app: &App, theme: &Theme, area: Rect) {
    let (state, state_color) = if app.mirror.connected() {
        ("connected".to_string(), theme.ok)
    } else {
        let state = match app.mirror.disconnected_at() {
            Some(at) => {
                let secs = Utc::now().signed_duration_since(at).num_seconds().max(0);
                format!("offline {secs}s")
            }
            None => "connecting".to_string(),
        };
        (state, theme.warn)
    };

    let mut spans = vec![
        Span::styled(format!(" {state} "), Style::default().fg(state_color)),
        Span::styled("· ", Style::default().fg(theme.muted)),
    ];
    match app.mirror.status_note() {
        Some(note) => spans.push(Span::styled(
            note.to_string(),
            Style::default().fg(theme.text),
        )),
        None => spans.push(Span::styled(
            "? for help",
            Style::default().fg(theme.muted),
        )),
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}
