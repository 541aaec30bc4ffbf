mod link;
mod state;
mod ui;

use anyhow::Result;
use clap::Parser;
use crossterm::{
    event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use state::{App, LinkEvent, COMMAND_QUEUE_CAPACITY};
use std::io;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const LINK_EVENT_QUEUE_CAPACITY: usize = 256;

#[derive(Parser, Debug)]
#[command(name = "procdeck")]
struct Args {
    /// Supervisor address as `host:port` (connects to `ws://<addr>/ws`) or a
    /// full `ws://` / `wss://` URL used as-is.
    #[arg(long, default_value = "127.0.0.1:3350")]
    addr: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    let url = supervisor_url(&args.addr);
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let (link_tx, link_rx) = mpsc::channel(LINK_EVENT_QUEUE_CAPACITY);
    tokio::spawn(link::link_loop(url, link_tx, command_rx));

    let mut app = App::new(command_tx);
    let mut terminal = setup_terminal()?;
    let result = run_app(&mut terminal, &mut app, link_rx).await;
    restore_terminal(&mut terminal)?;
    result
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    mut link_rx: mpsc::Receiver<LinkEvent>,
) -> Result<()> {
    let mut events = EventStream::new();
    loop {
        terminal.draw(|frame| ui::render(frame, app))?;
        tokio::select! {
            maybe_link = link_rx.recv() => {
                match maybe_link {
                    Some(event) => app.apply_link_event(event),
                    None => break,
                }
            }
            maybe_event = events.next() => {
                if let Some(Ok(Event::Key(key))) = maybe_event {
                    if key.kind == KeyEventKind::Press {
                        handle_key(app, key);
                    }
                }
            }
        }
        if app.should_quit {
            break;
        }
    }
    Ok(())
}

fn handle_key(app: &mut App, key: KeyEvent) {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        app.should_quit = true;
        return;
    }
    if app.form.is_some() {
        handle_form_key(app, key);
        return;
    }
    match key.code {
        KeyCode::Char('q') => app.should_quit = true,
        KeyCode::Char('j') | KeyCode::Down => app.select_next(),
        KeyCode::Char('k') | KeyCode::Up => app.select_prev(),
        KeyCode::Enter => app.show_details = !app.show_details,
        KeyCode::Char('n') => app.begin_create(),
        KeyCode::Char('e') => app.begin_edit(),
        KeyCode::Char('c') => app.begin_clone(),
        KeyCode::Char('s') => app.request_start(),
        KeyCode::Char('i') => app.request_interrupt(),
        KeyCode::Char('x') => app.request_kill(),
        KeyCode::Char('I') => app.request_interrupt_restart(),
        KeyCode::Char('X') => app.request_kill_restart(),
        KeyCode::Char('d') => app.request_delete(),
        KeyCode::Char('r') => app.request_refresh(),
        KeyCode::Char('g') => {
            if app.show_env {
                app.show_env = false;
            } else {
                app.request_env();
            }
        }
        KeyCode::Char('?') => app.show_help = !app.show_help,
        KeyCode::Esc => {
            app.show_env = false;
            app.show_help = false;
            app.show_details = false;
        }
        _ => {}
    }
}

fn handle_form_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => app.cancel_form(),
        KeyCode::Enter => app.submit_form(),
        KeyCode::Tab | KeyCode::Down => {
            if let Some(form) = app.form.as_mut() {
                form.next_field();
            }
        }
        KeyCode::BackTab | KeyCode::Up => {
            if let Some(form) = app.form.as_mut() {
                form.prev_field();
            }
        }
        KeyCode::Backspace => {
            if let Some(form) = app.form.as_mut() {
                form.buffer_mut().pop();
            }
        }
        KeyCode::Char(ch) => {
            if let Some(form) = app.form.as_mut() {
                form.buffer_mut().push(ch);
            }
        }
        _ => {}
    }
}

fn supervisor_url(addr: &str) -> String {
    let trimmed = addr.trim().trim_end_matches('/');
    if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
        trimmed.to_string()
    } else {
        format!("ws://{trimmed}/ws")
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_enabled = matches!(
        std::env::var("PROCDECK_LOG_STDOUT").ok().as_deref(),
        Some("1") | Some("true") | Some("TRUE") | Some("yes") | Some("YES")
    );
    if stdout_enabled {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    } else {
        // The alternate screen owns stdout; logs are dropped unless diverted.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::sink)
            .try_init();
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_addresses_get_scheme_and_path() {
        assert_eq!(supervisor_url("127.0.0.1:3350"), "ws://127.0.0.1:3350/ws");
        assert_eq!(supervisor_url("deck.local:80/"), "ws://deck.local:80/ws");
    }

    #[test]
    fn explicit_urls_are_used_as_is() {
        assert_eq!(
            supervisor_url("ws://10.0.0.2:3350/supervisor"),
            "ws://10.0.0.2:3350/supervisor"
        );
        assert_eq!(supervisor_url("wss://deck.example/ws"), "wss://deck.example/ws");
    }
}
