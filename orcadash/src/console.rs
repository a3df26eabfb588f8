/**
 * CONSOLE - Foreground UI loop
 *
 * Every tick: drain the store's deferred queue, redraw when a store listener
 * marked the screen dirty, then poll the keyboard for at most one tick.
 * Nothing here blocks on the network.
 */

use crate::config::ConsoleConfig;
use crate::render::{self, TreeRow, View};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use orcadash_core::command;
use orcadash_core::{Category, ListenerId, LogLevel, ProtocolCoordinator, StateStore, StoreUpdate};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct Console<'a> {
    coordinator: &'a ProtocolCoordinator,
    store: StateStore,
    dirty: Arc<AtomicBool>,
    listeners: Vec<ListenerId>,
    rows: Vec<TreeRow>,
    selected: usize,
    input: Option<String>,
    hint: Option<String>,
    tick: Duration,
    log_lines: usize,
    quit: bool,
}

impl<'a> Console<'a> {
    pub fn new(coordinator: &'a ProtocolCoordinator, cfg: &ConsoleConfig) -> Self {
        let store = coordinator.store().clone();
        let dirty = Arc::new(AtomicBool::new(true));
        let listeners = Category::ALL
            .into_iter()
            .map(|category| {
                let dirty = dirty.clone();
                store.listen(category, move |_| dirty.store(true, Ordering::Relaxed))
            })
            .collect();

        Self {
            coordinator,
            store,
            dirty,
            listeners,
            rows: Vec::new(),
            selected: 0,
            input: None,
            hint: None,
            tick: cfg.tick(),
            log_lines: cfg.ui.log_lines,
            quit: false,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        enable_raw_mode().context("Failed to enable raw mode")?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen).context("Failed to enter alternate screen")?;
        let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;
        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
        while !self.quit {
            self.tick_once();

            if self.dirty.swap(false, Ordering::Relaxed) {
                let state = self.store.snapshot();
                let view = View {
                    state: &state,
                    rows: &self.rows,
                    selected: self.selected,
                    input: self.input.as_deref(),
                    hint: self.hint.as_deref(),
                    replay: self.coordinator.progress(),
                    log_lines: self.log_lines,
                };
                terminal.draw(|f| render::draw(f, &view))?;
            }

            if event::poll(self.tick)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => self.handle_key(key),
                    Event::Resize(_, _) => self.mark_dirty(),
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Apply queued updates and refresh the selectable rows.
    fn tick_once(&mut self) {
        let applied = self.store.process_ui_updates();
        if applied > 0 {
            debug!(applied, "applied deferred updates");
        }
        if self.dirty.load(Ordering::Relaxed) {
            self.rows = self.store.read(render::tree_rows);
            if self.selected >= self.rows.len() {
                self.selected = self.rows.len().saturating_sub(1);
            }
        }
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    fn local_log(&self, level: LogLevel, message: String) {
        self.store.queue_ui_update(StoreUpdate::log(level, message));
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        self.mark_dirty();
        if self.input.is_some() {
            self.handle_input_key(key);
            return;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.quit = true,
            KeyCode::Char('s') => {
                if self.coordinator.is_replay() && !self.coordinator.step() {
                    debug!("nothing left to replay");
                }
            }
            KeyCode::Char(':') => {
                self.input = Some(String::new());
                self.hint = None;
            }
            KeyCode::Up | KeyCode::Char('k') => self.selected = self.selected.saturating_sub(1),
            KeyCode::Down | KeyCode::Char('j') => {
                if self.selected + 1 < self.rows.len() {
                    self.selected += 1;
                }
            }
            KeyCode::Enter => self.toggle_selected_probe(),
            KeyCode::Char(' ') => self.toggle_selected_schema(),
            _ => {}
        }
    }

    fn handle_input_key(&mut self, key: KeyEvent) {
        let Some(input) = self.input.as_mut() else {
            return;
        };
        match key.code {
            KeyCode::Esc => {
                self.input = None;
                self.hint = None;
            }
            KeyCode::Enter => {
                let text = input.trim().to_string();
                self.input = None;
                self.hint = None;
                if !text.is_empty() {
                    self.submit(&text);
                }
            }
            KeyCode::Backspace => {
                input.pop();
            }
            KeyCode::Tab => {
                if let Some(completed) = complete(input) {
                    *input = completed;
                }
                self.hint = suggestion_hint(self.input.as_deref().unwrap_or_default());
            }
            KeyCode::Char(c) => {
                input.push(c);
                self.hint = suggestion_hint(input);
            }
            _ => {}
        }
    }

    fn submit(&self, text: &str) {
        match self.coordinator.send_command(text) {
            Ok(()) => self.local_log(LogLevel::Info, format!("Sent: {text}")),
            Err(e) => {
                warn!(error = %e, command = text, "command rejected");
                self.local_log(LogLevel::Error, format!("Command rejected: {e}"));
            }
        }
    }

    fn toggle_selected_probe(&self) {
        let Some(TreeRow::Probe { schema, id }) = self.rows.get(self.selected) else {
            return;
        };
        let active = self
            .store
            .schema(schema)
            .and_then(|s| s.probes.get(id).map(|p| p.active));
        let Some(active) = active else {
            return;
        };
        if let Err(e) = self.coordinator.send_probe_toggle(schema, id, !active) {
            self.local_log(LogLevel::Error, format!("Probe toggle failed: {e}"));
        }
    }

    fn toggle_selected_schema(&self) {
        let schema = match self.rows.get(self.selected) {
            Some(TreeRow::Schema { name }) => name,
            Some(TreeRow::Probe { schema, .. }) => schema,
            None => return,
        };
        self.store.queue_ui_update(StoreUpdate::ToggleSchemaExpanded {
            schema: schema.clone(),
        });
    }
}

impl Drop for Console<'_> {
    fn drop(&mut self) {
        for id in self.listeners.drain(..) {
            self.store.unlisten(id);
        }
    }
}

/// Complete the verb of a partial command. A unique match gets a trailing
/// space; several matches complete to their longest common prefix.
pub fn complete(input: &str) -> Option<String> {
    let trimmed = input.trim_start();
    if trimmed.contains(char::is_whitespace) {
        return None;
    }
    let matches = command::suggest(trimmed);
    match matches.as_slice() {
        [] => None,
        [only] => Some(format!("{} ", only.name)),
        [first, rest @ ..] => {
            let common = rest.iter().fold(first.name.len(), |len, meta| {
                first
                    .name
                    .bytes()
                    .zip(meta.name.bytes())
                    .take(len)
                    .take_while(|(a, b)| a == b)
                    .count()
            });
            Some(first.name[..common].to_string())
        }
    }
}

fn suggestion_hint(input: &str) -> Option<String> {
    let verb = input.split_whitespace().next()?;
    if input.trim_end().len() > verb.len() {
        return command::lookup(verb).map(|meta| meta.description.to_string());
    }
    let names: Vec<&str> = command::suggest(verb).iter().map(|m| m.name).collect();
    (!names.is_empty()).then(|| names.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use orcadash_core::{Registry, ReplayOptions};

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::from(code)
    }

    fn with_console(test: impl FnOnce(&mut Console<'_>, &StateStore)) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let store = StateStore::new();
        let coordinator = ProtocolCoordinator::replay(
            store.clone(),
            Registry::standard(),
            ReplayOptions::default(),
            runtime.handle().clone(),
        );
        let mut console = Console::new(&coordinator, &ConsoleConfig::default());
        test(&mut console, &store);
    }

    #[test]
    fn test_complete_verbs() {
        assert_eq!(complete("pa").as_deref(), Some("PAUSE "));
        assert_eq!(complete("APP").as_deref(), Some("APPC"));
        assert_eq!(complete("x"), None);
        assert_eq!(complete("PAUSE now"), None);
    }

    #[test]
    fn test_hint_lists_candidates_then_describes() {
        assert_eq!(suggestion_hint("RE").as_deref(), Some("RESUME"));
        assert_eq!(suggestion_hint("UPDATEFLOW plan").as_deref(), Some("Install new flow plan"));
        assert_eq!(suggestion_hint(""), None);
    }

    #[test]
    fn test_space_and_navigation_on_schema_tree() {
        with_console(|console, store| {
            store.queue_ui_update(StoreUpdate::AddSchema { name: "flux".into() });
            store.queue_ui_update(StoreUpdate::AddSchema { name: "heat".into() });
            console.tick_once();
            assert_eq!(console.rows.len(), 2);

            console.handle_key(key(KeyCode::Down));
            console.handle_key(key(KeyCode::Down));
            assert_eq!(console.selected, 1);

            console.handle_key(key(KeyCode::Char(' ')));
            console.tick_once();
            assert!(!store.schema("heat").unwrap().expanded);
        });
    }

    #[test]
    fn test_command_line_completes_and_sends() {
        with_console(|console, store| {
            console.handle_key(key(KeyCode::Char(':')));
            for c in "pa".chars() {
                console.handle_key(key(KeyCode::Char(c)));
            }
            console.handle_key(key(KeyCode::Tab));
            assert_eq!(console.input.as_deref(), Some("PAUSE "));

            console.handle_key(key(KeyCode::Enter));
            console.tick_once();
            assert!(console.input.is_none());
            assert_eq!(store.logs().last().unwrap().message, "Sent: PAUSE");
        });
    }

    #[test]
    fn test_rejected_command_logs_error() {
        with_console(|console, store| {
            console.submit("   ");
            console.tick_once();

            let last = store.logs().last().cloned().unwrap();
            assert_eq!(last.level, LogLevel::Error);
            assert!(last.message.starts_with("Command rejected:"));
        });
    }

    #[test]
    fn test_quit_key() {
        with_console(|console, _| {
            console.handle_key(key(KeyCode::Char('q')));
            assert!(console.quit);
        });
    }
}
