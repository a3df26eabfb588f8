//! Screen layout and widgets. Pure functions of a [`View`] snapshot.

use orcadash_core::{LogLevel, StoreState};
use ratatui::{
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Row, Table},
    Frame,
};

/// One selectable line of the schema tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeRow {
    Schema { name: String },
    Probe { schema: String, id: String },
}

/// Schemas in name order; probes listed under expanded schemas only.
pub fn tree_rows(state: &StoreState) -> Vec<TreeRow> {
    let mut rows = Vec::new();
    for schema in state.schemas.values() {
        rows.push(TreeRow::Schema {
            name: schema.name.clone(),
        });
        if schema.expanded {
            rows.extend(schema.probes.values().map(|p| TreeRow::Probe {
                schema: schema.name.clone(),
                id: p.id.clone(),
            }));
        }
    }
    rows
}

/// Everything one frame needs.
pub struct View<'a> {
    pub state: &'a StoreState,
    pub rows: &'a [TreeRow],
    pub selected: usize,
    pub input: Option<&'a str>,
    pub hint: Option<&'a str>,
    pub replay: Option<(usize, usize)>,
    pub log_lines: usize,
}

pub fn status_line(state: &StoreState) -> String {
    let s = &state.status;
    format!(
        "{} | {} | aggs {} | ranks {} | ts {}",
        s.status_text, s.connection_status, s.aggregator_count, s.rank_count, s.timestep
    )
}

fn level_style(level: LogLevel) -> Style {
    match level {
        LogLevel::Info => Style::default(),
        LogLevel::Warning => Style::default().fg(Color::Yellow),
        LogLevel::Error => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        LogLevel::Debug => Style::default().fg(Color::DarkGray),
    }
}

fn connection_color(status: &str) -> Color {
    match status {
        "Connected" => Color::Green,
        "Connecting..." => Color::Yellow,
        s if s.starts_with("Loaded") || s.starts_with("Replayed") => Color::Cyan,
        _ => Color::Red,
    }
}

pub fn draw(f: &mut Frame, view: &View) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // status bar
            Constraint::Min(8),    // schemas + aggregators
            Constraint::Length(10), // logs
            Constraint::Length(3), // command line
            Constraint::Length(1), // footer
        ])
        .split(f.area());

    draw_status(f, view, chunks[0]);

    let middle = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(chunks[1]);
    draw_schemas(f, view, middle[0]);
    draw_aggregators(f, view, middle[1]);
    draw_logs(f, view, chunks[2]);
    draw_input(f, view, chunks[3]);

    let footer = match view.replay {
        Some(_) => "s: step  Enter: toggle probe  Space: expand  :: command  q: quit",
        None => "Enter: toggle probe  Space: expand  :: command  q: quit",
    };
    f.render_widget(
        Paragraph::new(footer).style(Style::default().fg(Color::DarkGray)),
        chunks[4],
    );
}

fn draw_status(f: &mut Frame, view: &View, area: ratatui::layout::Rect) {
    let s = &view.state.status;
    let mut spans = vec![
        Span::styled(s.status_text.clone(), Style::default().add_modifier(Modifier::BOLD)),
        Span::raw("  |  "),
        Span::styled(
            s.connection_status.clone(),
            Style::default().fg(connection_color(&s.connection_status)),
        ),
        Span::raw(format!(
            "  |  aggs {}  ranks {}  ts {}",
            s.aggregator_count, s.rank_count, s.timestep
        )),
    ];
    if let Some((cursor, total)) = view.replay {
        spans.push(Span::styled(
            format!("  |  replay {cursor}/{total}"),
            Style::default().fg(Color::Cyan),
        ));
    }
    let bar = Paragraph::new(Line::from(spans))
        .block(Block::default().title("OrcaDash").borders(Borders::ALL));
    f.render_widget(bar, area);
}

fn draw_schemas(f: &mut Frame, view: &View, area: ratatui::layout::Rect) {
    let items: Vec<ListItem> = view
        .rows
        .iter()
        .map(|row| match row {
            TreeRow::Schema { name } => {
                let schema = &view.state.schemas[name];
                let marker = if schema.expanded { "▾" } else { "▸" };
                ListItem::new(format!(
                    "{marker} {name} ({}/{})",
                    schema.active_probes(),
                    schema.probes.len()
                ))
            }
            TreeRow::Probe { schema, id } => {
                let probe = &view.state.schemas[schema].probes[id];
                let (mark, color) = if probe.active {
                    ("[x]", Color::Green)
                } else {
                    ("[ ]", Color::DarkGray)
                };
                ListItem::new(format!("    {mark} {} ({id})", probe.name))
                    .style(Style::default().fg(color))
            }
        })
        .collect();

    let mut state = ListState::default();
    if !view.rows.is_empty() {
        state.select(Some(view.selected.min(view.rows.len() - 1)));
    }
    let list = List::new(items)
        .block(Block::default().title("Schemas").borders(Borders::ALL))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    f.render_stateful_widget(list, area, &mut state);
}

fn draw_aggregators(f: &mut Frame, view: &View, area: ratatui::layout::Rect) {
    let header = Row::new(["Aggregator", "Ranks", "Reps"])
        .style(Style::default().add_modifier(Modifier::BOLD));
    let rows: Vec<Row> = view
        .state
        .aggregators
        .values()
        .map(|agg| {
            Row::new(vec![
                format!("AGG{}", agg.id),
                agg.rank_range.to_string(),
                agg.reps.len().to_string(),
            ])
        })
        .collect();
    let table = Table::new(
        rows,
        [
            Constraint::Length(12),
            Constraint::Length(20),
            Constraint::Length(6),
        ],
    )
    .header(header)
    .block(Block::default().title("Aggregators").borders(Borders::ALL));
    f.render_widget(table, area);
}

fn draw_logs(f: &mut Frame, view: &View, area: ratatui::layout::Rect) {
    // newest at the bottom, only what fits
    let visible = (area.height.saturating_sub(2) as usize).min(view.log_lines);
    let skip = view.state.logs.len().saturating_sub(visible);
    let lines: Vec<Line> = view
        .state
        .logs
        .iter()
        .skip(skip)
        .map(|entry| {
            Line::from(vec![
                Span::styled(entry.formatted_time(), Style::default().fg(Color::DarkGray)),
                Span::raw(" "),
                Span::styled(format!("{:<5}", entry.level.label()), level_style(entry.level)),
                Span::raw(" "),
                Span::raw(entry.message.clone()),
            ])
        })
        .collect();
    let logs = Paragraph::new(lines).block(Block::default().title("Log").borders(Borders::ALL));
    f.render_widget(logs, area);
}

fn draw_input(f: &mut Frame, view: &View, area: ratatui::layout::Rect) {
    let (text, style) = match view.input {
        Some(input) => (format!(":{input}"), Style::default().fg(Color::Yellow)),
        None => (String::new(), Style::default()),
    };
    let title = match view.hint {
        Some(hint) => format!("Command - {hint}"),
        None => "Command".to_string(),
    };
    let input = Paragraph::new(text)
        .style(style)
        .block(Block::default().title(title).borders(Borders::ALL));
    f.render_widget(input, area);
}
