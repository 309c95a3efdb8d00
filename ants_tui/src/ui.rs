use std::{
    io::{self, Stdout},
    time::{Duration, Instant},
};

use ants_core::{
    Vector2,
    episode::Episode,
    runner::{Frontend, Signal},
    trainer::SharedTrainer,
    world::{Agent, PolicyOverlay, Rendered, World},
};
use anyhow::Result;
use ratatui::{
    crossterm::{
        event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind},
        execute,
        terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
    },
    prelude::*,
    symbols,
    widgets::*,
};

pub type Tui = Terminal<CrosstermBackend<Stdout>>;

/// Minimum time between redraws while training runs without per-step frames.
const TICK_RATE: Duration = Duration::from_millis(250);

/// Configures the terminal for TUI interaction.
pub fn setup_terminal() -> Result<Tui> {
    let mut stdout = io::stdout();
    enable_raw_mode()?;
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend).map_err(Into::into)
}

/// Restores the terminal to its original state.
pub fn restore_terminal(terminal: &mut Tui) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

fn is_press(key: &KeyEvent) -> bool {
    key.kind == KeyEventKind::Press
}

fn is_quit(key: &KeyEvent) -> bool {
    matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
}

/// What the terminal is showing, which decides the status and help lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Training,
    Watching,
}

/// Drawable snapshot of the last presented frame or periodic redraw.
#[derive(Debug, Default)]
struct Board {
    lines: Vec<Line<'static>>,
    step: u64,
    deposited: usize,
    food: usize,
}

impl Board {
    fn capture(world: &World, frame: &Rendered) -> Self {
        let size = world.grid_size();
        let lines = (0..size.y)
            .map(|y| {
                let mut spans = Vec::new();
                for x in 0..size.x {
                    push_cell(&mut spans, world, frame, Vector2::new(x, y));
                }
                Line::from(spans)
            })
            .collect();
        Board {
            lines,
            step: world.current_step(),
            deposited: frame.state.food_deposited,
            food: world.food.len(),
        }
    }

    /// Snapshot of the world as it stands, without policy arrows.
    fn live(world: &World) -> Self {
        let frame = Rendered {
            state: world.state(),
            overlay: PolicyOverlay::new(world.grid_size()),
        };
        Board::capture(world, &frame)
    }
}

fn agent_style(agent: &Agent) -> Style {
    let color = agent.color;
    Style::default().fg(Color::Rgb(color.r, color.g, color.b))
}

/// Appends one three-column cell. Agents win over fixtures, fixtures over
/// food, and policy arrows only show on otherwise empty cells.
fn push_cell(spans: &mut Vec<Span<'static>>, world: &World, frame: &Rendered, location: Vector2) {
    let state = &frame.state;
    if let Some(index) = state.agent_locations.iter().position(|l| *l == location) {
        let agent = &world.agents[index];
        let mut style = agent_style(agent).bold();
        if state.carrying_food[index] {
            style = style.bg(Color::Yellow);
        }
        spans.push(Span::styled(format!(" {} ", agent.last_action.glyph()), style));
        return;
    }
    if world.inside_obstacle(location) {
        spans.push(Span::styled(" # ", Style::default().fg(Color::DarkGray)));
        return;
    }
    if world.on_nest(location).is_some() {
        spans.push(Span::styled(" N ", Style::default().fg(Color::Green).bold()));
        return;
    }
    if world.on_dropped_food(location).is_some() {
        spans.push(Span::styled(" f ", Style::default().fg(Color::Yellow)));
        return;
    }

    let arrows = frame.overlay.arrows_at(location);
    match arrows {
        [] => spans.push(Span::styled(" . ", Style::default().fg(Color::DarkGray))),
        [arrow] => spans.push(Span::styled(
            format!(" {} ", arrow.action.glyph()),
            agent_style(&world.agents[arrow.agent]).dim(),
        )),
        _ => {
            let shown = arrows.len().min(3);
            for arrow in &arrows[..shown] {
                spans.push(Span::styled(
                    arrow.action.glyph().to_string(),
                    agent_style(&world.agents[arrow.agent]).dim(),
                ));
            }
            if shown < 3 {
                spans.push(Span::raw(" ".repeat(3 - shown)));
            }
        }
    }
}

/// Terminal front end for both run loops.
pub struct TerminalFrontend {
    terminal: Tui,
    mode: Mode,
    trainer: SharedTrainer,
    episode_total: u64,
    board: Board,
    last_draw: Instant,
}

impl TerminalFrontend {
    pub fn new(terminal: Tui, mode: Mode, trainer: SharedTrainer, episode_total: u64) -> Self {
        TerminalFrontend {
            terminal,
            mode,
            trainer,
            episode_total,
            board: Board::default(),
            last_draw: Instant::now(),
        }
    }

    /// Gives the terminal back to the shell.
    pub fn restore(mut self) -> Result<()> {
        restore_terminal(&mut self.terminal)
    }

    fn status(&self) -> String {
        match self.mode {
            Mode::Training => {
                let trainer = self.trainer.borrow();
                let reward = trainer
                    .episodes
                    .last()
                    .and_then(Episode::final_reward)
                    .map_or_else(|| "-".to_string(), |r| format!("{r:.2}"));
                format!(
                    "Episode {}/{}  Step {}  Epsilon {:.4}  Last final reward {}",
                    (trainer.episodes.len() as u64 + 1).min(self.episode_total),
                    self.episode_total,
                    trainer.current_episode.steps(),
                    trainer.epsilon,
                    reward
                )
            }
            Mode::Watching => format!(
                "Step {}  Food deposited {}/{}",
                self.board.step, self.board.deposited, self.board.food
            ),
        }
    }

    fn draw(&mut self) -> io::Result<()> {
        let status = self.status();
        let help = match self.mode {
            Mode::Training => "Press 'q' or 'Esc' to stop training.",
            Mode::Watching => "Press 'space' to step, 'q' or 'Esc' to quit.",
        };
        let board = &self.board;
        self.terminal
            .draw(|frame| render_world(frame, board, &status, help))?;
        self.last_draw = Instant::now();
        Ok(())
    }
}

impl Frontend for TerminalFrontend {
    fn present(&mut self, world: &World, frame: &Rendered) -> ants_core::Result<()> {
        self.board = Board::capture(world, frame);
        self.draw()?;
        Ok(())
    }

    fn poll_quit(&mut self, world: &World) -> ants_core::Result<bool> {
        if event::poll(Duration::ZERO)? {
            if let Event::Key(key) = event::read()? {
                if is_press(&key) && is_quit(&key) {
                    return Ok(true);
                }
            }
        }
        if self.last_draw.elapsed() >= TICK_RATE {
            self.board = Board::live(world);
            self.draw()?;
        }
        Ok(false)
    }

    fn wait_advance(&mut self) -> ants_core::Result<Signal> {
        loop {
            if let Event::Key(key) = event::read()? {
                if !is_press(&key) {
                    continue;
                }
                if is_quit(&key) {
                    return Ok(Signal::Quit);
                }
                if matches!(key.code, KeyCode::Char(' ') | KeyCode::Enter) {
                    return Ok(Signal::Advance);
                }
            }
        }
    }
}

/// Renders the grid, a status line and help text.
fn render_world(frame: &mut Frame, board: &Board, status: &str, help: &str) {
    let main_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(3),
            Constraint::Length(3),
            Constraint::Length(2),
        ])
        .split(frame.area());

    let map = Paragraph::new(board.lines.clone())
        .block(Block::default().title("Ants").borders(Borders::ALL))
        .alignment(Alignment::Center);
    frame.render_widget(map, main_layout[0]);

    let status = Paragraph::new(status.to_string())
        .block(Block::default().borders(Borders::ALL).title("Status"));
    frame.render_widget(status, main_layout[1]);

    let help_text = Paragraph::new(help.to_string())
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::TOP));
    frame.render_widget(help_text, main_layout[2]);
}

/// Series drawn by the plot screen, one point per episode.
pub struct Curves {
    rewards: Vec<(f64, f64)>,
    steps: Vec<(f64, f64)>,
}

impl Curves {
    pub fn new(episodes: &[Episode]) -> Self {
        let rewards = episodes
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.final_reward().map(|r| (i as f64, r)))
            .collect();
        let steps = episodes
            .iter()
            .enumerate()
            .map(|(i, e)| (i as f64, e.steps() as f64))
            .collect();
        Curves { rewards, steps }
    }
}

/// Shows the curves until the user quits.
pub fn run_plot(terminal: &mut Tui, curves: &Curves) -> Result<()> {
    loop {
        terminal.draw(|frame| render_plot(frame, curves))?;
        if let Event::Key(key) = event::read()? {
            if is_press(&key) && is_quit(&key) {
                return Ok(());
            }
        }
    }
}

fn render_plot(frame: &mut Frame, curves: &Curves) {
    let main_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(48),
            Constraint::Percentage(48),
            Constraint::Min(1),
        ])
        .split(frame.area());

    frame.render_widget(
        line_chart("Final reward per episode", "Reward", &curves.rewards, Color::Cyan),
        main_layout[0],
    );
    frame.render_widget(
        line_chart("Steps per episode", "Steps", &curves.steps, Color::Magenta),
        main_layout[1],
    );
    frame.render_widget(
        Paragraph::new("Press 'q' or 'Esc' to quit.").alignment(Alignment::Center),
        main_layout[2],
    );
}

/// Lower and upper bound of `values`, widened when they coincide.
fn bounds(values: impl Iterator<Item = f64>) -> [f64; 2] {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !lo.is_finite() {
        return [0.0, 1.0];
    }
    if lo == hi { [lo - 1.0, hi + 1.0] } else { [lo, hi] }
}

fn axis_labels(bounds: [f64; 2]) -> Vec<Line<'static>> {
    let mid = (bounds[0] + bounds[1]) / 2.0;
    [bounds[0], mid, bounds[1]]
        .iter()
        .map(|v| Line::from(format!("{v:.1}")))
        .collect()
}

fn line_chart<'a>(title: &'a str, y_title: &'a str, data: &'a [(f64, f64)], color: Color) -> Chart<'a> {
    let x_bounds = bounds(data.iter().map(|(x, _)| *x));
    let y_bounds = bounds(data.iter().map(|(_, y)| *y));
    let dataset = Dataset::default()
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(data);

    Chart::new(vec![dataset])
        .block(Block::default().title(title).borders(Borders::ALL))
        .x_axis(
            Axis::default()
                .title("Episode")
                .bounds(x_bounds)
                .labels(axis_labels(x_bounds)),
        )
        .y_axis(
            Axis::default()
                .title(y_title)
                .bounds(y_bounds)
                .labels(axis_labels(y_bounds)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ants_core::{
        trainer::apply_action,
        world::{Action, load_world_from_string},
    };

    fn text(line: &Line) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    #[test]
    fn board_draws_every_entity_kind() {
        let world = load_world_from_string("A F\n# N", 0, 10, 1).unwrap();
        let frame = Rendered {
            state: world.state(),
            overlay: PolicyOverlay::new(world.grid_size()),
        };
        let board = Board::capture(&world, &frame);
        assert_eq!(board.lines.len(), 2);
        assert_eq!(text(&board.lines[0]), " ^  f ");
        assert_eq!(text(&board.lines[1]), " #  N ");
    }

    #[test]
    fn arrows_fill_empty_cells_only() {
        let world = load_world_from_string("A .", 0, 10, 1).unwrap();
        let mut overlay = PolicyOverlay::new(world.grid_size());
        overlay.mark(Vector2::new(0, 0), 0, Action::Left);
        overlay.mark(Vector2::new(1, 0), 0, Action::Down);
        let frame = Rendered {
            state: world.state(),
            overlay,
        };
        let board = Board::capture(&world, &frame);
        assert_eq!(text(&board.lines[0]), " ^  v ");
    }

    #[test]
    fn live_board_follows_the_world() {
        let mut world = load_world_from_string("A . N", 0, 10, 1).unwrap();
        assert_eq!(text(&Board::live(&world).lines[0]), " ^  .  N ");

        apply_action(&mut world, 0, Action::Right);
        world.agents[0].last_action = Action::Right;
        let board = Board::live(&world);
        assert_eq!(text(&board.lines[0]), " .  >  N ");
        assert_eq!(board.step, 0);
    }

    #[test]
    fn flat_series_get_padded_bounds() {
        assert_eq!(bounds([2.0, 2.0].into_iter()), [1.0, 3.0]);
        assert_eq!(bounds(std::iter::empty()), [0.0, 1.0]);
        assert_eq!(bounds([-3.0, 5.0, 1.0].into_iter()), [-3.0, 5.0]);
    }

    #[test]
    fn curves_skip_episodes_without_steps() {
        let episodes = vec![
            Episode {
                average_rewards: vec![-1.0, 10.0],
            },
            Episode::default(),
        ];
        let curves = Curves::new(&episodes);
        assert_eq!(curves.rewards, vec![(0.0, 10.0)]);
        assert_eq!(curves.steps, vec![(0.0, 2.0), (1.0, 0.0)]);
    }
}
