//! Automatic and manual run loops.
//!
//! Both loops are single threaded: stepping, event dispatch and rendering
//! happen strictly one after another. Anything that shows frames or reads
//! user input sits behind the [`Frontend`] trait.

use tracing::{info, warn};

use crate::{
    Result,
    world::{EpisodeMarker, PolicyOverlay, Rendered, World},
};

/// User input relevant to the manual loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Advance,
    Quit,
}

/// How a run loop finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every requested episode ran to its end.
    Completed,
    /// A quit signal or a cleared running flag stopped the loop.
    Stopped,
}

/// Display and input side of a run.
pub trait Frontend {
    /// Whether frames are drawn at all. When false no `rendered` event fires.
    fn renders(&self) -> bool {
        true
    }

    /// Shows a frame after the `rendered` subscribers have filled it.
    fn present(&mut self, world: &World, frame: &Rendered) -> Result<()>;

    /// Non-blocking check for a quit request, polled once per step with the
    /// world as it stands before that step.
    fn poll_quit(&mut self, world: &World) -> Result<bool>;

    /// Blocks until the user advances one step or quits.
    fn wait_advance(&mut self) -> Result<Signal>;

    /// Called once when a quit signal stops a loop.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Front end for unattended training: draws nothing and never quits.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessFrontend;

impl Frontend for HeadlessFrontend {
    fn renders(&self) -> bool {
        false
    }

    fn present(&mut self, _world: &World, _frame: &Rendered) -> Result<()> {
        Ok(())
    }

    fn poll_quit(&mut self, _world: &World) -> Result<bool> {
        Ok(false)
    }

    fn wait_advance(&mut self) -> Result<Signal> {
        Ok(Signal::Quit)
    }
}

/// Fires `rendered` with a fresh frame and hands the result to the front end.
pub fn render_frame<F: Frontend + ?Sized>(world: &mut World, frontend: &mut F) -> Result<()> {
    if !frontend.renders() {
        return Ok(());
    }
    let mut frame = Rendered {
        state: world.state(),
        overlay: PolicyOverlay::new(world.grid_size()),
    };
    world.fire(|w| &mut w.events.rendered, &mut frame)?;
    frontend.present(world, &frame)
}

/// Runs `episode_count` episodes back to back.
///
/// An episode ends once all food is deposited or the step limit is hit. A
/// quit signal ends the run right after the current step, without firing
/// `episode_ended` for the unfinished episode. The run counts as completed
/// when every episode ended, even if quit arrived during the very last step.
pub fn run_automatic<F: Frontend + ?Sized>(world: &mut World, frontend: &mut F) -> Result<RunOutcome> {
    world.set_running(true);
    world.reset()?;
    render_frame(world, frontend)?;

    for episode in 0..world.episode_count() {
        if !world.is_running() {
            return Ok(RunOutcome::Stopped);
        }
        world.reset()?;
        world.fire(|w| &mut w.events.episode_started, &mut EpisodeMarker { episode })?;

        while !world.all_deposited() && world.current_step() < world.max_steps() {
            if !world.is_running() {
                warn!(episode, step = world.current_step(), "run stopped mid-episode");
                return Ok(RunOutcome::Stopped);
            }

            let quit = frontend.poll_quit(world)?;
            world.step()?;
            if world.render_step() {
                render_frame(world, frontend)?;
            }

            if quit {
                world.set_running(false);
                frontend.close()?;
            }
        }

        world.fire(|w| &mut w.events.episode_ended, &mut EpisodeMarker { episode })?;
    }

    world.set_running(false);
    info!(episodes = world.episode_count(), "run completed");
    Ok(RunOutcome::Completed)
}

/// Steps once per advance signal until the user quits. A finished episode
/// is reset before the next step.
pub fn run_manual<F: Frontend + ?Sized>(world: &mut World, frontend: &mut F) -> Result<RunOutcome> {
    world.set_running(true);
    world.reset()?;
    render_frame(world, frontend)?;

    while world.is_running() {
        match frontend.wait_advance()? {
            Signal::Advance => {
                if world.all_deposited() || world.current_step() >= world.max_steps() {
                    world.reset()?;
                }
                world.step()?;
                if world.render_step() {
                    render_frame(world, frontend)?;
                }
            }
            Signal::Quit => {
                world.set_running(false);
                frontend.close()?;
            }
        }
    }
    Ok(RunOutcome::Stopped)
}
