use compound_evolver::engine::progress::{Progress, ProgressCallback};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressState, ProgressStyle};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

const TICK: Duration = Duration::from_millis(80);

pub fn generation_line(number: usize, size: usize, best_fitness: Option<f64>) -> String {
    match best_fitness {
        Some(best) => format!("Generation {number}: {size} candidates, best fitness {best:.4}"),
        None => format!("Generation {number}: {size} candidates, no fitness yet"),
    }
}

/// What the terminal currently shows: one bar, reused across phases and generations.
struct Display {
    bar: ProgressBar,
    phase: &'static str,
    last_generation: Option<usize>,
}

impl Display {
    fn label(&self) -> String {
        match self.last_generation {
            Some(number) => format!("{} (after gen {number})", self.phase),
            None => self.phase.to_string(),
        }
    }

    fn apply(&mut self, event: Progress) {
        match event {
            Progress::PhaseStart { name } => {
                self.phase = name;
                self.bar.reset();
                self.bar.set_length(0);
                self.bar.set_style(spinner_style());
                self.bar.enable_steady_tick(TICK);
                self.bar.set_message(self.label());
            }
            Progress::PhaseFinish => {
                self.bar.disable_steady_tick();
                self.bar.finish_with_message(format!("✓ {}", self.phase));
            }
            Progress::TaskStart { total_steps } => {
                self.bar.disable_steady_tick();
                self.bar.reset();
                self.bar.set_style(batch_style());
                self.bar.set_length(total_steps);
                self.bar.set_message(self.label());
            }
            Progress::TaskIncrement => self.bar.inc(1),
            Progress::TaskFinish => {
                // Dropped candidates never tick, so close the gap before finishing.
                let total = self.bar.length().unwrap_or(0);
                self.bar.set_position(total);
                self.bar.finish();
            }
            Progress::GenerationComplete {
                number,
                size,
                best_fitness,
            } => {
                self.last_generation = Some(number);
                self.bar.println(generation_line(number, size, best_fitness));
            }
            Progress::Message(text) if self.bar.is_finished() => self.bar.set_message(text),
            Progress::Message(text) => self.bar.println(format!("  {text}")),
        }
    }
}

/// Renders engine progress events on stderr through `indicatif`.
#[derive(Clone)]
pub struct CliProgressHandler {
    display: Arc<Mutex<Display>>,
}

impl CliProgressHandler {
    pub fn new() -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr())
            .with_style(spinner_style());
        bar.finish_and_clear();
        Self {
            display: Arc::new(Mutex::new(Display {
                bar,
                phase: "Starting",
                last_generation: None,
            })),
        }
    }

    pub fn get_callback(&self) -> ProgressCallback<'static> {
        let display = Arc::clone(&self.display);
        Box::new(move |event| match display.lock() {
            Ok(mut display) => display.apply(event),
            Err(_) => warn!("Progress display lock poisoned; dropping event"),
        })
    }
}

impl Default for CliProgressHandler {
    fn default() -> Self {
        Self::new()
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed}]")
        .expect("static spinner template is valid")
}

fn batch_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg:<28} [{bar:36.cyan/blue}] {pos}/{len} scored ({eta})")
        .expect("static batch template is valid")
        .with_key("eta", |state: &ProgressState, w: &mut dyn std::fmt::Write| {
            let _ = write!(w, "{:.0}s", state.eta().as_secs_f64());
        })
        .progress_chars("=> ")
}
