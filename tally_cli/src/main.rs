use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tally_core::calendar::parse_date;
use tally_core::*;

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Habit tracker with strength scores and streaks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Pretend today is this date (YYYY-MM-DD)
    #[arg(long, global = true)]
    today: Option<String>,

    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a habit
    Add {
        name: String,

        /// daily, every:N, weekly:N, monthly:N, window:N/M or days:mon,wed,...
        #[arg(long, default_value = "daily")]
        frequency: String,

        /// Unit for a measurable habit (requires --target)
        #[arg(long, requires = "target")]
        unit: Option<String>,

        /// Target value for a measurable habit
        #[arg(long, requires = "unit")]
        target: Option<f64>,

        /// The target is a maximum rather than a minimum
        #[arg(long, requires = "target")]
        at_most: bool,

        /// Creation date (defaults to today)
        #[arg(long)]
        since: Option<String>,
    },

    /// List habits with their current strength
    List,

    /// Cycle a day through done, skipped and empty
    Toggle {
        habit: String,
        #[arg(long)]
        date: Option<String>,
    },

    /// Record a value for a measurable habit
    Set {
        habit: String,
        value: f64,
        #[arg(long)]
        date: Option<String>,
    },

    /// Mark a day as skipped (keeps the streak, freezes strength)
    Skip {
        habit: String,
        #[arg(long)]
        date: Option<String>,
    },

    /// Reset a day to empty
    Clear {
        habit: String,
        #[arg(long)]
        date: Option<String>,
    },

    /// Clear every entry in a month (YYYY-MM, defaults to this month)
    ClearMonth { habit: String, month: Option<String> },

    /// Undo the last clear-month
    Undo { habit: String },

    /// Strength, streaks and month progress
    Stats {
        habit: String,
        #[arg(long)]
        month: Option<String>,
    },

    /// Day-by-day strength history
    History {
        habit: String,

        /// Write the history to a CSV file instead of stdout
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Delete a habit and its history
    Delete { habit: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tally_core::logging::init_with_level(tally_core::logging::level_for_verbosity(cli.verbose));

    let config = Config::load()?;
    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());
    let state_path = data_dir.join("state.json");
    tracing::debug!("Using state file {:?}", state_path);
    let today = cli.today.as_deref().map(parse_date).transpose()?;
    let command = cli.command;

    // Load, run and save under one lock so concurrent invocations serialize.
    EngineState::update(&state_path, |state| {
        let loaded = std::mem::take(state);
        *state = match today {
            Some(today) => {
                let settings = EngineSettings::from(&config);
                run(HabitEngine::from_state(loaded, FixedClock(today), settings), command)?
            }
            None => run(HabitEngine::with_config(loaded, &config), command)?,
        };
        Ok(())
    })?;
    Ok(())
}

fn run<C: Clock>(mut engine: HabitEngine<C>, command: Commands) -> Result<EngineState> {
    engine.catch_up();

    match command {
        Commands::Add {
            name,
            frequency,
            unit,
            target,
            at_most,
            since,
        } => cmd_add(&mut engine, name, &frequency, unit, target, at_most, since)?,
        Commands::List => cmd_list(&mut engine),
        Commands::Toggle { habit, date } => {
            let id = engine.find(&habit)?;
            let date = date_or_today(&engine, date)?;
            let outcome = engine.toggle(id, date)?;
            report(&mut engine, id, date, outcome)?;
        }
        Commands::Set { habit, value, date } => {
            let id = engine.find(&habit)?;
            let date = date_or_today(&engine, date)?;
            let outcome = engine.set_value(id, date, value)?;
            report(&mut engine, id, date, outcome)?;
        }
        Commands::Skip { habit, date } => {
            let id = engine.find(&habit)?;
            let date = date_or_today(&engine, date)?;
            let outcome = engine.skip(id, date)?;
            report(&mut engine, id, date, outcome)?;
        }
        Commands::Clear { habit, date } => {
            let id = engine.find(&habit)?;
            let date = date_or_today(&engine, date)?;
            let outcome = engine.clear(id, date)?;
            report(&mut engine, id, date, outcome)?;
        }
        Commands::ClearMonth { habit, month } => {
            let id = engine.find(&habit)?;
            let month = month_or_current(&engine, month)?;
            let cleared = engine.clear_all_for_month(id, month)?;
            if cleared == 0 {
                println!("Nothing to clear in {}.", month);
            } else {
                let habit = engine.habit(id)?;
                println!("✓ Cleared {} days of {} in {}", cleared, habit.name, month);
                println!("  Strength: {}%", habit.strength);
                println!("  Run `tally undo` to restore them.");
            }
        }
        Commands::Undo { habit } => {
            let id = engine.find(&habit)?;
            let restored = engine.undo_clear_all(id)?;
            let habit = engine.habit(id)?;
            println!("✓ Restored {} days of {}", restored, habit.name);
            println!("  Strength: {}%", habit.strength);
        }
        Commands::Stats { habit, month } => {
            let id = engine.find(&habit)?;
            let month = month_or_current(&engine, month)?;
            cmd_stats(&mut engine, id, month)?;
        }
        Commands::History { habit, csv } => {
            let id = engine.find(&habit)?;
            let points = engine.strength_history(id)?;
            match csv {
                Some(path) => {
                    let rows = tally_core::export::write_history_csv(&points, &path)?;
                    println!("✓ Wrote {} rows to {}", rows, path.display());
                }
                None => {
                    for point in &points {
                        println!("{}  {:>3}", point.date, point.strength);
                    }
                }
            }
        }
        Commands::Delete { habit } => {
            let id = engine.find(&habit)?;
            let removed = engine.delete_habit(id)?;
            println!("✓ Deleted {}", removed.name);
        }
    }

    // Reads persist too: the catch-up may have moved strength forward.
    Ok(engine.to_state())
}

fn date_or_today<C: Clock>(engine: &HabitEngine<C>, date: Option<String>) -> Result<chrono::NaiveDate> {
    match date {
        Some(d) => parse_date(&d),
        None => Ok(engine.today()),
    }
}

fn month_or_current<C: Clock>(engine: &HabitEngine<C>, month: Option<String>) -> Result<YearMonth> {
    match month {
        Some(m) => m.parse(),
        None => Ok(YearMonth::of(engine.today())),
    }
}

fn cmd_add<C: Clock>(
    engine: &mut HabitEngine<C>,
    name: String,
    frequency: &str,
    unit: Option<String>,
    target: Option<f64>,
    at_most: bool,
    since: Option<String>,
) -> Result<()> {
    let frequency: Frequency = frequency.parse()?;
    let kind = match (unit, target) {
        (Some(unit), Some(target_value)) => HabitKind::Measurable {
            unit,
            target_value,
            target_type: if at_most {
                TargetType::Max
            } else {
                TargetType::Min
            },
        },
        _ => HabitKind::Binary,
    };
    let created_at = since.as_deref().map(parse_date).transpose()?;

    let habit = engine.create_habit(NewHabit {
        name,
        kind,
        frequency,
        created_at,
    })?;

    println!("✓ Added {} ({})", habit.name, habit.frequency);
    println!("  Id: {}", habit.id);
    Ok(())
}

fn cmd_list<C: Clock>(engine: &mut HabitEngine<C>) {
    let today = engine.today();
    if engine.habits().is_empty() {
        println!("No habits yet. Add one with `tally add <name>`.");
        return;
    }

    for habit in engine.habits() {
        let mark = match habit.day_state(today) {
            DayState::Done if habit.is_completed(today) => "✓",
            DayState::Done => "~",
            DayState::Skipped => "-",
            DayState::Empty => " ",
        };
        let short_id: String = habit.id.to_string().chars().take(8).collect();
        println!(
            "[{}] {:<24} {:>3}%  {:<14} {}",
            mark,
            habit.name,
            habit.strength,
            habit.frequency.to_string(),
            short_id
        );
    }
}

fn cmd_stats<C: Clock>(engine: &mut HabitEngine<C>, id: HabitId, month: YearMonth) -> Result<()> {
    let stats = engine.stats(id, month)?;
    let habit = engine.habit(id)?;

    println!("{} ({})", habit.name, habit.frequency);
    if let HabitKind::Measurable {
        unit,
        target_value,
        target_type,
    } = &habit.kind
    {
        let direction = match target_type {
            TargetType::Min => "at least",
            TargetType::Max => "at most",
        };
        println!("  Target:         {} {} {}", direction, target_value, unit);
    }
    println!("  Strength:       {}%", stats.strength);
    println!("  Current streak: {} days", stats.current_streak);
    println!("  Best streak:    {} days", stats.best_streak);
    println!(
        "  {}:        {}/{} ({}%), {} skipped",
        month,
        stats.month.completed,
        stats.month.goal,
        stats.month.percent(),
        stats.month.skipped
    );
    Ok(())
}

fn report<C: Clock>(
    engine: &mut HabitEngine<C>,
    id: HabitId,
    date: chrono::NaiveDate,
    outcome: Outcome,
) -> Result<()> {
    let habit = engine.habit(id)?;
    match outcome {
        Outcome::Changed(state) => {
            let label = match state {
                DayState::Done => "done",
                DayState::Skipped => "skipped",
                DayState::Empty => "empty",
            };
            println!("✓ {} on {}: {}", habit.name, date, label);
            println!("  Strength: {}%", habit.strength);
        }
        Outcome::NoOp => {
            println!("No change for {} on {}.", habit.name, date);
        }
        Outcome::ValueRequired => {
            return Err(Error::validation(format!(
                "{} is measurable; record a value with `tally set {} <value>`",
                habit.name, habit.name
            )));
        }
    }
    Ok(())
}
