//! The scripted day.
//!
//! Output is line-oriented:
//! - `[NAME] text` is speech (`[NAME*]` when it is the fallback line)
//! - `[DENIED]` and `[SKIPPED]` are turns that did not happen
//! - `[NOTICE]` is a delivered notification
//! - `[DECAY]` and `[STATUS]` summarize the end of the day

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;
use troupe_core::registry::CharacterProfile;
use troupe_core::{
    Clock, DecayInputs, Engine, EngineConfig, EngineError, Generator, InMemoryStore, Location,
    ManualClock, Notification, NotificationSink, NotifyError, Registry, TurnOutcome, TurnReason,
    TurnRequest,
};

/// Settings for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    pub turns: usize,
    pub load: Option<String>,
    pub save: Option<String>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            turns: 40,
            load: None,
            save: None,
        }
    }
}

/// Parse configuration from command line arguments.
pub fn parse_config_from_args(args: &[String]) -> SimConfig {
    let mut config = SimConfig::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--turns" => {
                if let Some(turns) = args.get(i + 1) {
                    config.turns = turns.parse().unwrap_or(config.turns);
                    i += 1;
                }
            }
            "--load" => {
                if let Some(path) = args.get(i + 1) {
                    config.load = Some(path.clone());
                    i += 1;
                }
            }
            "--save" => {
                if let Some(path) = args.get(i + 1) {
                    config.save = Some(path.clone());
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }

    config
}

const CAST: [&str; 4] = ["ada", "bo", "cy", "di"];

fn cast_registry() -> Registry {
    Registry::new()
        .with_profile(
            "ada",
            CharacterProfile::new().with_fallback_line("ada nods and keeps typing."),
        )
        .with_profile("bo", CharacterProfile::new().with_decay_sensitivity(1.5))
        .with_profile("cy", CharacterProfile::new().with_jealousy_intensity(2.0))
        .with_profile(
            "di",
            CharacterProfile::new()
                .with_cooldown_multiplier(2.0)
                .decay_immune(),
        )
}

/// One scripted trigger.
struct Beat {
    speaker: &'static str,
    prompt: &'static str,
    addressed: bool,
    context: Location,
    remember: Option<(&'static str, u8)>,
    affect: Option<(&'static str, i32)>,
}

const fn beat(speaker: &'static str, prompt: &'static str) -> Beat {
    Beat {
        speaker,
        prompt,
        addressed: false,
        context: Location::MainFloor,
        remember: None,
        affect: None,
    }
}

fn script() -> Vec<Beat> {
    vec![
        Beat {
            remember: Some(("bo brought pastries", 5)),
            affect: Some(("bo", 3)),
            ..beat("ada", "bo walks in with a box of pastries.")
        },
        Beat {
            addressed: true,
            ..beat("bo", "ada: thanks for the pastries, bo!")
        },
        beat("cy", "The build is red again."),
        Beat {
            context: Location::OpsArea,
            remember: Some(("the deploy pipeline broke", 7)),
            ..beat("di", "An alert fires on the ops dashboard.")
        },
        Beat {
            addressed: true,
            affect: Some(("di", 6)),
            ..beat("cy", "di: cy, can you look at the deploy logs with me?")
        },
        Beat {
            context: Location::Meeting,
            ..beat("ada", "The weekly planning meeting starts.")
        },
        Beat {
            affect: Some(("cy", -4)),
            ..beat("bo", "cy took the last coffee.")
        },
        Beat {
            context: Location::RestArea,
            ..beat("di", "di heads to the couch for a break.")
        },
        Beat {
            addressed: true,
            remember: Some(("asked ada about the offsite", 4)),
            ..beat("ada", "bo: ada, are you coming to the offsite?")
        },
        Beat {
            context: Location::MainFloor,
            ..beat("cy", "Someone asks who broke the build.")
        },
    ]
}

/// Prints every notification it is given.
struct PrintSink;

#[async_trait]
impl NotificationSink for PrintSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        match notification {
            Notification::Relocated {
                character,
                from,
                to,
                reason,
            } => {
                let from = from
                    .as_ref()
                    .map(|l| l.to_string())
                    .unwrap_or_else(|| "nowhere".to_string());
                println!("[NOTICE] {character} moved from {from} to {to} ({reason:?})");
            }
            Notification::ReturnedFromAbsence {
                character,
                recipient,
                away_hours,
            } => {
                println!("[NOTICE] {recipient}: {character} is back after {away_hours}h");
            }
            Notification::RelationshipShifted {
                character,
                target,
                delta,
                affinity,
                cause,
            } => {
                println!(
                    "[NOTICE] {character} -> {target}: {delta:+} ({cause:?}), now {affinity}"
                );
            }
        }
        Ok(())
    }
}

fn describe(reason: &TurnReason) -> String {
    match reason {
        TurnReason::GlobalCooldown { remaining } => {
            format!("someone just spoke ({}s left)", remaining.num_seconds())
        }
        TurnReason::EntityCooldown { remaining } => {
            format!("spoke too recently ({}s left)", remaining.num_seconds())
        }
        TurnReason::AmongRecentActions => "was one of the last speakers".to_string(),
        TurnReason::ClaimLost => "lost the race for the turn".to_string(),
        other => format!("{other:?}"),
    }
}

/// Run the scripted day.
pub async fn run_simulation(
    config: SimConfig,
    engine_config: EngineConfig,
    generator: Arc<dyn Generator>,
) -> Result<(), EngineError> {
    let store = match &config.load {
        Some(path) => {
            println!("[LOADED] {path}");
            Arc::new(InMemoryStore::load_json(path).await?)
        }
        None => Arc::new(InMemoryStore::new()),
    };
    let clock = Arc::new(ManualClock::new(Utc::now()));

    let engine = Engine::builder(store.clone(), generator)
        .with_config(engine_config)
        .with_registry(cast_registry())
        .with_clock(clock.clone())
        .with_sink(Arc::new(PrintSink))
        .build();

    if config.load.is_none() {
        let memory = engine.memory();
        memory.record_core("ada", "ada has led the team for three years", 9).await?;
        memory.record_core("di", "di carries the pager this week", 6).await?;
        for name in CAST {
            engine.resources().set_mood(name, "focused").await?;
        }
    }

    println!("=== troupe-sim: {} turns ===", config.turns);
    let script = script();
    for step in 0..config.turns {
        clock.advance(Duration::seconds(25));
        if step > 0 && step % 10 == 0 {
            clock.advance(Duration::hours(1));
        }

        let Some(beat) = script.get(step % script.len()) else {
            break;
        };
        let mut request = TurnRequest::new(beat.speaker, beat.prompt).at(beat.context);
        if beat.addressed {
            request = request.addressed();
        }
        if let Some((content, importance)) = beat.remember {
            request = request.remember(content, importance);
        }
        if let Some((target, delta)) = beat.affect {
            request = request.affect(target, delta, beat.prompt);
        }

        match engine.take_turn(request).await {
            TurnOutcome::Spoke(report) => {
                let marker = if report.fell_back { "*" } else { "" };
                println!("[{}{marker}] {}", beat.speaker.to_uppercase(), report.text);
            }
            TurnOutcome::Denied(reason) => {
                println!("[DENIED] {}: {}", beat.speaker, describe(&reason));
            }
            TurnOutcome::Skipped { reason } => {
                println!("[SKIPPED] {}: {reason}", beat.speaker);
            }
        }
    }

    clock.advance(Duration::hours(6));
    let inputs = DecayInputs::new().with_collateral("cy", "bo", 2);
    let report = engine.run_decay(&inputs).await?;
    println!(
        "[DECAY] evaluated {}, applied {}, lost {}, capped {}",
        report.evaluated,
        report.applied.len(),
        report.total_loss(),
        report.capped
    );

    for name in CAST {
        if let Some(state) = engine.resources().current(name).await? {
            let location = state
                .location
                .map(|l| l.to_string())
                .unwrap_or_else(|| "nowhere".to_string());
            println!(
                "[STATUS] {name}: energy {}, patience {}, {} at {location}, {} turns today",
                state.energy, state.patience, state.mood, state.interactions_today
            );
        }
    }
    engine.resources().reset_daily_counters().await?;
    engine.flush_notifications().await;

    if let Some(path) = &config.save {
        store.save_json(path, clock.now()).await?;
        println!("[SAVED] {path}");
    }
    Ok(())
}
