mod config;
mod db;
mod relay;
mod state;
mod web;

use anyhow::Result;
use std::{env, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use sprinkler_engine::{ProgramDefinition, ProgramRecord};

use db::Db;
use relay::RelayBoard;
use state::ControllerState;
use web::AppState;

/// How often the scheduler is advanced.  The engine needs at least one
/// tick per second for pause countdowns and run boundaries.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let db_url =
        env::var("DB_URL").unwrap_or_else(|_| "sqlite:sprinkler.db?mode=rwc".to_string());

    // ── Config file ─────────────────────────────────────────────────
    let cfg = config::load(&config_path)?;
    let mut scheduler = config::build_scheduler(&cfg);

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(&db_url).await?;
    db.migrate().await?;

    // Load persisted programs into the store; corrupt records are
    // skipped, not fatal.
    let records = db.load_programs().await?;
    for (slot, record) in records.iter().enumerate() {
        match ProgramDefinition::try_from(record) {
            Ok(program) => {
                if let Err(e) = scheduler.programs_mut().add(program) {
                    warn!(slot, %e, "dropping persisted program");
                }
            }
            Err(e) => warn!(slot, %e, "skipping corrupt persisted program"),
        }
    }
    info!(programs = scheduler.programs().len(), "program store loaded");

    // ── Relay board ─────────────────────────────────────────────────
    // Many common relay boards are active-low. If yours is active-high, set false.
    let active_low = env::var("RELAY_ACTIVE_LOW")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(true);

    let mut relays = RelayBoard::new(&config::gpio_map(&cfg), active_low)?;
    relays.all_off();

    // ── Shared state ────────────────────────────────────────────────
    let mut station_names = vec![String::new(); cfg.num_stations as usize];
    for s in &cfg.stations {
        if let Some(slot) = station_names.get_mut(s.index as usize) {
            *slot = s.name.clone();
        }
    }
    let tz_offset_secs = cfg.timezone_offset_minutes as i64 * 60;
    let shared = Arc::new(RwLock::new(ControllerState::new(
        scheduler,
        tz_offset_secs,
        station_names,
    )));
    {
        let mut st = shared.write().await;
        st.record_system("controller started".to_string());
    }

    // ── Web server ──────────────────────────────────────────────────
    let app_state = AppState {
        shared: Arc::clone(&shared),
        db: db.clone(),
    };
    tokio::spawn(async move {
        if let Err(e) = web::serve(app_state).await {
            error!(%e, "web server exited");
        }
    });

    // ── Tick loop ───────────────────────────────────────────────────
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    let mut last_program_count = {
        let st = shared.read().await;
        st.scheduler.programs().len()
    };

    loop {
        ticker.tick().await;

        let (active, completed, changed_programs) = {
            let mut st = shared.write().await;
            let now = st.now();
            let active = st.scheduler.tick(now);
            st.active = active.stations;
            let completed = st.scheduler.take_completed();
            for run in &completed {
                st.record_run(format!(
                    "station {} ran {}s ({:?})",
                    run.station, run.duration, run.origin
                ));
            }
            // Single-run programs delete themselves; write the store back
            // when the count moves.
            let count = st.scheduler.programs().len();
            let changed: Option<Vec<ProgramRecord>> = if count != last_program_count {
                last_program_count = count;
                Some(
                    st.scheduler
                        .programs()
                        .iter()
                        .map(|(_, p)| ProgramRecord::from(p))
                        .collect(),
                )
            } else {
                None
            };
            (active, completed, changed)
        };

        relays.apply(active.stations);

        // Best-effort persistence; a db hiccup must not stop watering.
        for run in &completed {
            if let Err(e) = db.insert_run_event(run).await {
                error!(station = run.station, %e, "insert_run_event failed");
            }
        }
        if let Some(records) = changed_programs {
            if let Err(e) = db.save_programs(&records).await {
                error!(%e, "save_programs failed");
            }
        }
    }
}
