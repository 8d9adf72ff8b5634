use rusty_sim::circuit_config::CircuitFactory;
use rusty_sim::console::{ConsoleApp, ConsoleConfig};
use rusty_sim::{init_logging, SimulationEngine, SimulationState};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

const DEFAULT_CONFIG: &str = "configs/counter_ram.json";
const HEADLESS_CYCLE_CAP: i64 = 1000;

struct Options {
    config_path: String,
    console: bool,
    cycles: Option<i64>,
    log_level: String,
}

fn usage() -> ! {
    eprintln!("usage: rusty_sim [CONFIG.json] [--console] [--cycles N] [--log LEVEL]");
    std::process::exit(2);
}

fn parse_args() -> Options {
    let mut options = Options {
        config_path: DEFAULT_CONFIG.to_string(),
        console: false,
        cycles: None,
        log_level: "info".to_string(),
    };

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--console" | "-c" => options.console = true,
            "--cycles" | "-n" => {
                let value = args.next().unwrap_or_else(|| usage());
                options.cycles = Some(value.parse().unwrap_or_else(|_| usage()));
            }
            "--log" => options.log_level = args.next().unwrap_or_else(|| usage()),
            "--help" | "-h" => usage(),
            path if !path.starts_with('-') => options.config_path = path.to_string(),
            _ => usage(),
        }
    }
    options
}

fn main() {
    let options = parse_args();
    // The console owns the terminal, so keep log output quiet there.
    init_logging(if options.console { "error" } else { options.log_level.as_str() });

    if let Err(e) = run(options) {
        error!(error = %e, "simulation failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(options: Options) -> Result<(), Box<dyn std::error::Error>> {
    let factory = CircuitFactory::new();
    let mut config = factory.load_json_config(&options.config_path)?;
    if let Some(cycles) = options.cycles {
        config.simulation.max_cycles = cycles;
    }
    if !options.console && config.simulation.max_cycles < 0 {
        info!(cap = HEADLESS_CYCLE_CAP, "unlimited run requested without console, capping cycles");
        config.simulation.max_cycles = HEADLESS_CYCLE_CAP;
    }

    let circuit = factory.create(config)?;
    let info = circuit.info();
    println!("{} v{}", info.name, info.version);
    if !info.description.is_empty() {
        println!("  {}", info.description);
    }
    println!("  Components: {}", info.component_count);
    println!("  Buses: {}", info.bus_count);

    let mut engine = circuit.into_engine();
    let report = engine.validate_setup();
    for warning in &report.warnings {
        warn!("{}", warning);
    }
    if !report.ok {
        for problem in &report.errors {
            error!("{}", problem);
        }
        return Err(format!("circuit '{}' failed validation", info.name).into());
    }

    if options.console {
        run_console(engine)
    } else {
        run_headless(&mut engine)
    }
}

fn run_headless(engine: &mut SimulationEngine) -> Result<(), Box<dyn std::error::Error>> {
    engine.start()?;
    let config = engine.config();
    // Budget: the whole run at target speed plus slack for scheduling.
    let budget = if config.real_time && config.max_cycles > 0 {
        Duration::from_secs_f64(config.max_cycles as f64 / config.clock_frequency) + Duration::from_secs(5)
    } else {
        Duration::from_secs(60)
    };

    if !engine.wait_for_stop(budget) {
        warn!(?budget, "run did not finish in time, stopping");
        engine.stop()?;
    }

    let stats = engine.statistics();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    for id in engine.component_ids() {
        let registers = engine.inspect_registers(&id)?;
        if !registers.is_empty() {
            println!("{}: {:?}", id, registers);
        }
    }

    if stats.state == SimulationState::Error {
        return Err("simulation ended in the error state".into());
    }
    Ok(())
}

fn run_console(engine: SimulationEngine) -> Result<(), Box<dyn std::error::Error>> {
    let engine = Arc::new(Mutex::new(engine));
    let mut app = ConsoleApp::new(Arc::clone(&engine), ConsoleConfig::default())?;
    app.run()?;

    let mut engine = engine
        .lock()
        .map_err(|e| format!("engine lock poisoned: {}", e))?;
    engine.stop()?;
    println!("Stopped at cycle {}", engine.current_cycle());
    Ok(())
}
