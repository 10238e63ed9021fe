extern crate tokio;

use clap::Parser;
use crossbeam::channel::{Receiver, unbounded};
use env_logger::Env;
use log::{debug, info, warn};
use miette::{IntoDiagnostic, Result};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};

use mayara::config::{Config, Persistence};
use mayara::radar::guard_zone::{GuardZoneSettings, GuardZoneType};
use mayara::radar::target::message::TargetMessage;
use mayara::radar::{GeoPosition, OwnShip, Radar, RadarError};
use mayara::{Cli, VERSION};

mod sim;

use sim::Simulator;

// Where the simulated ship lies at anchor
const OWN_SHIP: GeoPosition = GeoPosition {
    lat: 52.3676,
    lon: 4.9041,
};

// Pixel values sent by the simulated radar
const PIXEL_VALUES: u8 = 16;

// Range factor of the long range radar in dual radar mode
const LONG_RANGE_FACTOR: u32 = 4;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let log_level = args.verbose.log_level_filter();
    env_logger::Builder::from_env(Env::default())
        .filter_level(log_level)
        .init();

    info!("Mayara ARPA {} loglevel {}", VERSION, log_level);

    let mut persistence = match &args.config {
        Some(path) => Persistence::with_path(path.clone()),
        None => Persistence::new().into_diagnostic()?,
    };
    apply_args(&mut persistence.config, &args);
    if args.save {
        persistence.save().into_diagnostic()?;
    }
    if args.stationary {
        warn!("Stationary mode activated; echoes present in every rotation are ignored");
    }

    let own_ship = OwnShip::new(OWN_SHIP, args.heading);
    let start_time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .into_diagnostic()?
        .as_millis() as u64;
    let sim = Simulator::new(
        args.spokes,
        args.spoke_len,
        args.rotation_ms,
        start_time,
        args.targets,
        args.range as f64,
    );

    let (message_tx, message_rx) = unbounded();
    let mut radars = vec![(
        Radar::new(
            1,
            args.spokes,
            args.spoke_len,
            PIXEL_VALUES,
            args.doppler,
            &persistence.config,
        )
        .with_messages(message_tx.clone()),
        args.range,
    )];
    if args.dual {
        let long_range = Radar::new(
            2,
            args.spokes,
            args.spoke_len,
            PIXEL_VALUES,
            args.doppler,
            &persistence.config,
        )
        .with_messages(message_tx);
        radars[0].0.link(&long_range);
        radars.push((long_range, args.range * LONG_RANGE_FACTOR));
    }
    for (radar, _) in radars.iter() {
        radar.set_own_ship(own_ship);
    }

    let sweeps = args.sweeps;
    let realtime = args.realtime;
    Toplevel::new(move |s| async move {
        for (radar, range) in radars {
            let sim = sim.clone();
            s.start(SubsystemBuilder::new(
                format!("Radar{}", radar.id()),
                move |a| run_radar(a, radar, sim, range, sweeps, realtime),
            ));
        }
        s.start(SubsystemBuilder::new("Output", move |a| output(a, message_rx)));
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_millis(5000))
    .await
    .map_err(Into::into)
}

/// Command line options override the stored settings.
fn apply_args(config: &mut Config, args: &Cli) {
    if args.stationary {
        config.arpa.stationary = true;
    }
    if args.doppler {
        config.arpa.doppler_arpa = true;
    }
    if let Some(speed) = args.start_up_speed {
        config.arpa.start_up_speed = speed;
    }
    if config.guard_zones.is_empty() {
        config.guard_zones.push(GuardZoneSettings {
            zone_type: GuardZoneType::Circle,
            inner_range: 0,
            outer_range: args.guard_radius.min(args.range),
            arpa_on: true,
            ..Default::default()
        });
    }
}

async fn run_radar(
    subsys: SubsystemHandle,
    radar: Radar,
    sim: Simulator,
    range: u32,
    sweeps: u64,
    realtime: bool,
) -> Result<(), RadarError> {
    let legend = *radar.lock().legend();
    let rotation = Duration::from_millis(sim.spoke_time(1, 0) - sim.spoke_time(0, 0));
    info!(
        "Radar {}: simulating {} vessels at range {} m",
        radar.id(),
        sim.vessels.len(),
        range
    );

    let mut sweep = 0;
    while sweeps == 0 || sweep < sweeps {
        if subsys.is_shutdown_requested() {
            return Ok(());
        }
        for angle in 0..sim.spokes() {
            let time = sim.spoke_time(sweep, angle);
            let mut data = sim.spoke(angle, range, time, &legend);
            radar.process_spoke(angle, &mut data, range, time)?;
        }
        let messages = radar.refresh();
        debug!(
            "Radar {} sweep {}: {} targets reported",
            radar.id(),
            sweep,
            messages.len()
        );
        sweep += 1;

        if realtime {
            tokio::select! { biased;
                _ = subsys.on_shutdown_requested() => {
                    return Ok(());
                },
                _ = tokio::time::sleep(rotation) => {}
            }
        } else {
            tokio::task::yield_now().await;
        }
    }

    let alive = radar
        .lock()
        .arpa
        .targets()
        .iter()
        .filter(|t| t.status().is_alive())
        .count();
    info!(
        "Radar {} stopped after {} sweeps with {} targets",
        radar.id(),
        sweep,
        alive
    );
    subsys.request_shutdown();
    Ok(())
}

/// Write the target messages as JSON lines to stdout.
async fn output(subsys: SubsystemHandle, rx: Receiver<TargetMessage>) -> Result<(), RadarError> {
    let mut interval = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! { biased;
            _ = subsys.on_shutdown_requested() => {
                print_messages(&rx)?;
                return Ok(());
            },
            _ = interval.tick() => {
                print_messages(&rx)?;
            }
        }
    }
}

fn print_messages(rx: &Receiver<TargetMessage>) -> Result<(), RadarError> {
    for message in rx.try_iter() {
        println!("{}", message.to_json()?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_fill_in_a_guard_zone() {
        let args = Cli::parse_from(["mayara-arpa", "--doppler", "-g", "5000"]);
        let mut config = Config::default();
        apply_args(&mut config, &args);
        assert!(config.arpa.doppler_arpa);
        assert!(!config.arpa.stationary);
        assert_eq!(config.arpa.start_up_speed, 0.5);
        assert_eq!(config.guard_zones.len(), 1);
        assert_eq!(config.guard_zones[0].zone_type, GuardZoneType::Circle);
        assert_eq!(config.guard_zones[0].outer_range, 1852);

        // a configured zone is kept
        config.guard_zones[0].outer_range = 800;
        apply_args(&mut config, &args);
        assert_eq!(config.guard_zones.len(), 1);
        assert_eq!(config.guard_zones[0].outer_range, 800);

        let args = Cli::parse_from(["mayara-arpa", "--start-up-speed", "8"]);
        apply_args(&mut config, &args);
        assert_eq!(config.arpa.start_up_speed, 8.);
    }

    #[test]
    fn simulated_vessels_are_tracked() {
        // the vessels sail at 2 to 6 m/s, too fast for the default start-up speed
        let args = Cli::parse_from([
            "mayara-arpa",
            "--spokes",
            "1024",
            "--spoke-len",
            "512",
            "--start-up-speed",
            "10",
        ]);
        let mut config = Config::default();
        apply_args(&mut config, &args);
        let (tx, rx) = unbounded();
        let radar = Radar::new(1, 1024, 512, PIXEL_VALUES, false, &config).with_messages(tx);
        radar.set_own_ship(OwnShip::new(OWN_SHIP, 0.));
        let legend = *radar.lock().legend();
        let sim = Simulator::new(1024, 512, 2500, 1_700_000_000_000, 3, 1852.);

        for sweep in 0..10 {
            for angle in 0..1024 {
                let time = sim.spoke_time(sweep, angle);
                let mut data = sim.spoke(angle, 1852, time, &legend);
                radar.process_spoke(angle, &mut data, 1852, time).unwrap();
            }
            radar.refresh();
        }
        let state = radar.lock();
        let alive = state
            .arpa
            .targets()
            .iter()
            .filter(|t| t.status().is_alive())
            .count();
        assert!(alive >= 1, "no targets tracked");
        assert!(rx.try_iter().count() > 0);
    }
}
