use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::radar::guard_zone::GuardZoneSettings;
use crate::radar::RadarError;

pub fn get_project_dirs() -> Result<ProjectDirs, RadarError> {
    ProjectDirs::from("net", "verruijt", "mayara").ok_or(RadarError::NoProjectDirs)
}

///
/// Tunables of the target tracker.
///
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ArpaSettings {
    /// Pixel value from which a pixel is part of a target; the legend's
    /// strong return value when not set
    pub threshold: Option<u8>,
    pub max_targets: usize,

    // Kalman filter
    pub process_noise: f64,  // Q1, variance of the acceleration
    pub maneuver_noise: f64, // Q2, used when the target is maneuvring
    pub angle_noise: f64,    // measurement variance of the angle, in spokes^2
    pub range_noise: f64,    // measurement variance of the range, in pixels^2
    pub max_turn_rate: f64,  // degrees per second

    /// Maximum speed, in m/s, of a target that is still being acquired
    pub start_up_speed: f64,

    // Share of the contour pixels that must be Doppler to stay a Doppler target,
    // or to become one
    pub doppler_to_doppler: f64,
    pub doppler_to_any: f64,

    /// Acquire targets from Doppler returns anywhere in the sweep
    pub doppler_arpa: bool,
    /// Ignore pixels that are lit every rotation
    pub stationary: bool,
    /// Spokes an arc guard zone moves after each traversal, for testing
    pub guard_zone_rotate: i32,
}

impl Default for ArpaSettings {
    fn default() -> Self {
        ArpaSettings {
            threshold: None,
            max_targets: 20,
            process_noise: 1.0,
            maneuver_noise: 4.0,
            angle_noise: 100.,
            range_noise: 25.,
            max_turn_rate: 10.,
            start_up_speed: 0.5,
            doppler_to_doppler: 0.85,
            doppler_to_any: 0.80,
            doppler_arpa: false,
            stationary: false,
            guard_zone_rotate: 0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub arpa: ArpaSettings,
    pub guard_zones: Vec<GuardZoneSettings>,
}

#[derive(Debug, Clone)]
pub struct Persistence {
    pub config: Config,
    path: PathBuf,
}

impl Persistence {
    /// Load `settings.json` from the user's config directory.
    pub fn new() -> Result<Self, RadarError> {
        let project_dirs = get_project_dirs()?;
        let mut settings_path = project_dirs.config_dir().to_owned();
        fs::create_dir_all(&settings_path)?;
        settings_path.push("settings.json");

        let this = Self::with_path(settings_path);
        debug!("persistence loaded: {:?}", this);
        Ok(this)
    }

    pub fn with_path(path: PathBuf) -> Self {
        let mut this = Persistence {
            config: Config::default(),
            path,
        };
        this.load();
        this
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&mut self) {
        let file = match File::open(&self.path) {
            Err(e) => {
                warn!(
                    "no config '{}' yet; starting fresh: {}",
                    &self.path.display(),
                    e
                );

                if let Err(e) = self.save() {
                    warn!("cannot store config '{}': {}", &self.path.display(), e);
                }
                return;
            }
            Ok(f) => f,
        };

        let reader = BufReader::new(file);

        match serde_json::from_reader(reader) {
            Ok(u) => {
                self.config = u;
                info!("Loaded config from '{}'", &self.path.display());
            }
            Err(e) => {
                warn!(
                    "Config '{}' corrupted; starting fresh: {}",
                    &self.path.display(),
                    e
                );
            }
        };
    }

    pub fn save(&self) -> Result<(), RadarError> {
        let file = File::create(&self.path)?;

        let mut writer = BufWriter::new(&file);

        serde_json::to_writer_pretty(writer.by_ref(), &self.config)?;
        writeln!(writer)?;
        writer.flush()?;

        info!("Written config file '{}'", &self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radar::guard_zone::GuardZoneType;

    fn temp_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("mayara-arpa-{}-{}", std::process::id(), name));
        let _ = fs::remove_file(&path);
        path
    }

    #[test]
    fn missing_file_is_created() {
        let path = temp_path("missing.json");
        let persistence = Persistence::with_path(path.clone());
        assert_eq!(persistence.config, Config::default());
        assert!(path.exists());
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn settings_survive_a_restart() {
        let path = temp_path("restart.json");
        let mut persistence = Persistence::with_path(path.clone());
        persistence.config.arpa.max_targets = 50;
        persistence.config.arpa.threshold = Some(8);
        persistence.config.guard_zones.push(GuardZoneSettings {
            zone_type: GuardZoneType::Arc,
            start_bearing: 300.,
            end_bearing: 60.,
            ..Default::default()
        });
        persistence.save().unwrap();

        let reloaded = Persistence::with_path(path.clone());
        assert_eq!(reloaded.config, persistence.config);
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn corrupted_file_gives_defaults() {
        let path = temp_path("corrupted.json");
        fs::write(&path, "{ \"arpa\": ").unwrap();
        let persistence = Persistence::with_path(path.clone());
        assert_eq!(persistence.config, Config::default());
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn partial_settings_are_completed() {
        let config: Config =
            serde_json::from_str(r#"{ "arpa": { "maxTargets": 1, "max_targets": 5 } }"#).unwrap();
        assert_eq!(config.arpa.max_targets, 5);
        assert_eq!(config.arpa.doppler_to_doppler, 0.85);
        assert!(config.guard_zones.is_empty());
    }
}
