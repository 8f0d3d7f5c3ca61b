/// Fallbacks for everything the command line layers on top of the engine's own
/// parameter defaults.
pub struct DefaultsConfig {
    pub exclusion_tolerance: f64,
    pub mass_loss: f64,
    pub cleanup: bool,
    pub sampling_timeout_secs: f64,
    pub poll_interval_ms: u64,
    pub shutdown_grace_secs: f64,
    pub scores_file: &'static str,
    pub best_file: &'static str,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            exclusion_tolerance: 0.0,
            mass_loss: 0.0,
            cleanup: true,
            sampling_timeout_secs: 10.0,
            poll_interval_ms: 100,
            shutdown_grace_secs: 5.0,
            scores_file: "scores.csv",
            best_file: "best.json",
        }
    }
}
