pub const DEVICE_ENV: &str = "DSPSYNC_DEVICE";
pub const SIMULATE_STALLS_ENV: &str = "DSPSYNC_SIMULATE_STALLS";

/// Truthy environment flag: 1/true/yes/on.
pub fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            let s = v.trim().to_ascii_lowercase();
            s == "1" || s == "true" || s == "yes" || s == "on"
        })
        .unwrap_or(false)
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub device: String,
    pub sample_rate: u32,
    pub bits: i32,
    pub period: i64,
    pub repetitions: u32,
    pub nfrags: usize,
    pub exclusive: bool,
    pub memory_map: bool,
    pub simulate_stalls: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            device: std::env::var(DEVICE_ENV).unwrap_or_else(|_| "/dev/dsp".to_string()),
            sample_rate: 48_000,
            bits: 16,
            period: 1024,
            repetitions: 16,
            nfrags: 2,
            exclusive: false,
            memory_map: false,
            simulate_stalls: env_flag(SIMULATE_STALLS_ENV),
        }
    }
}
