//! Weak device fingerprint.
//!
//! Only meant to notice a token moving to another device or tab mid-session. Missing
//! signals hash as empty strings, so detection never fails.
use sha2::{Digest, Sha256};

const FINGERPRINT_HEX_LEN: usize = 16;
const RENDER_CHECKSUM_HEX_LEN: usize = 8;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvironmentSignals {
    pub user_agent: Option<String>,
    pub language: Option<String>,
    pub platform: Option<String>,
    pub logical_processors: Option<u32>,
    pub device_memory_gb: Option<f64>,
    pub screen: Option<(u32, u32)>,
    pub color_depth: Option<u32>,
    pub timezone: Option<String>,
    /// Raw pixels from an off-screen render, reduced to a checksum before hashing.
    pub render_sample: Option<Vec<u8>>,
}

impl EnvironmentSignals {
    /// What a native host can see without a display.
    pub fn detect() -> Self {
        Self {
            user_agent: Some(format!(
                "{}/{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            )),
            language: std::env::var("LANG").ok(),
            platform: Some(format!(
                "{}-{}",
                std::env::consts::OS,
                std::env::consts::ARCH
            )),
            logical_processors: std::thread::available_parallelism()
                .ok()
                .and_then(|n| u32::try_from(n.get()).ok()),
            device_memory_gb: None,
            screen: None,
            color_depth: None,
            timezone: std::env::var("TZ").ok(),
            render_sample: None,
        }
    }
}

fn render_checksum(sample: &[u8]) -> String {
    let mut checksum = hex::encode(Sha256::digest(sample));
    checksum.truncate(RENDER_CHECKSUM_HEX_LEN);
    checksum
}

pub fn generate(signals: &EnvironmentSignals) -> String {
    let components = [
        signals.user_agent.clone().unwrap_or_default(),
        signals.language.clone().unwrap_or_default(),
        signals.platform.clone().unwrap_or_default(),
        signals
            .logical_processors
            .map(|n| n.to_string())
            .unwrap_or_default(),
        signals
            .device_memory_gb
            .map(|gb| gb.to_string())
            .unwrap_or_default(),
        signals
            .screen
            .map(|(w, h)| format!("{w}x{h}"))
            .unwrap_or_default(),
        signals
            .color_depth
            .map(|depth| depth.to_string())
            .unwrap_or_default(),
        signals.timezone.clone().unwrap_or_default(),
        signals
            .render_sample
            .as_deref()
            .map(render_checksum)
            .unwrap_or_default(),
    ];

    let mut hasher = Sha256::new();
    hasher.update(components.join("|").as_bytes());

    let mut fingerprint = hex::encode(hasher.finalize());
    fingerprint.truncate(FINGERPRINT_HEX_LEN);
    fingerprint
}

#[cfg(test)]
mod tests {
    use super::{EnvironmentSignals, generate};

    fn browser() -> EnvironmentSignals {
        EnvironmentSignals {
            user_agent: Some("Mozilla/5.0".to_string()),
            language: Some("en-US".to_string()),
            platform: Some("MacIntel".to_string()),
            logical_processors: Some(8),
            device_memory_gb: Some(8.0),
            screen: Some((1440, 900)),
            color_depth: Some(24),
            timezone: Some("America/Indiana/Indianapolis".to_string()),
            render_sample: Some(vec![12, 200, 7, 255, 0, 0, 31]),
        }
    }

    #[test]
    fn test_stable() {
        assert_eq!(generate(&browser()), generate(&browser()));
        assert_eq!(generate(&browser()).len(), 16);
    }

    #[test]
    fn test_sensitive_to_signals() {
        let mut other = browser();
        other.screen = Some((1920, 1080));
        assert_ne!(generate(&browser()), generate(&other));

        let mut other = browser();
        other.render_sample = Some(vec![1, 2, 3]);
        assert_ne!(generate(&browser()), generate(&other));
    }

    #[test]
    fn test_missing_signals_degrade() {
        let empty = generate(&EnvironmentSignals::default());
        assert_eq!(empty.len(), 16);
        assert_eq!(empty, generate(&EnvironmentSignals::default()));

        let mut partial = browser();
        partial.render_sample = None;
        assert_ne!(generate(&partial), generate(&browser()));
    }

    #[test]
    fn test_detect() {
        let detected = EnvironmentSignals::detect();
        assert!(detected.platform.is_some());
        assert_eq!(generate(&detected), generate(&EnvironmentSignals::detect()));
    }
}
