use serde::Deserialize;

/// Construction options for [`Nes`](super::Nes). Missing fields in a
/// deserialized config fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NesConfig {
    /// Byte every internal RAM cell holds at power-on.
    pub ram_fill: u8,
    pub debug_event_capacity: usize,
    /// CPU steps after which `run_frame` gives up waiting for the PPU.
    pub frame_step_guard: usize,
}

impl Default for NesConfig {
    fn default() -> Self {
        Self {
            ram_fill: 0x00,
            debug_event_capacity: 512,
            frame_step_guard: 1_000_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: NesConfig = serde_json::from_str(r#"{ "ram_fill": 255 }"#).unwrap();
        assert_eq!(config.ram_fill, 0xFF);
        assert_eq!(config.debug_event_capacity, 512);
        assert_eq!(config.frame_step_guard, 1_000_000);
    }
}
