//! Line and bridge configuration.

use crate::DEFAULT_ENDPOINT_NAME;

/// Parity setting of the serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    /// No parity bit.
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Flow control setting of the serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    /// No flow control.
    None,
    /// XON/XOFF in-band flow control.
    Software,
    /// RTS/CTS flow control.
    Hardware,
}

/// Serial line parameters applied to a transport right after it opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineConfig {
    /// Baud rate in bits per second.
    pub baud_rate: u32,
    /// Parity mode.
    pub parity: Parity,
    /// Flow control mode.
    pub flow_control: FlowControl,
}

impl LineConfig {
    /// HC-06 factory settings: 9600 baud, no parity, no flow control.
    pub const HC06: LineConfig = LineConfig {
        baud_rate: 9600,
        parity: Parity::None,
        flow_control: FlowControl::None,
    };
}

impl Default for LineConfig {
    fn default() -> Self {
        Self::HC06
    }
}

/// Bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Name the endpoint is registered under.
    pub endpoint_name: String,
}

impl BridgeConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            endpoint_name: DEFAULT_ENDPOINT_NAME.to_string(),
        }
    }

    /// Sets the endpoint name.
    pub fn with_endpoint_name(mut self, name: impl Into<String>) -> Self {
        self.endpoint_name = name.into();
        self
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hc06_line() {
        let line = LineConfig::default();
        assert_eq!(line.baud_rate, 9600);
        assert_eq!(line.parity, Parity::None);
        assert_eq!(line.flow_control, FlowControl::None);
    }

    #[test]
    fn test_bridge_config_builder() {
        assert_eq!(BridgeConfig::default().endpoint_name, "hc06_bt");

        let config = BridgeConfig::new().with_endpoint_name("rfcomm0");
        assert_eq!(config.endpoint_name, "rfcomm0");
    }
}
