//! Shield status indicators: two LEDs and the beeper.

use crate::trace::{History, BEEPER_HISTORY_CAPACITY};

/// Beeper duty for a fully driven tone.
pub const BEEPER_DUTY_ON: u8 = 0;
/// Beeper duty for silence.
pub const BEEPER_DUTY_OFF: u8 = 255;

/// History symbol for a beeper duty value.
#[must_use]
pub const fn beeper_symbol(duty: u8) -> u8 {
    match duty {
        BEEPER_DUTY_ON => b'^',
        BEEPER_DUTY_OFF => b' ',
        _ => b'_',
    }
}

/// LED levels and a short beeper history for the status display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShieldIndicators {
    leds: [bool; 2],
    beeper: History<BEEPER_HISTORY_CAPACITY>,
}

impl Default for ShieldIndicators {
    fn default() -> Self {
        Self {
            leds: [false, true],
            beeper: History::filled(b'_'),
        }
    }
}

impl ShieldIndicators {
    /// Creates indicators in their power-on state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates LED `index`; unknown indices are ignored.
    pub fn set_led(&mut self, index: u8, on: bool) {
        if let Some(led) = self.leds.get_mut(usize::from(index)) {
            *led = on;
        }
    }

    /// Current LED levels.
    #[must_use]
    pub const fn leds(&self) -> [bool; 2] {
        self.leds
    }

    /// Records a beeper duty change.
    pub fn record_beeper(&mut self, duty: u8) {
        self.beeper.push(beeper_symbol(duty));
    }

    /// Beeper history, oldest first.
    #[must_use]
    pub fn beeper_history(&self) -> String {
        self.beeper.as_string()
    }

    /// Scrolls a silent beeper one slot after each display refresh.
    pub fn after_display(&mut self) {
        if self.beeper.last() == Some(b' ') {
            self.beeper.push(b' ');
        }
    }

    /// Single-line rendering: `LEDs=(A, B) B=<history>`.
    #[must_use]
    pub fn render(&self) -> String {
        let led = |on: bool| if on { '*' } else { 'o' };
        format!(
            "LEDs=({}, {}) B={}",
            led(self.leds[0]),
            led(self.leds[1]),
            self.beeper
        )
    }
}
