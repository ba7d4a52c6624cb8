use crate::config::RemoteConfig;

/// Contacts on the remote that the controller bridges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteButton {
    /// Moves the selector towards higher window ids.
    SelectNext,
    SelectPrevious,
    Open,
    Close,
    /// Power-cycle line of the remote. Asserted by driving it low.
    Reset,
}

impl RemoteButton {
    pub const ALL: [Self; 5] = [
        Self::SelectNext,
        Self::SelectPrevious,
        Self::Open,
        Self::Close,
        Self::Reset,
    ];

    pub fn pin(self, config: &RemoteConfig) -> i32 {
        match self {
            Self::SelectNext => config.select_next_pin,
            Self::SelectPrevious => config.select_previous_pin,
            Self::Open => config.open_pin,
            Self::Close => config.close_pin,
            Self::Reset => config.reset_pin,
        }
    }

    pub fn active_low(self) -> bool {
        matches!(self, Self::Reset)
    }

    /// Output level that asserts (`pressed`) or releases the contact.
    pub fn level(self, pressed: bool) -> bool {
        pressed != self.active_low()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteAction {
    Press(RemoteButton),
    Release(RemoteButton),
    Delay(u64),
}

/// Press, hold for `hold_ms`, release.
pub fn pulse(button: RemoteButton, hold_ms: u64) -> Vec<RemoteAction> {
    vec![
        RemoteAction::Press(button),
        RemoteAction::Delay(hold_ms),
        RemoteAction::Release(button),
    ]
}

/// Single actuation pulse for an open or close command.
pub fn command_pulse(open: bool, config: &RemoteConfig) -> Vec<RemoteAction> {
    let button = if open {
        RemoteButton::Open
    } else {
        RemoteButton::Close
    };
    pulse(button, config.click_ms)
}

/// Holds the reset line so the remote reboots into its default selection.
pub fn reset_sequence(config: &RemoteConfig) -> Vec<RemoteAction> {
    pulse(RemoteButton::Reset, config.reset_hold_ms)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn reset_line_is_active_low() {
        assert!(!RemoteButton::Reset.level(true));
        assert!(RemoteButton::Reset.level(false));
        assert!(RemoteButton::Open.level(true));
        assert!(!RemoteButton::Open.level(false));
    }

    #[test]
    fn command_pulse_uses_click_duration() {
        let config = RemoteConfig::default();
        assert_eq!(
            command_pulse(false, &config),
            vec![
                RemoteAction::Press(RemoteButton::Close),
                RemoteAction::Delay(300),
                RemoteAction::Release(RemoteButton::Close),
            ]
        );
    }

    #[test]
    fn reset_sequence_holds_reset_line() {
        let config = RemoteConfig::default();
        assert_eq!(
            reset_sequence(&config),
            vec![
                RemoteAction::Press(RemoteButton::Reset),
                RemoteAction::Delay(500),
                RemoteAction::Release(RemoteButton::Reset),
            ]
        );
    }
}
