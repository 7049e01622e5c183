//! Channel selection arithmetic.
//!
//! Channels are indices into the PAT entry list shifted past the reserved
//! network entry, so with `service_count` PAT entries the valid range is
//! `0..=service_count - 2`.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SelectError {
    #[error("channel {requested} is out of range (have {service_count} PAT entries)")]
    OutOfRange { requested: u16, service_count: usize },
}

pub fn channel_up(current: u16, service_count: usize) -> u16 {
    let Some(last) = last_channel(service_count) else {
        return current;
    };
    if current >= last { 0 } else { current + 1 }
}

pub fn channel_down(current: u16, service_count: usize) -> u16 {
    let Some(last) = last_channel(service_count) else {
        return current;
    };
    if current == 0 { last } else { current - 1 }
}

/// Direct switch; rejects anything past `service_count - 1`.
pub fn channel_switch(requested: u16, service_count: usize) -> Result<u16, SelectError> {
    if service_count == 0 || requested as usize > service_count - 1 {
        return Err(SelectError::OutOfRange {
            requested,
            service_count,
        });
    }
    Ok(requested)
}

/// Appends one keypad digit to an accumulating channel number.
pub fn push_digit(acc: u16, digit: u8) -> u16 {
    debug_assert!(digit <= 9);
    acc.saturating_mul(10).saturating_add(u16::from(digit))
}

fn last_channel(service_count: usize) -> Option<u16> {
    if service_count < 2 {
        None
    } else {
        Some((service_count - 2) as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn up_wraps_at_the_last_channel() {
        // 5 PAT entries -> channels 0..=3
        assert_eq!(channel_up(0, 5), 1);
        assert_eq!(channel_up(2, 5), 3);
        assert_eq!(channel_up(3, 5), 0);
    }

    #[test]
    fn down_wraps_at_zero() {
        assert_eq!(channel_down(3, 5), 2);
        assert_eq!(channel_down(0, 5), 3);
    }

    #[test]
    fn up_and_down_hold_position_without_a_pat() {
        assert_eq!(channel_up(2, 0), 2);
        assert_eq!(channel_down(2, 1), 2);
    }

    #[test]
    fn switch_rejects_past_the_entry_list() {
        assert_eq!(channel_switch(3, 5).unwrap(), 3);
        assert_eq!(channel_switch(4, 5).unwrap(), 4);
        assert_matches!(
            channel_switch(5, 5),
            Err(SelectError::OutOfRange { requested: 5, service_count: 5 })
        );
        assert_matches!(channel_switch(0, 0), Err(SelectError::OutOfRange { .. }));
    }

    #[test]
    fn digits_concatenate_decimally() {
        assert_eq!(push_digit(0, 0), 0);
        assert_eq!(push_digit(0, 7), 7);
        assert_eq!(push_digit(7, 2), 72);
        assert_eq!(push_digit(72, 9), 729);
    }
}
