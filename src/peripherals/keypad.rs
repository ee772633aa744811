//! Keypad input (C7).
//!
//! KEYINPUT (0x04000130) is active-low: a set bit means the button is
//! released. KEYCNT (0x04000132) configures an optional IRQ-on-keypress
//! condition (AND/OR of a selected button mask) but is otherwise inert in
//! this core since no game in the retrieval pack exercises it beyond
//! reading KEYINPUT directly.

use serde::{Deserialize, Serialize};

pub mod button {
    pub const A: u16 = 1 << 0;
    pub const B: u16 = 1 << 1;
    pub const SELECT: u16 = 1 << 2;
    pub const START: u16 = 1 << 3;
    pub const RIGHT: u16 = 1 << 4;
    pub const LEFT: u16 = 1 << 5;
    pub const UP: u16 = 1 << 6;
    pub const DOWN: u16 = 1 << 7;
    pub const R: u16 = 1 << 8;
    pub const L: u16 = 1 << 9;
    pub const ALL: u16 = 0x03FF;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keypad {
    /// Active-high internal state; bit set means pressed.
    pressed: u16,
    keycnt: u16,
}

impl Keypad {
    pub fn new() -> Self {
        Self { pressed: 0, keycnt: 0 }
    }

    /// `mask` uses the same active-high bit layout as [`button`].
    pub fn set_state(&mut self, mask: u16) {
        self.pressed = mask & button::ALL;
    }

    pub fn keyinput(&self) -> u16 {
        !self.pressed & button::ALL
    }

    pub fn keycnt(&self) -> u16 {
        self.keycnt
    }

    pub fn set_keycnt_lo(&mut self, value: u8) {
        self.keycnt = (self.keycnt & 0xFF00) | value as u16;
    }

    pub fn set_keycnt_hi(&mut self, value: u8) {
        self.keycnt = (self.keycnt & 0x00FF) | ((value as u16) << 8);
    }

    /// Evaluates the KEYCNT IRQ condition (bit 14: AND vs OR of bit 15's selection).
    pub fn irq_condition_met(&self) -> bool {
        if self.keycnt & (1 << 14) == 0 {
            return false;
        }
        let selected = self.keycnt & button::ALL;
        if selected == 0 {
            return false;
        }
        if self.keycnt & (1 << 15) != 0 {
            (self.pressed & selected) == selected
        } else {
            (self.pressed & selected) != 0
        }
    }
}

impl Default for Keypad {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_released_reads_all_ones() {
        let k = Keypad::new();
        assert_eq!(k.keyinput(), 0x03FF);
    }

    #[test]
    fn pressed_button_clears_its_bit() {
        let mut k = Keypad::new();
        k.set_state(button::A | button::UP);
        assert_eq!(k.keyinput(), !(button::A | button::UP) & button::ALL);
    }

    #[test]
    fn irq_condition_or_mode() {
        let mut k = Keypad::new();
        k.set_keycnt_lo((button::A) as u8);
        k.set_keycnt_hi((1 << 6) as u8);
        k.set_state(button::A);
        assert!(k.irq_condition_met());
    }

    #[test]
    fn irq_condition_and_mode_requires_all_selected() {
        let mut k = Keypad::new();
        let selected = button::A | button::B;
        k.set_keycnt_lo(selected as u8);
        k.set_keycnt_hi(((1 << 6) | (1 << 7)) as u8);
        k.set_state(button::A);
        assert!(!k.irq_condition_met());
        k.set_state(selected);
        assert!(k.irq_condition_met());
    }
}
