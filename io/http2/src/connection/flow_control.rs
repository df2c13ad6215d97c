//! HTTP/2 flow control.

use crate::frame::MAX_WINDOW_SIZE;

/// One flow-control window, at connection or stream level.
///
/// A send window is debited by `consume` and credited by the peer's
/// WINDOW_UPDATEs. A receive window is debited when DATA arrives and
/// replenished through `take_update`, which batches credit until half of
/// the initial window has been consumed. With `consume_held`, received
/// bytes count toward that credit only once handed back by `release`.
#[derive(Debug, Clone)]
pub struct FlowControl {
    /// May go negative after a SETTINGS_INITIAL_WINDOW_SIZE decrease.
    window: i64,
    initial_window: u32,
    /// Consumed bytes not yet returned to the peer.
    unacked: u32,
}

/// A window increment would exceed 2^31 - 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOverflow;

impl FlowControl {
    pub fn new(initial_window_size: u32) -> Self {
        Self {
            window: initial_window_size as i64,
            initial_window: initial_window_size,
            unacked: 0,
        }
    }

    /// Bytes that may be sent (or received) right now.
    pub fn available(&self) -> usize {
        self.window.max(0) as usize
    }

    /// Credit the window from a WINDOW_UPDATE.
    pub fn increase(&mut self, increment: u32) -> Result<(), WindowOverflow> {
        let next = self.window + increment as i64;
        if next > MAX_WINDOW_SIZE as i64 {
            return Err(WindowOverflow);
        }
        self.window = next;
        Ok(())
    }

    /// Debit the window. Returns false if `amount` exceeded it.
    pub fn consume(&mut self, amount: u32) -> bool {
        let fits = amount as i64 <= self.window;
        self.window -= amount as i64;
        self.unacked = self.unacked.saturating_add(amount);
        fits
    }

    /// Debit the window without making the bytes eligible for an update.
    pub fn consume_held(&mut self, amount: u32) -> bool {
        let fits = amount as i64 <= self.window;
        self.window -= amount as i64;
        fits
    }

    /// Make `amount` held bytes eligible for the next update.
    pub fn release(&mut self, amount: u32) {
        self.unacked = self.unacked.saturating_add(amount);
    }

    /// Credit to hand back to the peer, once enough has accumulated.
    pub fn take_update(&mut self) -> Option<u32> {
        if self.unacked == 0 || self.unacked < self.initial_window / 2 {
            return None;
        }
        let increment = std::mem::take(&mut self.unacked);
        self.window += increment as i64;
        Some(increment)
    }

    /// Apply a SETTINGS_INITIAL_WINDOW_SIZE change to an existing window.
    pub fn set_initial_window(&mut self, new_initial: u32) -> Result<(), WindowOverflow> {
        let delta = new_initial as i64 - self.initial_window as i64;
        let next = self.window + delta;
        if next > MAX_WINDOW_SIZE as i64 {
            return Err(WindowOverflow);
        }
        self.window = next;
        self.initial_window = new_initial;
        Ok(())
    }

    pub fn initial_window(&self) -> u32 {
        self.initial_window
    }
}
