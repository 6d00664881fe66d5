//! Indicator surface. The device has no console; a single status LED
//! (an RGB unit on some boards) is the only user-visible output. The
//! core emits events, boards own the patterns and timings.

/// Receiver for sync-pipeline status events.
pub trait Indicator {
    /// `true` once the dirty queue has drained, `false` while sectors
    /// are still waiting for write-back.
    fn sync_status(&mut self, in_sync: bool);

    /// A different image was loaded.
    fn image_change(&mut self);

    /// A next/previous request ran off the end of the catalogue.
    fn end_of_list(&mut self);

    /// A blank image was created.
    fn new_image(&mut self);

    /// Blink an error code: off for half a second, then `code`
    /// half-second blinks.
    fn blink_error(&mut self, code: u8);
}

/// Indicator that drops every event. Useful on boards with no LED
/// wired and in tests that do not care.
pub struct NullIndicator;

impl Indicator for NullIndicator {
    fn sync_status(&mut self, _in_sync: bool) {}
    fn image_change(&mut self) {}
    fn end_of_list(&mut self) {}
    fn new_image(&mut self) {}
    fn blink_error(&mut self, _code: u8) {}
}
