use portal_core::counters::Counters;

use crate::hal::{Board, Clock, Display, NetworkAdapter, Sensors};

/// Everything jobs and handlers may touch besides the bus and the job table.
///
/// Owned by the scheduler and lent out for the duration of one job or one
/// message; there is no other shared state.
pub struct Device {
    pub counters: Counters,
    pub network: Box<dyn NetworkAdapter>,
    pub sensors: Box<dyn Sensors>,
    pub display: Box<dyn Display>,
    pub board: Box<dyn Board>,
    pub clock: Box<dyn Clock>,
}

impl Device {
    pub fn new(
        network: Box<dyn NetworkAdapter>,
        sensors: Box<dyn Sensors>,
        display: Box<dyn Display>,
        board: Box<dyn Board>,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self { counters: Counters::new(), network, sensors, display, board, clock }
    }
}
