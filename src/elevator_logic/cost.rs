//! Cost estimation for bids.
//!
//! A real deployment plugs its own time-to-serve estimator in through [CostFunction].
//! [DistanceCost] is a simple stand-in used by the console binary.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::config;
use crate::events::{Direction, HallCall};

/// Estimated time for this node's car to serve a hall call. Lower is better.
pub trait CostFunction: Send + Sync {
    /// Estimated time for this car to serve `call`
    fn time_to_serve(&self, call: HallCall) -> u32;
}

impl<F> CostFunction for F
where
    F: Fn(HallCall) -> u32 + Send + Sync,
{
    fn time_to_serve(&self, call: HallCall) -> u32 {
        self(call)
    }
}

/// Floors to travel times [config::TRAVEL_TIME], plus one door cycle when the caller
/// wants to go back the way the car came from.
#[derive(Debug, Default)]
pub struct DistanceCost {
    floor: AtomicU8,
}

impl DistanceCost {
    /// Car parked at `floor`
    pub fn new(floor: u8) -> Self {
        Self { floor: AtomicU8::new(floor) }
    }

    /// Updates the car position
    pub fn set_floor(&self, floor: u8) {
        self.floor.store(floor, Ordering::Relaxed);
    }

    /// Last floor reported
    pub fn floor(&self) -> u8 {
        self.floor.load(Ordering::Relaxed)
    }
}

impl CostFunction for DistanceCost {
    fn time_to_serve(&self, call: HallCall) -> u32 {
        let here = self.floor();
        let distance = here.abs_diff(call.floor) as u32;
        let turns_back = match call.direction {
            Direction::Up => call.floor < here,
            Direction::Down => call.floor > here,
        };
        distance * config::TRAVEL_TIME + if turns_back { config::DOOR_OPEN_TIME } else { 0 }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closer_car_is_cheaper() {
        let near = DistanceCost::new(2);
        let far = DistanceCost::new(0);
        let call = HallCall::new(3, Direction::Down).unwrap();
        assert!(near.time_to_serve(call) < far.time_to_serve(call));
        assert_eq!(near.time_to_serve(call), config::TRAVEL_TIME);
    }

    #[test]
    fn turning_back_costs_a_door_cycle() {
        let cost = DistanceCost::new(2);
        let with = cost.time_to_serve(HallCall::new(1, Direction::Up).unwrap());
        let without = cost.time_to_serve(HallCall::new(1, Direction::Down).unwrap());
        assert_eq!(with, without + config::DOOR_OPEN_TIME);
    }

    #[test]
    fn closures_are_cost_functions() {
        let fixed = |_: HallCall| 7;
        assert_eq!(fixed.time_to_serve(HallCall::new(0, Direction::Up).unwrap()), 7);
    }
}
