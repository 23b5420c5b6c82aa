use ::metrics::{counter, gauge};

use crate::registry::Rejection;
use crate::signals::DisconnectCause;

pub const ATTEMPTS_TOTAL: &str = "rendezvous_attempts_total";
pub const REJECTIONS_TOTAL: &str = "rendezvous_rejections_total";
pub const TEARDOWNS_TOTAL: &str = "rendezvous_teardowns_total";
pub const RELAYED_TOTAL: &str = "rendezvous_relayed_total";
pub const BUS_DUPLICATES_TOTAL: &str = "rendezvous_bus_duplicates_total";
pub const ACTIVE_ATTEMPTS: &str = "rendezvous_active_attempts";

pub fn attempt(outcome: &'static str) {
    counter!(ATTEMPTS_TOTAL, 1, "outcome" => outcome);
}

pub fn rejection(rejection: Rejection) {
    counter!(REJECTIONS_TOTAL, 1, "reason" => rejection.as_str());
}

pub fn teardown(cause: DisconnectCause) {
    counter!(TEARDOWNS_TOTAL, 1, "cause" => cause.as_str());
}

pub fn relayed(event: &'static str) {
    counter!(RELAYED_TOTAL, 1, "event" => event);
}

pub fn bus_duplicate() {
    counter!(BUS_DUPLICATES_TOTAL, 1);
}

pub fn active_attempts(active: usize) {
    gauge!(ACTIVE_ATTEMPTS, active as f64);
}
