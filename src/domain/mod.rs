// Domain layer: entities and the ports (async traits) the booking core talks through.

pub mod model;
pub mod ports;
