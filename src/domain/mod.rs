// Domain layer: run model and the ports every adapter implements.

pub mod model;
pub mod ports;
