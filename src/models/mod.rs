mod alert;
mod reading;
mod simulation;
mod source;

pub use alert::{
    ActiveAlert, AlertLifecycle, AlertStatus, AlertThresholds, CriticalValue, EmailNotification,
    Severity,
};
pub use reading::{parse_server_timestamp, SensorReading};
pub use simulation::{SimulationPhase, SimulationState, SimulationStatus};
pub use source::{DataSource, RealDataAvailability};
