pub mod clock;
pub mod control_loop;
pub mod controller;
pub mod conversion;
pub mod error;
pub mod execution;
pub mod model;
pub mod protocol;
pub mod registry;
pub mod serial_backend;
pub mod servo;
pub mod simulated;
pub mod transport;
pub mod transport_serial;

pub use clock::{Clock, ManualClock, SystemClock};
pub use control_loop::{start_control_loop, ControlLoopConfig, ControlLoopHandle, MotorCommand, MotorSnapshot};
pub use controller::{Controller, DisplayMode};
pub use conversion::EncoderConversion;
pub use error::ControlError;
pub use execution::ProtocolTiming;
pub use model::{ServoKind, ServoStatus, SPEED_MAX, SPEED_MIN};
pub use registry::DeviceRegistry;
pub use serial_backend::SerialController;
pub use servo::ServoState;
pub use simulated::{SimulatedController, SimulationConfig};
pub use transport::BusTransport;
pub use transport_serial::{SerialConfig, SerialTransport};
