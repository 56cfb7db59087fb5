//! Shared types for the `axred` axis-reduction kernel generator: element
//! types, scalar values, device limits, settings and the error type.

pub mod device_limits;
pub mod dtype;
pub mod error;
pub mod scalar;
pub mod settings;

pub use device_limits::DeviceLimits;
pub use dtype::{DType, Element};
pub use error::{LocalSizeAttempt, ReduxError, Result};
pub use scalar::ScalarValue;
pub use settings::{Backend, DeviceSettings, LogFormat, LogLevel, ReduxSettings, SettingsError};
