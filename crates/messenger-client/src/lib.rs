//! Client-side driver for the encrypted direct-messaging protocol: the
//! symmetric counterpart to `messenger-server`'s stage machine and command
//! dispatch.

mod driver;

pub use driver::{ClientDriver, DriverError};
