/// The log4rs configuration shared by binaries.
pub mod log4rs;
