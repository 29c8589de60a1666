pub mod null;

#[cfg(feature = "engine-rqrr")]
pub mod qr;

pub use null::NullSession;

#[cfg(feature = "engine-rqrr")]
pub use qr::RqrrSession;
