pub mod atomic;
pub mod sos;

pub use atomic::{AtomicF64, lock};
pub use sos::SignalOfStop;
