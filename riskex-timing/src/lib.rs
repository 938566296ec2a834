mod timer;

pub use timer::{millis, MonotonicTimer, Timer};
