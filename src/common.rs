use std::time::Instant;

pub(crate) trait InstantExt {
    fn elapsed_us(&self) -> u64;
}

impl InstantExt for Instant {
    fn elapsed_us(&self) -> u64 {
        self.elapsed().as_micros() as u64
    }
}
