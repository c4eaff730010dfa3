pub mod aarch64;
pub mod barriers;

pub use aarch64::*;

pub fn init() {
    aarch64::gic::init().expect("GIC init must succeed");
    aarch64::context::init_vectors();
    aarch64::context::init_fpu().expect("FPU init must succeed");
}

pub fn get_ticks() -> u64 {
    aarch64::timer::get_ticks()
}
