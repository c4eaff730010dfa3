//! IRQ dispatch on top of the GICv2 driver in [`crate::arch::aarch64::gic`].
//!
//! The timer PPI (id [`gic::TIMER_PPI`]) is special-cased here rather than
//! going through the handler table: it always re-arms the generic timer via
//! [`crate::arch::aarch64::timer::tick`] before anything else runs.

extern crate alloc;

use alloc::collections::BTreeMap;

use spin::Mutex;

use crate::{
    arch::aarch64::gic,
    error::{KernelError, KernelResult},
    sync::once_lock::GlobalState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IrqNumber(pub u32);

impl IrqNumber {
    pub const fn new(irq: u32) -> Self {
        Self(irq)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for IrqNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "IRQ#{}", self.0)
    }
}

pub type IrqHandler = fn(IrqNumber);

const MAX_IRQ: u32 = 1020;

struct IrqManager {
    handlers: BTreeMap<u32, IrqHandler>,
    dispatch_count: u64,
}

impl IrqManager {
    fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
            dispatch_count: 0,
        }
    }

    fn register(&mut self, irq: IrqNumber, handler: IrqHandler) -> KernelResult<()> {
        if irq.0 >= MAX_IRQ {
            return Err(KernelError::InvalidArgument {
                name: "irq",
                value: "IRQ number exceeds maximum",
            });
        }
        if self.handlers.contains_key(&irq.0) {
            return Err(KernelError::AlreadyExists {
                resource: "IRQ handler",
                id: irq.0 as u64,
            });
        }
        self.handlers.insert(irq.0, handler);
        Ok(())
    }

    fn unregister(&mut self, irq: IrqNumber) -> KernelResult<()> {
        self.handlers
            .remove(&irq.0)
            .map(|_| ())
            .ok_or(KernelError::NotFound {
                resource: "IRQ handler",
                id: irq.0 as u64,
            })
    }

    fn dispatch(&mut self, irq: u32) {
        self.dispatch_count += 1;
        if irq == gic::TIMER_PPI {
            crate::arch::aarch64::timer::tick();
            return;
        }
        if let Some(&handler) = self.handlers.get(&irq) {
            handler(IrqNumber(irq));
        }
    }
}

static IRQ_MANAGER: GlobalState<Mutex<IrqManager>> = GlobalState::new();

pub fn init() -> KernelResult<()> {
    IRQ_MANAGER
        .init(Mutex::new(IrqManager::new()))
        .map_err(|_| KernelError::AlreadyExists {
            resource: "IRQ manager",
            id: 0,
        })?;
    gic::enable_irq(gic::TIMER_PPI)?;
    gic::set_irq_priority(gic::TIMER_PPI, 0)?;
    log::info!("IRQ manager initialized");
    Ok(())
}

pub fn register_handler(irq: IrqNumber, handler: IrqHandler) -> KernelResult<()> {
    IRQ_MANAGER
        .with_mut(|mtx| mtx.lock().register(irq, handler))
        .unwrap_or(Err(KernelError::NotInitialized {
            subsystem: "IRQ manager",
        }))
}

pub fn unregister_handler(irq: IrqNumber) -> KernelResult<()> {
    IRQ_MANAGER
        .with_mut(|mtx| mtx.lock().unregister(irq))
        .unwrap_or(Err(KernelError::NotInitialized {
            subsystem: "IRQ manager",
        }))
}

/// Called from [`crate::arch::aarch64::context::kikios_irq_handler`] with the
/// raw IRQ id returned by [`gic::handle_irq`].
pub fn dispatch(irq: u32) {
    IRQ_MANAGER.with_mut(|mtx| mtx.lock().dispatch(irq));
}

pub fn enable_irq(irq: IrqNumber) -> KernelResult<()> {
    gic::enable_irq(irq.0)
}

pub fn disable_irq(irq: IrqNumber) -> KernelResult<()> {
    gic::disable_irq(irq.0)
}

pub fn eoi(irq: IrqNumber) {
    gic::eoi(irq.0)
}

pub fn set_priority(irq: IrqNumber, priority: u8) -> KernelResult<()> {
    gic::set_irq_priority(irq.0, priority)
}

pub fn dispatch_count() -> u64 {
    IRQ_MANAGER
        .with(|mtx| mtx.lock().dispatch_count)
        .unwrap_or(0)
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn noop_handler(_irq: IrqNumber) {}

    #[test]
    fn register_rejects_duplicate() {
        let mut mgr = IrqManager::new();
        mgr.register(IrqNumber(5), noop_handler).unwrap();
        assert!(mgr.register(IrqNumber(5), noop_handler).is_err());
    }

    #[test]
    fn unregister_missing_fails() {
        let mut mgr = IrqManager::new();
        assert!(mgr.unregister(IrqNumber(5)).is_err());
    }
}
