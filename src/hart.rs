//! Hart context: all architectural state of one executing core, generic over
//! the capability encoding in use.

use std::marker::PhantomData;

use crate::exception::CAUSE_REG_NONE;
use crate::regs::{CapCause, CapRegFile, Cp0, Fpu, IntRegFile};
use crate::{CapCodec, CapEx, Stats, Trap};

/// Behaviour knobs owned by the embedder.
#[derive(Debug, Clone, Copy)]
pub struct CoprocConfig {
    /// Let unaligned integer accesses through to the host path instead of
    /// raising AdEL/AdES.
    pub allow_unaligned: bool,
    /// Raise Inexact when an operation produces an unrepresentable cursor,
    /// instead of silently stripping the tag.
    pub trap_on_unrepresentable: bool,
    /// Emit diagnostics for the experimental PCC/otype cross-checks on plain
    /// loads and stores. Never traps.
    pub warn_type_checks: bool,
    /// Record statistics.
    pub stats_enabled: bool,
}

impl Default for CoprocConfig {
    fn default() -> Self {
        CoprocConfig {
            allow_unaligned: false,
            trap_on_unrepresentable: false,
            warn_type_checks: false,
            stats_enabled: false,
        }
    }
}

/// One emulated core. Instruction semantics run to completion on the calling
/// thread; the memory collaborator is invoked synchronously.
#[derive(Debug)]
pub struct Hart<C: CapCodec> {
    pub caps: CapRegFile,
    pub ints: IntRegFile,
    pub cp0: Cp0,
    pub fpu: Fpu,
    pub config: CoprocConfig,
    pub stats: Stats,
    _codec: PhantomData<C>,
}

impl<C: CapCodec> Hart<C> {
    pub fn new(config: CoprocConfig) -> Self {
        Hart {
            caps: CapRegFile::new(),
            ints: IntRegFile::default(),
            cp0: Cp0::default(),
            fpu: Fpu::default(),
            stats: Stats::new(config.stats_enabled),
            config,
            _codec: PhantomData,
        }
    }

    pub fn kernel_mode(&self) -> bool {
        self.cp0.kernel_mode()
    }

    /// Record a capability exception against `reg` and produce the trap to
    /// propagate. The cause register is the only architectural state touched.
    pub fn raise_c2(&mut self, kind: CapEx, reg: u8) -> Trap {
        log::trace!(
            "C2 exception {:?} (cause {:#04x}) on register {}",
            kind,
            kind.code(),
            reg
        );
        self.caps.cap_cause = CapCause { kind, reg };
        Trap::Capability { kind, reg }
    }

    /// Capability exception with no register at fault (`CReturn`).
    pub fn raise_c2_noreg(&mut self, kind: CapEx) -> Trap {
        self.raise_c2(kind, CAUSE_REG_NONE)
    }

    /// Address error, recording the faulting address.
    pub fn raise_address_error(&mut self, addr: u64, store: bool) -> Trap {
        self.cp0.bad_vaddr = addr;
        if store {
            Trap::AddressErrorStore { addr }
        } else {
            Trap::AddressErrorLoad { addr }
        }
    }
}

impl<C: CapCodec> Default for Hart<C> {
    fn default() -> Self {
        Hart::new(CoprocConfig::default())
    }
}
