use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Per-method scan/instrumentation state. The bit layout is shared with the
/// bytecode editor and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanState(u16);

impl ScanState {
    pub const REACHABLE: u16 = 1;
    pub const UNSCANNABLE: u16 = 2;
    pub const SCANNED: u16 = 4;
    pub const INSTRUMENTED: u16 = 8;
    pub const LEAF: u16 = 16;
    pub const VIRTUAL: u16 = 32;
    pub const ROOT: u16 = 64;
    pub const SPECIAL: u16 = 128;
    pub const MARKER: u16 = 256;

    pub fn set(&mut self, flag: u16) {
        self.0 |= flag;
    }

    pub fn clear(&mut self, flag: u16) {
        self.0 &= !flag;
    }

    pub fn has(self, flag: u16) -> bool {
        self.0 & flag != 0
    }

    pub fn raw(self) -> u16 {
        self.0
    }
}

/// Probe categories. Each indexes the per-class base constant-pool counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum InjKind {
    RecursiveNormalMethod = 0,
    RecursiveRootMethod = 1,
    RecursiveMarkerMethod = 2,
    CodeRegion = 3,
    StackMap = 4,
    Throwable = 5,
}

pub const INJ_MAXNUMBER: usize = 6;

// Class/method access flags, JVMS table 4.1-B / 4.6-A.
pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_NATIVE: u16 = 0x0100;
pub const ACC_INTERFACE: u16 = 0x0200;
pub const ACC_ABSTRACT: u16 = 0x0400;
