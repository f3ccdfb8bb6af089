use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Interest/readiness bit-set for one descriptor.
///
/// The same type carries both what a caller wants to be woken for and what
/// the kernel actually reported. `ERROR` and `HANGUP` are always reported
/// when observed, whether or not they were requested.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PollEvents(u8);

impl PollEvents {
    pub const READ: PollEvents = PollEvents(0b0001);
    pub const WRITE: PollEvents = PollEvents(0b0010);
    pub const ERROR: PollEvents = PollEvents(0b0100);
    pub const HANGUP: PollEvents = PollEvents(0b1000);

    pub const fn empty() -> PollEvents {
        PollEvents(0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is set in `self`.
    pub fn contains(self, other: PollEvents) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: PollEvents) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for PollEvents {
    type Output = PollEvents;

    fn bitor(self, other: PollEvents) -> PollEvents {
        PollEvents(self.0 | other.0)
    }
}

impl BitOrAssign for PollEvents {
    fn bitor_assign(&mut self, other: PollEvents) {
        self.0 |= other.0;
    }
}

impl BitAnd for PollEvents {
    type Output = PollEvents;

    fn bitand(self, other: PollEvents) -> PollEvents {
        PollEvents(self.0 & other.0)
    }
}

impl fmt::Debug for PollEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("(empty)");
        }
        let mut first = true;
        for (bit, name) in [
            (PollEvents::READ, "READ"),
            (PollEvents::WRITE, "WRITE"),
            (PollEvents::ERROR, "ERROR"),
            (PollEvents::HANGUP, "HANGUP"),
        ] {
            if self.contains(bit) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}
