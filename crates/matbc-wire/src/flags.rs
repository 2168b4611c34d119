//! Frame flags

/// Frame flags (2 bytes)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameFlags(pub u16);

impl FrameFlags {
    pub const NONE: FrameFlags = FrameFlags(0);

    /// Frame is a retransmission after reconnect
    pub const RESEND: u16 = 0b0000_0001;
    /// Sender is above its outbound high watermark
    pub const BACKPRESSURE: u16 = 0b0000_0010;

    #[inline]
    pub fn new(bits: u16) -> Self {
        FrameFlags(bits)
    }

    #[inline]
    pub fn is_resend(self) -> bool {
        self.0 & Self::RESEND != 0
    }

    #[inline]
    pub fn is_backpressure(self) -> bool {
        self.0 & Self::BACKPRESSURE != 0
    }

    #[inline]
    pub fn set_resend(&mut self, value: bool) {
        self.set(Self::RESEND, value);
    }

    #[inline]
    pub fn set_backpressure(&mut self, value: bool) {
        self.set(Self::BACKPRESSURE, value);
    }

    fn set(&mut self, bit: u16, value: bool) {
        if value {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }
}
