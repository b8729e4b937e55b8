//! The substate bitfield of a PSM entry.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// State bits of one PSM log entry.
    ///
    /// A substate is a combination of a *pure* progress bit and decision /
    /// lifecycle overlays:
    ///
    /// | Bit | Meaning |
    /// |-----|---------|
    /// | [`SENDING`](Self::SENDING) | an outbound message is being produced |
    /// | [`WAITING`](Self::WAITING) | blocked until a peer message arrives |
    /// | [`READY`](Self::READY) | protocol finished normally |
    /// | [`FAILURE`](Self::FAILURE) | protocol finished abnormally |
    /// | [`ACK`](Self::ACK) | decision overlay: accepted |
    /// | [`NACK`](Self::NACK) | decision overlay: rejected |
    /// | [`ARCHIVING`](Self::ARCHIVING) | lifecycle overlay: released by the owner |
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SubState: u16 {
        /// Producing or having just received a message.
        const SENDING   = 0b000_0001;
        /// Blocked on a peer message of a known type.
        const WAITING   = 0b000_0010;
        /// Terminal, normal completion.
        const READY     = 0b000_0100;
        /// Terminal, abnormal completion.
        const FAILURE   = 0b000_1000;
        /// Decision overlay: accepted.
        const ACK       = 0b001_0000;
        /// Decision overlay: rejected.
        const NACK      = 0b010_0000;
        /// Lifecycle overlay: archived by the owner.
        const ARCHIVING = 0b100_0000;
    }
}

impl SubState {
    /// Normal completion with acceptance.
    pub const READY_ACK: Self = Self::READY.union(Self::ACK);

    /// Normal completion with rejection.
    pub const READY_NACK: Self = Self::READY.union(Self::NACK);

    /// Projects the pure progress bits, masking the decision and lifecycle
    /// overlays.
    ///
    /// # Example
    ///
    /// ```
    /// use veris_psm::SubState;
    ///
    /// assert_eq!(SubState::READY_ACK.pure(), SubState::READY);
    /// assert_eq!(
    ///     (SubState::FAILURE | SubState::ARCHIVING).pure(),
    ///     SubState::FAILURE,
    /// );
    /// ```
    #[must_use]
    pub fn pure(self) -> Self {
        self.difference(Self::ACK | Self::NACK | Self::ARCHIVING)
    }

    /// Returns `true` when the pure projection is `READY` or `FAILURE`.
    ///
    /// Terminal states are absorbing for protocol logic; only the
    /// `ARCHIVING` overlay may still be added.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self.pure(), Self::READY | Self::FAILURE)
    }

    /// Returns `true` when the decision overlay is `ACK`.
    #[must_use]
    pub fn is_ack(self) -> bool {
        self.contains(Self::ACK)
    }
}

impl std::fmt::Display for SubState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = Vec::new();
        for (name, flag) in [
            ("sending", Self::SENDING),
            ("waiting", Self::WAITING),
            ("ready", Self::READY),
            ("failure", Self::FAILURE),
            ("ack", Self::ACK),
            ("nack", Self::NACK),
            ("archiving", Self::ARCHIVING),
        ] {
            if self.contains(flag) {
                names.push(name);
            }
        }
        write!(f, "{}", names.join("|"))
    }
}
