//! Two-phase confirmation for destructive operator commands.

/// Token that commits an armed confirmation.
pub const AFFIRMATIVE: &str = "yes";

/// Token that cancels a confirmation; it never arms one.
pub const NEGATIVE: &str = "no";

/// Arm/commit latch.
///
/// A single call can never commit: the first call only arms, and only a
/// following call carrying [`AFFIRMATIVE`] commits. [`NEGATIVE`] always
/// leaves the latch idle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Confirmation {
    /// Nothing pending.
    #[default]
    Idle,
    /// Armed, waiting for an explicit answer.
    Armed,
    /// Committed; the owner consumes this with [`Confirmation::take_committed`].
    Committed,
}

/// What a call to [`Confirmation::answer`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmStep {
    /// The latch was armed by this call; the caller should prompt.
    Armed,
    /// Already armed and the token was missing or unrecognized; prompt again.
    StillArmed,
    /// Committed by this call.
    Committed,
    /// Cancelled by this call.
    Cancelled,
    /// Already committed and not yet consumed.
    AlreadyCommitted,
}

impl Confirmation {
    /// Feed an operator answer into the latch.
    pub fn answer(&mut self, token: Option<&str>) -> ConfirmStep {
        let token = token.map(|t| t.trim().to_ascii_lowercase());
        match (*self, token.as_deref()) {
            (_, Some(NEGATIVE)) => {
                *self = Self::Idle;
                ConfirmStep::Cancelled
            }
            (Self::Idle, _) => {
                *self = Self::Armed;
                ConfirmStep::Armed
            }
            (Self::Armed, Some(AFFIRMATIVE)) => {
                *self = Self::Committed;
                ConfirmStep::Committed
            }
            (Self::Armed, _) => ConfirmStep::StillArmed,
            (Self::Committed, _) => ConfirmStep::AlreadyCommitted,
        }
    }

    /// Whether a commit is pending.
    #[must_use]
    pub fn is_committed(self) -> bool {
        self == Self::Committed
    }

    /// Consume a pending commit, returning the latch to idle.
    pub fn take_committed(&mut self) -> bool {
        if self.is_committed() {
            *self = Self::Idle;
            true
        } else {
            false
        }
    }
}
