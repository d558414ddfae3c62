//! Non-fatal rejections shared by every mutating entry point.

use crate::authority::ParticipantId;
use crate::game_state::GameState;
use crate::interaction::InteractableId;

/// An operation refused because one of its preconditions does not hold.
///
/// Rejections never change state; the caller may retry once the condition
/// clears.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejected {
    /// The local participant holds neither input nor state authority.
    #[error("{local} has no authority over an entity owned by {owner}")]
    NoAuthority {
        /// The local participant.
        local: ParticipantId,
        /// Owner of the entity.
        owner: ParticipantId,
    },

    /// The interaction cooldown has not elapsed.
    #[error("interaction on cooldown for {remaining_ticks} more ticks")]
    OnCooldown {
        /// Ticks until the next attempt is allowed.
        remaining_ticks: u32,
    },

    /// The local game state does not permit the operation.
    #[error("operation requires {expected:?} but game state is {actual:?}")]
    WrongState {
        /// State the operation needs.
        expected: GameState,
        /// State the participant is in.
        actual: GameState,
    },

    /// No interactable is in range.
    #[error("no interactable in range")]
    NoTarget,

    /// The target is exclusively in use by another participant.
    #[error("interactable {target:?} is in use by {user}")]
    TargetBusy {
        /// The contested target.
        target: InteractableId,
        /// Who is using it.
        user: ParticipantId,
    },

    /// Another session operation is still awaiting its response.
    #[error("a session operation is already pending")]
    OperationPending,

    /// The password typed for a listed session does not match.
    #[error("wrong room password")]
    WrongPassword,

    /// No participant entity with this id is live.
    #[error("unknown participant {0}")]
    UnknownParticipant(ParticipantId),

    /// The listed room is closed or full.
    #[error("room `{0}` is not accepting participants")]
    SessionUnavailable(String),
}
