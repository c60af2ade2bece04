//! Ambiguous-file routing.
//!
//! Files whose dialect cannot be told from their extension are evaluated in
//! whichever dialect session the ambiguous slot currently aliases. The
//! toggle flips that alias between the two live sessions.

use crate::orchestrator::state::{ConnectionState, SessionSlot};

/// Flip the ambiguous slot to the other dialect session.
///
/// Returns the slot now aliased, or `None` when nothing changed: not
/// connected, the other dialect has no session, or the ambiguous slot does
/// not alias either dialect.
pub fn toggle(state: &mut ConnectionState) -> Option<SessionSlot> {
    if !state.connected {
        return None;
    }

    let ambiguous = state.ambiguous_session.as_ref()?;

    let target = if state.secondary_session.as_ref() == Some(ambiguous) {
        SessionSlot::Primary
    } else if state.primary_session.as_ref() == Some(ambiguous) {
        SessionSlot::Secondary
    } else {
        return None;
    };

    let session = state.session(target)?.clone();
    state.ambiguous_session = Some(session);
    Some(target)
}
