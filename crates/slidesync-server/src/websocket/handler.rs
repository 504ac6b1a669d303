//! Per-connection message handling: decodes inbound frames, tracks the
//! connection's role, and decides what each frame turns into.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::connection::Role;
use crate::auth::CredentialVerifier;
use crate::protocol::{ClientMessage, INVALID_CREDENTIALS, INVALID_PAGE, ServerMessage};

/// What the session should do with a handled frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionAction {
    /// Send to this connection only.
    Reply(ServerMessage),
    /// Submit as a Payload event to the hub.
    Publish(ServerMessage),
    /// Nothing to do.
    Ignore,
}

/// Role state machine for one connection.
///
/// Starts as [`Role::Viewer`]; a correct secret moves it to
/// [`Role::Controller`] for the rest of the connection's life.
pub struct SessionController {
    role: Role,
    verifier: Arc<dyn CredentialVerifier>,
}

impl SessionController {
    /// New viewer session.
    pub fn new(verifier: Arc<dyn CredentialVerifier>) -> Self {
        Self {
            role: Role::Viewer,
            verifier,
        }
    }

    /// Current role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Decode and handle a text frame. A decode error means the frame is
    /// malformed and the connection should be dropped.
    pub fn handle_text(&mut self, text: &str) -> serde_json::Result<SessionAction> {
        ClientMessage::decode(text).map(|msg| self.handle(msg))
    }

    /// Handle a decoded message.
    pub fn handle(&mut self, message: ClientMessage) -> SessionAction {
        match message {
            ClientMessage::Auth { password } => self.authenticate(&password),
            ClientMessage::PageChange { page } => self.page_change(page),
            ClientMessage::Other => {
                debug!("ignoring unsupported message type");
                SessionAction::Ignore
            }
        }
    }

    fn authenticate(&mut self, password: &str) -> SessionAction {
        if !self.verifier.verify(password) {
            warn!(role = %self.role, "controller authentication failed");
            return SessionAction::Reply(ServerMessage::error(INVALID_CREDENTIALS));
        }
        if self.role == Role::Viewer {
            info!("controller authenticated");
            self.role = Role::Controller;
        }
        SessionAction::Reply(ServerMessage::AdminStatus { is_admin: true })
    }

    fn page_change(&self, page: Option<i64>) -> SessionAction {
        if self.role != Role::Controller {
            debug!(?page, "page change from viewer dropped");
            return SessionAction::Ignore;
        }
        match page.filter(|p| *p >= 1).and_then(|p| u32::try_from(p).ok()) {
            Some(page) => SessionAction::Publish(ServerMessage::PageChange { page }),
            None => {
                debug!(?page, "rejecting invalid page number");
                SessionAction::Reply(ServerMessage::error(INVALID_PAGE))
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::auth::{DenyAllVerifier, SharedSecretVerifier};

    fn controller_session() -> SessionController {
        let mut session = SessionController::new(Arc::new(SharedSecretVerifier::new("pw")));
        let _ = session.handle_text(r#"{"type":"auth","password":"pw"}"#).unwrap();
        session
    }

    fn viewer_session() -> SessionController {
        SessionController::new(Arc::new(SharedSecretVerifier::new("pw")))
    }

    #[test]
    fn starts_as_viewer() {
        assert_eq!(viewer_session().role(), Role::Viewer);
    }

    #[test]
    fn correct_secret_promotes() {
        let mut session = viewer_session();
        let action = session
            .handle_text(r#"{"type":"auth","password":"pw"}"#)
            .unwrap();
        assert_eq!(
            action,
            SessionAction::Reply(ServerMessage::AdminStatus { is_admin: true })
        );
        assert_eq!(session.role(), Role::Controller);
    }

    #[test]
    fn wrong_secret_replies_error_and_stays_viewer() {
        let mut session = viewer_session();
        let action = session
            .handle_text(r#"{"type":"auth","password":"nope"}"#)
            .unwrap();
        assert_eq!(
            action,
            SessionAction::Reply(ServerMessage::error(INVALID_CREDENTIALS))
        );
        assert_eq!(session.role(), Role::Viewer);
    }

    #[test]
    fn null_secret_is_a_failed_auth_not_malformed() {
        let mut session = viewer_session();
        let action = session
            .handle_text(r#"{"type":"auth","password":null}"#)
            .unwrap();
        assert_eq!(
            action,
            SessionAction::Reply(ServerMessage::error(INVALID_CREDENTIALS))
        );
        assert_eq!(session.role(), Role::Viewer);
    }

    #[test]
    fn reauth_as_controller_keeps_role() {
        let mut session = controller_session();
        assert_eq!(
            session.handle(ClientMessage::Auth {
                password: "pw".into()
            }),
            SessionAction::Reply(ServerMessage::AdminStatus { is_admin: true })
        );
        assert_eq!(
            session.handle(ClientMessage::Auth {
                password: "wrong".into()
            }),
            SessionAction::Reply(ServerMessage::error(INVALID_CREDENTIALS))
        );
        assert_eq!(session.role(), Role::Controller);
    }

    #[test]
    fn deny_all_never_promotes() {
        let mut session = SessionController::new(Arc::new(DenyAllVerifier));
        let action = session.handle_text(r#"{"type":"auth","password":""}"#).unwrap();
        assert_matches!(action, SessionAction::Reply(ServerMessage::Error { .. }));
        assert_eq!(session.role(), Role::Viewer);
    }

    #[test]
    fn controller_page_change_is_published() {
        let mut session = controller_session();
        assert_eq!(
            session
                .handle_text(r#"{"type":"page_change","page":3}"#)
                .unwrap(),
            SessionAction::Publish(ServerMessage::PageChange { page: 3 })
        );
    }

    #[test]
    fn viewer_page_change_is_silent() {
        let mut session = viewer_session();
        assert_eq!(
            session
                .handle_text(r#"{"type":"page_change","page":5}"#)
                .unwrap(),
            SessionAction::Ignore
        );
        // Even an invalid page from a viewer gets no reply.
        assert_eq!(
            session.handle(ClientMessage::PageChange { page: Some(-1) }),
            SessionAction::Ignore
        );
    }

    #[test]
    fn controller_invalid_pages_are_rejected() {
        let mut session = controller_session();
        for page in [None, Some(0), Some(-4), Some(i64::from(u32::MAX) + 1)] {
            assert_eq!(
                session.handle(ClientMessage::PageChange { page }),
                SessionAction::Reply(ServerMessage::error(INVALID_PAGE)),
                "page {page:?}"
            );
        }
    }

    #[test]
    fn unknown_and_server_only_types_are_ignored() {
        let mut session = controller_session();
        for frame in [
            r#"{"type":"cursor"}"#,
            r#"{"type":"user_count","count":42}"#,
            r#"{"type":"new_pdf","filename":"evil.pdf"}"#,
        ] {
            assert_eq!(session.handle_text(frame).unwrap(), SessionAction::Ignore);
        }
    }

    #[test]
    fn malformed_frames_are_errors() {
        let mut session = controller_session();
        assert!(session.handle_text("{").is_err());
        assert!(session.handle_text(r#"{"page":2}"#).is_err());
        assert!(
            session
                .handle_text(r#"{"type":"page_change","page":"2"}"#)
                .is_err()
        );
        assert_eq!(session.role(), Role::Controller);
    }
}
