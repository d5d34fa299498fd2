use cp_session::SessionEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Everything the panel pushes to its front-end, tagged by the terminal
/// session it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
#[serde(rename_all = "snake_case")]
pub enum PanelEvent {
    TerminalReady { session_id: Uuid },
    TerminalOutput { session_id: Uuid, data: String },
    TerminalExit { session_id: Uuid, code: Option<u32> },
    TerminalError { session_id: Uuid, message: String },
}

impl PanelEvent {
    pub fn from_session(session_id: Uuid, event: SessionEvent) -> Self {
        match event {
            SessionEvent::Ready => Self::TerminalReady { session_id },
            SessionEvent::Output(data) => Self::TerminalOutput { session_id, data },
            SessionEvent::Exit { code } => Self::TerminalExit { session_id, code },
            SessionEvent::Error(message) => Self::TerminalError {
                session_id,
                message,
            },
        }
    }

    pub fn session_id(&self) -> Uuid {
        match self {
            Self::TerminalReady { session_id }
            | Self::TerminalOutput { session_id, .. }
            | Self::TerminalExit { session_id, .. }
            | Self::TerminalError { session_id, .. } => *session_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialises_with_type_and_payload() {
        let id = Uuid::nil();
        let ev = PanelEvent::from_session(id, SessionEvent::Output("ls\r\n".into()));
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "terminal_output");
        assert_eq!(json["payload"]["data"], "ls\r\n");
        assert_eq!(ev.session_id(), id);
    }

    #[test]
    fn exit_code_is_preserved() {
        let ev = PanelEvent::from_session(Uuid::nil(), SessionEvent::Exit { code: Some(2) });
        assert_eq!(
            ev,
            PanelEvent::TerminalExit {
                session_id: Uuid::nil(),
                code: Some(2)
            }
        );
    }
}
