//! Command tags exchanged once a connection reaches the `Online` stage.

/// The command a client is issuing, identified by a short ASCII tag on the
/// wire (see [`CommandTag::as_str`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandTag {
    GetStage,
    Ping,
    SendMessage,
    ReceiveMessages,
    ResetKeys,
}

impl CommandTag {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandTag::GetStage => "gs",
            CommandTag::Ping => "p",
            CommandTag::SendMessage => "sm",
            CommandTag::ReceiveMessages => "rm",
            CommandTag::ResetKeys => "rk",
        }
    }

    pub fn parse(tag: &str) -> Option<CommandTag> {
        match tag {
            "gs" => Some(CommandTag::GetStage),
            "p" => Some(CommandTag::Ping),
            "sm" => Some(CommandTag::SendMessage),
            "rm" => Some(CommandTag::ReceiveMessages),
            "rk" => Some(CommandTag::ResetKeys),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_every_known_tag() {
        for tag in [
            CommandTag::GetStage,
            CommandTag::Ping,
            CommandTag::SendMessage,
            CommandTag::ReceiveMessages,
            CommandTag::ResetKeys,
        ] {
            assert_eq!(CommandTag::parse(tag.as_str()), Some(tag));
        }
    }

    #[test]
    fn rejects_unknown_tag() {
        assert_eq!(CommandTag::parse("zz"), None);
    }
}
