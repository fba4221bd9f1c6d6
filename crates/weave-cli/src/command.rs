use weave_types::{MediaKind, MediaRef};

/// One line of terminal input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    SendMedia { media: MediaRef, text: String },
    Stop,
    Open(String),
    New,
    Help,
    Quit,
    Invalid(String),
}

pub const HELP: &str = "\
commands:
  <text>                          send a message
  /media <image|audio> <url> [text]  send a message with media
  /stop                           stop the current reply
  /open <conversation-id>         switch conversation
  /new                            start a new conversation
  /quit                           save any partial reply and exit";

impl Command {
    /// Parse an input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Some(Command::Send(line.to_string()));
        };

        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest, ""),
        };

        let command = match name {
            "stop" => Command::Stop,
            "new" => Command::New,
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            "open" if !args.is_empty() => Command::Open(args.to_string()),
            "open" => Command::Invalid("usage: /open <conversation-id>".to_string()),
            "media" => parse_media(args),
            other => Command::Invalid(format!("unknown command /{}", other)),
        };
        Some(command)
    }
}

fn parse_media(args: &str) -> Command {
    let mut parts = args.splitn(3, char::is_whitespace);
    let kind = match parts.next() {
        Some("image") => MediaKind::Image,
        Some("audio") => MediaKind::Audio,
        _ => return Command::Invalid("usage: /media <image|audio> <url> [text]".to_string()),
    };
    let Some(url) = parts.next().filter(|url| !url.is_empty()) else {
        return Command::Invalid("usage: /media <image|audio> <url> [text]".to_string());
    };
    Command::SendMedia {
        media: MediaRef::new(url, kind),
        text: parts.next().unwrap_or_default().trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_sent() {
        assert_eq!(Command::parse("  hello there "), Some(Command::Send("hello there".to_string())));
        assert_eq!(Command::parse("   "), None);
    }

    #[test]
    fn test_slash_commands() {
        assert_eq!(Command::parse("/stop"), Some(Command::Stop));
        assert_eq!(Command::parse("/exit"), Some(Command::Quit));
        assert_eq!(Command::parse("/open conv-b"), Some(Command::Open("conv-b".to_string())));
        assert!(matches!(Command::parse("/open"), Some(Command::Invalid(_))));
        assert!(matches!(Command::parse("/frobnicate"), Some(Command::Invalid(_))));
    }

    #[test]
    fn test_media_command() {
        assert_eq!(
            Command::parse("/media audio https://cdn.example.com/a.ogg what is said here?"),
            Some(Command::SendMedia {
                media: MediaRef::new("https://cdn.example.com/a.ogg", MediaKind::Audio),
                text: "what is said here?".to_string(),
            })
        );
        assert!(matches!(
            Command::parse("/media video https://x"),
            Some(Command::Invalid(_))
        ));
    }
}
