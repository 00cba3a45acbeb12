//! IRC protocol lines.

/// Max IRC line length including CRLF.
pub const LINE_LIMIT: usize = 512;

/// Room left for the `:nick!user@host ` prefix a server adds when relaying.
const PREFIX_RESERVE: usize = 100;

/// A single parsed IRC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcMessage {
    /// Source (`nick!user@host` or a server name), without the leading `:`.
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
    /// Serialize the last param with a leading `:` even if not required.
    pub trailing: bool,
}

impl IrcMessage {
    pub fn new(command: &str, params: Vec<String>, trailing: bool) -> Self {
        Self {
            prefix: None,
            command: command.to_string(),
            params,
            trailing,
        }
    }

    pub fn pass(password: &str) -> Self {
        Self::new("PASS", vec![password.to_string()], false)
    }

    pub fn nick(nickname: &str) -> Self {
        Self::new("NICK", vec![nickname.to_string()], false)
    }

    pub fn user(ident: &str, realname: &str) -> Self {
        let params = vec![
            ident.to_string(),
            "0".to_string(),
            "*".to_string(),
            realname.to_string(),
        ];
        Self::new("USER", params, true)
    }

    pub fn join(channels: &[String]) -> Self {
        Self::new("JOIN", vec![channels.join(",")], false)
    }

    pub fn privmsg(target: &str, text: &str) -> Self {
        Self::new("PRIVMSG", vec![target.to_string(), text.to_string()], true)
    }

    pub fn ping(token: &str) -> Self {
        Self::new("PING", vec![token.to_string()], true)
    }

    /// Reply to a server `PING`, echoing its parameters.
    pub fn pong(ping: &IrcMessage) -> Self {
        Self::new("PONG", ping.params.clone(), ping.trailing)
    }

    pub fn quit(reason: &str) -> Self {
        Self::new("QUIT", vec![reason.to_string()], true)
    }

    /// Parse a line without its CRLF. Returns `None` for empty lines.
    ///
    /// IRCv3 message tags are skipped.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);

        if rest.starts_with('@') {
            rest = rest.split_once(' ').map(|(_, r)| r).unwrap_or("");
        }
        rest = rest.trim_start_matches(' ');

        let prefix = match rest.strip_prefix(':') {
            Some(r) => {
                let (prefix, r) = r.split_once(' ').unwrap_or((r, ""));
                rest = r;
                Some(prefix.to_string())
            }
            None => None,
        };

        rest = rest.trim_start_matches(' ');
        let (command, mut rest) = rest.split_once(' ').unwrap_or((rest, ""));
        if command.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        let mut trailing = false;
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(t) = rest.strip_prefix(':') {
                params.push(t.to_string());
                trailing = true;
                break;
            }
            let (param, r) = rest.split_once(' ').unwrap_or((rest, ""));
            params.push(param.to_string());
            rest = r;
        }

        Some(Self {
            prefix,
            command: command.to_ascii_uppercase(),
            params,
            trailing,
        })
    }

    /// Nickname part of the prefix, if the source is a user.
    pub fn source_nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        Some(prefix.split_once('!').map(|(n, _)| n).unwrap_or(prefix))
    }

    /// Serialize without CRLF. Line breaks inside params become spaces.
    pub fn to_line(&self) -> String {
        let mut line = String::new();
        if let Some(ref prefix) = self.prefix {
            line.push(':');
            line.push_str(prefix);
            line.push(' ');
        }
        line.push_str(&self.command);

        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            line.push(' ');
            let needs_colon = i == last
                && (self.trailing || param.is_empty() || param.contains(' ') || param.starts_with(':'));
            if needs_colon {
                line.push(':');
            }
            line.extend(param.chars().map(|c| if c == '\r' || c == '\n' { ' ' } else { c }));
        }
        line
    }
}

/// Whether `target` names a channel rather than a user.
pub fn is_channel(target: &str) -> bool {
    target.starts_with(['#', '&', '+', '!'])
}

/// CTCP delimiter. Stripped from relayed text so a message can never be
/// taken for a CTCP request by other clients.
const CTCP_DELIM: char = '\u{1}';

/// Build the PRIVMSG lines needed to deliver `text` to `target`.
///
/// Each line of `text` is sent separately. A line longer than the room left
/// after the command, the target and the reserved server prefix is packed
/// word by word into several PRIVMSGs.
pub fn privmsgs(target: &str, text: &str) -> Vec<IrcMessage> {
    let overhead = PREFIX_RESERVE + "PRIVMSG  :\r\n".len() + target.len();
    let budget = LINE_LIMIT.saturating_sub(overhead).max(32);

    let text = text.replace(CTCP_DELIM, "");
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .flat_map(|line| {
            if line.len() <= budget {
                vec![line.to_string()]
            } else {
                pack_words(line, budget)
            }
        })
        .map(|chunk| IrcMessage::privmsg(target, &chunk))
        .collect()
}

/// Greedily pack the words of `line` into chunks of at most `budget` bytes.
///
/// Whitespace runs collapse to one space at each join. A word that does not
/// fit in an empty chunk is cut on a char boundary.
fn pack_words(line: &str, budget: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for mut word in line.split_whitespace() {
        while word.len() > budget {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            let cut = char_floor(word, budget);
            chunks.push(word[..cut].to_string());
            word = &word[cut..];
        }

        let joined = if current.is_empty() {
            word.len()
        } else {
            current.len() + 1 + word.len()
        };
        if joined > budget {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Largest char boundary of `s` not past `max`. Never 0 for a non-empty `s`
/// when `max` is at least one full char.
fn char_floor(s: &str, max: usize) -> usize {
    (1..=max.min(s.len()))
        .rev()
        .find(|&i| s.is_char_boundary(i))
        .unwrap_or_else(|| s.chars().next().map_or(0, char::len_utf8))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_privmsg() {
        let msg = IrcMessage::parse(":alice!~a@host.example PRIVMSG #rally :hello there").unwrap();
        assert_eq!(msg.prefix.as_deref(), Some("alice!~a@host.example"));
        assert_eq!(msg.source_nick(), Some("alice"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#rally", "hello there"]);
        assert!(msg.trailing);
    }

    #[test]
    fn test_parse_numeric_and_middle_params() {
        let msg = IrcMessage::parse(":irc.example 001 relay :Welcome to the network").unwrap();
        assert_eq!(msg.source_nick(), Some("irc.example"));
        assert_eq!(msg.command, "001");
        assert_eq!(msg.params, vec!["relay", "Welcome to the network"]);

        let msg = IrcMessage::parse("MODE #a +o  bob").unwrap();
        assert!(msg.prefix.is_none());
        assert_eq!(msg.params, vec!["#a", "+o", "bob"]);
        assert!(!msg.trailing);
    }

    #[test]
    fn test_parse_tags_and_empty_trailing() {
        let msg = IrcMessage::parse("@time=2024-01-01T00:00:00Z :bob!b@h PRIVMSG #a :").unwrap();
        assert_eq!(msg.source_nick(), Some("bob"));
        assert_eq!(msg.params, vec!["#a", ""]);
    }

    #[test]
    fn test_parse_empty_line() {
        assert!(IrcMessage::parse("").is_none());
        assert!(IrcMessage::parse("\r\n").is_none());
        assert!(IrcMessage::parse(":only.prefix").is_none());
    }

    #[test]
    fn test_lowercase_command_normalized() {
        assert_eq!(IrcMessage::parse("ping :x").unwrap().command, "PING");
    }

    #[test]
    fn test_serialize_registration() {
        assert_eq!(IrcMessage::nick("relay").to_line(), "NICK relay");
        assert_eq!(IrcMessage::user("ident", "Real Name").to_line(), "USER ident 0 * :Real Name");
        assert_eq!(IrcMessage::pass("secret").to_line(), "PASS secret");
        assert_eq!(
            IrcMessage::join(&["#a".to_string(), "#b".to_string()]).to_line(),
            "JOIN #a,#b"
        );
    }

    #[test]
    fn test_pong_echoes_ping() {
        let ping = IrcMessage::parse("PING :irc.example").unwrap();
        assert_eq!(IrcMessage::pong(&ping).to_line(), "PONG :irc.example");
        let ping = IrcMessage::parse("PING token").unwrap();
        assert_eq!(IrcMessage::pong(&ping).to_line(), "PONG token");
    }

    #[test]
    fn test_serialize_strips_line_breaks() {
        let line = IrcMessage::privmsg("#a", "one\r\ntwo").to_line();
        assert_eq!(line, "PRIVMSG #a :one  two");
    }

    #[test]
    fn test_is_channel() {
        assert!(is_channel("#rally"));
        assert!(is_channel("&local"));
        assert!(!is_channel("relay-bot"));
    }

    #[test]
    fn test_privmsgs_split_lines() {
        let lines = privmsgs("#a", "first\n\nsecond\r\n");
        let texts: Vec<&str> = lines.iter().map(|m| m.params[1].as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[test]
    fn test_privmsgs_respect_line_limit() {
        let text = "word ".repeat(300);
        for msg in privmsgs("#a", &text) {
            assert!(msg.to_line().len() + 2 + PREFIX_RESERVE <= LINE_LIMIT);
        }
    }

    fn texts(messages: &[IrcMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.params[1].as_str()).collect()
    }

    #[test]
    fn test_short_line_is_sent_verbatim() {
        let lines = privmsgs("#a", "keep  the   spacing");
        assert_eq!(texts(&lines), vec!["keep  the   spacing"]);
    }

    #[test]
    fn test_long_line_keeps_words_whole() {
        let text = (0..120).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        let lines = privmsgs("#rally", &text);
        assert!(lines.len() > 1);

        let rejoined = texts(&lines).join(" ");
        assert_eq!(rejoined, text);
        for msg in &lines {
            assert!(msg.to_line().len() + 2 + PREFIX_RESERVE <= LINE_LIMIT);
        }
    }

    #[test]
    fn test_long_target_shrinks_chunks() {
        let text = "word ".repeat(200);
        let short = privmsgs("#a", &text).len();
        let long = privmsgs(&format!("#{}", "x".repeat(200)), &text).len();
        assert!(long > short);
    }

    #[test]
    fn test_unbroken_multibyte_word_is_cut_on_char_boundaries() {
        let text = "я".repeat(400);
        let lines = privmsgs("#a", &text);
        assert!(lines.len() > 1);
        assert_eq!(texts(&lines).concat(), text);
        for msg in &lines {
            assert!(msg.to_line().len() + 2 + PREFIX_RESERVE <= LINE_LIMIT);
        }
    }

    #[test]
    fn test_ctcp_delimiters_are_stripped() {
        let lines = privmsgs("#a", "\u{1}ACTION waves\u{1}");
        assert_eq!(texts(&lines), vec!["ACTION waves"]);
    }

    #[test]
    fn test_char_floor() {
        assert_eq!(char_floor("abc", 2), 2);
        assert_eq!(char_floor("abc", 10), 3);
        assert_eq!(char_floor("яя", 3), 2);
        assert_eq!(char_floor("я", 1), 2);
    }
}
