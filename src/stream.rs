use std::collections::HashMap;
use std::fmt::Display;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

use crate::error::BotError;
use crate::message::{Message, User};

/// What a single line from the server turned into.
#[derive(Debug, PartialEq)]
pub enum IrcEvent {
    Chat(Message),
    Ping(Option<String>),
    Nothing,
}

// Stream is interpreted as an IRC stream
pub struct Stream {
    reader: BufReader<OwnedReadHalf>,
    // partial line survives a cancelled read
    line_buf: Vec<u8>,
    writer: OwnedWriteHalf,
    channel: String,
}

impl Stream {
    pub async fn new(host: &str, port: u16, channel: String) -> Result<Self> {
        let tcp = TcpStream::connect((host, port))
            .await
            .with_context(|| format!("failed to connect to {host}:{port}"))?;
        let (read_half, writer) = tcp.into_split();

        Ok(Stream {
            reader: BufReader::new(read_half),
            line_buf: Vec::new(),
            writer,
            channel,
        })
    }

    pub async fn connect_to_irc(&mut self, account: &str, access_token: &str) -> Result<()> {
        self.send_raw(format!("PASS oauth:{access_token}")).await?;
        self.send_raw(format!("NICK {account}")).await?;
        self.send_raw("CAP REQ :twitch.tv/commands twitch.tv/tags").await?;
        self.send_raw(format!("JOIN #{}", self.channel)).await?;
        Ok(())
    }

    /// Reads one line. EOF and RECONNECT both surface as [`BotError::ConnectionClosed`].
    /// Invalid UTF-8 is replaced rather than treated as an error.
    pub async fn read_irc(&mut self) -> Result<IrcEvent> {
        let read = self.reader.read_until(b'\n', &mut self.line_buf).await?;
        if read == 0 && self.line_buf.is_empty() {
            return Err(BotError::ConnectionClosed.into());
        }
        let line = String::from_utf8_lossy(&self.line_buf).into_owned();
        self.line_buf.clear();
        trace!(line = %line.trim_end(), "irc <<");

        let Some(irc_line) = IrcLine::parse(&line) else {
            return Ok(IrcEvent::Nothing);
        };

        match irc_line.command {
            "PING" => Ok(IrcEvent::Ping(irc_line.trailing.map(str::to_string))),
            "PRIVMSG" => Ok(irc_line
                .into_message()
                .map(IrcEvent::Chat)
                .unwrap_or(IrcEvent::Nothing)),
            "RECONNECT" => Err(BotError::ConnectionClosed.into()),
            "USERNOTICE" => {
                if let Some((user, tier)) = irc_line.subscription() {
                    info!("subscribe: {user} @ {tier}");
                }
                Ok(IrcEvent::Nothing)
            }
            "NOTICE" => {
                warn!(notice = irc_line.trailing.unwrap_or_default(), "irc notice");
                Ok(IrcEvent::Nothing)
            }
            other => {
                debug!(command = other, "ignoring irc message");
                Ok(IrcEvent::Nothing)
            }
        }
    }

    pub async fn send_chat_message<T: Display>(&mut self, message: T) -> Result<()> {
        let line = format!("PRIVMSG #{} :{}", self.channel, message);
        self.send_raw(line)
            .await
            .context("failed to send chat message")
    }

    async fn send_raw(&mut self, line: impl AsRef<str>) -> Result<()> {
        let line = line.as_ref();
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn pong(&mut self, answer: Option<&str>) {
        let reply = match answer {
            Some(answer) => format!("PONG :{answer}"),
            None => "PONG".to_string(),
        };
        if let Err(e) = self.send_raw(reply).await {
            warn!(error = %e, "couldn't answer PING");
        }
    }
}

/// A raw IRC line split into its parts; borrows from the input.
#[derive(Debug, PartialEq)]
struct IrcLine<'a> {
    tags: HashMap<String, String>,
    prefix: Option<&'a str>,
    command: &'a str,
    params: Vec<&'a str>,
    trailing: Option<&'a str>,
}

impl<'a> IrcLine<'a> {
    fn parse(raw: &'a str) -> Option<Self> {
        let mut rest = raw.trim_end_matches(['\r', '\n']);

        let mut tags = HashMap::new();
        if let Some(tagged) = rest.strip_prefix('@') {
            let (raw_tags, remainder) = tagged.split_once(' ')?;
            tags = parse_tags(raw_tags);
            rest = remainder;
        }

        let mut prefix = None;
        if let Some(prefixed) = rest.strip_prefix(':') {
            let (p, remainder) = prefixed.split_once(' ')?;
            prefix = Some(p);
            rest = remainder;
        }

        let (head, trailing) = match rest.split_once(" :") {
            Some((head, trailing)) => (head, Some(trailing)),
            None => (rest, None),
        };

        let mut words = head.split(' ').filter(|w| !w.is_empty());
        let command = words.next()?;
        let params = words.collect();

        Some(IrcLine {
            tags,
            prefix,
            command,
            params,
            trailing,
        })
    }

    /// `(login, plan)` for sub and resub notices.
    fn subscription(&self) -> Option<(&str, &str)> {
        let kind = self.tags.get("msg-id")?;
        if kind != "sub" && kind != "resub" {
            return None;
        }
        let user = self
            .tags
            .get("login")
            .map(String::as_str)
            .or_else(|| self.prefix?.split('!').next())?;
        let tier = self
            .tags
            .get("msg-param-sub-plan")
            .map(String::as_str)
            .unwrap_or("unknown");
        Some((user, tier))
    }

    fn into_message(self) -> Option<Message> {
        let username = self.prefix?.split('!').next()?.to_string();
        let channel = self.params.first()?.trim_start_matches('#').to_string();

        // chatterino and 7tv append this to repeated messages
        let text = self
            .trailing
            .unwrap_or_default()
            .replace(" \u{e0000}", "")
            .trim_end()
            .to_string();

        Some(Message::new(User::from_tags(&self.tags, username), channel, text))
    }
}

fn parse_tags(raw_tags: &str) -> HashMap<String, String> {
    raw_tags
        .split(';')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (!key.is_empty()).then(|| (key.to_string(), unescape_tag(value)))
        })
        .collect()
}

fn unescape_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}
