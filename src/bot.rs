use std::fmt::Display;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use chrono::Local;
use futures::join;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::checkin::CheckIns;
use crate::command::{self, Command};
use crate::config::Config;
use crate::db::Database;
use crate::message::Message;
use crate::mood::Mood;
use crate::puns::Puns;
use crate::signal::{BotSignal, ChatSender};
use crate::songs::Songs;
use crate::stream::{IrcEvent, Stream};
use crate::token::Token;

const MAX_RECONNECT_ATTEMPTS: u32 = 5;
const TICK: Duration = Duration::from_secs(1);

pub struct Bot {
    irc_stream: Stream,
    cfg: Config,
    bot_token: Token,
    active_commands: Vec<Command>,
    chat: ChatSender,
    receiver: UnboundedReceiver<BotSignal>,

    puns: Puns,
    mood: Mood,
    checkins: CheckIns,
    songs: Songs,
}

impl Bot {
    pub async fn initialize(cfg: Config) -> Result<Self> {
        if cfg.twitch_cfg.bot_id.is_empty() {
            bail!("twitch_cfg.bot_id is not set. Run with --authorize first.");
        }

        let db = Database::open(&cfg.database_path)?;
        let active_commands = command::get_commands(&cfg.commands_path)?;

        let (bot_token, irc_stream) = join!(
            Token::from_db(db.clone(), &cfg.twitch_cfg.bot_id, &cfg.twitch_cfg),
            Stream::new(
                &cfg.twitch_cfg.irc_host,
                cfg.twitch_cfg.irc_port,
                cfg.twitch_cfg.channel.clone(),
            )
        );

        let (chat, receiver) = ChatSender::channel();
        let now = Instant::now();

        let mut bot = Bot {
            irc_stream: irc_stream?,
            bot_token: bot_token?,
            active_commands,
            puns: Puns::new(cfg.puns.clone(), db.clone(), chat.clone()),
            mood: Mood::new(cfg.mood.clone(), db.clone(), chat.clone()),
            checkins: CheckIns::new(
                db,
                chat.clone(),
                cfg.checkin.enabled,
                Local::now().date_naive(),
            ),
            songs: Songs::new(cfg.songs.clone(), chat.clone(), now),
            chat,
            receiver,
            cfg,
        };

        bot.irc_stream
            .connect_to_irc(&bot.cfg.twitch_cfg.account, &bot.bot_token.access_token)
            .await?;
        info!(channel = %bot.cfg.twitch_cfg.channel, "joined channel");

        Ok(bot)
    }

    /// Main loop. Returns on ctrl-c, or when the connection can't be re-established.
    pub async fn run(&mut self) -> Result<()> {
        let mut ticker = interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                event = self.irc_stream.read_irc() => match event {
                    Ok(IrcEvent::Chat(message)) => self.handle_message(message).await,
                    Ok(IrcEvent::Ping(answer)) => self.irc_stream.pong(answer.as_deref()).await,
                    Ok(IrcEvent::Nothing) => {}
                    Err(e) => {
                        warn!(error = %e, "lost IRC connection");
                        self.reconnect().await?;
                    }
                },
                _ = ticker.tick() => self.on_tick().await,
                Some(signal) = self.receiver.recv() => self.handle_signal(signal).await,
                _ = &mut shutdown => {
                    warn!("--- shutting down due to ctrl-c ---");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn on_tick(&mut self) {
        let now = Instant::now();
        self.puns.check_expiry(now);
        self.mood.check_expiry(now);
        self.songs.tick(now);

        // hourly token validation
        self.bot_token.validate_if_stale().await;
    }

    async fn handle_signal(&mut self, signal: BotSignal) {
        match signal {
            BotSignal::Chat(message) => self.send_chat(message).await,
        }
    }

    async fn handle_message(&mut self, message: Message) {
        info!("[{}] - {}: {}", message.channel, message.user.username, message.message);
        self.songs.helper_mut().chat_seen();

        if let Some(command) = self.get_command_instance(message) {
            self.run_command(command).await;
        }
    }

    pub fn get_command_instance(&mut self, message: Message) -> Option<Command> {
        let (found, arguments) =
            match command::find_command_by_message(&mut self.active_commands, &message) {
                Some((found, arguments)) => (Some(found), arguments),
                None => (None, Vec::new()),
            };

        // An instance of a command might be different for each use,
        // e.g. the user who called it or the arguments given
        let command = command::validate_and_return_command(found, &message)?;
        let mut instance = command.clone();
        instance.recent_users.clear();
        instance.arguments = arguments;
        instance.requested_by = Some(message.user);
        Some(instance)
    }

    pub async fn run_command(&mut self, command: Command) {
        if let Some(response) = command.render_response() {
            self.chat.say(response);
        }

        let Some(user) = command.requested_by.as_ref() else {
            return;
        };

        // Add command specific functionality here
        match command.cmd.as_str() {
            "!pun" => self.puns.start_round(user).await,
            "!ratepun" => self.puns.rate(user, command.int_argument()),
            "!banpun" => self.puns.ban_current(user),
            "!moodcheck" => self
                .mood
                .start_check(user, command.int_argument(), Instant::now()),
            "!mood" => self.mood.record(user, command.int_argument()),
            "!checkin" => self.checkins.checkin(user),
            "!songlist" => self.songs.songlist(user),
            "!whatsong" => self.songs.whatsong(user).await,
            "!nextsong" => self.songs.nextsong(user).await,
            _ => (), // a response defined in commands.yaml was most likely already sent
        };
    }

    async fn send_chat<T: Display>(&mut self, message: T) {
        match self.irc_stream.send_chat_message(message).await {
            Ok(()) => self.songs.helper_mut().bot_spoke(),
            Err(e) => error!(error = %e, "failed to send chat message"),
        }
    }

    async fn reconnect(&mut self) -> Result<()> {
        for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
            sleep(Duration::from_secs(2u64.pow(attempt))).await;

            if let Err(e) = self.bot_token.validate().await {
                warn!(attempt, error = %e, "token validation failed before reconnecting");
            }

            match self.connect().await {
                Ok(stream) => {
                    self.irc_stream = stream;
                    info!(attempt, "reconnected to IRC");
                    return Ok(());
                }
                Err(e) => warn!(attempt, error = %e, "reconnect failed"),
            }
        }

        bail!("giving up after {MAX_RECONNECT_ATTEMPTS} reconnect attempts")
    }

    async fn connect(&self) -> Result<Stream> {
        let twitch = &self.cfg.twitch_cfg;
        let mut stream = Stream::new(&twitch.irc_host, twitch.irc_port, twitch.channel.clone()).await?;
        stream
            .connect_to_irc(&twitch.account, &self.bot_token.access_token)
            .await?;
        Ok(stream)
    }
}
