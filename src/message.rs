use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use crate::error::BotError;

#[derive(Clone, PartialEq, Debug)]
pub enum Group {
    STREAMER,
    MODERATOR,
    VIP,
    EVERYONE,
}

impl TryFrom<&str> for Group {
    type Error = BotError;

    fn try_from(group: &str) -> Result<Self, Self::Error> {
        match group.to_uppercase().as_str() {
            "STREAMER" => Ok(Group::STREAMER),
            "MODERATOR" => Ok(Group::MODERATOR),
            "VIP" => Ok(Group::VIP),
            "EVERYONE" => Ok(Group::EVERYONE),
            _ => Err(BotError::UnknownGroup(group.to_string())),
        }
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct Message {
    pub user: User,
    pub channel: String,
    pub message: String,
}

impl Message {
    pub fn new(user: User, channel: String, message: String) -> Self {
        Message {
            user,
            channel,
            message,
        }
    }
}

#[derive(Clone, Debug)]
pub struct User {
    pub username: String,
    /// Twitch user id from the `user-id` tag. Empty when tags weren't sent.
    pub id: String,
    pub groups: Vec<Group>,
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.username == other.username
    }
}

impl User {
    pub fn new(username: String, id: String, mut groups: Vec<Group>) -> Self {
        groups.push(Group::EVERYONE); // the default group is EVERYONE
        User {
            username,
            id,
            groups,
        }
    }

    pub fn from_tags(tags: &HashMap<String, String>, username: String) -> Self {
        let mut groups = vec![];

        let badges = tags.get("badges").map(String::as_str).unwrap_or_default();
        if badges.split(',').any(|badge| badge.starts_with("broadcaster/")) {
            groups.push(Group::STREAMER);
        }
        if tags.get("mod").is_some_and(|m| m == "1") {
            groups.push(Group::MODERATOR);
        }
        if tags.get("vip").is_some_and(|v| v == "1") || badges.contains("vip/") {
            groups.push(Group::VIP);
        }

        let id = tags.get("user-id").cloned().unwrap_or_default();
        Self::new(username, id, groups)
    }

    /// Identity used for one-vote-per-person bookkeeping.
    pub fn participant_id(&self) -> &str {
        if self.id.is_empty() {
            &self.username
        } else {
            &self.id
        }
    }

    pub fn is_elevated(&self) -> bool {
        self.groups
            .iter()
            .any(|g| matches!(g, Group::STREAMER | Group::MODERATOR))
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct RecentUser {
    pub user: User,
    pub can_use_at: SystemTime,
}

impl RecentUser {
    pub fn new(user: User) -> Self {
        RecentUser {
            user,
            can_use_at: SystemTime::now(),
        }
    }

    pub fn is_cooldown_active(&self) -> bool {
        SystemTime::now() < self.can_use_at
    }

    pub fn add_cooldown(&mut self, cooldown: Duration) {
        self.can_use_at = SystemTime::now() + cooldown;
    }
}
