use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// Per-participant view settings
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSettings {
    pub archived: bool,
    pub muted: bool,
    pub pinned: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub archived: Option<bool>,
    pub muted: Option<bool>,
    pub pinned: Option<bool>,
}

impl ParticipantSettings {
    pub fn apply(&mut self, update: &SettingsUpdate) {
        if let Some(v) = update.archived {
            self.archived = v;
        }
        if let Some(v) = update.muted {
            self.muted = v;
        }
        if let Some(v) = update.pinned {
            self.pinned = v;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub participants: Vec<Uuid>,
    pub is_group: bool,
    pub group_name: Option<String>,
    pub group_admin: Option<Uuid>,
    /// Always has an entry for every participant
    pub unread_counts: HashMap<Uuid, i64>,
    pub last_message_id: Option<Uuid>,
    pub typing_users: BTreeSet<Uuid>,
    pub settings: HashMap<Uuid, ParticipantSettings>,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    fn with_participants(participants: Vec<Uuid>, is_group: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            unread_counts: participants.iter().map(|p| (*p, 0)).collect(),
            settings: participants
                .iter()
                .map(|p| (*p, ParticipantSettings::default()))
                .collect(),
            participants,
            is_group,
            group_name: None,
            group_admin: None,
            last_message_id: None,
            typing_users: BTreeSet::new(),
            last_activity_at: now,
            created_at: now,
        }
    }

    pub fn new_direct(a: Uuid, b: Uuid) -> Self {
        Self::with_participants(vec![a, b], false)
    }

    pub fn new_group(name: String, admin: Uuid, participants: Vec<Uuid>) -> Self {
        let mut conversation = Self::with_participants(participants, true);
        conversation.group_name = Some(name);
        conversation.group_admin = Some(admin);
        conversation
    }

    /// Order-independent key identifying the direct conversation between two users.
    pub fn direct_key(a: Uuid, b: Uuid) -> String {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        format!("{lo}:{hi}")
    }

    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.participants.contains(&user_id)
    }

    pub fn unread_for(&self, user_id: Uuid) -> i64 {
        self.unread_counts.get(&user_id).copied().unwrap_or(0)
    }

    pub fn other_participants(&self, user_id: Uuid) -> impl Iterator<Item = Uuid> + '_ {
        self.participants
            .iter()
            .copied()
            .filter(move |p| *p != user_id)
    }

    /// Apply a sent message: last-message pointer, +1 unread for everyone but the sender.
    pub fn record_message(&mut self, message_id: Uuid, sender_id: Uuid, at: DateTime<Utc>) {
        self.last_message_id = Some(message_id);
        for participant in &self.participants {
            if *participant != sender_id {
                *self.unread_counts.entry(*participant).or_insert(0) += 1;
            }
        }
        self.last_activity_at = at;
    }

    /// Decrement by one, never below zero. Returns the new count.
    pub fn decrement_unread(&mut self, user_id: Uuid) -> i64 {
        let count = self.unread_counts.entry(user_id).or_insert(0);
        *count = (*count - 1).max(0);
        *count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_key_is_order_independent() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(Conversation::direct_key(a, b), Conversation::direct_key(b, a));
    }

    #[test]
    fn test_new_direct_initialises_counters() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = Conversation::new_direct(a, b);
        assert_eq!(conv.unread_for(a), 0);
        assert_eq!(conv.unread_for(b), 0);
        assert!(!conv.is_group);
    }

    #[test]
    fn test_record_message_skips_sender() {
        let (s, r1, r2) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut conv = Conversation::new_group("team".into(), s, vec![s, r1, r2]);
        conv.record_message(Uuid::new_v4(), s, Utc::now());
        assert_eq!(conv.unread_for(s), 0);
        assert_eq!(conv.unread_for(r1), 1);
        assert_eq!(conv.unread_for(r2), 1);
    }

    #[test]
    fn test_decrement_never_negative() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut conv = Conversation::new_direct(a, b);
        assert_eq!(conv.decrement_unread(b), 0);
    }

    #[test]
    fn test_settings_partial_update() {
        let mut settings = ParticipantSettings::default();
        settings.apply(&SettingsUpdate {
            muted: Some(true),
            ..Default::default()
        });
        assert!(settings.muted);
        assert!(!settings.archived);
    }
}
